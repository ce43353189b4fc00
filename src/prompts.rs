//! Prompt templates and a minimal `{variable}` renderer.

/// System instructions for answering questions about the uploaded document.
pub const SYSTEM_PROMPT: &str = "
You are a helpful and enthusiastic support bot.
You can answer questions about a document provided by the user.
You should be able to answer questions based on the context from the document and your previous conversation.

Use the following pieces of context to answer the user's question.

Document Context:
{context}

Conversation History:
{chat_history}

If you don't know the answer, just say that you don't know, don't try to make up an answer.
";

/// Template for the user turn.
pub const HUMAN_PROMPT: &str = "{question}";

/// Progressive summarization prompt used by the conversation memory.
pub const SUMMARY_PROMPT: &str = "
Your task is to progressively summarize a conversation. You must analyze the new lines of conversation in the context of the existing summary, and produce a new, updated summary.

Your summary should focus on identifying and tracking:
1. **Recurring Themes & Topics:** What are the main subjects being discussed?
2. **Key Entities & Pronouns:** Pay close attention to people, places, or concepts mentioned (e.g., \"the user's document,\" \"the AI's capabilities\").
3. **Outliers & Extreme Statements:** If a statement is particularly unusual, surprising, or emotionally charged compared to the rest of the conversation, make sure to include a note of it.

EXAMPLE
Current summary:
The user is asking about the AI's capabilities.

New lines of conversation:
Human: Can you handle massive files? Like, a 10GB text file?
AI: My current architecture has some limitations, but I can process very large documents. However, a 10GB file would be a challenge and likely cause a crash. I absolutely cannot handle that.

New summary:
The user is asking about the AI's capabilities, specifically regarding file size limits. The AI has stated it can handle large documents but explicitly noted that a 10GB file is beyond its current capacity and would be considered an extreme case that could cause a crash.
END OF EXAMPLE

Current summary:
{summary}

New lines of conversation:
{new_lines}

New summary:
";

/// Substitute `{name}` placeholders in a single pass.
///
/// Values are inserted verbatim, so braces inside a value are never
/// re-interpreted. Unknown placeholders are left as-is.
pub fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let replaced = after.find('}').and_then(|close| {
            let name = &after[..close];
            vars.iter()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| (*v, close))
        });
        match replaced {
            Some((value, close)) => {
                out.push_str(value);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}
