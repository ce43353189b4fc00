//! Conversational memory shared by all chat requests of a process.
//!
//! [`SummaryBufferMemory`] keeps recent question/answer turns verbatim and
//! folds older turns into a running summary once the buffer exceeds a token
//! budget. It is created once at server start and injected wherever it is
//! needed as `Arc<dyn ConversationMemory>`.
//!
//! Concurrent requests are not sequenced against each other: two requests
//! that overlap both load the same history, and their saves land in
//! completion order.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::chain::ChatModel;
use crate::models::{buffer_string, PromptMessage};
use crate::prompts::{render_template, SUMMARY_PROMPT};

/// Approximate chars-per-token ratio used for the memory budget.
const CHARS_PER_TOKEN: usize = 4;

/// Input side of a saved turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextInput {
    pub question: String,
}

/// Output side of a saved turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextOutput {
    pub output: String,
}

/// Variables injected into the prompt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryVariables {
    pub chat_history: Vec<PromptMessage>,
}

#[async_trait]
pub trait ConversationMemory: Send + Sync {
    /// Resolve prior conversation turns. Takes no per-call input.
    async fn load_memory_variables(&self) -> Result<MemoryVariables>;

    /// Record one completed turn.
    async fn save_context(&self, input: &ContextInput, output: &ContextOutput) -> Result<()>;
}

#[derive(Default)]
struct MemoryState {
    summary: String,
    buffer: Vec<PromptMessage>,
}

/// Summary + recent-turns buffer memory.
pub struct SummaryBufferMemory {
    model: Arc<dyn ChatModel>,
    max_token_limit: usize,
    state: Mutex<MemoryState>,
}

impl SummaryBufferMemory {
    pub fn new(model: Arc<dyn ChatModel>, max_token_limit: usize) -> Self {
        Self {
            model,
            max_token_limit,
            state: Mutex::new(MemoryState::default()),
        }
    }

    /// Current running summary (empty until the first prune).
    pub async fn summary(&self) -> String {
        self.state.lock().await.summary.clone()
    }

    async fn predict_new_summary(&self, pruned: &[PromptMessage], existing: &str) -> Result<String> {
        let new_lines = buffer_string(pruned);
        let prompt = render_template(
            SUMMARY_PROMPT,
            &[("summary", existing), ("new_lines", new_lines.as_str())],
        );
        let summary = self
            .model
            .complete(vec![PromptMessage::human(prompt)])
            .await?;
        Ok(summary.trim().to_string())
    }
}

/// Rough token estimate for a list of messages.
pub fn estimate_tokens(messages: &[PromptMessage]) -> usize {
    let chars: usize = buffer_string(messages).chars().count();
    chars.div_ceil(CHARS_PER_TOKEN)
}

#[async_trait]
impl ConversationMemory for SummaryBufferMemory {
    async fn load_memory_variables(&self) -> Result<MemoryVariables> {
        let state = self.state.lock().await;
        let mut chat_history = Vec::with_capacity(state.buffer.len() + 1);
        if !state.summary.is_empty() {
            chat_history.push(PromptMessage::system(state.summary.clone()));
        }
        chat_history.extend(state.buffer.iter().cloned());
        Ok(MemoryVariables { chat_history })
    }

    async fn save_context(&self, input: &ContextInput, output: &ContextOutput) -> Result<()> {
        let (pruned, existing) = {
            let mut state = self.state.lock().await;
            state.buffer.push(PromptMessage::human(input.question.clone()));
            state.buffer.push(PromptMessage::ai(output.output.clone()));

            let mut pruned = Vec::new();
            while estimate_tokens(&state.buffer) > self.max_token_limit && !state.buffer.is_empty() {
                pruned.push(state.buffer.remove(0));
            }
            (pruned, state.summary.clone())
        };

        if pruned.is_empty() {
            return Ok(());
        }

        debug!(pruned = pruned.len(), "summarizing pruned conversation turns");
        let summary = self.predict_new_summary(&pruned, &existing).await?;
        self.state.lock().await.summary = summary;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::ModelStream;
    use futures::stream::{self, StreamExt};
    use std::sync::Mutex as StdMutex;

    struct SummaryModel {
        prompts: StdMutex<Vec<String>>,
    }

    #[async_trait]
    impl ChatModel for SummaryModel {
        async fn stream(&self, _messages: Vec<PromptMessage>) -> Result<ModelStream> {
            Ok(stream::empty().boxed())
        }

        async fn complete(&self, messages: Vec<PromptMessage>) -> Result<String> {
            self.prompts
                .lock()
                .unwrap()
                .push(messages[0].content.clone());
            Ok("  summary text  ".to_string())
        }
    }

    fn memory(limit: usize) -> (Arc<SummaryModel>, SummaryBufferMemory) {
        let model = Arc::new(SummaryModel {
            prompts: StdMutex::new(Vec::new()),
        });
        let mem = SummaryBufferMemory::new(model.clone(), limit);
        (model, mem)
    }

    fn turn(q: &str, a: &str) -> (ContextInput, ContextOutput) {
        (
            ContextInput {
                question: q.to_string(),
            },
            ContextOutput {
                output: a.to_string(),
            },
        )
    }

    #[tokio::test]
    async fn test_empty_memory_has_no_history() {
        let (_, mem) = memory(2000);
        let vars = mem.load_memory_variables().await.unwrap();
        assert!(vars.chat_history.is_empty());
    }

    #[tokio::test]
    async fn test_saved_turns_are_loaded_in_order() {
        let (model, mem) = memory(2000);
        let (i, o) = turn("What is it?", "A document.");
        mem.save_context(&i, &o).await.unwrap();

        let vars = mem.load_memory_variables().await.unwrap();
        assert_eq!(
            vars.chat_history,
            vec![
                PromptMessage::human("What is it?"),
                PromptMessage::ai("A document.")
            ]
        );
        assert!(model.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_over_budget_turns_are_summarized() {
        // "Human: xxxxxxxx" is 15 chars = 4 tokens; two messages exceed 5.
        let (model, mem) = memory(5);
        let (i, o) = turn("xxxxxxxx", "yyyyyyyy");
        mem.save_context(&i, &o).await.unwrap();

        assert_eq!(mem.summary().await, "summary text");
        let prompts = model.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("Human: xxxxxxxx"));

        drop(prompts);
        let vars = mem.load_memory_variables().await.unwrap();
        assert_eq!(vars.chat_history[0], PromptMessage::system("summary text"));
        assert_eq!(vars.chat_history.last().unwrap(), &PromptMessage::ai("yyyyyyyy"));
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(&[]), 0);
        assert_eq!(estimate_tokens(&[PromptMessage::human("abc")]), 3); // "Human: abc" = 10 chars
    }
}
