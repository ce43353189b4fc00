//! Chain building: prompt template, memory loading, model call, and output
//! parsing composed into one [`TokenChain`].
//!
//! ```text
//! {question, context} ──▶ load memory ──▶ prompt ──▶ ChatModel::stream ──▶ StringOutputParser ──▶ tokens
//! ```
//!
//! The chain is the only thing the response streamer sees; tests substitute
//! their own [`TokenChain`] implementations.

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use std::sync::Arc;

use crate::memory::ConversationMemory;
use crate::models::{buffer_string, PromptMessage};
use crate::prompts::{render_template, HUMAN_PROMPT, SYSTEM_PROMPT};

/// One structured chunk produced by a chat model.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelChunk {
    /// Text delta; `None` when the chunk carries no content.
    pub content: Option<String>,
    pub done: bool,
}

pub type ModelStream = BoxStream<'static, Result<ModelChunk>>;

/// Lazy, finite, non-restartable sequence of text tokens.
pub type TokenStream = BoxStream<'static, Result<String>>;

/// A chat-completion backend.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Start a streaming completion.
    async fn stream(&self, messages: Vec<PromptMessage>) -> Result<ModelStream>;

    /// Run a completion to the end and return the full text.
    async fn complete(&self, messages: Vec<PromptMessage>) -> Result<String>;
}

/// Input of a chain invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainInput {
    pub question: String,
    pub context: String,
}

/// Maps `{question, context}` to a token stream.
#[async_trait]
pub trait TokenChain: Send + Sync {
    async fn stream(&self, input: ChainInput) -> Result<TokenStream>;
}

/// System instructions, a history placeholder, and the user question, in
/// that fixed order.
#[derive(Debug, Clone)]
pub struct ChatPromptTemplate {
    system_template: String,
    human_template: String,
}

impl ChatPromptTemplate {
    pub fn new(system_template: impl Into<String>, human_template: impl Into<String>) -> Self {
        Self {
            system_template: system_template.into(),
            human_template: human_template.into(),
        }
    }

    /// Render the prompt messages.
    ///
    /// `chat_history` fills both the `{chat_history}` slot of the system
    /// text (as `Speaker: content` lines) and the message placeholder
    /// between the system and user turns.
    pub fn format_messages(
        &self,
        question: &str,
        context: &str,
        chat_history: &[PromptMessage],
    ) -> Vec<PromptMessage> {
        let history_text = buffer_string(chat_history);
        let vars = [
            ("question", question),
            ("context", context),
            ("chat_history", history_text.as_str()),
        ];

        let mut messages = Vec::with_capacity(chat_history.len() + 2);
        messages.push(PromptMessage::system(render_template(
            &self.system_template,
            &vars,
        )));
        messages.extend(chat_history.iter().cloned());
        messages.push(PromptMessage::human(render_template(
            &self.human_template,
            &vars,
        )));
        messages
    }
}

/// Converts model chunks to plain text, one string per chunk.
///
/// Empty and whitespace-only deltas are kept; a chunk without content
/// becomes the empty string.
#[derive(Debug, Clone, Copy, Default)]
pub struct StringOutputParser;

impl StringOutputParser {
    pub fn parse(&self, chunk: ModelChunk) -> String {
        chunk.content.unwrap_or_default()
    }
}

/// Default prompt for document question answering.
pub fn build_prompt() -> ChatPromptTemplate {
    ChatPromptTemplate::new(SYSTEM_PROMPT, HUMAN_PROMPT)
}

/// The production chain: memory + prompt + model + parser.
pub struct ConversationChain {
    prompt: ChatPromptTemplate,
    model: Arc<dyn ChatModel>,
    memory: Arc<dyn ConversationMemory>,
    parser: StringOutputParser,
}

/// Compose the chain. Nothing is called until [`TokenChain::stream`].
pub fn build_chain(
    prompt: ChatPromptTemplate,
    model: Arc<dyn ChatModel>,
    memory: Arc<dyn ConversationMemory>,
) -> ConversationChain {
    ConversationChain {
        prompt,
        model,
        memory,
        parser: StringOutputParser,
    }
}

#[async_trait]
impl TokenChain for ConversationChain {
    async fn stream(&self, input: ChainInput) -> Result<TokenStream> {
        let variables = self.memory.load_memory_variables().await?;
        let messages =
            self.prompt
                .format_messages(&input.question, &input.context, &variables.chat_history);

        let parser = self.parser;
        let chunks = self.model.stream(messages).await?;
        Ok(chunks
            .map(move |chunk| chunk.map(|c| parser.parse(c)))
            .boxed())
    }
}
