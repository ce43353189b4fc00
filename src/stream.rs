//! Server side of the chat stream: drives a [`TokenChain`] and frames its
//! output as Server-Sent Events.
//!
//! # Lifecycle
//!
//! ```text
//! Started ──meta:started──▶ Streaming ──token*──▶ Done    (meta:done)
//!                                      └────────▶ Errored (error)
//! ```
//!
//! - Exactly one `started` frame is written first.
//! - Each non-empty token is appended to the aggregate answer and written as
//!   a `token` frame, in chain order. Exactly-empty tokens are skipped;
//!   whitespace-only tokens are written.
//! - When the chain is exhausted the aggregate is saved to conversation
//!   memory, and only after the save completes is `done` written.
//! - Any failure (opening the chain, a token error, or the memory save)
//!   writes one `error` frame and ends the stream without saving.
//!
//! Dropping the returned stream (client disconnect) drops the token stream
//! with it; a turn cancelled before completion is not saved.

use anyhow::Result;
use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use std::convert::Infallible;
use std::sync::Arc;
use tracing::{debug, error};

use crate::chain::{ChainInput, TokenChain, TokenStream};
use crate::memory::{ContextInput, ContextOutput, ConversationMemory};
use crate::models::ChatMessage;
use crate::sse::SseEvent;

/// Message used when a failure carries no text.
pub const FALLBACK_ERROR_MESSAGE: &str = "Stream error";

/// Everything one chat response needs.
pub struct ChatStreamOptions {
    pub question: String,
    pub context_text: String,
    pub latest_message: ChatMessage,
    pub chain: Arc<dyn TokenChain>,
    pub memory: Arc<dyn ConversationMemory>,
}

/// Response state. `Done` and `Errored` are terminal.
enum StreamState {
    Started(Box<ChatStreamOptions>),
    Streaming(Box<Streaming>),
    Done,
    Errored,
}

/// What the streaming state produced on one step.
enum Step {
    Token(String),
    Finished,
    Failed(anyhow::Error),
}

struct Streaming {
    options: ChatStreamOptions,
    tokens: Option<TokenStream>,
    aggregate: String,
    completed: bool,
}

impl Streaming {
    fn new(options: ChatStreamOptions) -> Self {
        Self {
            options,
            tokens: None,
            aggregate: String::new(),
            completed: false,
        }
    }

    async fn step(&mut self) -> Step {
        let step = match self.next_token().await {
            Ok(Some(token)) => return Step::Token(token),
            Ok(None) => Step::Finished,
            Err(e) => Step::Failed(e),
        };
        self.completed = true;
        step
    }

    /// Next non-empty token, or `None` once the chain is exhausted and the
    /// answer has been saved.
    async fn next_token(&mut self) -> Result<Option<String>> {
        if self.tokens.is_none() {
            let input = ChainInput {
                question: self.options.question.clone(),
                context: self.options.context_text.clone(),
            };
            self.tokens = Some(self.options.chain.stream(input).await?);
        }
        let Some(tokens) = self.tokens.as_mut() else {
            return Ok(None);
        };

        while let Some(token) = tokens.next().await {
            let text = token?;
            if text.is_empty() {
                continue;
            }
            self.aggregate.push_str(&text);
            return Ok(Some(text));
        }

        self.tokens = None;
        self.persist().await?;
        Ok(None)
    }

    /// `&mut self` keeps the future `Send`: the token stream is not `Sync`.
    async fn persist(&mut self) -> Result<()> {
        let memory = Arc::clone(&self.options.memory);
        let input = ContextInput {
            question: self.options.latest_message.content.clone(),
        };
        let output = ContextOutput {
            output: self.aggregate.clone(),
        };
        memory.save_context(&input, &output).await
    }
}

impl Drop for Streaming {
    fn drop(&mut self) {
        if !self.completed {
            debug!(
                emitted_chars = self.aggregate.len(),
                "chat stream dropped before completion; turn not saved"
            );
        }
    }
}

impl StreamState {
    /// Produce the next frame and the following state, or `None` once a
    /// terminal state has been reached.
    async fn advance(self) -> Option<(Bytes, StreamState)> {
        match self {
            StreamState::Started(options) => Some((
                SseEvent::started().to_frame(),
                StreamState::Streaming(Box::new(Streaming::new(*options))),
            )),
            StreamState::Streaming(mut streaming) => match streaming.step().await {
                Step::Token(text) => Some((
                    SseEvent::Token(text).to_frame(),
                    StreamState::Streaming(streaming),
                )),
                Step::Finished => Some((SseEvent::done().to_frame(), StreamState::Done)),
                Step::Failed(e) => {
                    error!(error = %format!("{:#}", e), "SSE stream error");
                    Some((
                        SseEvent::error(error_message(&e)).to_frame(),
                        StreamState::Errored,
                    ))
                }
            },
            StreamState::Done | StreamState::Errored => None,
        }
    }
}

/// Best-effort human-readable message for an in-band error event.
pub fn error_message(e: &anyhow::Error) -> String {
    let message = e.to_string();
    if message.trim().is_empty() {
        FALLBACK_ERROR_MESSAGE.to_string()
    } else {
        message
    }
}

/// Build the SSE byte stream for one chat response.
///
/// Nothing runs until the stream is polled; the transport pulls frames one
/// at a time, so the body is never buffered in full.
pub fn create_chat_event_stream(
    options: ChatStreamOptions,
) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
    stream::unfold(
        StreamState::Started(Box::new(options)),
        |state| async move {
            let (frame, next) = state.advance().await?;
            Some((Ok(frame), next))
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryVariables;
    use crate::sse::{decode_frame, MetaStatus, FRAME_DELIMITER};
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingMemory {
        saves: Mutex<Vec<(ContextInput, ContextOutput)>>,
        fail: bool,
    }

    #[async_trait]
    impl ConversationMemory for RecordingMemory {
        async fn load_memory_variables(&self) -> Result<MemoryVariables> {
            Ok(MemoryVariables::default())
        }

        async fn save_context(&self, input: &ContextInput, output: &ContextOutput) -> Result<()> {
            if self.fail {
                anyhow::bail!("memory write failed");
            }
            self.saves
                .lock()
                .unwrap()
                .push((input.clone(), output.clone()));
            Ok(())
        }
    }

    enum Behavior {
        Tokens(Vec<&'static str>),
        FailToOpen(&'static str),
        FailAfter(Vec<&'static str>, &'static str),
    }

    struct FakeChain(Behavior);

    #[async_trait]
    impl TokenChain for FakeChain {
        async fn stream(&self, _input: ChainInput) -> Result<TokenStream> {
            let items: Vec<Result<String>> = match &self.0 {
                Behavior::Tokens(tokens) => tokens.iter().map(|t| Ok(t.to_string())).collect(),
                Behavior::FailToOpen(msg) => anyhow::bail!("{}", msg),
                Behavior::FailAfter(tokens, msg) => {
                    let mut items: Vec<Result<String>> =
                        tokens.iter().map(|t| Ok(t.to_string())).collect();
                    items.push(Err(anyhow::anyhow!("{}", msg)));
                    items
                }
            };
            Ok(stream::iter(items).boxed())
        }
    }

    fn options(behavior: Behavior, memory: Arc<RecordingMemory>) -> ChatStreamOptions {
        ChatStreamOptions {
            question: "Hello world?".into(),
            context_text: "ctx".into(),
            latest_message: ChatMessage::user("1", "hi"),
            chain: Arc::new(FakeChain(behavior)),
            memory,
        }
    }

    async fn collect(options: ChatStreamOptions) -> String {
        let frames: Vec<Bytes> = create_chat_event_stream(options)
            .map(|f| f.unwrap())
            .collect()
            .await;
        frames
            .iter()
            .map(|f| std::str::from_utf8(f).unwrap().to_string())
            .collect()
    }

    fn assert_send<T: Send>(_: &T) {}

    #[test]
    fn test_event_stream_is_send() {
        let memory = Arc::new(RecordingMemory::default());
        let stream = create_chat_event_stream(options(Behavior::Tokens(vec!["a"]), memory));
        assert_send(&stream);
    }

    fn events(output: &str) -> Vec<SseEvent> {
        output
            .split(FRAME_DELIMITER)
            .filter_map(decode_frame)
            .collect()
    }

    #[tokio::test]
    async fn test_started_tokens_done_in_order() {
        let memory = Arc::new(RecordingMemory::default());
        let output = collect(options(Behavior::Tokens(vec!["Hello", " World"]), memory)).await;
        assert_eq!(
            events(&output),
            vec![
                SseEvent::started(),
                SseEvent::Token("Hello".into()),
                SseEvent::Token(" World".into()),
                SseEvent::done(),
            ]
        );
    }

    #[tokio::test]
    async fn test_empty_sequence_still_starts_and_finishes() {
        let memory = Arc::new(RecordingMemory::default());
        let output = collect(options(Behavior::Tokens(vec![]), memory.clone())).await;
        assert_eq!(events(&output), vec![SseEvent::started(), SseEvent::done()]);
        let saves = memory.saves.lock().unwrap();
        assert_eq!(saves.len(), 1);
        assert_eq!(saves[0].1.output, "");
    }

    #[tokio::test]
    async fn test_saves_aggregate_once_with_latest_message() {
        let memory = Arc::new(RecordingMemory::default());
        collect(options(Behavior::Tokens(vec!["A", "B"]), memory.clone())).await;
        let saves = memory.saves.lock().unwrap();
        assert_eq!(saves.len(), 1);
        assert_eq!(saves[0].0.question, "hi");
        assert_eq!(saves[0].1.output, "AB");
    }

    #[tokio::test]
    async fn test_empty_tokens_skipped_spaces_kept() {
        let memory = Arc::new(RecordingMemory::default());
        let output = collect(options(Behavior::Tokens(vec!["", " ", "X"]), memory.clone())).await;

        let token_frames: Vec<&str> = output
            .split(FRAME_DELIMITER)
            .filter(|f| f.starts_with("event: token"))
            .collect();
        assert_eq!(token_frames, vec!["event: token\ndata:  ", "event: token\ndata: X"]);
        assert_eq!(memory.saves.lock().unwrap()[0].1.output, " X");
    }

    #[tokio::test]
    async fn test_chain_open_failure_emits_single_error() {
        let memory = Arc::new(RecordingMemory::default());
        let output = collect(options(Behavior::FailToOpen("boom"), memory.clone())).await;
        assert_eq!(
            events(&output),
            vec![SseEvent::started(), SseEvent::error("boom")]
        );
        assert!(memory.saves.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_mid_stream_failure_keeps_emitted_tokens() {
        let memory = Arc::new(RecordingMemory::default());
        let output = collect(options(
            Behavior::FailAfter(vec!["partial"], "upstream reset"),
            memory.clone(),
        ))
        .await;
        assert_eq!(
            events(&output),
            vec![
                SseEvent::started(),
                SseEvent::Token("partial".into()),
                SseEvent::error("upstream reset"),
            ]
        );
        assert!(memory.saves.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_memory_failure_replaces_done_with_error() {
        let memory = Arc::new(RecordingMemory {
            fail: true,
            ..Default::default()
        });
        let output = collect(options(Behavior::Tokens(vec!["x"]), memory)).await;
        let evts = events(&output);
        assert_eq!(evts.last(), Some(&SseEvent::error("memory write failed")));
        assert!(!evts
            .iter()
            .any(|e| matches!(e, SseEvent::Meta(m) if m.status == MetaStatus::Done)));
    }

    #[tokio::test]
    async fn test_blank_error_message_falls_back() {
        let memory = Arc::new(RecordingMemory::default());
        let output = collect(options(Behavior::FailToOpen(""), memory)).await;
        assert_eq!(events(&output).last(), Some(&SseEvent::error("Stream error")));
    }

    #[tokio::test]
    async fn test_dropping_stream_early_skips_save() {
        let memory = Arc::new(RecordingMemory::default());
        let mut stream = Box::pin(create_chat_event_stream(options(
            Behavior::Tokens(vec!["a", "b", "c"]),
            memory.clone(),
        )));
        // started + first token, then the client goes away.
        stream.next().await;
        stream.next().await;
        drop(stream);
        assert!(memory.saves.lock().unwrap().is_empty());
    }
}
