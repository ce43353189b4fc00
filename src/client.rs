//! Chat client: posts the conversation to `/api/chat` and integrates the
//! streamed answer into the conversation.
//!
//! Used by `docchat chat` and `docchat ask`, and usable as a library against
//! any server speaking the same SSE protocol.

use std::io::Write;

use thiserror::Error;
use tracing::warn;

use crate::frame_reader::FrameReader;
use crate::integrator::{finalize_buffer, process_sse_stream, StreamObserver};
use crate::models::ChatMessage;

/// First assistant message of every conversation.
pub const GREETING: &str =
    "Hello! I am an AI assistant. You can now ask me questions about your document.";

/// Assistant content shown when a submission fails in transport.
pub const FAILED_RESPONSE: &str = "Error retrieving response.";

#[derive(Debug, Error)]
pub enum ClientError {
    /// The server answered with a non-success status.
    #[error("Network error")]
    Network,
    #[error("Network error: {0}")]
    Transport(#[from] reqwest::Error),
}

/// New user message: id is one past the conversation length, content is
/// trimmed.
pub fn build_user_message(existing: &[ChatMessage], input: &str) -> ChatMessage {
    ChatMessage::user((existing.len() + 1).to_string(), input.trim())
}

/// Append an empty assistant message to be filled while streaming.
pub fn append_assistant_placeholder(existing: &mut Vec<ChatMessage>, assistant_id: &str) {
    existing.push(ChatMessage::assistant(assistant_id, ""));
}

/// POST the conversation and return the response whose body is the SSE
/// stream.
pub async fn fetch_chat_stream(
    http: &reqwest::Client,
    api_url: &str,
    messages: &[ChatMessage],
) -> Result<reqwest::Response, ClientError> {
    let resp = http
        .post(format!("{}/api/chat", api_url.trim_end_matches('/')))
        .json(&serde_json::json!({ "messages": messages }))
        .send()
        .await?;

    if !resp.status().is_success() {
        return Err(ClientError::Network);
    }
    Ok(resp)
}

/// Keeps the assistant placeholder in sync with the stream and forwards
/// every notification.
struct SessionObserver<'a> {
    message: &'a mut ChatMessage,
    inner: &'a mut dyn StreamObserver,
}

impl StreamObserver for SessionObserver<'_> {
    fn on_token(&mut self, text: &str) {
        self.message.content = text.to_string();
        self.inner.on_token(text);
    }

    fn on_error(&mut self) {
        self.inner.on_error();
    }

    fn on_done(&mut self, final_text: &str) {
        self.message.content = final_text.to_string();
        self.inner.on_done(final_text);
    }
}

/// An ordered conversation with a chat server.
///
/// `submit` borrows the session mutably, so one session never has more than
/// one request in flight.
pub struct ChatSession {
    http: reqwest::Client,
    api_url: String,
    messages: Vec<ChatMessage>,
}

impl ChatSession {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), api_url)
    }

    pub fn with_client(http: reqwest::Client, api_url: impl Into<String>) -> Self {
        Self {
            http,
            api_url: api_url.into(),
            messages: vec![ChatMessage::assistant("1", GREETING)],
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Send `input` and stream the answer into the conversation.
    ///
    /// Returns `None` for blank input (nothing is sent), otherwise the final
    /// assistant content. Transport failures are not returned as errors: they
    /// are logged and the assistant message reads [`FAILED_RESPONSE`].
    pub async fn submit(
        &mut self,
        input: &str,
        observer: &mut dyn StreamObserver,
    ) -> Option<String> {
        if input.trim().is_empty() {
            return None;
        }

        let user = build_user_message(&self.messages, input);
        self.messages.push(user);
        let history = self.messages.clone();

        let assistant_id = (history.len() + 1).to_string();
        append_assistant_placeholder(&mut self.messages, &assistant_id);
        let assistant = self.messages.last_mut()?;

        let mut session_observer = SessionObserver {
            message: assistant,
            inner: observer,
        };
        let outcome = stream_reply(&self.http, &self.api_url, &history, &mut session_observer).await;

        assistant_content(&mut self.messages, outcome)
    }
}

async fn stream_reply(
    http: &reqwest::Client,
    api_url: &str,
    history: &[ChatMessage],
    observer: &mut dyn StreamObserver,
) -> Result<String, ClientError> {
    let resp = fetch_chat_stream(http, api_url, history).await?;
    let mut reader = FrameReader::new(resp.bytes_stream());
    let full_text = process_sse_stream(&mut reader, observer).await?;
    Ok(finalize_buffer(reader.remainder(), full_text))
}

fn assistant_content(
    messages: &mut [ChatMessage],
    outcome: Result<String, ClientError>,
) -> Option<String> {
    let assistant = messages.last_mut()?;
    assistant.content = match outcome {
        Ok(text) => text,
        Err(e) => {
            warn!(error = %e, "Streaming chat error");
            FAILED_RESPONSE.to_string()
        }
    };
    Some(assistant.content.clone())
}

/// Prints answer text to stdout as it arrives.
#[derive(Debug, Default)]
pub struct PrintObserver {
    printed: usize,
}

impl StreamObserver for PrintObserver {
    fn on_token(&mut self, text: &str) {
        // `text` is the whole answer so far; print only the new suffix.
        if let Some(delta) = text.get(self.printed..) {
            print!("{}", delta);
            let _ = std::io::stdout().flush();
        }
        self.printed = text.len();
    }

    fn on_error(&mut self) {
        println!("\n[Error]");
    }

    fn on_done(&mut self, _final_text: &str) {
        println!();
        self.printed = 0;
    }
}
