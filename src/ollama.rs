//! Ollama chat model client.
//!
//! [`OllamaChatModel`] implements [`ChatModel`] against `POST /api/chat`.
//! Streaming responses are newline-delimited JSON; lines split across
//! network chunks are reassembled before decoding.

use anyhow::{bail, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;

use crate::chain::{ChatModel, ModelChunk, ModelStream};
use crate::config::OllamaConfig;
use crate::health::ServiceHealth;
use crate::models::PromptMessage;

#[derive(Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: &'a [PromptMessage],
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    #[serde(default)]
    message: Option<OllamaMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OllamaMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Chat model backed by a local Ollama instance.
pub struct OllamaChatModel {
    model: String,
    url: String,
    temperature: f32,
    client: reqwest::Client,
}

impl OllamaChatModel {
    pub fn new(config: &OllamaConfig) -> Result<Self> {
        if config.chat_model.is_empty() {
            bail!("ollama.chat_model required for chat");
        }
        Ok(Self {
            model: config.chat_model.clone(),
            url: config.base_url.trim_end_matches('/').to_string(),
            temperature: config.temperature,
            client: reqwest::Client::builder().build()?,
        })
    }

    async fn post_chat(&self, messages: &[PromptMessage], stream: bool) -> Result<reqwest::Response> {
        let request = OllamaChatRequest {
            model: &self.model,
            messages,
            stream,
            options: OllamaOptions {
                temperature: self.temperature,
            },
        };

        let response = self
            .client
            .post(format!("{}/api/chat", self.url))
            .json(&request)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Ollama request failed: {}", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            bail!("Ollama returned error {}: {}", status, error_text);
        }
        Ok(response)
    }
}

#[async_trait]
impl ChatModel for OllamaChatModel {
    async fn stream(&self, messages: Vec<PromptMessage>) -> Result<ModelStream> {
        let response = self.post_chat(&messages, true).await?;
        Ok(ndjson_chunks(response.bytes_stream()))
    }

    async fn complete(&self, messages: Vec<PromptMessage>) -> Result<String> {
        let response = self.post_chat(&messages, false).await?;
        let body: OllamaChatResponse = response
            .json()
            .await
            .map_err(|e| anyhow::anyhow!("Invalid Ollama response: {}", e))?;
        if let Some(err) = body.error {
            bail!("Ollama error: {}", err);
        }
        Ok(body.message.and_then(|m| m.content).unwrap_or_default())
    }
}

fn parse_line(line: &[u8]) -> Result<ModelChunk> {
    let resp: OllamaChatResponse = serde_json::from_slice(line)
        .map_err(|e| anyhow::anyhow!("Invalid Ollama stream line: {}", e))?;
    if let Some(err) = resp.error {
        bail!("Ollama error: {}", err);
    }
    Ok(ModelChunk {
        content: resp.message.and_then(|m| m.content),
        done: resp.done,
    })
}

struct NdjsonState<S> {
    body: Pin<Box<S>>,
    buffer: Vec<u8>,
    pending: VecDeque<Result<ModelChunk>>,
    exhausted: bool,
}

impl<S> NdjsonState<S> {
    fn drain_lines(&mut self) {
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            self.push_line(&line[..pos]);
        }
    }

    fn push_line(&mut self, line: &[u8]) {
        if line.iter().all(|b| b.is_ascii_whitespace()) {
            return;
        }
        self.pending.push_back(parse_line(line));
    }
}

/// Decode a newline-delimited JSON body into model chunks.
pub fn ndjson_chunks<S, E>(body: S) -> ModelStream
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    E: Into<anyhow::Error> + Send + 'static,
{
    let state = NdjsonState {
        body: Box::pin(body),
        buffer: Vec::new(),
        pending: VecDeque::new(),
        exhausted: false,
    };

    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(item) = st.pending.pop_front() {
                return Some((item, st));
            }
            if st.exhausted {
                return None;
            }
            match st.body.next().await {
                Some(Ok(bytes)) => {
                    st.buffer.extend_from_slice(&bytes);
                    st.drain_lines();
                }
                Some(Err(e)) => {
                    st.exhausted = true;
                    st.pending.push_back(Err(e.into()));
                }
                None => {
                    st.exhausted = true;
                    let rest = std::mem::take(&mut st.buffer);
                    st.push_line(&rest);
                }
            }
        }
    })
    .boxed()
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagModel>,
}

#[derive(Deserialize)]
struct TagModel {
    name: String,
}

/// Probe `GET {base_url}/api/tags`.
pub async fn ollama_health(config: &OllamaConfig) -> ServiceHealth {
    let mut builder = reqwest::Client::builder();
    if config.timeout_secs > 0 {
        builder = builder.timeout(Duration::from_secs(config.timeout_secs));
    }
    let Ok(client) = builder.build() else {
        return ServiceHealth::error("Ollama is not reachable");
    };

    let url = format!("{}/api/tags", config.base_url.trim_end_matches('/'));
    match client.get(url).send().await {
        Ok(resp) if resp.status().is_success() => match resp.json::<TagsResponse>().await {
            Ok(tags) => ServiceHealth {
                models: Some(tags.models.into_iter().map(|m| m.name).collect()),
                ..ServiceHealth::ok()
            },
            Err(_) => ServiceHealth::ok(),
        },
        Ok(_) => ServiceHealth::error("Ollama is not responding"),
        Err(_) => ServiceHealth::error("Ollama is not reachable"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(parts: &[&str]) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Unpin {
        let items: Vec<Result<Bytes, std::io::Error>> = parts
            .iter()
            .map(|p| Ok(Bytes::from(p.to_string())))
            .collect();
        stream::iter(items)
    }

    #[tokio::test]
    async fn test_lines_split_across_chunks() {
        let parts = [
            "{\"message\":{\"role\":\"assistant\",\"content\":\"Hel",
            "lo\"},\"done\":false}\n{\"message\":{\"content\":\" wor",
            "ld\"},\"done\":false}\n{\"message\":{\"content\":\"\"},\"done\":true}\n",
        ];
        let chunks: Vec<ModelChunk> = ndjson_chunks(body(&parts))
            .map(|c| c.unwrap())
            .collect()
            .await;
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].content.as_deref(), Some("Hello"));
        assert_eq!(chunks[1].content.as_deref(), Some(" world"));
        assert!(chunks[2].done);
    }

    #[tokio::test]
    async fn test_trailing_line_without_newline() {
        let parts = ["{\"message\":{\"content\":\"x\"},\"done\":true}"];
        let chunks: Vec<_> = ndjson_chunks(body(&parts)).collect().await;
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].as_ref().unwrap().content.as_deref(), Some("x"));
    }

    #[tokio::test]
    async fn test_error_line_fails() {
        let parts = ["{\"error\":\"model not found\"}\n"];
        let chunks: Vec<_> = ndjson_chunks(body(&parts)).collect().await;
        assert_eq!(chunks.len(), 1);
        let err = chunks[0].as_ref().unwrap_err().to_string();
        assert!(err.contains("model not found"));
    }

    #[tokio::test]
    async fn test_body_error_ends_stream() {
        let items: Vec<Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from("{\"message\":{\"content\":\"a\"},\"done\":false}\n")),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
            Ok(Bytes::from("{\"message\":{\"content\":\"b\"},\"done\":false}\n")),
        ];
        let chunks: Vec<_> = ndjson_chunks(stream::iter(items)).collect().await;
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].is_ok());
        assert!(chunks[1].is_err());
    }
}
