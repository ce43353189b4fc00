//! Chat request parsing and validation.
//!
//! Turns the raw `POST /api/chat` body into a [`ParsedRequest`]. Validation
//! happens before any retrieval or model work starts, so a rejected request
//! never acquires downstream resources.

use axum::http::StatusCode;
use serde_json::Value;
use thiserror::Error;

use crate::models::{ChatMessage, Role};

/// Client-caused request failure. Every variant maps to HTTP 400 with the
/// display string as the plain-text body.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("Invalid JSON")]
    InvalidJson,
    #[error("Missing messages")]
    MissingMessages,
    #[error("Empty question")]
    EmptyQuestion,
}

impl RequestError {
    pub fn status(&self) -> StatusCode {
        StatusCode::BAD_REQUEST
    }
}

/// A validated chat request.
#[derive(Debug, Clone)]
pub struct ParsedRequest {
    pub messages: Vec<ChatMessage>,
    pub latest_message: ChatMessage,
    /// Tag-stripped, trimmed content of the latest message. Never empty.
    pub question: String,
}

/// Parse and validate a chat request body.
///
/// The last element of `messages` is the latest message; its content is
/// sanitized with [`strip_tags`] and trimmed to form the question.
pub fn read_chat_request(body: &[u8]) -> Result<ParsedRequest, RequestError> {
    let body: Value = serde_json::from_slice(body).map_err(|_| RequestError::InvalidJson)?;

    let messages: Vec<ChatMessage> = match body.get("messages") {
        Some(Value::Array(items)) if !items.is_empty() => {
            items.iter().map(message_from_value).collect()
        }
        _ => return Err(RequestError::MissingMessages),
    };

    let latest_message = messages
        .last()
        .cloned()
        .ok_or(RequestError::MissingMessages)?;

    let question = strip_tags(&latest_message.content).trim().to_string();
    if question.is_empty() {
        return Err(RequestError::EmptyQuestion);
    }

    Ok(ParsedRequest {
        messages,
        latest_message,
        question,
    })
}

/// Read one history element without rejecting it.
///
/// Only the latest message's content is validated, so a missing id, an
/// unknown role, or a non-object element degrades to defaults: empty id,
/// `user` role, empty content.
fn message_from_value(value: &Value) -> ChatMessage {
    let id = match value.get("id") {
        Some(Value::String(id)) => id.clone(),
        Some(Value::Number(id)) => id.to_string(),
        _ => String::new(),
    };
    let role = match value.get("role").and_then(Value::as_str) {
        Some("assistant") => Role::Assistant,
        Some("system") => Role::System,
        _ => Role::User,
    };
    let content = value
        .get("content")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    ChatMessage { id, role, content }
}

/// Best-effort removal of markup tags.
///
/// Drops every `<...>` run, and an unterminated `<` swallows the rest of the
/// input. Not an HTML sanitizer; it only keeps simple tags out of prompts.
pub fn strip_tags(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut in_tag = false;
    for c in input.chars() {
        match (in_tag, c) {
            (false, '<') => in_tag = true,
            (false, _) => out.push(c),
            (true, '>') => in_tag = false,
            (true, _) => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_valid_request() {
        let body = br#"{"messages":[
            {"id":"1","role":"assistant","content":"hi"},
            {"id":"2","role":"user","content":"  hello world  "}
        ]}"#;
        let parsed = read_chat_request(body).unwrap();
        assert_eq!(parsed.question, "hello world");
        assert_eq!(parsed.latest_message.id, "2");
        assert_eq!(parsed.latest_message.role, Role::User);
        assert_eq!(parsed.messages.len(), 2);
    }

    #[test]
    fn test_invalid_json() {
        let err = read_chat_request(b"{not json").unwrap_err();
        assert_eq!(err, RequestError::InvalidJson);
        assert_eq!(err.to_string(), "Invalid JSON");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_missing_messages_property() {
        assert_eq!(
            read_chat_request(b"{}").unwrap_err(),
            RequestError::MissingMessages
        );
        assert_eq!(
            read_chat_request(b"null").unwrap_err(),
            RequestError::MissingMessages
        );
        assert_eq!(
            read_chat_request(br#"{"messages":"nope"}"#).unwrap_err(),
            RequestError::MissingMessages
        );
    }

    #[test]
    fn test_empty_messages_array() {
        let err = read_chat_request(br#"{"messages":[]}"#).unwrap_err();
        assert_eq!(err.to_string(), "Missing messages");
    }

    #[test]
    fn test_whitespace_question_is_empty() {
        let body = br#"{"messages":[{"id":"1","role":"user","content":"   "}]}"#;
        assert_eq!(
            read_chat_request(body).unwrap_err(),
            RequestError::EmptyQuestion
        );
    }

    #[test]
    fn test_tag_only_question_is_empty() {
        let body = br#"{"messages":[{"id":"1","role":"user","content":" <b></b> <br/> "}]}"#;
        assert_eq!(
            read_chat_request(body).unwrap_err(),
            RequestError::EmptyQuestion
        );
    }

    #[test]
    fn test_missing_content_is_empty_question() {
        let body = br#"{"messages":[{"id":"1","role":"user"}]}"#;
        assert_eq!(
            read_chat_request(body).unwrap_err(),
            RequestError::EmptyQuestion
        );
    }

    #[test]
    fn test_message_without_id_is_accepted() {
        let body = br#"{"messages":[{"role":"user","content":"hi"}]}"#;
        let parsed = read_chat_request(body).unwrap();
        assert_eq!(parsed.question, "hi");
        assert_eq!(parsed.latest_message.id, "");
    }

    #[test]
    fn test_other_roles_in_history_are_accepted() {
        let body = br#"{"messages":[
            {"id":"1","role":"system","content":"be brief"},
            {"id":2,"role":"tool"},
            {"id":"3","role":"user","content":"what now?"}
        ]}"#;
        let parsed = read_chat_request(body).unwrap();
        assert_eq!(parsed.messages.len(), 3);
        assert_eq!(parsed.messages[0].role, Role::System);
        assert_eq!(parsed.messages[1].id, "2");
        assert_eq!(parsed.messages[1].role, Role::User);
        assert_eq!(parsed.question, "what now?");
    }

    #[test]
    fn test_null_latest_message_is_empty_question() {
        assert_eq!(
            read_chat_request(br#"{"messages":[null]}"#).unwrap_err(),
            RequestError::EmptyQuestion
        );
        assert_eq!(
            read_chat_request(br#"{"messages":[{"content":42}]}"#).unwrap_err(),
            RequestError::EmptyQuestion
        );
    }

    #[test]
    fn test_question_is_tag_stripped() {
        let body = br#"{"messages":[{"id":"1","role":"user","content":"<i>What</i> is <b>this</b>?"}]}"#;
        let parsed = read_chat_request(body).unwrap();
        assert_eq!(parsed.question, "What is this?");
        // The latest message keeps its raw content.
        assert_eq!(parsed.latest_message.content, "<i>What</i> is <b>this</b>?");
    }

    #[test]
    fn test_strip_tags() {
        assert_eq!(strip_tags("a <b>bold</b> move"), "a bold move");
        assert_eq!(strip_tags("no tags"), "no tags");
        assert_eq!(strip_tags("1 < 2"), "1 ");
        assert_eq!(strip_tags("x > y"), "x > y");
    }
}
