//! Server-Sent Events wire format for the chat stream.
//!
//! # Frames
//!
//! ```text
//! event: <type>\n
//! data: <payload>\n
//! \n
//! ```
//!
//! | Event | Payload |
//! |-------|---------|
//! | `meta` | `{"status":"started"}` or `{"status":"done"}` |
//! | `token` | raw token text, no JSON envelope |
//! | `error` | `{"status":"error","message":"<text>"}` |
//!
//! Token text is sent verbatim so leading and trailing whitespace survive.
//! A token containing newlines is written as one `data:` line per text line;
//! readers join `data:` lines with `\n`, which restores the original text.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

pub const EVENT_META: &str = "meta";
pub const EVENT_TOKEN: &str = "token";
pub const EVENT_ERROR: &str = "error";

/// Frame delimiter: the blank line ending every frame.
pub const FRAME_DELIMITER: &str = "\n\n";

/// Fallback message when an error event carries no usable payload.
pub const UNKNOWN_ERROR: &str = "Unknown error";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetaStatus {
    Started,
    Done,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaPayload {
    pub status: MetaStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    #[serde(default = "error_status")]
    pub status: String,
    #[serde(default)]
    pub message: String,
}

fn error_status() -> String {
    "error".to_string()
}

impl ErrorPayload {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: error_status(),
            message: message.into(),
        }
    }
}

/// A structured chat stream event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    Token(String),
    Error(ErrorPayload),
    Meta(MetaPayload),
}

impl SseEvent {
    pub fn started() -> Self {
        SseEvent::Meta(MetaPayload {
            status: MetaStatus::Started,
        })
    }

    pub fn done() -> Self {
        SseEvent::Meta(MetaPayload {
            status: MetaStatus::Done,
        })
    }

    pub fn error(message: impl Into<String>) -> Self {
        SseEvent::Error(ErrorPayload::new(message))
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            SseEvent::Token(_) => EVENT_TOKEN,
            SseEvent::Error(_) => EVENT_ERROR,
            SseEvent::Meta(_) => EVENT_META,
        }
    }

    /// Encode as one wire frame.
    pub fn to_frame(&self) -> Bytes {
        let data = match self {
            SseEvent::Token(text) => text.clone(),
            // Serializing these plain structs cannot fail.
            SseEvent::Error(payload) => serde_json::to_string(payload).unwrap_or_default(),
            SseEvent::Meta(payload) => serde_json::to_string(payload).unwrap_or_default(),
        };
        encode_frame(self.event_type(), &data)
    }
}

/// Build `event: <event>\n` plus one `data: ` line per line of `data`,
/// terminated by a blank line.
pub fn encode_frame(event: &str, data: &str) -> Bytes {
    let mut frame = String::with_capacity(event.len() + data.len() + 16);
    frame.push_str("event: ");
    frame.push_str(event);
    frame.push('\n');
    for line in data.split('\n') {
        frame.push_str("data: ");
        frame.push_str(line);
        frame.push('\n');
    }
    frame.push('\n');
    Bytes::from(frame)
}

/// The fields of a frame before payload decoding.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawFrame {
    pub event_type: Option<String>,
    pub data: String,
}

/// Split a frame into its event type and joined data payload.
///
/// `event:` sets the type (trimmed; the last one wins). Each `data:` line
/// loses at most one leading space and the lines are joined with `\n`.
/// Other lines are ignored.
pub fn parse_frame(raw: &str) -> RawFrame {
    let mut event_type = None;
    let mut data_lines: Vec<&str> = Vec::new();

    for line in raw.split('\n') {
        if let Some(rest) = line.strip_prefix("event:") {
            event_type = Some(rest.trim().to_string());
        } else if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.strip_prefix(' ').unwrap_or(rest));
        }
    }

    RawFrame {
        event_type,
        data: data_lines.join("\n"),
    }
}

/// Decode a raw frame into an event.
///
/// - empty payload → no event
/// - `token` → payload verbatim
/// - `error` → JSON payload, or an [`UNKNOWN_ERROR`] fallback when it does not decode
/// - `meta` → JSON payload; a payload that does not decode is dropped
/// - any other type → no event
pub fn decode_frame(raw: &str) -> Option<SseEvent> {
    let RawFrame { event_type, data } = parse_frame(raw);
    if data.is_empty() {
        return None;
    }

    match event_type.as_deref() {
        Some(EVENT_TOKEN) => Some(SseEvent::Token(data)),
        Some(EVENT_ERROR) => Some(SseEvent::Error(
            serde_json::from_str(&data).unwrap_or_else(|_| ErrorPayload::new(UNKNOWN_ERROR)),
        )),
        Some(EVENT_META) => serde_json::from_str(&data).ok().map(SseEvent::Meta),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames_match_wire_format() {
        assert_eq!(
            SseEvent::started().to_frame(),
            Bytes::from("event: meta\ndata: {\"status\":\"started\"}\n\n")
        );
        assert_eq!(
            SseEvent::done().to_frame(),
            Bytes::from("event: meta\ndata: {\"status\":\"done\"}\n\n")
        );
        assert_eq!(
            SseEvent::Token(" ".into()).to_frame(),
            Bytes::from("event: token\ndata:  \n\n")
        );
        assert_eq!(
            SseEvent::error("boom").to_frame(),
            Bytes::from("event: error\ndata: {\"status\":\"error\",\"message\":\"boom\"}\n\n")
        );
    }

    #[test]
    fn test_multiline_token_restores_text() {
        for text in ["a\nb", "\n", "para one\n\npara two", "trailing\n"] {
            let frame = SseEvent::Token(text.to_string()).to_frame();
            let frame = std::str::from_utf8(&frame).unwrap();
            // Exactly one frame delimiter, at the end.
            assert_eq!(frame.matches(FRAME_DELIMITER).count(), 1, "{:?}", frame);
            let raw = frame.trim_end_matches('\n');
            assert_eq!(decode_frame(raw), Some(SseEvent::Token(text.to_string())));
        }
    }

    #[test]
    fn test_parse_frame_strips_one_space() {
        let f = parse_frame("event:  token \ndata:   x");
        assert_eq!(f.event_type.as_deref(), Some("token"));
        assert_eq!(f.data, "  x");

        let f = parse_frame("event: token\ndata:x");
        assert_eq!(f.data, "x");
    }

    #[test]
    fn test_malformed_error_payload_falls_back() {
        assert_eq!(
            decode_frame("event: error\ndata: {notjson}"),
            Some(SseEvent::Error(ErrorPayload {
                status: "error".into(),
                message: "Unknown error".into(),
            }))
        );
    }

    #[test]
    fn test_malformed_meta_payload_is_dropped() {
        assert_eq!(decode_frame("event: meta\ndata: {notjson}"), None);
    }

    #[test]
    fn test_empty_payload_and_unknown_type_are_dropped() {
        assert_eq!(decode_frame("event: token\ndata: "), None);
        assert_eq!(decode_frame("event: token"), None);
        assert_eq!(decode_frame("event: ping\ndata: 1"), None);
        assert_eq!(decode_frame("data: orphan"), None);
    }

    #[test]
    fn test_unknown_meta_status_is_kept() {
        assert_eq!(
            decode_frame("event: meta\ndata: {\"status\":\"paused\"}"),
            Some(SseEvent::Meta(MetaPayload {
                status: MetaStatus::Other
            }))
        );
    }
}
