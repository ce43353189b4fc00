//! Client-side SSE frame reader.
//!
//! [`FrameReader`] consumes a chunked byte stream (typically
//! `reqwest::Response::bytes_stream()`) and yields decoded [`SseEvent`]s in
//! arrival order. Bytes are decoded to text incrementally, so a multi-byte
//! character split across chunks is held back until it is complete.
//!
//! Frames are separated by a blank line. After the source ends, whatever is
//! left in the buffer is parsed once more as a final frame if it contains
//! both an `event:` and a `data:` field. The buffer is *not* cleared by that
//! last parse; [`FrameReader::remainder`] still returns it so the caller can
//! fold it into its own finalize step.

use bytes::Bytes;
use futures::stream::{Stream, StreamExt};
use std::collections::VecDeque;
use std::pin::Pin;

use crate::sse::{decode_frame, SseEvent, FRAME_DELIMITER};

/// Incremental UTF-8 decoder.
///
/// An incomplete trailing sequence is held until the next chunk; invalid
/// bytes are replaced with U+FFFD.
#[derive(Debug, Default)]
struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);
        let mut out = String::new();

        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + len);
                        }
                        None => {
                            self.pending.drain(..valid);
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    /// Flush bytes still held at end of input.
    fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}

pub struct FrameReader<S> {
    source: Pin<Box<S>>,
    decoder: Utf8Decoder,
    buffer: String,
    ready: VecDeque<SseEvent>,
    exhausted: bool,
}

impl<S, E> FrameReader<S>
where
    S: Stream<Item = Result<Bytes, E>>,
{
    pub fn new(source: S) -> Self {
        Self {
            source: Box::pin(source),
            decoder: Utf8Decoder::default(),
            buffer: String::new(),
            ready: VecDeque::new(),
            exhausted: false,
        }
    }

    /// Next decoded event, `Ok(None)` when the source is finished.
    ///
    /// A source error is returned as-is; events already decoded from earlier
    /// chunks have been yielded by then.
    pub async fn next_event(&mut self) -> Result<Option<SseEvent>, E> {
        loop {
            if let Some(event) = self.ready.pop_front() {
                return Ok(Some(event));
            }
            if self.exhausted {
                return Ok(None);
            }

            match self.source.next().await {
                Some(Ok(chunk)) => {
                    let text = self.decoder.decode(&chunk);
                    self.buffer.push_str(&text);
                    self.drain_complete_frames();
                }
                Some(Err(e)) => return Err(e),
                None => {
                    self.exhausted = true;
                    let rest = self.decoder.finish();
                    self.buffer.push_str(&rest);
                    self.parse_trailing_frame();
                }
            }
        }
    }

    /// Text left after the last complete frame.
    pub fn remainder(&self) -> &str {
        &self.buffer
    }

    fn drain_complete_frames(&mut self) {
        while let Some(end) = self.buffer.find(FRAME_DELIMITER) {
            let raw: String = self.buffer.drain(..end + FRAME_DELIMITER.len()).collect();
            if let Some(event) = decode_frame(&raw[..end]) {
                self.ready.push_back(event);
            }
        }
    }

    fn parse_trailing_frame(&mut self) {
        if self.buffer.contains("event:") && self.buffer.contains("data:") {
            if let Some(event) = decode_frame(&self.buffer) {
                self.ready.push_back(event);
            }
        }
    }
}
