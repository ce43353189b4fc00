//! Folds the events of one chat response into the assistant's answer.

use bytes::Bytes;
use futures::stream::Stream;

use crate::frame_reader::FrameReader;
use crate::sse::{MetaStatus, SseEvent};

/// Appended to the answer when the server reports an in-band error.
pub const ERROR_MARKER: &str = "\n[Error]\n";

/// Receives progress while a response is integrated. All methods default to
/// doing nothing.
pub trait StreamObserver {
    /// Called after every token with the full answer so far.
    fn on_token(&mut self, _text: &str) {}

    /// Called for each `error` event.
    fn on_error(&mut self) {}

    /// Called when the server signals `done`, with the full answer.
    fn on_done(&mut self, _final_text: &str) {}
}

/// Observer that ignores every notification.
impl StreamObserver for () {}

/// Append `chunk` to `current`, report the new text, and return it.
pub fn integrate_chunk_event(
    chunk: &str,
    mut current: String,
    update: impl FnOnce(&str),
) -> String {
    current.push_str(chunk);
    update(&current);
    current
}

/// Append any unconsumed trailing frame text to the answer.
pub fn finalize_buffer(remainder: &str, mut current: String) -> String {
    current.push_str(remainder);
    current
}

/// Drive `reader` to the end of the stream and return the aggregated answer.
///
/// A stream that ends without `done` still returns what was accumulated.
/// The reader's remainder is left for the caller's finalize step.
pub async fn process_sse_stream<S, E>(
    reader: &mut FrameReader<S>,
    observer: &mut dyn StreamObserver,
) -> Result<String, E>
where
    S: Stream<Item = Result<Bytes, E>>,
{
    let mut full_text = String::new();

    while let Some(event) = reader.next_event().await? {
        match event {
            SseEvent::Token(chunk) => {
                full_text = integrate_chunk_event(&chunk, full_text, |t| observer.on_token(t));
            }
            SseEvent::Error(_) => {
                full_text.push_str(ERROR_MARKER);
                observer.on_error();
            }
            SseEvent::Meta(meta) if meta.status == MetaStatus::Done => {
                observer.on_done(&full_text);
            }
            SseEvent::Meta(_) => {}
        }
    }

    Ok(full_text)
}
