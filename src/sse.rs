//! Server-Sent Events (SSE) processing for streaming responses.
//!
//! Both vendor styles stream their completions as SSE.  This module turns the raw
//! byte stream of an HTTP response into a stream of [`SseEvent`]s; each vendor
//! adapter decides what the `data` payload means.

use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};

use crate::{Error, Result};

/// One dispatched server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// The `event:` field, if the server sent one.
    pub event: Option<String>,

    /// All `data:` lines of the event joined by newlines.
    pub data: String,
}

/// Process a stream of bytes into a stream of server-sent events.
///
/// Events may be split across any number of network chunks, including in the
/// middle of a multi-byte character.  Comment lines and events without data are
/// skipped.  Errors from `byte_stream` pass through unchanged.
pub fn process_sse<S>(byte_stream: S) -> impl Stream<Item = Result<SseEvent>> + Send
where
    S: Stream<Item = Result<Bytes>> + Send + Unpin + 'static,
{
    let buffer = String::new();
    let pending: Vec<u8> = Vec::new();

    stream::unfold(
        (byte_stream, buffer, pending),
        move |(mut stream, mut buffer, mut pending)| async move {
            loop {
                if let Some((event, remaining)) = extract_event(&buffer) {
                    buffer = remaining;
                    match event {
                        Some(event) => return Some((Ok(event), (stream, buffer, pending))),
                        None => continue,
                    }
                }

                match stream.next().await {
                    Some(Ok(bytes)) => {
                        pending.extend_from_slice(&bytes);
                        match decode_prefix(&mut pending) {
                            Ok(text) => push_normalized(&mut buffer, &text),
                            Err(e) => return Some((Err(e), (stream, buffer, pending))),
                        }
                    }
                    Some(Err(e)) => {
                        return Some((Err(e), (stream, buffer, pending)));
                    }
                    None => {
                        // A final event may lack its terminating blank line.
                        if !buffer.trim().is_empty() {
                            let event = parse_event(&buffer);
                            buffer.clear();
                            if let Some(event) = event {
                                return Some((Ok(event), (stream, buffer, pending)));
                            }
                        }
                        return None;
                    }
                }
            }
        },
    )
}

/// Decodes the longest valid UTF-8 prefix, leaving an incomplete trailing
/// character in `pending` for the next chunk.
fn decode_prefix(pending: &mut Vec<u8>) -> Result<String> {
    match std::str::from_utf8(pending) {
        Ok(text) => {
            let text = text.to_string();
            pending.clear();
            Ok(text)
        }
        Err(e) if e.error_len().is_none() => {
            let valid = e.valid_up_to();
            let rest = pending.split_off(valid);
            let text = String::from_utf8_lossy(pending).into_owned();
            *pending = rest;
            Ok(text)
        }
        Err(e) => {
            pending.clear();
            Err(Error::encoding(
                format!("Invalid UTF-8 in stream: {e}"),
                Some(Box::new(e)),
            ))
        }
    }
}

fn push_normalized(buffer: &mut String, text: &str) {
    buffer.push_str(text);
    if buffer.contains('\r') {
        *buffer = buffer.replace("\r\n", "\n");
    }
}

/// Extract one complete SSE event block from a buffer string.
///
/// Returns `None` when no blank-line terminator has arrived yet; the inner option
/// is `None` for blocks that carry nothing to dispatch.
fn extract_event(buffer: &str) -> Option<(Option<SseEvent>, String)> {
    let (event_text, rest) = buffer.split_once("\n\n")?;
    Some((parse_event(event_text), rest.to_string()))
}

fn parse_event(event_text: &str) -> Option<SseEvent> {
    let mut event = None;
    let mut data: Vec<&str> = Vec::new();
    for line in event_text.lines() {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => event = Some(value.to_string()),
            "data" => data.push(value),
            _ => {}
        }
    }
    if data.is_empty() {
        return None;
    }
    Some(SseEvent {
        event,
        data: data.join("\n"),
    })
}
