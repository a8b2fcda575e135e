//! Server-Sent Events (SSE) processing for provider responses.
//!
//! This module turns the raw byte stream of a provider's SSE response into
//! the `data:` payload of each event. Interpreting the payload is left to
//! the provider.

use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};

use crate::{Error, Result};

/// Process a stream of bytes into the data payloads of server-sent events.
///
/// Multi-line `data:` fields are joined with newlines, comment lines and
/// other fields are ignored, and events without data are skipped.
pub fn process_sse<S>(byte_stream: S) -> impl Stream<Item = Result<String>>
where
    S: Stream<Item = std::result::Result<Bytes, reqwest::Error>> + Unpin,
{
    // Convert reqwest errors to our error type
    let stream = byte_stream.map(|result| {
        result.map_err(|e| {
            if e.is_timeout() {
                Error::timeout(format!("Provider stream timed out: {e}"), None)
            } else {
                Error::transport(format!("Error in HTTP stream: {e}"), Some(Box::new(e)))
            }
        })
    });
    process_sse_results(stream)
}

/// Like [`process_sse`] for a byte stream whose errors are already mapped.
pub fn process_sse_results<S>(stream: S) -> impl Stream<Item = Result<String>>
where
    S: Stream<Item = Result<Bytes>> + Unpin,
{
    // Use a state machine to process the SSE stream
    let buffer = String::new();
    let pending: Vec<u8> = Vec::new();

    stream::unfold(
        (stream, buffer, pending, false),
        move |(mut stream, mut buffer, mut pending, mut eof)| async move {
            loop {
                // First check if we have a complete event in the buffer
                if let Some((data, remaining)) = extract_event(&buffer) {
                    buffer = remaining;
                    match data {
                        Some(data) => return Some((Ok(data), (stream, buffer, pending, eof))),
                        None => continue,
                    }
                }

                if eof {
                    return None;
                }

                // Read more data
                match stream.next().await {
                    Some(Ok(bytes)) => {
                        pending.extend_from_slice(&bytes);
                        // Only decode up to the last complete UTF-8 sequence.
                        let valid = match std::str::from_utf8(&pending) {
                            Ok(text) => text.len(),
                            Err(e) if e.error_len().is_none() => e.valid_up_to(),
                            Err(e) => {
                                return Some((
                                    Err(Error::encoding(
                                        format!("Invalid UTF-8 in stream: {e}"),
                                        Some(Box::new(e)),
                                    )),
                                    (stream, buffer, pending, true),
                                ));
                            }
                        };
                        let text: Vec<u8> = pending.drain(..valid).collect();
                        buffer.push_str(&String::from_utf8_lossy(&text).replace('\r', ""));
                    }
                    Some(Err(e)) => {
                        return Some((Err(e), (stream, buffer, pending, true)));
                    }
                    None => {
                        eof = true;
                        if !pending.is_empty() {
                            let err = Error::encoding(
                                format!(
                                    "Stream ended inside a UTF-8 sequence ({} bytes left)",
                                    pending.len()
                                ),
                                None,
                            );
                            pending.clear();
                            return Some((Err(err), (stream, buffer, pending, eof)));
                        }
                        // End of stream: flush a trailing event without its blank line
                        if !buffer.trim().is_empty() {
                            buffer.push_str("\n\n");
                        } else {
                            return None;
                        }
                    }
                }
            }
        },
    )
}

/// Extract a complete SSE event from a buffer string.
///
/// Returns the event's data (None for events that carry none) and the rest
/// of the buffer, or None if no complete event is buffered yet.
fn extract_event(buffer: &str) -> Option<(Option<String>, String)> {
    // Simple SSE parsing - each event is delimited by double newlines
    let (event_text, rest) = buffer.split_once("\n\n")?;

    let mut data: Option<String> = None;
    for line in event_text.lines() {
        if let Some(value) = line.strip_prefix("data:") {
            let value = value.strip_prefix(' ').unwrap_or(value);
            match data.as_mut() {
                Some(data) => {
                    data.push('\n');
                    data.push_str(value);
                }
                None => data = Some(value.to_string()),
            }
        }
    }

    Some((data, rest.to_string()))
}
