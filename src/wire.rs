//! Line-oriented stream framing between the relay and its clients.
//!
//! Every part is a single line of the form `CODE:JSON`:
//!
//! | code | meaning                                       |
//! |------|-----------------------------------------------|
//! | `f`  | start of the assistant message (`messageId`)  |
//! | `0`  | one text fragment (a JSON string)             |
//! | `3`  | error marker, terminal                        |
//! | `d`  | end marker with a `finishReason`, terminal    |
//!
//! Unknown codes are skipped so that newer relays can add parts without
//! breaking older clients.

use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{Error, ErrorKind, Result};

/// Why a stream finished normally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FinishReason {
    /// The model finished its reply.
    Stop,
    /// The model hit its output limit.
    Length,
    /// The provider withheld content.
    ContentFilter,
    /// Anything else.
    #[serde(other)]
    Other,
}

impl FinishReason {
    fn as_str(&self) -> &'static str {
        match self {
            FinishReason::Stop => "stop",
            FinishReason::Length => "length",
            FinishReason::ContentFilter => "content-filter",
            FinishReason::Other => "other",
        }
    }
}

/// Classification carried by an error marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureCode {
    /// The model backend failed.
    Provider,
    /// The relay's execution ceiling was exceeded.
    Timeout,
    /// The relay could not reach the backend.
    Transport,
}

impl FailureCode {
    fn as_str(&self) -> &'static str {
        match self {
            FailureCode::Provider => "provider",
            FailureCode::Timeout => "timeout",
            FailureCode::Transport => "transport",
        }
    }
}

/// Payload of an error marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamFailure {
    /// What went wrong.
    pub code: FailureCode,
    /// Human-readable detail.
    pub message: String,
}

impl StreamFailure {
    /// Describes an error for the wire.
    pub fn from_error(err: &Error) -> Self {
        let code = match err.kind() {
            ErrorKind::Timeout => FailureCode::Timeout,
            ErrorKind::Transport => FailureCode::Transport,
            _ => FailureCode::Provider,
        };
        Self {
            code,
            message: err.message().to_string(),
        }
    }

    /// Converts the marker back into an error on the receiving side.
    pub fn into_error(self) -> Error {
        match self.code {
            FailureCode::Provider => Error::provider(self.message, None),
            FailureCode::Timeout => Error::timeout(self.message, None),
            FailureCode::Transport => Error::transport(self.message, None),
        }
    }
}

/// One framed part of a relay response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamPart {
    /// The relay accepted the request and the assistant message begins.
    Start {
        /// Identifier the relay assigned to the reply.
        message_id: String,
    },
    /// One incremental text fragment.
    Text(String),
    /// The stream failed. Nothing follows.
    Error(StreamFailure),
    /// The stream completed. Nothing follows.
    Finish(FinishReason),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartPayload {
    message_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FinishPayload {
    finish_reason: FinishReason,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ErrorPayload {
    Structured(StreamFailure),
    Bare(String),
}

impl StreamPart {
    /// True for the end and error markers.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamPart::Error(_) | StreamPart::Finish(_))
    }

    /// Encodes the part as one newline-terminated line.
    pub fn encode(&self) -> String {
        let (code, payload) = match self {
            StreamPart::Start { message_id } => ('f', json!({ "messageId": message_id })),
            StreamPart::Text(text) => ('0', json!(text)),
            StreamPart::Error(failure) => (
                '3',
                json!({ "code": failure.code.as_str(), "message": failure.message }),
            ),
            StreamPart::Finish(reason) => ('d', json!({ "finishReason": reason.as_str() })),
        };
        format!("{code}:{payload}\n")
    }

    /// Decodes one line. Returns `Ok(None)` for part codes this client does
    /// not understand.
    pub fn decode_line(line: &str) -> Result<Option<Self>> {
        let Some((code, payload)) = line.split_once(':') else {
            return Err(Error::serialization(
                format!("Malformed stream part: missing ':' in '{line}'"),
                None,
            ));
        };
        let part = match code {
            "f" => {
                let start: StartPayload = serde_json::from_str(payload)?;
                StreamPart::Start {
                    message_id: start.message_id,
                }
            }
            "0" => StreamPart::Text(serde_json::from_str(payload)?),
            "3" => match serde_json::from_str::<ErrorPayload>(payload)? {
                ErrorPayload::Structured(failure) => StreamPart::Error(failure),
                ErrorPayload::Bare(message) => StreamPart::Error(StreamFailure {
                    code: FailureCode::Provider,
                    message,
                }),
            },
            "d" => {
                let finish: FinishPayload = serde_json::from_str(payload)?;
                StreamPart::Finish(finish.finish_reason)
            }
            _ => return Ok(None),
        };
        Ok(Some(part))
    }
}

struct DecodeState<S> {
    stream: S,
    buffer: Vec<u8>,
    eof: bool,
    done: bool,
}

/// Decodes a relay response body into stream parts.
///
/// The stream ends after the first terminal part. A body that ends without
/// one yields a final transport error. A body that is not UTF-8 yields an
/// encoding error.
///
/// ```
/// use bytes::Bytes;
/// use futures::StreamExt;
/// use relaychat::wire::{StreamPart, decode_stream};
///
/// # tokio_test::block_on(async {
/// let body = futures::stream::iter(vec![
///     Ok::<_, relaychat::Error>(Bytes::from("f:{\"messageId\":\"m1\"}\n0:\"Hel")),
///     Ok(Bytes::from("lo\"\nd:{\"finishReason\":\"stop\"}\n")),
/// ]);
/// let parts: Vec<_> = decode_stream(body).collect().await;
/// assert_eq!(parts.len(), 3);
/// assert_eq!(parts[1].as_ref().unwrap(), &StreamPart::Text("Hello".to_string()));
/// # });
/// ```
pub fn decode_stream<S>(byte_stream: S) -> impl Stream<Item = Result<StreamPart>>
where
    S: Stream<Item = Result<Bytes>> + Unpin,
{
    let state = DecodeState {
        stream: byte_stream,
        buffer: Vec::new(),
        eof: false,
        done: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if state.done {
                return None;
            }

            // First check if we have a complete line in the buffer
            if let Some(line) = take_line(&mut state.buffer) {
                let line = match std::str::from_utf8(&line) {
                    Ok(line) => line.trim_end_matches('\r'),
                    Err(e) => {
                        state.done = true;
                        return Some((
                            Err(Error::encoding(
                                format!("Invalid UTF-8 in stream: {e}"),
                                Some(Box::new(e)),
                            )),
                            state,
                        ));
                    }
                };
                if line.is_empty() {
                    continue;
                }
                match StreamPart::decode_line(line) {
                    Ok(Some(part)) => {
                        state.done = part.is_terminal();
                        return Some((Ok(part), state));
                    }
                    Ok(None) => continue,
                    Err(e) => {
                        state.done = true;
                        return Some((Err(e), state));
                    }
                }
            }

            if state.eof {
                state.done = true;
                return Some((
                    Err(Error::transport(
                        "stream ended without an end marker",
                        None,
                    )),
                    state,
                ));
            }

            // Read more data
            match state.stream.next().await {
                Some(Ok(bytes)) => state.buffer.extend_from_slice(&bytes),
                Some(Err(e)) => {
                    state.done = true;
                    return Some((Err(e), state));
                }
                None => {
                    state.eof = true;
                    if !state.buffer.is_empty() {
                        state.buffer.push(b'\n');
                    }
                }
            }
        }
    })
}

fn take_line(buffer: &mut Vec<u8>) -> Option<Vec<u8>> {
    let pos = buffer.iter().position(|b| *b == b'\n')?;
    let mut line: Vec<u8> = buffer.drain(..=pos).collect();
    line.pop();
    Some(line)
}
