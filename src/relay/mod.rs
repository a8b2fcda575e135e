//! The streaming relay.
//!
//! A [`Relay`] forwards a whole conversation to a [`Provider`] and turns the
//! provider's fragments into wire parts. It keeps no state between requests.
//! Every stream starts with a [`StreamPart::Start`] and ends with exactly one
//! [`StreamPart::Finish`] or [`StreamPart::Error`], and is cut off with a
//! timeout error once the execution ceiling passes.

mod config;
mod server;

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, Stream, StreamExt};
use tokio::time::{Instant, timeout_at};

use crate::client::{PartStream, Transport};
use crate::error::{Error, Result};
use crate::observability::{
    RELAY_ABANDONED, RELAY_COMPLETED, RELAY_DURATION, RELAY_FAILED, RELAY_FRAGMENTS,
    RELAY_REJECTED, RELAY_REQUESTS, RELAY_TIMEOUTS, RELAY_TTFB,
};
use crate::provider::{FragmentStream, Provider};
use crate::types::{ChatMessage, ChatRequest, MessageId};
use crate::wire::{FinishReason, StreamFailure, StreamPart};

pub use config::{DEFAULT_BIND, RelayArgs, RelayConfig};
pub use server::{CHAT_PATH, router, serve};

/// Default execution ceiling for one stream.
pub const DEFAULT_MAX_DURATION: Duration = Duration::from_secs(30);

/// Longest ceiling a relay accepts. Longer settings are clamped to it.
pub const MAX_CEILING: Duration = Duration::from_secs(24 * 60 * 60);

/// The parts of one relayed reply.
pub type RelayStream = Pin<Box<dyn Stream<Item = StreamPart> + Send>>;

/// Forwards conversations to a provider.
#[derive(Clone)]
pub struct Relay {
    provider: Arc<dyn Provider>,
    max_duration: Duration,
}

impl Relay {
    /// Creates a relay with the default ceiling.
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self {
            provider,
            max_duration: DEFAULT_MAX_DURATION,
        }
    }

    /// Sets the execution ceiling.
    pub fn with_max_duration(mut self, max_duration: Duration) -> Self {
        self.max_duration = max_duration.min(MAX_CEILING);
        self
    }

    /// The execution ceiling.
    pub fn max_duration(&self) -> Duration {
        self.max_duration
    }

    /// Name of the provider replies come from.
    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Drops messages with neither text nor attachments and rejects a
    /// conversation with nothing left to answer.
    pub fn prepare(&self, request: ChatRequest) -> Result<Vec<ChatMessage>> {
        let messages: Vec<ChatMessage> = request
            .messages
            .into_iter()
            .filter(|m| !m.is_empty())
            .collect();
        if messages.is_empty() {
            RELAY_REJECTED.click();
            return Err(Error::validation(
                "conversation contains no message with text or attachments",
                Some("messages".to_string()),
            ));
        }
        Ok(messages)
    }

    /// Starts relaying a reply.
    ///
    /// Nothing is sent to the provider until the returned stream is polled.
    /// Dropping the stream drops the provider request.
    pub fn stream(&self, request: ChatRequest) -> Result<RelayStream> {
        let messages = self.prepare(request)?;
        RELAY_REQUESTS.click();
        let started = Instant::now();
        let state = RelayState {
            provider: Arc::clone(&self.provider),
            max_duration: self.max_duration,
            started,
            deadline: started
                .checked_add(self.max_duration)
                .unwrap_or_else(|| started + MAX_CEILING),
            phase: Phase::Start(messages),
            seen_fragment: false,
            guard: AbandonGuard { finished: false },
        };
        Ok(Box::pin(stream::unfold(state, |mut state| async move {
            loop {
                match std::mem::replace(&mut state.phase, Phase::Done) {
                    Phase::Start(messages) => {
                        let message_id = MessageId::generate();
                        tracing::info!(
                            provider = state.provider.name(),
                            messages = messages.len(),
                            message_id = %message_id,
                            "relaying conversation"
                        );
                        state.phase = Phase::Opening(messages);
                        let part = StreamPart::Start {
                            message_id: message_id.to_string(),
                        };
                        return Some((part, state));
                    }
                    Phase::Opening(messages) => {
                        let opened =
                            timeout_at(state.deadline, state.provider.stream(messages)).await;
                        match opened {
                            Ok(Ok(fragments)) => state.phase = Phase::Streaming(fragments),
                            Ok(Err(err)) => return Some((state.fail(err), state)),
                            Err(_) => {
                                let err = state.ceiling_exceeded();
                                return Some((state.fail(err), state));
                            }
                        }
                    }
                    Phase::Streaming(mut fragments) => {
                        match timeout_at(state.deadline, fragments.next()).await {
                            Ok(Some(Ok(text))) => {
                                state.phase = Phase::Streaming(fragments);
                                if text.is_empty() {
                                    continue;
                                }
                                state.record_fragment();
                                return Some((StreamPart::Text(text), state));
                            }
                            Ok(Some(Err(err))) => return Some((state.fail(err), state)),
                            Ok(None) => return Some((state.finish(), state)),
                            Err(_) => {
                                drop(fragments);
                                let err = state.ceiling_exceeded();
                                return Some((state.fail(err), state));
                            }
                        }
                    }
                    Phase::Done => return None,
                }
            }
        })))
    }
}

impl std::fmt::Debug for Relay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relay")
            .field("provider", &self.provider.name())
            .field("max_duration", &self.max_duration)
            .finish()
    }
}

#[async_trait::async_trait]
impl Transport for Relay {
    async fn open(&self, request: ChatRequest) -> Result<PartStream> {
        let parts = self.stream(request)?;
        Ok(Box::pin(parts.map(Ok)))
    }
}

enum Phase {
    Start(Vec<ChatMessage>),
    Opening(Vec<ChatMessage>),
    Streaming(FragmentStream),
    Done,
}

struct RelayState {
    provider: Arc<dyn Provider>,
    max_duration: Duration,
    started: Instant,
    deadline: Instant,
    phase: Phase,
    seen_fragment: bool,
    guard: AbandonGuard,
}

impl RelayState {
    fn record_fragment(&mut self) {
        RELAY_FRAGMENTS.click();
        if !self.seen_fragment {
            self.seen_fragment = true;
            RELAY_TTFB.add(self.started.elapsed().as_secs_f64());
        }
    }

    fn ceiling_exceeded(&self) -> Error {
        let secs = self.max_duration.as_secs_f64();
        Error::timeout(format!("execution ceiling of {secs}s exceeded"), Some(secs))
    }

    fn fail(&mut self, err: Error) -> StreamPart {
        self.phase = Phase::Done;
        self.guard.finished = true;
        RELAY_DURATION.add(self.started.elapsed().as_secs_f64());
        if err.is_timeout() {
            RELAY_TIMEOUTS.click();
        } else {
            RELAY_FAILED.click();
        }
        tracing::warn!(error = %err, kind = %err.kind(), "relay stream failed");
        StreamPart::Error(StreamFailure::from_error(&err))
    }

    fn finish(&mut self) -> StreamPart {
        self.phase = Phase::Done;
        self.guard.finished = true;
        RELAY_COMPLETED.click();
        RELAY_DURATION.add(self.started.elapsed().as_secs_f64());
        tracing::debug!(elapsed = ?self.started.elapsed(), "relay stream finished");
        StreamPart::Finish(FinishReason::Stop)
    }
}

/// Notices a reply dropped before its terminal part.
struct AbandonGuard {
    finished: bool,
}

impl Drop for AbandonGuard {
    fn drop(&mut self) {
        if !self.finished {
            RELAY_ABANDONED.click();
            tracing::info!("relay stream abandoned by its consumer");
        }
    }
}
