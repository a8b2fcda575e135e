use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::stream;

use crate::error::{Error, Result};
use crate::provider::{FragmentStream, Provider};
use crate::types::{ChatMessage, MessageRole};

/// One step of a scripted reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Emit a fragment.
    Fragment(String),
    /// Wait before the next step.
    Delay(Duration),
    /// Fail the stream with a provider error.
    Fail(String),
    /// Never produce anything again.
    Stall,
}

#[derive(Debug, Clone)]
enum Mode {
    Script(Vec<Step>),
    Echo { delay: Duration },
}

/// Counters describing what happened to the streams a provider handed out.
#[derive(Debug, Clone, Default)]
pub struct Probe {
    opened: Arc<AtomicUsize>,
    completed: Arc<AtomicUsize>,
    abandoned: Arc<AtomicUsize>,
}

impl Probe {
    /// Streams started.
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Streams that ran their script to the end.
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    /// Streams dropped by their consumer before the end.
    pub fn abandoned(&self) -> usize {
        self.abandoned.load(Ordering::SeqCst)
    }
}

struct StreamGuard {
    probe: Probe,
    finished: bool,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        if self.finished {
            self.probe.completed.fetch_add(1, Ordering::SeqCst);
        } else {
            self.probe.abandoned.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// A provider that replays a fixed script or echoes the last user message.
///
/// Used for offline runs of the relay and for tests.
#[derive(Debug, Clone)]
pub struct ScriptedProvider {
    mode: Mode,
    probe: Probe,
}

impl ScriptedProvider {
    /// A provider whose script is empty: it finishes immediately.
    pub fn new() -> Self {
        Self {
            mode: Mode::Script(Vec::new()),
            probe: Probe::default(),
        }
    }

    /// A provider that emits `fragments` in order.
    pub fn from_fragments<I, T>(fragments: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        fragments
            .into_iter()
            .fold(Self::new(), |provider, fragment| provider.fragment(fragment))
    }

    /// A provider that repeats the last user message back word by word,
    /// pausing `delay` between words.
    pub fn echo(delay: Duration) -> Self {
        Self {
            mode: Mode::Echo { delay },
            probe: Probe::default(),
        }
    }

    /// Appends a fragment to the script.
    pub fn fragment(self, text: impl Into<String>) -> Self {
        self.step(Step::Fragment(text.into()))
    }

    /// Appends a pause to the script.
    pub fn delay(self, duration: Duration) -> Self {
        self.step(Step::Delay(duration))
    }

    /// Appends a failure to the script.
    pub fn fail(self, message: impl Into<String>) -> Self {
        self.step(Step::Fail(message.into()))
    }

    /// Appends a stall to the script.
    pub fn stall(self) -> Self {
        self.step(Step::Stall)
    }

    /// Appends a step. Echo providers ignore scripted steps.
    pub fn step(mut self, step: Step) -> Self {
        if let Mode::Script(steps) = &mut self.mode {
            steps.push(step);
        }
        self
    }

    /// Shared counters for the streams this provider hands out.
    pub fn probe(&self) -> Probe {
        self.probe.clone()
    }

    fn steps_for(&self, messages: &[ChatMessage]) -> Vec<Step> {
        match &self.mode {
            Mode::Script(steps) => steps.clone(),
            Mode::Echo { delay } => {
                let last = messages.iter().rev().find(|m| m.role == MessageRole::User);
                let mut reply = match last {
                    Some(message) if !message.content.trim().is_empty() => {
                        format!("You said: {}", message.content.trim())
                    }
                    _ => "You sent no text.".to_string(),
                };
                if let Some(message) = last
                    && !message.attachments.is_empty()
                {
                    let names: Vec<&str> =
                        message.attachments.iter().map(|a| a.name.as_str()).collect();
                    reply.push_str(&format!(" Attached: {}.", names.join(", ")));
                }
                let mut steps = Vec::new();
                for word in reply.split_inclusive(' ') {
                    if !steps.is_empty() && !delay.is_zero() {
                        steps.push(Step::Delay(*delay));
                    }
                    steps.push(Step::Fragment(word.to_string()));
                }
                steps
            }
        }
    }
}

impl Default for ScriptedProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn stream(&self, messages: Vec<ChatMessage>) -> Result<FragmentStream> {
        self.probe.opened.fetch_add(1, Ordering::SeqCst);
        let guard = StreamGuard {
            probe: self.probe.clone(),
            finished: false,
        };
        let steps = self.steps_for(&messages).into_iter();

        let fragments = stream::unfold((steps, guard), |(mut steps, mut guard)| async move {
            loop {
                match steps.next() {
                    Some(Step::Fragment(text)) => return Some((Ok(text), (steps, guard))),
                    Some(Step::Delay(duration)) => tokio::time::sleep(duration).await,
                    Some(Step::Fail(message)) => {
                        guard.finished = true;
                        let steps = Vec::new().into_iter();
                        return Some((Err(Error::provider(message, None)), (steps, guard)));
                    }
                    Some(Step::Stall) => futures::future::pending::<()>().await,
                    None => {
                        guard.finished = true;
                        return None;
                    }
                }
            }
        });
        Ok(Box::pin(fragments))
    }
}
