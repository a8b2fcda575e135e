//! Model backends the relay forwards conversations to.
//!
//! A [`Provider`] takes the whole conversation and returns a lazy stream of
//! text fragments. It holds no per-conversation state; dropping the stream
//! abandons the underlying generation.

use std::pin::Pin;

use futures::Stream;

use crate::error::Result;
use crate::types::ChatMessage;

mod content;
mod gemini;
mod scripted;

pub use content::{AttachmentResolver, ContentPart, ResolvedMessage};
pub use gemini::{API_KEY_ENV, DEFAULT_MODEL, Gemini};
pub use scripted::{Probe, ScriptedProvider, Step};

/// Text fragments in the order the model produced them.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// A generative model backend.
#[async_trait::async_trait]
pub trait Provider: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Starts generating a reply to `messages`.
    ///
    /// Failing here means no fragment was produced. Failures after the first
    /// fragment are reported as an `Err` item on the stream.
    async fn stream(&self, messages: Vec<ChatMessage>) -> Result<FragmentStream>;
}
