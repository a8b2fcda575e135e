use std::fmt;

use crate::attachment::{AttachmentPipeline, DraftAttachment, PreviewTicket};
use crate::error::Error;
use crate::types::Message;

/// Whether a reply is being streamed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Status {
    /// Ready for a submission.
    #[default]
    Idle,
    /// A reply is arriving; submissions are rejected.
    Streaming,
}

/// Identifies one opened stream. Events carry it so that anything arriving
/// for a stream that is no longer active can be dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(u64);

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stream-{}", self.0)
    }
}

/// Everything a chat session knows.
///
/// Only [`reduce`](super::reduce) changes it.
#[derive(Debug, Default)]
pub struct SessionState {
    pub(super) messages: Vec<Message>,
    pub(super) draft_text: String,
    pub(super) pipeline: AttachmentPipeline,
    pub(super) status: Status,
    pub(super) active_stream: Option<StreamId>,
    pub(super) last_error: Option<Error>,
    pub(super) next_stream: u64,
}

impl SessionState {
    /// An empty, idle session.
    pub fn new() -> Self {
        Self::default()
    }

    /// The message log in order.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Text typed but not yet submitted.
    pub fn draft_text(&self) -> &str {
        &self.draft_text
    }

    /// The attachment waiting to be submitted.
    pub fn draft_attachment(&self) -> Option<&DraftAttachment> {
        self.pipeline.draft()
    }

    /// Ticket of the preview derivation the draft waits for.
    pub fn pending_preview(&self) -> Option<PreviewTicket> {
        self.pipeline.pending_ticket()
    }

    /// Current status.
    pub fn status(&self) -> Status {
        self.status
    }

    /// True while a reply is streaming.
    pub fn is_streaming(&self) -> bool {
        self.status == Status::Streaming
    }

    /// The open stream, if any.
    pub fn active_stream(&self) -> Option<StreamId> {
        self.active_stream
    }

    /// The failure that ended the most recent stream, until the next
    /// accepted submission.
    pub fn last_error(&self) -> Option<&Error> {
        self.last_error.as_ref()
    }

    /// True if a submission would currently be accepted.
    pub fn can_submit(&self) -> bool {
        !self.is_streaming()
            && (!self.draft_text.trim().is_empty() || self.pipeline.draft().is_some())
    }

    /// The assistant message receiving fragments, if any.
    pub fn pending_message(&self) -> Option<&Message> {
        self.messages.last().filter(|m| m.is_pending())
    }

    pub(super) fn pending_message_mut(&mut self) -> Option<&mut Message> {
        self.messages.last_mut().filter(|m| m.is_pending())
    }

    pub(super) fn allocate_stream(&mut self) -> StreamId {
        self.next_stream += 1;
        StreamId(self.next_stream)
    }
}
