use crate::attachment::{PreviewJob, PreviewTicket, SelectedFile};
use crate::error::{Error, Result};
use crate::observability::{
    SESSION_CANCELLED, SESSION_COMPLETED, SESSION_FAILED, SESSION_PREVIEWS, SESSION_REJECTED,
    SESSION_STALE_EVENTS, SESSION_SUBMITS,
};
use crate::session::state::{SessionState, Status, StreamId};
use crate::types::{ChatRequest, Message, MessageId};

/// Everything that can happen to a session.
#[derive(Debug)]
pub enum Event {
    /// The user changed the draft text.
    EditText(String),
    /// The user picked a file.
    SelectFile(SelectedFile),
    /// A preview derivation finished.
    PreviewReady {
        /// Ticket the derivation was started with.
        ticket: PreviewTicket,
        /// The `data:` URL, or why it could not be derived.
        result: Result<String>,
    },
    /// The user removed the draft attachment.
    ClearAttachment,
    /// The user sent the draft.
    Submit,
    /// A fragment of the reply arrived.
    Fragment {
        /// Stream the fragment belongs to.
        stream: StreamId,
        /// Text to append.
        text: String,
    },
    /// The reply ended normally.
    Complete {
        /// Stream that ended.
        stream: StreamId,
    },
    /// The reply ended with an error.
    Failed {
        /// Stream that failed.
        stream: StreamId,
        /// What went wrong.
        error: Error,
    },
    /// The user stopped the reply.
    Cancel,
    /// The user started over.
    Reset,
}

/// How a reply ended.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// The relay sent its end marker.
    Completed,
    /// The user cancelled.
    Cancelled,
    /// The stream failed. The session is usable again.
    Failed(Error),
}

impl Outcome {
    /// True for [`Outcome::Completed`].
    pub fn is_completed(&self) -> bool {
        matches!(self, Outcome::Completed)
    }
}

/// What the reducer asks of its runtime and its observer.
#[derive(Debug)]
pub enum Effect {
    /// Derive a preview and report it with [`Event::PreviewReady`].
    DerivePreview(PreviewJob),
    /// Abandon a preview derivation.
    CancelPreview(PreviewTicket),
    /// Open a stream for `request` and report with events tagged `stream`.
    OpenStream {
        /// Tag for the stream's events.
        stream: StreamId,
        /// The conversation to send.
        request: ChatRequest,
    },
    /// Stop a stream. The relay sees its response body dropped.
    CancelStream(StreamId),
    /// A submission was refused. No state changed.
    Reject(Error),
    /// Text was appended to the pending assistant message.
    Fragment {
        /// The assistant message.
        message: MessageId,
        /// The appended text.
        text: String,
    },
    /// The draft attachment's preview became available.
    PreviewReady(PreviewTicket),
    /// The assistant message was finalized.
    Finished {
        /// The assistant message.
        message: MessageId,
        /// How the reply ended.
        outcome: Outcome,
    },
}

/// Applies `event` to `state` and returns the effects it calls for.
pub fn reduce(state: &mut SessionState, event: Event) -> Vec<Effect> {
    match event {
        Event::EditText(text) => {
            state.draft_text = text;
            Vec::new()
        }
        Event::SelectFile(file) => {
            let selection = state.pipeline.select(file);
            let mut effects = Vec::new();
            if let Some(ticket) = selection.cancelled {
                effects.push(Effect::CancelPreview(ticket));
            }
            if let Some(job) = selection.job {
                effects.push(Effect::DerivePreview(job));
            }
            effects
        }
        Event::PreviewReady { ticket, result } => {
            let ready = result.is_ok();
            if !state.pipeline.complete(ticket, result) {
                SESSION_STALE_EVENTS.click();
                tracing::debug!(?ticket, "ignoring stale preview");
                return Vec::new();
            }
            if ready {
                SESSION_PREVIEWS.click();
                vec![Effect::PreviewReady(ticket)]
            } else {
                Vec::new()
            }
        }
        Event::ClearAttachment => state
            .pipeline
            .clear()
            .map(Effect::CancelPreview)
            .into_iter()
            .collect(),
        Event::Submit => submit(state),
        Event::Fragment { stream, text } => {
            if !is_active(state, stream) {
                return Vec::new();
            }
            if text.is_empty() {
                return Vec::new();
            }
            let Some(message) = state.pending_message_mut() else {
                return Vec::new();
            };
            if !message.push_fragment(&text) {
                return Vec::new();
            }
            vec![Effect::Fragment {
                message: message.id().clone(),
                text,
            }]
        }
        Event::Complete { stream } => {
            if !is_active(state, stream) {
                return Vec::new();
            }
            SESSION_COMPLETED.click();
            finish(state, Outcome::Completed).into_iter().collect()
        }
        Event::Failed { stream, error } => {
            if !is_active(state, stream) {
                return Vec::new();
            }
            SESSION_FAILED.click();
            tracing::warn!(%stream, error = %error, "reply failed");
            state.last_error = Some(error.clone());
            finish(state, Outcome::Failed(error)).into_iter().collect()
        }
        Event::Cancel => {
            let Some(stream) = state.active_stream else {
                return Vec::new();
            };
            SESSION_CANCELLED.click();
            tracing::debug!(%stream, "reply cancelled");
            let mut effects = vec![Effect::CancelStream(stream)];
            effects.extend(finish(state, Outcome::Cancelled));
            effects
        }
        Event::Reset => {
            let mut effects = Vec::new();
            if let Some(stream) = state.active_stream.take() {
                effects.push(Effect::CancelStream(stream));
            }
            if let Some(ticket) = state.pipeline.clear() {
                effects.push(Effect::CancelPreview(ticket));
            }
            state.messages.clear();
            state.draft_text.clear();
            state.status = Status::Idle;
            state.last_error = None;
            effects
        }
    }
}

fn submit(state: &mut SessionState) -> Vec<Effect> {
    if state.status == Status::Streaming {
        SESSION_REJECTED.click();
        return vec![Effect::Reject(Error::validation(
            "a reply is still streaming",
            None,
        ))];
    }
    if state.draft_text.trim().is_empty() && state.pipeline.draft().is_none() {
        SESSION_REJECTED.click();
        return vec![Effect::Reject(Error::validation(
            "nothing to send: type a message or attach a file",
            Some("draft".to_string()),
        ))];
    }

    SESSION_SUBMITS.click();
    let mut effects = Vec::new();
    let attachments = match state.pipeline.take() {
        Some(draft) => {
            if let Some(ticket) = draft.pending_ticket() {
                effects.push(Effect::CancelPreview(ticket));
            }
            vec![draft.into_attachment()]
        }
        None => Vec::new(),
    };
    let text = std::mem::take(&mut state.draft_text);
    state.messages.push(Message::user(text, attachments));

    let request = ChatRequest::new(
        state
            .messages
            .iter()
            .map(Message::to_chat_message)
            .collect(),
    );
    state.messages.push(Message::pending_assistant());

    let stream = state.allocate_stream();
    state.status = Status::Streaming;
    state.active_stream = Some(stream);
    state.last_error = None;
    tracing::debug!(%stream, messages = request.messages.len(), "submitting conversation");
    effects.push(Effect::OpenStream { stream, request });
    effects
}

fn is_active(state: &SessionState, stream: StreamId) -> bool {
    if state.active_stream == Some(stream) {
        return true;
    }
    SESSION_STALE_EVENTS.click();
    tracing::debug!(%stream, "ignoring event for inactive stream");
    false
}

/// Finalizes the pending assistant message and returns to idle.
fn finish(state: &mut SessionState, outcome: Outcome) -> Option<Effect> {
    state.status = Status::Idle;
    state.active_stream = None;
    let message = state.pending_message_mut()?;
    message.finalize();
    Some(Effect::Finished {
        message: message.id().clone(),
        outcome,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attachment::Preview;
    use crate::types::{MessageRole, MessageState};

    fn open_stream(effects: &[Effect]) -> (StreamId, &ChatRequest) {
        effects
            .iter()
            .find_map(|e| match e {
                Effect::OpenStream { stream, request } => Some((*stream, request)),
                _ => None,
            })
            .expect("an OpenStream effect")
    }

    fn submit_text(state: &mut SessionState, text: &str) -> StreamId {
        reduce(state, Event::EditText(text.to_string()));
        let effects = reduce(state, Event::Submit);
        open_stream(&effects).0
    }

    fn png(name: &str) -> SelectedFile {
        SelectedFile::new(name, None, vec![1, 2, 3])
    }

    #[test]
    fn submit_opens_a_stream_with_the_whole_log() {
        let mut state = SessionState::new();
        reduce(&mut state, Event::EditText("hello".to_string()));
        let effects = reduce(&mut state, Event::Submit);
        let (stream, request) = open_stream(&effects);

        assert_eq!(state.status(), Status::Streaming);
        assert_eq!(state.active_stream(), Some(stream));
        assert_eq!(state.draft_text(), "");
        assert_eq!(state.messages().len(), 2);
        assert_eq!(state.messages()[0].role(), MessageRole::User);
        assert_eq!(state.messages()[0].content(), "hello");
        assert!(state.messages()[1].is_pending());
        assert_eq!(request.messages.len(), 1);
        assert_eq!(request.messages[0].content, "hello");
    }

    #[test]
    fn empty_submissions_are_rejected() {
        let mut state = SessionState::new();
        reduce(&mut state, Event::EditText("   ".to_string()));
        let effects = reduce(&mut state, Event::Submit);
        assert!(matches!(&effects[..], [Effect::Reject(err)] if err.is_validation()));
        assert_eq!(state.status(), Status::Idle);
        assert!(state.messages().is_empty());
        assert_eq!(state.draft_text(), "   ");
    }

    #[test]
    fn attachment_alone_is_enough() {
        let mut state = SessionState::new();
        reduce(&mut state, Event::SelectFile(SelectedFile::new("notes.pdf", None, vec![7])));
        let effects = reduce(&mut state, Event::Submit);
        let (_, request) = open_stream(&effects);
        assert_eq!(request.messages[0].content, "");
        assert_eq!(request.messages[0].attachments.len(), 1);
        assert_eq!(request.messages[0].attachments[0].mime_type, "application/pdf");
        assert!(state.draft_attachment().is_none());
        assert_eq!(state.messages()[0].attachments().len(), 1);
    }

    #[test]
    fn submit_while_streaming_changes_nothing() {
        let mut state = SessionState::new();
        let stream = submit_text(&mut state, "first");
        reduce(&mut state, Event::EditText("second".to_string()));
        let effects = reduce(&mut state, Event::Submit);
        assert!(matches!(&effects[..], [Effect::Reject(err)] if err.is_validation()));
        assert_eq!(state.messages().len(), 2);
        assert_eq!(state.draft_text(), "second");
        assert_eq!(state.active_stream(), Some(stream));
    }

    #[test]
    fn fragments_accumulate_in_order() {
        let mut state = SessionState::new();
        let stream = submit_text(&mut state, "hi");
        for text in ["He", "llo", "!"] {
            let effects = reduce(&mut state, Event::Fragment { stream, text: text.to_string() });
            assert!(matches!(&effects[..], [Effect::Fragment { .. }]));
        }
        let effects = reduce(&mut state, Event::Complete { stream });
        assert!(matches!(
            &effects[..],
            [Effect::Finished { outcome: Outcome::Completed, .. }]
        ));
        assert_eq!(state.status(), Status::Idle);
        assert_eq!(state.messages()[1].content(), "Hello!");
        assert_eq!(state.messages()[1].state(), MessageState::Final);
        assert!(state.pending_message().is_none());
    }

    #[test]
    fn failure_keeps_partial_content() {
        let mut state = SessionState::new();
        let stream = submit_text(&mut state, "hi");
        reduce(&mut state, Event::Fragment { stream, text: "par".to_string() });
        let effects = reduce(
            &mut state,
            Event::Failed { stream, error: Error::provider("overloaded", Some(503)) },
        );
        assert!(matches!(
            &effects[..],
            [Effect::Finished { outcome: Outcome::Failed(err), .. }] if err.is_provider()
        ));
        assert_eq!(state.status(), Status::Idle);
        assert_eq!(state.messages()[1].content(), "par");
        assert!(!state.messages()[1].is_pending());
        assert!(state.last_error().unwrap().is_provider());

        submit_text(&mut state, "again");
        assert!(state.last_error().is_none());
        assert_eq!(state.messages().len(), 4);
    }

    #[test]
    fn cancel_finalizes_once() {
        let mut state = SessionState::new();
        let stream = submit_text(&mut state, "hi");
        reduce(&mut state, Event::Fragment { stream, text: "a".to_string() });
        let effects = reduce(&mut state, Event::Cancel);
        assert!(matches!(effects[0], Effect::CancelStream(s) if s == stream));
        assert!(matches!(
            effects[1],
            Effect::Finished { outcome: Outcome::Cancelled, .. }
        ));

        // Late events from the cancelled stream are dropped.
        assert!(reduce(&mut state, Event::Fragment { stream, text: "b".to_string() }).is_empty());
        assert!(reduce(&mut state, Event::Complete { stream }).is_empty());
        assert!(reduce(&mut state, Event::Cancel).is_empty());
        assert_eq!(state.messages()[1].content(), "a");
        assert_eq!(state.status(), Status::Idle);
    }

    #[test]
    fn events_for_an_old_stream_do_not_touch_a_new_one() {
        let mut state = SessionState::new();
        let old = submit_text(&mut state, "one");
        reduce(&mut state, Event::Cancel);
        let new = submit_text(&mut state, "two");
        assert_ne!(old, new);

        reduce(&mut state, Event::Fragment { stream: old, text: "stale".to_string() });
        reduce(
            &mut state,
            Event::Failed { stream: old, error: Error::timeout("late", None) },
        );
        assert_eq!(state.status(), Status::Streaming);
        assert_eq!(state.messages()[3].content(), "");
        assert!(state.last_error().is_none());
    }

    #[test]
    fn cancelled_placeholder_is_sent_back_empty() {
        let mut state = SessionState::new();
        submit_text(&mut state, "one");
        reduce(&mut state, Event::Cancel);
        reduce(&mut state, Event::EditText("two".to_string()));
        let effects = reduce(&mut state, Event::Submit);
        let (_, request) = open_stream(&effects);
        let roles: Vec<MessageRole> = request.messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![MessageRole::User, MessageRole::Assistant, MessageRole::User]
        );
        assert!(request.messages[1].is_empty());
    }

    #[test]
    fn newer_selection_wins_over_stale_preview() {
        let mut state = SessionState::new();
        let first = match &reduce(&mut state, Event::SelectFile(png("a.png")))[..] {
            [Effect::DerivePreview(job)] => job.ticket(),
            other => panic!("unexpected effects: {other:?}"),
        };
        let effects = reduce(&mut state, Event::SelectFile(png("b.png")));
        assert!(matches!(effects[0], Effect::CancelPreview(t) if t == first));
        let second = match &effects[1] {
            Effect::DerivePreview(job) => job.ticket(),
            other => panic!("unexpected effect: {other:?}"),
        };

        let effects = reduce(
            &mut state,
            Event::PreviewReady { ticket: first, result: Ok("data:image/png;base64,old".to_string()) },
        );
        assert!(effects.is_empty());
        let draft = state.draft_attachment().unwrap();
        assert_eq!(draft.attachment().name(), "b.png");
        assert_eq!(draft.preview(), &Preview::Pending(second));

        let effects = reduce(
            &mut state,
            Event::PreviewReady { ticket: second, result: Ok("data:image/png;base64,new".to_string()) },
        );
        assert!(matches!(effects[..], [Effect::PreviewReady(t)] if t == second));
        assert_eq!(
            state.draft_attachment().unwrap().preview_url(),
            Some("data:image/png;base64,new")
        );
    }

    #[test]
    fn clear_attachment_is_idempotent() {
        let mut state = SessionState::new();
        reduce(&mut state, Event::SelectFile(png("a.png")));
        assert_eq!(reduce(&mut state, Event::ClearAttachment).len(), 1);
        assert!(reduce(&mut state, Event::ClearAttachment).is_empty());
        assert!(state.draft_attachment().is_none());
    }

    #[test]
    fn submitting_before_the_preview_is_ready() {
        let mut state = SessionState::new();
        reduce(&mut state, Event::SelectFile(png("a.png")));
        let effects = reduce(&mut state, Event::Submit);
        assert!(matches!(effects[0], Effect::CancelPreview(_)));
        let (_, request) = open_stream(&effects);
        assert_eq!(request.messages[0].attachments[0].url, "data:image/png;base64,AQID");
    }

    #[test]
    fn reset_clears_everything() {
        let mut state = SessionState::new();
        let stream = submit_text(&mut state, "hi");
        reduce(&mut state, Event::EditText("draft".to_string()));
        reduce(&mut state, Event::SelectFile(png("a.png")));
        let effects = reduce(&mut state, Event::Reset);
        assert!(matches!(effects[0], Effect::CancelStream(s) if s == stream));
        assert!(matches!(effects[1], Effect::CancelPreview(_)));
        assert!(state.messages().is_empty());
        assert_eq!(state.draft_text(), "");
        assert!(state.draft_attachment().is_none());
        assert_eq!(state.status(), Status::Idle);
        assert!(reduce(&mut state, Event::Complete { stream }).is_empty());
    }
}
