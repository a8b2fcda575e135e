use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::attachment::{PreviewJob, PreviewTicket, SelectedFile};
use crate::client::Transport;
use crate::error::{Error, Result};
use crate::session::reducer::{Effect, Event, Outcome, reduce};
use crate::session::state::{SessionState, StreamId};
use crate::types::{ChatRequest, MessageId};
use crate::wire::StreamPart;

/// Something a front end should show.
#[derive(Debug, Clone)]
pub enum Update {
    /// Text was appended to the reply.
    Fragment {
        /// The assistant message.
        message: MessageId,
        /// The appended text.
        text: String,
    },
    /// The draft attachment's preview is ready.
    PreviewReady(PreviewTicket),
    /// The reply is final.
    Finished {
        /// The assistant message.
        message: MessageId,
        /// How it ended.
        outcome: Outcome,
    },
}

struct PreviewTask {
    ticket: PreviewTicket,
    handle: JoinHandle<()>,
}

struct StreamTask {
    id: StreamId,
    cancel: CancellationToken,
}

/// Runs a [`SessionState`] against a [`Transport`].
///
/// All state changes happen on the caller's task. Preview derivation and the
/// reply stream run as spawned tasks that post [`Event`]s back over one
/// channel; [`next_update`](Self::next_update) applies them in arrival order.
pub struct ChatSession<T> {
    transport: Arc<T>,
    state: SessionState,
    events_tx: mpsc::UnboundedSender<Event>,
    events_rx: mpsc::UnboundedReceiver<Event>,
    preview: Option<PreviewTask>,
    stream: Option<StreamTask>,
    updates: VecDeque<Update>,
}

impl<T: Transport + 'static> ChatSession<T> {
    /// Creates an idle session.
    pub fn new(transport: T) -> Self {
        Self::with_transport(Arc::new(transport))
    }

    /// Creates an idle session sharing `transport`.
    pub fn with_transport(transport: Arc<T>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            transport,
            state: SessionState::new(),
            events_tx,
            events_rx,
            preview: None,
            stream: None,
            updates: VecDeque::new(),
        }
    }

    /// The session state.
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// The transport replies are fetched with.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// True while a preview or a reply is in flight.
    pub fn is_busy(&self) -> bool {
        self.preview.is_some() || self.stream.is_some()
    }

    /// Applies an event. Returns the updates it produced right away, or the
    /// reason a submission was refused.
    pub fn dispatch(&mut self, event: Event) -> Result<Vec<Update>> {
        let mut updates = Vec::new();
        let mut rejected = None;
        for effect in reduce(&mut self.state, event) {
            match effect {
                Effect::DerivePreview(job) => self.spawn_preview(job),
                Effect::CancelPreview(ticket) => self.cancel_preview(ticket),
                Effect::OpenStream { stream, request } => self.spawn_stream(stream, request),
                Effect::CancelStream(stream) => self.cancel_stream(stream),
                Effect::Reject(err) => rejected = Some(err),
                Effect::Fragment { message, text } => {
                    updates.push(Update::Fragment { message, text })
                }
                Effect::PreviewReady(ticket) => updates.push(Update::PreviewReady(ticket)),
                Effect::Finished { message, outcome } => {
                    updates.push(Update::Finished { message, outcome })
                }
            }
        }
        self.release_settled_tasks();
        match rejected {
            Some(err) => Err(err),
            None => Ok(updates),
        }
    }

    /// Replaces the draft text.
    pub fn edit_text(&mut self, text: impl Into<String>) -> Result<Vec<Update>> {
        self.dispatch(Event::EditText(text.into()))
    }

    /// Makes `file` the draft attachment.
    pub fn select_file(&mut self, file: SelectedFile) -> Result<Vec<Update>> {
        self.dispatch(Event::SelectFile(file))
    }

    /// Reads `path` and makes it the draft attachment.
    pub async fn attach_path(&mut self, path: impl AsRef<Path>) -> Result<Vec<Update>> {
        let file = SelectedFile::from_path(path).await?;
        self.select_file(file)
    }

    /// Removes the draft attachment.
    pub fn clear_attachment(&mut self) -> Result<Vec<Update>> {
        self.dispatch(Event::ClearAttachment)
    }

    /// Sends the draft.
    pub fn submit(&mut self) -> Result<Vec<Update>> {
        self.dispatch(Event::Submit)
    }

    /// Stops the reply in flight.
    pub fn cancel(&mut self) -> Result<Vec<Update>> {
        self.dispatch(Event::Cancel)
    }

    /// Forgets the conversation and the draft.
    pub fn reset(&mut self) -> Result<Vec<Update>> {
        self.dispatch(Event::Reset)
    }

    /// Waits for the next update from a background task. Returns None once
    /// nothing is in flight.
    pub async fn next_update(&mut self) -> Option<Update> {
        loop {
            if let Some(update) = self.updates.pop_front() {
                return Some(update);
            }
            if !self.is_busy() {
                return None;
            }
            let event = self.events_rx.recv().await?;
            match self.dispatch(event) {
                Ok(updates) => self.updates.extend(updates),
                Err(err) => tracing::warn!(error = %err, "background event was rejected"),
            }
        }
    }

    /// Drives background tasks until none are left.
    pub async fn run_until_idle(&mut self) -> Vec<Update> {
        let mut updates = Vec::new();
        while let Some(update) = self.next_update().await {
            updates.push(update);
        }
        updates
    }

    fn spawn_preview(&mut self, job: PreviewJob) {
        let ticket = job.ticket();
        let events = self.events_tx.clone();
        let handle = tokio::spawn(async move {
            let result = job.run().await;
            let _ = events.send(Event::PreviewReady { ticket, result });
        });
        if let Some(previous) = self.preview.replace(PreviewTask { ticket, handle }) {
            previous.handle.abort();
        }
    }

    fn cancel_preview(&mut self, ticket: PreviewTicket) {
        if self.preview.as_ref().is_some_and(|task| task.ticket == ticket)
            && let Some(task) = self.preview.take()
        {
            task.handle.abort();
        }
    }

    fn spawn_stream(&mut self, stream: StreamId, request: ChatRequest) {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let transport = Arc::clone(&self.transport);
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    tracing::debug!(%stream, "dropping cancelled reply stream");
                }
                _ = pump(transport.as_ref(), stream, request, &events) => {}
            }
        });
        if let Some(previous) = self.stream.replace(StreamTask { id: stream, cancel }) {
            previous.cancel.cancel();
        }
    }

    fn cancel_stream(&mut self, stream: StreamId) {
        if self.stream.as_ref().is_some_and(|task| task.id == stream)
            && let Some(task) = self.stream.take()
        {
            task.cancel.cancel();
        }
    }

    /// Forgets tasks whose result the state no longer waits for.
    fn release_settled_tasks(&mut self) {
        if self
            .stream
            .as_ref()
            .is_some_and(|task| self.state.active_stream() != Some(task.id))
            && let Some(task) = self.stream.take()
        {
            task.cancel.cancel();
        }
        if self
            .preview
            .as_ref()
            .is_some_and(|task| self.state.pending_preview() != Some(task.ticket))
            && let Some(task) = self.preview.take()
        {
            task.handle.abort();
        }
    }
}

impl<T> Drop for ChatSession<T> {
    fn drop(&mut self) {
        if let Some(task) = self.stream.take() {
            task.cancel.cancel();
        }
        if let Some(task) = self.preview.take() {
            task.handle.abort();
        }
    }
}

/// Copies one reply stream into session events. Always ends with exactly one
/// `Complete` or `Failed` unless the session went away.
async fn pump<T: Transport + ?Sized>(
    transport: &T,
    stream: StreamId,
    request: ChatRequest,
    events: &mpsc::UnboundedSender<Event>,
) {
    let mut parts = match transport.open(request).await {
        Ok(parts) => parts,
        Err(error) => {
            let _ = events.send(Event::Failed { stream, error });
            return;
        }
    };
    let last = loop {
        match parts.next().await {
            Some(Ok(StreamPart::Start { message_id })) => {
                tracing::debug!(%stream, %message_id, "reply started");
            }
            Some(Ok(StreamPart::Text(text))) => {
                if events.send(Event::Fragment { stream, text }).is_err() {
                    return;
                }
            }
            Some(Ok(StreamPart::Finish(_))) => break Event::Complete { stream },
            Some(Ok(StreamPart::Error(failure))) => {
                break Event::Failed {
                    stream,
                    error: failure.into_error(),
                };
            }
            Some(Err(error)) => break Event::Failed { stream, error },
            None => {
                break Event::Failed {
                    stream,
                    error: Error::transport("stream ended without an end marker", None),
                };
            }
        }
    };
    let _ = events.send(last);
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::stream;

    use super::*;
    use crate::attachment::Preview;
    use crate::client::PartStream;
    use crate::provider::ScriptedProvider;
    use crate::relay::Relay;
    use crate::session::Status;

    fn session(provider: ScriptedProvider) -> ChatSession<Relay> {
        ChatSession::new(Relay::new(Arc::new(provider)))
    }

    fn text_of(updates: &[Update]) -> String {
        updates
            .iter()
            .filter_map(|u| match u {
                Update::Fragment { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    fn outcome(updates: &[Update]) -> &Outcome {
        match updates.last() {
            Some(Update::Finished { outcome, .. }) => outcome,
            other => panic!("expected a final update, got {other:?}"),
        }
    }

    struct Canned(Vec<Result<StreamPart>>);

    #[async_trait::async_trait]
    impl Transport for Canned {
        async fn open(&self, _: ChatRequest) -> Result<PartStream> {
            Ok(Box::pin(stream::iter(self.0.clone())))
        }
    }

    struct Unreachable;

    #[async_trait::async_trait]
    impl Transport for Unreachable {
        async fn open(&self, _: ChatRequest) -> Result<PartStream> {
            Err(Error::transport("connection refused", None))
        }
    }

    #[tokio::test]
    async fn streams_a_reply() {
        let mut session = session(ScriptedProvider::from_fragments(["He", "llo"]));
        session.edit_text("hi").unwrap();
        assert!(session.submit().unwrap().is_empty());
        assert_eq!(session.state().status(), Status::Streaming);

        let updates = session.run_until_idle().await;
        assert_eq!(text_of(&updates), "Hello");
        assert!(outcome(&updates).is_completed());
        assert_eq!(session.state().status(), Status::Idle);
        assert_eq!(session.state().messages()[1].content(), "Hello");
        assert!(!session.is_busy());
    }

    #[tokio::test]
    async fn rejects_a_second_submit() {
        let mut session = session(ScriptedProvider::new().stall());
        session.edit_text("one").unwrap();
        session.submit().unwrap();
        session.edit_text("two").unwrap();
        assert!(session.submit().unwrap_err().is_validation());
        assert_eq!(session.state().messages().len(), 2);
        session.cancel().unwrap();
    }

    #[tokio::test]
    async fn cancel_drops_the_provider_stream() {
        let provider = ScriptedProvider::new().fragment("par").stall();
        let probe = provider.probe();
        let mut session = session(provider);
        session.edit_text("hi").unwrap();
        session.submit().unwrap();

        let update = session.next_update().await.unwrap();
        assert!(matches!(update, Update::Fragment { ref text, .. } if text == "par"));

        let updates = session.cancel().unwrap();
        assert!(matches!(outcome(&updates), Outcome::Cancelled));
        assert!(session.next_update().await.is_none());
        assert_eq!(session.state().messages()[1].content(), "par");

        tokio::time::timeout(Duration::from_secs(5), async {
            while probe.abandoned() == 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_returns_to_idle() {
        let relay = Relay::new(Arc::new(ScriptedProvider::new().fragment("slow").stall()))
            .with_max_duration(Duration::from_secs(30));
        let mut session = ChatSession::new(relay);
        session.edit_text("hi").unwrap();
        session.submit().unwrap();

        let updates = session.run_until_idle().await;
        assert_eq!(text_of(&updates), "slow");
        assert!(matches!(outcome(&updates), Outcome::Failed(err) if err.is_timeout()));
        assert!(session.state().last_error().unwrap().is_timeout());
        assert_eq!(session.state().status(), Status::Idle);
    }

    #[tokio::test]
    async fn transport_failure_keeps_the_session_usable() {
        let mut session = ChatSession::new(Unreachable);
        session.edit_text("hi").unwrap();
        session.submit().unwrap();
        let updates = session.run_until_idle().await;
        assert!(matches!(outcome(&updates), Outcome::Failed(err) if err.is_transport()));
        assert_eq!(session.state().messages()[1].content(), "");

        session.edit_text("again").unwrap();
        session.submit().unwrap();
        assert_eq!(session.state().status(), Status::Streaming);
        session.run_until_idle().await;
        assert_eq!(session.state().messages().len(), 4);
    }

    #[tokio::test]
    async fn truncated_reply_is_a_transport_error() {
        let mut session = ChatSession::new(Canned(vec![Ok(StreamPart::Text("cut".to_string()))]));
        session.edit_text("hi").unwrap();
        session.submit().unwrap();
        let updates = session.run_until_idle().await;
        assert_eq!(text_of(&updates), "cut");
        assert!(matches!(outcome(&updates), Outcome::Failed(err) if err.is_transport()));
    }

    #[tokio::test]
    async fn preview_arrives_in_the_background() {
        let mut session = session(ScriptedProvider::new());
        session
            .select_file(SelectedFile::new("cat.png", None, vec![1, 2, 3]))
            .unwrap();
        assert!(matches!(
            session.state().draft_attachment().unwrap().preview(),
            Preview::Pending(_)
        ));

        let updates = session.run_until_idle().await;
        assert!(matches!(&updates[..], [Update::PreviewReady(_)]));
        assert_eq!(
            session.state().draft_attachment().unwrap().preview_url(),
            Some("data:image/png;base64,AQID")
        );
    }

    #[tokio::test]
    async fn only_the_newest_preview_lands() {
        let mut session = session(ScriptedProvider::new());
        session
            .select_file(SelectedFile::new("a.png", None, vec![0]))
            .unwrap();
        session
            .select_file(SelectedFile::new("b.png", None, vec![1, 2, 3]))
            .unwrap();
        let updates = session.run_until_idle().await;
        assert_eq!(updates.len(), 1);
        let draft = session.state().draft_attachment().unwrap();
        assert_eq!(draft.attachment().name(), "b.png");
        assert_eq!(draft.preview_url(), Some("data:image/png;base64,AQID"));
    }

    #[tokio::test]
    async fn attachments_travel_with_the_message() {
        let mut session = session(ScriptedProvider::echo(Duration::ZERO));
        session
            .select_file(SelectedFile::new("cat.png", None, vec![1, 2, 3]))
            .unwrap();
        session.submit().unwrap();
        let updates = session.run_until_idle().await;
        assert_eq!(text_of(&updates), "You sent no text. Attached: cat.png.");
        let user = &session.state().messages()[0];
        assert_eq!(user.attachments()[0].url(), "data:image/png;base64,AQID");
    }
}
