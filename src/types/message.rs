use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::types::{Attachment, ChatMessage};

/// Identifier of a message, stable for the message's lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    /// Generates a fresh random identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for MessageId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for MessageId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Role of a message author.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// User role.
    User,

    /// Assistant role.
    Assistant,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::User => f.write_str("user"),
            MessageRole::Assistant => f.write_str("assistant"),
        }
    }
}

/// Whether a message can still change.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum MessageState {
    /// An assistant reply that is still receiving fragments.
    Pending,

    /// Immutable from now on.
    Final,
}

/// One entry in the session's message log.
///
/// User messages are created final. The assistant reply is created pending
/// when a stream opens and is finalized exactly once when that stream ends,
/// whether it completed, failed, or was cancelled.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    id: MessageId,
    role: MessageRole,
    content: String,
    attachments: Vec<Attachment>,
    created_at: OffsetDateTime,
    state: MessageState,
}

impl Message {
    /// Creates a final user message.
    pub fn user(content: impl Into<String>, attachments: Vec<Attachment>) -> Self {
        Self {
            id: MessageId::generate(),
            role: MessageRole::User,
            content: content.into(),
            attachments,
            created_at: OffsetDateTime::now_utc(),
            state: MessageState::Final,
        }
    }

    /// Creates an empty assistant message that accepts fragments.
    pub fn pending_assistant() -> Self {
        Self {
            id: MessageId::generate(),
            role: MessageRole::Assistant,
            content: String::new(),
            attachments: Vec::new(),
            created_at: OffsetDateTime::now_utc(),
            state: MessageState::Pending,
        }
    }

    /// The message identifier.
    pub fn id(&self) -> &MessageId {
        &self.id
    }

    /// The author role.
    pub fn role(&self) -> MessageRole {
        self.role
    }

    /// The text accumulated so far.
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Attachments in the order they were added.
    pub fn attachments(&self) -> &[Attachment] {
        &self.attachments
    }

    /// Attachments that should be rendered inline.
    pub fn previewable_attachments(&self) -> impl Iterator<Item = &Attachment> {
        self.attachments.iter().filter(|a| a.is_previewable())
    }

    /// Creation time.
    pub fn created_at(&self) -> OffsetDateTime {
        self.created_at
    }

    /// Current mutability state.
    pub fn state(&self) -> MessageState {
        self.state
    }

    /// True while the message still accepts fragments.
    pub fn is_pending(&self) -> bool {
        self.state == MessageState::Pending
    }

    /// True when the message carries neither text nor attachments.
    pub fn is_empty(&self) -> bool {
        self.content.is_empty() && self.attachments.is_empty()
    }

    /// Appends a fragment. Returns false, leaving the message untouched, if
    /// it has already been finalized.
    pub(crate) fn push_fragment(&mut self, text: &str) -> bool {
        if self.state != MessageState::Pending {
            return false;
        }
        self.content.push_str(text);
        true
    }

    /// Freezes the message. Returns false if it was already final.
    pub(crate) fn finalize(&mut self) -> bool {
        if self.state == MessageState::Final {
            return false;
        }
        self.state = MessageState::Final;
        true
    }

    /// The wire form sent to the relay.
    pub fn to_chat_message(&self) -> ChatMessage {
        ChatMessage {
            id: Some(self.id.clone()),
            role: self.role,
            content: self.content.clone(),
            created_at: Some(self.created_at),
            attachments: self.attachments.iter().map(Attachment::to_descriptor).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn user_messages_are_final() {
        let mut message = Message::user("hello", Vec::new());
        assert_eq!(message.role(), MessageRole::User);
        assert_eq!(message.state(), MessageState::Final);
        assert!(!message.push_fragment(" world"));
        assert_eq!(message.content(), "hello");
    }

    #[test]
    fn assistant_accepts_fragments_until_finalized() {
        let mut message = Message::pending_assistant();
        assert!(message.is_pending());
        assert!(message.push_fragment("He"));
        assert!(message.push_fragment("llo"));
        assert!(message.finalize());
        assert!(!message.finalize());
        assert!(!message.push_fragment("!"));
        assert_eq!(message.content(), "Hello");
    }

    #[test]
    fn ids_are_unique() {
        let a = Message::user("a", Vec::new());
        let b = Message::user("a", Vec::new());
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn only_images_are_previewable() {
        let photo = Attachment::from_bytes("photo.png", "image/png", Bytes::from_static(b"png"));
        let notes = Attachment::from_bytes("notes.txt", "text/plain", Bytes::from_static(b"hi"));
        let message = Message::user("", vec![photo, notes]);
        let names: Vec<&str> = message
            .previewable_attachments()
            .map(|a| a.name())
            .collect();
        assert_eq!(names, vec!["photo.png"]);
    }

    #[test]
    fn chat_message_carries_descriptors() {
        let photo = Attachment::from_bytes("photo.png", "image/png", Bytes::from_static(b"png"));
        let message = Message::user("look", vec![photo]);
        let wire = message.to_chat_message();
        assert_eq!(wire.id.as_ref(), Some(message.id()));
        assert_eq!(wire.content, "look");
        assert_eq!(wire.attachments.len(), 1);
        assert_eq!(wire.attachments[0].url, "data:image/png;base64,cG5n");
    }
}
