use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::types::{AttachmentDescriptor, MessageId, MessageRole};

/// Body of a relay request: the whole conversation so far.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Messages in conversation order.
    pub messages: Vec<ChatMessage>,
}

impl ChatRequest {
    /// Creates a request from a list of messages.
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self { messages }
    }
}

/// One conversation message as it travels to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Client-side identifier, echoed for debugging only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<MessageId>,

    /// Author role.
    pub role: MessageRole,

    /// Text content, possibly empty.
    #[serde(default)]
    pub content: String,

    /// When the client created the message.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "crate::utils::time::option"
    )]
    pub created_at: Option<OffsetDateTime>,

    /// Attachments with retrievable content.
    #[serde(
        default,
        skip_serializing_if = "Vec::is_empty",
        alias = "experimental_attachments"
    )]
    pub attachments: Vec<AttachmentDescriptor>,
}

impl ChatMessage {
    /// A text-only user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::text(MessageRole::User, content)
    }

    /// A text-only assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::text(MessageRole::Assistant, content)
    }

    fn text(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: None,
            role,
            content: content.into(),
            created_at: None,
            attachments: Vec::new(),
        }
    }

    /// Adds an attachment descriptor.
    pub fn with_attachment(mut self, attachment: AttachmentDescriptor) -> Self {
        self.attachments.push(attachment);
        self
    }

    /// True when there is nothing to forward to the model.
    pub fn is_empty(&self) -> bool {
        self.content.trim().is_empty() && self.attachments.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn text_message_json() {
        let request = ChatRequest::new(vec![ChatMessage::user("hello")]);
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({"messages": [{"role": "user", "content": "hello"}]})
        );
    }

    #[test]
    fn accepts_experimental_attachments() {
        let request: ChatRequest = serde_json::from_value(json!({
            "messages": [{
                "id": "abc",
                "role": "user",
                "content": "",
                "createdAt": "2025-01-02T03:04:05Z",
                "experimental_attachments": [
                    {"name": "photo.png", "contentType": "image/png", "url": "data:image/png;base64,AA=="}
                ]
            }]
        }))
        .unwrap();
        let message = &request.messages[0];
        assert_eq!(message.id.as_ref().map(MessageId::as_str), Some("abc"));
        assert!(message.created_at.is_some());
        assert_eq!(message.attachments.len(), 1);
        assert!(!message.is_empty());
    }

    #[test]
    fn whitespace_only_is_empty() {
        assert!(ChatMessage::assistant("  ").is_empty());
        assert!(!ChatMessage::assistant("hi").is_empty());
    }
}
