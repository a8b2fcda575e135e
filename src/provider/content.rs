use base64::Engine;
use reqwest::Client as ReqwestClient;

use crate::error::{Error, Result};
use crate::types::{AttachmentDescriptor, ChatMessage, DataUrl, MessageRole};

/// A piece of message content in a form every backend can consume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentPart {
    /// Plain text.
    Text(String),

    /// Binary content, base64 encoded.
    Inline {
        /// Mime type of the decoded bytes.
        mime_type: String,
        /// Base64 payload.
        data: String,
    },
}

/// A conversation message with its attachments fetched and decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedMessage {
    /// Author role.
    pub role: MessageRole,
    /// Text first, then attachments in order.
    pub parts: Vec<ContentPart>,
}

/// Turns attachment descriptors into content parts.
///
/// Inline `data:` URLs are decoded locally. `http` and `https` URLs are
/// downloaded. Attachments with a `text/*` mime type become text parts so
/// the model reads them as text.
#[derive(Debug, Clone)]
pub struct AttachmentResolver {
    client: ReqwestClient,
}

impl AttachmentResolver {
    /// Creates a resolver that downloads remote attachments with `client`.
    pub fn new(client: ReqwestClient) -> Self {
        Self { client }
    }

    /// Resolves every message of a conversation.
    pub async fn resolve(&self, messages: &[ChatMessage]) -> Result<Vec<ResolvedMessage>> {
        let mut resolved = Vec::with_capacity(messages.len());
        for message in messages {
            let mut parts = Vec::with_capacity(message.attachments.len() + 1);
            if !message.content.is_empty() {
                parts.push(ContentPart::Text(message.content.clone()));
            }
            for attachment in &message.attachments {
                parts.push(self.resolve_attachment(attachment).await?);
            }
            resolved.push(ResolvedMessage {
                role: message.role,
                parts,
            });
        }
        Ok(resolved)
    }

    /// Resolves a single attachment.
    pub async fn resolve_attachment(&self, attachment: &AttachmentDescriptor) -> Result<ContentPart> {
        if let Some(data_url) = DataUrl::parse(&attachment.url) {
            let mime_type = if attachment.mime_type.is_empty() {
                data_url.mime_type.to_string()
            } else {
                attachment.mime_type.clone()
            };
            if mime_type.starts_with("text/") {
                return Ok(ContentPart::Text(data_url.decode_text()?));
            }
            return Ok(ContentPart::Inline {
                mime_type,
                data: data_url.base64_payload(),
            });
        }

        let url = url::Url::parse(&attachment.url)?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::validation(
                format!("unsupported attachment URL scheme '{}'", url.scheme()),
                Some("url".to_string()),
            ));
        }
        let response = self.client.get(url.clone()).send().await?;
        if !response.status().is_success() {
            return Err(Error::transport_status(
                format!("failed to download attachment {url}"),
                response.status().as_u16(),
            ));
        }
        let bytes = response.bytes().await?;
        if attachment.mime_type.starts_with("text/") {
            Ok(ContentPart::Text(String::from_utf8_lossy(&bytes).into_owned()))
        } else {
            Ok(ContentPart::Inline {
                mime_type: attachment.mime_type.clone(),
                data: base64::engine::general_purpose::STANDARD.encode(&bytes),
            })
        }
    }
}

impl Default for AttachmentResolver {
    fn default() -> Self {
        Self::new(ReqwestClient::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(mime_type: &str, url: &str) -> AttachmentDescriptor {
        AttachmentDescriptor {
            name: "file".to_string(),
            mime_type: mime_type.to_string(),
            url: url.to_string(),
        }
    }

    #[tokio::test]
    async fn images_stay_inline() {
        let resolver = AttachmentResolver::default();
        let part = resolver
            .resolve_attachment(&descriptor("image/png", "data:image/png;base64,AAEC"))
            .await
            .unwrap();
        assert_eq!(
            part,
            ContentPart::Inline {
                mime_type: "image/png".to_string(),
                data: "AAEC".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn text_attachments_become_text() {
        let resolver = AttachmentResolver::default();
        let part = resolver
            .resolve_attachment(&descriptor("text/plain", "data:text/plain;base64,aGVsbG8="))
            .await
            .unwrap();
        assert_eq!(part, ContentPart::Text("hello".to_string()));
    }

    #[tokio::test]
    async fn mime_type_falls_back_to_data_url() {
        let resolver = AttachmentResolver::default();
        let part = resolver
            .resolve_attachment(&descriptor("", "data:application/pdf;base64,JVBE"))
            .await
            .unwrap();
        assert!(matches!(part, ContentPart::Inline { mime_type, .. } if mime_type == "application/pdf"));
    }

    #[tokio::test]
    async fn rejects_other_schemes() {
        let resolver = AttachmentResolver::default();
        let err = resolver
            .resolve_attachment(&descriptor("image/png", "file:///etc/passwd"))
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn text_precedes_attachments() {
        let resolver = AttachmentResolver::default();
        let message = ChatMessage::user("what is this?")
            .with_attachment(descriptor("image/gif", "data:image/gif;base64,R0lG"));
        let resolved = resolver.resolve(&[message, ChatMessage::assistant("")]).await.unwrap();
        assert_eq!(resolved[0].parts.len(), 2);
        assert_eq!(resolved[0].parts[0], ContentPart::Text("what is this?".to_string()));
        assert!(resolved[1].parts.is_empty());
    }
}
