use base64::Engine;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Error, Result};

/// Returns true for mime types that are rendered as inline previews.
pub fn is_image_mime(mime_type: &str) -> bool {
    mime_type.starts_with("image/")
}

/// Where an attachment's content can be fetched from.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentLocator {
    /// A remote reference the relay downloads.
    Remote(Url),

    /// A self-contained `data:` URL.
    DataUrl(String),

    /// Raw bytes, encoded into a `data:` URL when transmitted.
    Bytes(Bytes),
}

/// A file attached to a message.
///
/// Cloning is cheap: byte payloads are reference counted, so copying an
/// attachment from the draft slot onto a message shares the content.
#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    name: String,
    mime_type: String,
    size_bytes: u64,
    locator: ContentLocator,
}

impl Attachment {
    /// Creates an attachment backed by in-memory bytes.
    pub fn from_bytes(name: impl Into<String>, mime_type: impl Into<String>, bytes: Bytes) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            size_bytes: bytes.len() as u64,
            locator: ContentLocator::Bytes(bytes),
        }
    }

    /// Creates an attachment that points at a remote URL.
    pub fn from_url(
        name: impl Into<String>,
        mime_type: impl Into<String>,
        size_bytes: u64,
        url: &str,
    ) -> Result<Self> {
        let url = Url::parse(url)?;
        Ok(Self {
            name: name.into(),
            mime_type: mime_type.into(),
            size_bytes,
            locator: ContentLocator::Remote(url),
        })
    }

    /// The file name shown to the user.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The mime type.
    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    /// Size of the original file.
    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    /// Where the content lives.
    pub fn locator(&self) -> &ContentLocator {
        &self.locator
    }

    /// True if this attachment is rendered as an inline preview.
    pub fn is_previewable(&self) -> bool {
        is_image_mime(&self.mime_type)
    }

    /// Size formatted in megabytes, e.g. `"1.25 MB"`.
    pub fn size_label(&self) -> String {
        format!("{:.2} MB", self.size_bytes as f64 / 1024.0 / 1024.0)
    }

    /// The URL used for both preview rendering and transmission.
    pub fn url(&self) -> String {
        match &self.locator {
            ContentLocator::Remote(url) => url.to_string(),
            ContentLocator::DataUrl(data_url) => data_url.clone(),
            ContentLocator::Bytes(bytes) => encode_data_url(&self.mime_type, bytes),
        }
    }

    /// Replaces a byte payload with an already encoded `data:` URL so the
    /// bytes are not encoded a second time on submit.
    pub(crate) fn adopt_data_url(&mut self, data_url: String) {
        if matches!(self.locator, ContentLocator::Bytes(_)) {
            self.locator = ContentLocator::DataUrl(data_url);
        }
    }

    /// The descriptor sent over the wire.
    pub fn to_descriptor(&self) -> AttachmentDescriptor {
        AttachmentDescriptor {
            name: self.name.clone(),
            mime_type: self.mime_type.clone(),
            url: self.url(),
        }
    }
}

/// Attachment descriptor on the wire: `{ name, mimeType, url }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentDescriptor {
    /// File name.
    #[serde(default)]
    pub name: String,

    /// Mime type. `contentType` is accepted as an alias.
    #[serde(rename = "mimeType", alias = "contentType")]
    pub mime_type: String,

    /// A remote URL or an inline `data:` URL.
    pub url: String,
}

impl AttachmentDescriptor {
    /// True if this descriptor's mime type is rendered as a preview.
    pub fn is_previewable(&self) -> bool {
        is_image_mime(&self.mime_type)
    }
}

/// Encodes bytes as a base64 `data:` URL.
pub fn encode_data_url(mime_type: &str, bytes: &[u8]) -> String {
    let data = base64::engine::general_purpose::STANDARD.encode(bytes);
    format!("data:{mime_type};base64,{data}")
}

/// A parsed `data:` URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataUrl<'a> {
    /// Declared mime type; empty when the URL omits it.
    pub mime_type: &'a str,
    /// True for `;base64` payloads.
    pub base64: bool,
    /// The text after the comma.
    pub payload: &'a str,
}

impl<'a> DataUrl<'a> {
    /// Parses a `data:` URL, returning None for any other scheme.
    pub fn parse(url: &'a str) -> Option<Self> {
        let rest = url.strip_prefix("data:")?;
        let (header, payload) = rest.split_once(',')?;
        let (mime_type, base64) = match header.strip_suffix(";base64") {
            Some(mime_type) => (mime_type, true),
            None => (header, false),
        };
        let mime_type = mime_type.split(';').next().unwrap_or_default();
        Some(Self {
            mime_type,
            base64,
            payload,
        })
    }

    /// The payload as base64, encoding it if the URL carried plain text.
    pub fn base64_payload(&self) -> String {
        if self.base64 {
            self.payload.to_string()
        } else {
            base64::engine::general_purpose::STANDARD.encode(self.payload.as_bytes())
        }
    }

    /// Decodes the payload into bytes.
    pub fn decode(&self) -> Result<Vec<u8>> {
        if self.base64 {
            Ok(base64::engine::general_purpose::STANDARD.decode(self.payload)?)
        } else {
            Ok(self.payload.as_bytes().to_vec())
        }
    }

    /// Decodes the payload as UTF-8 text.
    pub fn decode_text(&self) -> Result<String> {
        let bytes = self.decode()?;
        String::from_utf8(bytes).map_err(|e| {
            Error::encoding(
                format!("attachment is not valid UTF-8: {e}"),
                Some(Box::new(e)),
            )
        })
    }
}
