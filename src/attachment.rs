//! The attachment pipeline.
//!
//! Turns a file the user picked into the draft attachment of a session. At
//! most one draft exists at a time. Image drafts get a `data:` URL preview
//! that is derived off the event loop; each derivation carries a
//! [`PreviewTicket`] and only the ticket of the current draft may complete,
//! so a slow derivation for a replaced file can never overwrite a newer
//! selection.

use std::fmt;
use std::path::Path;

use bytes::Bytes;

use crate::error::{Error, Result};
use crate::types::{Attachment, encode_data_url, is_image_mime};

const FALLBACK_MIME: &str = "application/octet-stream";

/// Guesses a mime type from a file name's extension.
pub fn infer_mime_type(name: &str) -> &'static str {
    let extension = match name.rsplit_once('.') {
        Some((_, extension)) => extension.to_ascii_lowercase(),
        None => return FALLBACK_MIME,
    };
    match extension.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "pdf" => "application/pdf",
        "txt" => "text/plain",
        "md" => "text/markdown",
        "json" => "application/json",
        "csv" => "text/csv",
        _ => FALLBACK_MIME,
    }
}

/// A file the user picked, read into memory.
#[derive(Clone, PartialEq)]
pub struct SelectedFile {
    name: String,
    mime_type: String,
    bytes: Bytes,
}

impl SelectedFile {
    /// Wraps file content. A missing or empty mime type is inferred from the
    /// name.
    pub fn new(name: impl Into<String>, mime_type: Option<String>, bytes: impl Into<Bytes>) -> Self {
        let name = name.into();
        let mime_type = mime_type
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| infer_mime_type(&name).to_string());
        Self {
            name,
            mime_type,
            bytes: bytes.into(),
        }
    }

    /// Reads a file from disk.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                Error::validation(
                    format!("{} does not name a file", path.display()),
                    Some("path".to_string()),
                )
            })?;
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| Error::io(format!("Failed to read {}: {e}", path.display()), e))?;
        Ok(Self::new(name, None, bytes))
    }

    /// File name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Mime type.
    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    /// Content length in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// True for an empty file.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Converts the file into an attachment that owns its bytes.
    pub fn into_attachment(self) -> Attachment {
        Attachment::from_bytes(self.name, self.mime_type, self.bytes)
    }
}

impl fmt::Debug for SelectedFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelectedFile")
            .field("name", &self.name)
            .field("mime_type", &self.mime_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Identifies one preview derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PreviewTicket(u64);

/// Preview state of a draft attachment.
#[derive(Debug, Clone, PartialEq)]
pub enum Preview {
    /// Not an image; no preview is rendered.
    Unavailable,
    /// Derivation in flight.
    Pending(PreviewTicket),
    /// A `data:` URL ready to render.
    Ready(String),
}

/// The attachment waiting in the composer.
#[derive(Debug, Clone, PartialEq)]
pub struct DraftAttachment {
    attachment: Attachment,
    preview: Preview,
}

impl DraftAttachment {
    /// The attachment, usable for submission whether or not the preview is
    /// ready.
    pub fn attachment(&self) -> &Attachment {
        &self.attachment
    }

    /// Preview state.
    pub fn preview(&self) -> &Preview {
        &self.preview
    }

    /// The preview URL once derived.
    pub fn preview_url(&self) -> Option<&str> {
        match &self.preview {
            Preview::Ready(url) => Some(url),
            _ => None,
        }
    }

    /// The ticket of the derivation in flight, if any.
    pub fn pending_ticket(&self) -> Option<PreviewTicket> {
        match self.preview {
            Preview::Pending(ticket) => Some(ticket),
            _ => None,
        }
    }

    /// Takes the attachment out of the draft.
    pub fn into_attachment(self) -> Attachment {
        self.attachment
    }
}

/// Work needed to derive one preview.
#[derive(Clone)]
pub struct PreviewJob {
    ticket: PreviewTicket,
    mime_type: String,
    bytes: Bytes,
}

impl PreviewJob {
    /// The ticket the result must be reported with.
    pub fn ticket(&self) -> PreviewTicket {
        self.ticket
    }

    /// Encodes the bytes into a `data:` URL on the blocking pool.
    pub async fn run(self) -> Result<String> {
        let PreviewJob {
            mime_type, bytes, ..
        } = self;
        tokio::task::spawn_blocking(move || encode_data_url(&mime_type, &bytes))
            .await
            .map_err(|e| Error::encoding(format!("preview derivation failed: {e}"), Some(Box::new(e))))
    }
}

impl fmt::Debug for PreviewJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreviewJob")
            .field("ticket", &self.ticket)
            .field("mime_type", &self.mime_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// What a selection changed.
#[derive(Debug)]
pub struct Selection {
    /// Derivation of the replaced draft to abandon.
    pub cancelled: Option<PreviewTicket>,
    /// Derivation to start for the new draft.
    pub job: Option<PreviewJob>,
}

/// Owns the single draft attachment slot.
#[derive(Debug, Default)]
pub struct AttachmentPipeline {
    draft: Option<DraftAttachment>,
    next_ticket: u64,
}

impl AttachmentPipeline {
    /// An empty pipeline.
    pub fn new() -> Self {
        Self::default()
    }

    /// The current draft.
    pub fn draft(&self) -> Option<&DraftAttachment> {
        self.draft.as_ref()
    }

    /// Ticket of the derivation the current draft waits for.
    pub fn pending_ticket(&self) -> Option<PreviewTicket> {
        self.draft.as_ref().and_then(DraftAttachment::pending_ticket)
    }

    /// Makes `file` the draft, replacing any previous one. Never fails.
    pub fn select(&mut self, file: SelectedFile) -> Selection {
        let cancelled = self.pending_ticket();
        let job = if is_image_mime(file.mime_type()) {
            self.next_ticket += 1;
            Some(PreviewJob {
                ticket: PreviewTicket(self.next_ticket),
                mime_type: file.mime_type.clone(),
                bytes: file.bytes.clone(),
            })
        } else {
            None
        };
        let preview = match &job {
            Some(job) => Preview::Pending(job.ticket),
            None => Preview::Unavailable,
        };
        self.draft = Some(DraftAttachment {
            attachment: file.into_attachment(),
            preview,
        });
        Selection { cancelled, job }
    }

    /// Applies a finished derivation. Returns false, changing nothing, when
    /// `ticket` no longer belongs to the current draft.
    pub fn complete(&mut self, ticket: PreviewTicket, result: Result<String>) -> bool {
        let Some(draft) = self.draft.as_mut() else {
            return false;
        };
        if draft.pending_ticket() != Some(ticket) {
            return false;
        }
        match result {
            Ok(data_url) => {
                draft.attachment.adopt_data_url(data_url.clone());
                draft.preview = Preview::Ready(data_url);
            }
            Err(err) => {
                tracing::warn!(error = %err, name = draft.attachment.name(), "preview derivation failed");
                draft.preview = Preview::Unavailable;
            }
        }
        true
    }

    /// Removes the draft. Returns the derivation to abandon, if any.
    /// Idempotent.
    pub fn clear(&mut self) -> Option<PreviewTicket> {
        self.draft.take().and_then(|draft| draft.pending_ticket())
    }

    /// Takes the draft for submission.
    pub fn take(&mut self) -> Option<DraftAttachment> {
        self.draft.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ContentLocator;

    fn png(name: &str) -> SelectedFile {
        SelectedFile::new(name, None, vec![0x89, b'P', b'N', b'G'])
    }

    #[test]
    fn infers_mime_types() {
        assert_eq!(infer_mime_type("cat.PNG"), "image/png");
        assert_eq!(infer_mime_type("photo.jpeg"), "image/jpeg");
        assert_eq!(infer_mime_type("notes.md"), "text/markdown");
        assert_eq!(infer_mime_type("archive.tar.gz"), FALLBACK_MIME);
        assert_eq!(infer_mime_type("Makefile"), FALLBACK_MIME);

        let file = SelectedFile::new("scan.bin", Some("image/tiff".to_string()), Vec::new());
        assert_eq!(file.mime_type(), "image/tiff");
        let file = SelectedFile::new("scan.pdf", Some(String::new()), Vec::new());
        assert_eq!(file.mime_type(), "application/pdf");
    }

    #[test]
    fn images_wait_for_a_preview() {
        let mut pipeline = AttachmentPipeline::new();
        let selection = pipeline.select(png("a.png"));
        assert!(selection.cancelled.is_none());
        let job = selection.job.unwrap();
        let draft = pipeline.draft().unwrap();
        assert_eq!(draft.preview(), &Preview::Pending(job.ticket()));
        assert_eq!(draft.attachment().name(), "a.png");
        assert!(draft.preview_url().is_none());
    }

    #[test]
    fn other_files_are_not_previewed() {
        let mut pipeline = AttachmentPipeline::new();
        let selection = pipeline.select(SelectedFile::new("report.pdf", None, vec![1, 2, 3]));
        assert!(selection.job.is_none());
        assert_eq!(pipeline.draft().unwrap().preview(), &Preview::Unavailable);
        assert_eq!(pipeline.draft().unwrap().attachment().size_bytes(), 3);
    }

    #[test]
    fn stale_previews_are_ignored() {
        let mut pipeline = AttachmentPipeline::new();
        let first = pipeline.select(png("a.png")).job.unwrap();
        let selection = pipeline.select(png("b.png"));
        assert_eq!(selection.cancelled, Some(first.ticket()));
        let second = selection.job.unwrap();

        assert!(!pipeline.complete(first.ticket(), Ok("data:image/png;base64,AAAA".to_string())));
        assert_eq!(pipeline.draft().unwrap().attachment().name(), "b.png");
        assert_eq!(pipeline.draft().unwrap().preview(), &Preview::Pending(second.ticket()));

        assert!(pipeline.complete(second.ticket(), Ok("data:image/png;base64,iVBORw==".to_string())));
        let draft = pipeline.draft().unwrap();
        assert_eq!(draft.preview_url(), Some("data:image/png;base64,iVBORw=="));
        assert_eq!(
            draft.attachment().locator(),
            &ContentLocator::DataUrl("data:image/png;base64,iVBORw==".to_string())
        );
    }

    #[test]
    fn failed_previews_leave_the_attachment_usable() {
        let mut pipeline = AttachmentPipeline::new();
        let job = pipeline.select(png("a.png")).job.unwrap();
        assert!(pipeline.complete(job.ticket(), Err(Error::encoding("broken", None))));
        let draft = pipeline.draft().unwrap();
        assert_eq!(draft.preview(), &Preview::Unavailable);
        assert!(draft.attachment().url().starts_with("data:image/png;base64,"));
    }

    #[test]
    fn clear_is_idempotent() {
        let mut pipeline = AttachmentPipeline::new();
        let job = pipeline.select(png("a.png")).job.unwrap();
        assert_eq!(pipeline.clear(), Some(job.ticket()));
        assert_eq!(pipeline.clear(), None);
        assert!(pipeline.draft().is_none());
        assert!(!pipeline.complete(job.ticket(), Ok("data:,".to_string())));
    }

    #[tokio::test]
    async fn preview_job_encodes_a_data_url() {
        let mut pipeline = AttachmentPipeline::new();
        let job = pipeline.select(png("a.png")).job.unwrap();
        assert_eq!(job.run().await.unwrap(), "data:image/png;base64,iVBORw==");
    }

    #[tokio::test]
    async fn reads_files_from_disk() {
        let path = std::env::temp_dir().join(format!("relaychat-{}.txt", std::process::id()));
        tokio::fs::write(&path, b"hello").await.unwrap();
        let file = SelectedFile::from_path(&path).await.unwrap();
        tokio::fs::remove_file(&path).await.unwrap();
        assert_eq!(file.mime_type(), "text/plain");
        assert_eq!(file.len(), 5);

        let err = SelectedFile::from_path(std::env::temp_dir().join("relaychat-missing.png"))
            .await
            .unwrap_err();
        assert!(err.is_transport());
    }
}
