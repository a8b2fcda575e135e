// Public modules
pub mod attachment;
pub mod chat_request;
pub mod message;

// Re-exports
pub use attachment::{
    Attachment, AttachmentDescriptor, ContentLocator, DataUrl, encode_data_url, is_image_mime,
};
pub use chat_request::{ChatMessage, ChatRequest};
pub use message::{Message, MessageId, MessageRole, MessageState};
