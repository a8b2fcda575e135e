// Public modules
pub mod attachment;
pub mod chat;
pub mod client;
pub mod error;
pub mod observability;
pub mod provider;
pub mod relay;
pub mod session;
pub mod sse;
pub mod types;
pub mod utils;
pub mod wire;

// Re-exports
pub use attachment::{AttachmentPipeline, DraftAttachment, Preview, PreviewTicket, SelectedFile};
pub use client::{RelayClient, Transport};
pub use error::{Error, ErrorKind, Result};
pub use observability::register_biometrics;
pub use provider::{Gemini, Provider, ScriptedProvider};
pub use relay::{Relay, RelayConfig};
pub use session::{ChatSession, Event, Outcome, SessionState, Status, Update};
pub use types::*;
pub use wire::StreamPart;
