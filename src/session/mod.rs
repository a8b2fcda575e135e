//! The chat session state machine.
//!
//! [`SessionState`] holds the message log, the draft and the
//! `idle`/`streaming` status. [`reduce`] is the only function that changes
//! it; it returns [`Effect`]s for a runtime to carry out. [`ChatSession`] is
//! that runtime: it opens and cancels streams through a
//! [`Transport`](crate::client::Transport), derives previews, and feeds the
//! results back in as [`Event`]s.

mod driver;
mod reducer;
mod state;

pub use driver::{ChatSession, Update};
pub use reducer::{Effect, Event, Outcome, reduce};
pub use state::{SessionState, Status, StreamId};
