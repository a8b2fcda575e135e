//! Terminal chat front end.
//!
//! A REPL that drives a [`ChatSession`](crate::session::ChatSession) against
//! a relay. It supports:
//!
//! - Streaming replies printed as they arrive
//! - File attachments with `/attach`
//! - Ctrl+C to stop a reply without leaving the chat
//!
//! # Architecture
//!
//! - [`config`]: CLI argument parsing and configuration
//! - [`commands`]: Slash command parsing
//! - [`render`]: Output rendering

mod commands;
mod config;
mod render;

pub use commands::{ChatCommand, help_text, parse_command};
pub use config::{ChatArgs, ChatConfig};
pub use render::{PlainTextRenderer, Renderer, attachment_card, sent_images};
