//! Configuration types for the chat front end.
//!
//! This module provides CLI argument parsing via `arrrg` and the resolved
//! configuration the front end runs with.

use arrrg_derive::CommandLine;

use crate::client::DEFAULT_RELAY_URL;

/// Command-line arguments for the relaychat-chat tool.
#[derive(CommandLine, Debug, Default, PartialEq, Eq)]
pub struct ChatArgs {
    /// Relay endpoint to send conversations to.
    #[arrrg(optional, "Relay endpoint (default: http://127.0.0.1:3000/api/chat)", "URL")]
    pub relay_url: Option<String>,

    /// Disable ANSI colors and styles.
    #[arrrg(flag, "Disable ANSI colors/styles")]
    pub no_color: bool,
}

/// Configuration for the chat front end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatConfig {
    /// The relay endpoint.
    pub relay_url: String,

    /// Whether to use ANSI colors and styles in output.
    pub use_color: bool,
}

impl ChatConfig {
    /// Creates a new ChatConfig with default values.
    ///
    /// Defaults:
    /// - Relay: http://127.0.0.1:3000/api/chat
    /// - Color: enabled
    pub fn new() -> Self {
        Self {
            relay_url: DEFAULT_RELAY_URL.to_string(),
            use_color: true,
        }
    }

    /// Sets the relay endpoint.
    pub fn with_relay_url(mut self, url: impl Into<String>) -> Self {
        self.relay_url = url.into();
        self
    }

    /// Disables ANSI color output.
    pub fn without_color(mut self) -> Self {
        self.use_color = false;
        self
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl From<ChatArgs> for ChatConfig {
    fn from(args: ChatArgs) -> Self {
        ChatConfig {
            relay_url: args
                .relay_url
                .unwrap_or_else(|| DEFAULT_RELAY_URL.to_string()),
            use_color: !args.no_color,
        }
    }
}
