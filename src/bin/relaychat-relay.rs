//! HTTP relay that streams model replies to chat sessions.
//!
//! # Usage
//!
//! ```bash
//! # Relay to Gemini (reads GOOGLE_GENERATIVE_AI_API_KEY)
//! relaychat-relay
//!
//! # Listen elsewhere with a shorter ceiling
//! relaychat-relay --bind 0.0.0.0:8080 --max-duration-secs 10
//!
//! # Echo messages back without calling a provider
//! relaychat-relay --scripted
//!
//! # Load settings from YAML; flags still win
//! relaychat-relay --config relay.yaml
//! ```
//!
//! Log verbosity follows `RUST_LOG` (default `info`).

use std::sync::Arc;

use arrrg::CommandLine;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use relaychat::relay::{CHAT_PATH, RelayArgs, RelayConfig};
use relaychat::Relay;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let (args, _) = RelayArgs::from_command_line_relaxed("relaychat-relay [OPTIONS]");
    let config = RelayConfig::try_from(args)?;

    let provider = config.provider()?;
    let relay = Relay::new(provider).with_max_duration(config.max_duration());
    tracing::info!(
        provider = relay.provider_name(),
        max_duration = ?relay.max_duration(),
        "relay configured"
    );

    let listener = TcpListener::bind(config.bind).await?;
    tracing::info!(addr = %listener.local_addr()?, path = CHAT_PATH, "relay listening");
    relaychat::relay::serve(listener, Arc::new(relay)).await?;
    Ok(())
}
