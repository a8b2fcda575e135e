//! Configuration for the relay server.
//!
//! Settings come from an optional YAML file, then from the command line,
//! with command-line values taking precedence.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use arrrg_derive::CommandLine;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::provider::{DEFAULT_MODEL, Gemini, Provider, ScriptedProvider};
use crate::relay::MAX_CEILING;

/// Address the relay listens on by default.
pub const DEFAULT_BIND: &str = "127.0.0.1:3000";

const DEFAULT_MAX_DURATION_SECS: u64 = 30;
const ECHO_DELAY: Duration = Duration::from_millis(40);

/// Command-line arguments for the relaychat-relay server.
#[derive(CommandLine, Debug, Default, PartialEq, Eq)]
pub struct RelayArgs {
    /// Address to listen on.
    #[arrrg(optional, "Address to listen on (default: 127.0.0.1:3000)", "ADDR")]
    pub bind: Option<String>,

    /// Model to forward conversations to.
    #[arrrg(optional, "Model to use (default: gemini-2.0-flash)", "MODEL")]
    pub model: Option<String>,

    /// Execution ceiling per stream.
    #[arrrg(optional, "Execution ceiling per stream in seconds (default: 30)", "SECS")]
    pub max_duration_secs: Option<u64>,

    /// Override the provider's base URL.
    #[arrrg(optional, "Base URL of the provider API", "URL")]
    pub provider_url: Option<String>,

    /// YAML file with relay settings.
    #[arrrg(optional, "YAML configuration file", "PATH")]
    pub config: Option<String>,

    /// Answer with a local echo instead of calling a provider.
    #[arrrg(flag, "Echo messages back instead of calling the provider")]
    pub scripted: bool,
}

/// Resolved relay settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RelayConfig {
    /// Address to listen on.
    pub bind: SocketAddr,

    /// Model to forward conversations to.
    pub model: String,

    /// Execution ceiling per stream, in seconds.
    pub max_duration_secs: u64,

    /// Base URL of the provider API, when not the public endpoint.
    pub provider_url: Option<String>,

    /// Echo messages back instead of calling a provider.
    pub scripted: bool,
}

impl RelayConfig {
    /// Creates a RelayConfig with default values.
    ///
    /// Defaults:
    /// - Bind: 127.0.0.1:3000
    /// - Model: gemini-2.0-flash
    /// - Ceiling: 30 seconds
    pub fn new() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 3000)),
            model: DEFAULT_MODEL.to_string(),
            max_duration_secs: DEFAULT_MAX_DURATION_SECS,
            provider_url: None,
            scripted: false,
        }
    }

    /// Loads settings from a YAML file. Missing keys keep their defaults.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::io(format!("Failed to read config {}: {e}", path.display()), e)
        })?;
        Self::from_yaml(&text)
    }

    /// Parses settings from YAML text.
    pub fn from_yaml(text: &str) -> Result<Self> {
        let config: RelayConfig = serde_yaml::from_str(text)?;
        config.validate()
    }

    /// Sets the listen address.
    pub fn with_bind(mut self, bind: SocketAddr) -> Self {
        self.bind = bind;
        self
    }

    /// Sets the model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Sets the execution ceiling.
    pub fn with_max_duration_secs(mut self, secs: u64) -> Self {
        self.max_duration_secs = secs;
        self
    }

    /// Sets the provider base URL.
    pub fn with_provider_url(mut self, url: Option<String>) -> Self {
        self.provider_url = url;
        self
    }

    /// Sets whether to echo instead of calling a provider.
    pub fn with_scripted(mut self, scripted: bool) -> Self {
        self.scripted = scripted;
        self
    }

    /// The execution ceiling.
    pub fn max_duration(&self) -> Duration {
        Duration::from_secs(self.max_duration_secs)
    }

    /// Builds the provider these settings describe.
    ///
    /// The Gemini provider reads its key from the environment.
    pub fn provider(&self) -> Result<Arc<dyn Provider>> {
        if self.scripted {
            return Ok(Arc::new(ScriptedProvider::echo(ECHO_DELAY)));
        }
        let gemini =
            Gemini::with_options(None, self.provider_url.clone(), Some(self.model.clone()))?;
        Ok(Arc::new(gemini))
    }

    fn validate(self) -> Result<Self> {
        if self.max_duration_secs == 0 {
            return Err(Error::config("max_duration_secs must be at least 1"));
        }
        if self.max_duration_secs > MAX_CEILING.as_secs() {
            return Err(Error::config(format!(
                "max_duration_secs must be at most {}",
                MAX_CEILING.as_secs()
            )));
        }
        if self.model.trim().is_empty() {
            return Err(Error::config("model must not be empty"));
        }
        Ok(self)
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl TryFrom<RelayArgs> for RelayConfig {
    type Error = Error;

    fn try_from(args: RelayArgs) -> Result<Self> {
        let mut config = match &args.config {
            Some(path) => RelayConfig::from_yaml_file(path)?,
            None => RelayConfig::new(),
        };
        if let Some(bind) = args.bind {
            let bind = bind
                .parse()
                .map_err(|_| Error::config(format!("invalid bind address '{bind}'")))?;
            config = config.with_bind(bind);
        }
        if let Some(model) = args.model {
            config = config.with_model(model);
        }
        if let Some(secs) = args.max_duration_secs {
            config = config.with_max_duration_secs(secs);
        }
        if args.provider_url.is_some() {
            config = config.with_provider_url(args.provider_url);
        }
        if args.scripted {
            config = config.with_scripted(true);
        }
        config.validate()
    }
}
