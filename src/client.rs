use std::pin::Pin;
use std::time::Duration;

use futures::Stream;
use futures::stream::StreamExt;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Client as ReqwestClient, Response};
use url::Url;

use crate::error::{Error, Result};
use crate::types::ChatRequest;
use crate::wire::{StreamPart, decode_stream};

/// The relay endpoint a chat front end talks to by default.
pub const DEFAULT_RELAY_URL: &str = "http://127.0.0.1:3000/api/chat";

/// Slightly longer than the relay's own ceiling so the relay gets to report
/// its timeout first.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(35);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// The parts of one relay response, in arrival order.
pub type PartStream = Pin<Box<dyn Stream<Item = Result<StreamPart>> + Send>>;

/// Opens reply streams for a conversation.
///
/// Dropping the returned stream abandons the request.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Sends the conversation and returns the reply stream.
    async fn open(&self, request: ChatRequest) -> Result<PartStream>;
}

/// Client for a relay's `POST /api/chat` endpoint.
#[derive(Debug, Clone)]
pub struct RelayClient {
    client: ReqwestClient,
    url: Url,
    timeout: Duration,
}

impl RelayClient {
    /// Create a new client for the relay at `url`.
    pub fn new(url: &str) -> Result<Self> {
        Self::with_options(url, None)
    }

    /// Create a new client with a custom overall timeout.
    pub fn with_options(url: &str, timeout: Option<Duration>) -> Result<Self> {
        let url = Url::parse(url)?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::url(
                format!("relay URL must be http or https, got '{}'", url.scheme()),
                None,
            ));
        }

        let timeout = timeout.unwrap_or(DEFAULT_TIMEOUT);
        let client = ReqwestClient::builder()
            .timeout(timeout)
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .build()
            .map_err(|e| {
                Error::transport(
                    format!("Failed to build HTTP client: {}", e),
                    Some(Box::new(e)),
                )
            })?;

        Ok(Self {
            client,
            url,
            timeout,
        })
    }

    /// The relay endpoint.
    pub fn url(&self) -> &Url {
        &self.url
    }

    fn default_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        headers.insert(header::ACCEPT, HeaderValue::from_static("text/plain"));
        headers
    }

    /// Process relay error responses and convert to our Error type
    async fn process_error_response(response: Response) -> Error {
        let status_code = response.status().as_u16();
        let body = match response.text().await {
            Ok(body) if !body.trim().is_empty() => body,
            Ok(_) => format!("relay answered with status {status_code}"),
            Err(e) => {
                return Error::transport(
                    format!("Failed to read error response: {}", e),
                    Some(Box::new(e)),
                );
            }
        };

        match status_code {
            400 | 413 | 415 | 422 => Error::validation(body, None),
            408 | 504 => Error::timeout(body, None),
            _ => Error::transport_status(body, status_code),
        }
    }
}

#[async_trait::async_trait]
impl Transport for RelayClient {
    async fn open(&self, request: ChatRequest) -> Result<PartStream> {
        let response = self
            .client
            .post(self.url.clone())
            .headers(self.default_headers())
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::timeout(
                        format!("Request timed out: {}", e),
                        Some(self.timeout.as_secs_f64()),
                    )
                } else {
                    Error::transport(
                        format!("Could not reach relay at {}: {}", self.url, e),
                        Some(Box::new(e)),
                    )
                }
            })?;

        if !response.status().is_success() {
            return Err(Self::process_error_response(response).await);
        }

        let bytes = response.bytes_stream().map(|chunk| {
            chunk.map_err(|e| {
                if e.is_timeout() {
                    Error::timeout(format!("Relay stream timed out: {e}"), None)
                } else {
                    Error::transport(format!("Error in relay stream: {e}"), Some(Box::new(e)))
                }
            })
        });
        Ok(Box::pin(decode_stream(bytes)))
    }
}
