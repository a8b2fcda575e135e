use std::env;
use std::time::Duration;

use futures::StreamExt;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Client as ReqwestClient, Response};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::observability::{PROVIDER_ERRORS, PROVIDER_REQUESTS};
use crate::provider::{
    AttachmentResolver, ContentPart, FragmentStream, Provider, ResolvedMessage,
};
use crate::sse::process_sse;
use crate::types::{ChatMessage, MessageRole};

const DEFAULT_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta/";
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// The model used when none is configured.
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

/// Environment variable holding the API key.
pub const API_KEY_ENV: &str = "GOOGLE_GENERATIVE_AI_API_KEY";

/// Streams replies from Google's Gemini `streamGenerateContent` endpoint.
///
/// The client sets no overall request timeout: the relay's execution
/// ceiling bounds each stream instead.
#[derive(Debug, Clone)]
pub struct Gemini {
    api_key: String,
    client: ReqwestClient,
    base_url: String,
    model: String,
    resolver: AttachmentResolver,
}

impl Gemini {
    /// Create a new Gemini provider.
    ///
    /// The API key can be provided directly or read from the
    /// GOOGLE_GENERATIVE_AI_API_KEY environment variable.
    pub fn new(api_key: Option<String>) -> Result<Self> {
        Self::with_options(api_key, None, None)
    }

    /// Create a new provider with a custom endpoint and model.
    pub fn with_options(
        api_key: Option<String>,
        base_url: Option<String>,
        model: Option<String>,
    ) -> Result<Self> {
        let api_key = match api_key {
            Some(key) => key,
            None => env::var(API_KEY_ENV).map_err(|_| {
                Error::config(format!(
                    "API key not provided and {API_KEY_ENV} environment variable not set"
                ))
            })?,
        };
        HeaderValue::from_str(&api_key)
            .map_err(|_| Error::config("API key contains characters not allowed in a header"))?;

        let client = ReqwestClient::builder()
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .build()
            .map_err(|e| {
                Error::transport(
                    format!("Failed to build HTTP client: {}", e),
                    Some(Box::new(e)),
                )
            })?;

        let mut base_url = base_url.unwrap_or_else(|| DEFAULT_API_URL.to_string());
        if !base_url.ends_with('/') {
            base_url.push('/');
        }

        Ok(Self {
            api_key,
            resolver: AttachmentResolver::new(client.clone()),
            client,
            base_url,
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        })
    }

    /// The model replies are generated with.
    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!(
            "{}models/{}:streamGenerateContent?alt=sse",
            self.base_url, self.model
        )
    }

    /// Create and return default headers for API requests.
    fn default_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        headers.insert(header::ACCEPT, HeaderValue::from_static("text/event-stream"));
        let key = HeaderValue::from_str(&self.api_key)
            .map_err(|_| Error::config("API key contains characters not allowed in a header"))?;
        headers.insert("x-goog-api-key", key);
        Ok(headers)
    }

    /// Process API response errors and convert to our Error type
    async fn process_error_response(response: Response) -> Error {
        let status_code = response.status().as_u16();

        #[derive(Deserialize)]
        struct ErrorResponse {
            error: Option<ApiError>,
        }

        let error_body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                return Error::transport(
                    format!("Failed to read error response: {}", e),
                    Some(Box::new(e)),
                );
            }
        };

        let message = serde_json::from_str::<ErrorResponse>(&error_body)
            .ok()
            .and_then(|e| e.error)
            .map(|e| e.message)
            .unwrap_or(error_body);

        match status_code {
            408 | 504 => Error::timeout(message, None),
            _ => Error::provider(message, Some(status_code)),
        }
    }
}

#[async_trait::async_trait]
impl Provider for Gemini {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn stream(&self, messages: Vec<ChatMessage>) -> Result<FragmentStream> {
        PROVIDER_REQUESTS.click();
        let resolved = self.resolver.resolve(&messages).await?;
        let body = GenerateContentRequest::from_messages(&resolved);

        let response = self
            .client
            .post(self.endpoint())
            .headers(self.default_headers()?)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                PROVIDER_ERRORS.click();
                Error::from(e)
            })?;

        if !response.status().is_success() {
            PROVIDER_ERRORS.click();
            return Err(Self::process_error_response(response).await);
        }
        tracing::debug!(model = %self.model, "gemini stream opened");

        let fragments = process_sse(response.bytes_stream()).filter_map(|event| async move {
            match event {
                Ok(data) => chunk_text(&data).transpose(),
                Err(e) => Some(Err(e)),
            }
        });
        Ok(Box::pin(fragments))
    }
}

/// Extracts the text carried by one streamed `GenerateContentResponse`.
fn chunk_text(data: &str) -> Result<Option<String>> {
    let chunk: GenerateContentResponse = serde_json::from_str(data)?;
    if let Some(error) = chunk.error {
        PROVIDER_ERRORS.click();
        return Err(Error::provider(error.message, error.code));
    }
    if let Some(reason) = chunk.prompt_feedback.and_then(|f| f.block_reason) {
        PROVIDER_ERRORS.click();
        return Err(Error::provider(format!("prompt blocked: {reason}"), None));
    }
    let text: String = chunk
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|part| part.text)
                .collect()
        })
        .unwrap_or_default();
    if text.is_empty() {
        Ok(None)
    } else {
        Ok(Some(text))
    }
}

#[derive(Debug, Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
}

impl GenerateContentRequest {
    fn from_messages(messages: &[ResolvedMessage]) -> Self {
        let contents = messages
            .iter()
            .filter(|m| !m.parts.is_empty())
            .map(|m| Content {
                role: Some(
                    match m.role {
                        MessageRole::User => "user",
                        MessageRole::Assistant => "model",
                    }
                    .to_string(),
                ),
                parts: m.parts.iter().map(Part::from).collect(),
            })
            .collect();
        Self { contents }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    inline_data: Option<Blob>,
}

impl From<&ContentPart> for Part {
    fn from(part: &ContentPart) -> Self {
        match part {
            ContentPart::Text(text) => Part {
                text: Some(text.clone()),
                inline_data: None,
            },
            ContentPart::Inline { mime_type, data } => Part {
                text: None,
                inline_data: Some(Blob {
                    mime_type: mime_type.clone(),
                    data: data.clone(),
                }),
            },
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Blob {
    mime_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: Option<u16>,
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn provider_creation() {
        let provider = Gemini::new(Some("test-key".to_string())).unwrap();
        assert_eq!(provider.api_key, "test-key");
        assert_eq!(provider.model(), DEFAULT_MODEL);
        assert_eq!(
            provider.endpoint(),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:streamGenerateContent?alt=sse"
        );

        let provider = Gemini::with_options(
            Some("test-key".to_string()),
            Some("http://localhost:9000/v1".to_string()),
            Some("gemini-1.5-pro".to_string()),
        )
        .unwrap();
        assert_eq!(
            provider.endpoint(),
            "http://localhost:9000/v1/models/gemini-1.5-pro:streamGenerateContent?alt=sse"
        );
    }

    #[test]
    fn request_uses_gemini_roles_and_parts() {
        let messages = vec![
            ResolvedMessage {
                role: MessageRole::User,
                parts: vec![
                    ContentPart::Text("what is this?".to_string()),
                    ContentPart::Inline {
                        mime_type: "image/png".to_string(),
                        data: "AAEC".to_string(),
                    },
                ],
            },
            ResolvedMessage {
                role: MessageRole::Assistant,
                parts: Vec::new(),
            },
            ResolvedMessage {
                role: MessageRole::Assistant,
                parts: vec![ContentPart::Text("a cat".to_string())],
            },
        ];
        let body = serde_json::to_value(GenerateContentRequest::from_messages(&messages)).unwrap();
        assert_eq!(
            body,
            json!({
                "contents": [
                    {
                        "role": "user",
                        "parts": [
                            {"text": "what is this?"},
                            {"inlineData": {"mimeType": "image/png", "data": "AAEC"}}
                        ]
                    },
                    {"role": "model", "parts": [{"text": "a cat"}]}
                ]
            })
        );
    }

    #[test]
    fn chunk_text_concatenates_parts() {
        let data = r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"Hel"},{"text":"lo"}]}}]}"#;
        assert_eq!(chunk_text(data).unwrap(), Some("Hello".to_string()));
    }

    #[test]
    fn chunk_text_skips_empty_chunks() {
        let data = r#"{"candidates":[{"finishReason":"STOP"}],"usageMetadata":{"totalTokenCount":3}}"#;
        assert_eq!(chunk_text(data).unwrap(), None);
    }

    #[test]
    fn chunk_text_reports_errors() {
        let data = r#"{"error":{"code":429,"message":"quota","status":"RESOURCE_EXHAUSTED"}}"#;
        let err = chunk_text(data).unwrap_err();
        assert!(err.is_provider());
        assert_eq!(err.status_code(), Some(429));

        let data = r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#;
        assert!(chunk_text(data).unwrap_err().to_string().contains("SAFETY"));
    }
}
