use std::convert::Infallible;
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::header::{CONTENT_TYPE, HeaderName};
use axum::http::{HeaderValue, StatusCode};
use axum::Json;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use bytes::Bytes;
use futures::StreamExt;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

use crate::error::Result;
use crate::relay::Relay;
use crate::types::ChatRequest;

/// Route the relay answers on.
pub const CHAT_PATH: &str = "/api/chat";

/// Builds the relay's HTTP routes.
pub fn router(relay: Arc<Relay>) -> Router {
    Router::new()
        .route(CHAT_PATH, post(chat_handler))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers(Any)
                .allow_methods(Any),
        )
        .with_state(relay)
}

/// Serves the relay on `listener` until the server fails.
pub async fn serve(listener: TcpListener, relay: Arc<Relay>) -> Result<()> {
    let app = router(relay);
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

/// POST /api/chat
async fn chat_handler(
    State(relay): State<Arc<Relay>>,
    payload: std::result::Result<Json<ChatRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(request) => request,
        Err(rejection) => {
            tracing::debug!(error = %rejection.body_text(), "rejected chat request");
            return rejection.into_response();
        }
    };

    let parts = match relay.stream(request) {
        Ok(parts) => parts,
        Err(err) => {
            return (StatusCode::UNPROCESSABLE_ENTITY, err.message().to_string()).into_response();
        }
    };

    let body = Body::from_stream(parts.map(|part| Ok::<_, Infallible>(Bytes::from(part.encode()))));
    (
        [
            (
                CONTENT_TYPE,
                HeaderValue::from_static("text/plain; charset=utf-8"),
            ),
            (
                HeaderName::from_static("x-vercel-ai-data-stream"),
                HeaderValue::from_static("v1"),
            ),
        ],
        body,
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ScriptedProvider;

    #[tokio::test]
    async fn serves_a_data_stream() {
        let relay = Arc::new(Relay::new(Arc::new(ScriptedProvider::from_fragments([
            "Hi", " there",
        ]))));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, relay));

        let response = reqwest::Client::new()
            .post(format!("http://{addr}{CHAT_PATH}"))
            .json(&serde_json::json!({
                "messages": [{"role": "user", "content": "hello"}]
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(
            response.headers()["content-type"],
            "text/plain; charset=utf-8"
        );
        assert_eq!(response.headers()["x-vercel-ai-data-stream"], "v1");

        let body = response.text().await.unwrap();
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("f:"));
        assert_eq!(lines[1], "0:\"Hi\"");
        assert_eq!(lines[2], "0:\" there\"");
        assert_eq!(lines[3], "d:{\"finishReason\":\"stop\"}");
    }

    #[tokio::test]
    async fn rejects_bad_requests() {
        let relay = Arc::new(Relay::new(Arc::new(ScriptedProvider::new())));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, relay));
        let url = format!("http://{addr}{CHAT_PATH}");
        let client = reqwest::Client::new();

        let response = client
            .post(&url)
            .header("content-type", "application/json")
            .body("{not json")
            .send()
            .await
            .unwrap();
        assert!(response.status().is_client_error());

        let response = client
            .post(&url)
            .json(&serde_json::json!({"messages": [{"role": "user", "content": " "}]}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 422);
    }
}
