//! Google Gemini `generateContent` client.
//!
//! One call per prompt, no streaming. The API key travels in the
//! `x-goog-api-key` header so it never shows up in URLs or reqwest error text.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Provider, ProviderError, Result};

/// Default public endpoint.
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Default model: fast, with comparatively generous free-tier limits.
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

const API_KEY_HEADER: &str = "x-goog-api-key";

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    contents: [Content<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: [Part<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

/// Google error envelope: `{"error":{"code":429,"message":"...","status":"RESOURCE_EXHAUSTED"}}`
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
    status: Option<String>,
}

/// Gemini provider backed by a shared reqwest client.
pub struct GeminiProvider {
    client: reqwest::Client,
    base_url: String,
    model: String,
    timeout: Duration,
}

impl GeminiProvider {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            model: model.into(),
            timeout,
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        )
    }

    async fn call(&self, api_key: &str, prompt: &str) -> Result<String> {
        let body = GenerateRequest {
            contents: [Content {
                parts: [Part { text: prompt }],
            }],
        };

        let response = self
            .client
            .post(self.endpoint())
            .header(API_KEY_HEADER, api_key)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Http(e.without_url().to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ProviderError::Http(e.without_url().to_string()))?;

        if !status.is_success() {
            return Err(status_error(status.as_u16(), &text));
        }

        let parsed: GenerateResponse = serde_json::from_str(&text)
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        extract_text(parsed)
    }
}

impl Provider for GeminiProvider {
    fn id(&self) -> &str {
        "gemini"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn generate<'a>(
        &'a self,
        api_key: &'a str,
        prompt: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>> {
        Box::pin(self.call(api_key, prompt))
    }
}

/// Build a `Status` error, lifting message and status token out of the
/// Google error envelope when the body has one.
fn status_error(status: u16, body: &str) -> ProviderError {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => ProviderError::Status {
            status,
            message: envelope
                .error
                .message
                .unwrap_or_else(|| format!("HTTP {status}")),
            reason: envelope.error.status,
        },
        Err(_) => {
            debug!(status, "provider error body is not a Google error envelope");
            let message = if body.trim().is_empty() {
                format!("HTTP {status}")
            } else {
                body.chars().take(500).collect()
            };
            ProviderError::Status {
                status,
                message,
                reason: None,
            }
        }
    }
}

/// Concatenate the text parts of the first candidate.
fn extract_text(response: GenerateResponse) -> Result<String> {
    let text: String = response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|p| p.text)
                .collect::<String>()
        })
        .unwrap_or_default();

    if text.is_empty() {
        return Err(ProviderError::EmptyResponse);
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ErrorClassification, classify_error};
    use axum::http::{HeaderMap, StatusCode};
    use tokio::net::TcpListener;

    /// Start a mock Gemini endpoint that answers every request with `status` and `body`.
    async fn start_mock(status: StatusCode, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let app = axum::Router::new().fallback(move || async move {
                (
                    status,
                    [(axum::http::header::CONTENT_TYPE, "application/json")],
                    body,
                )
            });
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    /// Mock that echoes the API key header and the prompt back as model text.
    async fn start_echo_mock() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let app = axum::Router::new().fallback(
                |uri: axum::http::Uri, headers: HeaderMap, body: String| async move {
                    let request: serde_json::Value = serde_json::from_str(&body).unwrap();
                    let key = headers
                        .get(API_KEY_HEADER)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("")
                        .to_string();
                    let echoed = format!(
                        "{}|{}|{}",
                        uri.path(),
                        key,
                        request["contents"][0]["parts"][0]["text"].as_str().unwrap()
                    );
                    axum::Json(serde_json::json!({
                        "candidates": [{"content": {"parts": [{"text": echoed}]}}]
                    }))
                },
            );
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn provider(base_url: &str) -> GeminiProvider {
        GeminiProvider::new(
            reqwest::Client::new(),
            base_url,
            DEFAULT_MODEL,
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn sends_key_header_prompt_and_model_path() {
        let url = start_echo_mock().await;
        let text = provider(&url)
            .generate("AIza-test-key", "review this")
            .await
            .unwrap();
        assert_eq!(
            text,
            "/v1beta/models/gemini-2.0-flash:generateContent|AIza-test-key|review this"
        );
    }

    #[tokio::test]
    async fn concatenates_text_parts_of_first_candidate() {
        let url = start_mock(
            StatusCode::OK,
            r#"{"candidates":[{"content":{"parts":[{"text":"{\"score\":"},{"text":"8}"}]}},{"content":{"parts":[{"text":"ignored"}]}}]}"#,
        )
        .await;
        let text = provider(&url).generate("k", "p").await.unwrap();
        assert_eq!(text, r#"{"score":8}"#);
    }

    #[tokio::test]
    async fn quota_error_is_classified_as_rate_limited() {
        let url = start_mock(
            StatusCode::TOO_MANY_REQUESTS,
            r#"{"error":{"code":429,"message":"Resource has been exhausted (e.g. check quota).","status":"RESOURCE_EXHAUSTED"}}"#,
        )
        .await;
        let err = provider(&url).generate("k", "p").await.unwrap_err();
        match &err {
            ProviderError::Status {
                status,
                message,
                reason,
            } => {
                assert_eq!(*status, 429);
                assert!(message.contains("exhausted"));
                assert_eq!(reason.as_deref(), Some("RESOURCE_EXHAUSTED"));
            }
            other => panic!("expected Status error, got {other:?}"),
        }
        assert_eq!(classify_error(&err), ErrorClassification::RateLimited);
    }

    #[tokio::test]
    async fn invalid_key_error_is_other() {
        let url = start_mock(
            StatusCode::BAD_REQUEST,
            r#"{"error":{"code":400,"message":"API key not valid. Please pass a valid API key.","status":"INVALID_ARGUMENT"}}"#,
        )
        .await;
        let err = provider(&url).generate("bad", "p").await.unwrap_err();
        assert_eq!(classify_error(&err), ErrorClassification::Other);
    }

    #[tokio::test]
    async fn non_json_error_body_is_kept_as_message() {
        let url = start_mock(StatusCode::BAD_GATEWAY, "upstream connect error").await;
        let err = provider(&url).generate("k", "p").await.unwrap_err();
        assert_eq!(err.to_string(), "provider returned 502: upstream connect error");
    }

    #[tokio::test]
    async fn no_candidates_is_empty_response() {
        let url = start_mock(StatusCode::OK, r#"{"candidates":[]}"#).await;
        let err = provider(&url).generate("k", "p").await.unwrap_err();
        assert!(matches!(err, ProviderError::EmptyResponse));
    }

    #[tokio::test]
    async fn malformed_success_body_is_invalid_response() {
        let url = start_mock(StatusCode::OK, "not json").await;
        let err = provider(&url).generate("k", "p").await.unwrap_err();
        assert!(matches!(err, ProviderError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_http_error() {
        let err = provider("http://127.0.0.1:1")
            .generate("k", "p")
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Http(_)));
        assert_eq!(classify_error(&err), ErrorClassification::Other);
    }

    #[test]
    fn endpoint_trims_trailing_slash() {
        let p = provider("https://example.test/");
        assert_eq!(
            p.endpoint(),
            "https://example.test/v1beta/models/gemini-2.0-flash:generateContent"
        );
    }
}
