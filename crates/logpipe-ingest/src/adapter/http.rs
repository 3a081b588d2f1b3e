//! JSON-over-HTTP adapter
//!
//! - `POST {base}/summarize` with `{"texts": [...]}` answers `{"summary": "..."}`
//! - `POST {base}/classify` with `{"text": "...", "labels": [...]}` answers `{"label": "..."}`

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{AdapterError, AiAdapter};
use crate::config::AdapterConfig;
use crate::error::{PipelineError, Result};

#[derive(Serialize)]
struct SummarizeRequest<'a> {
    texts: &'a [String],
}

#[derive(Deserialize)]
struct SummarizeResponse {
    summary: String,
}

#[derive(Serialize)]
struct ClassifyRequest<'a> {
    text: &'a str,
    labels: &'a [String],
}

#[derive(Deserialize)]
struct ClassifyResponse {
    label: String,
}

pub struct HttpAdapter {
    client: Client,
    base_url: String,
}

impl HttpAdapter {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PipelineError::config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &AdapterConfig) -> Result<Self> {
        let base_url = config
            .base_url
            .clone()
            .ok_or_else(|| PipelineError::config("LOGPIPE_ADAPTER_URL is not set"))?;
        Self::new(base_url, config.call_timeout())
    }

    async fn post<B, R>(&self, endpoint: &str, body: &B) -> std::result::Result<R, AdapterError>
    where
        B: Serialize + ?Sized,
        R: for<'de> Deserialize<'de>,
    {
        let url = format!("{}/{}", self.base_url, endpoint);

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(classify_request_error)?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            let message = format!("{endpoint} returned {status}: {}", detail.trim());
            return Err(if is_transient_status(status) {
                AdapterError::Transient(message)
            } else {
                AdapterError::Permanent(message)
            });
        }

        response
            .json::<R>()
            .await
            .map_err(|e| AdapterError::permanent(format!("{endpoint} returned an invalid body: {e}")))
    }
}

fn is_transient_status(status: StatusCode) -> bool {
    status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
}

fn classify_request_error(error: reqwest::Error) -> AdapterError {
    if error.is_builder() {
        AdapterError::permanent(error.to_string())
    } else {
        // connect, timeout, and mid-flight failures
        AdapterError::transient(error.to_string())
    }
}

#[async_trait]
impl AiAdapter for HttpAdapter {
    async fn summarize(&self, texts: &[String]) -> std::result::Result<String, AdapterError> {
        let response: SummarizeResponse = self.post("summarize", &SummarizeRequest { texts }).await?;
        Ok(response.summary)
    }

    async fn classify(
        &self,
        text: &str,
        labels: &[String],
    ) -> std::result::Result<String, AdapterError> {
        let response: ClassifyResponse = self.post("classify", &ClassifyRequest { text, labels }).await?;
        Ok(response.label)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::{
        matchers::{body_json, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    fn adapter(server: &MockServer) -> HttpAdapter {
        HttpAdapter::new(format!("{}/", server.uri()), Duration::from_secs(2)).unwrap()
    }

    #[tokio::test]
    async fn test_summarize() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/summarize"))
            .and(body_json(json!({"texts": ["a", "b"]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"summary": "two events"})))
            .expect(1)
            .mount(&server)
            .await;

        let summary = adapter(&server)
            .summarize(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(summary, "two events");
    }

    #[tokio::test]
    async fn test_classify() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/classify"))
            .and(body_json(json!({"text": "disk full", "labels": ["error", "ok"]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"label": "error"})))
            .mount(&server)
            .await;

        let label = adapter(&server)
            .classify("disk full", &["error".to_string(), "ok".to_string()])
            .await
            .unwrap();
        assert_eq!(label, "error");
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let server = MockServer::start().await;
        Mock::given(path("/summarize"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        Mock::given(path("/classify"))
            .respond_with(ResponseTemplate::new(400).set_body_string("labels missing"))
            .mount(&server)
            .await;

        let adapter = adapter(&server);
        assert!(matches!(
            adapter.summarize(&["x".to_string()]).await,
            Err(AdapterError::Transient(_))
        ));
        let err = adapter.classify("x", &["a".to_string()]).await.unwrap_err();
        assert!(matches!(&err, AdapterError::Permanent(msg) if msg.contains("labels missing")));
    }

    #[tokio::test]
    async fn test_throttling_is_transient() {
        let server = MockServer::start().await;
        Mock::given(path("/classify"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let err = adapter(&server).classify("x", &["a".to_string()]).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_invalid_body_is_permanent() {
        let server = MockServer::start().await;
        Mock::given(path("/classify"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let err = adapter(&server).classify("x", &["a".to_string()]).await.unwrap_err();
        assert!(matches!(err, AdapterError::Permanent(_)));
    }

    #[tokio::test]
    async fn test_slow_response_is_transient() {
        let server = MockServer::start().await;
        Mock::given(path("/summarize"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"summary": "late"}))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let adapter = HttpAdapter::new(server.uri(), Duration::from_millis(50)).unwrap();
        assert!(adapter.summarize(&["x".to_string()]).await.unwrap_err().is_transient());
    }

    #[tokio::test]
    async fn test_unreachable_server_is_transient() {
        let adapter = HttpAdapter::new("http://127.0.0.1:1", Duration::from_secs(1)).unwrap();
        assert!(adapter.summarize(&["x".to_string()]).await.unwrap_err().is_transient());
    }

    #[test]
    fn test_missing_url_is_config_error() {
        assert!(matches!(
            HttpAdapter::from_config(&AdapterConfig::default()),
            Err(PipelineError::Config(_))
        ));
    }
}
