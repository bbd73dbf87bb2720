//! Generic HTTP webhook sink.
//!
//! Delivers each event as a JSON body to a configured endpoint with
//! optional custom headers and a layout.

use std::collections::HashMap;

use herald_core::EnrichedEvent;

use crate::layout::{encode, Layout};
use crate::traits::{Sink, SinkError};

/// Delivers events as JSON over HTTP to a configured endpoint.
///
/// URL and header values are taken verbatim. `${VAR_NAME}` references were
/// already expanded once, when the configuration document was loaded.
#[derive(Debug)]
pub struct WebhookSink {
    url: reqwest::Url,
    /// HTTP method (defaults to POST).
    method: reqwest::Method,
    /// Custom headers to include on every request.
    headers: HashMap<String, String>,
    layout: Option<Layout>,
    /// Shared HTTP client (connection pooling).
    client: reqwest::Client,
}

impl WebhookSink {
    /// Create a new webhook sink.
    ///
    /// An unparseable URL produces a [`SinkError::Config`] error.
    /// `method` defaults to `POST` when `None`.
    pub fn new(
        url: &str,
        method: Option<reqwest::Method>,
        headers: HashMap<String, String>,
        layout: Option<Layout>,
    ) -> Result<Self, SinkError> {
        let url = reqwest::Url::parse(url)
            .map_err(|e| SinkError::Config(format!("invalid webhook endpoint {url:?}: {e}")))?;

        Ok(Self {
            url,
            method: method.unwrap_or(reqwest::Method::POST),
            headers,
            layout,
            client: reqwest::Client::new(),
        })
    }

    /// Construct from config-level primitives.
    ///
    /// `method` is parsed case-insensitively (e.g. `"POST"`, `"put"`).
    pub fn from_config(
        url: &str,
        method: Option<&str>,
        headers: HashMap<String, String>,
        layout: Option<Layout>,
    ) -> Result<Self, SinkError> {
        let parsed_method = match method {
            Some(m) => Some(
                m.to_uppercase()
                    .parse::<reqwest::Method>()
                    .map_err(|_| SinkError::Config(format!("invalid HTTP method: {m}")))?,
            ),
            None => None,
        };

        Self::new(url, parsed_method, headers, layout)
    }
}

#[async_trait::async_trait]
impl Sink for WebhookSink {
    async fn send(&self, event: &EnrichedEvent) -> Result<(), SinkError> {
        let body = serde_json::to_vec(&encode(event, self.layout.as_ref(), false)?)?;

        let mut request = self
            .client
            .request(self.method.clone(), self.url.clone())
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body);

        for (key, value) in &self.headers {
            request = request.header(key.as_str(), value.as_str());
        }

        let response = request.send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            tracing::warn!(
                url = %self.url,
                %status,
                body = %body,
                "webhook returned non-2xx status"
            );
            return Err(SinkError::Status {
                status: status.as_u16(),
                body,
            });
        }

        tracing::debug!(
            url = %self.url,
            method = %self.method,
            status = %status,
            "webhook event delivered"
        );

        Ok(())
    }

    fn kind(&self) -> &str {
        "webhook"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};
    use herald_core::RawEvent;
    use std::sync::{Arc, Mutex};

    #[test]
    fn from_config_default_method() {
        let sink = WebhookSink::from_config("https://example.com", None, HashMap::new(), None).unwrap();
        assert_eq!(sink.method, reqwest::Method::POST);
    }

    #[test]
    fn from_config_case_insensitive_method() {
        let sink =
            WebhookSink::from_config("https://example.com", Some("put"), HashMap::new(), None).unwrap();
        assert_eq!(sink.method, reqwest::Method::PUT);
    }

    #[test]
    fn from_config_invalid_method() {
        let result =
            WebhookSink::from_config("https://example.com", Some("NOT_A_METHOD\0"), HashMap::new(), None);
        assert!(matches!(result, Err(SinkError::Config(_))));
    }

    #[test]
    fn values_are_taken_verbatim() {
        std::env::set_var("HERALD_WH_API_KEY", "secret-key-123");
        let headers = HashMap::from([("X-Api-Key".to_string(), "${HERALD_WH_API_KEY}".to_string())]);
        let sink =
            WebhookSink::from_config("https://example.com/a${b}", None, headers, None).unwrap();
        assert_eq!(sink.headers["X-Api-Key"], "${HERALD_WH_API_KEY}");
        assert!(sink.url.as_str().starts_with("https://example.com/a"));
        std::env::remove_var("HERALD_WH_API_KEY");
    }

    #[test]
    fn empty_endpoint_is_config_error() {
        let result = WebhookSink::from_config("", None, HashMap::new(), None);
        match result.unwrap_err() {
            SinkError::Config(msg) => assert!(msg.contains("invalid webhook endpoint")),
            other => panic!("expected Config error, got: {other:?}"),
        }
    }

    type Captured = Arc<Mutex<Vec<(Option<String>, serde_json::Value)>>>;

    async fn receive(
        State(captured): State<Captured>,
        headers: HeaderMap,
        Json(body): Json<serde_json::Value>,
    ) -> StatusCode {
        let token = headers
            .get("x-token")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        captured.lock().unwrap().push((token, body));
        StatusCode::NO_CONTENT
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn posts_event_json_with_headers() {
        let captured: Captured = Arc::default();
        let base = serve(
            Router::new()
                .route("/hook", post(receive))
                .with_state(captured.clone()),
        )
        .await;

        let headers = HashMap::from([("X-Token".to_string(), "abc".to_string())]);
        let sink = WebhookSink::from_config(&format!("{base}/hook"), None, headers, None).unwrap();

        let mut raw = RawEvent::default();
        raw.reason = "OOMKilled".to_string();
        sink.send(&EnrichedEvent::new(raw, false)).await.unwrap();

        let got = captured.lock().unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].0.as_deref(), Some("abc"));
        assert_eq!(got[0].1["reason"], "OOMKilled");
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let base = serve(Router::new().route(
            "/hook",
            post(|| async { (StatusCode::SERVICE_UNAVAILABLE, "overloaded") }),
        ))
        .await;

        let sink = WebhookSink::from_config(&format!("{base}/hook"), None, HashMap::new(), None).unwrap();
        match sink.send(&EnrichedEvent::new(RawEvent::default(), false)).await {
            Err(SinkError::Status { status, body }) => {
                assert_eq!(status, 503);
                assert_eq!(body, "overloaded");
            }
            other => panic!("expected Status error, got {other:?}"),
        }
    }
}
