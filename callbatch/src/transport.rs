//! The HTTP seam and the batch transport built on it.
//!
//! [`HttpTransport`] is the injected capability: POST a JSON body, get back a
//! status and a decoded body. [`BatchTransport`] layers the protocol on top:
//! it encodes init and batch messages, enforces timeouts through the
//! [`TimeProvider`], turns non-success statuses into
//! [`TransportError::Status`], and validates the response envelope.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::error::TransportError;
use crate::providers::TimeProvider;
use crate::wire::{self, BatchPayload, BatchRequest, InitRequest};

/// Per-request options passed to the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PostOptions {
    /// How long the exchange may take.
    pub timeout: Duration,
}

/// A decoded HTTP response.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Decoded JSON body; `Value::Null` when empty.
    pub data: Value,
}

impl HttpResponse {
    /// Build a response.
    pub fn new(status: u16, data: Value) -> Self {
        Self { status, data }
    }

    /// Whether the status is in the 2xx range.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Capability to POST JSON to a URL.
///
/// Implementations may return non-success statuses either as
/// `Ok(HttpResponse)` or as `Err(TransportError::Status)`; both are
/// handled the same way.
#[async_trait(?Send)]
pub trait HttpTransport: 'static {
    /// Send `body` to `url`.
    async fn post(
        &self,
        url: &str,
        body: Value,
        options: PostOptions,
    ) -> Result<HttpResponse, TransportError>;
}

/// Protocol layer over an [`HttpTransport`].
pub struct BatchTransport<T: HttpTransport, TP: TimeProvider> {
    http: T,
    time: TP,
    endpoint: String,
}

impl<T: HttpTransport, TP: TimeProvider> BatchTransport<T, TP> {
    /// Create a batch transport posting to `endpoint`.
    pub fn new(http: T, time: TP, endpoint: impl Into<String>) -> Self {
        Self {
            http,
            time,
            endpoint: endpoint.into(),
        }
    }

    /// Endpoint URL.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Perform the initialization round-trip; returns the raw interval hint.
    pub async fn init(&self, key: &str, timeout: Duration) -> Result<Option<f64>, TransportError> {
        let body = self.exchange(&InitRequest::new(key), timeout).await?;
        wire::parse_init_response(&body)
    }

    /// Send one batch round and parse its payload.
    pub async fn send_batch(
        &self,
        request: &BatchRequest,
        timeout: Duration,
    ) -> Result<BatchPayload, TransportError> {
        tracing::debug!(
            calls = request.calls.len(),
            status_requests = request.status_request_keys.len(),
            completed = request.completed_keys.len(),
            "sending batch round"
        );
        let body = self.exchange(request, timeout).await?;
        wire::parse_batch_response(body)
    }

    async fn exchange<M: Serialize>(
        &self,
        message: &M,
        timeout: Duration,
    ) -> Result<Value, TransportError> {
        let body = serde_json::to_value(message)?;
        let options = PostOptions { timeout };
        let response = self
            .time
            .timeout(timeout, self.http.post(&self.endpoint, body, options))
            .await
            .map_err(|_| TransportError::Timeout)??;

        if !response.is_success() {
            return Err(TransportError::Status {
                status: response.status,
                data: response.data,
            });
        }
        Ok(response.data)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::providers::TokioTimeProvider;
    use serde_json::json;

    #[derive(Clone)]
    struct Canned {
        response: HttpResponse,
        delay: Duration,
        seen: Rc<RefCell<Vec<(String, Value, PostOptions)>>>,
    }

    #[async_trait(?Send)]
    impl HttpTransport for Canned {
        async fn post(
            &self,
            url: &str,
            body: Value,
            options: PostOptions,
        ) -> Result<HttpResponse, TransportError> {
            self.seen.borrow_mut().push((url.to_string(), body, options));
            tokio::time::sleep(self.delay).await;
            Ok(self.response.clone())
        }
    }

    fn canned(status: u16, data: Value, delay: Duration) -> Canned {
        Canned {
            response: HttpResponse::new(status, data),
            delay,
            seen: Rc::new(RefCell::new(Vec::new())),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_init_posts_init_message() {
        let http = canned(200, json!({"data": {"intervalMs": 900}}), Duration::ZERO);
        let seen = http.seen.clone();
        let transport = BatchTransport::new(http, TokioTimeProvider::new(), "http://h/batch");

        let interval = transport
            .init("abc", Duration::from_secs(5))
            .await
            .expect("init");

        assert_eq!(interval, Some(900.0));
        let seen = seen.borrow();
        assert_eq!(seen[0].0, "http://h/batch");
        assert_eq!(seen[0].1, json!({"key": "abc", "init": true}));
        assert_eq!(seen[0].2.timeout, Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_success_status_becomes_error() {
        let http = canned(404, json!({"message": "gone"}), Duration::ZERO);
        let transport = BatchTransport::new(http, TokioTimeProvider::new(), "http://h/batch");

        let err = transport
            .init("abc", Duration::from_secs(5))
            .await
            .expect_err("404 must fail");
        assert_eq!(err.status(), Some(404));
        assert_eq!(err.server_message().as_deref(), Some("gone"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_transport_times_out() {
        let http = canned(200, json!({"results": []}), Duration::from_secs(10));
        let transport = BatchTransport::new(http, TokioTimeProvider::new(), "http://h/batch");
        let request = BatchRequest {
            key: "abc".to_string(),
            completed_keys: Vec::new(),
            status_request_keys: Vec::new(),
            calls: Vec::new(),
        };

        let err = transport
            .send_batch(&request, Duration::from_secs(1))
            .await
            .expect_err("must time out");
        assert_eq!(err, TransportError::Timeout);
    }
}
