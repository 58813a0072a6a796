//! Plain HTTP/1.1 implementation of [`HttpTransport`] on hyper.
//!
//! Opens one connection per exchange, which matches the client's cadence of
//! at most one request per poll interval. Only `http://` URLs are
//! supported; put a TLS-terminating proxy in front for anything else.
//!
//! The per-exchange timeout runs on the transport's [`TimeProvider`], so a
//! host with its own clock can plug it in with [`HyperTransport::with_time`].

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::header::{CONTENT_TYPE, HOST};
use hyper::{Request, Uri};
use hyper_util::rt::TokioIo;
use serde_json::Value;
use tokio::net::TcpStream;

use crate::error::TransportError;
use crate::providers::{TaskProvider, TimeProvider, TokioTaskProvider, TokioTimeProvider};
use crate::transport::{HttpResponse, HttpTransport, PostOptions};

/// HTTP/1.1 transport over tokio TCP streams.
#[derive(Debug, Clone, Default)]
pub struct HyperTransport<TP: TimeProvider = TokioTimeProvider> {
    task: TokioTaskProvider,
    time: TP,
}

impl HyperTransport {
    /// Create a transport timed by tokio's clock.
    pub fn new() -> Self {
        Self::with_time(TokioTimeProvider::new())
    }
}

impl<TP: TimeProvider> HyperTransport<TP> {
    /// Create a transport whose timeouts run on `time`.
    pub fn with_time(time: TP) -> Self {
        Self {
            task: TokioTaskProvider,
            time,
        }
    }

    async fn exchange(&self, url: &str, body: Value) -> Result<HttpResponse, TransportError> {
        let uri = url
            .parse::<Uri>()
            .map_err(|e| network(format!("invalid url '{}': {}", url, e)))?;
        if uri.scheme_str() != Some("http") {
            return Err(network(format!("unsupported url scheme in '{}'", url)));
        }
        let host = uri
            .host()
            .ok_or_else(|| network(format!("missing host in '{}'", url)))?
            .to_string();
        let port = uri.port_u16().unwrap_or(80);
        let authority = uri
            .authority()
            .map(|authority| authority.as_str().to_string())
            .unwrap_or_else(|| host.clone());
        let path = uri
            .path_and_query()
            .map(|path| path.as_str().to_string())
            .unwrap_or_else(|| "/".to_string());

        let stream = TcpStream::connect((host.as_str(), port))
            .await
            .map_err(|e| network(format!("connect to {}:{} failed: {}", host, port, e)))?;
        let (mut sender, connection) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
            .await
            .map_err(|e| network(format!("http handshake failed: {}", e)))?;

        self.task.spawn_task("http_connection", async move {
            if let Err(e) = connection.await {
                tracing::debug!("http connection closed with error: {}", e);
            }
        });

        let payload = serde_json::to_vec(&body)?;
        let request = Request::builder()
            .method("POST")
            .uri(path)
            .header(HOST, authority)
            .header(CONTENT_TYPE, "application/json")
            .body(Full::new(Bytes::from(payload)))
            .map_err(|e| network(format!("failed to build request: {}", e)))?;

        let response = sender
            .send_request(request)
            .await
            .map_err(|e| network(format!("request failed: {}", e)))?;
        let status = response.status().as_u16();
        let bytes = response
            .into_body()
            .collect()
            .await
            .map_err(|e| network(format!("failed to read response body: {}", e)))?
            .to_bytes();

        Ok(HttpResponse::new(status, decode_body(&bytes)))
    }
}

#[async_trait(?Send)]
impl<TP: TimeProvider + 'static> HttpTransport for HyperTransport<TP> {
    async fn post(
        &self,
        url: &str,
        body: Value,
        options: PostOptions,
    ) -> Result<HttpResponse, TransportError> {
        self.time
            .timeout(options.timeout, self.exchange(url, body))
            .await
            .map_err(|_| TransportError::Timeout)?
    }
}

fn network(message: String) -> TransportError {
    TransportError::Network { message }
}

/// Decode a response body: JSON when possible, text otherwise, null when empty.
fn decode_body(bytes: &[u8]) -> Value {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Value::Null;
    }
    serde_json::from_slice(bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_body() {
        assert_eq!(decode_body(b""), Value::Null);
        assert_eq!(decode_body(b"  \n"), Value::Null);
        assert_eq!(decode_body(br#"{"message":"gone"}"#), json!({"message": "gone"}));
        assert_eq!(decode_body(b"Not Found"), json!("Not Found"));
    }

    #[tokio::test]
    async fn test_rejects_unsupported_scheme() {
        let transport = HyperTransport::new();
        let options = PostOptions {
            timeout: Duration::from_secs(1),
        };
        let err = transport
            .post("https://example.invalid/batch", json!({}), options)
            .await
            .expect_err("https is not supported");
        assert!(matches!(err, TransportError::Network { .. }));
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        // Connections land in the backlog; nothing ever answers.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind listener");
        let url = format!("http://{}/batch", listener.local_addr().expect("local addr"));

        let outcome = tokio::task::LocalSet::new()
            .run_until(async {
                HyperTransport::with_time(TokioTimeProvider::new())
                    .post(
                        &url,
                        json!({"key": "abc", "init": true}),
                        PostOptions {
                            timeout: Duration::from_millis(50),
                        },
                    )
                    .await
            })
            .await;

        assert_eq!(outcome, Err(TransportError::Timeout));
        drop(listener);
    }
}
