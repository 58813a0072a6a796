//! Shared harness for client integration tests.
//!
//! [`MockTransport`] hands every POST to the test as an [`Exchange`]; the
//! test inspects the body and decides the response. Tests run on a
//! current-thread runtime with a paused clock inside a `LocalSet`, so poll
//! and retry delays elapse instantly but remain measurable.

#![allow(dead_code)]

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use callbatch::{
    BatchClient, ClientConfig, ClientState, HttpResponse, HttpTransport, PostOptions,
    TokioProviders, TransportError,
};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};

/// Client type used throughout the tests.
pub type TestClient = BatchClient<TokioProviders, MockTransport>;

/// Run `future` on a paused-clock, single-threaded runtime.
pub fn run_local<F: Future<Output = ()>>(future: F) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .start_paused(true)
        .build()
        .expect("Failed to build local runtime");
    tokio::task::LocalSet::new().block_on(&runtime, future);
}

/// One request captured by the mock transport.
pub struct Exchange {
    pub url: String,
    pub body: Value,
    pub options: PostOptions,
    reply: oneshot::Sender<Result<HttpResponse, TransportError>>,
}

impl Exchange {
    pub fn is_init(&self) -> bool {
        self.body.get("init") == Some(&json!(true))
    }

    pub fn key(&self) -> Option<&str> {
        self.body.get("key").and_then(Value::as_str)
    }

    pub fn call_keys(&self) -> Vec<String> {
        self.body["calls"]
            .as_array()
            .map(|calls| {
                calls
                    .iter()
                    .filter_map(|call| call["requestKey"].as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn call_methods(&self) -> Vec<String> {
        self.body["calls"]
            .as_array()
            .map(|calls| {
                calls
                    .iter()
                    .filter_map(|call| call["method"].as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn status_keys(&self) -> Vec<String> {
        string_list(&self.body["statusRequestKeys"])
    }

    pub fn completed_keys(&self) -> Vec<String> {
        string_list(&self.body["completedKeys"])
    }

    pub fn respond(self, status: u16, data: Value) {
        let _ = self.reply.send(Ok(HttpResponse::new(status, data)));
    }

    pub fn fail(self, error: TransportError) {
        let _ = self.reply.send(Err(error));
    }
}

fn string_list(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

/// Transport half handed to the client.
#[derive(Clone)]
pub struct MockTransport {
    tx: mpsc::UnboundedSender<Exchange>,
}

/// Test half receiving the client's requests.
pub struct MockServer {
    rx: mpsc::UnboundedReceiver<Exchange>,
}

impl MockServer {
    /// Wait for the next request; the paused clock advances while waiting.
    pub async fn next(&mut self) -> Exchange {
        self.rx.recv().await.expect("client dropped the transport")
    }

    /// Next request if one was already sent.
    pub fn try_next(&mut self) -> Option<Exchange> {
        self.rx.try_recv().ok()
    }

    /// Assert that no request arrives within `window`.
    pub async fn expect_silence(&mut self, window: Duration) {
        tokio::time::sleep(window).await;
        assert!(
            self.try_next().is_none(),
            "expected no request within {:?}",
            window
        );
    }
}

pub fn mock_transport() -> (MockTransport, MockServer) {
    let (tx, rx) = mpsc::unbounded_channel();
    (MockTransport { tx }, MockServer { rx })
}

#[async_trait(?Send)]
impl HttpTransport for MockTransport {
    async fn post(
        &self,
        url: &str,
        body: Value,
        options: PostOptions,
    ) -> Result<HttpResponse, TransportError> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(Exchange {
                url: url.to_string(),
                body,
                options,
                reply,
            })
            .map_err(|_| TransportError::Network {
                message: "mock server gone".to_string(),
            })?;
        response.await.unwrap_or_else(|_| {
            Err(TransportError::Network {
                message: "exchange dropped".to_string(),
            })
        })
    }
}

pub fn test_config() -> ClientConfig {
    ClientConfig::new("http://mock.local/batch")
}

/// Build a client and complete `set_key("abc")` with the given poll hint.
pub async fn connected_client(interval_ms: u64) -> (TestClient, MockServer) {
    let (transport, mut server) = mock_transport();
    let client = BatchClient::new(TokioProviders::new(), transport, test_config());

    let (outcome, ()) = tokio::join!(client.set_key(Some("abc")), async {
        let init = server.next().await;
        assert!(init.is_init());
        init.respond(200, json!({"ok": true, "data": {"intervalMs": interval_ms}}));
    });
    outcome.expect("set_key should succeed");
    assert!(client.is_connected());

    (client, server)
}

/// Wrapped success envelope.
pub fn ok(data: Value) -> Value {
    json!({"ok": true, "data": data})
}

/// Wait until no batch round is in flight.
pub async fn settled(client: &TestClient) -> ClientState {
    let mut states = client.subscribe();
    let state = states
        .wait_for(|state| !state.processing)
        .await
        .expect("state channel closed")
        .clone();
    state
}
