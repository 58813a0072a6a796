//! Simulated batch server: drives a [`BatchClient`] against an in-process
//! [`HttpTransport`] that behaves like the remote batch endpoint.
//!
//! ```text
//! BatchClient ──► SimulatedServer::post
//!                   init         → intervalMs or 404
//!                   calls        → created (pending | rejected)
//!                   status keys  → results once a job has "run"
//!                   completed    → cleanupCount
//! ```
//!
//! The server finishes each job one round after it was accepted, fails
//! `crm.fail` calls, and refuses methods under `forbidden.`.
//!
//! ## Running
//!
//! ```bash
//! RUST_LOG=callbatch=debug cargo run --example simulated_server -p callbatch
//! ```

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

use async_trait::async_trait;
use callbatch::{
    BatchClient, CallError, ClientConfig, HttpResponse, HttpTransport, MethodCall, PostOptions,
    TokioProviders, TransportError,
};
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

const CHANNEL_KEY: &str = "demo-channel";

// ============================================================================
// Server
// ============================================================================

struct Job {
    method: String,
    params: Value,
    rounds_until_done: u32,
}

#[derive(Default)]
struct ServerState {
    jobs: HashMap<String, Job>,
    finished: HashMap<String, Value>,
    rounds: u64,
}

#[derive(Clone, Default)]
struct SimulatedServer {
    state: Rc<RefCell<ServerState>>,
}

impl SimulatedServer {
    fn handle_init(&self, key: &str) -> HttpResponse {
        if key == CHANNEL_KEY {
            HttpResponse::new(200, json!({"ok": true, "data": {"intervalMs": 600}}))
        } else {
            HttpResponse::new(404, json!({"message": "unknown channel key"}))
        }
    }

    fn handle_batch(&self, body: &Value) -> HttpResponse {
        let mut state = self.state.borrow_mut();
        state.rounds += 1;

        let mut cleanup_count = 0;
        for key in string_list(&body["completedKeys"]) {
            if state.finished.remove(&key).is_some() {
                cleanup_count += 1;
            }
        }

        let mut results = Vec::new();
        for key in string_list(&body["statusRequestKeys"]) {
            let Some(job) = state.jobs.get_mut(&key) else {
                continue;
            };
            if job.rounds_until_done > 0 {
                job.rounds_until_done -= 1;
                results.push(json!({"requestKey": key, "status": "running"}));
                continue;
            }
            let Some(job) = state.jobs.remove(&key) else {
                continue;
            };
            let result = if job.method == "crm.fail" {
                json!({"requestKey": key, "status": "done", "isError": true,
                       "error": "simulated failure"})
            } else {
                let encoded = json!({"method": job.method, "result": {"echo": job.params}});
                json!({"requestKey": key, "status": "done", "result": encoded.to_string()})
            };
            state.finished.insert(key, result.clone());
            results.push(result);
        }

        let mut created = Vec::new();
        for call in body["calls"].as_array().into_iter().flatten() {
            let key = call["requestKey"].as_str().unwrap_or_default().to_string();
            let method = call["method"].as_str().unwrap_or_default().to_string();
            if method.starts_with("forbidden.") {
                created.push(json!({"requestKey": key, "status": "rejected"}));
                continue;
            }
            state.jobs.insert(
                key.clone(),
                Job {
                    method,
                    params: call["params"].clone(),
                    rounds_until_done: 1,
                },
            );
            created.push(json!({"requestKey": key, "status": "pending"}));
        }

        let data = json!({
            "intervalMs": 600,
            "results": results,
            "created": created,
            "cleanupCount": cleanup_count,
        });
        // Alternate between the wrapped and the direct envelope.
        if state.rounds % 2 == 0 {
            HttpResponse::new(200, json!({"ok": true, "data": data}))
        } else {
            HttpResponse::new(200, data)
        }
    }
}

fn string_list(value: &Value) -> Vec<String> {
    value
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|item| item.as_str().map(str::to_string))
        .collect()
}

#[async_trait(?Send)]
impl HttpTransport for SimulatedServer {
    async fn post(
        &self,
        _url: &str,
        body: Value,
        _options: PostOptions,
    ) -> Result<HttpResponse, TransportError> {
        // Network latency.
        tokio::time::sleep(Duration::from_millis(40)).await;

        let key = body["key"].as_str().unwrap_or_default();
        if key != CHANNEL_KEY && !body["init"].as_bool().unwrap_or(false) {
            return Ok(HttpResponse::new(404, json!({"message": "unknown channel key"})));
        }
        if body["init"].as_bool().unwrap_or(false) {
            return Ok(self.handle_init(key));
        }
        Ok(self.handle_batch(&body))
    }
}

// ============================================================================
// Client workload
// ============================================================================

async fn run_workload() -> Result<(), Box<dyn std::error::Error>> {
    let client = BatchClient::new(
        TokioProviders::new(),
        SimulatedServer::default(),
        ClientConfig::new("http://batch.simulated/rest/batch"),
    );

    let _subscription = client.on_state_change(|state| {
        tracing::debug!(
            connected = state.connected,
            processing = state.processing,
            pending = state.queue_sizes.pending,
            active = state.queue_sizes.active,
            completed = state.queue_sizes.completed,
            "state changed"
        );
    });

    // Disconnected: calls go through the direct path.
    let direct = client
        .submit_or_fallback(MethodCall::new("user.current", json!({})), || async {
            Ok(json!({"id": 1, "via": "direct"}))
        })
        .await?;
    println!("direct call      -> {}", direct);

    if let Err(e) = client.set_key(Some("wrong-key")).await {
        println!("set_key(wrong)   -> {} ({})", e, e.code());
    }

    client.set_key(Some(CHANNEL_KEY)).await?;
    println!(
        "set_key(ok)      -> poll every {:?}",
        client.state().poll_rate
    );

    let fallback = || async { Err(CallError::fallback("channel unavailable")) };
    let (deal, contact, failing, forbidden) = tokio::join!(
        client.submit_or_fallback(MethodCall::new("crm.deal.get", json!({"id": 5})), fallback),
        client.submit_or_fallback(MethodCall::new("crm.contact.list", json!(null)), fallback),
        client.submit_or_fallback(MethodCall::new("crm.fail", json!({})), fallback),
        client.submit_or_fallback(MethodCall::new("forbidden.drop", json!({})), fallback),
    );

    println!("crm.deal.get     -> {:?}", deal);
    println!("crm.contact.list -> {:?}", contact);
    println!("crm.fail         -> {:?}", failing);
    println!("forbidden.drop   -> {:?}", forbidden);

    // Let the acknowledgement round go out.
    tokio::time::sleep(Duration::from_secs(2)).await;
    let state = client.state();
    println!(
        "final state      -> connected={} pending={} active={} completed={}",
        state.connected,
        state.queue_sizes.pending,
        state.queue_sizes.active,
        state.queue_sizes.completed
    );

    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("Failed to create Tokio runtime");
    let local = tokio::task::LocalSet::new();

    if let Err(e) = local.block_on(&runtime, run_workload()) {
        eprintln!("workload failed: {}", e);
        std::process::exit(1);
    }
}
