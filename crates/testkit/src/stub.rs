use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, Uri};

/// Behavior of a [`StubServer`].
#[derive(Debug, Clone)]
pub struct StubConfig {
    /// Requests answered with `fail_status` before the stub starts succeeding.
    pub fail_first: usize,
    pub fail_status: StatusCode,
    /// Delay applied to every response.
    pub delay: Duration,
    pub body: String,
}

impl Default for StubConfig {
    fn default() -> Self {
        Self {
            fail_first: 0,
            fail_status: StatusCode::INTERNAL_SERVER_ERROR,
            delay: Duration::ZERO,
            body: "stub ok".to_string(),
        }
    }
}

impl StubConfig {
    pub fn failing_first(n: usize) -> Self {
        Self {
            fail_first: n,
            ..Self::default()
        }
    }

    pub fn always_failing() -> Self {
        Self::failing_first(usize::MAX)
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }
}

#[derive(Default)]
struct StubState {
    hits: AtomicUsize,
    requests: Mutex<Vec<StubRequest>>,
}

/// One request seen by a stub.
#[derive(Debug, Clone)]
pub struct StubRequest {
    pub method: String,
    pub path: String,
    pub traceparent: Option<String>,
}

/// Programmable downstream answering every path on `127.0.0.1:0`.
pub struct StubServer {
    addr: String,
    state: Arc<StubState>,
    task: tokio::task::JoinHandle<()>,
}

impl StubServer {
    pub async fn spawn(cfg: StubConfig) -> anyhow::Result<Self> {
        let (listener, addr) = crate::reserve_listener().await?;
        let state = Arc::new(StubState::default());
        let router = Router::new()
            .fallback(respond)
            .with_state((Arc::clone(&state), Arc::new(cfg)));
        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        Ok(Self { addr, state, task })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn hits(&self) -> usize {
        self.state.hits.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<StubRequest> {
        self.state
            .requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

impl Drop for StubServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn respond(
    State((state, cfg)): State<(Arc<StubState>, Arc<StubConfig>)>,
    method: axum::http::Method,
    uri: Uri,
    headers: HeaderMap,
) -> (StatusCode, String) {
    let n = state.hits.fetch_add(1, Ordering::SeqCst);
    if let Ok(mut requests) = state.requests.lock() {
        requests.push(StubRequest {
            method: method.to_string(),
            path: uri.path().to_string(),
            traceparent: headers
                .get("traceparent")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
        });
    }
    if !cfg.delay.is_zero() {
        tokio::time::sleep(cfg.delay).await;
    }
    if n < cfg.fail_first {
        (cfg.fail_status, format!("stub failure {}", n + 1))
    } else {
        (StatusCode::OK, cfg.body.clone())
    }
}
