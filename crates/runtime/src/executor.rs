use std::sync::Arc;
use std::time::{Duration, Instant};

use meshsim_core::chaos::{ChaosDecision, ChaosInjector, ChaosProfile, oversized_payload};
use meshsim_core::model::call::CallResult;
use meshsim_core::model::span::{SpanKind, SpanStatus};
use meshsim_core::retry::{AttemptOutcome, RetryPolicy, RetryState};
use meshsim_core::time::format_duration;
use meshsim_core::topology::{DownstreamCallSpec, HttpMethod, Topology};
use meshsim_core::{MeshError, Result};
use reqwest::Client;
use tracing::{debug, warn};

use crate::trace::{ActiveSpan, RequestScope, TRACEPARENT_HEADER};

/// Issues declared downstream calls on behalf of a request, one child span per
/// attempt. Failures are recorded and returned, never raised.
#[derive(Debug, Clone)]
pub struct CallExecutor {
    client: Client,
    topology: Arc<Topology>,
    chaos: Arc<ChaosInjector>,
    preview_bytes: usize,
}

impl CallExecutor {
    pub fn new(
        topology: Arc<Topology>,
        chaos: Arc<ChaosInjector>,
        preview_bytes: usize,
    ) -> Result<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| MeshError::Internal(format!("failed to build http client: {e}")))?;
        Ok(Self {
            client,
            topology,
            chaos,
            preview_bytes,
        })
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub async fn execute(
        &self,
        scope: &RequestScope,
        call: &DownstreamCallSpec,
        profile: &ChaosProfile,
    ) -> CallResult {
        match &call.retry {
            None => self.attempt(scope, call, profile, None).await,
            Some(policy) => self.execute_with_retry(scope, call, profile, policy).await,
        }
    }

    async fn execute_with_retry(
        &self,
        scope: &RequestScope,
        call: &DownstreamCallSpec,
        profile: &ChaosProfile,
        policy: &RetryPolicy,
    ) -> CallResult {
        let started = Instant::now();
        let mut state = policy.start();
        let mut attempt = 1;
        loop {
            let mut result = self.attempt(scope, call, profile, Some(attempt)).await;
            let outcome = if result.is_success() {
                AttemptOutcome::Success
            } else if result.is_retryable() {
                AttemptOutcome::RetryableFailure
            } else {
                AttemptOutcome::FatalFailure
            };
            state = policy.advance(state, outcome);
            match state {
                RetryState::Attempting(next) => {
                    let delay = policy.delay(&mut rand::rng());
                    debug!(
                        peer = call.target_name(),
                        attempt,
                        delay = %format_duration(delay),
                        "retrying downstream call"
                    );
                    tokio::time::sleep(delay).await;
                    attempt = next;
                }
                RetryState::Succeeded(n) | RetryState::Exhausted(n) => {
                    result.attempts = n;
                    result.duration = started.elapsed();
                    return result;
                }
            }
        }
    }

    async fn attempt(
        &self,
        scope: &RequestScope,
        call: &DownstreamCallSpec,
        profile: &ChaosProfile,
        attempt: Option<u32>,
    ) -> CallResult {
        let mut span = scope
            .start_span(&call.span_name(attempt), None)
            .with_kind(SpanKind::Client);
        span.set_attribute("peer.service", call.service.as_str());
        span.set_attribute("peer.endpoint", call.endpoint.as_str());
        span.set_attribute("http.method", call.method.as_str());
        span.set_attribute("transport", call.transport.as_str());
        span.set_attribute("criticality", call.criticality.as_str());
        if let Some(n) = attempt {
            span.set_attribute("retry.attempt", n);
        }

        let started = Instant::now();
        let decision = self.chaos.decide(profile);
        span.set_attribute("chaos.decision", decision.as_str());

        let result = match decision {
            ChaosDecision::Crash => {
                let err = MeshError::SimulatedFault(format!(
                    "injected crash calling {}",
                    call.target_name()
                ));
                CallResult::from_error(&err, started.elapsed())
            }
            ChaosDecision::Oversized(size) => {
                CallResult::success(200, oversized_payload(size), started.elapsed())
            }
            ChaosDecision::Latency(delay) => {
                span.set_attribute("chaos.latency_ms", duration_ms(delay));
                tokio::time::sleep(delay).await;
                self.send_recorded(scope, call, &mut span, started).await
            }
            ChaosDecision::Normal => self.send_recorded(scope, call, &mut span, started).await,
        };

        self.record_result(&mut span, &result);
        if result.is_success() {
            span.close(SpanStatus::Ok);
        } else {
            warn!(
                peer = call.target_name(),
                outcome = %result.outcome,
                error = result.error.as_deref().unwrap_or_default(),
                "downstream call failed"
            );
            span.close(SpanStatus::Error);
        }
        result
    }

    async fn send_recorded(
        &self,
        scope: &RequestScope,
        call: &DownstreamCallSpec,
        span: &mut ActiveSpan,
        started: Instant,
    ) -> CallResult {
        let url = match self.topology.target_url(call) {
            Ok(url) => url,
            Err(e) => return CallResult::from_error(&e, started.elapsed()),
        };
        span.set_attribute("http.url", url.as_str());
        match self.send(scope, call, &url).await {
            Ok((status, body)) => CallResult::success(status, body, started.elapsed()),
            Err(e) => CallResult::from_error(&e, started.elapsed()),
        }
    }

    async fn send(
        &self,
        scope: &RequestScope,
        call: &DownstreamCallSpec,
        url: &str,
    ) -> Result<(u16, String)> {
        let mut req = self
            .client
            .request(reqwest_method(call.method), url)
            .timeout(call.timeout);
        if let Some(ctx) = scope.propagation_context() {
            req = req.header(TRACEPARENT_HEADER, ctx.to_traceparent());
        }

        let resp = req
            .send()
            .await
            .map_err(|e| classify_error(&e, url, call.timeout))?;
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| classify_error(&e, url, call.timeout))?;
        if !status.is_success() {
            let message = match body.lines().next().map(str::trim) {
                Some(line) if !line.is_empty() => line.to_string(),
                _ => status.to_string(),
            };
            return Err(MeshError::DownstreamStatus {
                status: status.as_u16(),
                message,
            });
        }
        Ok((status.as_u16(), body))
    }

    fn record_result(&self, span: &mut ActiveSpan, result: &CallResult) {
        span.set_attribute("call.outcome", result.outcome.as_str());
        if let Some(status) = result.status {
            span.set_attribute("http.status_code", status);
        }
        if result.is_success() {
            span.set_attribute("http.response.size", result.body.len());
            span.set_attribute(
                "http.response.preview",
                preview(&result.body, self.preview_bytes),
            );
        }
        if let Some(error) = &result.error {
            span.record_error(error);
        }
    }
}

fn reqwest_method(method: HttpMethod) -> reqwest::Method {
    match method {
        HttpMethod::Get => reqwest::Method::GET,
        HttpMethod::Post => reqwest::Method::POST,
        HttpMethod::Put => reqwest::Method::PUT,
        HttpMethod::Patch => reqwest::Method::PATCH,
        HttpMethod::Delete => reqwest::Method::DELETE,
    }
}

fn classify_error(err: &reqwest::Error, url: &str, timeout: Duration) -> MeshError {
    if err.is_timeout() {
        MeshError::DownstreamTimeout(format!(
            "{url} did not respond within {}",
            format_duration(timeout)
        ))
    } else {
        MeshError::DownstreamConnection(error_chain(err))
    }
}

fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// Longest prefix of `body` within `max` bytes that ends on a char boundary.
fn preview(body: &str, max: usize) -> &str {
    if body.len() <= max {
        return body;
    }
    let mut end = max;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
