//! Request-scoped span trees.
//!
//! A [`Tracer`] is created once per hosted service and passed explicitly; each
//! inbound request gets its own [`RequestScope`], which owns the "current span"
//! stack for that request only. Spans close exactly once: explicitly through
//! [`ActiveSpan::close`], or on drop (cancellation, early return) with status
//! error.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, OnceLock};

use chrono::{DateTime, Utc};
use meshsim_core::ids::{SpanId, TraceId};
use meshsim_core::model::span::{AttrValue, SpanKind, SpanRecord, SpanStatus};

use crate::sink::SpanSink;

/// W3C trace-context header carrying trace id and parent span id across services.
pub const TRACEPARENT_HEADER: &str = "traceparent";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpanContext {
    pub trace_id: TraceId,
    pub span_id: SpanId,
}

impl SpanContext {
    pub fn to_traceparent(&self) -> String {
        format!("00-{}-{}-01", self.trace_id, self.span_id)
    }

    /// Parses `version-traceid-spanid-flags`. Anything malformed yields `None`.
    pub fn from_traceparent(value: &str) -> Option<Self> {
        let mut parts = value.trim().split('-');
        let version = parts.next()?;
        let trace = parts.next()?;
        let span = parts.next()?;
        let flags = parts.next()?;
        if parts.next().is_some() {
            return None;
        }
        if version.len() != 2
            || !version.chars().all(|c| c.is_ascii_hexdigit())
            || version.eq_ignore_ascii_case("ff")
        {
            return None;
        }
        if flags.len() != 2 || !flags.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        Some(Self {
            trace_id: TraceId::parse(trace).ok()?,
            span_id: SpanId::parse(span).ok()?,
        })
    }
}

#[derive(Clone)]
pub struct Tracer {
    inner: Arc<TracerInner>,
}

struct TracerInner {
    service: String,
    team: Option<String>,
    sink: Arc<dyn SpanSink>,
}

impl fmt::Debug for Tracer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracer")
            .field("service", &self.inner.service)
            .field("team", &self.inner.team)
            .finish_non_exhaustive()
    }
}

impl Tracer {
    pub fn new(service: impl Into<String>, team: Option<String>, sink: Arc<dyn SpanSink>) -> Self {
        Self {
            inner: Arc::new(TracerInner {
                service: service.into(),
                team,
                sink,
            }),
        }
    }

    pub fn service(&self) -> &str {
        &self.inner.service
    }

    pub fn team(&self) -> Option<&str> {
        self.inner.team.as_deref()
    }

    /// Starts a request scope. `remote` is the caller's context from the inbound
    /// correlation header; without it the request starts a fresh trace.
    pub fn scope(&self, remote: Option<SpanContext>) -> RequestScope {
        let trace_id = remote
            .as_ref()
            .map(|r| r.trace_id.clone())
            .unwrap_or_else(TraceId::generate);
        RequestScope {
            shared: Arc::new(ScopeShared {
                tracer: self.clone(),
                trace_id,
                remote,
                stack: Mutex::new(Vec::new()),
                local_root: OnceLock::new(),
            }),
        }
    }
}

#[derive(Clone)]
pub struct RequestScope {
    shared: Arc<ScopeShared>,
}

struct ScopeShared {
    tracer: Tracer,
    trace_id: TraceId,
    remote: Option<SpanContext>,
    stack: Mutex<Vec<SpanContext>>,
    local_root: OnceLock<SpanContext>,
}

impl ScopeShared {
    fn stack(&self) -> std::sync::MutexGuard<'_, Vec<SpanContext>> {
        self.stack.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl fmt::Debug for RequestScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestScope")
            .field("service", &self.shared.tracer.service())
            .field("trace_id", &self.shared.trace_id)
            .field("remote", &self.shared.remote)
            .finish_non_exhaustive()
    }
}

impl RequestScope {
    pub fn trace_id(&self) -> &TraceId {
        &self.shared.trace_id
    }

    pub fn remote_parent(&self) -> Option<&SpanContext> {
        self.shared.remote.as_ref()
    }

    /// Innermost open span of this request.
    pub fn current(&self) -> Option<SpanContext> {
        self.shared.stack().last().cloned()
    }

    /// Context serialized into outbound calls: the first span this request opened
    /// locally, so the callee's root hangs off the caller's root.
    pub fn propagation_context(&self) -> Option<SpanContext> {
        self.shared
            .local_root
            .get()
            .cloned()
            .or_else(|| self.current())
    }

    /// Opens a span under `parent`, or under the current span when none is given.
    /// The first span of a request falls back to the remote parent.
    pub fn start_span(&self, name: &str, parent: Option<&SpanContext>) -> ActiveSpan {
        let ctx = SpanContext {
            trace_id: self.shared.trace_id.clone(),
            span_id: SpanId::generate(),
        };

        let parent_span_id = {
            let mut stack = self.shared.stack();
            let parent = parent
                .cloned()
                .or_else(|| stack.last().cloned())
                .or_else(|| self.remote_parent().cloned());
            stack.push(ctx.clone());
            parent.map(|p| p.span_id)
        };
        let _ = self.shared.local_root.set(ctx.clone());

        ActiveSpan {
            ctx,
            parent_span_id,
            name: name.to_string(),
            kind: SpanKind::Internal,
            start_ts: Utc::now(),
            attributes: BTreeMap::new(),
            exception: None,
            scope: Arc::clone(&self.shared),
            closed: false,
        }
    }
}

/// An open span. Dropping it without calling [`ActiveSpan::close`] closes it with
/// status error.
pub struct ActiveSpan {
    ctx: SpanContext,
    parent_span_id: Option<SpanId>,
    name: String,
    kind: SpanKind,
    start_ts: DateTime<Utc>,
    attributes: BTreeMap<String, AttrValue>,
    exception: Option<String>,
    scope: Arc<ScopeShared>,
    closed: bool,
}

impl fmt::Debug for ActiveSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveSpan")
            .field("name", &self.name)
            .field("ctx", &self.ctx)
            .field("parent_span_id", &self.parent_span_id)
            .finish_non_exhaustive()
    }
}

impl ActiveSpan {
    pub fn with_kind(mut self, kind: SpanKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn context(&self) -> &SpanContext {
        &self.ctx
    }

    pub fn parent_span_id(&self) -> Option<&SpanId> {
        self.parent_span_id.as_ref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<AttrValue>) {
        self.attributes.insert(key.into(), value.into());
    }

    pub fn record_error(&mut self, err: &dyn fmt::Display) {
        self.exception = Some(err.to_string());
    }

    pub fn close(mut self, status: SpanStatus) {
        self.finish(status);
    }

    fn finish(&mut self, status: SpanStatus) {
        if self.closed {
            return;
        }
        self.closed = true;

        {
            let mut stack = self.scope.stack();
            if let Some(pos) = stack.iter().rposition(|c| c.span_id == self.ctx.span_id) {
                stack.remove(pos);
            }
        }

        let tracer = &self.scope.tracer;
        let record = SpanRecord {
            trace_id: self.ctx.trace_id.clone(),
            span_id: self.ctx.span_id.clone(),
            parent_span_id: self.parent_span_id.take(),
            service: tracer.service().to_string(),
            name: std::mem::take(&mut self.name),
            kind: self.kind,
            start_ts: self.start_ts,
            end_ts: Utc::now(),
            status,
            attributes: std::mem::take(&mut self.attributes),
            exception: self.exception.take(),
        };
        tracer.inner.sink.export(record);
    }
}

impl Drop for ActiveSpan {
    fn drop(&mut self) {
        if !self.closed {
            self.attributes
                .insert("span.cancelled".to_string(), AttrValue::from(true));
            if self.exception.is_none() {
                self.exception = Some("operation cancelled before completion".to_string());
            }
            self.finish(SpanStatus::Error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;

    fn tracer(sink: &MemorySink) -> Tracer {
        Tracer::new("payments", Some("payments".into()), Arc::new(sink.clone()))
    }

    #[test]
    fn children_link_to_current_span() {
        let sink = MemorySink::new();
        let scope = tracer(&sink).scope(None);

        let root = scope.start_span("payments:initiate-transfer", None);
        let root_ctx = root.context().clone();
        assert!(root.parent_span_id().is_none());

        let child = scope.start_span("call-process-gateway", None);
        assert_eq!(child.parent_span_id(), Some(&root_ctx.span_id));
        assert_eq!(scope.current().unwrap(), child.context().clone());
        child.close(SpanStatus::Ok);

        assert_eq!(scope.current().unwrap(), root_ctx);
        root.close(SpanStatus::Ok);
        assert!(scope.current().is_none());

        let spans = sink.spans();
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].name, "call-process-gateway");
        assert_eq!(spans[1].name, "payments:initiate-transfer");
        assert!(spans.iter().all(|s| s.trace_id == *scope.trace_id()));
        assert!(spans[0].end_ts <= spans[1].end_ts);
    }

    #[test]
    fn explicit_parent_wins() {
        let sink = MemorySink::new();
        let scope = tracer(&sink).scope(None);
        let root = scope.start_span("root", None);
        let a = scope.start_span("a", None);
        let b = scope.start_span("b", Some(root.context()));
        assert_eq!(b.parent_span_id(), Some(&root.context().span_id));
        b.close(SpanStatus::Ok);
        a.close(SpanStatus::Ok);
        root.close(SpanStatus::Ok);
    }

    #[test]
    fn remote_parent_becomes_root_parent() {
        let sink = MemorySink::new();
        let remote = SpanContext {
            trace_id: TraceId::parse("4bf92f3577b34da6a3ce929d0e0e4736").unwrap(),
            span_id: SpanId::parse("00f067aa0ba902b7").unwrap(),
        };
        let scope = tracer(&sink).scope(Some(remote.clone()));
        assert_eq!(scope.remote_parent(), Some(&remote));
        let root = scope.start_span("root", None);
        assert_eq!(root.parent_span_id(), Some(&remote.span_id));
        assert_eq!(root.context().trace_id, remote.trace_id);
        root.close(SpanStatus::Ok);
    }

    #[test]
    fn propagation_uses_local_root() {
        let sink = MemorySink::new();
        let scope = tracer(&sink).scope(None);
        let root = scope.start_span("root", None);
        let call = scope.start_span("call-b", None);
        assert_eq!(scope.propagation_context().unwrap(), root.context().clone());
        call.close(SpanStatus::Ok);
        root.close(SpanStatus::Ok);
    }

    #[test]
    fn dropped_span_closes_with_error() {
        let sink = MemorySink::new();
        let scope = tracer(&sink).scope(None);
        {
            let mut span = scope.start_span("abandoned", None);
            span.set_attribute("attempt", 1u32);
        }
        let spans = sink.spans();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].status, SpanStatus::Error);
        assert_eq!(
            spans[0].attr("span.cancelled").and_then(|v| v.as_str()),
            Some("true")
        );
        assert!(scope.current().is_none());
    }

    #[test]
    fn close_records_error_and_attributes() {
        let sink = MemorySink::new();
        let scope = tracer(&sink).scope(None);
        let mut span = scope.start_span("call-get-balance", None);
        span.set_attribute("http.status_code", 503u16);
        span.record_error(&"connection refused");
        span.close(SpanStatus::Error);

        let spans = sink.spans();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].exception.as_deref(), Some("connection refused"));
        assert_eq!(
            spans[0].attr("http.status_code").and_then(|v| v.as_i64()),
            Some(503)
        );
        assert_eq!(spans[0].service, "payments");
    }

    #[test]
    fn traceparent_round_trip() {
        let ctx = SpanContext {
            trace_id: TraceId::generate(),
            span_id: SpanId::generate(),
        };
        let header = ctx.to_traceparent();
        assert_eq!(SpanContext::from_traceparent(&header), Some(ctx));
    }

    #[test]
    fn malformed_traceparent_is_ignored() {
        assert!(SpanContext::from_traceparent("").is_none());
        assert!(SpanContext::from_traceparent("garbage").is_none());
        assert!(
            SpanContext::from_traceparent("00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7")
                .is_none()
        );
        assert!(
            SpanContext::from_traceparent(
                "ff-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01"
            )
            .is_none()
        );
        assert!(
            SpanContext::from_traceparent(
                "00-00000000000000000000000000000000-00f067aa0ba902b7-01"
            )
            .is_none()
        );
    }

    #[test]
    fn concurrent_scopes_do_not_share_current_span() {
        let sink = MemorySink::new();
        let tracer = tracer(&sink);
        let a = tracer.scope(None);
        let b = tracer.scope(None);
        let root_a = a.start_span("a", None);
        assert!(b.current().is_none());
        let root_b = b.start_span("b", None);
        assert_ne!(a.trace_id(), b.trace_id());
        assert!(root_b.parent_span_id().is_none());
        root_b.close(SpanStatus::Ok);
        root_a.close(SpanStatus::Ok);
    }
}
