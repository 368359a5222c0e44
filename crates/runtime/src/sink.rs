use std::sync::{Arc, Mutex};

use meshsim_core::model::span::SpanRecord;

/// Receives spans in the order they close. Implementations must not block.
pub trait SpanSink: Send + Sync + 'static {
    fn export(&self, span: SpanRecord);
}

/// Append-only in-memory sink.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    spans: Arc<Mutex<Vec<SpanRecord>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spans(&self) -> Vec<SpanRecord> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<SpanRecord>> {
        self.spans.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl SpanSink for MemorySink {
    fn export(&self, span: SpanRecord) {
        self.lock().push(span);
    }
}

/// Writes each closed span as an info event. Used when no collector is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl SpanSink for LogSink {
    fn export(&self, span: SpanRecord) {
        tracing::info!(
            trace_id = %span.trace_id,
            span_id = %span.span_id,
            parent_span_id = span.parent_span_id.as_ref().map(|p| p.as_str()).unwrap_or("-"),
            service = %span.service,
            name = %span.name,
            status = %span.status,
            duration_ms = span.duration_ms(),
            "span closed"
        );
    }
}

impl<T: SpanSink + ?Sized> SpanSink for Arc<T> {
    fn export(&self, span: SpanRecord) {
        (**self).export(span);
    }
}
