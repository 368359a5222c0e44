use std::collections::HashMap;
use std::time::Duration;

use meshsim_core::config::Config;
use meshsim_core::model::span::SpanRecord;
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

use crate::forward::Forwarder;
use crate::otlp::export_request;
use crate::sink::SpanSink;

pub struct PipelineConfig {
    pub flush_interval: Duration,
    pub batch_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_millis(200),
            batch_size: 512,
        }
    }
}

impl PipelineConfig {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            flush_interval: Duration::from_millis(cfg.export_flush_ms.max(1)),
            batch_size: cfg.export_batch_size.max(1),
        }
    }
}

enum PipelineMsg {
    Span(SpanRecord),
    Flush(oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
}

/// Span sink that batches closed spans and ships them to an OTLP collector in
/// the background. Export failures are logged and never reach request handling.
#[derive(Clone)]
pub struct ExportPipeline {
    tx: mpsc::UnboundedSender<PipelineMsg>,
}

impl ExportPipeline {
    /// `teams` maps service name to owning team for the exported resource.
    pub fn spawn(forwarder: Forwarder, teams: HashMap<String, String>, cfg: PipelineConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_span_exporter(
            forwarder,
            teams,
            rx,
            cfg.batch_size,
            cfg.flush_interval,
        ));
        Self { tx }
    }

    /// Waits until every span submitted before this call has been handed to the
    /// collector (or dropped after failed retries).
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(PipelineMsg::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }

    /// Flushes remaining spans and stops the background exporter.
    pub async fn shutdown(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(PipelineMsg::Shutdown(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }
}

impl SpanSink for ExportPipeline {
    fn export(&self, span: SpanRecord) {
        if self.tx.send(PipelineMsg::Span(span)).is_err() {
            warn!("span pipeline dropped span: exporter stopped");
        }
    }
}

async fn run_span_exporter(
    forwarder: Forwarder,
    teams: HashMap<String, String>,
    mut rx: mpsc::UnboundedReceiver<PipelineMsg>,
    batch_size: usize,
    flush_interval: Duration,
) {
    let mut ticker = tokio::time::interval(flush_interval);
    let mut buffer = Vec::new();
    loop {
        tokio::select! {
            msg = rx.recv() => match msg {
                Some(PipelineMsg::Span(span)) => {
                    buffer.push(span);
                    if buffer.len() >= batch_size {
                        flush_spans(&forwarder, &teams, &mut buffer).await;
                    }
                }
                Some(PipelineMsg::Flush(done)) => {
                    flush_spans(&forwarder, &teams, &mut buffer).await;
                    let _ = done.send(());
                }
                Some(PipelineMsg::Shutdown(done)) => {
                    flush_spans(&forwarder, &teams, &mut buffer).await;
                    let _ = done.send(());
                    break;
                }
                None => {
                    flush_spans(&forwarder, &teams, &mut buffer).await;
                    break;
                }
            },
            _ = ticker.tick() => {
                flush_spans(&forwarder, &teams, &mut buffer).await;
            }
        }
    }
}

async fn flush_spans(
    forwarder: &Forwarder,
    teams: &HashMap<String, String>,
    buffer: &mut Vec<SpanRecord>,
) {
    if buffer.is_empty() {
        return;
    }
    let count = buffer.len();
    let req = export_request(buffer, teams);
    buffer.clear();
    match forwarder.export_traces(req).await {
        Ok(()) => tracing::debug!(count, "exported span batch"),
        Err(e) => warn!(error = %e, count, "failed to export span batch"),
    }
}
