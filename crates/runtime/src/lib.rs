pub mod executor;
pub mod forward;
pub mod http;
pub mod otlp;
pub mod pipeline;
pub mod server;
pub mod service;
pub mod sink;
pub mod trace;

pub use executor::CallExecutor;
pub use forward::{ForwardConfig, Forwarder};
pub use pipeline::{ExportPipeline, PipelineConfig};
pub use server::{ServeTarget, bind_services, serve_targets};
pub use service::{InboundRequest, ServiceResponse, ServiceRuntime};
pub use sink::{LogSink, MemorySink, SpanSink};
pub use trace::{ActiveSpan, RequestScope, SpanContext, TRACEPARENT_HEADER, Tracer};
