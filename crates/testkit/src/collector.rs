use std::io::Read;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use flate2::read::GzDecoder;
use opentelemetry_proto::tonic::collector::trace::v1::trace_service_server::{
    TraceService, TraceServiceServer,
};
use opentelemetry_proto::tonic::collector::trace::v1::{
    ExportTraceServiceRequest, ExportTraceServiceResponse,
};
use opentelemetry_proto::tonic::trace::v1::Span as OtlpSpan;
use prost::Message;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::codec::CompressionEncoding;
use tonic::{Request, Response, Status};

/// Received export requests plus per-request headers of interest.
#[derive(Debug, Clone, Default)]
pub struct Received {
    pub requests: Vec<ExportTraceServiceRequest>,
    pub content_encodings: Vec<Option<String>>,
    pub api_keys: Vec<Option<String>>,
}

#[derive(Clone, Default)]
struct Inbox {
    received: Arc<Mutex<Received>>,
}

impl Inbox {
    fn push(&self, req: ExportTraceServiceRequest, encoding: Option<String>, api_key: Option<String>) {
        if let Ok(mut received) = self.received.lock() {
            received.requests.push(req);
            received.content_encodings.push(encoding);
            received.api_keys.push(api_key);
        }
    }
}

/// OTLP trace collector accepting gRPC or HTTP/protobuf on `127.0.0.1:0`.
pub struct CollectorStub {
    endpoint: String,
    inbox: Inbox,
    task: tokio::task::JoinHandle<()>,
}

impl CollectorStub {
    pub async fn spawn_http() -> anyhow::Result<Self> {
        let (listener, addr) = crate::reserve_listener().await?;
        let inbox = Inbox::default();
        let router = Router::new()
            .route("/v1/traces", post(export_traces))
            .with_state(inbox.clone());
        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        Ok(Self {
            endpoint: format!("http://{addr}"),
            inbox,
            task,
        })
    }

    pub async fn spawn_grpc() -> anyhow::Result<Self> {
        let (listener, addr) = crate::reserve_listener().await?;
        let inbox = Inbox::default();
        let service = TraceServiceServer::new(GrpcCollector {
            inbox: inbox.clone(),
        })
        .accept_compressed(CompressionEncoding::Gzip)
        .send_compressed(CompressionEncoding::Gzip);
        let task = tokio::spawn(async move {
            let _ = tonic::transport::Server::builder()
                .add_service(service)
                .serve_with_incoming(TcpListenerStream::new(listener))
                .await;
        });
        Ok(Self {
            endpoint: format!("http://{addr}"),
            inbox,
            task,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn received(&self) -> Received {
        self.inbox
            .received
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    /// All received spans with the `service.name` of their resource.
    pub fn spans(&self) -> Vec<(String, OtlpSpan)> {
        let mut out = Vec::new();
        for req in self.received().requests {
            for rs in req.resource_spans {
                let service = rs
                    .resource
                    .as_ref()
                    .and_then(|r| r.attributes.iter().find(|kv| kv.key == "service.name"))
                    .and_then(|kv| kv.value.as_ref())
                    .and_then(|v| match &v.value {
                        Some(opentelemetry_proto::tonic::common::v1::any_value::Value::StringValue(s)) => {
                            Some(s.clone())
                        }
                        _ => None,
                    })
                    .unwrap_or_default();
                for ss in rs.scope_spans {
                    for span in ss.spans {
                        out.push((service.clone(), span));
                    }
                }
            }
        }
        out
    }

    /// Polls until at least `count` spans arrived or `timeout` elapses.
    pub async fn wait_for_spans(&self, count: usize, timeout: Duration) -> usize {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let n = self.spans().len();
            if n >= count || tokio::time::Instant::now() >= deadline {
                return n;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

impl Drop for CollectorStub {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct GrpcCollector {
    inbox: Inbox,
}

#[tonic::async_trait]
impl TraceService for GrpcCollector {
    async fn export(
        &self,
        request: Request<ExportTraceServiceRequest>,
    ) -> std::result::Result<Response<ExportTraceServiceResponse>, Status> {
        let encoding = request
            .metadata()
            .get("grpc-encoding")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let api_key = request
            .metadata()
            .get("x-api-key")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        self.inbox.push(request.into_inner(), encoding, api_key);
        Ok(Response::new(ExportTraceServiceResponse::default()))
    }
}

async fn export_traces(State(inbox): State<Inbox>, headers: HeaderMap, body: Bytes) -> StatusCode {
    let encoding = header(&headers, "content-encoding");
    let raw = if encoding.as_deref() == Some("gzip") {
        let mut out = Vec::new();
        if GzDecoder::new(body.as_ref()).read_to_end(&mut out).is_err() {
            return StatusCode::BAD_REQUEST;
        }
        out
    } else {
        body.to_vec()
    };
    let Ok(req) = ExportTraceServiceRequest::decode(raw.as_slice()) else {
        return StatusCode::BAD_REQUEST;
    };
    inbox.push(req, encoding, header(&headers, "x-api-key"));
    StatusCode::OK
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}
