use std::io::Write;
use std::time::Duration;

use flate2::Compression;
use flate2::write::GzEncoder;
use meshsim_core::config::Config;
use meshsim_core::{MeshError, Result};
use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
use opentelemetry_proto::tonic::collector::trace::v1::trace_service_client::TraceServiceClient;
use prost::Message;
use reqwest::Client;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tokio::sync::Mutex;
use tonic::codec::CompressionEncoding;
use tonic::metadata::{Ascii, MetadataKey, MetadataMap, MetadataValue};
use tonic::transport::Channel;

const EXPORT_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone)]
pub struct ForwardConfig {
    pub endpoint: String,
    pub protocol: ForwardProtocol,
    pub compression: ForwardCompression,
    pub headers: Vec<(String, String)>,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardProtocol {
    Grpc,
    HttpProtobuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardCompression {
    None,
    Gzip,
}

impl ForwardProtocol {
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "grpc" => Self::Grpc,
            _ => Self::HttpProtobuf,
        }
    }
}

impl ForwardCompression {
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "gzip" => Self::Gzip,
            _ => Self::None,
        }
    }
}

impl ForwardConfig {
    /// `None` when no collector endpoint is configured.
    pub fn from_config(cfg: &Config) -> Option<Self> {
        let endpoint = cfg.export_endpoint.clone()?;
        Some(Self {
            endpoint,
            protocol: ForwardProtocol::parse(&cfg.export_protocol),
            compression: ForwardCompression::parse(&cfg.export_compression),
            headers: cfg.export_headers.clone(),
            timeout: cfg.export_timeout,
        })
    }
}

/// Ships encoded span batches to an OTLP collector.
pub struct Forwarder {
    transport: ForwardTransport,
    timeout: Duration,
}

enum ForwardTransport {
    Grpc {
        client: Mutex<TraceServiceClient<Channel>>,
        metadata: MetadataMap,
    },
    Http {
        client: Client,
        url: String,
        headers: HeaderMap,
        compression: ForwardCompression,
    },
}

impl Forwarder {
    /// Must be called inside a tokio runtime; gRPC channels connect lazily.
    pub fn new(cfg: &ForwardConfig) -> Result<Self> {
        let transport = match cfg.protocol {
            ForwardProtocol::Grpc => {
                let endpoint = normalize_grpc_endpoint(&cfg.endpoint);
                let channel = Channel::from_shared(endpoint.clone())
                    .map_err(|e| {
                        MeshError::Config(format!("invalid gRPC export endpoint {endpoint}: {e}"))
                    })?
                    .connect_lazy();
                ForwardTransport::Grpc {
                    client: Mutex::new(configure_traces_client(
                        TraceServiceClient::new(channel),
                        cfg.compression,
                    )),
                    metadata: build_grpc_metadata(&cfg.headers),
                }
            }
            ForwardProtocol::HttpProtobuf => {
                let client = Client::builder()
                    .timeout(cfg.timeout)
                    .build()
                    .map_err(|e| MeshError::Export(format!("failed to build export client: {e}")))?;
                ForwardTransport::Http {
                    client,
                    url: format!("{}/v1/traces", cfg.endpoint.trim_end_matches('/')),
                    headers: build_http_headers(&cfg.headers),
                    compression: cfg.compression,
                }
            }
        };
        Ok(Self {
            transport,
            timeout: cfg.timeout,
        })
    }

    pub async fn export_traces(&self, req: ExportTraceServiceRequest) -> Result<()> {
        match &self.transport {
            ForwardTransport::Grpc { client, metadata } => {
                let timeout = self.timeout;
                forward_with_retries(|| async {
                    let mut client = client.lock().await;
                    let mut request = tonic::Request::new(req.clone());
                    request.set_timeout(timeout);
                    *request.metadata_mut() = metadata.clone();
                    client.export(request).await.map(|_| ())
                })
                .await
            }
            ForwardTransport::Http {
                client,
                url,
                headers,
                compression,
            } => {
                let mut body = Vec::new();
                req.encode(&mut body)
                    .map_err(|e| MeshError::Export(format!("failed to encode spans: {e}")))?;
                forward_http_with_retries(client, url, headers, body, *compression).await
            }
        }
    }
}

fn normalize_grpc_endpoint(endpoint: &str) -> String {
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        endpoint.to_string()
    } else {
        format!("http://{endpoint}")
    }
}

async fn forward_with_retries<F, Fut, E>(mut call: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = std::result::Result<(), E>>,
    E: std::fmt::Display,
{
    let mut last_error = String::new();
    for attempt in 0..EXPORT_ATTEMPTS {
        match call().await {
            Ok(()) => return Ok(()),
            Err(e) => last_error = e.to_string(),
        }
        tokio::time::sleep(Duration::from_millis(30 * u64::from(attempt + 1))).await;
    }
    Err(MeshError::Export(format!(
        "gRPC export failed after {EXPORT_ATTEMPTS} attempts: {last_error}"
    )))
}

async fn forward_http_with_retries(
    client: &Client,
    url: &str,
    headers: &HeaderMap,
    body: Vec<u8>,
    compression: ForwardCompression,
) -> Result<()> {
    let (body, content_encoding) = maybe_compress_http_body(body, compression)
        .map_err(|e| MeshError::Export(format!("failed to compress export payload: {e}")))?;

    let mut last_error = String::new();
    for attempt in 0..EXPORT_ATTEMPTS {
        let mut req = client
            .post(url)
            .header("content-type", "application/x-protobuf")
            .headers(headers.clone());
        if let Some(encoding) = content_encoding {
            req = req.header("content-encoding", encoding);
        }
        match req.body(body.clone()).send().await {
            Ok(resp) if resp.status().is_success() => return Ok(()),
            Ok(resp) => last_error = format!("collector returned {}", resp.status()),
            Err(e) => last_error = e.to_string(),
        }
        tokio::time::sleep(Duration::from_millis(30 * u64::from(attempt + 1))).await;
    }
    Err(MeshError::Export(format!(
        "POST {url} failed after {EXPORT_ATTEMPTS} attempts: {last_error}"
    )))
}

fn configure_traces_client(
    client: TraceServiceClient<Channel>,
    compression: ForwardCompression,
) -> TraceServiceClient<Channel> {
    match compression {
        ForwardCompression::Gzip => client
            .send_compressed(CompressionEncoding::Gzip)
            .accept_compressed(CompressionEncoding::Gzip),
        ForwardCompression::None => client,
    }
}

fn build_grpc_metadata(headers: &[(String, String)]) -> MetadataMap {
    let mut metadata = MetadataMap::new();
    for (k, v) in headers {
        let key = MetadataKey::<Ascii>::from_bytes(k.as_bytes());
        let value = MetadataValue::try_from(v.as_str());
        match (key, value) {
            (Ok(key), Ok(value)) => {
                metadata.insert(key, value);
            }
            _ => {
                tracing::warn!(header = %k, "ignored invalid export gRPC header");
            }
        }
    }
    metadata
}

fn build_http_headers(headers: &[(String, String)]) -> HeaderMap {
    let mut out = HeaderMap::new();
    for (k, v) in headers {
        let name = HeaderName::try_from(k.as_str());
        let value = HeaderValue::try_from(v.as_str());
        match (name, value) {
            (Ok(name), Ok(value)) => {
                out.insert(name, value);
            }
            _ => {
                tracing::warn!(header = %k, "ignored invalid export HTTP header");
            }
        }
    }
    out
}

fn maybe_compress_http_body(
    body: Vec<u8>,
    compression: ForwardCompression,
) -> std::io::Result<(Vec<u8>, Option<&'static str>)> {
    match compression {
        ForwardCompression::None => Ok((body, None)),
        ForwardCompression::Gzip => {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&body)?;
            let compressed = encoder.finish()?;
            Ok((compressed, Some("gzip")))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use flate2::read::GzDecoder;

    use super::*;

    #[test]
    fn forward_compression_parse_variants() {
        assert_eq!(ForwardCompression::parse("gzip"), ForwardCompression::Gzip);
        assert_eq!(ForwardCompression::parse("GZIP"), ForwardCompression::Gzip);
        assert_eq!(ForwardCompression::parse("none"), ForwardCompression::None);
        assert_eq!(
            ForwardCompression::parse("unexpected"),
            ForwardCompression::None
        );
    }

    #[test]
    fn forward_protocol_defaults_to_http() {
        assert_eq!(ForwardProtocol::parse("grpc"), ForwardProtocol::Grpc);
        assert_eq!(ForwardProtocol::parse("GRPC"), ForwardProtocol::Grpc);
        assert_eq!(
            ForwardProtocol::parse("http/protobuf"),
            ForwardProtocol::HttpProtobuf
        );
        assert_eq!(ForwardProtocol::parse(""), ForwardProtocol::HttpProtobuf);
    }

    #[test]
    fn gzip_body_round_trips() {
        let (body, encoding) =
            maybe_compress_http_body(b"spans".to_vec(), ForwardCompression::Gzip).unwrap();
        assert_eq!(encoding, Some("gzip"));
        let mut out = String::new();
        GzDecoder::new(body.as_slice())
            .read_to_string(&mut out)
            .unwrap();
        assert_eq!(out, "spans");
    }

    #[test]
    fn invalid_headers_are_skipped() {
        let headers = build_http_headers(&[
            ("x-api-key".into(), "secret".into()),
            ("bad header".into(), "v".into()),
        ]);
        assert_eq!(headers.len(), 1);
        assert_eq!(headers["x-api-key"], "secret");

        let metadata = build_grpc_metadata(&[("authorization".into(), "Bearer t".into())]);
        assert_eq!(metadata.len(), 1);
    }

    #[test]
    fn config_without_endpoint_disables_export() {
        let cfg = Config::default();
        assert!(ForwardConfig::from_config(&cfg).is_none());

        let cfg = Config {
            export_endpoint: Some("http://127.0.0.1:4318".into()),
            export_compression: "gzip".into(),
            ..Config::default()
        };
        let fwd = ForwardConfig::from_config(&cfg).unwrap();
        assert_eq!(fwd.protocol, ForwardProtocol::HttpProtobuf);
        assert_eq!(fwd.compression, ForwardCompression::Gzip);
    }
}
