use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use meshsim_core::model::span::{AttrValue, SpanKind, SpanRecord, SpanStatus};
use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
use opentelemetry_proto::tonic::common::v1::any_value::Value;
use opentelemetry_proto::tonic::common::v1::{AnyValue, InstrumentationScope, KeyValue};
use opentelemetry_proto::tonic::resource::v1::Resource;
use opentelemetry_proto::tonic::trace::v1::span::{Event, SpanKind as OtlpSpanKind};
use opentelemetry_proto::tonic::trace::v1::status::StatusCode;
use opentelemetry_proto::tonic::trace::v1::{ResourceSpans, ScopeSpans, Span as OtlpSpan, Status};

const SCOPE_NAME: &str = "meshsim";

/// Groups spans by service into one `ResourceSpans` per service. `teams` maps a
/// service name to its owning team, exported as a resource attribute.
pub fn export_request(
    spans: &[SpanRecord],
    teams: &HashMap<String, String>,
) -> ExportTraceServiceRequest {
    ExportTraceServiceRequest {
        resource_spans: encode_spans(spans, teams),
    }
}

pub fn encode_spans(spans: &[SpanRecord], teams: &HashMap<String, String>) -> Vec<ResourceSpans> {
    let mut by_service: BTreeMap<&str, Vec<OtlpSpan>> = BTreeMap::new();
    for span in spans {
        by_service
            .entry(span.service.as_str())
            .or_default()
            .push(encode_span(span));
    }

    by_service
        .into_iter()
        .map(|(service, spans)| {
            let mut attributes = vec![kv("service.name", Value::StringValue(service.into()))];
            if let Some(team) = teams.get(service) {
                attributes.push(kv("team", Value::StringValue(team.clone())));
            }
            ResourceSpans {
                resource: Some(Resource {
                    attributes,
                    ..Default::default()
                }),
                scope_spans: vec![ScopeSpans {
                    scope: Some(InstrumentationScope {
                        name: SCOPE_NAME.into(),
                        version: env!("CARGO_PKG_VERSION").into(),
                        ..Default::default()
                    }),
                    spans,
                    ..Default::default()
                }],
                ..Default::default()
            }
        })
        .collect()
}

fn encode_span(span: &SpanRecord) -> OtlpSpan {
    let end = dt_to_nanos(span.end_ts);
    let events = span
        .exception
        .as_ref()
        .map(|message| {
            vec![Event {
                time_unix_nano: end,
                name: "exception".into(),
                attributes: vec![kv("exception.message", Value::StringValue(message.clone()))],
                ..Default::default()
            }]
        })
        .unwrap_or_default();

    let status = match span.status {
        SpanStatus::Ok => Status {
            code: StatusCode::Ok as i32,
            message: String::new(),
        },
        SpanStatus::Error => Status {
            code: StatusCode::Error as i32,
            message: span.exception.clone().unwrap_or_default(),
        },
    };

    OtlpSpan {
        trace_id: hex_to_bytes(span.trace_id.as_str()),
        span_id: hex_to_bytes(span.span_id.as_str()),
        parent_span_id: span
            .parent_span_id
            .as_ref()
            .map(|p| hex_to_bytes(p.as_str()))
            .unwrap_or_default(),
        name: span.name.clone(),
        kind: kind_code(span.kind),
        start_time_unix_nano: dt_to_nanos(span.start_ts),
        end_time_unix_nano: end,
        attributes: span
            .attributes
            .iter()
            .map(|(k, v)| kv(k, attr_value(v)))
            .collect(),
        events,
        status: Some(status),
        ..Default::default()
    }
}

fn kind_code(kind: SpanKind) -> i32 {
    match kind {
        SpanKind::Internal => OtlpSpanKind::Internal as i32,
        SpanKind::Server => OtlpSpanKind::Server as i32,
        SpanKind::Client => OtlpSpanKind::Client as i32,
    }
}

fn attr_value(value: &AttrValue) -> Value {
    match value {
        AttrValue::Str(s) => Value::StringValue(s.clone()),
        AttrValue::Int(i) => Value::IntValue(*i),
        AttrValue::Float(f) => Value::DoubleValue(*f),
    }
}

fn kv(key: &str, value: Value) -> KeyValue {
    KeyValue {
        key: key.to_string(),
        value: Some(AnyValue { value: Some(value) }),
    }
}

fn hex_to_bytes(hex: &str) -> Vec<u8> {
    hex.as_bytes()
        .chunks(2)
        .filter_map(|pair| {
            let s = std::str::from_utf8(pair).ok()?;
            u8::from_str_radix(s, 16).ok()
        })
        .collect()
}

fn dt_to_nanos(ts: DateTime<Utc>) -> u64 {
    ts.timestamp_nanos_opt()
        .and_then(|n| u64::try_from(n).ok())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use meshsim_core::ids::{SpanId, TraceId};

    use super::*;

    fn span(service: &str, name: &str, status: SpanStatus) -> SpanRecord {
        let start = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();
        let mut attributes = BTreeMap::new();
        attributes.insert("http.status_code".to_string(), AttrValue::Int(200));
        attributes.insert("peer.service".to_string(), AttrValue::from("ledger"));
        SpanRecord {
            trace_id: TraceId::parse("0102030405060708090a0b0c0d0e0f10").unwrap(),
            span_id: SpanId::parse("0102030405060708").unwrap(),
            parent_span_id: None,
            service: service.into(),
            name: name.into(),
            kind: SpanKind::Client,
            start_ts: start,
            end_ts: start + chrono::Duration::milliseconds(150),
            status,
            attributes,
            exception: (status == SpanStatus::Error).then(|| "boom".to_string()),
        }
    }

    #[test]
    fn groups_spans_by_service() {
        let spans = vec![
            span("payments", "call-a", SpanStatus::Ok),
            span("ledger", "call-b", SpanStatus::Ok),
            span("payments", "call-c", SpanStatus::Ok),
        ];
        let mut teams = HashMap::new();
        teams.insert("payments".to_string(), "payments-team".to_string());

        let req = export_request(&spans, &teams);
        assert_eq!(req.resource_spans.len(), 2);

        let payments = req
            .resource_spans
            .iter()
            .find(|rs| {
                rs.resource.as_ref().unwrap().attributes[0]
                    .value
                    .as_ref()
                    .and_then(|v| v.value.as_ref())
                    == Some(&Value::StringValue("payments".into()))
            })
            .unwrap();
        assert_eq!(payments.scope_spans[0].spans.len(), 2);
        assert_eq!(payments.resource.as_ref().unwrap().attributes.len(), 2);
    }

    #[test]
    fn encodes_ids_times_and_kind() {
        let out = encode_span(&span("payments", "call-a", SpanStatus::Ok));
        assert_eq!(out.trace_id, (1u8..=16).collect::<Vec<_>>());
        assert_eq!(out.span_id, (1u8..=8).collect::<Vec<_>>());
        assert!(out.parent_span_id.is_empty());
        assert_eq!(out.kind, OtlpSpanKind::Client as i32);
        assert_eq!(out.end_time_unix_nano - out.start_time_unix_nano, 150_000_000);
        assert_eq!(out.status.unwrap().code, StatusCode::Ok as i32);
        assert!(out.events.is_empty());
        assert!(
            out.attributes
                .iter()
                .any(|kv| kv.key == "http.status_code"
                    && kv.value.as_ref().and_then(|v| v.value.as_ref())
                        == Some(&Value::IntValue(200)))
        );
    }

    #[test]
    fn error_spans_carry_exception_event() {
        let out = encode_span(&span("payments", "call-a", SpanStatus::Error));
        let status = out.status.unwrap();
        assert_eq!(status.code, StatusCode::Error as i32);
        assert_eq!(status.message, "boom");
        assert_eq!(out.events.len(), 1);
        assert_eq!(out.events[0].name, "exception");
        assert_eq!(out.events[0].attributes[0].key, "exception.message");
    }
}
