use chrono::{Duration, TimeZone, Utc};
use meshsim_core::ids::{SpanId, TraceId};
use meshsim_core::model::span::{SpanKind, SpanRecord, SpanStatus};

/// A closed span with fixed timestamps, for encoder and printer tests.
pub fn sample_span(service: &str, name: &str, parent: Option<&SpanId>) -> SpanRecord {
    let base = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();
    SpanRecord {
        trace_id: TraceId::parse("4bf92f3577b34da6a3ce929d0e0e4736").unwrap(),
        span_id: SpanId::generate(),
        parent_span_id: parent.cloned(),
        service: service.to_string(),
        name: name.to_string(),
        kind: if parent.is_some() {
            SpanKind::Client
        } else {
            SpanKind::Server
        },
        start_ts: base,
        end_ts: base + Duration::milliseconds(120),
        status: SpanStatus::Ok,
        attributes: Default::default(),
        exception: None,
    }
}

/// The only span of `spans` whose parent is not among them.
pub fn local_root(spans: &[SpanRecord]) -> &SpanRecord {
    let roots: Vec<_> = spans
        .iter()
        .filter(|s| {
            s.parent_span_id
                .as_ref()
                .is_none_or(|p| !spans.iter().any(|o| o.span_id == *p))
        })
        .collect();
    assert_eq!(roots.len(), 1, "expected one root, got {roots:?}");
    roots[0]
}

pub fn children<'a>(spans: &'a [SpanRecord], parent: &SpanRecord) -> Vec<&'a SpanRecord> {
    spans
        .iter()
        .filter(|s| s.parent_span_id.as_ref() == Some(&parent.span_id))
        .collect()
}

pub fn named<'a>(spans: &'a [SpanRecord], name: &str) -> &'a SpanRecord {
    spans
        .iter()
        .find(|s| s.name == name)
        .unwrap_or_else(|| panic!("no span named {name} in {:?}", names(spans)))
}

pub fn names(spans: &[SpanRecord]) -> Vec<&str> {
    spans.iter().map(|s| s.name.as_str()).collect()
}

/// Every span shares one trace id and every child closed no later than its parent.
pub fn assert_well_formed(spans: &[SpanRecord]) {
    let Some(first) = spans.first() else {
        return;
    };
    for span in spans {
        assert_eq!(span.trace_id, first.trace_id, "mixed traces: {span:?}");
        assert!(span.start_ts <= span.end_ts, "span ends before start: {span:?}");
        if let Some(parent) = spans
            .iter()
            .find(|p| Some(&p.span_id) == span.parent_span_id.as_ref())
        {
            assert!(
                span.end_ts <= parent.end_ts,
                "{} closed after its parent {}",
                span.name,
                parent.name
            );
        }
    }
}
