use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{MeshError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TraceId(String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SpanId(String);

impl TraceId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn parse(input: &str) -> Result<Self> {
        if input.len() != 32 || !input.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(MeshError::Parse(format!("invalid trace id: {input}")));
        }
        if input.chars().all(|c| c == '0') {
            return Err(MeshError::Parse("trace id must not be all zeros".into()));
        }
        Ok(Self(input.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl SpanId {
    pub fn generate() -> Self {
        let mut raw = rand::random::<u64>();
        while raw == 0 {
            raw = rand::random::<u64>();
        }
        Self(format!("{raw:016x}"))
    }

    pub fn parse(input: &str) -> Result<Self> {
        if input.len() != 16 || !input.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(MeshError::Parse(format!("invalid span id: {input}")));
        }
        if input.chars().all(|c| c == '0') {
            return Err(MeshError::Parse("span id must not be all zeros".into()));
        }
        Ok(Self(input.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ids() {
        let trace = TraceId::parse("4BF92F3577B34DA6A3CE929D0E0E4736").unwrap();
        let span = SpanId::parse("00f067aa0ba902b7").unwrap();
        assert_eq!(trace.as_str(), "4bf92f3577b34da6a3ce929d0e0e4736");
        assert_eq!(span.as_str(), "00f067aa0ba902b7");
    }

    #[test]
    fn rejects_bad_ids() {
        assert!(TraceId::parse("abc").is_err());
        assert!(TraceId::parse("00000000000000000000000000000000").is_err());
        assert!(SpanId::parse("zzzzzzzzzzzzzzzz").is_err());
        assert!(SpanId::parse("0000000000000000").is_err());
    }

    #[test]
    fn generated_ids_round_trip_through_parse() {
        let trace = TraceId::generate();
        let span = SpanId::generate();
        assert_eq!(TraceId::parse(trace.as_str()).unwrap(), trace);
        assert_eq!(SpanId::parse(span.as_str()).unwrap(), span);
    }
}
