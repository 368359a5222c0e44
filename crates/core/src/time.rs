use std::time::Duration;

use crate::error::{MeshError, Result};

pub fn parse_duration_str(input: &str) -> Result<Duration> {
    humantime::parse_duration(input.trim())
        .map_err(|e| MeshError::Parse(format!("invalid duration {input}: {e}")))
}

/// Renders a duration in humantime syntax, for config echoes and CLI summaries.
pub fn format_duration(duration: Duration) -> String {
    humantime::format_duration(duration).to_string()
}
