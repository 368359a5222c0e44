use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::chaos::{ChaosMode, ChaosProfile};
use crate::error::{MeshError, Result};
use crate::time::parse_duration_str;

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub topology_path: PathBuf,
    pub chaos_mode: ChaosMode,
    pub chaos: ChaosProfile,
    pub chaos_seed: Option<u64>,
    pub request_timeout: Duration,
    pub response_preview_bytes: usize,
    pub export_endpoint: Option<String>,
    pub export_protocol: String,
    pub export_compression: String,
    pub export_headers: Vec<(String, String)>,
    pub export_timeout: Duration,
    pub export_batch_size: usize,
    pub export_flush_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            topology_path: PathBuf::from("meshsim.toml"),
            chaos_mode: ChaosMode::Off,
            chaos: ChaosProfile::default(),
            chaos_seed: None,
            request_timeout: Duration::from_secs(30),
            response_preview_bytes: 200,
            export_endpoint: None,
            export_protocol: "http/protobuf".to_string(),
            export_compression: "none".to_string(),
            export_headers: Vec::new(),
            export_timeout: Duration::from_secs(10),
            export_batch_size: 512,
            export_flush_ms: 200,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let mut cfg = Self::default();
        let config_path = config_file_path();
        if let Some(file_overrides) = load_file_overrides(&config_path)? {
            apply_overrides(&mut cfg, file_overrides, "config file")?;
        }
        let env_overrides = load_env_overrides()?;
        apply_overrides(&mut cfg, env_overrides, "environment")?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Default chaos profile for endpoints, honoring the process-wide toggle.
    pub fn effective_chaos(&self) -> ChaosProfile {
        if self.chaos_mode.is_on() {
            self.chaos.clone()
        } else {
            ChaosProfile::inactive()
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.chaos.validate()?;
        if self.export_batch_size == 0 {
            return Err(MeshError::Config(
                "export_batch_size must be at least 1".to_string(),
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(MeshError::Config(
                "request_timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigOverrides {
    topology_path: Option<PathBuf>,
    chaos_mode: Option<String>,
    chaos_crash_rate: Option<f64>,
    chaos_latency_rate: Option<f64>,
    chaos_oversized_rate: Option<f64>,
    chaos_latency_min: Option<String>,
    chaos_latency_max: Option<String>,
    chaos_oversized_bytes: Option<usize>,
    chaos_seed: Option<u64>,
    request_timeout: Option<String>,
    response_preview_bytes: Option<usize>,
    export_endpoint: Option<String>,
    export_protocol: Option<String>,
    export_compression: Option<String>,
    export_headers: Option<String>,
    export_timeout: Option<String>,
    export_batch_size: Option<usize>,
    export_flush_ms: Option<u64>,
}

fn config_file_path() -> PathBuf {
    if let Ok(path) = env::var("MESHSIM_CONFIG") {
        return PathBuf::from(path);
    }

    let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
    let config_home = env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(home).join(".config"));
    config_home.join("meshsim/config.toml")
}

fn load_file_overrides(path: &Path) -> Result<Option<ConfigOverrides>> {
    if !path.exists() {
        return Ok(None);
    }

    let raw = fs::read_to_string(path)
        .map_err(|e| MeshError::Config(format!("failed reading {}: {e}", path.display())))?;
    let parsed: ConfigOverrides = toml::from_str(&raw)
        .map_err(|e| MeshError::Config(format!("failed parsing {}: {e}", path.display())))?;
    Ok(Some(parsed))
}

fn env_parse<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(v) => v
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| MeshError::Config(format!("bad {name} in environment: {e}"))),
        Err(_) => Ok(None),
    }
}

fn load_env_overrides() -> Result<ConfigOverrides> {
    Ok(ConfigOverrides {
        topology_path: env::var("MESHSIM_TOPOLOGY").ok().map(PathBuf::from),
        chaos_mode: env::var("MESHSIM_CHAOS_MODE")
            .or_else(|_| env::var("CHAOS_MODE"))
            .ok(),
        chaos_crash_rate: env_parse("MESHSIM_CHAOS_CRASH_RATE")?,
        chaos_latency_rate: env_parse("MESHSIM_CHAOS_LATENCY_RATE")?,
        chaos_oversized_rate: env_parse("MESHSIM_CHAOS_OVERSIZED_RATE")?,
        chaos_latency_min: env::var("MESHSIM_CHAOS_LATENCY_MIN").ok(),
        chaos_latency_max: env::var("MESHSIM_CHAOS_LATENCY_MAX").ok(),
        chaos_oversized_bytes: env_parse("MESHSIM_CHAOS_OVERSIZED_BYTES")?,
        chaos_seed: env_parse("MESHSIM_CHAOS_SEED")?,
        request_timeout: env::var("MESHSIM_REQUEST_TIMEOUT").ok(),
        response_preview_bytes: env_parse("MESHSIM_RESPONSE_PREVIEW_BYTES")?,
        export_endpoint: env::var("MESHSIM_EXPORT_ENDPOINT")
            .or_else(|_| env::var("OTEL_EXPORTER_OTLP_ENDPOINT"))
            .ok(),
        export_protocol: env::var("MESHSIM_EXPORT_PROTOCOL").ok(),
        export_compression: env::var("MESHSIM_EXPORT_COMPRESSION").ok(),
        export_headers: env::var("MESHSIM_EXPORT_HEADERS").ok(),
        export_timeout: env::var("MESHSIM_EXPORT_TIMEOUT").ok(),
        export_batch_size: None,
        export_flush_ms: None,
    })
}

fn apply_duration(target: &mut Duration, value: Option<String>, field: &str, source: &str) -> Result<()> {
    if let Some(v) = value {
        *target = parse_duration_str(&v)
            .map_err(|e| MeshError::Config(format!("bad {field} in {source}: {e}")))?;
    }
    Ok(())
}

fn apply_overrides(cfg: &mut Config, overrides: ConfigOverrides, source: &str) -> Result<()> {
    if let Some(v) = overrides.topology_path {
        cfg.topology_path = v;
    }
    if let Some(v) = overrides.chaos_mode {
        cfg.chaos_mode = ChaosMode::parse(&v).map_err(|_| {
            MeshError::Config(format!("bad chaos_mode in {source}: {v:?} (expected on or off)"))
        })?;
    }
    if let Some(v) = overrides.chaos_crash_rate {
        cfg.chaos.crash_rate = v;
    }
    if let Some(v) = overrides.chaos_latency_rate {
        cfg.chaos.latency_rate = v;
    }
    if let Some(v) = overrides.chaos_oversized_rate {
        cfg.chaos.oversized_rate = v;
    }
    apply_duration(
        &mut cfg.chaos.latency_min,
        overrides.chaos_latency_min,
        "chaos_latency_min",
        source,
    )?;
    apply_duration(
        &mut cfg.chaos.latency_max,
        overrides.chaos_latency_max,
        "chaos_latency_max",
        source,
    )?;
    if let Some(v) = overrides.chaos_oversized_bytes {
        cfg.chaos.oversized_bytes = v;
    }
    if let Some(v) = overrides.chaos_seed {
        cfg.chaos_seed = Some(v);
    }
    apply_duration(
        &mut cfg.request_timeout,
        overrides.request_timeout,
        "request_timeout",
        source,
    )?;
    if let Some(v) = overrides.response_preview_bytes {
        cfg.response_preview_bytes = v;
    }
    if let Some(v) = overrides.export_endpoint {
        cfg.export_endpoint = Some(v);
    }
    if let Some(v) = overrides.export_protocol {
        cfg.export_protocol = v;
    }
    if let Some(v) = overrides.export_compression {
        cfg.export_compression = v;
    }
    if let Some(v) = overrides.export_headers {
        cfg.export_headers = parse_export_headers(&v).map_err(|e| {
            MeshError::Config(format!("bad export_headers in {source}: {e} (value={v})"))
        })?;
    }
    apply_duration(
        &mut cfg.export_timeout,
        overrides.export_timeout,
        "export_timeout",
        source,
    )?;
    if let Some(v) = overrides.export_batch_size {
        cfg.export_batch_size = v;
    }
    if let Some(v) = overrides.export_flush_ms {
        cfg.export_flush_ms = v;
    }
    Ok(())
}

fn parse_export_headers(raw: &str) -> Result<Vec<(String, String)>> {
    let mut out = Vec::new();
    for entry in raw.split(',') {
        let trimmed = entry.trim();
        if trimmed.is_empty() {
            continue;
        }
        let Some((key, value)) = trimmed.split_once('=') else {
            return Err(MeshError::Config(
                "header entries must use key=value syntax".to_string(),
            ));
        };
        let key = key.trim();
        if key.is_empty() {
            return Err(MeshError::Config("header key cannot be empty".to_string()));
        }
        out.push((key.to_string(), value.trim().to_string()));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_has_chaos_off() {
        let cfg = Config::default();
        assert_eq!(cfg.chaos_mode, ChaosMode::Off);
        assert!(!cfg.effective_chaos().is_active());
        assert_eq!(cfg.response_preview_bytes, 200);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn default_chaos_rates_partition_the_interval() {
        let cfg = Config::default();
        assert_eq!(cfg.chaos.crash_rate, 0.15);
        assert_eq!(cfg.chaos.latency_rate, 0.30);
        assert_eq!(cfg.chaos.oversized_rate, 0.10);
        assert_eq!(cfg.chaos.oversized_bytes, 45_000_000);
    }

    #[test]
    fn parse_export_headers_accepts_list() {
        let headers = parse_export_headers("x-tenant=dev,authorization=Bearer token").unwrap();
        assert_eq!(
            headers,
            vec![
                ("x-tenant".to_string(), "dev".to_string()),
                ("authorization".to_string(), "Bearer token".to_string())
            ]
        );
    }

    #[test]
    fn parse_export_headers_rejects_bad_entries() {
        assert!(parse_export_headers("x-tenant").is_err());
        assert!(parse_export_headers("=dev").is_err());
    }

    #[test]
    fn apply_file_overrides_updates_chaos_and_export() {
        let mut cfg = Config::default();
        let file = ConfigOverrides {
            chaos_mode: Some("on".to_string()),
            chaos_crash_rate: Some(0.5),
            chaos_latency_min: Some("10ms".to_string()),
            chaos_latency_max: Some("20ms".to_string()),
            request_timeout: Some("3s".to_string()),
            export_endpoint: Some("http://127.0.0.1:4318".to_string()),
            export_compression: Some("gzip".to_string()),
            export_headers: Some("x-tenant=dev".to_string()),
            ..ConfigOverrides::default()
        };

        apply_overrides(&mut cfg, file, "config file").unwrap();

        assert!(cfg.chaos_mode.is_on());
        assert_eq!(cfg.chaos.crash_rate, 0.5);
        assert_eq!(cfg.chaos.latency_min, Duration::from_millis(10));
        assert_eq!(cfg.request_timeout, Duration::from_secs(3));
        assert_eq!(
            cfg.export_endpoint,
            Some("http://127.0.0.1:4318".to_string())
        );
        assert_eq!(cfg.export_compression, "gzip");
        assert_eq!(
            cfg.export_headers,
            vec![("x-tenant".to_string(), "dev".to_string())]
        );
        assert!(cfg.effective_chaos().is_active());
    }

    #[test]
    fn unknown_chaos_mode_is_rejected() {
        let mut cfg = Config::default();
        let env = ConfigOverrides {
            chaos_mode: Some("enabled".to_string()),
            ..ConfigOverrides::default()
        };
        let err = apply_overrides(&mut cfg, env, "environment").unwrap_err();
        assert!(matches!(err, MeshError::Config(_)));
        assert!(err.to_string().contains("chaos_mode in environment"));
        assert_eq!(cfg.chaos_mode, ChaosMode::Off);
    }

    #[test]
    fn excess_chaos_mass_fails_validation() {
        let mut cfg = Config::default();
        let file = ConfigOverrides {
            chaos_crash_rate: Some(0.9),
            ..ConfigOverrides::default()
        };
        apply_overrides(&mut cfg, file, "config file").unwrap();
        assert!(matches!(cfg.validate(), Err(MeshError::Config(_))));
    }

    #[test]
    fn bad_duration_names_its_source() {
        let mut cfg = Config::default();
        let file = ConfigOverrides {
            request_timeout: Some("later".to_string()),
            ..ConfigOverrides::default()
        };
        let err = apply_overrides(&mut cfg, file, "config file").unwrap_err();
        assert!(err.to_string().contains("config file"), "{err}");
    }
}
