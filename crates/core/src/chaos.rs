//! Probabilistic fault model.
//!
//! A [`ChaosProfile`] partitions the unit interval into ordered bands
//! `[0, crash) -> crash`, `[crash, crash+latency) -> latency`,
//! `[.., ..+oversized) -> oversized`, remainder -> normal. One uniform draw
//! picks the band.

use std::sync::Mutex;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::{MeshError, Result};
use crate::time::parse_duration_str;

const RATE_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChaosMode {
    #[default]
    Off,
    On,
}

impl ChaosMode {
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "on" | "1" | "true" | "yes" | "active" => Ok(Self::On),
            "off" | "0" | "false" | "no" | "inactive" => Ok(Self::Off),
            other => Err(MeshError::Config(format!(
                "chaos mode must be on or off, got {other:?}"
            ))),
        }
    }

    pub fn is_on(self) -> bool {
        self == Self::On
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::On => "on",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChaosProfile {
    pub crash_rate: f64,
    pub latency_rate: f64,
    pub oversized_rate: f64,
    pub latency_min: Duration,
    pub latency_max: Duration,
    pub oversized_bytes: usize,
}

impl Default for ChaosProfile {
    fn default() -> Self {
        Self {
            crash_rate: 0.15,
            latency_rate: 0.30,
            oversized_rate: 0.10,
            latency_min: Duration::from_secs(3),
            latency_max: Duration::from_secs(9),
            oversized_bytes: 45_000_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChaosDecision {
    Normal,
    Crash,
    Latency(Duration),
    Oversized(usize),
}

impl ChaosDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Crash => "crash",
            Self::Latency(_) => "latency",
            Self::Oversized(_) => "oversized",
        }
    }
}

impl ChaosProfile {
    /// The profile used whenever chaos is switched off. Always decides `Normal`.
    pub fn inactive() -> Self {
        Self {
            crash_rate: 0.0,
            latency_rate: 0.0,
            oversized_rate: 0.0,
            ..Self::default()
        }
    }

    pub fn is_active(&self) -> bool {
        self.crash_rate > 0.0 || self.latency_rate > 0.0 || self.oversized_rate > 0.0
    }

    pub fn validate(&self) -> Result<()> {
        for (name, rate) in [
            ("crash_rate", self.crash_rate),
            ("latency_rate", self.latency_rate),
            ("oversized_rate", self.oversized_rate),
        ] {
            if !(0.0..=1.0).contains(&rate) {
                return Err(MeshError::Config(format!(
                    "chaos {name} must be within [0, 1], got {rate}"
                )));
            }
        }
        let total = self.crash_rate + self.latency_rate + self.oversized_rate;
        if total > 1.0 + RATE_EPSILON {
            return Err(MeshError::Config(format!(
                "chaos rates sum to {total}, which exceeds 1.0"
            )));
        }
        if self.latency_min > self.latency_max {
            return Err(MeshError::Config(format!(
                "chaos latency range is inverted: {:?} > {:?}",
                self.latency_min, self.latency_max
            )));
        }
        Ok(())
    }

    pub fn decide<R: Rng + ?Sized>(&self, rng: &mut R) -> ChaosDecision {
        let draw = rng.random::<f64>();
        self.decide_with_draw(draw, rng)
    }

    /// Maps a draw in `[0, 1)` onto the profile's bands. `rng` is only used to pick
    /// the latency duration.
    pub fn decide_with_draw<R: Rng + ?Sized>(&self, draw: f64, rng: &mut R) -> ChaosDecision {
        let crash_end = self.crash_rate;
        let latency_end = crash_end + self.latency_rate;
        let oversized_end = latency_end + self.oversized_rate;

        if draw < crash_end {
            ChaosDecision::Crash
        } else if draw < latency_end {
            ChaosDecision::Latency(self.sample_latency(rng))
        } else if draw < oversized_end {
            ChaosDecision::Oversized(self.oversized_bytes)
        } else {
            ChaosDecision::Normal
        }
    }

    fn sample_latency<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        if self.latency_min >= self.latency_max {
            return self.latency_min;
        }
        let secs =
            rng.random_range(self.latency_min.as_secs_f64()..=self.latency_max.as_secs_f64());
        Duration::from_secs_f64(secs)
    }
}

/// Partial profile from topology configuration. Rates it leaves out are zero; the
/// latency range and payload size fall back to the process defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChaosOverride {
    pub crash_rate: Option<f64>,
    pub latency_rate: Option<f64>,
    pub oversized_rate: Option<f64>,
    pub latency_min: Option<String>,
    pub latency_max: Option<String>,
    pub oversized_bytes: Option<usize>,
}

impl ChaosOverride {
    pub fn resolve(&self, defaults: &ChaosProfile) -> Result<ChaosProfile> {
        let profile = ChaosProfile {
            crash_rate: self.crash_rate.unwrap_or(0.0),
            latency_rate: self.latency_rate.unwrap_or(0.0),
            oversized_rate: self.oversized_rate.unwrap_or(0.0),
            latency_min: parse_optional_duration(self.latency_min.as_deref(), "latency_min")?
                .unwrap_or(defaults.latency_min),
            latency_max: parse_optional_duration(self.latency_max.as_deref(), "latency_max")?
                .unwrap_or(defaults.latency_max),
            oversized_bytes: self.oversized_bytes.unwrap_or(defaults.oversized_bytes),
        };
        profile.validate()?;
        Ok(profile)
    }

    /// Checks what can be checked without the process profile: rates, duration
    /// syntax, and the latency range when both ends are named.
    pub fn check(&self) -> Result<()> {
        let rates = ChaosProfile {
            crash_rate: self.crash_rate.unwrap_or(0.0),
            latency_rate: self.latency_rate.unwrap_or(0.0),
            oversized_rate: self.oversized_rate.unwrap_or(0.0),
            ..ChaosProfile::inactive()
        };
        rates.validate()?;
        let min = parse_optional_duration(self.latency_min.as_deref(), "latency_min")?;
        let max = parse_optional_duration(self.latency_max.as_deref(), "latency_max")?;
        match (min, max) {
            (Some(min), Some(max)) if min > max => Err(MeshError::Config(format!(
                "chaos latency range is inverted: {min:?} > {max:?}"
            ))),
            _ => Ok(()),
        }
    }
}

fn parse_optional_duration(raw: Option<&str>, field: &str) -> Result<Option<Duration>> {
    raw.map(|v| {
        parse_duration_str(v).map_err(|e| MeshError::Config(format!("bad chaos {field}: {e}")))
    })
    .transpose()
}

/// Process-wide source of chaos draws. The lock is held only for a single draw.
#[derive(Debug)]
pub struct ChaosInjector {
    rng: Mutex<StdRng>,
}

impl ChaosInjector {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            rng: Mutex::new(rng),
        }
    }

    pub fn decide(&self, profile: &ChaosProfile) -> ChaosDecision {
        if !profile.is_active() {
            return ChaosDecision::Normal;
        }
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        profile.decide(&mut *rng)
    }
}

/// Body returned in place of an endpoint's text under an oversized decision.
pub fn oversized_payload(size: usize) -> String {
    "A".repeat(size)
}
