//! Bounded, fixed-interval retry for a single downstream call.

use std::time::Duration;

use rand::Rng;

use crate::error::{MeshError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
    pub jitter: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    Attempting(u32),
    Succeeded(u32),
    Exhausted(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    RetryableFailure,
    FatalFailure,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Result<Self> {
        if max_attempts == 0 {
            return Err(MeshError::Config(
                "retry max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            max_attempts,
            backoff,
            jitter: Duration::ZERO,
        })
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn start(&self) -> RetryState {
        RetryState::Attempting(1)
    }

    pub fn advance(&self, state: RetryState, outcome: AttemptOutcome) -> RetryState {
        let RetryState::Attempting(n) = state else {
            return state;
        };
        match outcome {
            AttemptOutcome::Success => RetryState::Succeeded(n),
            AttemptOutcome::FatalFailure => RetryState::Exhausted(n),
            AttemptOutcome::RetryableFailure if n < self.max_attempts => {
                RetryState::Attempting(n + 1)
            }
            AttemptOutcome::RetryableFailure => RetryState::Exhausted(n),
        }
    }

    /// Sleep between two attempts: the fixed backoff plus up to `jitter`.
    pub fn delay<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        if self.jitter.is_zero() {
            return self.backoff;
        }
        let extra = rng.random_range(0.0..=self.jitter.as_secs_f64());
        self.backoff + Duration::from_secs_f64(extra)
    }
}
