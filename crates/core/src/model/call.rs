use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::MeshError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CallOutcome {
    Success,
    Timeout,
    ConnectionError,
    HttpError,
    SimulatedFault,
}

impl CallOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Timeout => "timeout",
            Self::ConnectionError => "connection-error",
            Self::HttpError => "http-error",
            Self::SimulatedFault => "simulated-fault",
        }
    }
}

impl fmt::Display for CallOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal result of one downstream call, after any retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallResult {
    pub outcome: CallOutcome,
    pub status: Option<u16>,
    pub body: String,
    pub error: Option<String>,
    pub duration: Duration,
    pub attempts: u32,
}

impl CallResult {
    pub fn success(status: u16, body: String, duration: Duration) -> Self {
        Self {
            outcome: CallOutcome::Success,
            status: Some(status),
            body,
            error: None,
            duration,
            attempts: 1,
        }
    }

    pub fn failure(outcome: CallOutcome, error: String, duration: Duration) -> Self {
        Self {
            outcome,
            status: None,
            body: String::new(),
            error: Some(error),
            duration,
            attempts: 1,
        }
    }

    pub fn from_error(err: &MeshError, duration: Duration) -> Self {
        let outcome = match err {
            MeshError::DownstreamTimeout(_) => CallOutcome::Timeout,
            MeshError::DownstreamStatus { .. } => CallOutcome::HttpError,
            MeshError::SimulatedFault(_) => CallOutcome::SimulatedFault,
            _ => CallOutcome::ConnectionError,
        };
        let mut result = Self::failure(outcome, err.to_string(), duration);
        if let MeshError::DownstreamStatus { status, .. } = err {
            result.status = Some(*status);
        }
        result
    }

    pub fn is_success(&self) -> bool {
        self.outcome == CallOutcome::Success
    }

    /// Failure causes a retry policy may re-attempt. Client errors (4xx) are final.
    pub fn is_retryable(&self) -> bool {
        match self.outcome {
            CallOutcome::Success => false,
            CallOutcome::HttpError => self.status.is_none_or(|s| s >= 500),
            CallOutcome::Timeout | CallOutcome::ConnectionError | CallOutcome::SimulatedFault => {
                true
            }
        }
    }

    /// Converts a failed result back into the error a critical call surfaces.
    pub fn to_error(&self, target: &str) -> Option<MeshError> {
        let message = format!(
            "{target}: {}",
            self.error.clone().unwrap_or_else(|| self.outcome.to_string())
        );
        match self.outcome {
            CallOutcome::Success => None,
            CallOutcome::Timeout => Some(MeshError::DownstreamTimeout(message)),
            CallOutcome::ConnectionError => Some(MeshError::DownstreamConnection(message)),
            CallOutcome::SimulatedFault => Some(MeshError::SimulatedFault(message)),
            CallOutcome::HttpError => Some(MeshError::DownstreamStatus {
                status: self.status.unwrap_or(500),
                message,
            }),
        }
    }

    /// One line of the caller's aggregate response text.
    pub fn summary_line(&self, target: &str, retried: bool) -> String {
        if self.is_success() {
            let body = self.body.trim_end();
            if retried {
                format!(
                    "Called {target}: Success on attempt {}: {body}",
                    self.attempts
                )
            } else {
                format!("Called {target}: {body}")
            }
        } else {
            let error = self.error.as_deref().unwrap_or("unknown error");
            if retried {
                format!(
                    "Error calling {target} after {} attempts: {error}",
                    self.attempts
                )
            } else {
                format!("Error calling {target}: {error}")
            }
        }
    }
}
