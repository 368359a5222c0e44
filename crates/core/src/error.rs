use thiserror::Error;

#[derive(Debug, Error)]
pub enum MeshError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("simulated fault: {0}")]
    SimulatedFault(String),

    #[error("downstream timeout: {0}")]
    DownstreamTimeout(String),

    #[error("downstream connection error: {0}")]
    DownstreamConnection(String),

    #[error("downstream returned status {status}: {message}")]
    DownstreamStatus { status: u16, message: String },

    #[error("export error: {0}")]
    Export(String),

    #[error("io error: {0}")]
    Io(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl MeshError {
    /// HTTP status surfaced to an inbound caller when this error ends a request.
    pub fn status_code(&self) -> u16 {
        if self.is_downstream() {
            return 502;
        }
        match self {
            Self::Parse(_) => 400,
            Self::NotFound(_) => 404,
            _ => 500,
        }
    }

    pub fn is_downstream(&self) -> bool {
        matches!(
            self,
            Self::DownstreamTimeout(_)
                | Self::DownstreamConnection(_)
                | Self::DownstreamStatus { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, MeshError>;
