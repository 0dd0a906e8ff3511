use thiserror::Error;

/// Failures the engine distinguishes.
///
/// Everything except `Config` is contained at the cycle boundary (or, for
/// transport failures, at the single subscriber) and never stops the loop.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EngineError {
    /// Provider returned nothing usable for the whole universe.
    #[error("market data unavailable: {0}")]
    DataUnavailable(String),

    /// Scorer failed, panicked, or produced an invalid selection.
    #[error("scoring failed: {0}")]
    ScoringFailure(String),

    /// A single subscriber connection went away.
    #[error("subscriber {subscriber} transport failed: {reason}")]
    TransportFailure { subscriber: u64, reason: String },

    /// Fatal, reported before the loop starts.
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("export failed: {0}")]
    Export(String),
}

impl EngineError {
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::DataUnavailable(_) => "data_unavailable",
            EngineError::ScoringFailure(_) => "scoring_failure",
            EngineError::TransportFailure { .. } => "transport_failure",
            EngineError::Config(_) => "config",
            EngineError::Export(_) => "export",
        }
    }

    /// Whether the scheduler should cool down and try again.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, EngineError::Config(_))
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
