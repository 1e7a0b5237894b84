use thiserror::Error;

/// Stable error taxonomy shared by every component. Callers that cross a
/// module boundary into orchestration code (CLI, tool dispatch) wrap these
/// with `anyhow::Context`; internal code matches on `kind()`/`code()` directly.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("config invalid: {0}")]
    ConfigInvalid(String),

    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("external service unavailable: {0}")]
    ExternalUnavailable(String),

    #[error("parse failed: {0}")]
    ParseFailed(String),

    #[error("budget exceeded: {0}")]
    BudgetExceeded(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("rate limited: {0}")]
    RateLimited(String),
}

/// Coarse severity used when an error is recorded into per-file indexing
/// stats rather than aborting the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    #[default]
    Warning,
    Error,
    Critical,
}

impl CoreError {
    /// Stable string id surfaced in tool-RPC error payloads and stats entries.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::ConfigInvalid(_) => "config_invalid",
            CoreError::DimensionMismatch { .. } => "dimension_mismatch",
            CoreError::ExternalUnavailable(_) => "external_unavailable",
            CoreError::ParseFailed(_) => "parse_failed",
            CoreError::BudgetExceeded(_) => "budget_exceeded",
            CoreError::NotFound(_) => "not_found",
            CoreError::RateLimited(_) => "rate_limited",
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            CoreError::ConfigInvalid(_) => ErrorSeverity::Critical,
            CoreError::DimensionMismatch { .. } => ErrorSeverity::Error,
            CoreError::ExternalUnavailable(_) => ErrorSeverity::Error,
            CoreError::ParseFailed(_) => ErrorSeverity::Warning,
            CoreError::BudgetExceeded(_) => ErrorSeverity::Warning,
            CoreError::NotFound(_) => ErrorSeverity::Warning,
            CoreError::RateLimited(_) => ErrorSeverity::Error,
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
