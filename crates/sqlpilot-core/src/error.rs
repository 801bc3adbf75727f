use thiserror::Error;

/// Errors that abort a run or an infrastructure call.
///
/// Domain failures (a bad question, a failing SQL statement, a chart that
/// could not be drawn) never show up here: steps record them in the state
/// record instead. What remains is either an internal fault of the
/// orchestration core or a problem with the surrounding infrastructure.
#[derive(Debug, Error)]
pub enum SqlPilotError {
    // LLM errors
    #[error("LLM request failed: {0}")]
    LlmRequest(String),

    #[error("LLM streaming error: {0}")]
    LlmStream(String),

    #[error("LLM provider not supported: {0}")]
    UnsupportedProvider(String),

    #[error("LLM response parse error: {0}")]
    LlmParse(String),

    // Storage errors
    #[error("Database error: {0}")]
    Database(String),

    // Orchestration errors
    #[error("Contract violation in step {step}: {detail}")]
    ContractViolation { step: String, detail: String },

    #[error("Run exceeded the global step ceiling ({0})")]
    StepLimitExceeded(usize),

    #[error("Graph misconfigured: {0}")]
    Misconfigured(String),

    #[error("Run cancelled")]
    Cancelled,

    #[error("Run task failed: {0}")]
    Join(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Coarse classification of a [`SqlPilotError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A step or adapter broke its declared interface.
    ContractViolation,
    /// The global step ceiling was reached.
    ResourceExhaustion,
    /// The caller cancelled the run.
    Cancelled,
    /// Config, I/O, network or database plumbing.
    Infrastructure,
}

impl SqlPilotError {
    pub fn contract(step: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::ContractViolation {
            step: step.into(),
            detail: detail.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ContractViolation { .. } | Self::Misconfigured(_) => ErrorKind::ContractViolation,
            Self::StepLimitExceeded(_) => ErrorKind::ResourceExhaustion,
            Self::Cancelled => ErrorKind::Cancelled,
            _ => ErrorKind::Infrastructure,
        }
    }

    /// True for faults of the orchestration core itself, as opposed to
    /// cancellation or infrastructure trouble.
    pub fn is_internal(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::ContractViolation | ErrorKind::ResourceExhaustion
        )
    }
}

pub type Result<T> = std::result::Result<T, SqlPilotError>;

/// Failure reported by a collaborator adapter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdapterError {
    /// The collaborator could not do the work (SQL error, HTTP failure, ...).
    #[error("{0}")]
    Failed(String),
    /// The collaborator answered, but not in the agreed shape.
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl AdapterError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed(msg.into())
    }

    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::Malformed(_))
    }
}

impl From<SqlPilotError> for AdapterError {
    fn from(e: SqlPilotError) -> Self {
        match e {
            SqlPilotError::LlmParse(msg) => Self::Malformed(msg),
            other => Self::Failed(other.to_string()),
        }
    }
}

pub type AdapterResult<T> = std::result::Result<T, AdapterError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert_eq!(
            SqlPilotError::contract("execution", "bad").kind(),
            ErrorKind::ContractViolation
        );
        assert_eq!(
            SqlPilotError::StepLimitExceeded(50).kind(),
            ErrorKind::ResourceExhaustion
        );
        assert_eq!(SqlPilotError::Cancelled.kind(), ErrorKind::Cancelled);
        assert_eq!(
            SqlPilotError::Config("x".into()).kind(),
            ErrorKind::Infrastructure
        );
        assert!(SqlPilotError::StepLimitExceeded(1).is_internal());
        assert!(!SqlPilotError::Cancelled.is_internal());
    }

    #[test]
    fn test_adapter_error_from_core() {
        let e: AdapterError = SqlPilotError::LlmParse("not json".into()).into();
        assert!(e.is_malformed());

        let e: AdapterError = SqlPilotError::LlmRequest("HTTP 500".into()).into();
        assert_eq!(e, AdapterError::Failed("LLM request failed: HTTP 500".into()));
    }
}
