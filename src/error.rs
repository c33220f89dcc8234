//! Error types for the orchestration runtime
//!
//! Every failure that crosses a component boundary carries an [`ErrorCode`],
//! the stable wire-level taxonomy that retry logic, the reliability tracker,
//! and the master agent's user-facing translation all key off.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for the orchestration runtime
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Stable error taxonomy shared across the runtime.
///
/// The wire names are SCREAMING_SNAKE strings so they survive serialization
/// into task errors and communication-event records unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Inbound payload failed its task input schema
    InvalidInput,
    /// A sub-agent produced a success envelope that failed its output schema
    InvalidOutput,
    /// The task name is not one the addressed agent implements
    UnknownTask,
    /// The addressed agent is not registered on the bus
    AgentUnavailable,
    /// A request deadline elapsed before a terminal response arrived
    TimeoutError,
    /// The caller is not allowed to perform the operation
    PermissionDenied,
    /// A configured business rule refused the operation
    BusinessRuleViolation,
    /// A downstream third-party API failed
    ExternalApiFailure,
    /// The backing store failed
    DatabaseError,
    /// A network-level failure between components
    NetworkError,
    /// Admission control refused the request
    RateLimited,
    /// An agent id was registered twice
    DuplicateAgent,
}

impl ErrorCode {
    /// The wire-level string form, e.g. `TIMEOUT_ERROR`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidInput => "INVALID_INPUT",
            ErrorCode::InvalidOutput => "INVALID_OUTPUT",
            ErrorCode::UnknownTask => "UNKNOWN_TASK",
            ErrorCode::AgentUnavailable => "AGENT_UNAVAILABLE",
            ErrorCode::TimeoutError => "TIMEOUT_ERROR",
            ErrorCode::PermissionDenied => "PERMISSION_DENIED",
            ErrorCode::BusinessRuleViolation => "BUSINESS_RULE_VIOLATION",
            ErrorCode::ExternalApiFailure => "EXTERNAL_API_FAILURE",
            ErrorCode::DatabaseError => "DATABASE_ERROR",
            ErrorCode::NetworkError => "NETWORK_ERROR",
            ErrorCode::RateLimited => "RATE_LIMITED",
            ErrorCode::DuplicateAgent => "DUPLICATE_AGENT",
        }
    }

    /// Parse a wire-level code string. Unknown strings map to `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "INVALID_INPUT" => Some(ErrorCode::InvalidInput),
            "INVALID_OUTPUT" => Some(ErrorCode::InvalidOutput),
            "UNKNOWN_TASK" => Some(ErrorCode::UnknownTask),
            "AGENT_UNAVAILABLE" => Some(ErrorCode::AgentUnavailable),
            "TIMEOUT_ERROR" => Some(ErrorCode::TimeoutError),
            "PERMISSION_DENIED" => Some(ErrorCode::PermissionDenied),
            "BUSINESS_RULE_VIOLATION" => Some(ErrorCode::BusinessRuleViolation),
            "EXTERNAL_API_FAILURE" => Some(ErrorCode::ExternalApiFailure),
            "DATABASE_ERROR" => Some(ErrorCode::DatabaseError),
            "NETWORK_ERROR" => Some(ErrorCode::NetworkError),
            "RATE_LIMITED" => Some(ErrorCode::RateLimited),
            "DUPLICATE_AGENT" => Some(ErrorCode::DuplicateAgent),
            _ => None,
        }
    }

    /// Whether an operation failing with this code is worth retrying.
    ///
    /// Contract violations and deliberate refusals are final; transport and
    /// environment failures are transient.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            ErrorCode::AgentUnavailable
                | ErrorCode::TimeoutError
                | ErrorCode::ExternalApiFailure
                | ErrorCode::DatabaseError
                | ErrorCode::NetworkError
        )
    }

    /// Whether this code should open an incident in the reliability tracker
    /// and count against component health.
    pub fn environmental(&self) -> bool {
        matches!(
            self,
            ErrorCode::ExternalApiFailure | ErrorCode::DatabaseError | ErrorCode::NetworkError
        )
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main error type for the orchestration runtime
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// An agent id was already bound on the bus. Fatal during startup.
    #[error("Agent already registered: {agent_id}")]
    DuplicateAgent { agent_id: String },

    /// The addressed agent is not registered
    #[error("Agent unavailable: {agent_id}")]
    AgentUnavailable { agent_id: String },

    /// A request deadline elapsed with no terminal response
    #[error("Request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// A failure propagated from an agent handler, original code preserved
    #[error("Agent error [{code}]: {message}")]
    Agent { code: ErrorCode, message: String },

    /// Admission control refused the request
    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    /// An input guardrail refused the caller's input
    #[error("Guardrail triggered: {message}")]
    GuardrailTriggered { message: String },

    /// Session lifecycle error
    #[error("Session error: {0}")]
    Session(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl OrchestratorError {
    /// The taxonomy code for this error, used by retry classification and
    /// the master agent's user-facing translation.
    pub fn code(&self) -> ErrorCode {
        match self {
            OrchestratorError::DuplicateAgent { .. } => ErrorCode::DuplicateAgent,
            OrchestratorError::AgentUnavailable { .. } => ErrorCode::AgentUnavailable,
            OrchestratorError::Timeout { .. } => ErrorCode::TimeoutError,
            OrchestratorError::Agent { code, .. } => *code,
            OrchestratorError::RateLimited { .. } => ErrorCode::RateLimited,
            OrchestratorError::GuardrailTriggered { .. } => ErrorCode::BusinessRuleViolation,
            OrchestratorError::Session(_) => ErrorCode::DatabaseError,
            OrchestratorError::Serialization(_) => ErrorCode::InvalidInput,
            OrchestratorError::Io(_) => ErrorCode::NetworkError,
            OrchestratorError::Config(_) => ErrorCode::InvalidInput,
        }
    }

    /// Shorthand for building an agent-side failure with a taxonomy code.
    pub fn agent(code: ErrorCode, message: impl Into<String>) -> Self {
        OrchestratorError::Agent {
            code,
            message: message.into(),
        }
    }
}
