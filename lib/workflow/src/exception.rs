//! Business-level failures raised by node bodies.
//!
//! A `NodeException` is a value, not a Rust error chain: it travels inside
//! `node.execution.rejected` and `workflow.execution.rejected` events and can
//! be captured as data by a `TryNode`. The `(code, message)` pair is stable
//! and is what consumers of the event stream match on.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

/// Stable machine-readable failure codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Attributes or workflow inputs could not be bound or had the wrong shape.
    InvalidInputs,
    /// A node produced outputs that do not match its declared schema.
    InvalidOutputs,
    /// An upstream provider (LLM, search, HTTP) failed.
    ProviderError,
    /// Engine or node bug; also used for scheduler-internal failures.
    InternalError,
    /// User-supplied code failed to compile or run.
    InvalidCode,
    /// A failure raised deliberately by user logic.
    UserDefinedError,
    /// The execution was cancelled through its cancellation token.
    WorkflowCancelled,
}

impl ErrorCode {
    /// Returns the wire name of the code.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidInputs => "INVALID_INPUTS",
            Self::InvalidOutputs => "INVALID_OUTPUTS",
            Self::ProviderError => "PROVIDER_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
            Self::InvalidCode => "INVALID_CODE",
            Self::UserDefinedError => "USER_DEFINED_ERROR",
            Self::WorkflowCancelled => "WORKFLOW_CANCELLED",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed failure raised by a node's `run`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeException {
    /// The failure code.
    pub code: ErrorCode,
    /// Human-readable detail.
    pub message: String,
}

impl NodeException {
    /// Creates a new exception.
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Shorthand for an `INVALID_INPUTS` exception.
    #[must_use]
    pub fn invalid_inputs(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInputs, message)
    }

    /// Shorthand for an `INVALID_OUTPUTS` exception.
    #[must_use]
    pub fn invalid_outputs(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidOutputs, message)
    }

    /// Shorthand for a `PROVIDER_ERROR` exception.
    #[must_use]
    pub fn provider(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ProviderError, message)
    }

    /// Shorthand for an `INTERNAL_ERROR` exception.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    /// The exception used when an execution observes its cancellation token.
    #[must_use]
    pub fn cancelled() -> Self {
        Self::new(ErrorCode::WorkflowCancelled, "workflow execution was cancelled")
    }

    /// Returns the exception as a `{code, message}` JSON object.
    #[must_use]
    pub fn to_json(&self) -> JsonValue {
        serde_json::json!({
            "code": self.code.as_str(),
            "message": self.message,
        })
    }
}

impl fmt::Display for NodeException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for NodeException {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_serializes_in_screaming_snake_case() {
        let json = serde_json::to_string(&ErrorCode::ProviderError).expect("serialize");
        assert_eq!(json, "\"PROVIDER_ERROR\"");
    }

    #[test]
    fn to_json_matches_serde_form() {
        let exc = NodeException::provider("rate limited");
        let via_serde = serde_json::to_value(&exc).expect("serialize");
        assert_eq!(exc.to_json(), via_serde);
        assert_eq!(via_serde["code"], "PROVIDER_ERROR");
    }

    #[test]
    fn display_includes_code_and_message() {
        let exc = NodeException::invalid_inputs("missing 'query'");
        assert_eq!(exc.to_string(), "INVALID_INPUTS: missing 'query'");
    }
}
