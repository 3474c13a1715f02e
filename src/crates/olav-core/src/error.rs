//! Engine error taxonomy.
//!
//! Errors are classified by [`ErrorKind`], which drives propagation policy:
//! `Transient` is retried locally up to the tool's declared limits;
//! `Contract` and `Planner` are handled at the workflow level (a node may
//! compensate); `Policy`, `Resource`, and `Internal` always terminate the
//! run with a typed `error` event. Every error exposes a stable string
//! [`code`](EngineError::code) used in client-visible events.

use olav_checkpoint::CheckpointError;
use thiserror::Error;

/// Propagation class of an error (kinds, not types)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Timeout, rate limit, temporary unavailability; retryable
    Transient,
    /// Input or output violates a declared contract; not retryable
    Contract,
    /// Forbidden by HITL policy; not retryable
    Policy,
    /// Plan is structurally invalid or fully infeasible
    Planner,
    /// Checkpoint store or event stream unavailable; terminal
    Resource,
    /// Programmer error or invariant violation; terminal
    Internal,
}

/// Errors raised by the engine, tools, and workflow nodes
#[derive(Debug, Error)]
pub enum EngineError {
    /// Operation exceeded its deadline
    #[error("timeout in {operation}")]
    Timeout { operation: String },

    /// Upstream rate limit
    #[error("rate limited: {upstream}")]
    RateLimited { upstream: String },

    /// Temporary network or service failure
    #[error("transient failure in {operation}: {message}")]
    Transient { operation: String, message: String },

    /// Tool arguments or output violate the declared contract
    #[error("contract violation for tool {tool}: {message}")]
    Contract {
        tool: String,
        message: String,
        /// The offending payload, attached for diagnostics
        payload: Option<serde_json::Value>,
    },

    /// No tool registered under the requested name
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    /// HITL policy forbids the action
    #[error("policy rejection: {reason}")]
    Policy { reason: String },

    /// Plan dependency cycle or fully infeasible investigation
    #[error("planner failure: {message}")]
    Planner { message: String },

    /// Checkpoint store or stream backend unavailable
    #[error("resource unavailable: {message}")]
    Resource { message: String },

    /// Run cancelled cooperatively
    #[error("run cancelled")]
    Cancelled,

    /// Invariant violation or programmer error
    #[error("internal error: {message}")]
    Internal { message: String },

    /// Checkpoint store failure
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    /// State (de)serialization failure
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    /// Propagation class of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Timeout { .. } | Self::RateLimited { .. } | Self::Transient { .. } => {
                ErrorKind::Transient
            }
            Self::Contract { .. } | Self::UnknownTool(_) => ErrorKind::Contract,
            Self::Policy { .. } => ErrorKind::Policy,
            Self::Planner { .. } => ErrorKind::Planner,
            Self::Resource { .. } | Self::Checkpoint(_) => ErrorKind::Resource,
            Self::Cancelled | Self::Internal { .. } | Self::Serialization(_) => ErrorKind::Internal,
        }
    }

    /// Stable code carried on client-visible `error` events
    pub fn code(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            Self::RateLimited { .. } => "rate_limited",
            Self::Transient { .. } => "transient",
            Self::Contract { .. } => "contract_violation",
            Self::UnknownTool(_) => "unknown_tool",
            Self::Policy { .. } => "policy_rejected",
            Self::Planner { .. } => "planner_failed",
            Self::Resource { .. } | Self::Checkpoint(_) => "resource_unavailable",
            Self::Cancelled => "cancelled",
            Self::Internal { .. } => "internal",
            Self::Serialization(_) => "serialization",
        }
    }

    /// Whether the engine may retry the failed operation
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    /// Transient failure helper
    pub fn transient(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transient {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Contract violation helper
    pub fn contract(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Contract {
            tool: tool.into(),
            message: message.into(),
            payload: None,
        }
    }

    /// Policy rejection helper
    pub fn policy(reason: impl Into<String>) -> Self {
        Self::Policy {
            reason: reason.into(),
        }
    }

    /// Planner failure helper
    pub fn planner(message: impl Into<String>) -> Self {
        Self::Planner {
            message: message.into(),
        }
    }

    /// Internal invariant violation helper
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert_eq!(
            EngineError::Timeout {
                operation: "llm".into()
            }
            .kind(),
            ErrorKind::Transient
        );
        assert_eq!(
            EngineError::contract("suzieq.show", "missing field").kind(),
            ErrorKind::Contract
        );
        assert_eq!(EngineError::policy("blacklisted").kind(), ErrorKind::Policy);
        assert_eq!(EngineError::planner("cycle").kind(), ErrorKind::Planner);
        assert_eq!(
            EngineError::Resource {
                message: "store down".into()
            }
            .kind(),
            ErrorKind::Resource
        );
    }

    #[test]
    fn test_retryable_only_transient() {
        assert!(EngineError::RateLimited {
            upstream: "llm".into()
        }
        .is_retryable());
        assert!(!EngineError::policy("no").is_retryable());
        assert!(!EngineError::internal("bug").is_retryable());
    }

    #[test]
    fn test_checkpoint_error_maps_to_resource() {
        let err = EngineError::from(CheckpointError::Unavailable("down".into()));
        assert_eq!(err.kind(), ErrorKind::Resource);
        assert_eq!(err.code(), "resource_unavailable");
    }
}
