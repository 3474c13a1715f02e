//! Orchestration layer for OLAV: routes queries to workflows, gates
//! sensitive actions behind human approval, and drives the standard and
//! deep-dive workflow graphs over the core engine.
//!
//! The composition root is [`service::OlavBuilder`]: tools, workflows,
//! stores, and model providers are registered explicitly at startup and
//! handed to the service as values. Nothing is discovered implicitly.

pub mod config;
pub mod gate;
pub mod router;
pub mod service;
pub mod workflows;

use thiserror::Error;

/// Errors raised by the orchestration layer
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// No workflow registered under the requested name
    #[error("workflow not found: {0}")]
    WorkflowNotFound(String),

    /// The thread already has a running workflow
    #[error("thread {0} already has a running workflow")]
    ThreadBusy(String),

    /// The thread is suspended and must be resumed, not resubmitted
    #[error("thread {0} is awaiting a decision; use resume")]
    ThreadSuspended(String),

    /// The thread does not exist
    #[error("thread not found: {0}")]
    ThreadNotFound(String),

    /// A submit request carried no user message
    #[error("request contains no user message")]
    EmptyRequest,

    /// Configuration is invalid
    #[error("configuration error: {0}")]
    Config(String),

    /// Engine-level failure
    #[error(transparent)]
    Engine(#[from] olav_core::EngineError),

    /// Checkpoint store failure
    #[error(transparent)]
    Checkpoint(#[from] olav_checkpoint::CheckpointError),
}

/// Result type for orchestrator operations
pub type Result<T> = std::result::Result<T, OrchestratorError>;

pub use config::OlavConfig;
pub use gate::HitlGate;
pub use router::IntentRouter;
pub use service::{Olav, OlavBuilder, SubmitRequest, ThreadView};
pub use workflows::{WorkflowDescriptor, WorkflowRegistry};
