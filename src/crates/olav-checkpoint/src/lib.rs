//! Durable state for OLAV workflow runs.
//!
//! This crate holds the two logical stores the orchestrator persists
//! through:
//!
//! - **Checkpoints** — thread-keyed snapshots of workflow state, one per
//!   completed node transition, with optional pending-interrupt records
//!   for human-in-the-loop suspension. See [`CheckpointStore`].
//! - **Audit** — an append-only trail of every gated tool dispatch and the
//!   human decision that resolved it. See [`AuditStore`].
//!
//! Both are trait abstractions with in-memory reference implementations;
//! deployments provide database-backed implementations of the same traits.
//! Schema is internal to each backend and may evolve independently.

pub mod audit;
pub mod checkpoint;
pub mod error;
pub mod memory;
pub mod traits;

pub use audit::{AuditEntry, AuditStore};
pub use checkpoint::{Checkpoint, InterruptRecord, ThreadSummary};
pub use error::{CheckpointError, Result};
pub use memory::{InMemoryAuditStore, InMemoryCheckpointStore};
pub use traits::CheckpointStore;
