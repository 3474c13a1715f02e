//! Checkpoint storage trait for pluggable backends.
//!
//! [`CheckpointStore`] is the narrow interface the workflow engine drives
//! durability through. A backend must provide:
//!
//! - **Write-ahead persistence** — `put` is called before any externally
//!   visible side effect of the node it snapshots, so a crash between side
//!   effect and checkpoint re-drives the node from the pre-side-effect
//!   snapshot.
//! - **Per-thread linearizability** — writes for one thread are totally
//!   ordered; `put` rejects a step index that does not advance the thread.
//! - **Interrupt bookkeeping** — at most one pending interrupt per thread,
//!   attached to the latest checkpoint.
//!
//! The in-memory implementation in [`crate::memory`] is the reference;
//! database-backed stores implement the same trait. Store failures map to
//! [`CheckpointError::Unavailable`](crate::CheckpointError::Unavailable),
//! which callers surface as a terminal `resource` error.

use async_trait::async_trait;

use crate::checkpoint::{Checkpoint, InterruptRecord, ThreadSummary};
use crate::error::Result;

/// Durable, thread-keyed checkpoint storage
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Persist a checkpoint. Atomic; fails with `NonMonotonicStep` if the
    /// step does not advance the thread's history.
    async fn put(&self, checkpoint: Checkpoint) -> Result<()>;

    /// Latest checkpoint for a thread, or `None` for an unknown thread
    async fn latest(&self, thread_id: &str) -> Result<Option<Checkpoint>>;

    /// Full checkpoint history for a thread, oldest first
    async fn history(&self, thread_id: &str) -> Result<Vec<Checkpoint>>;

    /// Attach a pending interrupt to the thread's latest checkpoint.
    /// Fails with `InterruptPending` if one is already recorded.
    async fn mark_interrupt(&self, thread_id: &str, record: InterruptRecord) -> Result<()>;

    /// Clear the pending interrupt, returning it if one was recorded
    async fn clear_interrupt(&self, thread_id: &str) -> Result<Option<InterruptRecord>>;

    /// The pending interrupt, if the thread is suspended
    async fn pending_interrupt(&self, thread_id: &str) -> Result<Option<InterruptRecord>>;

    /// Summaries of all known threads
    async fn list_threads(&self) -> Result<Vec<ThreadSummary>>;

    /// Remove a thread and its history (retention policy only)
    async fn delete_thread(&self, thread_id: &str) -> Result<()>;
}
