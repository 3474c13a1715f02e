//! Core checkpoint data structures.
//!
//! A [`Checkpoint`] is a durable snapshot of workflow state at a node
//! boundary, keyed by `(thread_id, step)`. The state itself is an opaque
//! JSON value; the engine serializes its run state into it and restores
//! from it on resume. The latest checkpoint for a thread is always
//! sufficient to resume the run.
//!
//! Invariants enforced by conforming stores:
//!
//! - Step indexes are strictly monotonic per thread.
//! - Writes are linearizable per thread.
//! - At most one [`InterruptRecord`] is pending per thread.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A durable record of a suspended human-in-the-loop interrupt.
///
/// Written when a workflow halts awaiting a decision; cleared when the
/// decision arrives and the run resumes. The `execution_plan` payload is
/// the serialized plan shown to the approver.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InterruptRecord {
    /// Unique id of this interrupt
    pub id: String,

    /// Node that raised the interrupt; resume re-enters here
    pub node_id: String,

    /// Serialized execution plan presented to the approver
    pub execution_plan: serde_json::Value,

    /// When the interrupt was raised
    pub created_at: DateTime<Utc>,
}

impl InterruptRecord {
    /// Create a new interrupt record for a node
    pub fn new(node_id: impl Into<String>, execution_plan: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            node_id: node_id.into(),
            execution_plan,
            created_at: Utc::now(),
        }
    }
}

/// State snapshot at a node boundary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Thread this checkpoint belongs to
    pub thread_id: String,

    /// Step index, strictly monotonic per thread
    pub step: u64,

    /// Node the run will execute next (the snapshot cursor)
    pub node_id: String,

    /// Self-contained serialized run state
    pub state: serde_json::Value,

    /// Pending interrupt, if the run is suspended awaiting a decision
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_interrupt: Option<InterruptRecord>,

    /// When the checkpoint was written
    pub ts: DateTime<Utc>,
}

impl Checkpoint {
    /// Create a checkpoint for a node boundary
    pub fn new(
        thread_id: impl Into<String>,
        step: u64,
        node_id: impl Into<String>,
        state: serde_json::Value,
    ) -> Self {
        Self {
            thread_id: thread_id.into(),
            step,
            node_id: node_id.into(),
            state,
            pending_interrupt: None,
            ts: Utc::now(),
        }
    }

    /// Attach a pending interrupt record
    pub fn with_interrupt(mut self, record: InterruptRecord) -> Self {
        self.pending_interrupt = Some(record);
        self
    }
}

/// Summary of a thread's checkpoint history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadSummary {
    /// Thread id
    pub thread_id: String,

    /// When the first checkpoint was written
    pub created_at: DateTime<Utc>,

    /// When the latest checkpoint was written
    pub last_activity: DateTime<Utc>,

    /// Number of checkpoints recorded
    pub steps: u64,

    /// Whether the thread is suspended on an interrupt
    pub pending_interrupt: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_checkpoint_roundtrip() {
        let cp = Checkpoint::new("t-1", 3, "assess", json!({"cursor": "assess"}));
        let encoded = serde_json::to_string(&cp).unwrap();
        let decoded: Checkpoint = serde_json::from_str(&encoded).unwrap();

        assert_eq!(decoded.thread_id, "t-1");
        assert_eq!(decoded.step, 3);
        assert_eq!(decoded.node_id, "assess");
        assert!(decoded.pending_interrupt.is_none());
    }

    #[test]
    fn test_checkpoint_with_interrupt() {
        let record = InterruptRecord::new("apply", json!({"tool": "device.configure"}));
        let cp = Checkpoint::new("t-1", 5, "apply", json!({})).with_interrupt(record.clone());

        assert_eq!(cp.pending_interrupt, Some(record));
    }
}
