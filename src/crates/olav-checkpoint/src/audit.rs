//! Append-only audit trail for gated tool dispatches.
//!
//! Every invocation of the approval gate writes one [`AuditEntry`]: the
//! tool, the proposed arguments, the classified risk, and — once the
//! approver responds — the decision, approver identity, and timestamps.
//! The [`AuditStore`] trait is intentionally append-only: there is no
//! update or delete operation, so a conforming store cannot mutate history.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;

/// One audited gate invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Unique entry id
    pub id: String,

    /// Thread the gated dispatch belongs to
    pub thread_id: String,

    /// Tool that was proposed for dispatch
    pub tool: String,

    /// Arguments as proposed (pre-edit)
    pub args: serde_json::Value,

    /// Classified risk level (`low`/`medium`/`high`)
    pub risk: String,

    /// Decision outcome (`approve`/`reject`/`edit`/`modify_plan`/`pending`)
    pub decision: String,

    /// Final arguments after an `edit` decision, when they differ
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_args: Option<serde_json::Value>,

    /// Identity of the approver, once a decision arrived
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approver: Option<String>,

    /// When the gate produced the execution plan
    pub created_at: DateTime<Utc>,

    /// When the decision was recorded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decided_at: Option<DateTime<Utc>>,
}

impl AuditEntry {
    /// Create an entry for a freshly classified dispatch, decision pending
    pub fn pending(
        thread_id: impl Into<String>,
        tool: impl Into<String>,
        args: serde_json::Value,
        risk: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            thread_id: thread_id.into(),
            tool: tool.into(),
            args,
            risk: risk.into(),
            decision: "pending".to_string(),
            final_args: None,
            approver: None,
            created_at: Utc::now(),
            decided_at: None,
        }
    }

    /// Record the decision outcome. The store is append-only, so this is
    /// written as a second entry alongside the pending one.
    pub fn decided(mut self, decision: impl Into<String>, approver: impl Into<String>) -> Self {
        self.decision = decision.into();
        self.approver = Some(approver.into());
        self.decided_at = Some(Utc::now());
        self
    }

    /// Attach the post-edit arguments
    pub fn with_final_args(mut self, args: serde_json::Value) -> Self {
        self.final_args = Some(args);
        self
    }
}

/// Append-only audit storage
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Append one entry. Entries are immutable once written.
    async fn append(&self, entry: AuditEntry) -> Result<()>;

    /// All entries recorded in `[from, to)`, in insertion order
    async fn export(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<AuditEntry>>;

    /// All entries for one thread, in insertion order
    async fn for_thread(&self, thread_id: &str) -> Result<Vec<AuditEntry>>;
}
