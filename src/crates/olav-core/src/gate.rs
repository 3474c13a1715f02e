//! Human-in-the-loop payloads and the approval gate contract.
//!
//! A sensitive dispatch produces an [`ExecutionPlan`] for a human
//! approver; the run checkpoints with a pending interrupt and halts. The
//! approver answers with a [`Decision`]; `resume` re-enters the run and
//! the gate resolves the decision into a [`GateOutcome`] the node acts on.
//!
//! The engine only depends on the [`ApprovalGate`] trait; policy (risk
//! patterns, field blacklists, audit) lives in the orchestrator's
//! implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::plan::Todo;
use crate::tool::ToolDescriptor;

/// Classified risk of a proposed action
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskLevel::Low => write!(f, "low"),
            RiskLevel::Medium => write!(f, "medium"),
            RiskLevel::High => write!(f, "high"),
        }
    }
}

/// The payload presented to a human approver
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPlan {
    /// Unique plan id
    pub id: String,

    /// Thread the plan belongs to
    pub thread_id: String,

    /// Affected targets (devices, inventory objects)
    #[serde(default)]
    pub targets: Vec<String>,

    /// Proposed tool
    pub tool: String,

    /// Proposed arguments
    pub args: Value,

    /// Classified risk
    pub risk: RiskLevel,

    /// Dry-run preview, when the tool can produce one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview: Option<String>,

    /// For deep-dive plan approval: the todos that will drive execution
    #[serde(skip_serializing_if = "Option::is_none")]
    pub todos: Option<Vec<Todo>>,

    /// For deep-dive execution: the todo this dispatch belongs to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub todo_id: Option<String>,
}

impl ExecutionPlan {
    /// A plan for a single tool dispatch
    pub fn new(
        thread_id: impl Into<String>,
        tool: impl Into<String>,
        args: Value,
        risk: RiskLevel,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            thread_id: thread_id.into(),
            targets: Vec::new(),
            tool: tool.into(),
            args,
            risk,
            preview: None,
            todos: None,
            todo_id: None,
        }
    }

    pub fn with_targets(mut self, targets: Vec<String>) -> Self {
        self.targets = targets;
        self
    }

    pub fn with_preview(mut self, preview: impl Into<String>) -> Self {
        self.preview = Some(preview.into());
        self
    }

    pub fn with_todos(mut self, todos: Vec<Todo>) -> Self {
        self.todos = Some(todos);
        self
    }

    pub fn with_todo_id(mut self, todo_id: impl Into<String>) -> Self {
        self.todo_id = Some(todo_id.into());
        self
    }

    /// Serialize for the interrupt record / `interrupt` event
    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Restore from an interrupt record
    pub fn from_value(value: &Value) -> Result<Self> {
        Ok(serde_json::from_value(value.clone())?)
    }
}

/// The approver's response to an execution plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Decision {
    /// Proceed with the plan as proposed
    Approve,

    /// Do not proceed
    Reject {
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    /// Proceed with edited arguments (revalidated against the contract)
    Edit { args: Value },

    /// Deep-dive only: replan with this instruction
    ModifyPlan { text: String },
}

/// A decision together with approver identity and timestamp
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub decision: Decision,
    pub approver: String,
    pub decided_at: DateTime<Utc>,
}

impl DecisionRecord {
    pub fn new(decision: Decision, approver: impl Into<String>) -> Self {
        Self {
            decision,
            approver: approver.into(),
            decided_at: Utc::now(),
        }
    }
}

/// What the gate told the dispatching node to do
#[derive(Debug, Clone, PartialEq)]
pub enum GateOutcome {
    /// Dispatch with these (possibly edited) arguments
    Proceed { args: Value },

    /// Do not dispatch; record the rejection
    Rejected { reason: String },

    /// Deep-dive only: re-enter planning with this instruction
    PlanModified { instruction: String },
}

/// Dispatch-site context handed to the gate
#[derive(Debug, Clone)]
pub struct GateContext {
    /// Thread of the run
    pub thread_id: String,

    /// Node performing the dispatch
    pub node_id: String,

    /// Targets affected, when the node knows them
    pub targets: Vec<String>,
}

/// Result of risk classification at a dispatch site
#[derive(Debug, Clone)]
pub struct GateReview {
    /// Whether a human decision is required before dispatch
    pub requires_approval: bool,

    /// The plan to present if approval is required
    pub plan: ExecutionPlan,
}

/// Policy chokepoint interposed before sensitive tool dispatch
#[async_trait]
pub trait ApprovalGate: Send + Sync {
    /// Classify a proposed dispatch and build its execution plan
    async fn review(
        &self,
        tool: &ToolDescriptor,
        args: &Value,
        ctx: &GateContext,
    ) -> Result<GateReview>;

    /// Resolve an approver decision against the plan it answers
    async fn resolve(
        &self,
        plan: &ExecutionPlan,
        record: DecisionRecord,
        tool: &ToolDescriptor,
    ) -> Result<GateOutcome>;

    /// Audit hook for a workflow-level plan (not a single tool dispatch)
    /// being presented for approval. Default: no-op.
    async fn review_plan(&self, _plan: &ExecutionPlan) -> Result<()> {
        Ok(())
    }

    /// Resolve an approver decision against a workflow-level plan.
    /// Implementations that audit should override and delegate here.
    async fn resolve_plan(
        &self,
        plan: &ExecutionPlan,
        record: DecisionRecord,
    ) -> Result<GateOutcome> {
        Ok(match record.decision {
            Decision::Approve => GateOutcome::Proceed {
                args: plan.args.clone(),
            },
            Decision::Edit { args } => GateOutcome::Proceed { args },
            Decision::Reject { reason } => GateOutcome::Rejected {
                reason: reason.unwrap_or_else(|| "rejected by approver".to_string()),
            },
            Decision::ModifyPlan { text } => GateOutcome::PlanModified { instruction: text },
        })
    }
}

/// Decision envelope installed by `resume` and consumed at the
/// interrupted dispatch point
#[derive(Debug, Clone)]
pub struct ResumeEnvelope {
    /// The plan that was shown to the approver
    pub plan: ExecutionPlan,

    /// The decision that arrived
    pub record: DecisionRecord,
}

impl Decision {
    /// Short label used in audit entries
    pub fn label(&self) -> &'static str {
        match self {
            Decision::Approve => "approve",
            Decision::Reject { .. } => "reject",
            Decision::Edit { .. } => "edit",
            Decision::ModifyPlan { .. } => "modify_plan",
        }
    }
}

/// Parse a decision from its wire form, e.g. `{"action": "approve"}`
pub fn decision_from_value(value: &Value) -> Result<Decision> {
    serde_json::from_value(value.clone()).map_err(|e| EngineError::Contract {
        tool: "resume".to_string(),
        message: format!("malformed decision: {}", e),
        payload: Some(value.clone()),
    })
}
