//! The deep-dive workflow: plan, investigate feasibility, approve,
//! execute in bounded parallel batches, optionally descend into
//! failures, and summarize strictly over collected evidence.
//!
//! Node order: `plan` → `investigate` → `approve` → `execute` →
//! (`descend` → `plan` …) → `summarize`. The `approve` node suspends the
//! run with the aggregated execution plan; `modify_plan` decisions loop
//! back through planning and re-approval so the approver always sees the
//! plan that will actually drive execution.

mod approve;
mod evaluate;
mod execute;
mod investigate;
mod planner;
mod summary;

pub(crate) use evaluate::{Evaluator, Verdict};

use std::sync::Arc;

use olav_core::{Mode, WorkflowGraph};

use super::WorkflowDescriptor;

/// Synthetic tool name carried on plan-approval execution plans
pub(crate) const PLAN_TOOL: &str = "deepdive.plan";

/// Deep-dive tuning
#[derive(Debug, Clone)]
pub struct DeepDiveWorkflowConfig {
    /// Parallel dispatch cap within a batch
    pub fan_out: usize,

    /// Maximum recursive descent depth
    pub max_depth: u32,

    /// Replans allowed after a dependency cycle
    pub replan_limit: u32,
}

impl Default for DeepDiveWorkflowConfig {
    fn default() -> Self {
        Self {
            fan_out: 5,
            max_depth: 3,
            replan_limit: 1,
        }
    }
}

impl From<&crate::config::DeepDiveConfig> for DeepDiveWorkflowConfig {
    fn from(config: &crate::config::DeepDiveConfig) -> Self {
        Self {
            fan_out: config.fan_out,
            max_depth: config.max_depth,
            replan_limit: config.replan_limit,
        }
    }
}

/// Build the deep-dive workflow graph
pub fn workflow(config: DeepDiveWorkflowConfig) -> WorkflowGraph {
    WorkflowGraph::new("deepdive", "plan")
        .with_node(
            "plan",
            Arc::new(planner::PlanNode {
                replan_limit: config.replan_limit,
            }),
        )
        .with_node("investigate", Arc::new(investigate::InvestigateNode))
        .with_node("approve", Arc::new(approve::ApproveNode))
        .with_node(
            "execute",
            Arc::new(execute::ExecuteNode {
                fan_out: config.fan_out,
            }),
        )
        .with_node(
            "descend",
            Arc::new(execute::DescendNode {
                max_depth: config.max_depth,
            }),
        )
        .with_node("summarize", Arc::new(summary::SummaryNode))
}

/// The registered descriptor for this workflow
pub fn descriptor(config: DeepDiveWorkflowConfig) -> WorkflowDescriptor {
    WorkflowDescriptor::new(
        "Decompose a complex investigation into validated sub-tasks and execute them",
        workflow(config),
    )
    .with_examples(vec![
        "Audit MPLS LDP on all border routers",
        "Investigate intermittent packet loss across the fabric",
        "Do a full health check of the BGP mesh",
        "Deep dive into why OSPF flaps every night",
    ])
    .with_keywords(vec!["audit", "investigate", "deep dive", "health check"])
    .with_preferred_mode(Mode::Expert)
}
