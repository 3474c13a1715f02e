//! Plan approval: the deep-dive HITL checkpoint.
//!
//! The aggregated feasibility classification is presented as the
//! execution plan. `approve` proceeds with feasible todos only;
//! `reject` terminates with `aborted-by-user`; `modify_plan` re-enters
//! planning with the approver's instruction, after which investigation
//! and approval run again — the payload the approver re-approves always
//! contains the revised todos.

use async_trait::async_trait;
use serde_json::json;

use olav_core::{
    EngineError, ExecutionPlan, GateOutcome, NodeContext, NodeTransition, Result, RiskLevel,
    RunState, RunStatus, Sensitivity, TodoStatus, WorkflowNode,
};

use super::PLAN_TOOL;
use crate::workflows::say;

pub(crate) struct ApproveNode;

#[async_trait]
impl WorkflowNode for ApproveNode {
    async fn run(&self, ctx: &NodeContext, state: &mut RunState) -> Result<NodeTransition> {
        // A decision may be waiting from resume.
        if let Some(envelope) = ctx.take_resume().await {
            if envelope.plan.tool == PLAN_TOOL {
                return self.apply_decision(ctx, state, envelope).await;
            }
            // Not ours (a todo-level dispatch decision); put it back for
            // the execute node.
            ctx.install_resume(envelope).await;
        }

        let plan = state
            .plan
            .as_ref()
            .ok_or_else(|| EngineError::internal("approve without a plan"))?;

        if plan.is_empty() {
            state.status = RunStatus::Done;
            state.outcome = Some("nothing to do".to_string());
            say(ctx, state, "The investigation plan is empty; nothing to do.").await?;
            return Ok(NodeTransition::Halt);
        }

        let feasible: Vec<String> = ids_with(plan, TodoStatus::Feasible);
        let uncertain: Vec<String> = ids_with(plan, TodoStatus::Uncertain);
        let infeasible: Vec<String> = ids_with(plan, TodoStatus::Infeasible);

        // The plan is high risk if any feasible todo would touch a
        // write-class tool.
        let touches_write = plan
            .todos
            .iter()
            .filter(|t| t.status == TodoStatus::Feasible)
            .flat_map(|t| t.tools.iter())
            .any(|name| {
                ctx.tools
                    .get(name)
                    .map(|t| t.descriptor.sensitivity == Sensitivity::Write)
                    .unwrap_or(false)
            });
        let risk = if touches_write {
            RiskLevel::High
        } else {
            RiskLevel::Medium
        };

        let execution_plan = ExecutionPlan::new(
            state.thread_id.clone(),
            PLAN_TOOL,
            json!({
                "feasible": feasible,
                "uncertain": uncertain,
                "infeasible": infeasible,
            }),
            risk,
        )
        .with_todos(plan.todos.clone());

        ctx.gate.review_plan(&execution_plan).await?;
        Ok(NodeTransition::Interrupt(execution_plan))
    }
}

impl ApproveNode {
    async fn apply_decision(
        &self,
        ctx: &NodeContext,
        state: &mut RunState,
        envelope: olav_core::ResumeEnvelope,
    ) -> Result<NodeTransition> {
        let outcome = ctx
            .gate
            .resolve_plan(&envelope.plan, envelope.record)
            .await?;

        match outcome {
            GateOutcome::Proceed { .. } => {
                let plan = state
                    .plan
                    .as_ref()
                    .ok_or_else(|| EngineError::internal("approve without a plan"))?;
                if ids_with(plan, TodoStatus::Feasible).is_empty() {
                    // All todos were skipped; report without executing.
                    return Ok(NodeTransition::Goto("summarize".into()));
                }
                Ok(NodeTransition::Goto("execute".into()))
            }
            GateOutcome::Rejected { reason } => {
                state.status = RunStatus::AbortedByUser;
                state.outcome = Some("aborted-by-user".to_string());
                say(ctx, state, format!("Investigation aborted by approver: {}", reason)).await?;
                Ok(NodeTransition::Halt)
            }
            GateOutcome::PlanModified { instruction } => {
                state.set_var("replan_instruction", json!(instruction));
                Ok(NodeTransition::Goto("plan".into()))
            }
        }
    }
}

fn ids_with(plan: &olav_core::Plan, status: TodoStatus) -> Vec<String> {
    plan.with_status(status)
        .into_iter()
        .map(|t| t.id.clone())
        .collect()
}
