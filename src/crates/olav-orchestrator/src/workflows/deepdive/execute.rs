//! Bounded-parallel execution of approved todos and recursive descent.
//!
//! Approved (`feasible`) todos are partitioned into dependency layers;
//! each layer is dispatched concurrently under a semaphore capped at the
//! configured fan-out, so no todo ever runs before a todo it depends on.
//! A todo whose dispatch needs approval suspends the whole run; completed
//! results are applied to state first, so the resume re-enters with their
//! evidence durable and only the gated todo outstanding.
//!
//! The descend node spawns one child investigation per failed todo while
//! the recursion budget lasts; each failed todo descends at most once.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use olav_core::{
    Dispatch, EngineError, Evidence, NodeContext, NodeTransition, Result, RunState, Todo,
    TodoStatus, WorkflowNode,
};

use super::{Evaluator, Verdict, PLAN_TOOL};
use crate::workflows::think;

pub(crate) struct ExecuteNode {
    pub fan_out: usize,
}

/// Outcome of dispatching one todo
enum TodoRun {
    Records { tool: String, records: olav_core::RecordSet },
    NeedsApproval(olav_core::ExecutionPlan),
    Rejected(String),
    Error(String),
}

#[async_trait]
impl WorkflowNode for ExecuteNode {
    async fn run(&self, ctx: &NodeContext, state: &mut RunState) -> Result<NodeTransition> {
        // A resumed todo-level decision must be applied by the todo it
        // belongs to; remember which one so it dispatches first.
        let priority_todo = match ctx.take_resume().await {
            Some(envelope) if envelope.plan.tool != PLAN_TOOL => {
                let todo_id = envelope.plan.todo_id.clone();
                ctx.install_resume(envelope).await;
                todo_id
            }
            Some(envelope) => {
                // A stale plan-level envelope has no business here.
                warn!("discarding unexpected plan-level decision in execute node");
                drop(envelope);
                None
            }
            None => None,
        };

        loop {
            let plan = state
                .plan
                .as_ref()
                .ok_or_else(|| EngineError::internal("execute without a plan"))?;
            let runnable: Vec<String> = plan
                .with_status(TodoStatus::Feasible)
                .into_iter()
                .map(|t| t.id.clone())
                .collect();
            if runnable.is_empty() {
                break;
            }

            let mut layers = plan.batches(&runnable);
            let Some(mut layer) = layers.drain(..).next() else {
                break;
            };

            // The todo holding the resumed decision goes first, alone, so
            // the decision cannot be consumed by a sibling dispatch.
            if let Some(priority) = &priority_todo {
                if let Some(pos) = layer.iter().position(|id| id == priority) {
                    let head = layer.remove(pos);
                    if let Some(transition) =
                        self.run_layer(ctx, state, vec![head]).await?
                    {
                        return Ok(transition);
                    }
                }
            }

            if let Some(transition) = self.run_layer(ctx, state, layer).await? {
                return Ok(transition);
            }
        }

        let plan = state
            .plan
            .as_ref()
            .ok_or_else(|| EngineError::internal("execute without a plan"))?;
        let failed = plan.with_status(TodoStatus::Failed).len();
        let done = plan.with_status(TodoStatus::Done).len();
        think(ctx, "execute", format!("{} done, {} failed", done, failed)).await?;

        if failed > 0 {
            Ok(NodeTransition::Goto("descend".into()))
        } else {
            Ok(NodeTransition::Goto("summarize".into()))
        }
    }
}

impl ExecuteNode {
    /// Dispatch one batch concurrently and fold the results into state.
    /// Returns a transition when the batch hit an interrupt.
    async fn run_layer(
        &self,
        ctx: &NodeContext,
        state: &mut RunState,
        layer: Vec<String>,
    ) -> Result<Option<NodeTransition>> {
        let plan = state
            .plan
            .as_mut()
            .ok_or_else(|| EngineError::internal("execute without a plan"))?;

        let mut batch = Vec::new();
        for id in &layer {
            if let Some(todo) = plan.todo_mut(id) {
                todo.transition(TodoStatus::Running)?;
                batch.push(todo.clone());
            }
        }
        debug!(batch = batch.len(), cap = self.fan_out, "dispatching batch");

        let semaphore = Arc::new(Semaphore::new(self.fan_out.max(1)));
        let futures = batch.into_iter().map(|todo| {
            let ctx = ctx.clone();
            let semaphore = semaphore.clone();
            async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("semaphore closed");
                let outcome = run_todo(&ctx, &todo).await;
                (todo.id.clone(), outcome)
            }
        });
        let results = futures::future::join_all(futures).await;

        let mut pending_interrupt: Option<(String, olav_core::ExecutionPlan)> = None;
        for (id, outcome) in results {
            let todo = plan
                .todo_mut(&id)
                .ok_or_else(|| EngineError::internal(format!("todo vanished: {}", id)))?;
            match outcome {
                TodoRun::Records { tool, records } => {
                    let verdict = Evaluator::evaluate(todo, &records);
                    todo.evidence.push(Evidence::new(tool, records));
                    match verdict {
                        Verdict::Passed { note } => {
                            todo.transition(TodoStatus::Done)?;
                            todo.reason = note;
                        }
                        Verdict::Failed { reason } => {
                            todo.transition(TodoStatus::Failed)?;
                            todo.reason = Some(reason);
                        }
                    }
                }
                TodoRun::Rejected(reason) => {
                    todo.transition(TodoStatus::Failed)?;
                    todo.reason = Some(format!("rejected: {}", reason));
                }
                TodoRun::Error(message) => {
                    todo.transition(TodoStatus::Failed)?;
                    todo.reason = Some(message);
                }
                TodoRun::NeedsApproval(exec_plan) => {
                    // Not executed: back out of Running so the todo
                    // re-dispatches after the decision arrives.
                    todo.status = TodoStatus::Feasible;
                    if pending_interrupt.is_none() {
                        pending_interrupt = Some((id, exec_plan));
                    }
                }
            }
        }

        if let Some((id, exec_plan)) = pending_interrupt {
            info!(todo = %id, "batch suspended for approval");
            return Ok(Some(NodeTransition::Interrupt(
                exec_plan.with_todo_id(id),
            )));
        }
        Ok(None)
    }
}

/// Dispatch a single todo through its first bound tool
async fn run_todo(ctx: &NodeContext, todo: &Todo) -> TodoRun {
    let Some(tool) = todo.tools.first() else {
        return TodoRun::Error("no tool binding".to_string());
    };

    let args = json!({"query": todo.description});
    match ctx.dispatch_tool("execute", tool, args, vec![]).await {
        Ok(Dispatch::Completed(records)) => TodoRun::Records {
            tool: tool.clone(),
            records,
        },
        Ok(Dispatch::NeedsApproval(plan)) => TodoRun::NeedsApproval(plan),
        Ok(Dispatch::Rejected { reason }) => TodoRun::Rejected(reason),
        Ok(Dispatch::PlanModified { .. }) => {
            TodoRun::Error("unexpected plan modification".to_string())
        }
        Err(err) => TodoRun::Error(err.to_string()),
    }
}

/// Spawns child investigations for failed todos, one level per cycle,
/// while recursion depth allows
pub(crate) struct DescendNode {
    pub max_depth: u32,
}

#[async_trait]
impl WorkflowNode for DescendNode {
    async fn run(&self, ctx: &NodeContext, state: &mut RunState) -> Result<NodeTransition> {
        let descended: Vec<String> = state
            .var("descended")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();

        let plan = state
            .plan
            .as_ref()
            .ok_or_else(|| EngineError::internal("descend without a plan"))?;

        if plan.recursion_depth >= self.max_depth {
            think(ctx, "descend", "recursion budget exhausted").await?;
            return Ok(NodeTransition::Goto("summarize".into()));
        }

        let parents: Vec<String> = plan
            .with_status(TodoStatus::Failed)
            .into_iter()
            .filter(|t| !descended.contains(&t.id))
            .map(|t| t.id.clone())
            .collect();

        if parents.is_empty() {
            return Ok(NodeTransition::Goto("summarize".into()));
        }

        think(
            ctx,
            "descend",
            format!("descending into {} failed todos", parents.len()),
        )
        .await?;

        let mut all_descended = descended;
        all_descended.extend(parents.iter().cloned());
        state.set_var("descended", json!(all_descended));
        state.set_var("descend_parents", json!(parents));
        Ok(NodeTransition::Goto("plan".into()))
    }
}
