//! The workflow engine: a generic driver over a node graph.
//!
//! The engine executes one run at a time per thread, strictly
//! sequentially, checkpointing at every node boundary:
//!
//! 1. Load the latest snapshot (or start from the initial state).
//! 2. Write the snapshot ahead of executing the cursor node.
//! 3. Execute the node, forwarding its emissions to the event stream.
//! 4. On `Goto`, advance the cursor and loop; on `Halt`, persist the final
//!    state and close the stream with `done`.
//! 5. On `Interrupt`, persist the post-node snapshot with a
//!    pending-interrupt record, emit the `interrupt` event, and halt the
//!    run; `resume` is a fresh entry point that installs the decision and
//!    re-enters at the cursor.
//!
//! Because checkpoints are written ahead of side effects, a crash between
//! a side effect and its checkpoint re-drives the node from the previous
//! snapshot: reads are idempotent by contract, and writes always re-enter
//! the approval gate, so a mutation is never silently re-applied.
//!
//! Node errors terminate the run with a single `error` event carrying the
//! stable code; the partial snapshot is retained for diagnostics.
//! Cancellation is cooperative, observed at node boundaries.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use olav_checkpoint::{Checkpoint, CheckpointStore, InterruptRecord};

use crate::error::{EngineError, Result};
use crate::event::Event;
use crate::gate::{DecisionRecord, ExecutionPlan, ResumeEnvelope};
use crate::node::{NodeContext, NodeTransition, WorkflowGraph, WorkflowNode, END};
use crate::state::{RunState, RunStatus};

/// Generic driver executing workflow graphs over durable state
#[derive(Clone)]
pub struct Engine {
    store: Arc<dyn CheckpointStore>,
}

impl Engine {
    /// An engine persisting through the given store
    pub fn new(store: Arc<dyn CheckpointStore>) -> Self {
        Self { store }
    }

    /// The backing checkpoint store
    pub fn store(&self) -> &Arc<dyn CheckpointStore> {
        &self.store
    }

    /// Start (or continue) a run from the given state.
    ///
    /// The state's cursor decides the first node. Returns the final state
    /// on halt or suspension; the event stream reflects the outcome.
    pub async fn run(
        &self,
        graph: &WorkflowGraph,
        ctx: &NodeContext,
        state: RunState,
    ) -> Result<RunState> {
        let step = match self.store.latest(&state.thread_id).await? {
            Some(checkpoint) => checkpoint.step + 1,
            None => 0,
        };

        match self.drive(graph, ctx, state, step).await {
            Ok(state) => Ok(state),
            Err(err) => {
                self.fail_stream(ctx, &err).await;
                Err(err)
            }
        }
    }

    /// Resume a suspended run with an approver decision.
    ///
    /// Loads the latest snapshot, clears the pending interrupt, installs
    /// the decision envelope, and re-enters the graph at the cursor.
    pub async fn resume(
        &self,
        graph: &WorkflowGraph,
        ctx: &NodeContext,
        thread_id: &str,
        record: DecisionRecord,
    ) -> Result<RunState> {
        let result = self.prepare_resume(ctx, thread_id, record).await;
        let (state, step) = match result {
            Ok(prepared) => prepared,
            Err(err) => {
                self.fail_stream(ctx, &err).await;
                return Err(err);
            }
        };

        match self.drive(graph, ctx, state, step).await {
            Ok(state) => Ok(state),
            Err(err) => {
                self.fail_stream(ctx, &err).await;
                Err(err)
            }
        }
    }

    async fn prepare_resume(
        &self,
        ctx: &NodeContext,
        thread_id: &str,
        record: DecisionRecord,
    ) -> Result<(RunState, u64)> {
        let latest = self
            .store
            .latest(thread_id)
            .await?
            .ok_or_else(|| EngineError::policy(format!("unknown thread: {}", thread_id)))?;

        let pending = self
            .store
            .clear_interrupt(thread_id)
            .await?
            .ok_or_else(|| {
                EngineError::policy(format!("thread {} has no pending interrupt", thread_id))
            })?;

        let plan = ExecutionPlan::from_value(&pending.execution_plan)?;
        info!(
            thread_id,
            node = %pending.node_id,
            decision = record.decision.label(),
            approver = %record.approver,
            "resuming suspended run"
        );
        ctx.install_resume(ResumeEnvelope { plan, record }).await;

        let state = RunState::from_value(&latest.state)?;
        Ok((state, latest.step + 1))
    }

    async fn drive(
        &self,
        graph: &WorkflowGraph,
        ctx: &NodeContext,
        mut state: RunState,
        mut step: u64,
    ) -> Result<RunState> {
        graph.validate()?;

        loop {
            if ctx.cancel.is_cancelled() {
                info!(thread_id = %state.thread_id, "run cancelled at node boundary");
                return Err(EngineError::Cancelled);
            }

            let node_name = state.cursor.clone();
            if node_name == END {
                return self.halt(ctx, state, step).await;
            }

            // Write-ahead: the snapshot lands before the node's side
            // effects become visible.
            self.store
                .put(Checkpoint::new(
                    &state.thread_id,
                    step,
                    &node_name,
                    state.to_value()?,
                ))
                .await?;
            step += 1;

            let node = graph.node(&node_name)?.clone();
            debug!(thread_id = %state.thread_id, node = %node_name, "executing node");
            let transition = self.run_node(ctx, node, &mut state, &node_name).await?;

            match transition {
                NodeTransition::Goto(next) if next == END => {
                    return self.halt(ctx, state, step).await;
                }
                NodeTransition::Goto(next) => {
                    state.cursor = next;
                }
                NodeTransition::Halt => {
                    return self.halt(ctx, state, step).await;
                }
                NodeTransition::Interrupt(plan) => {
                    return self.suspend(ctx, state, step, &node_name, plan).await;
                }
            }
        }
    }

    async fn run_node(
        &self,
        ctx: &NodeContext,
        node: Arc<dyn WorkflowNode>,
        state: &mut RunState,
        node_name: &str,
    ) -> Result<NodeTransition> {
        let soft = ctx.limits.node_soft_timeout;
        let hard = ctx.limits.node_hard_timeout;

        let fut = node.run(ctx, state);
        tokio::pin!(fut);

        tokio::select! {
            result = &mut fut => result,
            _ = tokio::time::sleep(soft) => {
                warn!(node = node_name, "node exceeded soft timeout; continuing");
                match tokio::time::timeout(hard.saturating_sub(soft), &mut fut).await {
                    Ok(result) => result,
                    Err(_) => {
                        error!(node = node_name, "node exceeded hard timeout; aborting run");
                        Err(EngineError::Timeout {
                            operation: format!("node {}", node_name),
                        })
                    }
                }
            }
        }
    }

    async fn halt(&self, ctx: &NodeContext, mut state: RunState, step: u64) -> Result<RunState> {
        if state.status == RunStatus::Running {
            state.status = RunStatus::Done;
        }
        state.cursor = END.to_string();

        self.store
            .put(Checkpoint::new(
                &state.thread_id,
                step,
                END,
                state.to_value()?,
            ))
            .await?;

        ctx.events
            .close(Event::Done {
                final_state: state.final_view(),
            })
            .await?;

        info!(thread_id = %state.thread_id, status = ?state.status, "run complete");
        Ok(state)
    }

    async fn suspend(
        &self,
        ctx: &NodeContext,
        state: RunState,
        step: u64,
        node_name: &str,
        plan: ExecutionPlan,
    ) -> Result<RunState> {
        let plan_value = plan.to_value()?;

        // Persist the post-node snapshot, then the interrupt record, then
        // tell the client: the plan the approver sees is exactly the plan
        // a later resume will act on.
        self.store
            .put(Checkpoint::new(
                &state.thread_id,
                step,
                node_name,
                state.to_value()?,
            ))
            .await?;
        self.store
            .mark_interrupt(
                &state.thread_id,
                InterruptRecord::new(node_name, plan_value.clone()),
            )
            .await?;

        ctx.events
            .emit(Event::Interrupt {
                execution_plan: plan_value,
            })
            .await?;
        ctx.events.finish_suspended().await;

        info!(
            thread_id = %state.thread_id,
            node = node_name,
            risk = %plan.risk,
            tool = %plan.tool,
            "run suspended awaiting decision"
        );
        Ok(state)
    }

    /// Close the stream with a terminal `error` if it is still open
    async fn fail_stream(&self, ctx: &NodeContext, err: &EngineError) {
        if !ctx.events.is_closed().await {
            let _ = ctx
                .events
                .close(Event::Error {
                    code: err.code().to_string(),
                    message: err.to_string(),
                })
                .await;
        }
        error!(error = %err, code = err.code(), "run terminated with error");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::CapabilityIndex;
    use crate::gate::{
        ApprovalGate, Decision, GateContext, GateOutcome, GateReview, RiskLevel,
    };
    use crate::llm::{ChatModel, ChatRequest, ChatResponse, ChatStream};
    use crate::messages::Message;
    use crate::node::{CancelFlag, Dispatch, EngineLimits, NodeContext};
    use crate::stream::{EventSink, EventStream};
    use crate::tool::{
        RecordMeta, RecordSet, Sensitivity, ToolDescriptor, ToolExecutor, ToolRegistry,
    };
    use async_trait::async_trait;
    use futures::StreamExt;
    use olav_checkpoint::InMemoryCheckpointStore;
    use serde_json::{json, Value};

    #[derive(Clone)]
    struct NoopModel;

    #[async_trait]
    impl ChatModel for NoopModel {
        async fn chat(&self, _request: ChatRequest) -> Result<ChatResponse> {
            Ok(ChatResponse {
                message: Message::assistant("ok"),
                tool_calls: Vec::new(),
                usage: None,
            })
        }

        async fn stream(&self, _request: ChatRequest) -> Result<ChatStream> {
            Err(EngineError::internal("unused"))
        }

        fn clone_box(&self) -> Box<dyn ChatModel> {
            Box::new(self.clone())
        }
    }

    struct RowsExecutor;

    #[async_trait]
    impl ToolExecutor for RowsExecutor {
        async fn execute(&self, _args: Value) -> Result<RecordSet> {
            Ok(RecordSet::new(
                vec!["ifname".into()],
                vec![vec![json!("Gi0/1")]],
                RecordMeta::source("test"),
            ))
        }
    }

    struct SensitivityGate;

    #[async_trait]
    impl ApprovalGate for SensitivityGate {
        async fn review(
            &self,
            tool: &ToolDescriptor,
            args: &Value,
            ctx: &GateContext,
        ) -> Result<GateReview> {
            Ok(GateReview {
                requires_approval: tool.sensitivity == Sensitivity::Write,
                plan: ExecutionPlan::new(
                    ctx.thread_id.clone(),
                    tool.name.clone(),
                    args.clone(),
                    RiskLevel::High,
                ),
            })
        }

        async fn resolve(
            &self,
            plan: &ExecutionPlan,
            record: DecisionRecord,
            _tool: &ToolDescriptor,
        ) -> Result<GateOutcome> {
            Ok(match record.decision {
                Decision::Approve => GateOutcome::Proceed {
                    args: plan.args.clone(),
                },
                Decision::Edit { args } => GateOutcome::Proceed { args },
                Decision::Reject { reason } => GateOutcome::Rejected {
                    reason: reason.unwrap_or_else(|| "rejected".into()),
                },
                Decision::ModifyPlan { text } => GateOutcome::PlanModified { instruction: text },
            })
        }
    }

    /// Node that reads telemetry and moves on
    struct ReadNode;

    #[async_trait]
    impl crate::node::WorkflowNode for ReadNode {
        async fn run(&self, ctx: &NodeContext, state: &mut RunState) -> Result<NodeTransition> {
            match ctx
                .dispatch_tool("read", "telemetry.read", json!({}), vec![])
                .await?
            {
                Dispatch::Completed(records) => {
                    state.tool_results.insert("telemetry".into(), records);
                    Ok(NodeTransition::Goto("finish".into()))
                }
                other => panic!("unexpected dispatch: {:?}", other),
            }
        }
    }

    /// Node that dispatches a write and interrupts until approved
    struct ApplyNode;

    #[async_trait]
    impl crate::node::WorkflowNode for ApplyNode {
        async fn run(&self, ctx: &NodeContext, state: &mut RunState) -> Result<NodeTransition> {
            match ctx
                .dispatch_tool("apply", "device.configure", json!({"mtu": 9000}), vec![])
                .await?
            {
                Dispatch::Completed(_) => {
                    state.outcome = Some("applied".into());
                    Ok(NodeTransition::Goto("finish".into()))
                }
                Dispatch::NeedsApproval(plan) => Ok(NodeTransition::Interrupt(plan)),
                Dispatch::Rejected { reason } => {
                    state.status = RunStatus::Rejected;
                    state.outcome = Some(reason);
                    Ok(NodeTransition::Goto("finish".into()))
                }
                Dispatch::PlanModified { .. } => panic!("not a deep-dive test"),
            }
        }
    }

    /// Node that records a closing message and halts
    struct FinishNode;

    #[async_trait]
    impl crate::node::WorkflowNode for FinishNode {
        async fn run(&self, _ctx: &NodeContext, state: &mut RunState) -> Result<NodeTransition> {
            state.push_message(Message::assistant("done"));
            Ok(NodeTransition::Halt)
        }
    }

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry
            .register(
                ToolDescriptor::new("telemetry.read", "read telemetry", Sensitivity::Read),
                Arc::new(RowsExecutor),
            )
            .unwrap();
        registry
            .register(
                ToolDescriptor::new("device.configure", "configure a device", Sensitivity::Write),
                Arc::new(RowsExecutor),
            )
            .unwrap();
        registry
    }

    fn graph() -> WorkflowGraph {
        WorkflowGraph::new("test", "read")
            .with_node("read", Arc::new(ReadNode))
            .with_node("apply", Arc::new(ApplyNode))
            .with_node("finish", Arc::new(FinishNode))
    }

    fn context(thread_id: &str) -> (NodeContext, EventStream) {
        let (sink, stream) = EventSink::channel(64);
        let reg = Arc::new(registry());
        let caps = Arc::new(CapabilityIndex::from_registry(&reg));
        let ctx = NodeContext::new(
            thread_id,
            sink,
            Arc::new(NoopModel),
            reg,
            caps,
            Arc::new(SensitivityGate),
            CancelFlag::new(),
            EngineLimits::default(),
        );
        (ctx, stream)
    }

    #[tokio::test]
    async fn test_run_checkpoints_every_node() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let engine = Engine::new(store.clone());
        let (ctx, mut stream) = context("t-1");

        let state = RunState::new("t-1", "test", "read");
        let final_state = engine.run(&graph(), &ctx, state).await.unwrap();
        assert_eq!(final_state.status, RunStatus::Done);

        // read, finish, and the terminal snapshot; steps strictly increase.
        let history = store.history("t-1").await.unwrap();
        assert_eq!(history.len(), 3);
        let steps: Vec<u64> = history.iter().map(|c| c.step).collect();
        assert_eq!(steps, vec![0, 1, 2]);
        assert_eq!(history.last().unwrap().node_id, END);

        // Terminal event is done.
        let mut terminal = None;
        while let Some(event) = stream.next().await {
            terminal = Some(event);
        }
        assert!(matches!(terminal, Some(Event::Done { .. })));
    }

    #[tokio::test]
    async fn test_interrupt_then_resume_approve() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let engine = Engine::new(store.clone());

        let workflow = WorkflowGraph::new("execute", "apply")
            .with_node("apply", Arc::new(ApplyNode))
            .with_node("finish", Arc::new(FinishNode));

        // First entry suspends.
        let (ctx, mut stream) = context("t-2");
        let state = RunState::new("t-2", "execute", "apply");
        let suspended = engine.run(&workflow, &ctx, state).await.unwrap();
        assert_eq!(suspended.status, RunStatus::Running);

        let mut saw_interrupt = false;
        while let Some(event) = stream.next().await {
            if matches!(event, Event::Interrupt { .. }) {
                saw_interrupt = true;
            }
        }
        assert!(saw_interrupt);
        assert!(store.pending_interrupt("t-2").await.unwrap().is_some());

        // Resume with approval completes the run.
        let (ctx2, mut stream2) = context("t-2");
        let record = DecisionRecord::new(Decision::Approve, "alice");
        let done = engine
            .resume(&workflow, &ctx2, "t-2", record)
            .await
            .unwrap();
        assert_eq!(done.status, RunStatus::Done);
        assert_eq!(done.outcome.as_deref(), Some("applied"));
        assert!(store.pending_interrupt("t-2").await.unwrap().is_none());

        let mut terminal = None;
        while let Some(event) = stream2.next().await {
            terminal = Some(event);
        }
        assert!(matches!(terminal, Some(Event::Done { .. })));
    }

    #[tokio::test]
    async fn test_resume_reject_records_rejection() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let engine = Engine::new(store.clone());

        let workflow = WorkflowGraph::new("execute", "apply")
            .with_node("apply", Arc::new(ApplyNode))
            .with_node("finish", Arc::new(FinishNode));

        let (ctx, _stream) = context("t-3");
        engine
            .run(&workflow, &ctx, RunState::new("t-3", "execute", "apply"))
            .await
            .unwrap();

        let (ctx2, _stream2) = context("t-3");
        let record = DecisionRecord::new(
            Decision::Reject {
                reason: Some("not during business hours".into()),
            },
            "alice",
        );
        let done = engine
            .resume(&workflow, &ctx2, "t-3", record)
            .await
            .unwrap();
        assert_eq!(done.status, RunStatus::Rejected);
        assert_eq!(
            done.outcome.as_deref(),
            Some("not during business hours")
        );
    }

    #[tokio::test]
    async fn test_resume_without_interrupt_fails() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let engine = Engine::new(store.clone());
        let (ctx, _stream) = context("t-4");

        engine
            .run(&graph(), &ctx, RunState::new("t-4", "test", "read"))
            .await
            .unwrap();

        let (ctx2, mut stream2) = context("t-4");
        let err = engine
            .resume(
                &graph(),
                &ctx2,
                "t-4",
                DecisionRecord::new(Decision::Approve, "alice"),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "policy_rejected");

        // The failed resume closed its stream with an error event.
        let mut terminal = None;
        while let Some(event) = stream2.next().await {
            terminal = Some(event);
        }
        assert!(matches!(terminal, Some(Event::Error { .. })));
    }

    #[tokio::test]
    async fn test_cancel_before_node_boundary() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let engine = Engine::new(store.clone());
        let (ctx, mut stream) = context("t-5");
        ctx.cancel.cancel();

        let err = engine
            .run(&graph(), &ctx, RunState::new("t-5", "test", "read"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Cancelled));

        let mut terminal = None;
        while let Some(event) = stream.next().await {
            terminal = Some(event);
        }
        match terminal {
            Some(Event::Error { code, .. }) => assert_eq!(code, "cancelled"),
            other => panic!("expected error event, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_resume_determinism_from_latest_checkpoint() {
        // Running the same read-only workflow twice over fresh stores
        // yields the same terminal state modulo timestamps.
        let run_once = || async {
            let store = Arc::new(InMemoryCheckpointStore::new());
            let engine = Engine::new(store.clone());
            let (ctx, _stream) = context("t-6");
            engine
                .run(&graph(), &ctx, RunState::new("t-6", "test", "read"))
                .await
                .unwrap()
        };

        let a = run_once().await;
        let b = run_once().await;
        assert_eq!(a.status, b.status);
        assert_eq!(a.cursor, b.cursor);
        assert_eq!(
            a.tool_results.get("telemetry").unwrap().rows,
            b.tool_results.get("telemetry").unwrap().rows
        );
        assert_eq!(
            a.messages.last().unwrap().content,
            b.messages.last().unwrap().content
        );
    }
}
