//! Workflow nodes, graphs, and the dispatch context.
//!
//! A workflow is a directed graph of named nodes; each node consumes the
//! run state and yields a [`NodeTransition`]: go to another node, halt, or
//! interrupt for human approval. Graphs are plain values assembled by the
//! composition root — no inheritance, no global registries.
//!
//! [`NodeContext`] carries the explicit dependencies a node may use (event
//! sink, chat model, tool registry, capability index, approval gate,
//! cancellation flag) and the gated tool dispatch helper that enforces the
//! write-approval invariant.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::capability::CapabilityIndex;
use crate::error::{EngineError, Result};
use crate::event::Event;
use crate::gate::{ApprovalGate, ExecutionPlan, GateContext, GateOutcome, ResumeEnvelope};
use crate::llm::ChatModel;
use crate::retry::retry_with_backoff;
use crate::state::RunState;
use crate::stream::EventSink;
use crate::tool::{RecordSet, ToolRegistry};

/// Sentinel node name that halts the run
pub const END: &str = "__end__";

/// Cooperative cancellation flag, observed at node boundaries and
/// before every tool dispatch
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What a node decided after running
#[derive(Debug, Clone)]
pub enum NodeTransition {
    /// Continue at the named node
    Goto(String),

    /// The run is complete
    Halt,

    /// Suspend for a human decision on this plan
    Interrupt(ExecutionPlan),
}

/// A single step in a workflow
#[async_trait]
pub trait WorkflowNode: Send + Sync {
    /// Execute against the run state, emitting events via the context
    async fn run(&self, ctx: &NodeContext, state: &mut RunState) -> Result<NodeTransition>;
}

/// A named, pre-registered node graph
#[derive(Clone)]
pub struct WorkflowGraph {
    /// Workflow name (the router's selection key)
    pub name: String,

    /// Entry node
    pub entry: String,

    nodes: HashMap<String, Arc<dyn WorkflowNode>>,
}

impl WorkflowGraph {
    /// A graph with an entry node name
    pub fn new(name: impl Into<String>, entry: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entry: entry.into(),
            nodes: HashMap::new(),
        }
    }

    /// Add a node under a name
    pub fn with_node(mut self, name: impl Into<String>, node: Arc<dyn WorkflowNode>) -> Self {
        self.nodes.insert(name.into(), node);
        self
    }

    /// Look up a node
    pub fn node(&self, name: &str) -> Result<&Arc<dyn WorkflowNode>> {
        self.nodes.get(name).ok_or_else(|| {
            EngineError::internal(format!("workflow {} has no node {}", self.name, name))
        })
    }

    /// Structural validation: the entry node must exist
    pub fn validate(&self) -> Result<()> {
        if !self.nodes.contains_key(&self.entry) {
            return Err(EngineError::internal(format!(
                "workflow {} entry node {} not registered",
                self.name, self.entry
            )));
        }
        Ok(())
    }

    /// Registered node names, sorted
    pub fn node_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.nodes.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Execution limits observed by the dispatch helper and the engine
#[derive(Debug, Clone)]
pub struct EngineLimits {
    /// Per-tool call deadline
    pub tool_timeout: Duration,

    /// Node duration that triggers a warning
    pub node_soft_timeout: Duration,

    /// Node duration that aborts the run
    pub node_hard_timeout: Duration,

    /// How long an in-flight tool call may finish after cancel
    pub drain_timeout: Duration,
}

impl Default for EngineLimits {
    fn default() -> Self {
        Self {
            tool_timeout: Duration::from_secs(60),
            node_soft_timeout: Duration::from_secs(120),
            node_hard_timeout: Duration::from_secs(600),
            drain_timeout: Duration::from_secs(10),
        }
    }
}

/// Result of a gated tool dispatch
#[derive(Debug, Clone)]
pub enum Dispatch {
    /// The tool ran; here are its records
    Completed(RecordSet),

    /// A human decision is required; the node should interrupt with this
    /// plan
    NeedsApproval(ExecutionPlan),

    /// The gate refused the dispatch
    Rejected { reason: String },

    /// Deep-dive only: the approver asked for a replan
    PlanModified { instruction: String },
}

/// Explicit dependencies handed to every node
#[derive(Clone)]
pub struct NodeContext {
    /// Thread of the run
    pub thread_id: String,

    /// Event sink for this run
    pub events: EventSink,

    /// Chat model capability
    pub chat: Arc<dyn ChatModel>,

    /// Registered tools
    pub tools: Arc<ToolRegistry>,

    /// Schema search surface
    pub capabilities: Arc<CapabilityIndex>,

    /// Approval gate policy
    pub gate: Arc<dyn ApprovalGate>,

    /// Cooperative cancellation
    pub cancel: CancelFlag,

    /// Timeouts
    pub limits: EngineLimits,

    /// Decision installed by `resume`, consumed once at the interrupted
    /// dispatch point
    resume: Arc<Mutex<Option<ResumeEnvelope>>>,
}

impl NodeContext {
    /// Build a context for one run
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        thread_id: impl Into<String>,
        events: EventSink,
        chat: Arc<dyn ChatModel>,
        tools: Arc<ToolRegistry>,
        capabilities: Arc<CapabilityIndex>,
        gate: Arc<dyn ApprovalGate>,
        cancel: CancelFlag,
        limits: EngineLimits,
    ) -> Self {
        Self {
            thread_id: thread_id.into(),
            events,
            chat,
            tools,
            capabilities,
            gate,
            cancel,
            limits,
            resume: Arc::new(Mutex::new(None)),
        }
    }

    /// Install the decision envelope before re-entering the graph
    pub async fn install_resume(&self, envelope: ResumeEnvelope) {
        *self.resume.lock().await = Some(envelope);
    }

    /// Take the pending decision envelope, if any
    pub async fn take_resume(&self) -> Option<ResumeEnvelope> {
        self.resume.lock().await.take()
    }

    /// Dispatch a tool through contract validation, the approval gate,
    /// and the tool's retry policy, emitting paired `tool_start` /
    /// `tool_end` events.
    ///
    /// A `write`-class tool (or a read matching risk policy) that has no
    /// resolved decision yields [`Dispatch::NeedsApproval`]; the calling
    /// node must return [`NodeTransition::Interrupt`] with the plan.
    pub async fn dispatch_tool(
        &self,
        node_id: &str,
        name: &str,
        args: Value,
        targets: Vec<String>,
    ) -> Result<Dispatch> {
        if self.cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let tool = self.tools.get(name)?.clone();
        tool.descriptor.input.validate(name, &args)?;

        let gate_ctx = GateContext {
            thread_id: self.thread_id.clone(),
            node_id: node_id.to_string(),
            targets,
        };
        let review = self.gate.review(&tool.descriptor, &args, &gate_ctx).await?;

        let final_args = if review.requires_approval {
            // Only a decision installed by resume lets a gated dispatch
            // proceed; a fresh dispatch suspends here.
            let envelope = {
                let mut slot = self.resume.lock().await;
                match slot.as_ref() {
                    Some(e) if e.plan.tool == name => slot.take(),
                    _ => None,
                }
            };

            match envelope {
                None => {
                    debug!(tool = name, node = node_id, "dispatch requires approval");
                    return Ok(Dispatch::NeedsApproval(review.plan));
                }
                Some(envelope) => {
                    let outcome = self
                        .gate
                        .resolve(&envelope.plan, envelope.record, &tool.descriptor)
                        .await?;
                    match outcome {
                        GateOutcome::Proceed { args } => args,
                        GateOutcome::Rejected { reason } => {
                            info!(tool = name, %reason, "dispatch rejected by approver");
                            return Ok(Dispatch::Rejected { reason });
                        }
                        GateOutcome::PlanModified { instruction } => {
                            return Ok(Dispatch::PlanModified { instruction });
                        }
                    }
                }
            }
        } else {
            args
        };

        self.execute_tool(name, final_args).await.map(Dispatch::Completed)
    }

    /// Run an already-authorized tool call with retry and timeout
    async fn execute_tool(&self, name: &str, args: Value) -> Result<RecordSet> {
        let tool = self.tools.get(name)?.clone();
        let call_id = Uuid::new_v4().to_string();

        self.events
            .emit(Event::ToolStart {
                id: call_id.clone(),
                name: name.to_string(),
                args: args.clone(),
            })
            .await?;

        let started = Instant::now();
        let executor = tool.executor.clone();
        let timeout = self.limits.tool_timeout;
        let result = retry_with_backoff(&tool.descriptor.retry, name, || {
            let executor = executor.clone();
            let args = args.clone();
            async move {
                match tokio::time::timeout(timeout, executor.execute(args)).await {
                    Ok(result) => result,
                    Err(_) => Err(EngineError::Timeout {
                        operation: format!("tool {}", name),
                    }),
                }
            }
        })
        .await;

        let duration_ms = started.elapsed().as_millis() as u64;
        match result {
            Ok(records) => {
                self.events
                    .emit(Event::ToolEnd {
                        id: call_id,
                        result: Some(serde_json::to_value(&records)?),
                        error: None,
                        duration_ms,
                        success: true,
                    })
                    .await?;
                Ok(records)
            }
            Err(err) => {
                self.events
                    .emit(Event::ToolEnd {
                        id: call_id,
                        result: None,
                        error: Some(err.to_string()),
                        duration_ms,
                        success: false,
                    })
                    .await?;
                Err(err)
            }
        }
    }
}
