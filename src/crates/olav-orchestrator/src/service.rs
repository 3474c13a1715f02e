//! The OLAV service facade and composition root.
//!
//! [`OlavBuilder`] is where everything is wired: tools, workflows, model
//! providers, stores, and policy are registered explicitly at startup and
//! frozen into an [`Olav`] value. The facade exposes the client surface:
//! submit a query and stream events, resume a suspended run with a
//! decision, cancel, and inspect threads and audit.
//!
//! One workflow per thread at a time: a second submit against a running
//! thread is refused, and a suspended thread must be resumed, not
//! resubmitted.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use olav_checkpoint::{
    AuditEntry, AuditStore, CheckpointStore, InMemoryAuditStore, InMemoryCheckpointStore,
    ThreadSummary,
};
use olav_core::llm::Embedder;
use olav_core::{
    ApprovalGate, CancelFlag, CapabilityIndex, ChatModel, Decision, DecisionRecord, Engine, Event,
    EventSink, EventStream, Message, MessageRole, Mode, NodeContext, RouteDecision, RunState,
    ToolDescriptor, ToolExecutor, ToolRegistry,
};

use crate::config::OlavConfig;
use crate::gate::HitlGate;
use crate::router::IntentRouter;
use crate::workflows::{WorkflowDescriptor, WorkflowRegistry};
use crate::{OrchestratorError, Result};

/// A client request to start or continue a thread
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmitRequest {
    /// Continue this thread; omitted starts a new one
    pub thread_id: Option<String>,

    /// Client-hinted mode
    pub mode: Option<Mode>,

    /// Owner identity for thread listing
    pub owner: Option<String>,

    /// New messages, at least one with the user role
    pub messages: Vec<Message>,
}

impl SubmitRequest {
    /// A request carrying one user message
    pub fn query(text: impl Into<String>) -> Self {
        Self {
            thread_id: None,
            mode: None,
            owner: None,
            messages: vec![Message::user(text)],
        }
    }

    pub fn with_thread(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }
}

/// Metadata of the latest checkpoint for a thread
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMeta {
    pub step: u64,
    pub node_id: String,
    pub ts: DateTime<Utc>,
}

/// A thread as seen by clients
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadView {
    pub thread_id: String,
    pub messages: Vec<Message>,
    pub latest: Option<CheckpointMeta>,
    pub pending_interrupt: Option<serde_json::Value>,
}

/// Composition root for the service
pub struct OlavBuilder {
    config: OlavConfig,
    tools: ToolRegistry,
    workflows: WorkflowRegistry,
    chat: Option<Arc<dyn ChatModel>>,
    embedder: Option<Arc<dyn Embedder>>,
    checkpoints: Option<Arc<dyn CheckpointStore>>,
    audit: Option<Arc<dyn AuditStore>>,
    gate: Option<Arc<dyn ApprovalGate>>,
}

impl OlavBuilder {
    pub fn new() -> Self {
        Self {
            config: OlavConfig::default(),
            tools: ToolRegistry::new(),
            workflows: WorkflowRegistry::new(),
            chat: None,
            embedder: None,
            checkpoints: None,
            audit: None,
            gate: None,
        }
    }

    pub fn with_config(mut self, config: OlavConfig) -> Self {
        self.config = config;
        self
    }

    /// Register a tool at startup
    pub fn register_tool(
        mut self,
        descriptor: ToolDescriptor,
        executor: Arc<dyn ToolExecutor>,
    ) -> Result<Self> {
        self.tools.register(descriptor, executor)?;
        Ok(self)
    }

    /// Register a workflow at startup
    pub fn register_workflow(mut self, descriptor: WorkflowDescriptor) -> Result<Self> {
        self.workflows.register(descriptor)?;
        Ok(self)
    }

    /// Register the standard workflow set (query, execute, inventory,
    /// deepdive) with default tool bindings
    pub fn with_standard_workflows(self) -> Result<Self> {
        let deepdive_config = (&self.config.deepdive).into();
        self.register_workflow(crate::workflows::query::descriptor(Default::default()))?
            .register_workflow(crate::workflows::execute::descriptor(Default::default()))?
            .register_workflow(crate::workflows::inventory::descriptor(Default::default()))?
            .register_workflow(crate::workflows::deepdive::descriptor(deepdive_config))
    }

    pub fn with_chat(mut self, chat: Arc<dyn ChatModel>) -> Self {
        self.chat = Some(chat);
        self
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn with_checkpoint_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoints = Some(store);
        self
    }

    pub fn with_audit_store(mut self, store: Arc<dyn AuditStore>) -> Self {
        self.audit = Some(store);
        self
    }

    /// Override the approval gate (tests)
    pub fn with_gate(mut self, gate: Arc<dyn ApprovalGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn build(self) -> Result<Olav> {
        let chat = self
            .chat
            .ok_or_else(|| OrchestratorError::Config("a chat model is required".into()))?;
        let checkpoints = self
            .checkpoints
            .unwrap_or_else(|| Arc::new(InMemoryCheckpointStore::new()));
        let audit = self
            .audit
            .unwrap_or_else(|| Arc::new(InMemoryAuditStore::new()));

        let gate: Arc<dyn ApprovalGate> = match self.gate {
            Some(gate) => gate,
            None => Arc::new(
                HitlGate::new(self.config.gate.clone(), audit.clone())?
                    .with_chat(chat.clone()),
            ),
        };

        let tools = Arc::new(self.tools);
        let capabilities = Arc::new(CapabilityIndex::from_registry(&tools));
        let workflows = Arc::new(self.workflows);
        let router = IntentRouter::new(
            workflows.clone(),
            chat.clone(),
            self.embedder,
            self.config.router.clone(),
        );

        Ok(Olav {
            config: self.config,
            engine: Engine::new(checkpoints.clone()),
            router,
            workflows,
            tools,
            capabilities,
            chat,
            gate,
            checkpoints,
            audit,
            active: Arc::new(RwLock::new(HashMap::new())),
        })
    }
}

impl Default for OlavBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The agent platform facade
pub struct Olav {
    config: OlavConfig,
    engine: Engine,
    router: IntentRouter,
    workflows: Arc<WorkflowRegistry>,
    tools: Arc<ToolRegistry>,
    capabilities: Arc<CapabilityIndex>,
    chat: Arc<dyn ChatModel>,
    gate: Arc<dyn ApprovalGate>,
    checkpoints: Arc<dyn CheckpointStore>,
    audit: Arc<dyn AuditStore>,
    active: Arc<RwLock<HashMap<String, CancelFlag>>>,
}

impl Olav {
    /// Submit a query; returns the run's event stream
    pub async fn submit(&self, request: SubmitRequest) -> Result<EventStream> {
        let query = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::User)
            .map(|m| m.content.clone())
            .ok_or(OrchestratorError::EmptyRequest)?;

        let thread_id = request
            .thread_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        self.ensure_idle(&thread_id).await?;

        let route = self.router.route(&query).await;
        let descriptor = self.workflows.get(&route.workflow)?;
        let graph = descriptor.graph.clone();
        let mode = request.mode.unwrap_or(descriptor.preferred_mode);

        // Continuation: carry prior messages into the new run.
        let mut messages = match self.checkpoints.latest(&thread_id).await? {
            Some(checkpoint) => RunState::from_value(&checkpoint.state)
                .map(|s| s.messages)
                .unwrap_or_default(),
            None => Vec::new(),
        };
        messages.extend(request.messages.clone());

        let state = RunState::new(&thread_id, &graph.name, &graph.entry)
            .with_mode(mode)
            .with_owner(request.owner.clone())
            .with_messages(messages)
            .with_route(route.clone());

        info!(
            thread_id = %thread_id,
            workflow = %route.workflow,
            method = ?route.method,
            "submitting run"
        );

        let (sink, stream) = EventSink::channel(self.config.engine.event_buffer);
        let cancel = CancelFlag::new();
        self.active
            .write()
            .await
            .insert(thread_id.clone(), cancel.clone());

        let ctx = self.node_context(&thread_id, sink.clone(), cancel);
        let engine = self.engine.clone();
        let active = self.active.clone();
        let new_messages = request.messages;
        let run_thread = thread_id.clone();

        tokio::spawn(async move {
            for message in &new_messages {
                let _ = sink
                    .emit(Event::Message {
                        role: message.role,
                        content: message.content.clone(),
                    })
                    .await;
            }

            if let Err(err) = engine.run(&graph, &ctx, state).await {
                warn!(thread_id = %run_thread, error = %err, "run ended with error");
            }
            active.write().await.remove(&run_thread);
        });

        Ok(stream)
    }

    /// Resume a suspended run with an approver decision
    pub async fn resume(
        &self,
        thread_id: &str,
        decision: Decision,
        approver: &str,
    ) -> Result<EventStream> {
        // The suspended run's task tears down asynchronously after the
        // interrupt reaches the client; give it a moment before calling
        // the thread busy.
        let mut settle = 0u32;
        while self.active.read().await.contains_key(thread_id) {
            settle += 1;
            if settle > 200 {
                return Err(OrchestratorError::ThreadBusy(thread_id.to_string()));
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        let latest = self
            .checkpoints
            .latest(thread_id)
            .await?
            .ok_or_else(|| OrchestratorError::ThreadNotFound(thread_id.to_string()))?;
        let workflow = RunState::from_value(&latest.state)
            .map_err(OrchestratorError::from)?
            .workflow;
        let graph = self.workflows.get(&workflow)?.graph.clone();

        let (sink, stream) = EventSink::channel(self.config.engine.event_buffer);
        let cancel = CancelFlag::new();
        self.active
            .write()
            .await
            .insert(thread_id.to_string(), cancel.clone());

        let ctx = self.node_context(thread_id, sink, cancel);
        let engine = self.engine.clone();
        let active = self.active.clone();
        let record = DecisionRecord::new(decision, approver);
        let run_thread = thread_id.to_string();

        tokio::spawn(async move {
            if let Err(err) = engine.resume(&graph, &ctx, &run_thread, record).await {
                warn!(thread_id = %run_thread, error = %err, "resume ended with error");
            }
            active.write().await.remove(&run_thread);
        });

        Ok(stream)
    }

    /// Request cooperative cancellation of a running thread
    pub async fn cancel(&self, thread_id: &str) -> Result<()> {
        match self.active.read().await.get(thread_id) {
            Some(flag) => {
                flag.cancel();
                Ok(())
            }
            None => Err(OrchestratorError::ThreadNotFound(thread_id.to_string())),
        }
    }

    /// Summaries of all known threads, optionally restricted to an owner
    pub async fn list_threads(&self, owner: Option<&str>) -> Result<Vec<ThreadSummary>> {
        let summaries = self.checkpoints.list_threads().await?;
        let Some(owner) = owner else {
            return Ok(summaries);
        };

        let mut owned = Vec::new();
        for summary in summaries {
            let Some(latest) = self.checkpoints.latest(&summary.thread_id).await? else {
                continue;
            };
            let state_owner = RunState::from_value(&latest.state)
                .ok()
                .and_then(|s| s.owner);
            if state_owner.as_deref() == Some(owner) {
                owned.push(summary);
            }
        }
        Ok(owned)
    }

    /// Full view of one thread
    pub async fn get_thread(&self, thread_id: &str) -> Result<ThreadView> {
        let latest = self
            .checkpoints
            .latest(thread_id)
            .await?
            .ok_or_else(|| OrchestratorError::ThreadNotFound(thread_id.to_string()))?;

        let messages = RunState::from_value(&latest.state)
            .map(|s| s.messages)
            .unwrap_or_default();
        let pending = self.checkpoints.pending_interrupt(thread_id).await?;

        Ok(ThreadView {
            thread_id: thread_id.to_string(),
            messages,
            latest: Some(CheckpointMeta {
                step: latest.step,
                node_id: latest.node_id,
                ts: latest.ts,
            }),
            pending_interrupt: pending.map(|record| record.execution_plan),
        })
    }

    /// Audit entries recorded in `[from, to)`
    pub async fn export_audit(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<AuditEntry>> {
        Ok(self.audit.export(from, to).await?)
    }

    /// Route a query without running anything (admin surface)
    pub async fn router_dry_run(&self, query: &str) -> RouteDecision {
        self.router.route(query).await
    }

    /// Registered workflow descriptors
    pub fn workflows(&self) -> Vec<&WorkflowDescriptor> {
        self.workflows.list()
    }

    /// Synthesize rejections for interrupts older than the configured
    /// decision timeout. Deployments schedule this periodically; without
    /// a configured timeout it is a no-op.
    pub async fn expire_stale_interrupts(&self) -> Result<usize> {
        let Some(timeout_secs) = self.config.gate.decision_timeout_secs else {
            return Ok(0);
        };
        let cutoff = Utc::now() - chrono::Duration::seconds(timeout_secs as i64);

        let mut expired = 0usize;
        for summary in self.checkpoints.list_threads().await? {
            if !summary.pending_interrupt {
                continue;
            }
            let Some(record) = self
                .checkpoints
                .pending_interrupt(&summary.thread_id)
                .await?
            else {
                continue;
            };
            if record.created_at > cutoff {
                continue;
            }

            info!(thread_id = %summary.thread_id, "decision timeout; synthesizing rejection");
            let stream = self
                .resume(
                    &summary.thread_id,
                    Decision::Reject {
                        reason: Some("decision timeout".to_string()),
                    },
                    "policy:timeout",
                )
                .await?;
            drop(stream);
            expired += 1;
        }
        Ok(expired)
    }

    async fn ensure_idle(&self, thread_id: &str) -> Result<()> {
        if self.active.read().await.contains_key(thread_id) {
            return Err(OrchestratorError::ThreadBusy(thread_id.to_string()));
        }
        if self
            .checkpoints
            .pending_interrupt(thread_id)
            .await?
            .is_some()
        {
            return Err(OrchestratorError::ThreadSuspended(thread_id.to_string()));
        }
        Ok(())
    }

    fn node_context(&self, thread_id: &str, sink: EventSink, cancel: CancelFlag) -> NodeContext {
        NodeContext::new(
            thread_id,
            sink,
            self.chat.clone(),
            self.tools.clone(),
            self.capabilities.clone(),
            self.gate.clone(),
            cancel,
            self.config.engine.limits(),
        )
    }
}
