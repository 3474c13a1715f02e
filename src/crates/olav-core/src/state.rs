//! Run state: the self-contained snapshot a workflow executes over.
//!
//! Every node consumes and produces a [`RunState`]; the engine serializes
//! it into the checkpoint written at each node boundary. Restoring the
//! latest checkpoint and re-entering at the cursor reproduces the run, so
//! the state must carry everything: messages, plan, tool results, route
//! annotation, and working variables.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::Result;
use crate::messages::Message;
use crate::plan::Plan;
use crate::tool::RecordSet;

/// Client-hinted interaction mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Standard workflows
    #[default]
    Standard,
    /// Deep-dive eligible
    Expert,
}

/// How the router picked the workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteMethod {
    /// Embedding similarity exceeded the threshold
    Embedding,
    /// LLM classification over the shortlist
    Llm,
    /// Stable default after embedding and LLM both declined
    Fallback,
}

/// Routing outcome, annotated onto the first checkpoint for audit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteDecision {
    /// Selected workflow
    pub workflow: String,

    /// Stage that made the selection
    pub method: RouteMethod,

    /// Similarity or classifier confidence, when available
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
}

/// Terminal disposition of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Still executing or suspended
    Running,
    /// Completed normally
    Done,
    /// Operation rejected by the approver
    Rejected,
    /// Aborted by user decision
    AbortedByUser,
    /// Terminated by an error
    Failed,
}

impl Default for RunStatus {
    fn default() -> Self {
        RunStatus::Running
    }
}

/// The complete, serializable state of one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    /// Owning thread
    pub thread_id: String,

    /// Workflow being executed
    pub workflow: String,

    /// Node to execute next
    pub cursor: String,

    /// Interaction mode
    #[serde(default)]
    pub mode: Mode,

    /// Owner of the thread, when the client identified one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,

    /// Conversation so far, append-only
    #[serde(default)]
    pub messages: Vec<Message>,

    /// Deep-dive plan, when one exists
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<Plan>,

    /// Routing annotation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route: Option<RouteDecision>,

    /// Partial tool results keyed by a node-chosen label
    #[serde(default)]
    pub tool_results: BTreeMap<String, RecordSet>,

    /// Node-scoped working variables
    #[serde(default)]
    pub vars: BTreeMap<String, Value>,

    /// Run disposition
    #[serde(default)]
    pub status: RunStatus,

    /// Human-readable outcome note
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,
}

impl RunState {
    /// Initial state for a new run
    pub fn new(
        thread_id: impl Into<String>,
        workflow: impl Into<String>,
        entry: impl Into<String>,
    ) -> Self {
        Self {
            thread_id: thread_id.into(),
            workflow: workflow.into(),
            cursor: entry.into(),
            mode: Mode::default(),
            owner: None,
            messages: Vec::new(),
            plan: None,
            route: None,
            tool_results: BTreeMap::new(),
            vars: BTreeMap::new(),
            status: RunStatus::Running,
            outcome: None,
        }
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_owner(mut self, owner: Option<String>) -> Self {
        self.owner = owner;
        self
    }

    pub fn with_messages(mut self, messages: Vec<Message>) -> Self {
        self.messages = messages;
        self
    }

    pub fn with_route(mut self, route: RouteDecision) -> Self {
        self.route = Some(route);
        self
    }

    /// Append a message
    pub fn push_message(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// The latest user message, if any
    pub fn last_user_message(&self) -> Option<&Message> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == crate::messages::MessageRole::User)
    }

    /// Set a working variable
    pub fn set_var(&mut self, key: impl Into<String>, value: Value) {
        self.vars.insert(key.into(), value);
    }

    /// Read a working variable
    pub fn var(&self, key: &str) -> Option<&Value> {
        self.vars.get(key)
    }

    /// Remove and return a working variable
    pub fn take_var(&mut self, key: &str) -> Option<Value> {
        self.vars.remove(key)
    }

    /// Serialize into a checkpoint snapshot value
    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Restore from a checkpoint snapshot value
    pub fn from_value(value: &Value) -> Result<Self> {
        Ok(serde_json::from_value(value.clone())?)
    }

    /// Compact view carried on the `done` event
    pub fn final_view(&self) -> Value {
        json!({
            "workflow": self.workflow,
            "status": self.status,
            "outcome": self.outcome,
            "thread_id": self.thread_id,
        })
    }
}
