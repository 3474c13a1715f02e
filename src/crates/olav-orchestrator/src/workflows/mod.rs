//! Workflow descriptors, registry, and shared node helpers.
//!
//! Each workflow module exports a descriptor value; the composition root
//! inserts them into the [`WorkflowRegistry`] at startup in a
//! deterministic order. There is no auto-registration.

pub mod deepdive;
pub mod execute;
pub mod inventory;
pub mod query;

use std::collections::HashMap;

use futures::StreamExt;
use serde_json::Value;

use olav_core::llm::ChatRequest;
use olav_core::{Event, Message, Mode, NodeContext, RecordSet, Result as CoreResult, WorkflowGraph};

use crate::{OrchestratorError, Result};

/// A registered workflow: routing metadata plus the node graph
#[derive(Clone)]
pub struct WorkflowDescriptor {
    /// Unique name (the router's selection key)
    pub name: String,

    /// One-line purpose shown to the LLM classifier
    pub purpose: String,

    /// Example queries; their embedding centroid drives semantic routing
    pub examples: Vec<String>,

    /// Optional trigger keywords that boost the semantic score
    pub keywords: Vec<String>,

    /// Mode this workflow prefers when the client does not hint one
    pub preferred_mode: Mode,

    /// The node graph
    pub graph: WorkflowGraph,
}

impl WorkflowDescriptor {
    /// Describe a workflow around its graph
    pub fn new(purpose: impl Into<String>, graph: WorkflowGraph) -> Self {
        Self {
            name: graph.name.clone(),
            purpose: purpose.into(),
            examples: Vec::new(),
            keywords: Vec::new(),
            preferred_mode: Mode::Standard,
            graph,
        }
    }

    pub fn with_examples(mut self, examples: Vec<&str>) -> Self {
        self.examples = examples.into_iter().map(String::from).collect();
        self
    }

    pub fn with_keywords(mut self, keywords: Vec<&str>) -> Self {
        self.keywords = keywords.into_iter().map(String::from).collect();
        self
    }

    pub fn with_preferred_mode(mut self, mode: Mode) -> Self {
        self.preferred_mode = mode;
        self
    }
}

/// Startup registry of workflows; frozen per process
#[derive(Clone, Default)]
pub struct WorkflowRegistry {
    workflows: HashMap<String, WorkflowDescriptor>,
    order: Vec<String>,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a workflow; fails on name collision
    pub fn register(&mut self, descriptor: WorkflowDescriptor) -> Result<()> {
        descriptor.graph.validate()?;
        if self.workflows.contains_key(&descriptor.name) {
            return Err(OrchestratorError::Config(format!(
                "workflow already registered: {}",
                descriptor.name
            )));
        }
        self.order.push(descriptor.name.clone());
        self.workflows.insert(descriptor.name.clone(), descriptor);
        Ok(())
    }

    /// Look up a workflow
    pub fn get(&self, name: &str) -> Result<&WorkflowDescriptor> {
        self.workflows
            .get(name)
            .ok_or_else(|| OrchestratorError::WorkflowNotFound(name.to_string()))
    }

    /// Descriptors in registration order
    pub fn list(&self) -> Vec<&WorkflowDescriptor> {
        self.order
            .iter()
            .filter_map(|name| self.workflows.get(name))
            .collect()
    }

    /// Number of registered workflows
    pub fn len(&self) -> usize {
        self.workflows.len()
    }

    /// Whether nothing is registered
    pub fn is_empty(&self) -> bool {
        self.workflows.is_empty()
    }
}

/// Render a record set as a compact text table for messages and prompts
pub(crate) fn render_records(records: &RecordSet) -> String {
    if records.is_empty() {
        return format!("(no rows from {})", records.meta.source);
    }

    let mut out = records.columns.join(" | ");
    out.push('\n');
    for row in &records.rows {
        let cells: Vec<String> = row
            .iter()
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect();
        out.push_str(&cells.join(" | "));
        out.push('\n');
    }
    out
}

/// Call the chat model, preferring the streaming path and forwarding
/// token deltas to the event stream; falls back to a blocking completion
/// when the provider does not stream. Returns the full text.
pub(crate) async fn stream_chat(ctx: &NodeContext, request: ChatRequest) -> CoreResult<String> {
    match ctx.chat.stream(request.clone()).await {
        Ok(mut stream) => {
            let mut full = String::new();
            while let Some(chunk) = stream.next().await {
                let chunk = chunk?;
                if !chunk.delta.is_empty() {
                    ctx.events
                        .emit(Event::Token {
                            delta: chunk.delta.clone(),
                        })
                        .await?;
                    full.push_str(&chunk.delta);
                }
                if chunk.done {
                    break;
                }
            }
            Ok(full)
        }
        Err(_) => {
            let response = ctx.chat.chat(request).await?;
            Ok(response.text().to_string())
        }
    }
}

/// Emit an assistant message event and append it to the state messages
pub(crate) async fn say(
    ctx: &NodeContext,
    state: &mut olav_core::RunState,
    content: impl Into<String>,
) -> CoreResult<()> {
    let content = content.into();
    ctx.events
        .emit(Event::Message {
            role: olav_core::MessageRole::Assistant,
            content: content.clone(),
        })
        .await?;
    state.push_message(Message::assistant(content));
    Ok(())
}

/// Emit a thinking event for a node step
pub(crate) async fn think(
    ctx: &NodeContext,
    step: &str,
    content: impl Into<String>,
) -> CoreResult<()> {
    ctx.events
        .emit(Event::Thinking {
            step: step.to_string(),
            content: content.into(),
            confidence: None,
        })
        .await
}

/// Build a chat request over the run's message history plus a system-style
/// instruction prepended as a user message.
pub(crate) fn prompt_request(state: &olav_core::RunState, instruction: String) -> ChatRequest {
    let mut messages = state.messages.clone();
    messages.push(Message::user(instruction));
    ChatRequest::new(messages)
}

/// The text of the query driving this run
pub(crate) fn query_text(state: &olav_core::RunState) -> String {
    state
        .last_user_message()
        .map(|m| m.content.clone())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use olav_core::{RecordMeta, WorkflowGraph};

    #[test]
    fn test_registry_order_and_collision() {
        let mut registry = WorkflowRegistry::new();

        // Graphs need a registered entry node to validate.
        struct Noop;
        #[async_trait::async_trait]
        impl olav_core::WorkflowNode for Noop {
            async fn run(
                &self,
                _ctx: &NodeContext,
                _state: &mut olav_core::RunState,
            ) -> CoreResult<olav_core::NodeTransition> {
                Ok(olav_core::NodeTransition::Halt)
            }
        }

        let graph = |name: &str| {
            WorkflowGraph::new(name, "start").with_node("start", std::sync::Arc::new(Noop))
        };

        registry
            .register(WorkflowDescriptor::new("first", graph("query")))
            .unwrap();
        registry
            .register(WorkflowDescriptor::new("second", graph("execute")))
            .unwrap();

        let names: Vec<&str> = registry.list().iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["query", "execute"]);

        let err = registry
            .register(WorkflowDescriptor::new("dup", graph("query")))
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Config(_)));
    }

    #[test]
    fn test_render_records() {
        let records = RecordSet::new(
            vec!["ifname".into(), "state".into()],
            vec![
                vec![serde_json::json!("Gi0/1"), serde_json::json!("up")],
                vec![serde_json::json!("Gi0/2"), serde_json::json!("down")],
            ],
            RecordMeta::source("suzieq"),
        );
        let rendered = render_records(&records);
        assert!(rendered.contains("ifname | state"));
        assert!(rendered.contains("Gi0/2 | down"));

        let empty = RecordSet::empty(RecordMeta::source("suzieq"));
        assert!(render_records(&empty).contains("no rows"));
    }
}
