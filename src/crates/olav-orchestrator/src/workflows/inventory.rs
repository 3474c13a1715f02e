//! The inventory CRUD workflow.
//!
//! Reads against the inventory of record run unattended; any create,
//! update, or delete is proposed, gated, applied, and confirmed with a
//! follow-up read.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use olav_core::{
    Dispatch, EngineError, Mode, NodeContext, NodeTransition, Result, RunState, RunStatus,
    WorkflowGraph, WorkflowNode,
};

use super::{prompt_request, query_text, render_records, say, think, WorkflowDescriptor};

const INTENT_PROMPT: &str = r#"You translate an inventory request into a structured operation.

Request: {query}

Respond with JSON only:
{"operation": "read" | "create" | "update" | "delete", "object_type": "<device|interface|prefix|...>", "payload": { ... }}"#;

/// Tool bindings for the inventory workflow
#[derive(Debug, Clone)]
pub struct InventoryWorkflowConfig {
    /// Read-class inventory query tool
    pub read_tool: String,

    /// Write-class inventory mutation tool
    pub write_tool: String,
}

impl Default for InventoryWorkflowConfig {
    fn default() -> Self {
        Self {
            read_tool: "inventory.query".to_string(),
            write_tool: "inventory.mutate".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct InventoryIntent {
    operation: String,
    object_type: String,
    #[serde(default)]
    payload: serde_json::Value,
}

struct ProposeNode {
    read_tool: String,
}

#[async_trait]
impl WorkflowNode for ProposeNode {
    async fn run(&self, ctx: &NodeContext, state: &mut RunState) -> Result<NodeTransition> {
        let prompt = INTENT_PROMPT.replace("{query}", &query_text(state));
        let schema = json!({
            "type": "object",
            "properties": {
                "operation": {"type": "string"},
                "object_type": {"type": "string"},
                "payload": {"type": "object"}
            },
            "required": ["operation", "object_type"]
        });

        let value = ctx
            .chat
            .structured(prompt_request(state, prompt), &schema)
            .await?;
        let intent: InventoryIntent = serde_json::from_value(value).map_err(|e| {
            EngineError::contract("inventory.propose", format!("malformed intent: {}", e))
        })?;

        think(
            ctx,
            "propose",
            format!("{} {}", intent.operation, intent.object_type),
        )
        .await?;

        if intent.operation == "read" {
            // Reads run unattended.
            let args = json!({
                "object_type": intent.object_type,
                "filter": intent.payload,
            });
            match ctx
                .dispatch_tool("propose", &self.read_tool, args, vec![])
                .await?
            {
                Dispatch::Completed(records) => {
                    let rendered = render_records(&records);
                    state.tool_results.insert("read".into(), records);
                    say(ctx, state, rendered).await?;
                    state.outcome = Some("inventory read complete".to_string());
                    return Ok(NodeTransition::Halt);
                }
                Dispatch::NeedsApproval(plan) => return Ok(NodeTransition::Interrupt(plan)),
                Dispatch::Rejected { reason } => {
                    state.status = RunStatus::Rejected;
                    state.outcome = Some(reason);
                    return Ok(NodeTransition::Halt);
                }
                Dispatch::PlanModified { .. } => {
                    return Err(EngineError::internal("plan modification outside deep-dive"))
                }
            }
        }

        state.set_var("intent", serde_json::to_value(&intent)?);
        say(
            ctx,
            state,
            format!(
                "Proposed inventory {}: {} {}",
                intent.operation, intent.object_type, intent.payload
            ),
        )
        .await?;
        Ok(NodeTransition::Goto("apply".into()))
    }
}

struct ApplyNode {
    write_tool: String,
}

#[async_trait]
impl WorkflowNode for ApplyNode {
    async fn run(&self, ctx: &NodeContext, state: &mut RunState) -> Result<NodeTransition> {
        let intent: InventoryIntent = serde_json::from_value(
            state
                .var("intent")
                .cloned()
                .ok_or_else(|| EngineError::internal("intent missing from state"))?,
        )?;

        let args = json!({
            "operation": intent.operation,
            "object_type": intent.object_type,
            "payload": intent.payload,
        });
        match ctx
            .dispatch_tool("apply", &self.write_tool, args, vec![])
            .await?
        {
            Dispatch::Completed(records) => {
                state.tool_results.insert("apply".into(), records);
                Ok(NodeTransition::Goto("confirm".into()))
            }
            Dispatch::NeedsApproval(plan) => Ok(NodeTransition::Interrupt(plan)),
            Dispatch::Rejected { reason } => {
                state.status = RunStatus::Rejected;
                state.outcome = Some(reason.clone());
                say(ctx, state, format!("operation rejected by approver: {}", reason)).await?;
                Ok(NodeTransition::Halt)
            }
            Dispatch::PlanModified { .. } => Err(EngineError::internal(
                "plan modification outside deep-dive",
            )),
        }
    }
}

struct ConfirmNode {
    read_tool: String,
}

#[async_trait]
impl WorkflowNode for ConfirmNode {
    async fn run(&self, ctx: &NodeContext, state: &mut RunState) -> Result<NodeTransition> {
        let intent: InventoryIntent = serde_json::from_value(
            state
                .var("intent")
                .cloned()
                .ok_or_else(|| EngineError::internal("intent missing from state"))?,
        )?;

        let args = json!({"object_type": intent.object_type, "filter": {}});
        match ctx
            .dispatch_tool("confirm", &self.read_tool, args, vec![])
            .await?
        {
            Dispatch::Completed(records) => {
                let rendered = render_records(&records);
                state.tool_results.insert("confirm".into(), records);
                say(
                    ctx,
                    state,
                    format!("Inventory {} applied. Current state:\n{}", intent.operation, rendered),
                )
                .await?;
            }
            Dispatch::Rejected { reason } => {
                say(ctx, state, format!("Applied, but confirmation read failed: {}", reason))
                    .await?;
            }
            Dispatch::NeedsApproval(plan) => return Ok(NodeTransition::Interrupt(plan)),
            Dispatch::PlanModified { .. } => {
                return Err(EngineError::internal("plan modification outside deep-dive"))
            }
        }
        state.outcome = Some("inventory change complete".to_string());
        Ok(NodeTransition::Halt)
    }
}

/// Build the inventory workflow graph
pub fn workflow(config: InventoryWorkflowConfig) -> WorkflowGraph {
    WorkflowGraph::new("inventory", "propose")
        .with_node(
            "propose",
            Arc::new(ProposeNode {
                read_tool: config.read_tool.clone(),
            }),
        )
        .with_node(
            "apply",
            Arc::new(ApplyNode {
                write_tool: config.write_tool,
            }),
        )
        .with_node(
            "confirm",
            Arc::new(ConfirmNode {
                read_tool: config.read_tool,
            }),
        )
}

/// The registered descriptor for this workflow
pub fn descriptor(config: InventoryWorkflowConfig) -> WorkflowDescriptor {
    WorkflowDescriptor::new(
        "Query or mutate the network inventory of record",
        workflow(config),
    )
    .with_examples(vec![
        "List all devices in site LON1",
        "Add a new device R9 to the inventory",
        "Update the management IP of SW3",
        "Delete the decommissioned switch from inventory",
    ])
    .with_keywords(vec!["inventory", "device list", "add", "decommission"])
    .with_preferred_mode(Mode::Standard)
}
