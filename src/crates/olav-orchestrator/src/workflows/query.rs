//! The diagnostic query workflow.
//!
//! Funnel shape: a broad telemetry read, an LLM assessment that decides
//! whether a targeted device read is worthwhile, then a summary rendered
//! over the collected records. Read-only; the approval gate never fires.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use olav_core::{
    Dispatch, Mode, NodeContext, NodeTransition, Result, RunState, RunStatus, WorkflowGraph,
    WorkflowNode,
};

use super::{
    prompt_request, query_text, render_records, say, stream_chat, think, WorkflowDescriptor,
};

const ASSESS_PROMPT: &str = r#"You are assessing network telemetry gathered for this query:
{query}

Telemetry:
{records}

Decide whether a targeted read of a single device would help. Respond with JSON only:
{"severity": "low" | "medium" | "high", "focus_device": "<name or null>", "needs_micro": true | false}"#;

const SUMMARY_PROMPT: &str = r#"Summarize the findings for the user's query using only the data below. Include a table of the relevant rows. Do not speculate beyond the data.

Query: {query}

Broad telemetry:
{macro}

Targeted read:
{micro}"#;

/// Tool bindings for the query workflow
#[derive(Debug, Clone)]
pub struct QueryWorkflowConfig {
    /// Broad telemetry/inventory reader
    pub macro_tool: String,

    /// Targeted device reader
    pub micro_tool: String,
}

impl Default for QueryWorkflowConfig {
    fn default() -> Self {
        Self {
            macro_tool: "telemetry.search".to_string(),
            micro_tool: "device.show".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Assessment {
    severity: String,
    focus_device: Option<String>,
    needs_micro: bool,
}

struct MacroReadNode {
    tool: String,
}

#[async_trait]
impl WorkflowNode for MacroReadNode {
    async fn run(&self, ctx: &NodeContext, state: &mut RunState) -> Result<NodeTransition> {
        think(ctx, "macro_read", "gathering broad telemetry").await?;

        let args = json!({"query": query_text(state)});
        match ctx.dispatch_tool("macro_read", &self.tool, args, vec![]).await? {
            Dispatch::Completed(records) => {
                state.tool_results.insert("macro".into(), records);
                Ok(NodeTransition::Goto("assess".into()))
            }
            Dispatch::NeedsApproval(plan) => Ok(NodeTransition::Interrupt(plan)),
            Dispatch::Rejected { reason } => {
                state.status = RunStatus::Rejected;
                state.outcome = Some(reason);
                Ok(NodeTransition::Goto("summarize".into()))
            }
            Dispatch::PlanModified { .. } => Err(olav_core::EngineError::internal(
                "plan modification outside deep-dive",
            )),
        }
    }
}

struct AssessNode;

#[async_trait]
impl WorkflowNode for AssessNode {
    async fn run(&self, ctx: &NodeContext, state: &mut RunState) -> Result<NodeTransition> {
        let records = state
            .tool_results
            .get("macro")
            .map(render_records)
            .unwrap_or_else(|| "(no telemetry)".to_string());

        let prompt = ASSESS_PROMPT
            .replace("{query}", &query_text(state))
            .replace("{records}", &records);
        let schema = json!({
            "type": "object",
            "properties": {
                "severity": {"type": "string"},
                "focus_device": {"type": ["string", "null"]},
                "needs_micro": {"type": "boolean"}
            },
            "required": ["severity", "needs_micro"]
        });

        let assessment: Option<Assessment> = match ctx
            .chat
            .structured(prompt_request(state, prompt), &schema)
            .await
        {
            Ok(value) => serde_json::from_value(value).ok(),
            Err(err) => {
                warn!(error = %err, "assessment unavailable; summarizing from macro data");
                None
            }
        };

        if let Some(assessment) = assessment {
            think(
                ctx,
                "assess",
                format!("severity {}; micro read: {}", assessment.severity, assessment.needs_micro),
            )
            .await?;
            if assessment.needs_micro {
                if let Some(device) = assessment.focus_device {
                    state.set_var("focus_device", json!(device));
                    return Ok(NodeTransition::Goto("micro_read".into()));
                }
            }
        }

        Ok(NodeTransition::Goto("summarize".into()))
    }
}

struct MicroReadNode {
    tool: String,
}

#[async_trait]
impl WorkflowNode for MicroReadNode {
    async fn run(&self, ctx: &NodeContext, state: &mut RunState) -> Result<NodeTransition> {
        let device = state
            .var("focus_device")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        let args = json!({"device": device});
        match ctx
            .dispatch_tool("micro_read", &self.tool, args, vec![device.clone()])
            .await?
        {
            Dispatch::Completed(records) => {
                state.tool_results.insert("micro".into(), records);
            }
            Dispatch::Rejected { reason } => {
                warn!(%reason, "targeted read rejected; summarizing without it");
            }
            Dispatch::NeedsApproval(plan) => return Ok(NodeTransition::Interrupt(plan)),
            Dispatch::PlanModified { .. } => {
                return Err(olav_core::EngineError::internal(
                    "plan modification outside deep-dive",
                ))
            }
        }
        Ok(NodeTransition::Goto("summarize".into()))
    }
}

struct SummarizeNode;

#[async_trait]
impl WorkflowNode for SummarizeNode {
    async fn run(&self, ctx: &NodeContext, state: &mut RunState) -> Result<NodeTransition> {
        if state.status == RunStatus::Rejected {
            let note = state
                .outcome
                .clone()
                .unwrap_or_else(|| "rejected".to_string());
            say(ctx, state, format!("operation rejected by approver: {}", note)).await?;
            return Ok(NodeTransition::Halt);
        }

        let macro_text = state
            .tool_results
            .get("macro")
            .map(render_records)
            .unwrap_or_else(|| "(none)".to_string());
        let micro_text = state
            .tool_results
            .get("micro")
            .map(render_records)
            .unwrap_or_else(|| "(none)".to_string());

        let prompt = SUMMARY_PROMPT
            .replace("{query}", &query_text(state))
            .replace("{macro}", &macro_text)
            .replace("{micro}", &micro_text);

        let summary = stream_chat(ctx, prompt_request(state, prompt)).await?;
        say(ctx, state, summary).await?;
        state.outcome = Some("diagnostic complete".to_string());
        Ok(NodeTransition::Halt)
    }
}

/// Build the query workflow graph
pub fn workflow(config: QueryWorkflowConfig) -> WorkflowGraph {
    WorkflowGraph::new("query", "macro_read")
        .with_node(
            "macro_read",
            Arc::new(MacroReadNode {
                tool: config.macro_tool.clone(),
            }),
        )
        .with_node("assess", Arc::new(AssessNode))
        .with_node(
            "micro_read",
            Arc::new(MicroReadNode {
                tool: config.micro_tool,
            }),
        )
        .with_node("summarize", Arc::new(SummarizeNode))
}

/// The registered descriptor for this workflow
pub fn descriptor(config: QueryWorkflowConfig) -> WorkflowDescriptor {
    WorkflowDescriptor::new(
        "Diagnose and report on network state using read-only telemetry",
        workflow(config),
    )
    .with_examples(vec![
        "Show R1 interface status",
        "Why is BGP down between R2 and R3",
        "Which devices have interface errors",
        "What is the OSPF adjacency state on the core routers",
    ])
    .with_keywords(vec!["show", "why", "status", "state"])
    .with_preferred_mode(Mode::Standard)
}
