//! The device change workflow.
//!
//! Plan the change, propose the commands, dispatch the write tool through
//! the approval gate, verify via a read tool, and roll back (gated again)
//! when verification fails. Rejection short-circuits to the summary with
//! a rejected outcome.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use olav_core::{
    Dispatch, EngineError, Mode, NodeContext, NodeTransition, Result, RunState, RunStatus,
    WorkflowGraph, WorkflowNode,
};

use super::{prompt_request, query_text, render_records, say, think, WorkflowDescriptor};

const PROPOSAL_PROMPT: &str = r#"You are planning a network device change for this request:
{query}

Respond with JSON only:
{"device": "<device name>", "commands": ["<cli command>", ...], "rollback_commands": ["<cli command>", ...]}"#;

const VERIFY_PROMPT: &str = r#"A change was applied to {device}:
{commands}

Post-change device state:
{records}

Did the change take effect as intended? Respond with JSON only:
{"verified": true | false, "note": "<short explanation>"}"#;

/// Tool bindings for the execute workflow
#[derive(Debug, Clone)]
pub struct ExecuteWorkflowConfig {
    /// Write-class device configuration tool
    pub write_tool: String,

    /// Read-class verification tool
    pub verify_tool: String,
}

impl Default for ExecuteWorkflowConfig {
    fn default() -> Self {
        Self {
            write_tool: "device.configure".to_string(),
            verify_tool: "device.show".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Proposal {
    device: String,
    commands: Vec<String>,
    #[serde(default)]
    rollback_commands: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct Verification {
    verified: bool,
    #[serde(default)]
    note: String,
}

struct PlanNode;

#[async_trait]
impl WorkflowNode for PlanNode {
    async fn run(&self, ctx: &NodeContext, state: &mut RunState) -> Result<NodeTransition> {
        think(ctx, "plan", "planning the requested change").await?;

        let prompt = PROPOSAL_PROMPT.replace("{query}", &query_text(state));
        let schema = json!({
            "type": "object",
            "properties": {
                "device": {"type": "string"},
                "commands": {"type": "array", "items": {"type": "string"}},
                "rollback_commands": {"type": "array", "items": {"type": "string"}}
            },
            "required": ["device", "commands"]
        });

        let value = ctx
            .chat
            .structured(prompt_request(state, prompt), &schema)
            .await?;
        let proposal: Proposal = serde_json::from_value(value).map_err(|e| {
            EngineError::contract("execute.plan", format!("malformed proposal: {}", e))
        })?;

        state.set_var("proposal", serde_json::to_value(&proposal)?);
        Ok(NodeTransition::Goto("propose".into()))
    }
}

struct ProposeNode;

#[async_trait]
impl WorkflowNode for ProposeNode {
    async fn run(&self, ctx: &NodeContext, state: &mut RunState) -> Result<NodeTransition> {
        let proposal = proposal_from(state)?;
        say(
            ctx,
            state,
            format!(
                "Proposed change for {}:\n{}",
                proposal.device,
                proposal.commands.join("\n")
            ),
        )
        .await?;
        Ok(NodeTransition::Goto("apply".into()))
    }
}

struct ApplyNode {
    tool: String,
}

#[async_trait]
impl WorkflowNode for ApplyNode {
    async fn run(&self, ctx: &NodeContext, state: &mut RunState) -> Result<NodeTransition> {
        let proposal = proposal_from(state)?;
        let args = json!({
            "device": proposal.device,
            "commands": proposal.commands,
        });

        match ctx
            .dispatch_tool("apply", &self.tool, args, vec![proposal.device.clone()])
            .await?
        {
            Dispatch::Completed(records) => {
                state.tool_results.insert("apply".into(), records);
                Ok(NodeTransition::Goto("verify".into()))
            }
            Dispatch::NeedsApproval(plan) => Ok(NodeTransition::Interrupt(plan)),
            Dispatch::Rejected { reason } => {
                state.status = RunStatus::Rejected;
                state.outcome = Some(reason);
                Ok(NodeTransition::Goto("summarize".into()))
            }
            Dispatch::PlanModified { .. } => Err(EngineError::internal(
                "plan modification outside deep-dive",
            )),
        }
    }
}

struct VerifyNode {
    tool: String,
}

#[async_trait]
impl WorkflowNode for VerifyNode {
    async fn run(&self, ctx: &NodeContext, state: &mut RunState) -> Result<NodeTransition> {
        let proposal = proposal_from(state)?;

        let records = match ctx
            .dispatch_tool(
                "verify",
                &self.tool,
                json!({"device": proposal.device}),
                vec![proposal.device.clone()],
            )
            .await?
        {
            Dispatch::Completed(records) => records,
            Dispatch::NeedsApproval(plan) => return Ok(NodeTransition::Interrupt(plan)),
            Dispatch::Rejected { reason } => {
                warn!(%reason, "verification read rejected; treating as unverified");
                state.set_var("verify_note", json!(reason));
                return Ok(NodeTransition::Goto("rollback".into()));
            }
            Dispatch::PlanModified { .. } => {
                return Err(EngineError::internal("plan modification outside deep-dive"))
            }
        };
        state.tool_results.insert("verify".into(), records.clone());

        let prompt = VERIFY_PROMPT
            .replace("{device}", &proposal.device)
            .replace("{commands}", &proposal.commands.join("\n"))
            .replace("{records}", &render_records(&records));
        let schema = json!({
            "type": "object",
            "properties": {
                "verified": {"type": "boolean"},
                "note": {"type": "string"}
            },
            "required": ["verified"]
        });

        let verdict: Verification = match ctx
            .chat
            .structured(prompt_request(state, prompt), &schema)
            .await
            .and_then(|v| {
                serde_json::from_value(v)
                    .map_err(|e| EngineError::contract("execute.verify", e.to_string()))
            }) {
            Ok(verdict) => verdict,
            Err(err) => {
                // Degraded verification: presence of post-change data.
                warn!(error = %err, "verification LLM unavailable; using record presence");
                Verification {
                    verified: !records.is_empty(),
                    note: "verified by record presence only".to_string(),
                }
            }
        };

        think(
            ctx,
            "verify",
            format!("verified={} {}", verdict.verified, verdict.note),
        )
        .await?;

        if verdict.verified {
            state.set_var("verified", json!(true));
            Ok(NodeTransition::Goto("summarize".into()))
        } else {
            state.set_var("verify_note", json!(verdict.note));
            Ok(NodeTransition::Goto("rollback".into()))
        }
    }
}

struct RollbackNode {
    tool: String,
}

#[async_trait]
impl WorkflowNode for RollbackNode {
    async fn run(&self, ctx: &NodeContext, state: &mut RunState) -> Result<NodeTransition> {
        let proposal = proposal_from(state)?;
        if proposal.rollback_commands.is_empty() {
            state.set_var("rollback_note", json!("no rollback commands planned"));
            return Ok(NodeTransition::Goto("summarize".into()));
        }

        let args = json!({
            "device": proposal.device,
            "commands": proposal.rollback_commands,
        });
        match ctx
            .dispatch_tool("rollback", &self.tool, args, vec![proposal.device.clone()])
            .await?
        {
            Dispatch::Completed(_) => {
                state.set_var("rolled_back", json!(true));
                Ok(NodeTransition::Goto("summarize".into()))
            }
            Dispatch::NeedsApproval(plan) => Ok(NodeTransition::Interrupt(plan)),
            Dispatch::Rejected { reason } => {
                state.set_var("rollback_note", json!(format!("rollback rejected: {}", reason)));
                Ok(NodeTransition::Goto("summarize".into()))
            }
            Dispatch::PlanModified { .. } => Err(EngineError::internal(
                "plan modification outside deep-dive",
            )),
        }
    }
}

struct SummarizeNode;

#[async_trait]
impl WorkflowNode for SummarizeNode {
    async fn run(&self, ctx: &NodeContext, state: &mut RunState) -> Result<NodeTransition> {
        if state.status == RunStatus::Rejected {
            say(ctx, state, "operation rejected by approver").await?;
            return Ok(NodeTransition::Halt);
        }

        let proposal = proposal_from(state)?;
        let message = if state.var("verified").is_some() {
            format!("Change applied to {} and verified.", proposal.device)
        } else if state.var("rolled_back").is_some() {
            format!(
                "Change to {} did not verify and was rolled back ({}).",
                proposal.device,
                state
                    .var("verify_note")
                    .and_then(|v| v.as_str())
                    .unwrap_or("no detail")
            )
        } else {
            format!(
                "Change to {} is in an indeterminate state: {}.",
                proposal.device,
                state
                    .var("rollback_note")
                    .and_then(|v| v.as_str())
                    .unwrap_or("verification failed and no rollback ran")
            )
        };

        say(ctx, state, message).await?;
        state.outcome.get_or_insert_with(|| "change complete".to_string());
        Ok(NodeTransition::Halt)
    }
}

fn proposal_from(state: &RunState) -> Result<Proposal> {
    let value = state
        .var("proposal")
        .cloned()
        .ok_or_else(|| EngineError::internal("proposal missing from state"))?;
    Ok(serde_json::from_value(value)?)
}

/// Build the execute workflow graph
pub fn workflow(config: ExecuteWorkflowConfig) -> WorkflowGraph {
    WorkflowGraph::new("execute", "plan")
        .with_node("plan", Arc::new(PlanNode))
        .with_node("propose", Arc::new(ProposeNode))
        .with_node(
            "apply",
            Arc::new(ApplyNode {
                tool: config.write_tool.clone(),
            }),
        )
        .with_node(
            "verify",
            Arc::new(VerifyNode {
                tool: config.verify_tool,
            }),
        )
        .with_node(
            "rollback",
            Arc::new(RollbackNode {
                tool: config.write_tool,
            }),
        )
        .with_node("summarize", Arc::new(SummarizeNode))
}

/// The registered descriptor for this workflow
pub fn descriptor(config: ExecuteWorkflowConfig) -> WorkflowDescriptor {
    WorkflowDescriptor::new(
        "Apply a configuration change to a network device with verification",
        workflow(config),
    )
    .with_examples(vec![
        "Shutdown interface Gi0/1 on R1",
        "Set MTU on R1 Gi0/1 to 9000",
        "Add a description to the uplink port on SW2",
        "Change the OSPF cost on the core link",
    ])
    .with_keywords(vec!["set", "change", "configure", "shutdown", "apply"])
    .with_preferred_mode(Mode::Standard)
}
