//! Final deep-dive report.
//!
//! The report is rendered strictly over durable evidence: every todo's
//! status, reason, and captured records. Remaining uncertain/infeasible
//! items are enumerated with their rationale, and next steps proposed.
//! When the LLM is unavailable the deterministic digest itself is the
//! report — nothing is speculated either way.

use async_trait::async_trait;
use tracing::warn;

use olav_core::{
    EngineError, NodeContext, NodeTransition, Result, RunState, TodoStatus, WorkflowNode,
};

use crate::workflows::{prompt_request, query_text, render_records, say, stream_chat};

const SUMMARY_PROMPT: &str = r#"Write a findings report for this investigation. Use ONLY the evidence digest below; do not invent data. List unverified items and suggest concrete next steps.

Query: {query}

Evidence digest:
{digest}"#;

pub(crate) struct SummaryNode;

#[async_trait]
impl WorkflowNode for SummaryNode {
    async fn run(&self, ctx: &NodeContext, state: &mut RunState) -> Result<NodeTransition> {
        let digest = {
            let plan = state
                .plan
                .as_ref()
                .ok_or_else(|| EngineError::internal("summarize without a plan"))?;

            let mut digest = String::new();
            for todo in &plan.todos {
                digest.push_str(&format!("[{}] {} — {}\n", todo.status, todo.id, todo.description));
                if let Some(reason) = &todo.reason {
                    digest.push_str(&format!("    note: {}\n", reason));
                }
                for evidence in &todo.evidence {
                    digest.push_str(&format!(
                        "    evidence from {} ({} rows):\n{}\n",
                        evidence.tool,
                        evidence.records.len(),
                        indent(&render_records(&evidence.records))
                    ));
                }
            }

            let unverified: Vec<String> = plan
                .todos
                .iter()
                .filter(|t| {
                    matches!(t.status, TodoStatus::Uncertain | TodoStatus::Infeasible)
                })
                .map(|t| {
                    format!(
                        "{} ({})",
                        t.description,
                        t.reason.as_deref().unwrap_or("skipped")
                    )
                })
                .collect();
            if !unverified.is_empty() {
                digest.push_str("\nUnverified items:\n");
                for item in &unverified {
                    digest.push_str(&format!("- {}\n", item));
                }
            }
            digest
        };

        let prompt = SUMMARY_PROMPT
            .replace("{query}", &query_text(state))
            .replace("{digest}", &digest);

        let report = match stream_chat(ctx, prompt_request(state, prompt)).await {
            Ok(report) if !report.trim().is_empty() => report,
            Ok(_) | Err(_) => {
                warn!("summary LLM unavailable; emitting evidence digest");
                format!("Investigation results:\n{}", digest)
            }
        };

        say(ctx, state, report).await?;
        state
            .outcome
            .get_or_insert_with(|| "investigation complete".to_string());
        Ok(NodeTransition::Halt)
    }
}

fn indent(text: &str) -> String {
    text.lines()
        .map(|line| format!("      {}", line))
        .collect::<Vec<_>>()
        .join("\n")
}
