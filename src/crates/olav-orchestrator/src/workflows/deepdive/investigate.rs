//! Schema feasibility investigation.
//!
//! For each pending todo the planner queries the capability index — the
//! only sanctioned oracle for "this data is reachable" — and classifies:
//!
//! - `feasible`: a strong field-level match exists and the todo's tool
//!   bindings resolve against the registry.
//! - `uncertain`: the table matches but no specific field is confirmed,
//!   or the best match is only semantically close. A human-readable
//!   suggestion is attached.
//! - `infeasible`: nothing indexed matches. A rationale is attached.
//!
//! No todo is executed here; the aggregated classification becomes the
//! execution plan shown to the approver.

use async_trait::async_trait;
use tracing::debug;

use olav_core::{
    CapabilityHit, NodeContext, NodeTransition, Result, RunState, TodoStatus, WorkflowNode,
};

use crate::workflows::think;

/// Score at or above which a match is considered confirmed
const STRONG_MATCH: f32 = 0.45;

/// Score below which nothing relevant is considered indexed
const WEAK_MATCH: f32 = 0.35;

pub(crate) struct InvestigateNode;

#[async_trait]
impl WorkflowNode for InvestigateNode {
    async fn run(&self, ctx: &NodeContext, state: &mut RunState) -> Result<NodeTransition> {
        let plan = state
            .plan
            .as_mut()
            .ok_or_else(|| olav_core::EngineError::internal("investigate without a plan"))?;

        let mut notes = Vec::new();
        for todo in plan.todos.iter_mut() {
            if todo.status != TodoStatus::Pending {
                continue;
            }

            let hits = ctx.capabilities.search_schema(&todo.description, 5);
            let classification = classify(&hits);

            match classification {
                Classification::Feasible { tool, table, field } => {
                    // Bindings must resolve: every declared tool, or the
                    // index-assigned one, has to exist in the registry.
                    if todo.tools.is_empty() {
                        todo.tools.push(tool.clone());
                    }
                    if let Some(missing) =
                        todo.tools.iter().find(|t| ctx.tools.get(t).is_err())
                    {
                        let reason = format!("tool binding does not resolve: {}", missing);
                        notes.push(format!("{}: infeasible ({})", todo.id, reason));
                        todo.skip(TodoStatus::Infeasible, reason)?;
                        continue;
                    }
                    notes.push(format!("{}: feasible ({}.{})", todo.id, table, field));
                    todo.transition(TodoStatus::Feasible)?;
                }
                Classification::Uncertain { suggestion } => {
                    notes.push(format!("{}: uncertain ({})", todo.id, suggestion));
                    todo.skip(TodoStatus::Uncertain, suggestion)?;
                }
                Classification::Infeasible { rationale } => {
                    notes.push(format!("{}: infeasible ({})", todo.id, rationale));
                    todo.skip(TodoStatus::Infeasible, rationale)?;
                }
            }
        }

        debug!(?notes, "feasibility investigation complete");
        think(ctx, "investigate", notes.join("; ")).await?;
        Ok(NodeTransition::Goto("approve".into()))
    }
}

enum Classification {
    Feasible {
        tool: String,
        table: String,
        field: String,
    },
    Uncertain {
        suggestion: String,
    },
    Infeasible {
        rationale: String,
    },
}

fn classify(hits: &[CapabilityHit]) -> Classification {
    let Some(best) = hits.first() else {
        return Classification::Infeasible {
            rationale: "no matching capability indexed; suggest live device read".to_string(),
        };
    };

    if best.score < WEAK_MATCH {
        return Classification::Infeasible {
            rationale: "no matching capability indexed; suggest live device read".to_string(),
        };
    }

    if best.score < STRONG_MATCH {
        return Classification::Uncertain {
            suggestion: format!(
                "closest match is `{}`{}; confirm the field or rephrase",
                best.table,
                best.field
                    .as_deref()
                    .map(|f| format!(".{}", f))
                    .unwrap_or_default()
            ),
        };
    }

    // Strong match: prefer a confirmed field, fall back to any strong
    // field-level hit on the same table.
    let field_hit = if best.field.is_some() {
        Some(best)
    } else {
        hits.iter()
            .find(|h| h.table == best.table && h.field.is_some() && h.score >= WEAK_MATCH)
    };

    match field_hit {
        Some(hit) => Classification::Feasible {
            tool: hit.tool.clone(),
            table: hit.table.clone(),
            field: hit.field.clone().unwrap_or_default(),
        },
        None => Classification::Uncertain {
            suggestion: format!("use `{}` table or specify a field", best.table),
        },
    }
}
