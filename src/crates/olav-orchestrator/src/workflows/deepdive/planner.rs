//! Deep-dive task planning.
//!
//! The LLM decomposes the query into todos with declared dependencies,
//! given a compact catalog of the registered tools. Dependencies must
//! form a DAG; a cycle triggers one replan with the validation error fed
//! back, then a planner-class failure. Recursive descent re-enters this
//! node with parent todos to expand into child investigations.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use olav_core::llm::ChatRequest;
use olav_core::{
    EngineError, Message, NodeContext, NodeTransition, Plan, Result, RunState, Todo, ToolFilter,
    WorkflowNode,
};

use crate::workflows::{query_text, think};

const PLAN_PROMPT: &str = r#"You are planning a network investigation.

Query: {query}
{instruction}
Available tools:
{catalog}

Break the investigation into small, independent todos. Declare a dependency
only when one todo needs another's output. Respond with JSON only:
{"todos": [{"id": "t1", "description": "...", "tools": ["<tool name>"], "depends_on": []}, ...]}"#;

#[derive(Debug, Deserialize)]
struct PlannedTodo {
    id: String,
    description: String,
    #[serde(default)]
    tools: Vec<String>,
    #[serde(default)]
    depends_on: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct PlannedTodos {
    todos: Vec<PlannedTodo>,
}

pub(crate) struct PlanNode {
    pub replan_limit: u32,
}

#[async_trait]
impl WorkflowNode for PlanNode {
    async fn run(&self, ctx: &NodeContext, state: &mut RunState) -> Result<NodeTransition> {
        // Recursive descent: expand failed parents into child todos
        // instead of consulting the planner again.
        if let Some(parents) = state.take_var("descend_parents") {
            self.spawn_children(state, &parents)?;
            return Ok(NodeTransition::Goto("investigate".into()));
        }

        let instruction = state
            .take_var("replan_instruction")
            .and_then(|v| v.as_str().map(String::from))
            .map(|text| format!("Additional instruction from the approver: {}\n", text))
            .unwrap_or_default();

        let catalog: String = ctx
            .tools
            .list(ToolFilter::default())
            .iter()
            .map(|d| format!("- {}: {}\n", d.name, d.purpose))
            .collect();

        let prior_depth = state.plan.as_ref().map(|p| p.recursion_depth).unwrap_or(0);

        let mut feedback = String::new();
        let mut attempts = 0u32;
        loop {
            let plan = self
                .plan_once(ctx, state, &catalog, &instruction, &feedback)
                .await?;
            match plan.validate_dag() {
                Ok(()) => {
                    think(
                        ctx,
                        "plan",
                        format!("planned {} todos", plan.todos.len()),
                    )
                    .await?;
                    info!(todos = plan.todos.len(), "deep-dive plan ready");
                    let mut plan = plan;
                    plan.recursion_depth = prior_depth;
                    state.plan = Some(plan);
                    return Ok(NodeTransition::Goto("investigate".into()));
                }
                Err(err) if attempts < self.replan_limit => {
                    warn!(error = %err, "plan rejected; replanning once");
                    feedback = format!(
                        "The previous plan was invalid ({}). Produce a corrected plan.",
                        err
                    );
                    attempts += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl PlanNode {
    async fn plan_once(
        &self,
        ctx: &NodeContext,
        state: &RunState,
        catalog: &str,
        instruction: &str,
        feedback: &str,
    ) -> Result<Plan> {
        let mut prompt = PLAN_PROMPT
            .replace("{query}", &query_text(state))
            .replace("{instruction}", instruction)
            .replace("{catalog}", catalog);
        if !feedback.is_empty() {
            prompt.push_str("\n\n");
            prompt.push_str(feedback);
        }

        let schema = json!({
            "type": "object",
            "properties": {
                "todos": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "id": {"type": "string"},
                            "description": {"type": "string"},
                            "tools": {"type": "array", "items": {"type": "string"}},
                            "depends_on": {"type": "array", "items": {"type": "string"}}
                        },
                        "required": ["id", "description"]
                    }
                }
            },
            "required": ["todos"]
        });

        let value = ctx
            .chat
            .structured(ChatRequest::new(vec![Message::user(prompt)]), &schema)
            .await?;
        let planned: PlannedTodos = serde_json::from_value(value)
            .map_err(|e| EngineError::planner(format!("malformed plan: {}", e)))?;

        let mut todos = Vec::with_capacity(planned.todos.len());
        for p in planned.todos {
            if todos.iter().any(|t: &Todo| t.id == p.id) {
                return Err(EngineError::planner(format!("duplicate todo id: {}", p.id)));
            }
            todos.push(
                Todo::new(p.id, p.description)
                    .with_tools(p.tools)
                    .with_depends_on(p.depends_on),
            );
        }
        Ok(Plan::from_todos(todos))
    }

    /// Append one child investigation per failed parent, scoped to the
    /// parent's tools and evidence
    fn spawn_children(&self, state: &mut RunState, parents: &serde_json::Value) -> Result<()> {
        let parent_ids: Vec<String> = serde_json::from_value(parents.clone())
            .map_err(|e| EngineError::internal(format!("bad descend_parents: {}", e)))?;

        let plan = state
            .plan
            .as_mut()
            .ok_or_else(|| EngineError::internal("descend without a plan"))?;
        plan.recursion_depth += 1;
        let depth = plan.recursion_depth;

        let mut children = Vec::new();
        for parent_id in &parent_ids {
            let Some(parent) = plan.todo(parent_id) else {
                continue;
            };
            children.push(
                Todo::new(
                    format!("{}.d{}", parent.id, depth),
                    format!("Analyze why \"{}\" failed", parent.description),
                )
                .with_tools(parent.tools.clone())
                .with_parent(parent.id.clone()),
            );
        }

        info!(
            children = children.len(),
            depth, "spawning child investigations"
        );
        plan.todos.extend(children);
        Ok(())
    }
}
