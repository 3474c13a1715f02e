//! Deep-dive plan model: todos, dependencies, and status machine.
//!
//! A [`Plan`] is an ordered list of [`Todo`]s whose declared dependencies
//! must form a DAG. Feasibility investigation moves todos from `pending`
//! to `feasible`/`uncertain`/`infeasible`; execution moves `feasible`
//! through `running` to `done` or `failed`. `uncertain` and `infeasible`
//! are terminal (skipped with a recorded reason). Execution batches are
//! topological layers, so two todos dispatched in the same batch never
//! depend on each other, transitively.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};

use crate::error::{EngineError, Result};
use crate::tool::RecordSet;

/// Lifecycle state of a todo
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TodoStatus {
    /// Planned, not yet investigated
    Pending,
    /// Capability index confirms the required data is reachable
    Feasible,
    /// Tables match but specific fields are unconfirmed; skipped
    Uncertain,
    /// No indexed capability matches; skipped
    Infeasible,
    /// Dispatched
    Running,
    /// Completed and evaluated as passed
    Done,
    /// Completed and evaluated as failed, or errored
    Failed,
}

impl TodoStatus {
    /// Whether the status admits no further transition
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TodoStatus::Uncertain | TodoStatus::Infeasible | TodoStatus::Done | TodoStatus::Failed
        )
    }

    /// Legal transition check
    pub fn can_transition(self, next: TodoStatus) -> bool {
        use TodoStatus::*;
        matches!(
            (self, next),
            (Pending, Feasible)
                | (Pending, Uncertain)
                | (Pending, Infeasible)
                | (Feasible, Running)
                | (Running, Done)
                | (Running, Failed)
        )
    }
}

impl std::fmt::Display for TodoStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TodoStatus::Pending => "pending",
            TodoStatus::Feasible => "feasible",
            TodoStatus::Uncertain => "uncertain",
            TodoStatus::Infeasible => "infeasible",
            TodoStatus::Running => "running",
            TodoStatus::Done => "done",
            TodoStatus::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// Captured tool output backing a todo's verdict
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    /// Tool that produced the records
    pub tool: String,

    /// The records themselves
    pub records: RecordSet,

    /// When the evidence was captured
    pub collected_at: DateTime<Utc>,
}

impl Evidence {
    pub fn new(tool: impl Into<String>, records: RecordSet) -> Self {
        Self {
            tool: tool.into(),
            records,
            collected_at: Utc::now(),
        }
    }
}

/// One unit of work inside a deep-dive plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Todo {
    /// Stable id within the plan
    pub id: String,

    /// What the todo should find out or do
    pub description: String,

    /// Tools the todo targets
    #[serde(default)]
    pub tools: Vec<String>,

    /// Ids of todos that must complete first
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Current lifecycle state
    pub status: TodoStatus,

    /// Captured tool outputs
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evidence: Vec<Evidence>,

    /// Rationale or suggestion when uncertain/infeasible/failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Parent todo, for children spawned by recursive descent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

impl Todo {
    /// A pending todo
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            tools: Vec::new(),
            depends_on: Vec::new(),
            status: TodoStatus::Pending,
            evidence: Vec::new(),
            reason: None,
            parent_id: None,
        }
    }

    pub fn with_tools(mut self, tools: Vec<String>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_depends_on(mut self, depends_on: Vec<String>) -> Self {
        self.depends_on = depends_on;
        self
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    /// Transition to `next`, rejecting illegal moves
    pub fn transition(&mut self, next: TodoStatus) -> Result<()> {
        if !self.status.can_transition(next) {
            return Err(EngineError::internal(format!(
                "illegal todo transition {} -> {} for {}",
                self.status, next, self.id
            )));
        }
        self.status = next;
        Ok(())
    }

    /// Mark skipped with a reason (`uncertain` or `infeasible`)
    pub fn skip(&mut self, status: TodoStatus, reason: impl Into<String>) -> Result<()> {
        self.transition(status)?;
        self.reason = Some(reason.into());
        Ok(())
    }
}

/// Ordered set of todos with dependencies
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Plan {
    /// The todos, in planning order
    pub todos: Vec<Todo>,

    /// Depth of recursive descent that produced this plan's newest todos
    #[serde(default)]
    pub recursion_depth: u32,
}

impl Plan {
    /// An empty plan
    pub fn new() -> Self {
        Self::default()
    }

    /// A plan from todos
    pub fn from_todos(todos: Vec<Todo>) -> Self {
        Self {
            todos,
            recursion_depth: 0,
        }
    }

    /// Whether the plan holds no todos
    pub fn is_empty(&self) -> bool {
        self.todos.is_empty()
    }

    /// Find a todo by id
    pub fn todo(&self, id: &str) -> Option<&Todo> {
        self.todos.iter().find(|t| t.id == id)
    }

    /// Find a todo mutably by id
    pub fn todo_mut(&mut self, id: &str) -> Option<&mut Todo> {
        self.todos.iter_mut().find(|t| t.id == id)
    }

    /// Todos currently in a given status
    pub fn with_status(&self, status: TodoStatus) -> Vec<&Todo> {
        self.todos.iter().filter(|t| t.status == status).collect()
    }

    /// Validate that dependencies reference known todos and form a DAG
    pub fn validate_dag(&self) -> Result<()> {
        let ids: HashSet<&str> = self.todos.iter().map(|t| t.id.as_str()).collect();

        for todo in &self.todos {
            for dep in &todo.depends_on {
                if !ids.contains(dep.as_str()) {
                    return Err(EngineError::planner(format!(
                        "todo {} depends on unknown todo {}",
                        todo.id, dep
                    )));
                }
            }
        }

        // Kahn's algorithm; leftover nodes indicate a cycle.
        let mut in_degree: HashMap<&str, usize> = self
            .todos
            .iter()
            .map(|t| (t.id.as_str(), t.depends_on.len()))
            .collect();
        let mut queue: Vec<&str> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut visited = 0usize;

        while let Some(id) = queue.pop() {
            visited += 1;
            for todo in &self.todos {
                if todo.depends_on.iter().any(|d| d == id) {
                    let degree = in_degree.get_mut(todo.id.as_str()).expect("known id");
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push(todo.id.as_str());
                    }
                }
            }
        }

        if visited != self.todos.len() {
            let cyclic: Vec<&str> = in_degree
                .iter()
                .filter(|(_, d)| **d > 0)
                .map(|(id, _)| *id)
                .collect();
            return Err(EngineError::planner(format!(
                "dependency cycle among todos: {}",
                cyclic.join(", ")
            )));
        }
        Ok(())
    }

    /// Partition a set of runnable todo ids into dependency layers.
    ///
    /// Dependencies on todos outside the runnable set (skipped ones) are
    /// treated as satisfied. Within a layer no todo depends on another,
    /// transitively, so a layer may be dispatched in parallel.
    pub fn batches(&self, runnable: &[String]) -> Vec<Vec<String>> {
        let runnable_set: HashSet<&str> = runnable.iter().map(String::as_str).collect();
        let mut remaining: Vec<&Todo> = self
            .todos
            .iter()
            .filter(|t| runnable_set.contains(t.id.as_str()))
            .collect();
        let mut satisfied: HashSet<String> = HashSet::new();
        let mut layers = Vec::new();

        while !remaining.is_empty() {
            let (ready, blocked): (Vec<&Todo>, Vec<&Todo>) = remaining.into_iter().partition(|t| {
                t.depends_on
                    .iter()
                    .all(|d| satisfied.contains(d) || !runnable_set.contains(d.as_str()))
            });

            if ready.is_empty() {
                // Cycle among runnable todos; validate_dag should have
                // caught this, bail with a single layer of the remainder.
                layers.push(blocked.iter().map(|t| t.id.clone()).collect());
                break;
            }

            for todo in &ready {
                satisfied.insert(todo.id.clone());
            }
            layers.push(ready.iter().map(|t| t.id.clone()).collect());
            remaining = blocked;
        }

        layers
    }
}
