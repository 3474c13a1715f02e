//! Property-level invariants: batch independence, todo status machine,
//! checkpoint step uniqueness, and rerun determinism.

mod common;

use std::collections::HashSet;

use proptest::prelude::*;

use common::*;
use olav_checkpoint::AuditStore;
use olav_core::{Event, Plan, Todo, TodoStatus};
use olav_orchestrator::SubmitRequest;

/// Build a random DAG: each todo may depend only on earlier todos.
fn arb_dag() -> impl Strategy<Value = Vec<Vec<usize>>> {
    prop::collection::vec(prop::collection::vec(any::<prop::sample::Index>(), 0..4), 1..12)
        .prop_map(|raw| {
            raw.into_iter()
                .enumerate()
                .map(|(i, deps)| {
                    let mut resolved: Vec<usize> = deps
                        .into_iter()
                        .filter(|_| i > 0)
                        .map(|idx| idx.index(i.max(1)))
                        .collect();
                    resolved.sort_unstable();
                    resolved.dedup();
                    resolved
                })
                .collect()
        })
}

fn plan_from_dag(dag: &[Vec<usize>]) -> Plan {
    let todos = dag
        .iter()
        .enumerate()
        .map(|(i, deps)| {
            Todo::new(
                format!("t{}", i),
                format!("step {}", i),
            )
            .with_depends_on(deps.iter().map(|d| format!("t{}", d)).collect())
        })
        .collect();
    Plan::from_todos(todos)
}

/// Transitive dependency closure of one todo id
fn transitive_deps(plan: &Plan, id: &str) -> HashSet<String> {
    let mut seen = HashSet::new();
    let mut stack = vec![id.to_string()];
    while let Some(current) = stack.pop() {
        if let Some(todo) = plan.todo(&current) {
            for dep in &todo.depends_on {
                if seen.insert(dep.clone()) {
                    stack.push(dep.clone());
                }
            }
        }
    }
    seen
}

proptest! {
    /// No two todos in the same batch depend on each other, transitively,
    /// and every runnable todo appears in exactly one batch.
    #[test]
    fn batches_never_violate_dependencies(dag in arb_dag()) {
        let plan = plan_from_dag(&dag);
        plan.validate_dag().expect("construction is acyclic");

        let runnable: Vec<String> = plan.todos.iter().map(|t| t.id.clone()).collect();
        let layers = plan.batches(&runnable);

        let mut seen = HashSet::new();
        for layer in &layers {
            for id in layer {
                prop_assert!(seen.insert(id.clone()), "todo scheduled twice: {}", id);
                let deps = transitive_deps(&plan, id);
                for other in layer {
                    if other != id {
                        prop_assert!(
                            !deps.contains(other),
                            "{} and {} share a batch but are dependent",
                            id,
                            other
                        );
                    }
                }
                // Everything a todo depends on ran in an earlier layer.
                for dep in &plan.todo(id).unwrap().depends_on {
                    prop_assert!(
                        seen.contains(dep),
                        "{} scheduled before its dependency {}",
                        id,
                        dep
                    );
                }
            }
        }
        prop_assert_eq!(seen.len(), runnable.len());
    }

    /// Step indexes are strictly monotonic per thread: any non-advancing
    /// put is rejected.
    #[test]
    fn checkpoint_steps_unique(steps in prop::collection::vec(0u64..32, 1..24)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            use olav_checkpoint::{Checkpoint, CheckpointStore, InMemoryCheckpointStore};

            let store = InMemoryCheckpointStore::new();
            let mut highest: Option<u64> = None;
            for step in steps {
                let result = store
                    .put(Checkpoint::new("t", step, "n", serde_json::json!({})))
                    .await;
                match highest {
                    Some(h) if step <= h => assert!(result.is_err()),
                    _ => {
                        assert!(result.is_ok());
                        highest = Some(step);
                    }
                }
            }

            let history = store.history("t").await.unwrap();
            let ids: Vec<u64> = history.iter().map(|c| c.step).collect();
            let unique: HashSet<u64> = ids.iter().copied().collect();
            assert_eq!(unique.len(), ids.len(), "duplicate step persisted");
            let mut sorted = ids.clone();
            sorted.sort_unstable();
            assert_eq!(ids, sorted, "steps out of order");
        });
    }
}

/// Exhaustive check of the todo status machine: exactly the documented
/// transitions are legal.
#[test]
fn todo_status_machine_is_closed() {
    use TodoStatus::*;
    let all = [Pending, Feasible, Uncertain, Infeasible, Running, Done, Failed];
    let legal = [
        (Pending, Feasible),
        (Pending, Uncertain),
        (Pending, Infeasible),
        (Feasible, Running),
        (Running, Done),
        (Running, Failed),
    ];

    for from in all {
        for to in all {
            let expected = legal.contains(&(from, to));
            assert_eq!(
                from.can_transition(to),
                expected,
                "transition {:?} -> {:?}",
                from,
                to
            );
        }
    }

    for status in [Uncertain, Infeasible, Done, Failed] {
        assert!(status.is_terminal());
    }
}

/// Re-running the same pure-read workflow with the same scripted model
/// and snapshot tool layer yields the same messages modulo timestamps.
#[tokio::test]
async fn rerun_determinism_for_pure_read_workflow() {
    let run = || async {
        let h = harness(vec![
            r#"{"workflow_name": "query", "confidence": 0.9}"#,
            r#"{"severity": "low", "focus_device": "R1", "needs_micro": true}"#,
            "R1 interface status: Gi0/1 is up with MTU 1500.",
        ]);
        let stream = h
            .olav
            .submit(SubmitRequest::query("Show R1 interface status").with_thread("det"))
            .await
            .unwrap();
        collect_events(stream).await
    };

    let a = run().await;
    let b = run().await;

    let digest = |events: &[Event]| -> Vec<String> {
        events
            .iter()
            .map(|e| match e {
                Event::Message { role, content } => format!("msg:{}:{}", role, content),
                Event::Thinking { step, .. } => format!("think:{}", step),
                Event::ToolStart { name, args, .. } => format!("start:{}:{}", name, args),
                Event::ToolEnd { success, .. } => format!("end:{}", success),
                Event::Interrupt { .. } => "interrupt".to_string(),
                Event::Done { final_state } => {
                    format!("done:{}", final_state["status"])
                }
                Event::Error { code, .. } => format!("error:{}", code),
                Event::Token { delta } => format!("token:{}", delta),
            })
            .collect()
    };

    assert_eq!(digest(&a), digest(&b));
}

/// Audit entries are never mutated: the trail only ever grows, and prior
/// entries remain byte-identical.
#[tokio::test]
async fn audit_is_append_only() {
    let h = harness(vec![
        r#"{"workflow_name": "execute", "confidence": 0.9}"#,
        r#"{"device": "R1", "commands": ["interface Gi0/1", "shutdown"], "rollback_commands": []}"#,
    ]);

    let stream = h
        .olav
        .submit(SubmitRequest::query("Shutdown interface Gi0/1 on R1").with_thread("audit"))
        .await
        .unwrap();
    collect_events(stream).await;

    let before = h.audit.for_thread("audit").await.unwrap();
    let snapshot: Vec<String> = before
        .iter()
        .map(|e| serde_json::to_string(e).unwrap())
        .collect();

    let stream = h
        .olav
        .resume(
            "audit",
            olav_core::Decision::Reject { reason: None },
            "tester",
        )
        .await
        .unwrap();
    collect_events(stream).await;

    let after = h.audit.for_thread("audit").await.unwrap();
    assert!(after.len() > before.len());
    for (i, original) in snapshot.iter().enumerate() {
        assert_eq!(&serde_json::to_string(&after[i]).unwrap(), original);
    }
}
