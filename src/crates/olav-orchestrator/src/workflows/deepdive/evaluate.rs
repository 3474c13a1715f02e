//! Todo result evaluation.
//!
//! A todo passes when its execution succeeded, returned data, and the
//! returned fields are relevant to the todo's described intent. The
//! relevance check is schema-aware and generic — token overlap between
//! the description and the returned columns — with no per-protocol rules.
//! An audit-style todo (verify/check/ensure wording) that returns no
//! data fails; a plain query todo with no data passes with a note.

use olav_core::{RecordSet, Todo};

/// Verdict for one executed todo
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Verdict {
    Passed { note: Option<String> },
    Failed { reason: String },
}

/// Words marking a todo as an assertion about state rather than a lookup
const AUDIT_MARKERS: &[&str] = &["audit", "verify", "validate", "check", "ensure", "confirm"];

pub(crate) struct Evaluator;

impl Evaluator {
    pub fn evaluate(todo: &Todo, records: &RecordSet) -> Verdict {
        let is_audit = {
            let description = todo.description.to_ascii_lowercase();
            AUDIT_MARKERS.iter().any(|m| description.contains(m))
        };

        if records.is_empty() {
            return if is_audit {
                Verdict::Failed {
                    reason: "audit returned no data".to_string(),
                }
            } else {
                Verdict::Passed {
                    note: Some("no data returned".to_string()),
                }
            };
        }

        if Self::fields_relevant(&todo.description, &records.columns) {
            Verdict::Passed { note: None }
        } else {
            Verdict::Failed {
                reason: format!(
                    "returned fields [{}] are not relevant to the task",
                    records.columns.join(", ")
                ),
            }
        }
    }

    /// Generic token overlap between intent and returned columns
    fn fields_relevant(description: &str, columns: &[String]) -> bool {
        let intent_tokens: Vec<String> = tokenize(description);
        if intent_tokens.is_empty() || columns.is_empty() {
            return true;
        }

        columns.iter().any(|column| {
            tokenize(column).iter().any(|col_token| {
                intent_tokens
                    .iter()
                    .any(|it| it == col_token || it.contains(col_token.as_str()) || col_token.contains(it.as_str()))
            })
        })
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| t.len() > 2)
        .map(|t| t.trim_end_matches('s').to_ascii_lowercase())
        .collect()
}
