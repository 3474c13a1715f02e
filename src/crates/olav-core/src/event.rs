//! Typed events streamed from a running workflow to its subscriber.
//!
//! Events form an ordered, discriminated union serialized with a top-level
//! `type` field, which is the client wire format (transport frames them as
//! SSE or buffers them for the synchronous variant). Ordering is monotonic
//! within a single run; `done` or `error` is terminal. Only `token` and
//! `thinking` events may be coalesced under backpressure.

use serde::{Deserialize, Serialize};

use crate::messages::MessageRole;

/// An event emitted during a workflow run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Incremental LLM output
    Token {
        /// Text delta
        delta: String,
    },

    /// A complete message appended to the thread
    Message {
        /// Author role
        role: MessageRole,
        /// Message content
        content: String,
    },

    /// Intermediate reasoning surfaced to the client
    Thinking {
        /// Step label (e.g. the node name)
        step: String,
        /// Reasoning content
        content: String,
        /// Confidence in `[0, 1]`, when the producer has one
        #[serde(skip_serializing_if = "Option::is_none")]
        confidence: Option<f32>,
    },

    /// A tool invocation began
    ToolStart {
        /// Call id, matched by the `tool_end` with the same id
        id: String,
        /// Tool name
        name: String,
        /// Arguments passed
        args: serde_json::Value,
    },

    /// A tool invocation finished
    ToolEnd {
        /// Call id matching the `tool_start`
        id: String,
        /// Result payload on success
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<serde_json::Value>,
        /// Error message on failure
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        /// Wall-clock duration
        duration_ms: u64,
        /// Whether the call succeeded
        success: bool,
    },

    /// The run is suspended awaiting a human decision
    Interrupt {
        /// The plan presented for approval
        execution_plan: serde_json::Value,
    },

    /// Terminal: the run completed
    Done {
        /// Compact final state (status, outcome, workflow)
        final_state: serde_json::Value,
    },

    /// Terminal: the run failed
    Error {
        /// Stable error code
        code: String,
        /// Human-readable message (redacted for unprivileged callers)
        message: String,
    },
}

impl Event {
    /// Whether this event ends the stream
    pub fn is_terminal(&self) -> bool {
        matches!(self, Event::Done { .. } | Event::Error { .. })
    }

    /// Whether this event may be merged with a neighbor under backpressure
    pub fn is_coalescable(&self) -> bool {
        matches!(self, Event::Token { .. } | Event::Thinking { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_type_discriminator() {
        let event = Event::ToolStart {
            id: "call-1".into(),
            name: "suzieq.show".into(),
            args: json!({"table": "interfaces"}),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "tool_start");
        assert_eq!(value["name"], "suzieq.show");
    }

    #[test]
    fn test_terminal_events() {
        assert!(Event::Done {
            final_state: json!({})
        }
        .is_terminal());
        assert!(Event::Error {
            code: "internal".into(),
            message: "boom".into()
        }
        .is_terminal());
        assert!(!Event::Token { delta: "x".into() }.is_terminal());
    }

    #[test]
    fn test_coalescable_events() {
        assert!(Event::Token { delta: "a".into() }.is_coalescable());
        assert!(Event::Thinking {
            step: "plan".into(),
            content: "..".into(),
            confidence: None
        }
        .is_coalescable());
        assert!(!Event::Interrupt {
            execution_plan: json!({})
        }
        .is_coalescable());
        assert!(!Event::Message {
            role: MessageRole::Assistant,
            content: "hi".into()
        }
        .is_coalescable());
    }

    #[test]
    fn test_roundtrip() {
        let event = Event::Interrupt {
            execution_plan: json!({"tool": "device.configure", "risk": "high"}),
        };
        let text = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&text).unwrap();
        assert_eq!(back, event);
    }
}
