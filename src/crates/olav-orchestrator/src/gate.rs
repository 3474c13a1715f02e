//! HITL gate policy: risk classification, blacklist enforcement, audit.
//!
//! Every `write`-class dispatch — and any dispatch whose arguments match
//! the configured risk patterns, even on a nominally `read` tool — must
//! pass through this gate before the tool runs. Risk combines three
//! signals:
//!
//! 1. The tool's sensitivity flag.
//! 2. The argument pattern list (`reload|erase|shutdown|delete|commit` by
//!    default ⇒ high).
//! 3. Optional LLM field-level classification against the configured
//!    whitelist/graylist/blacklist. When the LLM is unavailable the gate
//!    falls back to the lexical field policy and biases toward high.
//!
//! A high-risk plan whose argument fields intersect the blacklist is
//! never dispatched, even with approval. Every review and every decision
//! is appended to the audit trail.

use std::sync::Arc;

use async_trait::async_trait;
use regex::RegexSet;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use olav_checkpoint::{AuditEntry, AuditStore};
use olav_core::llm::ChatRequest;
use olav_core::{
    ApprovalGate, ChatModel, Decision, DecisionRecord, EngineError, ExecutionPlan, GateContext,
    GateOutcome, GateReview, Message, RiskLevel, Sensitivity, ToolDescriptor,
};

use crate::config::GateConfig;
use crate::{OrchestratorError, Result};

/// Prompt for LLM field-level risk classification
const FIELD_RISK_PROMPT: &str = r#"You classify the risk of a proposed network operation.

Tool: {tool}
Argument fields: {fields}
Field policy:
- whitelist (benign): {whitelist}
- graylist (caution): {graylist}
- blacklist (forbidden): {blacklist}

Respond with JSON only: {"risk": "low" | "medium" | "high"}"#;

#[derive(Debug, Deserialize)]
struct RiskVerdict {
    risk: String,
}

/// The production [`ApprovalGate`] implementation
pub struct HitlGate {
    config: GateConfig,
    patterns: RegexSet,
    audit: Arc<dyn AuditStore>,
    chat: Option<Arc<dyn ChatModel>>,
}

impl HitlGate {
    /// Build the gate from policy config and an audit store
    pub fn new(config: GateConfig, audit: Arc<dyn AuditStore>) -> Result<Self> {
        let patterns = RegexSet::new(
            config
                .high_risk_patterns
                .iter()
                .map(|p| format!(r"(?i)\b{}\b", regex::escape(p))),
        )
        .map_err(|e| OrchestratorError::Config(format!("invalid risk pattern: {}", e)))?;

        Ok(Self {
            config,
            patterns,
            audit,
            chat: None,
        })
    }

    /// Enable LLM-backed field classification
    pub fn with_chat(mut self, chat: Arc<dyn ChatModel>) -> Self {
        self.chat = Some(chat);
        self
    }

    /// Argument field names, flattened one level
    fn arg_fields(args: &Value) -> Vec<String> {
        match args {
            Value::Object(map) => map.keys().cloned().collect(),
            _ => Vec::new(),
        }
    }

    /// Whether any argument text matches the high-risk pattern list
    fn matches_patterns(&self, args: &Value) -> bool {
        let rendered = args.to_string();
        self.patterns.is_match(&rendered)
    }

    /// Lexical field policy, used directly and as the LLM fallback.
    /// Unknown fields bias upward: anything not whitelisted is at least
    /// medium on a write tool.
    fn lexical_field_risk(&self, fields: &[String], sensitivity: Sensitivity) -> RiskLevel {
        if fields
            .iter()
            .any(|f| self.config.blacklist.iter().any(|b| b == f))
        {
            return RiskLevel::High;
        }
        if fields
            .iter()
            .any(|f| self.config.graylist.iter().any(|g| g == f))
        {
            return RiskLevel::Medium;
        }
        match sensitivity {
            Sensitivity::Write
                if fields
                    .iter()
                    .any(|f| !self.config.whitelist.iter().any(|w| w == f)) =>
            {
                RiskLevel::Medium
            }
            Sensitivity::Write => RiskLevel::Low,
            Sensitivity::Read => RiskLevel::Low,
        }
    }

    /// Classify the risk of one proposed dispatch
    async fn classify(&self, tool: &ToolDescriptor, args: &Value) -> RiskLevel {
        if self.matches_patterns(args) {
            return RiskLevel::High;
        }

        let fields = Self::arg_fields(args);

        if self.config.llm_classification {
            if let Some(chat) = &self.chat {
                match self.classify_with_llm(chat, &tool.name, &fields).await {
                    Ok(risk) => {
                        return risk.max(self.baseline(tool.sensitivity));
                    }
                    Err(err) => {
                        // Spec'd fallback: pattern list plus lexical field
                        // policy, biased toward high.
                        warn!(
                            tool = %tool.name,
                            error = %err,
                            "risk LLM unavailable; falling back biased high"
                        );
                        let lexical = self.lexical_field_risk(&fields, tool.sensitivity);
                        return lexical.max(RiskLevel::Medium).max(self.baseline(tool.sensitivity));
                    }
                }
            }
        }

        self.lexical_field_risk(&fields, tool.sensitivity)
            .max(self.baseline(tool.sensitivity))
    }

    fn baseline(&self, sensitivity: Sensitivity) -> RiskLevel {
        match sensitivity {
            Sensitivity::Write => RiskLevel::Medium,
            Sensitivity::Read => RiskLevel::Low,
        }
    }

    async fn classify_with_llm(
        &self,
        chat: &Arc<dyn ChatModel>,
        tool: &str,
        fields: &[String],
    ) -> olav_core::Result<RiskLevel> {
        let prompt = FIELD_RISK_PROMPT
            .replace("{tool}", tool)
            .replace("{fields}", &fields.join(", "))
            .replace("{whitelist}", &self.config.whitelist.join(", "))
            .replace("{graylist}", &self.config.graylist.join(", "))
            .replace("{blacklist}", &self.config.blacklist.join(", "));

        let schema = serde_json::json!({
            "type": "object",
            "properties": {"risk": {"type": "string"}},
            "required": ["risk"]
        });
        let value = chat
            .structured(ChatRequest::new(vec![Message::user(prompt)]), &schema)
            .await?;
        let verdict: RiskVerdict = serde_json::from_value(value)
            .map_err(|e| EngineError::contract("risk-classifier", e.to_string()))?;

        match verdict.risk.as_str() {
            "low" => Ok(RiskLevel::Low),
            "medium" => Ok(RiskLevel::Medium),
            "high" => Ok(RiskLevel::High),
            other => Err(EngineError::contract(
                "risk-classifier",
                format!("unknown risk level: {}", other),
            )),
        }
    }

    /// Blacklist hard stop: a high-risk plan touching forbidden fields is
    /// never dispatched, decision or not.
    fn blacklist_violation(&self, risk: RiskLevel, args: &Value) -> Option<String> {
        if risk != RiskLevel::High {
            return None;
        }
        let hits: Vec<String> = Self::arg_fields(args)
            .into_iter()
            .filter(|f| self.config.blacklist.iter().any(|b| b == f))
            .collect();
        (!hits.is_empty()).then(|| format!("policy-forbidden: fields [{}]", hits.join(", ")))
    }

    async fn audit_pending(&self, plan: &ExecutionPlan) {
        let entry = AuditEntry::pending(
            plan.thread_id.clone(),
            plan.tool.clone(),
            plan.args.clone(),
            plan.risk.to_string(),
        );
        if let Err(err) = self.audit.append(entry).await {
            warn!(error = %err, "audit append failed for pending entry");
        }
    }

    async fn audit_decided(
        &self,
        plan: &ExecutionPlan,
        record: &DecisionRecord,
        final_args: Option<Value>,
    ) {
        let mut entry = AuditEntry::pending(
            plan.thread_id.clone(),
            plan.tool.clone(),
            plan.args.clone(),
            plan.risk.to_string(),
        )
        .decided(record.decision.label(), record.approver.clone());
        if let Some(args) = final_args {
            entry = entry.with_final_args(args);
        }
        if let Err(err) = self.audit.append(entry).await {
            warn!(error = %err, "audit append failed for decision entry");
        }
    }
}

#[async_trait]
impl ApprovalGate for HitlGate {
    async fn review(
        &self,
        tool: &ToolDescriptor,
        args: &Value,
        ctx: &GateContext,
    ) -> olav_core::Result<GateReview> {
        let risk = self.classify(tool, args).await;
        let requires_approval =
            tool.sensitivity == Sensitivity::Write || self.matches_patterns(args);

        let plan = ExecutionPlan::new(ctx.thread_id.clone(), tool.name.clone(), args.clone(), risk)
            .with_targets(ctx.targets.clone());

        debug!(
            tool = %tool.name,
            node = %ctx.node_id,
            %risk,
            requires_approval,
            "gate review"
        );

        if requires_approval {
            self.audit_pending(&plan).await;
        }

        Ok(GateReview {
            requires_approval,
            plan,
        })
    }

    async fn resolve(
        &self,
        plan: &ExecutionPlan,
        record: DecisionRecord,
        tool: &ToolDescriptor,
    ) -> olav_core::Result<GateOutcome> {
        let outcome = match &record.decision {
            Decision::Approve => {
                if let Some(reason) = self.blacklist_violation(plan.risk, &plan.args) {
                    GateOutcome::Rejected { reason }
                } else {
                    GateOutcome::Proceed {
                        args: plan.args.clone(),
                    }
                }
            }
            Decision::Edit { args } => {
                if let Err(err) = tool.input.validate(&tool.name, args) {
                    GateOutcome::Rejected {
                        reason: format!("edited args invalid: {}", err),
                    }
                } else if let Some(reason) = self.blacklist_violation(plan.risk, args) {
                    GateOutcome::Rejected { reason }
                } else {
                    GateOutcome::Proceed { args: args.clone() }
                }
            }
            Decision::Reject { reason } => GateOutcome::Rejected {
                reason: reason
                    .clone()
                    .unwrap_or_else(|| "rejected by approver".to_string()),
            },
            Decision::ModifyPlan { text } => GateOutcome::PlanModified {
                instruction: text.clone(),
            },
        };

        let final_args = match &outcome {
            GateOutcome::Proceed { args } if *args != plan.args => Some(args.clone()),
            _ => None,
        };
        self.audit_decided(plan, &record, final_args).await;

        info!(
            tool = %plan.tool,
            decision = record.decision.label(),
            approver = %record.approver,
            "gate decision resolved"
        );
        Ok(outcome)
    }

    async fn review_plan(&self, plan: &ExecutionPlan) -> olav_core::Result<()> {
        self.audit_pending(plan).await;
        Ok(())
    }

    async fn resolve_plan(
        &self,
        plan: &ExecutionPlan,
        record: DecisionRecord,
    ) -> olav_core::Result<GateOutcome> {
        let outcome = match record.decision.clone() {
            Decision::Approve => GateOutcome::Proceed {
                args: plan.args.clone(),
            },
            Decision::Edit { args } => GateOutcome::Proceed { args },
            Decision::Reject { reason } => GateOutcome::Rejected {
                reason: reason.unwrap_or_else(|| "rejected by approver".to_string()),
            },
            Decision::ModifyPlan { text } => GateOutcome::PlanModified { instruction: text },
        };
        self.audit_decided(plan, &record, None).await;
        Ok(outcome)
    }
}
