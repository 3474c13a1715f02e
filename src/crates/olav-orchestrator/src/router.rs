//! Two-stage intent router.
//!
//! Maps a query to exactly one registered workflow:
//!
//! 1. **Semantic pre-filter** — embed the query once and compare against
//!    each descriptor's example-centroid; a best score above τ
//!    short-circuits the route. Descriptor keywords add a small boost.
//! 2. **LLM classification** — otherwise prompt the model with the top-K
//!    `{name, purpose}` pairs and require `{workflow_name, confidence}`;
//!    malformed output or low confidence falls back to the configured
//!    default workflow.
//!
//! The router never fails a request: embedding unavailable skips to stage
//! 2, LLM unavailable falls back. The decision (method + score) is
//! annotated onto the run state for the checkpoint audit trail.

use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use olav_core::llm::{ChatRequest, Embedder};
use olav_core::{ChatModel, Message, RouteDecision, RouteMethod};

use crate::config::RouterConfig;
use crate::workflows::WorkflowRegistry;

/// Prompt template for workflow classification
const WORKFLOW_SELECTION_PROMPT: &str = r#"You are a routing assistant for a network operations agent.

Available workflows:
{workflows}

User query: {query}

Select the single most appropriate workflow. Respond with JSON only:
{"workflow_name": "<name>", "confidence": <0.0-1.0>}"#;

#[derive(Debug, Deserialize)]
struct Classification {
    workflow_name: String,
    confidence: f32,
}

struct DescriptorEmbedding {
    name: String,
    keywords: Vec<String>,
    centroid: Vec<f32>,
}

/// Router over the frozen workflow registry
pub struct IntentRouter {
    registry: Arc<WorkflowRegistry>,
    chat: Arc<dyn ChatModel>,
    embedder: Option<Arc<dyn Embedder>>,
    config: RouterConfig,
    /// Example-centroids, computed once on first route
    centroids: Mutex<Option<Vec<DescriptorEmbedding>>>,
}

impl IntentRouter {
    /// Build a router; `embedder` is optional and its absence skips the
    /// semantic stage entirely.
    pub fn new(
        registry: Arc<WorkflowRegistry>,
        chat: Arc<dyn ChatModel>,
        embedder: Option<Arc<dyn Embedder>>,
        config: RouterConfig,
    ) -> Self {
        Self {
            registry,
            chat,
            embedder,
            config,
            centroids: Mutex::new(None),
        }
    }

    /// Route a query to exactly one workflow. Never fails; the worst case
    /// is the configured fallback.
    pub async fn route(&self, query: &str) -> RouteDecision {
        // Stage 1: semantic pre-filter.
        let scored = match self.semantic_scores(query).await {
            Ok(scored) => scored,
            Err(err) => {
                debug!(error = %err, "embedding stage unavailable; skipping to LLM");
                Vec::new()
            }
        };

        if let Some((name, score)) = scored.first() {
            if *score >= self.config.tau {
                info!(workflow = %name, score, "routed by embedding similarity");
                return RouteDecision {
                    workflow: name.clone(),
                    method: RouteMethod::Embedding,
                    score: Some(*score),
                };
            }
        }

        // Stage 2: LLM classification over the shortlist.
        let candidates: Vec<String> = if scored.is_empty() {
            self.registry
                .list()
                .iter()
                .map(|d| d.name.clone())
                .collect()
        } else {
            scored
                .iter()
                .take(self.config.top_k)
                .map(|(name, _)| name.clone())
                .collect()
        };

        match self.classify(query, &candidates).await {
            Ok(Some(decision)) => decision,
            Ok(None) | Err(_) => self.fallback(),
        }
    }

    fn fallback(&self) -> RouteDecision {
        warn!(
            workflow = %self.config.default_workflow,
            "routing fell back to default workflow"
        );
        RouteDecision {
            workflow: self.config.default_workflow.clone(),
            method: RouteMethod::Fallback,
            score: None,
        }
    }

    /// Descriptor similarity scores for a query, best first
    async fn semantic_scores(&self, query: &str) -> olav_core::Result<Vec<(String, f32)>> {
        let Some(embedder) = &self.embedder else {
            return Ok(Vec::new());
        };

        self.ensure_centroids(embedder).await?;
        let query_vec = embedder.embed(query).await?;
        let query_lower = query.to_ascii_lowercase();

        let guard = self.centroids.lock().await;
        let Some(centroids) = guard.as_ref() else {
            return Ok(Vec::new());
        };

        let mut scored: Vec<(String, f32)> = centroids
            .iter()
            .map(|entry| {
                let mut score = cosine(&query_vec, &entry.centroid);
                if entry
                    .keywords
                    .iter()
                    .any(|kw| query_lower.contains(&kw.to_ascii_lowercase()))
                {
                    score += self.config.keyword_boost;
                }
                (entry.name.clone(), score)
            })
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        Ok(scored)
    }

    async fn ensure_centroids(&self, embedder: &Arc<dyn Embedder>) -> olav_core::Result<()> {
        let mut guard = self.centroids.lock().await;
        if guard.is_some() {
            return Ok(());
        }

        let mut entries = Vec::new();
        for descriptor in self.registry.list() {
            if descriptor.examples.is_empty() {
                continue;
            }
            let mut sum: Vec<f32> = Vec::new();
            for example in &descriptor.examples {
                let vec = embedder.embed(example).await?;
                if sum.is_empty() {
                    sum = vec;
                } else {
                    for (acc, v) in sum.iter_mut().zip(vec.iter()) {
                        *acc += v;
                    }
                }
            }
            let n = descriptor.examples.len() as f32;
            for v in sum.iter_mut() {
                *v /= n;
            }
            entries.push(DescriptorEmbedding {
                name: descriptor.name.clone(),
                keywords: descriptor.keywords.clone(),
                centroid: sum,
            });
        }

        debug!(descriptors = entries.len(), "router centroids computed");
        *guard = Some(entries);
        Ok(())
    }

    /// Stage 2: ask the model to pick among candidates
    async fn classify(
        &self,
        query: &str,
        candidates: &[String],
    ) -> olav_core::Result<Option<RouteDecision>> {
        let mut listing = String::new();
        for name in candidates {
            if let Ok(descriptor) = self.registry.get(name) {
                listing.push_str(&format!("- {}: {}\n", descriptor.name, descriptor.purpose));
            }
        }

        let prompt = WORKFLOW_SELECTION_PROMPT
            .replace("{workflows}", &listing)
            .replace("{query}", query);

        let schema = serde_json::json!({
            "type": "object",
            "properties": {
                "workflow_name": {"type": "string"},
                "confidence": {"type": "number"}
            },
            "required": ["workflow_name", "confidence"]
        });

        let value = self
            .chat
            .structured(ChatRequest::new(vec![Message::user(prompt)]), &schema)
            .await?;

        let parsed: Classification = match serde_json::from_value(value) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(error = %err, "classifier returned malformed output");
                return Ok(None);
            }
        };

        if !candidates.contains(&parsed.workflow_name) {
            warn!(workflow = %parsed.workflow_name, "classifier picked unknown workflow");
            return Ok(None);
        }
        if parsed.confidence < self.config.confidence_floor {
            debug!(
                workflow = %parsed.workflow_name,
                confidence = parsed.confidence,
                "classifier confidence below floor"
            );
            return Ok(None);
        }

        info!(
            workflow = %parsed.workflow_name,
            confidence = parsed.confidence,
            "routed by LLM classification"
        );
        Ok(Some(RouteDecision {
            workflow: parsed.workflow_name,
            method: RouteMethod::Llm,
            score: Some(parsed.confidence),
        }))
    }
}

/// Cosine similarity; zero for mismatched or empty vectors
fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
