//! Core traits for LLM integration.
//!
//! Implementations must be `Send + Sync`; share them across nodes as
//! `Arc<dyn ChatModel>`. Provider failures should map to
//! `EngineError::Transient`/`RateLimited`/`Timeout` so the engine's retry
//! and fallback policies can classify them.

use async_trait::async_trait;

use crate::error::{EngineError, Result};
use crate::llm::types::{ChatRequest, ChatResponse, ChatStream};

/// Chat-based language model capability
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Generate a complete response
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse>;

    /// Stream a response token by token
    async fn stream(&self, request: ChatRequest) -> Result<ChatStream>;

    /// Generate output conforming to a JSON schema.
    ///
    /// The default implementation asks for a plain completion and parses
    /// the text as JSON, stripping Markdown code fences if present.
    /// Providers with a native structured-output mode should override.
    async fn structured(
        &self,
        request: ChatRequest,
        _schema: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        let response = self.chat(request).await?;
        parse_json_response(response.text())
    }

    /// Clone into a boxed trait object
    fn clone_box(&self) -> Box<dyn ChatModel>;
}

impl Clone for Box<dyn ChatModel> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// Text embedding capability, used by the router and capability index
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a text into a fixed-dimension vector
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Parse a model completion as JSON, tolerating ```json fences
pub fn parse_json_response(text: &str) -> Result<serde_json::Value> {
    let trimmed = text.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|rest| rest.trim_end_matches("```"))
        .unwrap_or(trimmed)
        .trim();

    serde_json::from_str(body).map_err(|e| EngineError::Contract {
        tool: "llm".to_string(),
        message: format!("model output is not valid JSON: {}", e),
        payload: Some(serde_json::Value::String(text.to_string())),
    })
}
