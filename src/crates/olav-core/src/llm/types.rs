//! Request, response, and streaming types for the [`ChatModel`] contract.
//!
//! [`ChatModel`]: crate::llm::ChatModel

use std::pin::Pin;

use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::messages::{Message, ToolCallRef};

/// A tool made visible to the model for function calling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name
    pub name: String,

    /// One-sentence purpose shown to the model
    pub description: String,

    /// JSON Schema of the arguments
    pub parameters: serde_json::Value,
}

/// A chat completion request
#[derive(Debug, Clone)]
pub struct ChatRequest {
    /// Conversation so far
    pub messages: Vec<Message>,

    /// Sampling temperature
    pub temperature: Option<f32>,

    /// Upper bound on generated tokens
    pub max_tokens: Option<u32>,

    /// Tools the model may call
    pub tools: Vec<ToolDefinition>,
}

impl ChatRequest {
    /// Create a request from messages
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            temperature: None,
            max_tokens: None,
            tools: Vec::new(),
        }
    }

    /// Set the sampling temperature
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set the generation limit
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Bind tool definitions
    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }
}

/// Token usage reported by the provider
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct UsageMetadata {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// A complete chat response
#[derive(Debug, Clone)]
pub struct ChatResponse {
    /// The assistant message
    pub message: Message,

    /// Tool calls the model requested, if any
    pub tool_calls: Vec<ToolCallRef>,

    /// Usage statistics, when the provider reports them
    pub usage: Option<UsageMetadata>,
}

impl ChatResponse {
    /// Text content of the response
    pub fn text(&self) -> &str {
        &self.message.content
    }
}

/// An incremental chunk of a streamed response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageChunk {
    /// Text delta
    pub delta: String,

    /// Set on the final chunk
    pub done: bool,
}

/// Stream of response chunks
pub type ChatStream = Pin<Box<dyn Stream<Item = Result<MessageChunk>> + Send>>;
