//! LLM capability contracts.
//!
//! The core is an orchestration engine, not an LLM client library: it
//! consumes providers through the [`ChatModel`] and [`Embedder`] traits
//! and assumes nothing beyond streaming chat completion with tool calling
//! and an optional structured-output mode. Provider implementations live
//! outside this workspace; tests use in-memory mocks.

pub mod traits;
pub mod types;

pub use traits::{ChatModel, Embedder};
pub use types::{
    ChatRequest, ChatResponse, ChatStream, MessageChunk, ToolDefinition, UsageMetadata,
};
