//! Tool descriptors, contracts, and the startup registry.
//!
//! A tool is registered once at startup with a [`ToolDescriptor`] (name,
//! purpose, sensitivity, input contract, retry policy, optional schema
//! descriptor) and a [`ToolExecutor`] implementation. The registry is
//! immutable after startup; reads are lock-free.
//!
//! Input contracts are declared as named fields and validated by compiling
//! the contract to a JSON Schema; a violation is a `contract`-class error
//! carrying the offending payload. Tool output is a normalized
//! [`RecordSet`] regardless of backend.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{EngineError, Result};
use crate::retry::RetryPolicy;

/// Per-tool sensitivity flag driving HITL gating
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sensitivity {
    /// Idempotent read; dispatched unattended
    Read,
    /// Mutates infrastructure or inventory; requires an approved decision
    Write,
}

/// Type of a declared input field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl FieldType {
    fn json_type(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Integer => "integer",
            FieldType::Number => "number",
            FieldType::Boolean => "boolean",
            FieldType::Array => "array",
            FieldType::Object => "object",
        }
    }
}

/// Declaration of one input field
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Declared type
    pub field_type: FieldType,

    /// Whether the field must be present
    pub required: bool,

    /// Shown to the model and to approvers
    pub description: String,
}

impl FieldSpec {
    /// A required field
    pub fn required(field_type: FieldType, description: impl Into<String>) -> Self {
        Self {
            field_type,
            required: true,
            description: description.into(),
        }
    }

    /// An optional field
    pub fn optional(field_type: FieldType, description: impl Into<String>) -> Self {
        Self {
            field_type,
            required: false,
            description: description.into(),
        }
    }
}

/// Named-field input contract for a tool
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InputContract {
    /// Field declarations, ordered for deterministic schema generation
    pub fields: BTreeMap<String, FieldSpec>,
}

impl InputContract {
    /// Empty contract (tool takes no arguments)
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field declaration
    pub fn with_field(mut self, name: impl Into<String>, spec: FieldSpec) -> Self {
        self.fields.insert(name.into(), spec);
        self
    }

    /// Render the contract as a JSON Schema object
    pub fn to_json_schema(&self) -> Value {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();

        for (name, spec) in &self.fields {
            properties.insert(
                name.clone(),
                json!({
                    "type": spec.field_type.json_type(),
                    "description": spec.description,
                }),
            );
            if spec.required {
                required.push(Value::String(name.clone()));
            }
        }

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": false,
        })
    }

    /// Validate arguments against the contract
    pub fn validate(&self, tool: &str, args: &Value) -> Result<()> {
        let schema = self.to_json_schema();
        let compiled = jsonschema::JSONSchema::compile(&schema)
            .map_err(|e| EngineError::internal(format!("invalid input contract: {}", e)))?;

        if let Err(errors) = compiled.validate(args) {
            let detail = errors
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(EngineError::Contract {
                tool: tool.to_string(),
                message: detail,
                payload: Some(args.clone()),
            });
        }
        Ok(())
    }
}

/// Metadata attached to a normalized record set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordMeta {
    /// Producing backend (e.g. `suzieq`, `netbox`, `device`)
    pub source: String,

    /// Device the records came from, when applicable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,

    /// When the records were produced
    pub timestamp: DateTime<Utc>,
}

impl RecordMeta {
    /// Metadata for a source, stamped now
    pub fn source(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            device: None,
            timestamp: Utc::now(),
        }
    }

    /// Attach the originating device
    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        self.device = Some(device.into());
        self
    }
}

/// Normalized tool output: a column-major table plus metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordSet {
    /// Column names
    pub columns: Vec<String>,

    /// Row values, one vector per row, aligned with `columns`
    pub rows: Vec<Vec<Value>>,

    /// Provenance metadata
    pub meta: RecordMeta,
}

impl RecordSet {
    /// An empty record set
    pub fn empty(meta: RecordMeta) -> Self {
        Self {
            columns: Vec::new(),
            rows: Vec::new(),
            meta,
        }
    }

    /// A record set with columns and rows
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>, meta: RecordMeta) -> Self {
        Self { columns, rows, meta }
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the set holds no rows
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// One field a tool can expose, for the capability index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSchema {
    /// Field name
    pub name: String,

    /// Human-readable description
    pub description: String,
}

impl FieldSchema {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

/// One table a tool can expose
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSchema {
    /// Table name
    pub name: String,

    /// Human-readable description
    pub description: String,

    /// Fields the table carries
    pub fields: Vec<FieldSchema>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            fields: Vec::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, description: impl Into<String>) -> Self {
        self.fields.push(FieldSchema::new(name, description));
        self
    }
}

/// Catalog of tables/fields a tool can expose
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaDescriptor {
    pub tables: Vec<TableSchema>,
}

impl SchemaDescriptor {
    pub fn new(tables: Vec<TableSchema>) -> Self {
        Self { tables }
    }
}

/// Static description of a registered tool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Unique name
    pub name: String,

    /// One-sentence purpose for LLM visibility
    pub purpose: String,

    /// Read or write
    pub sensitivity: Sensitivity,

    /// Declared input contract
    pub input: InputContract,

    /// Retry policy for transient failures
    pub retry: RetryPolicy,

    /// Table/field catalog for the capability index, where applicable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<SchemaDescriptor>,
}

impl ToolDescriptor {
    /// Describe a tool
    pub fn new(
        name: impl Into<String>,
        purpose: impl Into<String>,
        sensitivity: Sensitivity,
    ) -> Self {
        Self {
            name: name.into(),
            purpose: purpose.into(),
            sensitivity,
            input: InputContract::new(),
            retry: RetryPolicy::default(),
            schema: None,
        }
    }

    pub fn with_input(mut self, input: InputContract) -> Self {
        self.input = input;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_schema(mut self, schema: SchemaDescriptor) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Render as a tool definition for LLM function calling
    pub fn to_definition(&self) -> crate::llm::ToolDefinition {
        crate::llm::ToolDefinition {
            name: self.name.clone(),
            description: self.purpose.clone(),
            parameters: self.input.to_json_schema(),
        }
    }
}

/// Executable side of a tool
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Execute with validated arguments, producing a normalized record set
    async fn execute(&self, args: Value) -> Result<RecordSet>;
}

/// A descriptor paired with its executor
#[derive(Clone)]
pub struct RegisteredTool {
    pub descriptor: ToolDescriptor,
    pub executor: Arc<dyn ToolExecutor>,
}

impl std::fmt::Debug for RegisteredTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredTool")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

/// Filter for [`ToolRegistry::list`]
#[derive(Debug, Clone, Copy, Default)]
pub struct ToolFilter {
    /// Restrict to a sensitivity class
    pub sensitivity: Option<Sensitivity>,
}

/// Startup-time tool registry; immutable once handed to the engine
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
}

impl ToolRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool; fails on name collision
    pub fn register(
        &mut self,
        descriptor: ToolDescriptor,
        executor: Arc<dyn ToolExecutor>,
    ) -> Result<()> {
        if self.tools.contains_key(&descriptor.name) {
            return Err(EngineError::internal(format!(
                "tool already registered: {}",
                descriptor.name
            )));
        }
        self.tools.insert(
            descriptor.name.clone(),
            RegisteredTool {
                descriptor,
                executor,
            },
        );
        Ok(())
    }

    /// Look up a tool by name
    pub fn get(&self, name: &str) -> Result<&RegisteredTool> {
        self.tools
            .get(name)
            .ok_or_else(|| EngineError::UnknownTool(name.to_string()))
    }

    /// Descriptors matching the filter, sorted by name
    pub fn list(&self, filter: ToolFilter) -> Vec<&ToolDescriptor> {
        let mut descriptors: Vec<&ToolDescriptor> = self
            .tools
            .values()
            .map(|t| &t.descriptor)
            .filter(|d| {
                filter
                    .sensitivity
                    .map(|s| d.sensitivity == s)
                    .unwrap_or(true)
            })
            .collect();
        descriptors.sort_by(|a, b| a.name.cmp(&b.name));
        descriptors
    }

    /// Number of registered tools
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
