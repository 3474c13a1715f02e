//! Shared doubles and helpers for orchestrator integration tests.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tokio::sync::Mutex;

use olav_checkpoint::{InMemoryAuditStore, InMemoryCheckpointStore};
use olav_core::llm::{ChatRequest, ChatResponse, ChatStream};
use olav_core::{
    ChatModel, EngineError, Event, EventStream, FieldSpec, FieldType, InputContract, Message,
    RecordMeta, RecordSet, SchemaDescriptor, Sensitivity, TableSchema, ToolDescriptor,
    ToolExecutor,
};
use olav_orchestrator::config::OlavConfig;
use olav_orchestrator::{Olav, OlavBuilder};

/// Chat model that replays a script of canned responses in call order
#[derive(Clone)]
pub struct ScriptedModel {
    responses: Arc<Mutex<VecDeque<String>>>,
}

impl ScriptedModel {
    pub fn new(responses: Vec<&str>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(
                responses.into_iter().map(String::from).collect(),
            )),
        }
    }

    /// Append responses for a later phase of the scenario
    pub async fn push(&self, response: &str) {
        self.responses.lock().await.push_back(response.to_string());
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn chat(&self, _request: ChatRequest) -> olav_core::Result<ChatResponse> {
        match self.responses.lock().await.pop_front() {
            Some(text) => Ok(ChatResponse {
                message: Message::assistant(text),
                tool_calls: Vec::new(),
                usage: None,
            }),
            None => Err(EngineError::transient("llm", "script exhausted")),
        }
    }

    async fn stream(&self, _request: ChatRequest) -> olav_core::Result<ChatStream> {
        // Force the fallback path through chat().
        Err(EngineError::transient("llm", "streaming not scripted"))
    }

    fn clone_box(&self) -> Box<dyn ChatModel> {
        Box::new(self.clone())
    }
}

/// Read executor returning rows shaped by the query text
pub struct QueryAwareReadExecutor;

#[async_trait]
impl ToolExecutor for QueryAwareReadExecutor {
    async fn execute(&self, args: Value) -> olav_core::Result<RecordSet> {
        let query = args
            .get("query")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let meta = RecordMeta::source("telemetry");

        if query.contains("verify") {
            // Audit-style probes come back empty in these scenarios.
            return Ok(RecordSet::empty(meta));
        }
        if query.contains("lldp") {
            return Ok(RecordSet::new(
                vec!["neighbor".into(), "peer_hostname".into()],
                vec![vec![json!("R2"), json!("r2.lab")]],
                meta,
            ));
        }
        if query.contains("mpls") || query.contains("interface") {
            return Ok(RecordSet::new(
                vec!["ifname".into(), "mpls".into()],
                vec![
                    vec![json!("Gi0/1"), json!(true)],
                    vec![json!("Gi0/2"), json!(false)],
                ],
                meta,
            ));
        }
        Ok(RecordSet::new(
            vec!["peer".into(), "state".into()],
            vec![
                vec![json!("10.0.0.1"), json!("Established")],
                vec![json!("10.0.0.2"), json!("Established")],
            ],
            meta,
        ))
    }
}

/// Read executor for per-device show commands
pub struct DeviceShowExecutor;

#[async_trait]
impl ToolExecutor for DeviceShowExecutor {
    async fn execute(&self, args: Value) -> olav_core::Result<RecordSet> {
        let device = args
            .get("device")
            .and_then(|v| v.as_str())
            .unwrap_or("R1")
            .to_string();
        Ok(RecordSet::new(
            vec!["ifname".into(), "state".into(), "mtu".into()],
            vec![vec![json!("Gi0/1"), json!("up"), json!(1500)]],
            RecordMeta::source("device").with_device(device),
        ))
    }
}

/// Write executor that records every applied argument set
#[derive(Clone, Default)]
pub struct RecordingWriteExecutor {
    pub applied: Arc<Mutex<Vec<Value>>>,
}

#[async_trait]
impl ToolExecutor for RecordingWriteExecutor {
    async fn execute(&self, args: Value) -> olav_core::Result<RecordSet> {
        self.applied.lock().await.push(args);
        Ok(RecordSet::new(
            vec!["status".into()],
            vec![vec![json!("applied")]],
            RecordMeta::source("device"),
        ))
    }
}

/// The telemetry tool with the scenario schema catalog
pub fn telemetry_tool() -> ToolDescriptor {
    ToolDescriptor::new(
        "telemetry.search",
        "Query normalized network telemetry tables",
        Sensitivity::Read,
    )
    .with_input(
        InputContract::new()
            .with_field("query", FieldSpec::optional(FieldType::String, "free-text query")),
    )
    .with_schema(SchemaDescriptor::new(vec![
        TableSchema::new("interfaces", "interface state and counters")
            .with_field("ifname", "interface name")
            .with_field("state", "operational state")
            .with_field("mtu", "configured mtu")
            .with_field("mpls", "mpls enabled flag"),
        TableSchema::new("bgp", "bgp neighbor sessions")
            .with_field("peer", "neighbor address")
            .with_field("state", "session state"),
        TableSchema::new("lldp", "lldp neighbor adjacencies")
            .with_field("peer_hostname", "neighbor hostname"),
    ]))
}

pub fn device_show_tool() -> ToolDescriptor {
    ToolDescriptor::new(
        "device.show",
        "Run a read-only show command on a device",
        Sensitivity::Read,
    )
    .with_input(
        InputContract::new()
            .with_field("device", FieldSpec::required(FieldType::String, "device name"))
            .with_field("command", FieldSpec::optional(FieldType::String, "show command")),
    )
}

pub fn device_configure_tool() -> ToolDescriptor {
    ToolDescriptor::new(
        "device.configure",
        "Apply configuration commands to a device",
        Sensitivity::Write,
    )
    .with_input(
        InputContract::new()
            .with_field("device", FieldSpec::required(FieldType::String, "device name"))
            .with_field("commands", FieldSpec::optional(FieldType::Array, "cli commands")),
    )
}

pub fn inventory_query_tool() -> ToolDescriptor {
    ToolDescriptor::new("inventory.query", "Query the inventory of record", Sensitivity::Read)
        .with_input(
            InputContract::new()
                .with_field("object_type", FieldSpec::optional(FieldType::String, "object type"))
                .with_field("filter", FieldSpec::optional(FieldType::Object, "field filter")),
        )
}

pub fn inventory_mutate_tool() -> ToolDescriptor {
    ToolDescriptor::new(
        "inventory.mutate",
        "Create, update, or delete inventory objects",
        Sensitivity::Write,
    )
    .with_input(
        InputContract::new()
            .with_field("operation", FieldSpec::required(FieldType::String, "crud operation"))
            .with_field("object_type", FieldSpec::required(FieldType::String, "object type"))
            .with_field("payload", FieldSpec::optional(FieldType::Object, "object payload")),
    )
}

/// Everything a scenario needs to drive and assert against
pub struct Harness {
    pub olav: Olav,
    pub model: ScriptedModel,
    pub checkpoints: Arc<InMemoryCheckpointStore>,
    pub audit: Arc<InMemoryAuditStore>,
    pub writes: RecordingWriteExecutor,
}

/// Build a service with the standard workflows, scenario tools, and
/// in-memory stores. `responses` scripts the chat model for the first
/// phase; later phases use `harness.model.push`.
pub fn harness(responses: Vec<&str>) -> Harness {
    harness_with_config(responses, test_config())
}

pub fn harness_with_config(responses: Vec<&str>, config: OlavConfig) -> Harness {
    let model = ScriptedModel::new(responses);
    let checkpoints = Arc::new(InMemoryCheckpointStore::new());
    let audit = Arc::new(InMemoryAuditStore::new());
    let writes = RecordingWriteExecutor::default();

    let olav = builder_on(&model, checkpoints.clone(), audit.clone(), &writes, config)
        .build()
        .expect("service builds");

    Harness {
        olav,
        model,
        checkpoints,
        audit,
        writes,
    }
}

/// A fresh service over existing stores: the crash-restart scenario
pub fn rebuild(harness: &Harness, responses: Vec<&str>) -> Harness {
    let model = ScriptedModel::new(responses);
    let olav = builder_on(
        &model,
        harness.checkpoints.clone(),
        harness.audit.clone(),
        &harness.writes,
        test_config(),
    )
    .build()
    .expect("service rebuilds");

    Harness {
        olav,
        model,
        checkpoints: harness.checkpoints.clone(),
        audit: harness.audit.clone(),
        writes: harness.writes.clone(),
    }
}

pub fn test_config() -> OlavConfig {
    let mut config = OlavConfig::default();
    // Scenarios script every chat call; keep the gate off the model.
    config.gate.llm_classification = false;
    config
}

fn builder_on(
    model: &ScriptedModel,
    checkpoints: Arc<InMemoryCheckpointStore>,
    audit: Arc<InMemoryAuditStore>,
    writes: &RecordingWriteExecutor,
    config: OlavConfig,
) -> OlavBuilder {
    OlavBuilder::new()
        .with_config(config)
        .with_chat(Arc::new(model.clone()))
        .with_checkpoint_store(checkpoints)
        .with_audit_store(audit)
        .register_tool(telemetry_tool(), Arc::new(QueryAwareReadExecutor))
        .expect("telemetry registers")
        .register_tool(device_show_tool(), Arc::new(DeviceShowExecutor))
        .expect("device.show registers")
        .register_tool(device_configure_tool(), Arc::new(writes.clone()))
        .expect("device.configure registers")
        .register_tool(inventory_query_tool(), Arc::new(DeviceShowExecutor))
        .expect("inventory.query registers")
        .register_tool(inventory_mutate_tool(), Arc::new(writes.clone()))
        .expect("inventory.mutate registers")
        .with_standard_workflows()
        .expect("workflows register")
}

/// Drain a stream to completion
pub async fn collect_events(mut stream: EventStream) -> Vec<Event> {
    let mut events = Vec::new();
    while let Some(event) = stream.next().await {
        events.push(event);
    }
    events
}

/// Every `tool_start` has exactly one `tool_end` with the same id, or the
/// stream ended in an error
pub fn assert_tool_events_paired(events: &[Event]) {
    let errored = matches!(events.last(), Some(Event::Error { .. }));
    let starts: Vec<&String> = events
        .iter()
        .filter_map(|e| match e {
            Event::ToolStart { id, .. } => Some(id),
            _ => None,
        })
        .collect();
    for id in &starts {
        let ends = events
            .iter()
            .filter(|e| matches!(e, Event::ToolEnd { id: end_id, .. } if end_id == *id))
            .count();
        assert!(
            ends == 1 || errored,
            "tool_start {} has {} matching tool_end events",
            id,
            ends
        );
    }
}

pub fn count_tool_starts(events: &[Event]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, Event::ToolStart { .. }))
        .count()
}

pub fn find_interrupt(events: &[Event]) -> Option<&Value> {
    events.iter().find_map(|e| match e {
        Event::Interrupt { execution_plan } => Some(execution_plan),
        _ => None,
    })
}

pub fn assistant_messages(events: &[Event]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::Message {
                role: olav_core::MessageRole::Assistant,
                content,
            } => Some(content.clone()),
            _ => None,
        })
        .collect()
}
