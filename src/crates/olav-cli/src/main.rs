//! # olav
//!
//! Administrative CLI for the OLAV orchestrator core: list registered
//! workflows, inspect a thread's latest checkpoint, export the audit
//! trail, and dry-run the intent router against a query.
//!
//! This surface operates on a locally composed service with sample tool
//! bindings and in-memory stores; production deployments embed the same
//! commands against their own composition.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};

use olav_core::llm::{ChatRequest, ChatResponse, ChatStream, Embedder};
use olav_core::{
    ChatModel, EngineError, FieldSpec, FieldType, InputContract, RecordMeta, RecordSet,
    SchemaDescriptor, Sensitivity, TableSchema, ToolDescriptor, ToolExecutor,
};
use olav_orchestrator::{Olav, OlavBuilder, OlavConfig};

#[derive(Parser)]
#[command(name = "olav")]
#[command(about = "OLAV orchestrator admin commands", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long, env = "OLAV_CONFIG")]
    config: Option<std::path::PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered workflows
    Workflows,

    /// Show a thread's latest checkpoint and pending interrupt
    Thread {
        /// Thread id
        id: String,
    },

    /// Export audit entries for a time range
    Audit {
        /// Range start (RFC 3339); defaults to 24h ago
        #[arg(long)]
        from: Option<DateTime<Utc>>,

        /// Range end (RFC 3339); defaults to now
        #[arg(long)]
        to: Option<DateTime<Utc>>,
    },

    /// Dry-run the intent router for a query
    Route {
        /// The query text
        query: String,
    },
}

/// Offline stand-in: structured/chat calls fail so the router falls back
/// deterministically; the semantic stage still runs via the embedder.
#[derive(Clone)]
struct OfflineModel;

#[async_trait]
impl ChatModel for OfflineModel {
    async fn chat(&self, _request: ChatRequest) -> olav_core::Result<ChatResponse> {
        Err(EngineError::transient("llm", "no provider configured"))
    }

    async fn stream(&self, _request: ChatRequest) -> olav_core::Result<ChatStream> {
        Err(EngineError::transient("llm", "no provider configured"))
    }

    fn clone_box(&self) -> Box<dyn ChatModel> {
        Box::new(self.clone())
    }
}

/// Deterministic bag-of-tokens embedder for offline routing
struct LexicalEmbedder;

#[async_trait]
impl Embedder for LexicalEmbedder {
    async fn embed(&self, text: &str) -> olav_core::Result<Vec<f32>> {
        let mut vec = vec![0.0f32; 128];
        for token in text.to_ascii_lowercase().split_whitespace() {
            let mut h: u64 = 1469598103934665603;
            for b in token.bytes() {
                h ^= b as u64;
                h = h.wrapping_mul(1099511628211);
            }
            vec[(h % 128) as usize] += 1.0;
        }
        Ok(vec)
    }
}

/// Sample read executor returning a canned interface table
struct SampleReadExecutor;

#[async_trait]
impl ToolExecutor for SampleReadExecutor {
    async fn execute(&self, _args: serde_json::Value) -> olav_core::Result<RecordSet> {
        Ok(RecordSet::new(
            vec!["ifname".into(), "state".into(), "mtu".into()],
            vec![
                vec!["Gi0/1".into(), "up".into(), 1500.into()],
                vec!["Gi0/2".into(), "down".into(), 9000.into()],
            ],
            RecordMeta::source("sample").with_device("R1"),
        ))
    }
}

fn sample_service(config: OlavConfig) -> anyhow::Result<Olav> {
    let telemetry = ToolDescriptor::new(
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
            .with_field("mtu", "configured mtu"),
        TableSchema::new("bgp", "bgp neighbor sessions")
            .with_field("peer", "neighbor address")
            .with_field("state", "session state"),
    ]));

    let device_show = ToolDescriptor::new(
        "device.show",
        "Run a read-only show command on a device",
        Sensitivity::Read,
    )
    .with_input(
        InputContract::new()
            .with_field("device", FieldSpec::required(FieldType::String, "device name"))
            .with_field("command", FieldSpec::optional(FieldType::String, "show command")),
    );

    let device_configure = ToolDescriptor::new(
        "device.configure",
        "Apply configuration commands to a device",
        Sensitivity::Write,
    )
    .with_input(
        InputContract::new()
            .with_field("device", FieldSpec::required(FieldType::String, "device name"))
            .with_field("commands", FieldSpec::optional(FieldType::Array, "cli commands")),
    );

    let inventory_query = ToolDescriptor::new(
        "inventory.query",
        "Query the inventory of record",
        Sensitivity::Read,
    )
    .with_input(
        InputContract::new()
            .with_field("object_type", FieldSpec::optional(FieldType::String, "object type"))
            .with_field("filter", FieldSpec::optional(FieldType::Object, "field filter")),
    );

    let inventory_mutate = ToolDescriptor::new(
        "inventory.mutate",
        "Create, update, or delete inventory objects",
        Sensitivity::Write,
    )
    .with_input(
        InputContract::new()
            .with_field("operation", FieldSpec::required(FieldType::String, "crud operation"))
            .with_field("object_type", FieldSpec::required(FieldType::String, "object type"))
            .with_field("payload", FieldSpec::optional(FieldType::Object, "object payload")),
    );

    let olav = OlavBuilder::new()
        .with_config(config)
        .with_chat(Arc::new(OfflineModel))
        .with_embedder(Arc::new(LexicalEmbedder))
        .register_tool(telemetry, Arc::new(SampleReadExecutor))?
        .register_tool(device_show, Arc::new(SampleReadExecutor))?
        .register_tool(device_configure, Arc::new(SampleReadExecutor))?
        .register_tool(inventory_query, Arc::new(SampleReadExecutor))?
        .register_tool(inventory_mutate, Arc::new(SampleReadExecutor))?
        .with_standard_workflows()?
        .build()?;
    Ok(olav)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => OlavConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => OlavConfig::default(),
    };
    let olav = sample_service(config)?;

    match cli.command {
        Commands::Workflows => {
            for descriptor in olav.workflows() {
                println!("{:<12} {}", descriptor.name, descriptor.purpose);
            }
        }
        Commands::Thread { id } => {
            let view = olav.get_thread(&id).await?;
            if let Some(latest) = &view.latest {
                println!(
                    "thread {} @ step {} (node {}, {})",
                    view.thread_id, latest.step, latest.node_id, latest.ts
                );
            }
            for message in &view.messages {
                println!("[{}] {}", message.role, message.content);
            }
            match &view.pending_interrupt {
                Some(plan) => println!(
                    "pending interrupt:\n{}",
                    serde_json::to_string_pretty(plan)?
                ),
                None => println!("no pending interrupt"),
            }
        }
        Commands::Audit { from, to } => {
            let from = from.unwrap_or_else(|| Utc::now() - chrono::Duration::hours(24));
            let to = to.unwrap_or_else(Utc::now);
            let entries = olav.export_audit(from, to).await?;
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        Commands::Route { query } => {
            let decision = olav.router_dry_run(&query).await;
            println!(
                "workflow: {}\nmethod:   {:?}\nscore:    {}",
                decision.workflow,
                decision.method,
                decision
                    .score
                    .map(|s| format!("{:.3}", s))
                    .unwrap_or_else(|| "-".to_string())
            );
        }
    }

    Ok(())
}
