//! Searchable schema index over registered tools.
//!
//! The capability index is populated at load time from each tool's
//! [`SchemaDescriptor`] and is the only sanctioned way for the deep-dive
//! planner to assert that a piece of data is reachable: given a phrase
//! such as "MPLS interface errors", it returns candidate tables and
//! fields across all registered tools, each tagged with its owning tool.
//!
//! Scoring is deterministic lexical relevance: query tokens (lowercased,
//! plural-folded, stopwords dropped) are matched against entry name and
//! description tokens, and the weighted match count is normalized by the
//! query length. Identical queries always rank identically. Tools without
//! a schema descriptor are logged and skipped; that is not fatal.
//!
//! [`SchemaDescriptor`]: crate::tool::SchemaDescriptor

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::tool::{ToolFilter, ToolRegistry};

/// Match strength below which a hit is not reported
const MIN_SCORE: f32 = 0.1;

/// Weight of an exact match against a name token
const NAME_WEIGHT: f32 = 2.0;

/// Weight of an exact match against a description token
const DESC_WEIGHT: f32 = 1.0;

/// Weight of a substring match
const PARTIAL_WEIGHT: f32 = 0.5;

/// Connective and verb tokens that carry no capability signal
const STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "all", "any", "are", "from", "into", "over", "what", "which",
    "why", "how", "check", "verify", "audit", "ensure", "confirm", "analyze", "examine",
    "investigate", "review", "show", "list", "find", "get",
];

/// One candidate capability returned by a schema search
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityHit {
    /// Owning tool
    pub tool: String,

    /// Matching table
    pub table: String,

    /// Matching field within the table, when the match is field-level
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,

    /// Relevance in `[0, 1]`
    pub score: f32,
}

#[derive(Debug, Clone)]
struct IndexEntry {
    tool: String,
    table: String,
    field: Option<String>,
    /// Lowercased name tokens (field entries include their table's)
    name_tokens: Vec<String>,
    /// Lowercased description tokens (field entries include their table's)
    desc_tokens: Vec<String>,
}

/// Immutable schema index built at startup
#[derive(Debug, Clone, Default)]
pub struct CapabilityIndex {
    entries: Vec<IndexEntry>,
}

impl CapabilityIndex {
    /// Build the index from every registered tool's schema descriptor
    pub fn from_registry(registry: &ToolRegistry) -> Self {
        let mut entries = Vec::new();

        for descriptor in registry.list(ToolFilter::default()) {
            let Some(schema) = &descriptor.schema else {
                warn!(tool = %descriptor.name, "schema unindexable: no descriptor");
                continue;
            };

            for table in &schema.tables {
                let table_name_tokens = tokenize(&table.name);
                let table_desc_tokens = tokenize(&table.description);

                entries.push(IndexEntry {
                    tool: descriptor.name.clone(),
                    table: table.name.clone(),
                    field: None,
                    name_tokens: table_name_tokens.clone(),
                    desc_tokens: table_desc_tokens.clone(),
                });

                for field in &table.fields {
                    let mut name_tokens = tokenize(&field.name);
                    name_tokens.extend(table_name_tokens.iter().cloned());
                    let mut desc_tokens = tokenize(&field.description);
                    desc_tokens.extend(table_desc_tokens.iter().cloned());

                    entries.push(IndexEntry {
                        tool: descriptor.name.clone(),
                        table: table.name.clone(),
                        field: Some(field.name.clone()),
                        name_tokens,
                        desc_tokens,
                    });
                }
            }
        }

        debug!(entries = entries.len(), "capability index built");
        Self { entries }
    }

    /// Top-`k` tables/fields matching a free-text query
    pub fn search_schema(&self, query: &str, k: usize) -> Vec<CapabilityHit> {
        let query_tokens = tokenize(query);
        if query_tokens.is_empty() || k == 0 {
            return Vec::new();
        }

        let mut hits: Vec<CapabilityHit> = self
            .entries
            .iter()
            .filter_map(|entry| {
                let score = score_entry(&query_tokens, entry);
                (score >= MIN_SCORE).then(|| CapabilityHit {
                    tool: entry.tool.clone(),
                    table: entry.table.clone(),
                    field: entry.field.clone(),
                    score,
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.tool.cmp(&b.tool))
                .then_with(|| a.table.cmp(&b.table))
                .then_with(|| a.field.cmp(&b.field))
        });
        hits.truncate(k);
        hits
    }

    /// Number of indexed tables and fields
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing was indexed
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Lowercase, split on non-alphanumerics, fold plurals, drop stopwords
/// and fragments
fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_ascii_alphanumeric())
        .map(|t| t.to_ascii_lowercase())
        .map(|t| t.trim_end_matches('s').to_string())
        .filter(|t| t.len() > 2 && !STOPWORDS.contains(&t.as_str()))
        .collect()
}

/// Relevance of an entry to a query. Each query token contributes its
/// best match (exact name > exact description > substring); the sum is
/// normalized so a query fully matched against names scores 1.0.
fn score_entry(query_tokens: &[String], entry: &IndexEntry) -> f32 {
    let mut total = 0.0f32;

    for token in query_tokens {
        if entry.name_tokens.iter().any(|t| t == token) {
            total += NAME_WEIGHT;
        } else if entry.desc_tokens.iter().any(|t| t == token) {
            total += DESC_WEIGHT;
        } else if entry
            .name_tokens
            .iter()
            .chain(entry.desc_tokens.iter())
            .any(|t| t.contains(token.as_str()) || token.contains(t.as_str()))
        {
            total += PARTIAL_WEIGHT;
        }
    }

    total / (NAME_WEIGHT * query_tokens.len() as f32)
}
