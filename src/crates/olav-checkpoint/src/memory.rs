//! In-memory checkpoint and audit storage.
//!
//! Reference implementations of [`CheckpointStore`] and [`AuditStore`]
//! backed by `Arc<RwLock<..>>` maps. Suitable for development, testing,
//! and single-process deployments; production deployments implement the
//! same traits over a database. Both types are `Clone` and share their
//! underlying storage.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::audit::{AuditEntry, AuditStore};
use crate::checkpoint::{Checkpoint, InterruptRecord, ThreadSummary};
use crate::error::{CheckpointError, Result};
use crate::traits::CheckpointStore;

#[derive(Debug, Default)]
struct ThreadRecord {
    checkpoints: Vec<Checkpoint>,
    pending_interrupt: Option<InterruptRecord>,
}

/// In-memory checkpoint store
#[derive(Debug, Clone, Default)]
pub struct InMemoryCheckpointStore {
    threads: Arc<RwLock<HashMap<String, ThreadRecord>>>,
}

impl InMemoryCheckpointStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of threads being tracked
    pub async fn thread_count(&self) -> usize {
        self.threads.read().await.len()
    }

    /// Total checkpoints across all threads
    pub async fn checkpoint_count(&self) -> usize {
        self.threads
            .read()
            .await
            .values()
            .map(|r| r.checkpoints.len())
            .sum()
    }

    /// Drop all state (test isolation)
    pub async fn clear(&self) {
        self.threads.write().await.clear();
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn put(&self, checkpoint: Checkpoint) -> Result<()> {
        if checkpoint.thread_id.is_empty() {
            return Err(CheckpointError::Invalid("thread_id is required".to_string()));
        }

        let mut threads = self.threads.write().await;
        let record = threads.entry(checkpoint.thread_id.clone()).or_default();

        if let Some(last) = record.checkpoints.last() {
            if checkpoint.step <= last.step {
                return Err(CheckpointError::NonMonotonicStep {
                    thread_id: checkpoint.thread_id,
                    step: checkpoint.step,
                    latest: last.step,
                });
            }
        }

        record.checkpoints.push(checkpoint);
        Ok(())
    }

    async fn latest(&self, thread_id: &str) -> Result<Option<Checkpoint>> {
        let threads = self.threads.read().await;
        Ok(threads
            .get(thread_id)
            .and_then(|r| r.checkpoints.last().cloned()))
    }

    async fn history(&self, thread_id: &str) -> Result<Vec<Checkpoint>> {
        let threads = self.threads.read().await;
        Ok(threads
            .get(thread_id)
            .map(|r| r.checkpoints.clone())
            .unwrap_or_default())
    }

    async fn mark_interrupt(&self, thread_id: &str, record: InterruptRecord) -> Result<()> {
        let mut threads = self.threads.write().await;
        let thread = threads
            .get_mut(thread_id)
            .ok_or_else(|| CheckpointError::NotFound(format!("thread {}", thread_id)))?;

        if thread.pending_interrupt.is_some() {
            return Err(CheckpointError::InterruptPending(thread_id.to_string()));
        }

        if let Some(last) = thread.checkpoints.last_mut() {
            last.pending_interrupt = Some(record.clone());
        }
        thread.pending_interrupt = Some(record);
        Ok(())
    }

    async fn clear_interrupt(&self, thread_id: &str) -> Result<Option<InterruptRecord>> {
        let mut threads = self.threads.write().await;
        let thread = threads
            .get_mut(thread_id)
            .ok_or_else(|| CheckpointError::NotFound(format!("thread {}", thread_id)))?;

        if let Some(last) = thread.checkpoints.last_mut() {
            last.pending_interrupt = None;
        }
        Ok(thread.pending_interrupt.take())
    }

    async fn pending_interrupt(&self, thread_id: &str) -> Result<Option<InterruptRecord>> {
        let threads = self.threads.read().await;
        Ok(threads
            .get(thread_id)
            .and_then(|r| r.pending_interrupt.clone()))
    }

    async fn list_threads(&self) -> Result<Vec<ThreadSummary>> {
        let threads = self.threads.read().await;
        let mut summaries: Vec<ThreadSummary> = threads
            .iter()
            .filter_map(|(id, record)| {
                let first = record.checkpoints.first()?;
                let last = record.checkpoints.last()?;
                Some(ThreadSummary {
                    thread_id: id.clone(),
                    created_at: first.ts,
                    last_activity: last.ts,
                    steps: record.checkpoints.len() as u64,
                    pending_interrupt: record.pending_interrupt.is_some(),
                })
            })
            .collect();
        summaries.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
        Ok(summaries)
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<()> {
        self.threads.write().await.remove(thread_id);
        Ok(())
    }
}

/// In-memory append-only audit store
#[derive(Debug, Clone, Default)]
pub struct InMemoryAuditStore {
    entries: Arc<RwLock<Vec<AuditEntry>>>,
}

impl InMemoryAuditStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries recorded
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the trail is empty
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl AuditStore for InMemoryAuditStore {
    async fn append(&self, entry: AuditEntry) -> Result<()> {
        self.entries.write().await.push(entry);
        Ok(())
    }

    async fn export(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<AuditEntry>> {
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .filter(|e| e.created_at >= from && e.created_at < to)
            .cloned()
            .collect())
    }

    async fn for_thread(&self, thread_id: &str) -> Result<Vec<AuditEntry>> {
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .filter(|e| e.thread_id == thread_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn checkpoint(thread: &str, step: u64) -> Checkpoint {
        Checkpoint::new(thread, step, "node", json!({"step": step}))
    }

    #[tokio::test]
    async fn test_put_and_latest() {
        let store = InMemoryCheckpointStore::new();
        store.put(checkpoint("t-1", 0)).await.unwrap();
        store.put(checkpoint("t-1", 1)).await.unwrap();

        let latest = store.latest("t-1").await.unwrap().unwrap();
        assert_eq!(latest.step, 1);
        assert_eq!(store.checkpoint_count().await, 2);
    }

    #[tokio::test]
    async fn test_rejects_non_monotonic_step() {
        let store = InMemoryCheckpointStore::new();
        store.put(checkpoint("t-1", 2)).await.unwrap();

        let err = store.put(checkpoint("t-1", 2)).await.unwrap_err();
        assert!(matches!(err, CheckpointError::NonMonotonicStep { .. }));

        let err = store.put(checkpoint("t-1", 1)).await.unwrap_err();
        assert!(matches!(err, CheckpointError::NonMonotonicStep { .. }));
    }

    #[tokio::test]
    async fn test_thread_isolation() {
        let store = InMemoryCheckpointStore::new();
        store.put(checkpoint("t-1", 0)).await.unwrap();
        store.put(checkpoint("t-2", 0)).await.unwrap();

        assert_eq!(store.thread_count().await, 2);
        assert_eq!(store.latest("t-1").await.unwrap().unwrap().thread_id, "t-1");
        assert!(store.latest("t-3").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_interrupt_lifecycle() {
        let store = InMemoryCheckpointStore::new();
        store.put(checkpoint("t-1", 0)).await.unwrap();

        let record = InterruptRecord::new("apply", json!({"tool": "device.configure"}));
        store.mark_interrupt("t-1", record.clone()).await.unwrap();

        // Only one pending interrupt per thread.
        let again = InterruptRecord::new("apply", json!({}));
        let err = store.mark_interrupt("t-1", again).await.unwrap_err();
        assert!(matches!(err, CheckpointError::InterruptPending(_)));

        let pending = store.pending_interrupt("t-1").await.unwrap().unwrap();
        assert_eq!(pending.id, record.id);

        let cleared = store.clear_interrupt("t-1").await.unwrap().unwrap();
        assert_eq!(cleared.id, record.id);
        assert!(store.pending_interrupt("t-1").await.unwrap().is_none());

        // The latest checkpoint reflects the cleared interrupt.
        let latest = store.latest("t-1").await.unwrap().unwrap();
        assert!(latest.pending_interrupt.is_none());
    }

    #[tokio::test]
    async fn test_list_threads() {
        let store = InMemoryCheckpointStore::new();
        store.put(checkpoint("t-1", 0)).await.unwrap();
        store.put(checkpoint("t-1", 1)).await.unwrap();
        store.put(checkpoint("t-2", 0)).await.unwrap();
        store
            .mark_interrupt("t-2", InterruptRecord::new("gate", json!({})))
            .await
            .unwrap();

        let summaries = store.list_threads().await.unwrap();
        assert_eq!(summaries.len(), 2);

        let t1 = summaries.iter().find(|s| s.thread_id == "t-1").unwrap();
        assert_eq!(t1.steps, 2);
        assert!(!t1.pending_interrupt);

        let t2 = summaries.iter().find(|s| s.thread_id == "t-2").unwrap();
        assert!(t2.pending_interrupt);
    }

    #[tokio::test]
    async fn test_delete_thread() {
        let store = InMemoryCheckpointStore::new();
        store.put(checkpoint("t-1", 0)).await.unwrap();
        store.delete_thread("t-1").await.unwrap();
        assert_eq!(store.thread_count().await, 0);
    }

    #[tokio::test]
    async fn test_audit_append_and_export() {
        let store = InMemoryAuditStore::new();
        let entry = AuditEntry::pending("t-1", "device.configure", json!({"mtu": 9000}), "high");
        let id = entry.id.clone();
        store.append(entry).await.unwrap();

        let decided = AuditEntry::pending("t-1", "device.configure", json!({"mtu": 9000}), "high")
            .decided("approve", "alice")
            .with_final_args(json!({"mtu": 1500}));
        store.append(decided).await.unwrap();

        assert_eq!(store.len().await, 2);

        let for_thread = store.for_thread("t-1").await.unwrap();
        assert_eq!(for_thread.len(), 2);
        assert_eq!(for_thread[0].id, id);
        assert_eq!(for_thread[1].decision, "approve");
        assert_eq!(for_thread[1].final_args, Some(json!({"mtu": 1500})));

        let all = store
            .export(Utc::now() - chrono::Duration::hours(1), Utc::now())
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
    }
}
