use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{DriftlessError, Result};
use super::store::{QueueRecord, QueueStore};
use super::{backoff, ItemKind, ItemStatus, Priority, QueueItem};

#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Delivery attempts before an item is moved to the dead letter set.
    pub max_attempts: u32,
    /// First retry delay (seconds); doubles per attempt.
    pub backoff_base_secs: u64,
    /// Retry delay ceiling (seconds).
    pub backoff_cap_secs: u64,
    /// Durable log file; `None` runs in-memory only.
    pub store_path: Option<PathBuf>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            backoff_base_secs: 5,
            backoff_cap_secs: 900,
            store_path: None,
        }
    }
}

impl QueueConfig {
    /// Load config from environment variables with sensible defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("DRIFTLESS_DATA_DIR").unwrap_or_else(|_| "./data".to_string());
        Self {
            max_attempts: std::env::var("DRIFTLESS_QUEUE_MAX_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8),
            backoff_base_secs: std::env::var("DRIFTLESS_QUEUE_BACKOFF_BASE_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
            backoff_cap_secs: std::env::var("DRIFTLESS_QUEUE_BACKOFF_CAP_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(900),
            store_path: Some(PathBuf::from(data_dir).join("sync_queue.jsonl")),
        }
    }

    /// In-memory config for tests.
    pub fn in_memory() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub pending: usize,
    pub in_flight: usize,
    pub dead: usize,
    pub total: usize,
}

/// Durable priority outbox.
///
/// Every mutation persists through the store before it is visible, except
/// the pending→in-flight hop, which is deliberately memory-only: a crash
/// mid-push must replay the item as pending.
pub struct SyncQueue {
    config: QueueConfig,
    items: DashMap<Uuid, QueueItem>,
    store: Option<QueueStore>,
}

impl SyncQueue {
    /// Open the queue, recovering persisted items. A store that cannot be
    /// opened degrades to in-memory operation rather than failing the node.
    pub fn new(config: QueueConfig) -> Arc<Self> {
        let items = DashMap::new();
        let store = match config.store_path {
            Some(ref path) => match QueueStore::open(path) {
                Ok((store, recovered)) => {
                    for item in recovered {
                        items.insert(item.id, item);
                    }
                    Some(store)
                }
                Err(e) => {
                    tracing::warn!(
                        "[queue] store unavailable at {}, running in-memory: {}",
                        path.display(),
                        e
                    );
                    None
                }
            },
            None => None,
        };

        Arc::new(Self {
            config,
            items,
            store,
        })
    }

    /// Append a new item. The item is persisted before this returns, so a
    /// reported id is a durable promise.
    pub fn enqueue(
        &self,
        kind: ItemKind,
        priority: Priority,
        payload: serde_json::Value,
    ) -> Result<Uuid> {
        let item = QueueItem::new(kind, priority, payload);
        let id = item.id;

        self.persist(&QueueRecord::Enqueued { item: item.clone() });
        self.items.insert(id, item);

        tracing::debug!("[queue] enqueued {} ({:?}/{:?})", id, kind, priority);
        Ok(id)
    }

    /// Claim up to `limit` eligible items for one delivery pass, marking
    /// them in-flight. Strict priority order, FIFO within a tier. With
    /// `critical_only` set, lower tiers stay queued (used while sync is
    /// deferred around a predicted outage window).
    pub fn take_eligible(&self, limit: usize, critical_only: bool) -> Vec<QueueItem> {
        let now = Utc::now();
        let mut eligible: Vec<QueueItem> = self
            .items
            .iter()
            .filter(|e| e.is_eligible(now))
            .filter(|e| !critical_only || e.priority == Priority::Critical)
            .map(|e| e.value().clone())
            .collect();

        eligible.sort_by(|a, b| {
            b.priority
                .rank()
                .cmp(&a.priority.rank())
                .then(a.created_at.cmp(&b.created_at))
        });
        eligible.truncate(limit);

        for item in &mut eligible {
            item.status = ItemStatus::InFlight;
            if let Some(mut entry) = self.items.get_mut(&item.id) {
                entry.status = ItemStatus::InFlight;
            }
        }
        eligible
    }

    /// Confirmed delivery: the item is gone for good.
    pub fn mark_delivered(&self, id: Uuid) -> Result<()> {
        if self.items.remove(&id).is_none() {
            return Err(DriftlessError::ItemNotFound(id.to_string()));
        }
        self.persist(&QueueRecord::Delivered { id });
        self.maybe_compact();
        Ok(())
    }

    /// Failed push: back off and retry, or dead-letter past the ceiling.
    /// Returns the item's resulting status.
    pub fn mark_failed(&self, id: Uuid) -> Result<ItemStatus> {
        let (record, extra, status) = {
            let mut entry = self
                .items
                .get_mut(&id)
                .ok_or_else(|| DriftlessError::ItemNotFound(id.to_string()))?;

            entry.attempts += 1;
            let now = Utc::now();
            entry.next_eligible_at = now
                + backoff(
                    entry.attempts,
                    self.config.backoff_base_secs,
                    self.config.backoff_cap_secs,
                );

            let failed = QueueRecord::Failed {
                id,
                attempts: entry.attempts,
                next_eligible_at: entry.next_eligible_at,
            };

            if entry.attempts >= self.config.max_attempts {
                entry.status = ItemStatus::Dead;
                tracing::warn!(
                    "[queue] item {} dead after {} attempts",
                    id,
                    entry.attempts
                );
                (failed, Some(QueueRecord::Dead { id }), ItemStatus::Dead)
            } else {
                entry.status = ItemStatus::Pending;
                (failed, None, ItemStatus::Pending)
            }
        };

        self.persist(&record);
        if let Some(dead) = extra {
            self.persist(&dead);
        }
        Ok(status)
    }

    /// Revert an in-flight item to pending without charging an attempt.
    /// Used when a drain pass is abandoned (shutdown) rather than failed.
    pub fn release(&self, id: Uuid) {
        if let Some(mut entry) = self.items.get_mut(&id) {
            if entry.status == ItemStatus::InFlight {
                entry.status = ItemStatus::Pending;
            }
        }
    }

    /// Items that exhausted their delivery attempts, for operator
    /// inspection. They are never retried and never silently dropped.
    pub fn dead_letters(&self) -> Vec<QueueItem> {
        self.items
            .iter()
            .filter(|e| e.status == ItemStatus::Dead)
            .map(|e| e.value().clone())
            .collect()
    }

    /// Remove dead-lettered items after inspection. Returns how many.
    pub fn purge_dead(&self) -> usize {
        let dead: Vec<Uuid> = self
            .items
            .iter()
            .filter(|e| e.status == ItemStatus::Dead)
            .map(|e| e.id)
            .collect();
        for id in &dead {
            self.items.remove(id);
            self.persist(&QueueRecord::Purged { id: *id });
        }
        if !dead.is_empty() {
            tracing::info!("[queue] purged {} dead items", dead.len());
        }
        dead.len()
    }

    pub fn get(&self, id: Uuid) -> Option<QueueItem> {
        self.items.get(&id).map(|e| e.value().clone())
    }

    pub fn stats(&self) -> QueueStats {
        let mut stats = QueueStats {
            pending: 0,
            in_flight: 0,
            dead: 0,
            total: 0,
        };
        for entry in self.items.iter() {
            stats.total += 1;
            match entry.status {
                ItemStatus::Pending => stats.pending += 1,
                ItemStatus::InFlight => stats.in_flight += 1,
                ItemStatus::Dead => stats.dead += 1,
                ItemStatus::Delivered => {}
            }
        }
        stats
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    fn persist(&self, record: &QueueRecord) {
        if let Some(ref store) = self.store {
            if let Err(e) = store.append(record) {
                tracing::warn!("[queue] persist failed, continuing in-memory: {}", e);
            }
        }
    }

    fn maybe_compact(&self) {
        let Some(ref store) = self.store else { return };
        if !store.should_compact(self.items.len()) {
            return;
        }
        let items: Vec<QueueItem> = self.items.iter().map(|e| e.value().clone()).collect();
        if let Err(e) = store.compact(&items) {
            tracing::warn!("[queue] compaction failed: {}", e);
        }
    }
}
