//! Durable priority outbox for results pending delivery to the central
//! service, and the reconciler that drains it while the link is up.

pub mod reconciler;
pub mod store;
pub mod sync_queue;

pub use reconciler::{
    CentralService, PushAck, Reconciler, ReconcilerConfig, ReconcilerControls,
};
pub use sync_queue::{QueueConfig, QueueStats, SyncQueue};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What a queued item carries.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum ItemKind {
    TextResult,
    AudioResult,
    ModelUpdateAck,
}

/// Delivery priority. Draining is strict: every `Critical` item goes before
/// any `High` item, and so on; FIFO inside a tier.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical,
    High,
    Medium,
    Low,
}

impl Priority {
    /// Higher rank drains first.
    pub fn rank(&self) -> u8 {
        match self {
            Priority::Critical => 3,
            Priority::High => 2,
            Priority::Medium => 1,
            Priority::Low => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ItemStatus {
    Pending,
    InFlight,
    Delivered,
    Dead,
}

/// One undelivered result. The `id` is minted at enqueue time and doubles as
/// the idempotency key: the central service treats redelivery of a known id
/// as a no-op.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: Uuid,
    pub kind: ItemKind,
    pub priority: Priority,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub attempts: u32,
    pub next_eligible_at: DateTime<Utc>,
    pub status: ItemStatus,
}

impl QueueItem {
    pub fn new(kind: ItemKind, priority: Priority, payload: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            kind,
            priority,
            payload,
            created_at: now,
            attempts: 0,
            next_eligible_at: now,
            status: ItemStatus::Pending,
        }
    }

    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.status == ItemStatus::Pending && self.next_eligible_at <= now
    }
}

/// Exponential backoff with a cap and ±20% jitter so a herd of failed items
/// does not re-align on the same retry instant.
pub fn backoff(attempts: u32, base_secs: u64, cap_secs: u64) -> ChronoDuration {
    let exp = attempts.saturating_sub(1).min(16);
    let raw = base_secs.saturating_mul(1u64 << exp).min(cap_secs);
    let jitter = {
        use rand::Rng;
        let spread = (raw as f64 * 0.2).max(1.0);
        rand::thread_rng().gen_range(-spread..=spread)
    };
    let secs = ((raw as f64 + jitter).max(1.0)) as i64;
    ChronoDuration::seconds(secs)
}
