use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex, Notify};
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::cache::ResultCache;
use crate::error::{DriftlessError, Result};
use crate::monitor::ConnectivityMonitor;
use crate::types::{CanonicalUpdate, ModelUpdate};
use super::sync_queue::SyncQueue;
use super::QueueItem;

/// The central service as the reconciler sees it: push one item, get an
/// acknowledgment back. The concrete transport lives outside the core.
#[async_trait]
pub trait CentralService: Send + Sync {
    async fn push(&self, item: &QueueItem) -> Result<PushAck>;
}

/// Acknowledgment for one delivered item. `duplicate` marks an id the
/// service had already seen (safe after a false-negative timeout);
/// `canonical` carries any newer artifacts the cloud wants applied locally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushAck {
    pub id: Uuid,
    #[serde(default)]
    pub duplicate: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canonical: Option<CanonicalUpdate>,
}

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Seconds between drain attempts while online.
    pub drain_interval_secs: u64,
    /// Per-push timeout (milliseconds); a timed-out push is a failure for
    /// backoff purposes.
    pub push_timeout_ms: u64,
    /// Default batch size per drain pass.
    pub batch_size: usize,
    /// Default concurrent pushes within a batch.
    pub push_concurrency: usize,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            drain_interval_secs: 30,
            push_timeout_ms: 10_000,
            batch_size: 32,
            push_concurrency: 4,
        }
    }
}

impl ReconcilerConfig {
    /// Load config from environment variables with sensible defaults.
    pub fn from_env() -> Self {
        Self {
            drain_interval_secs: std::env::var("DRIFTLESS_DRAIN_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
            push_timeout_ms: std::env::var("DRIFTLESS_PUSH_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10_000),
            batch_size: std::env::var("DRIFTLESS_DRAIN_BATCH_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(32),
            push_concurrency: std::env::var("DRIFTLESS_PUSH_CONCURRENCY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(4),
        }
    }
}

/// Runtime knobs recovery strategies turn to relieve a congested or metered
/// link: smaller batches, fewer concurrent pushes, and a defer window that
/// holds back non-critical sync.
pub struct ReconcilerControls {
    defaults: (usize, usize),
    batch_size: AtomicUsize,
    push_concurrency: AtomicUsize,
    defer_noncritical_until: std::sync::Mutex<Option<DateTime<Utc>>>,
}

impl ReconcilerControls {
    pub fn new(batch_size: usize, push_concurrency: usize) -> Arc<Self> {
        Arc::new(Self {
            defaults: (batch_size, push_concurrency),
            batch_size: AtomicUsize::new(batch_size),
            push_concurrency: AtomicUsize::new(push_concurrency),
            defer_noncritical_until: std::sync::Mutex::new(None),
        })
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size.load(Ordering::Relaxed).max(1)
    }

    pub fn push_concurrency(&self) -> usize {
        self.push_concurrency.load(Ordering::Relaxed).max(1)
    }

    /// Halve batch size and push concurrency (floor 1). Returns the new
    /// values.
    pub fn throttle(&self) -> (usize, usize) {
        let batch = (self.batch_size() / 2).max(1);
        let conc = (self.push_concurrency() / 2).max(1);
        self.batch_size.store(batch, Ordering::Relaxed);
        self.push_concurrency.store(conc, Ordering::Relaxed);
        (batch, conc)
    }

    pub fn restore_defaults(&self) {
        self.batch_size.store(self.defaults.0, Ordering::Relaxed);
        self.push_concurrency.store(self.defaults.1, Ordering::Relaxed);
        *self.defer_noncritical_until.lock().unwrap() = None;
    }

    /// Hold non-critical items back until the given time.
    pub fn defer_noncritical_until(&self, until: DateTime<Utc>) {
        *self.defer_noncritical_until.lock().unwrap() = Some(until);
    }

    pub fn noncritical_deferred(&self) -> bool {
        let guard = self.defer_noncritical_until.lock().unwrap();
        match *guard {
            Some(until) => Utc::now() < until,
            None => false,
        }
    }
}

/// Background task that drains the sync queue to the central service while
/// the monitor reports the link online, and applies whatever canonical
/// artifacts come back with the acks.
pub struct Reconciler {
    config: ReconcilerConfig,
    queue: Arc<SyncQueue>,
    cache: Arc<ResultCache>,
    central: Arc<dyn CentralService>,
    monitor: Arc<ConnectivityMonitor>,
    controls: Arc<ReconcilerControls>,
    drain_guard: Arc<Mutex<()>>,
    model_updates: watch::Sender<Option<ModelUpdate>>,
    shutdown: Notify,
}

impl Reconciler {
    pub fn new(
        config: ReconcilerConfig,
        queue: Arc<SyncQueue>,
        cache: Arc<ResultCache>,
        central: Arc<dyn CentralService>,
        monitor: Arc<ConnectivityMonitor>,
    ) -> Arc<Self> {
        let controls = ReconcilerControls::new(config.batch_size, config.push_concurrency);
        let (model_updates, _) = watch::channel(None);
        Arc::new(Self {
            config,
            queue,
            cache,
            central,
            monitor,
            controls,
            drain_guard: Arc::new(Mutex::new(())),
            model_updates,
            shutdown: Notify::new(),
        })
    }

    /// Knobs shared with the recovery engine's throttle/defer strategies.
    pub fn controls(&self) -> Arc<ReconcilerControls> {
        Arc::clone(&self.controls)
    }

    /// Guard shared with recovery strategies that reset the link: holding it
    /// means a drain pass is mid-batch and must not be disrupted.
    pub fn drain_guard(&self) -> Arc<Mutex<()>> {
        Arc::clone(&self.drain_guard)
    }

    /// Newest model version announced by the central service, if any.
    pub fn model_updates(&self) -> watch::Receiver<Option<ModelUpdate>> {
        self.model_updates.subscribe()
    }

    /// Background drain loop. Runs until `shutdown()`.
    pub async fn run_drain_loop(self: Arc<Self>) {
        let interval = tokio::time::Duration::from_secs(self.config.drain_interval_secs);
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await; // skip the first immediate tick

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.monitor.status().online {
                        self.drain_once().await;
                    }
                }
                _ = self.shutdown.notified() => {
                    tracing::info!("[reconciler] drain loop shutting down");
                    break;
                }
            }
        }
    }

    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// Drain eligible items until the queue runs dry or a push fails.
    /// Returns (delivered, failed) counts.
    pub async fn drain_once(&self) -> (usize, usize) {
        let _guard = self.drain_guard.lock().await;
        let mut delivered = 0usize;
        let mut failed = 0usize;

        loop {
            let critical_only = self.controls.noncritical_deferred();
            let batch = self
                .queue
                .take_eligible(self.controls.batch_size(), critical_only);
            if batch.is_empty() {
                break;
            }
            tracing::debug!("[reconciler] draining batch of {}", batch.len());

            let mut batch_failed = 0usize;
            for chunk in batch.chunks(self.controls.push_concurrency()) {
                let mut set = JoinSet::new();
                for item in chunk {
                    let central = Arc::clone(&self.central);
                    let timeout_ms = self.config.push_timeout_ms;
                    let item = item.clone();
                    set.spawn(async move {
                        let timeout = tokio::time::Duration::from_millis(timeout_ms);
                        let result = match tokio::time::timeout(timeout, central.push(&item)).await
                        {
                            Ok(result) => result,
                            Err(_) => Err(DriftlessError::PushTimeout(timeout_ms)),
                        };
                        (item.id, result)
                    });
                }
                while let Some(joined) = set.join_next().await {
                    let Ok((id, result)) = joined else { continue };
                    match result {
                        Ok(ack) => {
                            self.apply_ack(id, ack);
                            delivered += 1;
                        }
                        Err(e) => {
                            tracing::warn!("[reconciler] push failed for {}: {}", id, e);
                            if let Err(e) = self.queue.mark_failed(id) {
                                tracing::warn!("[reconciler] mark_failed: {}", e);
                            }
                            failed += 1;
                            batch_failed += 1;
                        }
                    }
                }
            }

            // A failing link is not worth hammering; let the monitor
            // re-evaluate and retry on a later pass.
            if batch_failed > 0 {
                self.monitor.check_now();
                break;
            }
        }

        if delivered > 0 || failed > 0 {
            tracing::info!(
                "[reconciler] drain pass done: {} delivered, {} failed",
                delivered,
                failed
            );
        }
        (delivered, failed)
    }

    fn apply_ack(&self, id: Uuid, ack: PushAck) {
        if ack.duplicate {
            tracing::debug!("[reconciler] {} was already delivered upstream", id);
        }
        if let Err(e) = self.queue.mark_delivered(id) {
            tracing::warn!("[reconciler] mark_delivered: {}", e);
        }

        let Some(canonical) = ack.canonical else {
            return;
        };
        if let Some(ref translation) = canonical.translation {
            self.cache.apply_canonical(translation);
        }
        if let Some(model) = canonical.model {
            tracing::info!(
                "[reconciler] central service announced model {} for {}",
                model.version,
                model.language_pair
            );
            let _ = self.model_updates.send(Some(model));
        }
    }
}
