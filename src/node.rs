//! Thin orchestrator: wires request handling to the cache, inference, and
//! sync queue, and supervises the background tasks (probe loop, drain loop,
//! snapshot loop, recovery listener).

use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::task::JoinHandle;

use crate::cache::{fingerprint, CacheConfig, ResultCache};
use crate::error::Result;
use crate::inference::Inference;
use crate::monitor::{ConnectivityMonitor, MonitorConfig, Probe};
use crate::queue::{
    CentralService, ItemKind, Priority, QueueConfig, Reconciler, ReconcilerConfig, SyncQueue,
};
use crate::recovery::{NetworkControls, RecoveryConfig, RecoveryEngine};
use crate::types::{
    ResponseSource, ResultKind, TranslationRequest, TranslationResponse,
};

/// Aggregate configuration for one edge node.
#[derive(Debug, Clone, Default)]
pub struct EdgeConfig {
    pub cache: CacheConfig,
    pub queue: QueueConfig,
    pub monitor: MonitorConfig,
    pub reconciler: ReconcilerConfig,
    pub recovery: RecoveryConfig,
    /// Resolvers the dns-failover strategy may rotate through.
    pub resolvers: Vec<String>,
    /// Interfaces the interface-failover strategy may rotate through.
    pub interfaces: Vec<String>,
}

impl EdgeConfig {
    /// Load every component config from environment variables.
    pub fn from_env() -> Self {
        Self {
            cache: CacheConfig::from_env(),
            queue: QueueConfig::from_env(),
            monitor: MonitorConfig::from_env(),
            reconciler: ReconcilerConfig::from_env(),
            recovery: RecoveryConfig::from_env(),
            resolvers: list_env("DRIFTLESS_RESOLVERS")
                .unwrap_or_else(|| vec!["system".into(), "1.1.1.1".into(), "8.8.8.8".into()]),
            interfaces: list_env("DRIFTLESS_INTERFACES").unwrap_or_default(),
        }
    }

    /// In-memory config for tests.
    pub fn in_memory() -> Self {
        Self {
            cache: CacheConfig::in_memory(),
            queue: QueueConfig::in_memory(),
            resolvers: vec!["system".into(), "1.1.1.1".into()],
            ..Default::default()
        }
    }
}

fn list_env(key: &str) -> Option<Vec<String>> {
    std::env::var(key).ok().map(|v| {
        v.split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    })
}

pub struct EdgeNode {
    cache: Arc<ResultCache>,
    queue: Arc<SyncQueue>,
    monitor: Arc<ConnectivityMonitor>,
    reconciler: Arc<Reconciler>,
    recovery: Arc<RecoveryEngine>,
    inference: Arc<dyn Inference>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl EdgeNode {
    /// Wire up a node from its external collaborators: the inference
    /// function, the central service transport, and the probe.
    pub fn new(
        config: EdgeConfig,
        inference: Arc<dyn Inference>,
        central: Arc<dyn CentralService>,
        probe: Arc<dyn Probe>,
    ) -> Arc<Self> {
        let cache = ResultCache::new(config.cache);
        let queue = SyncQueue::new(config.queue);
        let monitor = ConnectivityMonitor::new(probe, config.monitor);
        let reconciler = Reconciler::new(
            config.reconciler,
            Arc::clone(&queue),
            Arc::clone(&cache),
            central,
            Arc::clone(&monitor),
        );
        let net = NetworkControls::new(config.resolvers, config.interfaces);
        let recovery = RecoveryEngine::new(
            config.recovery,
            Arc::clone(&monitor),
            reconciler.controls(),
            reconciler.drain_guard(),
            net,
        );

        Arc::new(Self {
            cache,
            queue,
            monitor,
            reconciler,
            recovery,
            inference,
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Spawn the background tasks. Idempotence is the caller's problem;
    /// call it once after construction.
    pub fn start(&self) {
        let mut tasks = self.tasks.lock().unwrap();
        tasks.push(tokio::spawn(Arc::clone(&self.monitor).run_probe_loop()));
        tasks.push(tokio::spawn(Arc::clone(&self.reconciler).run_drain_loop()));
        tasks.push(tokio::spawn(Arc::clone(&self.cache).run_snapshot_loop()));
        tasks.push(tokio::spawn(Arc::clone(&self.recovery).run_listener()));
        tracing::info!("[node] background tasks started");
    }

    /// Serve one translation: cache hit returns immediately; a miss runs
    /// inference once (single-flight), caches the result, and queues it for
    /// sync. Inference failures surface to the caller untouched.
    pub async fn translate(&self, request: &TranslationRequest) -> Result<TranslationResponse> {
        self.translate_prioritized(request, Priority::Medium).await
    }

    pub async fn translate_prioritized(
        &self,
        request: &TranslationRequest,
        priority: Priority,
    ) -> Result<TranslationResponse> {
        let started = Instant::now();
        let fp = fingerprint(request);

        let inference = Arc::clone(&self.inference);
        let (translation, source) = self
            .cache
            .get_or_compute(&fp, ResultKind::Text, || async move {
                inference.infer(request).await
            })
            .await?;

        if source == ResponseSource::Inference {
            let payload = serde_json::json!({
                "fingerprint": fp,
                "request": request,
                "translation": translation,
            });
            self.queue.enqueue(ItemKind::TextResult, priority, payload)?;
        }

        Ok(TranslationResponse {
            translation,
            source,
            processing_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Record a transcription-and-translation produced by the external
    /// audio pipeline: cached with the short audio TTL and queued for sync.
    pub fn record_audio_result(
        &self,
        request: &TranslationRequest,
        translation: crate::types::Translation,
        priority: Priority,
    ) -> Result<uuid::Uuid> {
        let fp = fingerprint(request);
        self.cache.put(&fp, translation.clone(), ResultKind::Audio);
        let payload = serde_json::json!({
            "fingerprint": fp,
            "request": request,
            "translation": translation,
        });
        self.queue.enqueue(ItemKind::AudioResult, priority, payload)
    }

    /// Stop every background task, letting in-flight persistence finish.
    pub async fn shutdown(&self) {
        self.monitor.shutdown();
        self.reconciler.shutdown();
        self.cache.shutdown();
        self.recovery.shutdown();

        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock().unwrap());
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!("[node] background task ended abnormally: {}", e);
            }
        }
        tracing::info!("[node] shut down");
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    pub fn queue(&self) -> &Arc<SyncQueue> {
        &self.queue
    }

    pub fn monitor(&self) -> &Arc<ConnectivityMonitor> {
        &self.monitor
    }

    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    pub fn recovery(&self) -> &Arc<RecoveryEngine> {
        &self.recovery
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::DictionaryInference;
    use crate::monitor::test_support::ScriptedProbe;
    use crate::queue::{ItemStatus, PushAck};
    use async_trait::async_trait;
    use uuid::Uuid;

    struct AckEverything;

    #[async_trait]
    impl CentralService for AckEverything {
        async fn push(&self, item: &crate::queue::QueueItem) -> Result<PushAck> {
            Ok(PushAck {
                id: item.id,
                duplicate: false,
                canonical: None,
            })
        }
    }

    fn node() -> Arc<EdgeNode> {
        EdgeNode::new(
            EdgeConfig::in_memory(),
            Arc::new(DictionaryInference::new()),
            Arc::new(AckEverything),
            ScriptedProbe::new(),
        )
    }

    #[tokio::test]
    async fn test_miss_then_hit_and_one_queued_item() {
        let node = node();
        let request = TranslationRequest::new("fever", "en", "es");

        let first = node.translate(&request).await.unwrap();
        assert_eq!(first.translation.text, "fiebre");
        assert!((first.translation.confidence - 0.9).abs() < 1e-6);
        assert_eq!(first.source, ResponseSource::Inference);

        let second = node.translate(&request).await.unwrap();
        assert_eq!(second.translation.text, "fiebre");
        assert_eq!(second.source, ResponseSource::Cache);

        // Exactly one pending text-result item for the one inference run.
        let stats = node.queue().stats();
        assert_eq!(stats.pending, 1);
        let batch = node.queue().take_eligible(10, false);
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].kind, ItemKind::TextResult);
        assert_eq!(batch[0].status, ItemStatus::InFlight);
    }

    #[tokio::test]
    async fn test_inference_error_not_cached_not_queued() {
        let node = node();
        let request = TranslationRequest::new("hello", "en", "ja");

        assert!(node.translate(&request).await.is_err());
        assert_eq!(node.cache().len(), 0);
        assert!(node.queue().is_empty());
    }

    #[tokio::test]
    async fn test_audio_result_cached_and_queued() {
        let node = node();
        let request = TranslationRequest::new("I need help", "en", "es");
        let translation = crate::types::Translation::new("necesito ayuda", 0.85);

        node.record_audio_result(&request, translation, Priority::High)
            .unwrap();

        let served = node.translate(&request).await.unwrap();
        assert_eq!(served.source, ResponseSource::Cache);
        assert_eq!(served.translation.text, "necesito ayuda");

        let batch = node.queue().take_eligible(10, false);
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].kind, ItemKind::AudioResult);
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let node = node();
        node.start();
        // Shutdown must return promptly with all loops stopped.
        tokio::time::timeout(std::time::Duration::from_secs(5), node.shutdown())
            .await
            .expect("shutdown should not hang");
    }

    #[test]
    fn test_list_env_parsing() {
        std::env::set_var("DRIFTLESS_TEST_LIST", "wlan0, eth0,,ppp0");
        let parsed = list_env("DRIFTLESS_TEST_LIST").unwrap();
        assert_eq!(parsed, vec!["wlan0".to_string(), "eth0".into(), "ppp0".into()]);
        std::env::remove_var("DRIFTLESS_TEST_LIST");
    }
}
