//! Recovery engine: when the monitor says the link is bad (or about to be),
//! try remediation strategies matched to the suspected cause instead of just
//! waiting for the outage to pass.

pub mod history;
pub mod strategy;

pub use history::{RecoveryHistory, RecoveryOutcome, RecoveryRecord, StrategyAttempt};
pub use strategy::{
    default_strategies, NetworkControls, RecoveryContext, RecoveryStrategy, StrategyOutcome,
};

use serde::Serialize;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;
use tokio::sync::Notify;

use crate::error::{DriftlessError, Result};
use crate::monitor::{ConnectivityMonitor, LinkEvent};
use crate::queue::ReconcilerControls;
use crate::types::Cause;

#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    pub enabled: bool,
    /// React to degraded-link events before the link is confirmed down.
    pub proactive_enabled: bool,
    /// Strategies tried per episode, after cause filtering and reordering.
    pub max_attempts: u32,
    /// Minimum gap between episodes.
    pub cooldown_secs: u64,
    /// Per-strategy attempt timeout (ms); a hung strategy counts as failed.
    pub strategy_timeout_ms: u64,
    /// Base delay for wait-and-reprobe (ms).
    pub reprobe_delay_ms: u64,
    /// How long scheduled-outage deferral holds non-critical sync (seconds).
    pub defer_window_secs: u64,
    /// Strategy names switched off by the operator.
    pub disabled_strategies: HashSet<String>,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            proactive_enabled: true,
            max_attempts: 3,
            cooldown_secs: 60,
            strategy_timeout_ms: 30_000,
            reprobe_delay_ms: 2_000,
            defer_window_secs: 1_800,
            disabled_strategies: HashSet::new(),
        }
    }
}

impl RecoveryConfig {
    /// Load config from environment variables with sensible defaults.
    pub fn from_env() -> Self {
        Self {
            enabled: std::env::var("DRIFTLESS_RECOVERY_ENABLED")
                .map(|v| v != "false" && v != "0")
                .unwrap_or(true),
            proactive_enabled: std::env::var("DRIFTLESS_RECOVERY_PROACTIVE")
                .map(|v| v != "false" && v != "0")
                .unwrap_or(true),
            max_attempts: std::env::var("DRIFTLESS_RECOVERY_MAX_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3),
            cooldown_secs: std::env::var("DRIFTLESS_RECOVERY_COOLDOWN_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(60),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    Idle,
    Evaluating,
    Attempting,
    Cooldown,
}

/// How an episode was started. Manual triggers skip the proactive risk
/// threshold but still respect cooldown and the attempt bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Reactive,
    Proactive,
    Manual,
}

struct EngineMeta {
    state: EngineState,
    last_episode_end: Option<Instant>,
    episodes: u32,
}

pub struct RecoveryEngine {
    config: RwLock<RecoveryConfig>,
    strategies: Vec<Arc<dyn RecoveryStrategy>>,
    history: Mutex<RecoveryHistory>,
    meta: Mutex<EngineMeta>,
    /// Serializes episodes; an episode in progress makes a second trigger a
    /// no-op rather than a queued duplicate.
    episode_lock: tokio::sync::Mutex<()>,
    monitor: Arc<ConnectivityMonitor>,
    controls: Arc<ReconcilerControls>,
    drain_guard: Arc<tokio::sync::Mutex<()>>,
    net: Arc<NetworkControls>,
    shutdown: Notify,
}

impl RecoveryEngine {
    pub fn new(
        config: RecoveryConfig,
        monitor: Arc<ConnectivityMonitor>,
        controls: Arc<ReconcilerControls>,
        drain_guard: Arc<tokio::sync::Mutex<()>>,
        net: Arc<NetworkControls>,
    ) -> Arc<Self> {
        Self::with_strategies(config, monitor, controls, drain_guard, net, default_strategies())
    }

    pub fn with_strategies(
        config: RecoveryConfig,
        monitor: Arc<ConnectivityMonitor>,
        controls: Arc<ReconcilerControls>,
        drain_guard: Arc<tokio::sync::Mutex<()>>,
        net: Arc<NetworkControls>,
        strategies: Vec<Arc<dyn RecoveryStrategy>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config: RwLock::new(config),
            strategies,
            history: Mutex::new(RecoveryHistory::new(256)),
            meta: Mutex::new(EngineMeta {
                state: EngineState::Idle,
                last_episode_end: None,
                episodes: 0,
            }),
            episode_lock: tokio::sync::Mutex::new(()),
            monitor,
            controls,
            drain_guard,
            net,
            shutdown: Notify::new(),
        })
    }

    /// Replace the runtime configuration (operator surface).
    pub fn configure(&self, config: RecoveryConfig) {
        *self.config.write().unwrap() = config;
    }

    pub fn state(&self) -> EngineState {
        let meta = self.meta.lock().unwrap();
        if meta.state == EngineState::Cooldown {
            let cooldown =
                std::time::Duration::from_secs(self.config.read().unwrap().cooldown_secs);
            if let Some(end) = meta.last_episode_end {
                if end.elapsed() >= cooldown {
                    return EngineState::Idle;
                }
            }
        }
        meta.state
    }

    pub fn history(&self) -> Vec<RecoveryRecord> {
        self.history.lock().unwrap().records()
    }

    /// Operator-invoked recovery. Bypasses the proactive risk threshold but
    /// still honors cooldown and the per-episode attempt bound.
    pub async fn trigger(&self, cause: Cause, reason: &str) -> Result<RecoveryRecord> {
        tracing::info!("[recovery] manual trigger ({}): {}", cause, reason);
        self.run_episode(cause, Trigger::Manual).await
    }

    /// Background listener: reacts to offline transitions and (when
    /// enabled) to degraded-link warnings. Runs until `shutdown()`.
    pub async fn run_listener(self: Arc<Self>) {
        let mut events = self.monitor.subscribe();
        loop {
            tokio::select! {
                event = events.recv() => {
                    match event {
                        Ok(LinkEvent::Offline { cause }) => {
                            if let Err(e) = self.run_episode(cause, Trigger::Reactive).await {
                                tracing::debug!("[recovery] reactive episode skipped: {}", e);
                            }
                        }
                        Ok(LinkEvent::Degraded { cause, risk_score }) => {
                            let proactive = self.config.read().unwrap().proactive_enabled;
                            if proactive {
                                tracing::info!(
                                    "[recovery] proactive episode at risk {:.2}",
                                    risk_score
                                );
                                if let Err(e) = self.run_episode(cause, Trigger::Proactive).await {
                                    tracing::debug!(
                                        "[recovery] proactive episode skipped: {}",
                                        e
                                    );
                                }
                            }
                        }
                        Ok(LinkEvent::Online) => {}
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            tracing::warn!("[recovery] listener lagged {} events", n);
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
                _ = self.shutdown.notified() => {
                    tracing::info!("[recovery] listener shutting down");
                    break;
                }
            }
        }
    }

    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    async fn run_episode(&self, cause: Cause, trigger: Trigger) -> Result<RecoveryRecord> {
        let config = self.config.read().unwrap().clone();
        if !config.enabled {
            return Err(DriftlessError::RecoveryDisabled);
        }

        let Ok(_episode) = self.episode_lock.try_lock() else {
            return Err(DriftlessError::RecoveryCooldown { remaining_ms: 0 });
        };

        // Cooldown applies to every trigger kind, manual included.
        let episode_number = {
            let mut meta = self.meta.lock().unwrap();
            if let Some(end) = meta.last_episode_end {
                let cooldown = std::time::Duration::from_secs(config.cooldown_secs);
                let elapsed = end.elapsed();
                if elapsed < cooldown {
                    return Err(DriftlessError::RecoveryCooldown {
                        remaining_ms: (cooldown - elapsed).as_millis() as u64,
                    });
                }
            }
            meta.state = EngineState::Evaluating;
            meta.episodes += 1;
            meta.episodes
        };

        let ordered = self.plan(cause, &config);
        if ordered.is_empty() {
            tracing::warn!("[recovery] no strategy applicable to {}", cause);
        }

        let started = Instant::now();
        let ctx = RecoveryContext {
            cause,
            monitor: Arc::clone(&self.monitor),
            controls: Arc::clone(&self.controls),
            drain_guard: Arc::clone(&self.drain_guard),
            net: Arc::clone(&self.net),
            reprobe_delay_ms: config.reprobe_delay_ms,
            defer_window_secs: config.defer_window_secs,
        };

        {
            let mut meta = self.meta.lock().unwrap();
            meta.state = EngineState::Attempting;
        }

        let mut tried = Vec::new();
        let mut recovered = false;
        for strategy in &ordered {
            tracing::info!("[recovery] trying {} for {}", strategy.name(), cause);
            let timeout = tokio::time::Duration::from_millis(config.strategy_timeout_ms);
            let outcome = match tokio::time::timeout(timeout, strategy.attempt(&ctx)).await {
                Ok(outcome) => outcome,
                Err(_) => StrategyOutcome {
                    action: "timeout".into(),
                    detail: format!("strategy hung past {} ms", config.strategy_timeout_ms),
                    applied: false,
                },
            };

            // Only an applied change is worth burning a probe on.
            let verified = outcome.applied && self.monitor.force_probe().await;
            tried.push(StrategyAttempt {
                strategy: strategy.name().to_string(),
                action: outcome.action,
                detail: outcome.detail,
                success: verified,
            });
            if verified {
                recovered = true;
                break;
            }
        }

        let record = RecoveryRecord {
            timestamp: chrono::Utc::now(),
            cause,
            is_proactive: trigger == Trigger::Proactive,
            attempt_number: episode_number,
            strategies_tried: tried,
            outcome: if recovered {
                RecoveryOutcome::Success
            } else {
                RecoveryOutcome::Failure
            },
            duration_ms: started.elapsed().as_millis() as u64,
        };

        self.history.lock().unwrap().append(record.clone());
        {
            let mut meta = self.meta.lock().unwrap();
            meta.state = EngineState::Cooldown;
            meta.last_episode_end = Some(Instant::now());
        }

        if recovered {
            tracing::info!("[recovery] link restored after {} ms", record.duration_ms);
        } else {
            // The monitor's offline state stays authoritative; the node
            // keeps serving from cache and queueing for later sync.
            tracing::warn!(
                "[recovery] all strategies exhausted for {}, staying degraded",
                cause
            );
        }

        Ok(record)
    }

    /// Applicable strategies for a cause, minus operator-disabled ones,
    /// reordered by historical success and capped at `max_attempts`.
    fn plan(&self, cause: Cause, config: &RecoveryConfig) -> Vec<Arc<dyn RecoveryStrategy>> {
        let applicable: Vec<Arc<dyn RecoveryStrategy>> = self
            .strategies
            .iter()
            .filter(|s| s.handles(cause))
            .filter(|s| !config.disabled_strategies.contains(s.name()))
            .cloned()
            .collect();

        let names: Vec<String> = applicable.iter().map(|s| s.name().to_string()).collect();
        let ordered_names = self.history.lock().unwrap().order_for(cause, names);

        let mut ordered: Vec<Arc<dyn RecoveryStrategy>> = ordered_names
            .iter()
            .filter_map(|name| {
                applicable
                    .iter()
                    .find(|s| s.name() == name.as_str())
                    .cloned()
            })
            .collect();
        ordered.truncate(config.max_attempts as usize);
        ordered
    }
}
