//! Connectivity monitor: periodically probes the central service, debounces
//! flapping, classifies why the link is bad, and publishes online/offline
//! transitions to subscribers.

pub mod classifier;
pub mod probe;

pub use probe::{Probe, ProbeFailure, ProbeOutcome, ProbeReport};

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::{broadcast, Notify};

use crate::types::Cause;

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Seconds between scheduled probes.
    pub probe_interval_secs: u64,
    /// Per-probe timeout (milliseconds); a timed-out probe is a failure.
    pub probe_timeout_ms: u64,
    /// Consecutive failures required before flipping offline. Debounces
    /// one-off probe losses so the state does not flap.
    pub failure_threshold: u32,
    /// Probe reports kept for classification and risk scoring.
    pub window_size: usize,
    /// Risk score at which a degraded-link event fires.
    pub risk_threshold: f64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            probe_interval_secs: 15,
            probe_timeout_ms: 5_000,
            failure_threshold: 3,
            window_size: 120,
            risk_threshold: 0.6,
        }
    }
}

impl MonitorConfig {
    /// Load config from environment variables with sensible defaults.
    pub fn from_env() -> Self {
        Self {
            probe_interval_secs: std::env::var("DRIFTLESS_PROBE_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(15),
            probe_timeout_ms: std::env::var("DRIFTLESS_PROBE_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5_000),
            failure_threshold: std::env::var("DRIFTLESS_PROBE_FAILURE_THRESHOLD")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3),
            window_size: 120,
            risk_threshold: std::env::var("DRIFTLESS_RISK_THRESHOLD")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(0.6),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LinkPhase {
    Unknown,
    Online,
    Offline,
}

/// Snapshot of link health. Mutated only by the monitor; everything else
/// reads a clone or subscribes to events.
#[derive(Debug, Clone, Serialize)]
pub struct LinkState {
    pub online: bool,
    pub phase: LinkPhase,
    pub last_online_at: Option<DateTime<Utc>>,
    pub last_offline_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub suspected_cause: Option<Cause>,
    pub risk_score: f64,
}

impl LinkState {
    fn initial() -> Self {
        Self {
            online: false,
            phase: LinkPhase::Unknown,
            last_online_at: None,
            last_offline_at: None,
            consecutive_failures: 0,
            suspected_cause: None,
            risk_score: 0.0,
        }
    }
}

#[derive(Debug, Clone)]
pub enum LinkEvent {
    Online,
    Offline { cause: Cause },
    /// The link still works but the risk score crossed the configured
    /// threshold; proactive recovery may act on it.
    Degraded { risk_score: f64, cause: Cause },
}

pub struct ConnectivityMonitor {
    config: MonitorConfig,
    probe: Arc<dyn Probe>,
    state: RwLock<LinkState>,
    window: Mutex<VecDeque<ProbeReport>>,
    events: broadcast::Sender<LinkEvent>,
    risk_latched: AtomicBool,
    check_now: Notify,
    shutdown: Notify,
}

impl ConnectivityMonitor {
    pub fn new(probe: Arc<dyn Probe>, config: MonitorConfig) -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            config,
            probe,
            state: RwLock::new(LinkState::initial()),
            window: Mutex::new(VecDeque::new()),
            events,
            risk_latched: AtomicBool::new(false),
            check_now: Notify::new(),
            shutdown: Notify::new(),
        })
    }

    pub fn status(&self) -> LinkState {
        self.state.read().unwrap().clone()
    }

    /// Subscribe to link transitions. Handlers run on the subscriber's own
    /// task, so a slow consumer never delays the probe timer.
    pub fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.events.subscribe()
    }

    /// Ask the probe loop to run a check on its next wakeup.
    pub fn check_now(&self) {
        self.check_now.notify_one();
    }

    /// Run one probe immediately and apply the transition. Returns whether
    /// the probe succeeded. Used by the recovery engine to verify a
    /// remediation attempt.
    pub async fn force_probe(&self) -> bool {
        self.probe_once().await
    }

    /// Background probe loop. Runs until `shutdown()`.
    pub async fn run_probe_loop(self: Arc<Self>) {
        let interval = tokio::time::Duration::from_secs(self.config.probe_interval_secs);
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await; // skip the first immediate tick

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.probe_once().await;
                }
                _ = self.check_now.notified() => {
                    self.probe_once().await;
                }
                _ = self.shutdown.notified() => {
                    tracing::info!("[monitor] probe loop shutting down");
                    break;
                }
            }
        }
    }

    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    async fn probe_once(&self) -> bool {
        let timeout = tokio::time::Duration::from_millis(self.config.probe_timeout_ms);
        let report = match tokio::time::timeout(timeout, self.probe.probe()).await {
            Ok(report) => report,
            Err(_) => ProbeReport::failed(
                ProbeFailure::Timeout,
                std::time::Duration::from_millis(self.config.probe_timeout_ms),
            ),
        };

        let (risk, cause) = {
            let mut window = self.window.lock().unwrap();
            window.push_back(report);
            while window.len() > self.config.window_size {
                window.pop_front();
            }
            let samples: Vec<ProbeReport> = window.iter().copied().collect();
            (classifier::risk_score(&samples), classifier::classify(&samples))
        };

        if report.is_success() {
            self.apply_success(risk)
        } else {
            self.apply_failure(risk, cause);
            false
        }
    }

    fn apply_success(&self, risk: f64) -> bool {
        let event = {
            let mut state = self.state.write().unwrap();
            state.consecutive_failures = 0;
            state.risk_score = risk;
            if state.phase != LinkPhase::Online {
                state.phase = LinkPhase::Online;
                state.online = true;
                state.last_online_at = Some(Utc::now());
                state.suspected_cause = None;
                Some(LinkEvent::Online)
            } else {
                None
            }
        };

        if let Some(event) = event {
            tracing::info!("[monitor] link is online");
            self.risk_latched.store(false, Ordering::SeqCst);
            let _ = self.events.send(event);
        } else {
            self.maybe_warn_degraded(risk);
        }
        true
    }

    fn apply_failure(&self, risk: f64, cause: Cause) {
        let event = {
            let mut state = self.state.write().unwrap();
            state.consecutive_failures += 1;
            state.risk_score = risk;
            let over_threshold = state.consecutive_failures >= self.config.failure_threshold;
            if state.phase != LinkPhase::Offline && over_threshold {
                state.phase = LinkPhase::Offline;
                state.online = false;
                state.last_offline_at = Some(Utc::now());
                state.suspected_cause = Some(cause);
                Some(LinkEvent::Offline { cause })
            } else {
                None
            }
        };

        if let Some(event) = event {
            tracing::warn!("[monitor] link is offline, suspected cause: {}", cause);
            let _ = self.events.send(event);
        }
    }

    /// Fire a degraded event once per risk excursion while still online.
    fn maybe_warn_degraded(&self, risk: f64) {
        if risk >= self.config.risk_threshold {
            if !self.risk_latched.swap(true, Ordering::SeqCst) {
                let cause = {
                    let window = self.window.lock().unwrap();
                    let samples: Vec<ProbeReport> = window.iter().copied().collect();
                    classifier::classify(&samples)
                };
                tracing::warn!(
                    "[monitor] link degraded, risk {:.2}, suspected cause: {}",
                    risk,
                    cause
                );
                let _ = self.events.send(LinkEvent::Degraded {
                    risk_score: risk,
                    cause,
                });
            }
        } else if risk < self.config.risk_threshold * 0.8 {
            // Hysteresis so the latch does not chatter around the threshold.
            self.risk_latched.store(false, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use async_trait::async_trait;

    /// Probe whose outcomes are scripted up front; repeats the last script
    /// entry once exhausted, or succeeds if never scripted.
    pub struct ScriptedProbe {
        script: Mutex<VecDeque<ProbeReport>>,
        fallback: ProbeReport,
    }

    impl ScriptedProbe {
        pub fn new() -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(VecDeque::new()),
                fallback: ProbeReport::success(std::time::Duration::from_millis(40)),
            })
        }

        pub fn push(&self, report: ProbeReport) {
            self.script.lock().unwrap().push_back(report);
        }

        pub fn push_failures(&self, failure: ProbeFailure, count: usize) {
            for _ in 0..count {
                self.push(ProbeReport::failed(
                    failure,
                    std::time::Duration::from_millis(0),
                ));
            }
        }
    }

    #[async_trait]
    impl Probe for ScriptedProbe {
        async fn probe(&self) -> ProbeReport {
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(self.fallback)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::ScriptedProbe;
    use super::*;
    use std::time::Duration;

    fn monitor_with(probe: Arc<ScriptedProbe>, threshold: u32) -> Arc<ConnectivityMonitor> {
        ConnectivityMonitor::new(
            probe,
            MonitorConfig {
                failure_threshold: threshold,
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn test_single_failure_does_not_flip_state() {
        let probe = ScriptedProbe::new();
        probe.push(ProbeReport::success(Duration::from_millis(40)));
        probe.push_failures(ProbeFailure::Timeout, 1);
        let monitor = monitor_with(probe, 3);

        monitor.force_probe().await;
        assert_eq!(monitor.status().phase, LinkPhase::Online);

        monitor.force_probe().await;
        let state = monitor.status();
        assert_eq!(state.phase, LinkPhase::Online, "debounce must hold");
        assert_eq!(state.consecutive_failures, 1);
    }

    #[tokio::test]
    async fn test_sustained_failures_flip_offline_with_cause() {
        let probe = ScriptedProbe::new();
        probe.push(ProbeReport::success(Duration::from_millis(40)));
        probe.push_failures(ProbeFailure::Dns, 3);
        let monitor = monitor_with(probe, 3);
        let mut events = monitor.subscribe();

        for _ in 0..4 {
            monitor.force_probe().await;
        }

        let state = monitor.status();
        assert_eq!(state.phase, LinkPhase::Offline);
        assert!(!state.online);
        assert_eq!(state.suspected_cause, Some(Cause::Dns));
        assert!(state.last_offline_at.is_some());

        // First event is the initial Online, then the Offline transition.
        assert!(matches!(events.try_recv(), Ok(LinkEvent::Online)));
        match events.try_recv() {
            Ok(LinkEvent::Offline { cause }) => assert_eq!(cause, Cause::Dns),
            other => panic!("expected offline event, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_one_success_flips_back_online() {
        let probe = ScriptedProbe::new();
        probe.push_failures(ProbeFailure::Connect, 3);
        probe.push(ProbeReport::success(Duration::from_millis(40)));
        let monitor = monitor_with(probe, 3);
        let mut events = monitor.subscribe();

        for _ in 0..3 {
            monitor.force_probe().await;
        }
        assert_eq!(monitor.status().phase, LinkPhase::Offline);

        monitor.force_probe().await;
        let state = monitor.status();
        assert_eq!(state.phase, LinkPhase::Online);
        assert_eq!(state.consecutive_failures, 0);
        assert!(state.last_online_at.is_some());

        assert!(matches!(events.try_recv(), Ok(LinkEvent::Offline { .. })));
        assert!(matches!(events.try_recv(), Ok(LinkEvent::Online)));
    }

    #[tokio::test]
    async fn test_degraded_event_fires_once_per_excursion() {
        let probe = ScriptedProbe::new();
        // Interleave so consecutive failures never reach the threshold but
        // the failure ratio drives risk up while staying online.
        for _ in 0..12 {
            probe.push_failures(ProbeFailure::Timeout, 2);
            probe.push(ProbeReport::success(Duration::from_millis(40)));
        }
        let monitor = ConnectivityMonitor::new(
            probe,
            MonitorConfig {
                failure_threshold: 5,
                risk_threshold: 0.4,
                ..Default::default()
            },
        );
        let mut events = monitor.subscribe();

        for _ in 0..36 {
            monitor.force_probe().await;
        }
        assert_eq!(monitor.status().phase, LinkPhase::Online);

        let mut degraded = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, LinkEvent::Degraded { .. }) {
                degraded += 1;
            }
        }
        assert_eq!(degraded, 1, "degraded event must latch, not repeat");
    }
}
