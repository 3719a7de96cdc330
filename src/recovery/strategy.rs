use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::monitor::ConnectivityMonitor;
use crate::queue::ReconcilerControls;
use crate::types::Cause;

/// Link-level knobs the node can actually turn: which resolver and which
/// network interface the transport should prefer. The transport reads these;
/// strategies rotate them.
pub struct NetworkControls {
    resolvers: Vec<String>,
    active_resolver: AtomicUsize,
    interfaces: Vec<String>,
    active_interface: AtomicUsize,
}

impl NetworkControls {
    pub fn new(resolvers: Vec<String>, interfaces: Vec<String>) -> Arc<Self> {
        Arc::new(Self {
            resolvers,
            active_resolver: AtomicUsize::new(0),
            interfaces,
            active_interface: AtomicUsize::new(0),
        })
    }

    pub fn active_resolver(&self) -> Option<&str> {
        self.resolvers
            .get(self.active_resolver.load(Ordering::Relaxed) % self.resolvers.len().max(1))
            .map(|s| s.as_str())
    }

    pub fn active_interface(&self) -> Option<&str> {
        self.interfaces
            .get(self.active_interface.load(Ordering::Relaxed) % self.interfaces.len().max(1))
            .map(|s| s.as_str())
    }

    fn rotate_resolver(&self) -> Option<&str> {
        if self.resolvers.len() < 2 {
            return None;
        }
        let next = (self.active_resolver.load(Ordering::Relaxed) + 1) % self.resolvers.len();
        self.active_resolver.store(next, Ordering::Relaxed);
        Some(self.resolvers[next].as_str())
    }

    fn rotate_interface(&self) -> Option<&str> {
        if self.interfaces.len() < 2 {
            return None;
        }
        let next = (self.active_interface.load(Ordering::Relaxed) + 1) % self.interfaces.len();
        self.active_interface.store(next, Ordering::Relaxed);
        Some(self.interfaces[next].as_str())
    }
}

impl Default for NetworkControls {
    fn default() -> Self {
        Self {
            resolvers: vec![
                "system".to_string(),
                "1.1.1.1".to_string(),
                "8.8.8.8".to_string(),
            ],
            active_resolver: AtomicUsize::new(0),
            interfaces: Vec::new(),
            active_interface: AtomicUsize::new(0),
        }
    }
}

/// Everything a strategy may act on during one attempt.
pub struct RecoveryContext {
    pub cause: Cause,
    pub monitor: Arc<ConnectivityMonitor>,
    pub controls: Arc<ReconcilerControls>,
    pub drain_guard: Arc<tokio::sync::Mutex<()>>,
    pub net: Arc<NetworkControls>,
    /// Base delay for wait-style strategies (ms), jittered.
    pub reprobe_delay_ms: u64,
    /// How long scheduled-outage deferral holds non-critical sync (seconds).
    pub defer_window_secs: u64,
}

/// What one strategy attempt did. `applied` is false when the strategy had
/// nothing to act on (e.g. no alternate interface configured); the engine
/// only re-probes after an applied attempt.
#[derive(Debug, Clone)]
pub struct StrategyOutcome {
    pub action: String,
    pub detail: String,
    pub applied: bool,
}

/// One remediation capability. Strategies declare which causes they can
/// plausibly fix and the engine orders them by historical success.
#[async_trait]
pub trait RecoveryStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn handles(&self, cause: Cause) -> bool;
    async fn attempt(&self, ctx: &RecoveryContext) -> StrategyOutcome;
}

/// Rotate to the next configured DNS resolver.
pub struct DnsFailover;

#[async_trait]
impl RecoveryStrategy for DnsFailover {
    fn name(&self) -> &'static str {
        "dns-failover"
    }

    fn handles(&self, cause: Cause) -> bool {
        matches!(cause, Cause::Dns)
    }

    async fn attempt(&self, ctx: &RecoveryContext) -> StrategyOutcome {
        match ctx.net.rotate_resolver() {
            Some(resolver) => StrategyOutcome {
                action: "switch-resolver".into(),
                detail: format!("switched to resolver {}", resolver),
                applied: true,
            },
            None => StrategyOutcome {
                action: "switch-resolver".into(),
                detail: "no alternate resolver configured".into(),
                applied: false,
            },
        }
    }
}

/// Switch to an alternate network interface. Resetting the link mid-push
/// would corrupt a drain pass, so the switch waits for the drain guard.
pub struct InterfaceFailover;

#[async_trait]
impl RecoveryStrategy for InterfaceFailover {
    fn name(&self) -> &'static str {
        "interface-failover"
    }

    fn handles(&self, cause: Cause) -> bool {
        matches!(cause, Cause::WeakSignal)
    }

    async fn attempt(&self, ctx: &RecoveryContext) -> StrategyOutcome {
        let _drain = ctx.drain_guard.lock().await;
        match ctx.net.rotate_interface() {
            Some(interface) => StrategyOutcome {
                action: "switch-interface".into(),
                detail: format!("switched to interface {}", interface),
                applied: true,
            },
            None => StrategyOutcome {
                action: "switch-interface".into(),
                detail: "no alternate interface configured".into(),
                applied: false,
            },
        }
    }
}

/// Relieve a congested or metered link by shrinking the reconciler's batch
/// size and concurrent pushes.
pub struct ThrottleSync;

#[async_trait]
impl RecoveryStrategy for ThrottleSync {
    fn name(&self) -> &'static str {
        "throttle-sync"
    }

    fn handles(&self, cause: Cause) -> bool {
        matches!(cause, Cause::Congestion | Cause::BandwidthLimit)
    }

    async fn attempt(&self, ctx: &RecoveryContext) -> StrategyOutcome {
        let (batch, concurrency) = ctx.controls.throttle();
        StrategyOutcome {
            action: "throttle-sync".into(),
            detail: format!("batch size {}, concurrency {}", batch, concurrency),
            applied: true,
        }
    }
}

/// Sit out a jittered delay, then let the engine re-probe. The right move
/// when the loss pattern looks like noise rather than a broken path.
pub struct WaitAndReprobe;

#[async_trait]
impl RecoveryStrategy for WaitAndReprobe {
    fn name(&self) -> &'static str {
        "wait-and-reprobe"
    }

    fn handles(&self, cause: Cause) -> bool {
        matches!(cause, Cause::Interference | Cause::Intermittent | Cause::Unknown)
    }

    async fn attempt(&self, ctx: &RecoveryContext) -> StrategyOutcome {
        let jitter = {
            use rand::Rng;
            rand::thread_rng().gen_range(0..=ctx.reprobe_delay_ms / 2)
        };
        let delay = ctx.reprobe_delay_ms + jitter;
        tokio::time::sleep(tokio::time::Duration::from_millis(delay)).await;
        StrategyOutcome {
            action: "wait".into(),
            detail: format!("waited {} ms before re-probe", delay),
            applied: true,
        }
    }
}

/// Push non-critical sync work past a predicted outage window. Critical
/// items keep draining the moment the link returns.
pub struct DeferOutageWindow;

#[async_trait]
impl RecoveryStrategy for DeferOutageWindow {
    fn name(&self) -> &'static str {
        "defer-outage-window"
    }

    fn handles(&self, cause: Cause) -> bool {
        matches!(cause, Cause::ScheduledOutage)
    }

    async fn attempt(&self, ctx: &RecoveryContext) -> StrategyOutcome {
        let until = Utc::now() + chrono::Duration::seconds(ctx.defer_window_secs as i64);
        ctx.controls.defer_noncritical_until(until);
        StrategyOutcome {
            action: "defer-sync".into(),
            detail: format!("non-critical sync deferred until {}", until.to_rfc3339()),
            applied: true,
        }
    }
}

/// The stock strategy set, in registration order. History reorders within a
/// cause once there is data.
pub fn default_strategies() -> Vec<Arc<dyn RecoveryStrategy>> {
    vec![
        Arc::new(DnsFailover),
        Arc::new(InterfaceFailover),
        Arc::new(ThrottleSync),
        Arc::new(WaitAndReprobe),
        Arc::new(DeferOutageWindow),
    ]
}
