/// Monitor + recovery engine working together: cause classification drives
/// strategy selection, a verified fix brings the link back, cooldown keeps
/// the engine from thrashing.
use driftless::monitor::{ConnectivityMonitor, LinkPhase, MonitorConfig, ProbeFailure};
use driftless::queue::ReconcilerControls;
use driftless::recovery::{NetworkControls, RecoveryConfig, RecoveryEngine, RecoveryOutcome};
use driftless::types::Cause;
use driftless::DriftlessError;
use std::sync::Arc;
use std::time::Duration;

mod common;
use common::{init_tracing, ScriptedProbe};

fn engine_for(
    monitor: &Arc<ConnectivityMonitor>,
    config: RecoveryConfig,
) -> Arc<RecoveryEngine> {
    RecoveryEngine::new(
        config,
        Arc::clone(monitor),
        ReconcilerControls::new(32, 4),
        Arc::new(tokio::sync::Mutex::new(())),
        NetworkControls::new(
            vec!["system".into(), "1.1.1.1".into(), "8.8.8.8".into()],
            vec![],
        ),
    )
}

#[tokio::test]
async fn dns_outage_recovers_through_dns_strategy() {
    init_tracing();
    let probe = ScriptedProbe::new();
    let monitor = ConnectivityMonitor::new(
        Arc::clone(&probe) as Arc<_>,
        MonitorConfig {
            failure_threshold: 5,
            ..Default::default()
        },
    );
    let engine = engine_for(
        &monitor,
        RecoveryConfig {
            cooldown_secs: 0,
            reprobe_delay_ms: 1,
            ..Default::default()
        },
    );
    let listener = tokio::spawn(Arc::clone(&engine).run_listener());
    tokio::time::sleep(Duration::from_millis(20)).await;

    // Five consecutive name-resolution failures: offline fires at the
    // debounce threshold with the dns cause attached.
    probe.push_failures(ProbeFailure::Dns, 5);
    for _ in 0..5 {
        monitor.force_probe().await;
    }
    assert_eq!(monitor.status().phase, LinkPhase::Offline);
    assert_eq!(monitor.status().suspected_cause, Some(Cause::Dns));

    // The listener runs an episode: dns-failover is the applicable
    // strategy, the verification re-probe succeeds (script exhausted), and
    // the monitor flips back online.
    tokio::time::timeout(Duration::from_secs(3), async {
        while engine.history().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("recovery episode should run");

    let history = engine.history();
    let record = &history[0];
    assert_eq!(record.cause, Cause::Dns);
    assert_eq!(record.outcome, RecoveryOutcome::Success);
    assert_eq!(record.strategies_tried[0].strategy, "dns-failover");
    assert!(record.strategies_tried[0].success);
    assert!(!record.is_proactive);

    assert!(monitor.status().online, "next probe reports online");

    engine.shutdown();
    let _ = listener.await;
}

#[tokio::test]
async fn manual_trigger_respects_cooldown() {
    init_tracing();
    let probe = ScriptedProbe::new();
    let monitor = ConnectivityMonitor::new(Arc::clone(&probe) as Arc<_>, MonitorConfig::default());
    let engine = engine_for(
        &monitor,
        RecoveryConfig {
            cooldown_secs: 3600,
            reprobe_delay_ms: 1,
            ..Default::default()
        },
    );

    let record = engine.trigger(Cause::Dns, "operator request").await.unwrap();
    assert_eq!(record.outcome, RecoveryOutcome::Success);

    // A second manual trigger inside the cooldown window is refused.
    let blocked = engine.trigger(Cause::Dns, "again").await;
    assert!(matches!(
        blocked,
        Err(DriftlessError::RecoveryCooldown { .. })
    ));
}

#[tokio::test]
async fn proactive_episode_runs_on_degraded_link() {
    init_tracing();
    let probe = ScriptedProbe::new();
    // Loss pattern that keeps the link online (never 10 consecutive
    // failures) while the failure ratio pushes risk over the threshold.
    for _ in 0..8 {
        probe.push_failures(ProbeFailure::Timeout, 2);
        probe.push_success();
    }
    let monitor = ConnectivityMonitor::new(
        Arc::clone(&probe) as Arc<_>,
        MonitorConfig {
            failure_threshold: 10,
            risk_threshold: 0.3,
            ..Default::default()
        },
    );
    let engine = engine_for(
        &monitor,
        RecoveryConfig {
            cooldown_secs: 0,
            reprobe_delay_ms: 1,
            ..Default::default()
        },
    );
    let listener = tokio::spawn(Arc::clone(&engine).run_listener());
    tokio::time::sleep(Duration::from_millis(20)).await;

    for _ in 0..24 {
        monitor.force_probe().await;
    }

    tokio::time::timeout(Duration::from_secs(3), async {
        while engine.history().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("proactive episode should run");

    let record = &engine.history()[0];
    assert!(record.is_proactive, "episode should be marked proactive");
    assert!(monitor.status().online, "link never went offline");

    engine.shutdown();
    let _ = listener.await;
}

#[tokio::test]
async fn disabled_proactive_recovery_stays_idle() {
    init_tracing();
    let probe = ScriptedProbe::new();
    for _ in 0..8 {
        probe.push_failures(ProbeFailure::Timeout, 2);
        probe.push_success();
    }
    let monitor = ConnectivityMonitor::new(
        Arc::clone(&probe) as Arc<_>,
        MonitorConfig {
            failure_threshold: 10,
            risk_threshold: 0.3,
            ..Default::default()
        },
    );
    let engine = engine_for(
        &monitor,
        RecoveryConfig {
            proactive_enabled: false,
            cooldown_secs: 0,
            reprobe_delay_ms: 1,
            ..Default::default()
        },
    );
    let listener = tokio::spawn(Arc::clone(&engine).run_listener());
    tokio::time::sleep(Duration::from_millis(20)).await;

    for _ in 0..24 {
        monitor.force_probe().await;
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(engine.history().is_empty(), "no episode without proactive");

    engine.shutdown();
    let _ = listener.await;
}
