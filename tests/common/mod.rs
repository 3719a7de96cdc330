//! Shared helpers for integration tests: a scripted probe, a scripted
//! central service, and tracing setup.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use driftless::error::{DriftlessError, Result};
use driftless::monitor::{Probe, ProbeFailure, ProbeReport};
use driftless::queue::{CentralService, PushAck, QueueItem};
use driftless::types::CanonicalUpdate;

pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Probe whose outcomes are scripted; succeeds once the script runs dry.
pub struct ScriptedProbe {
    script: Mutex<VecDeque<ProbeReport>>,
}

impl ScriptedProbe {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
        })
    }

    pub fn push_success(&self) {
        self.script
            .lock()
            .unwrap()
            .push_back(ProbeReport::success(Duration::from_millis(40)));
    }

    pub fn push_failures(&self, failure: ProbeFailure, count: usize) {
        let mut script = self.script.lock().unwrap();
        for _ in 0..count {
            script.push_back(ProbeReport::failed(failure, Duration::from_millis(0)));
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
            .unwrap_or_else(|| ProbeReport::success(Duration::from_millis(40)))
    }
}

/// In-process central service with idempotent delivery semantics: every
/// pushed id is remembered, redelivery acks with `duplicate`. Failures and
/// canonical updates are scripted per id.
pub struct MockCentral {
    seen: Mutex<HashSet<Uuid>>,
    fail_ids: Mutex<HashSet<Uuid>>,
    canonical_by_id: Mutex<HashMap<Uuid, CanonicalUpdate>>,
    push_log: Mutex<Vec<Uuid>>,
}

impl MockCentral {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            seen: Mutex::new(HashSet::new()),
            fail_ids: Mutex::new(HashSet::new()),
            canonical_by_id: Mutex::new(HashMap::new()),
            push_log: Mutex::new(Vec::new()),
        })
    }

    pub fn fail_id(&self, id: Uuid) {
        self.fail_ids.lock().unwrap().insert(id);
    }

    pub fn clear_failures(&self) {
        self.fail_ids.lock().unwrap().clear();
    }

    pub fn canonical_for(&self, id: Uuid, update: CanonicalUpdate) {
        self.canonical_by_id.lock().unwrap().insert(id, update);
    }

    pub fn push_log(&self) -> Vec<Uuid> {
        self.push_log.lock().unwrap().clone()
    }

    pub fn delivered_count(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

#[async_trait]
impl CentralService for MockCentral {
    async fn push(&self, item: &QueueItem) -> Result<PushAck> {
        self.push_log.lock().unwrap().push(item.id);
        // The request reaches the service even when the scripted failure
        // loses the response, mirroring a false-negative timeout.
        let duplicate = !self.seen.lock().unwrap().insert(item.id);
        if self.fail_ids.lock().unwrap().contains(&item.id) {
            return Err(DriftlessError::Remote("scripted failure".into()));
        }
        Ok(PushAck {
            id: item.id,
            duplicate,
            canonical: self.canonical_by_id.lock().unwrap().remove(&item.id),
        })
    }
}
