use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A single connectivity check against the central service.
///
/// Implementations live outside the core (the cloud crate probes an HTTP
/// health endpoint); tests script outcomes directly.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn probe(&self) -> ProbeReport;
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ProbeFailure {
    /// No response inside the probe timeout.
    Timeout,
    /// Name resolution failed.
    Dns,
    /// TCP/TLS connect failed.
    Connect,
    /// The service answered with a non-success status.
    Http(u16),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ProbeOutcome {
    Success,
    Failed(ProbeFailure),
}

/// Outcome plus the diagnostics the classifier feeds on.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ProbeReport {
    pub outcome: ProbeOutcome,
    pub latency: Duration,
    pub at: DateTime<Utc>,
}

impl ProbeReport {
    pub fn success(latency: Duration) -> Self {
        Self {
            outcome: ProbeOutcome::Success,
            latency,
            at: Utc::now(),
        }
    }

    pub fn failed(failure: ProbeFailure, latency: Duration) -> Self {
        Self {
            outcome: ProbeOutcome::Failed(failure),
            latency,
            at: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == ProbeOutcome::Success
    }
}
