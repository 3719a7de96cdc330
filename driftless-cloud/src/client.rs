use async_trait::async_trait;
use std::time::{Duration, Instant};

use driftless::error::{DriftlessError, Result};
use driftless::monitor::{Probe, ProbeFailure, ProbeReport};
use driftless::queue::{CentralService, PushAck, QueueItem};

use crate::config::CloudConfig;
use crate::types::{PushRequest, UpdateCheckRequest, UpdateCheckResponse};

/// HTTP client for the central service. Implements the core crate's
/// `CentralService` (result delivery) and `Probe` (health checks with
/// failure classification) seams.
pub struct CloudClient {
    config: CloudConfig,
    http: reqwest::Client,
}

impl CloudClient {
    pub fn new(config: CloudConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self { config, http }
    }

    pub fn device_id(&self) -> &str {
        &self.config.device_id
    }

    /// Ask the central service which installed models have newer versions.
    pub async fn check_model_updates(
        &self,
        installed: std::collections::HashMap<String, String>,
        last_sync: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<UpdateCheckResponse> {
        let url = format!("{}/edge/models/check-updates", self.config.api_url);
        let request = UpdateCheckRequest {
            device_id: self.config.device_id.clone(),
            installed,
            last_sync,
        };

        let response = self
            .http
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| DriftlessError::Remote(format!("update check failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(DriftlessError::Remote(format!(
                "update check returned {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| DriftlessError::Remote(format!("bad update check response: {}", e)))
    }

    fn classify(e: &reqwest::Error) -> ProbeFailure {
        use std::error::Error as _;

        if e.is_timeout() {
            return ProbeFailure::Timeout;
        }
        if e.is_connect() {
            // reqwest wraps resolution errors inside the connect error; the
            // source chain is the only place the distinction survives.
            let mut source = e.source();
            while let Some(inner) = source {
                if inner.to_string().contains("dns") {
                    return ProbeFailure::Dns;
                }
                source = inner.source();
            }
            return ProbeFailure::Connect;
        }
        ProbeFailure::Connect
    }
}

#[async_trait]
impl CentralService for CloudClient {
    async fn push(&self, item: &QueueItem) -> Result<PushAck> {
        let url = format!("{}/edge/results", self.config.api_url);
        let request = PushRequest {
            device_id: self.config.device_id.clone(),
            item: item.clone(),
        };

        let response = self
            .http
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| DriftlessError::Remote(format!("push failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(DriftlessError::Remote(format!(
                "push returned {}",
                response.status()
            )));
        }

        let ack: PushAck = response
            .json()
            .await
            .map_err(|e| DriftlessError::Remote(format!("bad ack: {}", e)))?;

        if ack.duplicate {
            tracing::debug!("central service had already seen {}", ack.id);
        }
        Ok(ack)
    }
}

#[async_trait]
impl Probe for CloudClient {
    async fn probe(&self) -> ProbeReport {
        let url = format!("{}/edge/health", self.config.api_url);
        let started = Instant::now();

        match self.http.get(&url).send().await {
            Ok(response) => {
                let latency = started.elapsed();
                if response.status().is_success() {
                    ProbeReport::success(latency)
                } else {
                    ProbeReport::failed(
                        ProbeFailure::Http(response.status().as_u16()),
                        latency,
                    )
                }
            }
            Err(e) => ProbeReport::failed(Self::classify(&e), started.elapsed()),
        }
    }
}
