use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudConfig {
    /// Base URL of the central service, e.g. "https://api.example.com".
    pub api_url: String,
    /// Stable identifier for this edge device.
    pub device_id: String,
    /// Hard timeout for every request (seconds).
    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    5
}

impl CloudConfig {
    /// Load cloud configuration from {data_dir}/cloud.json, falling back to
    /// environment variables and then defaults.
    pub fn load_or_default(data_dir: &Path) -> Self {
        let cloud_json = data_dir.join("cloud.json");

        if cloud_json.exists() {
            match std::fs::read_to_string(&cloud_json) {
                Ok(content) => match serde_json::from_str::<CloudConfig>(&content) {
                    Ok(config) => {
                        tracing::info!(
                            "Loaded cloud config: device_id={}, api_url={}",
                            config.device_id,
                            config.api_url
                        );
                        return config;
                    }
                    Err(e) => {
                        tracing::error!("Failed to parse cloud.json: {}, using defaults", e);
                    }
                },
                Err(e) => {
                    tracing::error!("Failed to read cloud.json: {}, using defaults", e);
                }
            }
        }

        let api_url = std::env::var("DRIFTLESS_CLOUD_URL")
            .unwrap_or_else(|_| "https://api.driftless.dev".to_string());
        let device_id = std::env::var("DRIFTLESS_DEVICE_ID").unwrap_or_else(|_| {
            hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(|| "unknown".to_string())
        });

        tracing::info!(
            "No cloud.json found, using env/defaults: device_id={}",
            device_id
        );

        CloudConfig {
            api_url,
            device_id,
            request_timeout_secs: std::env::var("DRIFTLESS_CLOUD_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_timeout_secs),
        }
    }
}
