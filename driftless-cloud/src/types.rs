use driftless::queue::QueueItem;
use driftless::types::ModelUpdate;
use serde::{Deserialize, Serialize};

/// Body of a result push to the central service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushRequest {
    pub device_id: String,
    pub item: QueueItem,
}

/// Request body for a model update check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateCheckRequest {
    pub device_id: String,
    /// language pair -> installed version
    pub installed: std::collections::HashMap<String, String>,
    pub last_sync: Option<chrono::DateTime<chrono::Utc>>,
}

/// Response listing models newer than the installed set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateCheckResponse {
    #[serde(default)]
    pub updates: Vec<ModelUpdate>,
}
