use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use driftless::error::Result;
use driftless::types::ModelUpdate;

/// One installed translation model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelInfo {
    pub filename: String,
    pub size_bytes: u64,
    pub sha256: String,
    pub version: String,
}

/// Tracks which model versions this device has, so reconciliation can tell
/// whether a canonical model announcement is news. Persisted as plain JSON
/// next to the models themselves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelManifest {
    pub device_id: String,
    /// language pair ("en-es") -> installed model
    pub models: HashMap<String, ModelInfo>,
    pub last_sync: Option<DateTime<Utc>>,
}

impl ModelManifest {
    pub fn new(device_id: &str) -> Self {
        Self {
            device_id: device_id.to_string(),
            models: HashMap::new(),
            last_sync: None,
        }
    }

    /// Load a manifest, or start a fresh one if the file is missing or
    /// unreadable.
    pub fn load_or_default(path: &Path, device_id: &str) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(manifest) => manifest,
                Err(e) => {
                    tracing::error!("Failed to parse manifest: {}, starting fresh", e);
                    Self::new(device_id)
                }
            },
            Err(_) => Self::new(device_id),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn installed_versions(&self) -> HashMap<String, String> {
        self.models
            .iter()
            .map(|(pair, info)| (pair.clone(), info.version.clone()))
            .collect()
    }

    /// Record a model version announced by the central service. Returns
    /// false when the installed version is already current.
    pub fn apply_update(&mut self, update: &ModelUpdate) -> bool {
        let current = self.models.get(&update.language_pair);
        if current.map(|info| info.version.as_str()) == Some(update.version.as_str()) {
            return false;
        }
        let entry = self
            .models
            .entry(update.language_pair.clone())
            .or_insert_with(|| ModelInfo {
                filename: format!("{}.bin", update.language_pair),
                size_bytes: 0,
                sha256: String::new(),
                version: String::new(),
            });
        entry.version = update.version.clone();
        if let Some(ref sha256) = update.sha256 {
            entry.sha256 = sha256.clone();
        }
        self.last_sync = Some(Utc::now());
        true
    }
}

/// Chunked SHA-256 of a model file, for download verification.
pub fn file_sha256(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let read = file.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}
