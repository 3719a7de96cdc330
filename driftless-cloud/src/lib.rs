//! Reqwest-based transport between a driftless edge node and its central
//! service: result delivery with idempotent acks, health probing with
//! failure classification, and model manifest synchronization.

pub mod client;
pub mod config;
pub mod manifest;
pub mod types;

pub use client::CloudClient;
pub use config::CloudConfig;
pub use manifest::{file_sha256, ModelInfo, ModelManifest};
pub use types::{PushRequest, UpdateCheckRequest, UpdateCheckResponse};
