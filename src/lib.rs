//! # Driftless
//!
//! Offline-resilience core for edge translation nodes. An edge node must
//! keep serving translation requests when its link to the central service is
//! degraded or gone, and reconcile once connectivity returns. Driftless
//! provides the four pieces that make that work:
//!
//! - [`cache::ResultCache`] — memoizes inference outputs by request
//!   fingerprint, with TTL + LRU bounds, single-flight computation, and a
//!   restart-surviving snapshot.
//! - [`queue::SyncQueue`] — durable priority outbox of results pending
//!   delivery, drained by [`queue::Reconciler`] with backoff, dead-lettering,
//!   and cloud-authoritative conflict handling.
//! - [`monitor::ConnectivityMonitor`] — debounced probe loop that classifies
//!   *why* the link is bad and publishes online/offline transitions.
//! - [`recovery::RecoveryEngine`] — tries cause-matched remediation
//!   strategies (reordered by historical success) before merely waiting.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use driftless::{EdgeConfig, EdgeNode};
//! use driftless::inference::DictionaryInference;
//! use driftless::types::TranslationRequest;
//! use std::sync::Arc;
//!
//! # async fn example(
//! #     central: Arc<dyn driftless::queue::CentralService>,
//! #     probe: Arc<dyn driftless::monitor::Probe>,
//! # ) -> driftless::Result<()> {
//! let node = EdgeNode::new(
//!     EdgeConfig::from_env(),
//!     Arc::new(DictionaryInference::new()),
//!     central, // e.g. driftless_cloud::CloudClient
//!     probe,
//! );
//! node.start();
//!
//! let response = node
//!     .translate(&TranslationRequest::new("fever", "en", "es"))
//!     .await?;
//! println!("{} (from {:?})", response.translation.text, response.source);
//!
//! node.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! The inference model, the transport to the central service, and any HTTP
//! surface are external collaborators; the companion `driftless-cloud` crate
//! provides a reqwest-based [`queue::CentralService`] + [`monitor::Probe`]
//! implementation.

pub mod cache;
pub mod error;
pub mod inference;
pub mod monitor;
pub mod node;
pub mod queue;
pub mod recovery;
pub mod types;

pub use cache::{CacheConfig, ResultCache};
pub use error::{DriftlessError, Result};
pub use monitor::{ConnectivityMonitor, LinkEvent, LinkState, MonitorConfig};
pub use node::{EdgeConfig, EdgeNode};
pub use queue::{QueueConfig, Reconciler, ReconcilerConfig, SyncQueue};
pub use recovery::{RecoveryConfig, RecoveryEngine};
pub use types::{Translation, TranslationRequest, TranslationResponse};
