//! PDF snapshot core.
//!
//! Intercepts requests for `.pdf`-suffixed resources and answers them from a
//! filesystem cache that is filled asynchronously by an external rendering
//! worker:
//!
//! - **Fingerprint**: stable cache key derived from the request URL
//! - **CacheStore**: `out_path/<fingerprint>.pdf` artifacts
//! - **JobRegistry**: tracks outstanding render jobs
//! - **RenderOrchestrator**: decides between serving, polling and starting
//! - **ProcessLauncher**: spawns the detached worker
//!
//! ## Configuration
//!
//! ```toml
//! [render]
//! out_path = "/var/cache/pdfsnap"
//! polling_interval_seconds = 1
//! polling_offset_seconds = 1
//! cache_ttl_seconds = 1
//! # ... see config.rs for all options
//! ```

mod clock;
pub(crate) mod config;
mod decision;
mod error;
mod fingerprint;
mod launcher;
mod middleware;
mod orchestrator;
mod registry;
mod rules;
mod store;
mod sweeper;
mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::SnapshotConfig;
pub use decision::{RenderDecision, RenderFailure};
pub use error::SnapshotError;
pub use fingerprint::{Fingerprint, fingerprint, strip_pdf_suffix, worker_url};
pub use launcher::{CommandLauncher, LaunchError, LaunchSpec, ProcessLauncher, WorkerOptions};
pub use middleware::{SnapshotState, pdf_snapshot_layer};
pub use orchestrator::RenderOrchestrator;
pub use registry::{InMemoryJobRegistry, JobRegistry};
pub use rules::{
    ClientClassifier, HeaderClientClassifier, PathConditions, RenderRules, is_render_candidate,
};
pub use store::{CacheStore, SweepReport};
pub use sweeper::CacheSweeper;
pub use types::{CacheEntry, JobKey, JobScope, RequestIdentity};
