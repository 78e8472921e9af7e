//! Snapshot configuration.
//!
//! Immutable after construction and shared read-only by every request.

use std::path::PathBuf;
use std::time::Duration;

use super::types::JobScope;

pub(crate) const DEFAULT_POLLING_INTERVAL_SECS: u64 = 1;
pub(crate) const DEFAULT_POLLING_OFFSET_SECS: u64 = 1;
pub(crate) const DEFAULT_CACHE_TTL_SECS: u64 = 1;
/// Request timeout defaults to this many polling intervals.
pub(crate) const DEFAULT_TIMEOUT_INTERVALS: u64 = 10;
pub(crate) const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;
pub(crate) const DEFAULT_STAGING_GRACE_SECS: u64 = 600;
pub(crate) const DEFAULT_SESSION_COOKIE: &str = "pdfsnap_session";

#[derive(Debug, Clone)]
pub struct SnapshotConfig {
    /// Delay between polls while a job is in progress.
    pub polling_interval: Duration,
    /// Delay before the first poll after a job starts.
    pub polling_offset: Duration,
    /// Maximum artifact age still served. Zero serves once, then deletes.
    pub cache_ttl: Duration,
    /// How long clients keep polling before the job is reported as failed.
    pub request_timeout: Duration,
    pub out_path: PathBuf,
    pub job_scope: JobScope,
    pub session_cookie: String,
    pub sweep_interval: Duration,
    /// Age after which an unpublished staging file is considered abandoned.
    pub staging_grace: Duration,
}

impl SnapshotConfig {
    /// Defaults for everything except the cache directory.
    pub fn new(out_path: impl Into<PathBuf>) -> Self {
        let polling_interval = Duration::from_secs(DEFAULT_POLLING_INTERVAL_SECS);
        Self {
            polling_interval,
            polling_offset: Duration::from_secs(DEFAULT_POLLING_OFFSET_SECS),
            cache_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
            request_timeout: polling_interval * DEFAULT_TIMEOUT_INTERVALS as u32,
            out_path: out_path.into(),
            job_scope: JobScope::default(),
            session_cookie: DEFAULT_SESSION_COOKIE.to_string(),
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            staging_grace: Duration::from_secs(DEFAULT_STAGING_GRACE_SECS),
        }
    }

    /// Jobs older than this are dropped from the registry by the sweeper.
    pub fn job_retention(&self) -> Duration {
        self.request_timeout + self.staging_grace
    }
}

impl From<&crate::config::Settings> for SnapshotConfig {
    fn from(settings: &crate::config::Settings) -> Self {
        let render = &settings.render;
        Self {
            polling_interval: render.polling_interval,
            polling_offset: render.polling_offset,
            cache_ttl: render.cache_ttl,
            request_timeout: render.request_timeout,
            out_path: render.out_path.clone(),
            job_scope: settings.jobs.scope,
            session_cookie: settings.jobs.session_cookie.clone(),
            sweep_interval: render.sweep_interval,
            staging_grace: render.staging_grace,
        }
    }
}
