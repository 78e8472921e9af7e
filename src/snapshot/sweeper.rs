//! Background cache maintenance.
//!
//! Expired artifacts, abandoned staging files, and jobs whose worker never
//! published are removed on a fixed interval.

use std::io;
use std::sync::Arc;

use metrics::counter;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::clock::Clock;
use super::config::SnapshotConfig;
use super::registry::JobRegistry;
use super::store::{CacheStore, SweepReport};

const METRIC_SWEEP_REMOVED: &str = "pdfsnap_sweep_removed_total";

pub struct CacheSweeper {
    store: CacheStore,
    jobs: Arc<dyn JobRegistry>,
    clock: Arc<dyn Clock>,
    config: SnapshotConfig,
}

impl CacheSweeper {
    pub fn new(
        store: CacheStore,
        jobs: Arc<dyn JobRegistry>,
        clock: Arc<dyn Clock>,
        config: SnapshotConfig,
    ) -> Self {
        Self {
            store,
            jobs,
            clock,
            config,
        }
    }

    /// One sweep over the cache directory and the job registry.
    pub async fn run_once(&self) -> io::Result<SweepReport> {
        let report = self
            .store
            .sweep(self.config.cache_ttl, self.config.staging_grace)
            .await?;

        let cutoff = self.clock.now() - self.config.job_retention();
        let jobs_pruned = self.jobs.prune(cutoff).await;

        counter!(METRIC_SWEEP_REMOVED, "kind" => "artifact")
            .increment(report.artifacts_removed as u64);
        counter!(METRIC_SWEEP_REMOVED, "kind" => "staging")
            .increment(report.staging_removed as u64);
        counter!(METRIC_SWEEP_REMOVED, "kind" => "job").increment(jobs_pruned as u64);

        if report.artifacts_removed + report.staging_removed + jobs_pruned > 0 {
            info!(
                target = "pdfsnap::snapshot::sweeper",
                artifacts_removed = report.artifacts_removed,
                staging_removed = report.staging_removed,
                jobs_pruned,
                "cache sweep completed"
            );
        }

        Ok(report)
    }

    /// Run [`CacheSweeper::run_once`] every `sweep_interval` until aborted.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.config.sweep_interval);
            interval.tick().await; // Skip the first immediate tick
            loop {
                interval.tick().await;
                if let Err(err) = self.run_once().await {
                    warn!(
                        target = "pdfsnap::snapshot::sweeper",
                        error = %err,
                        "cache sweep failed"
                    );
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, SystemTime};

    use tempfile::TempDir;
    use time::OffsetDateTime;

    use super::super::clock::ManualClock;
    use super::super::fingerprint::Fingerprint;
    use super::super::registry::InMemoryJobRegistry;
    use super::super::types::JobKey;
    use super::*;

    #[tokio::test]
    async fn sweep_removes_expired_artifacts_and_abandoned_jobs() {
        let dir = TempDir::new().expect("temp dir");
        let clock = Arc::new(ManualClock::new(OffsetDateTime::from(SystemTime::now())));
        let mut config = SnapshotConfig::new(dir.path());
        config.cache_ttl = Duration::from_secs(5);
        config.request_timeout = Duration::from_secs(10);
        config.staging_grace = Duration::from_secs(20);

        let store = CacheStore::new(dir.path(), clock.clone());
        let fingerprint = Fingerprint::of_url("http://localhost/report.pdf");
        std::fs::write(store.path_for(&fingerprint), b"%PDF").expect("artifact");

        let jobs = InMemoryJobRegistry::new();
        let key = JobKey {
            session: None,
            fingerprint: fingerprint.clone(),
        };
        jobs.start(&key, clock.now()).await;

        let sweeper = CacheSweeper::new(store.clone(), Arc::new(jobs.clone()), clock.clone(), config);

        let report = sweeper.run_once().await.expect("sweep");
        assert_eq!(report, SweepReport::default());
        assert_eq!(jobs.len(), 1);

        clock.advance(Duration::from_secs(31));
        let report = sweeper.run_once().await.expect("sweep");

        assert_eq!(report.artifacts_removed, 1);
        assert!(!store.exists(&fingerprint).await);
        assert!(jobs.is_empty());
    }

    #[tokio::test]
    async fn missing_cache_directory_is_not_an_error() {
        let dir = TempDir::new().expect("temp dir");
        let root = dir.path().join("absent");
        let clock = Arc::new(ManualClock::new(OffsetDateTime::from(SystemTime::now())));
        let sweeper = CacheSweeper::new(
            CacheStore::new(&root, clock.clone()),
            Arc::new(InMemoryJobRegistry::new()),
            clock,
            SnapshotConfig::new(&root),
        );

        let report = sweeper.run_once().await.expect("sweep");
        assert_eq!(report, SweepReport::default());
    }
}
