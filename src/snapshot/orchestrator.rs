//! Render-request state machine.
//!
//! For every eligible request the orchestrator inspects the artifact on disk
//! and the job registry, then picks one branch:
//!
//! 1. **Ready**: a servable artifact exists. Corrupt artifacts are removed and
//!    reported; async clients get a `Ready` notice; everyone else gets the PDF.
//! 2. **In progress**: a job is tracked. Poll again, or fail once the request
//!    timeout has passed.
//! 3. **Start**: remove any stale artifact, record the job, spawn the worker.
//!
//! Corrupt artifacts, timeouts and launch failures are terminal for the job:
//! its registry entry is cleared so the next request starts over.

use std::sync::Arc;

use metrics::counter;
use time::OffsetDateTime;
use tracing::{Span, debug, field, info, instrument, warn};

use super::clock::Clock;
use super::config::SnapshotConfig;
use super::decision::{RenderDecision, RenderFailure};
use super::error::SnapshotError;
use super::fingerprint::{Fingerprint, fingerprint, worker_url};
use super::launcher::{LaunchSpec, ProcessLauncher};
use super::registry::JobRegistry;
use super::store::CacheStore;
use super::types::{CacheEntry, JobKey, RequestIdentity};

const METRIC_RENDER_STARTED: &str = "pdfsnap_render_started_total";
const METRIC_RENDER_SERVED: &str = "pdfsnap_render_served_total";
const METRIC_RENDER_READY: &str = "pdfsnap_render_ready_total";
const METRIC_RENDER_TIMEOUT: &str = "pdfsnap_render_timeout_total";
const METRIC_RENDER_INVALID: &str = "pdfsnap_render_invalid_total";
const METRIC_RENDER_LAUNCH_FAILED: &str = "pdfsnap_render_launch_failed_total";

pub struct RenderOrchestrator {
    config: SnapshotConfig,
    store: CacheStore,
    jobs: Arc<dyn JobRegistry>,
    launcher: Arc<dyn ProcessLauncher>,
    clock: Arc<dyn Clock>,
}

/// Per-request view shared by the branches.
struct Attempt<'a> {
    identity: &'a RequestIdentity,
    fingerprint: Fingerprint,
    key: JobKey,
    now: OffsetDateTime,
}

impl RenderOrchestrator {
    pub fn new(
        config: SnapshotConfig,
        store: CacheStore,
        jobs: Arc<dyn JobRegistry>,
        launcher: Arc<dyn ProcessLauncher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            store,
            jobs,
            launcher,
            clock,
        }
    }

    pub fn config(&self) -> &SnapshotConfig {
        &self.config
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    /// Decide how to answer one eligible request.
    #[instrument(skip_all, fields(path = %identity.path, fingerprint = field::Empty))]
    pub async fn handle(&self, identity: &RequestIdentity) -> RenderDecision {
        let fingerprint = fingerprint(identity);
        Span::current().record("fingerprint", field::display(&fingerprint));

        let attempt = Attempt {
            identity,
            key: JobKey::new(self.config.job_scope, identity, fingerprint.clone()),
            fingerprint,
            now: self.clock.now(),
        };

        match self.decide(&attempt).await {
            Ok(decision) => decision,
            Err(err) => match err.failure() {
                Some(failure) => self.fail(&attempt, err, failure).await,
                None => {
                    warn!(error = %err, "render job state lost; asking client to retry");
                    RenderDecision::Reload(self.config.polling_interval)
                }
            },
        }
    }

    async fn decide(&self, attempt: &Attempt<'_>) -> Result<RenderDecision, SnapshotError> {
        let entry = match self.store.entry(&attempt.fingerprint).await {
            Ok(entry) => entry,
            Err(err) => {
                warn!(
                    branch = "ready",
                    error = %err,
                    "failed to stat artifact; treating it as absent"
                );
                None
            }
        };

        if let Some(entry) = entry
            .as_ref()
            .filter(|entry| entry.is_fresh(attempt.now, self.config.cache_ttl))
        {
            if let Some(decision) = self.serve(attempt, entry).await? {
                return Ok(decision);
            }
        }

        self.poll_or_start(attempt, entry.is_some()).await
    }

    /// Ready branch. `Ok(None)` means the artifact could not be read and the
    /// request continues as if it were absent.
    async fn serve(
        &self,
        attempt: &Attempt<'_>,
        entry: &CacheEntry,
    ) -> Result<Option<RenderDecision>, SnapshotError> {
        if entry.is_corrupt() {
            return Err(SnapshotError::CorruptArtifact {
                fingerprint: attempt.fingerprint.clone(),
            });
        }

        if attempt.identity.is_async_client {
            counter!(METRIC_RENDER_READY).increment(1);
            debug!(branch = "ready", result = "notify", "artifact ready for async client");
            return Ok(Some(RenderDecision::Ready(attempt.identity.path.clone())));
        }

        let body = match self.store.read(&attempt.fingerprint).await {
            Ok(body) => body,
            Err(err) => {
                warn!(
                    branch = "ready",
                    result = "vanished",
                    error = %err,
                    "artifact disappeared before it could be read"
                );
                return Ok(None);
            }
        };
        if body.is_empty() {
            return Err(SnapshotError::CorruptArtifact {
                fingerprint: attempt.fingerprint.clone(),
            });
        }

        if self.config.cache_ttl.is_zero() {
            self.remove_artifact(&attempt.fingerprint, "one_shot").await;
        }
        self.jobs.clear(&attempt.key).await;

        counter!(METRIC_RENDER_SERVED).increment(1);
        debug!(
            branch = "ready",
            result = "file",
            bytes = body.len(),
            "serving rendered artifact"
        );
        Ok(Some(RenderDecision::File(body)))
    }

    async fn poll_or_start(
        &self,
        attempt: &Attempt<'_>,
        stale_present: bool,
    ) -> Result<RenderDecision, SnapshotError> {
        if self.jobs.is_active(&attempt.key).await {
            return self.poll(attempt).await;
        }
        self.start(attempt, stale_present).await
    }

    /// In-progress branch.
    async fn poll(&self, attempt: &Attempt<'_>) -> Result<RenderDecision, SnapshotError> {
        let timed_out = match self
            .jobs
            .has_timed_out(&attempt.key, attempt.now, self.config.request_timeout)
            .await
        {
            Ok(timed_out) => timed_out,
            // Cleared by a concurrent request between the two lookups.
            Err(SnapshotError::NotTracked { .. }) => return self.start(attempt, false).await,
            Err(err) => return Err(err),
        };

        if timed_out {
            return Err(SnapshotError::RenderTimeout {
                fingerprint: attempt.fingerprint.clone(),
            });
        }

        debug!(branch = "in_progress", result = "reload", "render still in progress");
        Ok(RenderDecision::Reload(self.config.polling_interval))
    }

    /// Start branch.
    async fn start(
        &self,
        attempt: &Attempt<'_>,
        stale_present: bool,
    ) -> Result<RenderDecision, SnapshotError> {
        if !self.jobs.try_start(&attempt.key, attempt.now).await {
            debug!(
                branch = "start",
                result = "already_started",
                "another request started this render first"
            );
            return Ok(RenderDecision::Reload(self.config.polling_interval));
        }

        // Only the request that owns the job may drop the stale artifact.
        if stale_present {
            self.remove_artifact(&attempt.fingerprint, "stale").await;
        }

        let spec = LaunchSpec {
            url: worker_url(&attempt.identity.url),
            cookies: attempt.identity.cookies.clone(),
            output_path: self.store.path_for(&attempt.fingerprint),
            staging_path: self.store.staging_path(&attempt.fingerprint),
        };
        self.launcher.launch(spec).await?;

        counter!(METRIC_RENDER_STARTED).increment(1);
        info!(branch = "start", result = "launched", "render job started");
        Ok(RenderDecision::Reload(self.config.polling_offset))
    }

    /// Terminal failure: forget the job and degrade to an error response.
    async fn fail(
        &self,
        attempt: &Attempt<'_>,
        err: SnapshotError,
        failure: RenderFailure,
    ) -> RenderDecision {
        if failure == RenderFailure::InvalidArtifact {
            self.remove_artifact(&attempt.fingerprint, "corrupt").await;
        }
        self.jobs.clear(&attempt.key).await;

        let metric = match failure {
            RenderFailure::InvalidArtifact => METRIC_RENDER_INVALID,
            RenderFailure::Timeout => METRIC_RENDER_TIMEOUT,
            RenderFailure::LaunchFailed => METRIC_RENDER_LAUNCH_FAILED,
        };
        counter!(metric).increment(1);
        warn!(error = %err, "render job failed");

        RenderDecision::Error(failure)
    }

    async fn remove_artifact(&self, fingerprint: &Fingerprint, reason: &'static str) {
        if let Err(err) = self.store.delete(fingerprint).await {
            warn!(
                reason,
                error = %err,
                "failed to remove artifact"
            );
        }
    }
}
