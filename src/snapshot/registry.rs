//! Render job registry.
//!
//! Maps a [`JobKey`] to the moment its render job started. The orchestrator
//! only sees the [`JobRegistry`] trait, so the in-memory backend can be
//! swapped for an external store without touching the state machine.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use time::OffsetDateTime;

use super::error::SnapshotError;
use super::types::JobKey;

#[async_trait]
pub trait JobRegistry: Send + Sync {
    /// Start time of the job tracked under `key`, if any.
    async fn started_at(&self, key: &JobKey) -> Option<OffsetDateTime>;

    /// Record `at` as the start time, replacing any previous entry.
    async fn start(&self, key: &JobKey, at: OffsetDateTime);

    /// Record `at` only if no job is tracked yet. Returns `true` when this
    /// call created the entry.
    async fn try_start(&self, key: &JobKey, at: OffsetDateTime) -> bool;

    async fn clear(&self, key: &JobKey);

    /// Drop every job that started before `cutoff`. Returns how many were
    /// dropped.
    async fn prune(&self, cutoff: OffsetDateTime) -> usize;

    async fn is_active(&self, key: &JobKey) -> bool {
        self.started_at(key).await.is_some()
    }

    /// Only meaningful while the job is active.
    async fn has_timed_out(
        &self,
        key: &JobKey,
        now: OffsetDateTime,
        timeout: Duration,
    ) -> Result<bool, SnapshotError> {
        let started_at =
            self.started_at(key)
                .await
                .ok_or_else(|| SnapshotError::NotTracked {
                    fingerprint: key.fingerprint.clone(),
                })?;
        Ok(now - started_at > timeout)
    }
}

/// Process-wide registry backed by a concurrent map.
#[derive(Default, Clone)]
pub struct InMemoryJobRegistry {
    jobs: Arc<DashMap<JobKey, OffsetDateTime>>,
}

impl InMemoryJobRegistry {
    pub fn new() -> Self {
        Self {
            jobs: Arc::new(DashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

#[async_trait]
impl JobRegistry for InMemoryJobRegistry {
    async fn started_at(&self, key: &JobKey) -> Option<OffsetDateTime> {
        self.jobs.get(key).map(|entry| *entry.value())
    }

    async fn start(&self, key: &JobKey, at: OffsetDateTime) {
        self.jobs.insert(key.clone(), at);
    }

    async fn try_start(&self, key: &JobKey, at: OffsetDateTime) -> bool {
        use dashmap::mapref::entry::Entry;

        match self.jobs.entry(key.clone()) {
            Entry::Vacant(vacant) => {
                vacant.insert(at);
                true
            }
            Entry::Occupied(_) => false,
        }
    }

    async fn clear(&self, key: &JobKey) {
        self.jobs.remove(key);
    }

    async fn prune(&self, cutoff: OffsetDateTime) -> usize {
        let before = self.jobs.len();
        self.jobs.retain(|_, started_at| *started_at >= cutoff);
        before.saturating_sub(self.jobs.len())
    }
}
