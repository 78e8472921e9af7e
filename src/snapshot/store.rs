//! Filesystem artifact store.
//!
//! Artifacts live flat in one directory as `<fingerprint>.pdf`. Workers write
//! to a hidden staging file (`.<fingerprint>.<uuid>.part`) that is renamed
//! into place once rendering succeeds. No locking is taken.

use std::io::{self, ErrorKind};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use time::OffsetDateTime;
use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

use super::clock::Clock;
use super::fingerprint::Fingerprint;
use super::types::CacheEntry;

const ARTIFACT_EXTENSION: &str = ".pdf";
const STAGING_EXTENSION: &str = ".part";

/// Result of one [`CacheStore::sweep`] pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub artifacts_removed: usize,
    pub staging_removed: usize,
}

#[derive(Clone)]
pub struct CacheStore {
    root: PathBuf,
    clock: Arc<dyn Clock>,
    #[cfg(test)]
    vanish_before_read: Arc<std::sync::atomic::AtomicBool>,
}

impl CacheStore {
    pub fn new(root: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        Self {
            root: root.into(),
            clock,
            #[cfg(test)]
            vanish_before_read: Arc::default(),
        }
    }

    /// Create the cache directory if it does not exist yet.
    pub async fn ensure_dir(&self) -> io::Result<()> {
        fs::create_dir_all(&self.root).await
    }

    /// Deterministic artifact location, `root/<fingerprint>.pdf`.
    pub fn path_for(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.root.join(fingerprint.file_name())
    }

    /// Fresh, unique location for a worker to write into before publication.
    pub fn staging_path(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.root.join(format!(
            ".{fingerprint}.{}{STAGING_EXTENSION}",
            Uuid::new_v4().simple()
        ))
    }

    /// Stat the artifact once. `None` when nothing is published.
    pub async fn entry(&self, fingerprint: &Fingerprint) -> io::Result<Option<CacheEntry>> {
        let file_path = self.path_for(fingerprint);
        let metadata = match fs::metadata(&file_path).await {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err),
        };
        if !metadata.is_file() {
            return Ok(None);
        }
        Ok(Some(CacheEntry {
            fingerprint: fingerprint.clone(),
            file_path,
            size_bytes: metadata.len(),
            modified_at: OffsetDateTime::from(metadata.modified()?),
        }))
    }

    pub async fn exists(&self, fingerprint: &Fingerprint) -> bool {
        matches!(self.entry(fingerprint).await, Ok(Some(_)))
    }

    /// `ttl == 0` accepts any present artifact; otherwise the artifact must be
    /// at most `ttl` old. Absent artifacts are never fresh for a non-zero TTL.
    pub async fn is_fresh(&self, fingerprint: &Fingerprint, ttl: Duration) -> io::Result<bool> {
        if ttl.is_zero() {
            return Ok(true);
        }
        let now = self.clock.now();
        Ok(self
            .entry(fingerprint)
            .await?
            .is_some_and(|entry| entry.is_fresh(now, ttl)))
    }

    pub async fn is_corrupt(&self, fingerprint: &Fingerprint) -> io::Result<bool> {
        Ok(self
            .entry(fingerprint)
            .await?
            .is_some_and(|entry| entry.is_corrupt()))
    }

    /// Read the artifact body. Fails if it vanished since it was checked.
    pub async fn read(&self, fingerprint: &Fingerprint) -> io::Result<Bytes> {
        let path = self.path_for(fingerprint);
        #[cfg(test)]
        if self
            .vanish_before_read
            .load(std::sync::atomic::Ordering::SeqCst)
        {
            let _ = fs::remove_file(&path).await;
        }
        fs::read(path).await.map(Bytes::from)
    }

    /// Make every later `read` lose a race with a concurrent delete.
    #[cfg(test)]
    pub(crate) fn vanish_on_read(&self) {
        self.vanish_before_read
            .store(true, std::sync::atomic::Ordering::SeqCst);
    }

    /// Remove the artifact. Removing an absent artifact succeeds.
    pub async fn delete(&self, fingerprint: &Fingerprint) -> io::Result<()> {
        match fs::remove_file(self.path_for(fingerprint)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Remove artifacts older than `ttl` and staging files older than
    /// `staging_grace`. A zero `ttl` leaves artifacts alone; they are removed
    /// when served.
    pub async fn sweep(&self, ttl: Duration, staging_grace: Duration) -> io::Result<SweepReport> {
        let now = self.clock.now();
        let mut report = SweepReport::default();
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(report),
            Err(err) => return Err(err),
        };

        while let Some(dir_entry) = entries.next_entry().await? {
            let name = dir_entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let kind = classify(name);
            if kind == FileKind::Other {
                continue;
            }

            let metadata = match dir_entry.metadata().await {
                Ok(metadata) if metadata.is_file() => metadata,
                Ok(_) => continue,
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => return Err(err),
            };
            let age = now - OffsetDateTime::from(metadata.modified()?);

            let expired = match kind {
                FileKind::Artifact => !ttl.is_zero() && age > ttl,
                FileKind::Staging => age > staging_grace,
                FileKind::Other => false,
            };
            if !expired {
                continue;
            }

            match fs::remove_file(dir_entry.path()).await {
                Ok(()) => {
                    debug!(
                        target = "pdfsnap::snapshot::store",
                        file = name,
                        age_secs = age.whole_seconds(),
                        "removed expired cache file"
                    );
                    match kind {
                        FileKind::Artifact => report.artifacts_removed += 1,
                        FileKind::Staging => report.staging_removed += 1,
                        FileKind::Other => {}
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => {
                    warn!(
                        target = "pdfsnap::snapshot::store",
                        file = name,
                        error = %err,
                        "failed to remove expired cache file"
                    );
                }
            }
        }

        Ok(report)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileKind {
    Artifact,
    Staging,
    Other,
}

fn classify(name: &str) -> FileKind {
    if let Some(stem) = name.strip_suffix(ARTIFACT_EXTENSION) {
        if Fingerprint::from_hex(stem).is_some() {
            return FileKind::Artifact;
        }
    }
    if name.starts_with('.') && name.ends_with(STAGING_EXTENSION) {
        return FileKind::Staging;
    }
    FileKind::Other
}
