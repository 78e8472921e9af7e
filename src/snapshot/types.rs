use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use time::OffsetDateTime;

use super::fingerprint::Fingerprint;

/// Everything the core needs to know about one eligible request.
#[derive(Debug, Clone)]
pub struct RequestIdentity {
    /// Absolute request URL, including the `.pdf` suffix and query string.
    pub url: String,
    /// Request path, used for the `Ready` notification.
    pub path: String,
    pub is_async_client: bool,
    pub session_id: Option<String>,
    pub cookies: BTreeMap<String, String>,
}

/// Snapshot of a published artifact on disk.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub fingerprint: Fingerprint,
    pub file_path: PathBuf,
    pub size_bytes: u64,
    pub modified_at: OffsetDateTime,
}

impl CacheEntry {
    /// Zero-length output is never a valid PDF.
    pub fn is_corrupt(&self) -> bool {
        self.size_bytes == 0
    }

    /// A zero TTL accepts any artifact that is present.
    pub fn is_fresh(&self, now: OffsetDateTime, ttl: Duration) -> bool {
        ttl.is_zero() || now - self.modified_at <= ttl
    }
}

/// How render jobs are partitioned in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobScope {
    /// One job per fingerprint across every client.
    #[default]
    Global,
    /// One job per fingerprint per client session.
    Session,
}

impl FromStr for JobScope {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "global" => Ok(Self::Global),
            "session" => Ok(Self::Session),
            other => Err(format!("unknown job scope `{other}`")),
        }
    }
}

/// Registry key for one render job.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobKey {
    pub session: Option<String>,
    pub fingerprint: Fingerprint,
}

impl JobKey {
    pub fn new(scope: JobScope, identity: &RequestIdentity, fingerprint: Fingerprint) -> Self {
        let session = match scope {
            JobScope::Global => None,
            JobScope::Session => identity.session_id.clone(),
        };
        Self {
            session,
            fingerprint,
        }
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    fn identity(session: Option<&str>) -> RequestIdentity {
        RequestIdentity {
            url: "http://example.com/doc.pdf".to_string(),
            path: "/doc.pdf".to_string(),
            is_async_client: false,
            session_id: session.map(str::to_string),
            cookies: BTreeMap::new(),
        }
    }

    fn entry(size_bytes: u64, modified_at: OffsetDateTime) -> CacheEntry {
        CacheEntry {
            fingerprint: Fingerprint::of_url("http://example.com/doc.pdf"),
            file_path: PathBuf::from("/tmp/doc.pdf"),
            size_bytes,
            modified_at,
        }
    }

    #[test]
    fn freshness_window_is_inclusive() {
        let modified = datetime!(2024-01-01 00:00 UTC);
        let cached = entry(10, modified);
        let ttl = Duration::from_secs(5);

        assert!(cached.is_fresh(modified + Duration::from_secs(5), ttl));
        assert!(!cached.is_fresh(modified + Duration::from_secs(6), ttl));
    }

    #[test]
    fn zero_ttl_is_always_fresh() {
        let modified = datetime!(2024-01-01 00:00 UTC);
        let cached = entry(10, modified);
        assert!(cached.is_fresh(modified + Duration::from_secs(86_400), Duration::ZERO));
    }

    #[test]
    fn empty_artifact_is_corrupt() {
        let modified = datetime!(2024-01-01 00:00 UTC);
        assert!(entry(0, modified).is_corrupt());
        assert!(!entry(1, modified).is_corrupt());
    }

    #[test]
    fn global_scope_ignores_session() {
        let fp = Fingerprint::of_url("http://example.com/doc.pdf");
        let a = JobKey::new(JobScope::Global, &identity(Some("a")), fp.clone());
        let b = JobKey::new(JobScope::Global, &identity(Some("b")), fp.clone());
        assert_eq!(a, b);

        let a = JobKey::new(JobScope::Session, &identity(Some("a")), fp.clone());
        let b = JobKey::new(JobScope::Session, &identity(Some("b")), fp);
        assert_ne!(a, b);
    }

    #[test]
    fn job_scope_parses_case_insensitively() {
        assert_eq!("Global".parse::<JobScope>(), Ok(JobScope::Global));
        assert_eq!(" session ".parse::<JobScope>(), Ok(JobScope::Session));
        assert!("cluster".parse::<JobScope>().is_err());
    }
}
