use thiserror::Error;

use super::decision::RenderFailure;
use super::fingerprint::Fingerprint;
use super::launcher::LaunchError;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("artifact {fingerprint} is empty")]
    CorruptArtifact { fingerprint: Fingerprint },
    #[error("render job for {fingerprint} exceeded the request timeout")]
    RenderTimeout { fingerprint: Fingerprint },
    #[error("no render job is tracked for {fingerprint}")]
    NotTracked { fingerprint: Fingerprint },
    #[error(transparent)]
    Launch(#[from] LaunchError),
}

impl SnapshotError {
    /// User-facing failure for errors that terminate a render job.
    pub fn failure(&self) -> Option<RenderFailure> {
        match self {
            Self::CorruptArtifact { .. } => Some(RenderFailure::InvalidArtifact),
            Self::RenderTimeout { .. } => Some(RenderFailure::Timeout),
            Self::Launch(_) => Some(RenderFailure::LaunchFailed),
            Self::NotTracked { .. } => None,
        }
    }
}
