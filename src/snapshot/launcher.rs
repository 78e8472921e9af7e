use std::{
    collections::BTreeMap,
    ffi::OsString,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    process::{ExitStatus, Stdio},
    time::{Duration, Instant},
};

use async_trait::async_trait;
use thiserror::Error;
use tokio::{fs, process::Command};
use tracing::{info, warn};

/// Everything a rendering worker needs for one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub url: String,
    pub cookies: BTreeMap<String, String>,
    /// Where the finished PDF must end up.
    pub output_path: PathBuf,
    /// Where the worker writes while it is still rendering.
    pub staging_path: PathBuf,
}

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("rendering worker unavailable: {0}")]
    NotFound(io::Error),
    #[error("failed to spawn rendering worker: {0}")]
    Spawn(io::Error),
}

/// Starts a render job and returns without waiting for it.
///
/// Implementations report completion only by publishing a file at
/// [`LaunchSpec::output_path`].
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    async fn launch(&self, spec: LaunchSpec) -> Result<(), LaunchError>;
}

/// Rendering options forwarded to the worker on its command line.
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub format: String,
    pub orientation: String,
    pub zoom: f64,
    pub margin: String,
    pub render_timeout: Duration,
}

impl From<&crate::config::WorkerSettings> for WorkerOptions {
    fn from(worker: &crate::config::WorkerSettings) -> Self {
        Self {
            program: worker.program.clone(),
            args: worker.args.clone(),
            format: worker.format.clone(),
            orientation: worker.orientation.clone(),
            zoom: worker.zoom,
            margin: worker.margin.clone(),
            render_timeout: worker.render_timeout,
        }
    }
}

/// Spawns the worker as a detached OS process.
///
/// A background task reaps the child. On a zero exit status the staging file
/// is renamed over the artifact path; otherwise it is removed.
#[derive(Debug, Clone)]
pub struct CommandLauncher {
    options: WorkerOptions,
}

impl CommandLauncher {
    pub fn new(options: WorkerOptions) -> Self {
        Self { options }
    }

    fn command_args(&self, spec: &LaunchSpec) -> Vec<OsString> {
        let options = &self.options;
        let mut args: Vec<OsString> = options.args.iter().map(OsString::from).collect();
        args.extend([
            "--url".into(),
            spec.url.clone().into(),
            "--output".into(),
            spec.staging_path.clone().into_os_string(),
            "--format".into(),
            options.format.clone().into(),
            "--orientation".into(),
            options.orientation.clone().into(),
            "--zoom".into(),
            options.zoom.to_string().into(),
            "--margin".into(),
            options.margin.clone().into(),
            "--timeout-ms".into(),
            options.render_timeout.as_millis().to_string().into(),
        ]);
        for (name, value) in &spec.cookies {
            args.push("--cookie".into());
            args.push(format!("{name}={value}").into());
        }
        args
    }
}

#[async_trait]
impl ProcessLauncher for CommandLauncher {
    async fn launch(&self, spec: LaunchSpec) -> Result<(), LaunchError> {
        let mut command = Command::new(&self.options.program);
        command
            .args(self.command_args(&spec))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit());
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|err| {
            warn!(
                target = "pdfsnap::snapshot::launcher",
                op = "launcher::spawn",
                result = "error",
                program = %self.options.program.display(),
                error = %err,
                "Failed to spawn rendering worker"
            );
            if err.kind() == ErrorKind::NotFound {
                LaunchError::NotFound(err)
            } else {
                LaunchError::Spawn(err)
            }
        })?;

        let pid = child.id();
        info!(
            target = "pdfsnap::snapshot::launcher",
            op = "launcher::spawn",
            result = "spawned",
            pid,
            url = %spec.url,
            output = %spec.output_path.display(),
            "Rendering worker started"
        );

        let started_at = Instant::now();
        tokio::spawn(async move {
            let status = child.wait().await;
            publish(status, &spec.staging_path, &spec.output_path, started_at).await;
        });

        Ok(())
    }
}

async fn publish(
    status: io::Result<ExitStatus>,
    staging_path: &Path,
    output_path: &Path,
    started_at: Instant,
) {
    let elapsed_ms = started_at.elapsed().as_millis() as u64;
    let status = match status {
        Ok(status) => status,
        Err(err) => {
            warn!(
                target = "pdfsnap::snapshot::launcher",
                op = "launcher::reap",
                result = "error",
                elapsed_ms,
                error = %err,
                "Failed to wait on rendering worker"
            );
            discard(staging_path).await;
            return;
        }
    };

    if !status.success() {
        warn!(
            target = "pdfsnap::snapshot::launcher",
            op = "launcher::reap",
            result = "worker_failed",
            elapsed_ms,
            exit_code = status.code().map(i64::from).unwrap_or(-1),
            output = %output_path.display(),
            "Rendering worker exited unsuccessfully"
        );
        discard(staging_path).await;
        return;
    }

    match fs::rename(staging_path, output_path).await {
        Ok(()) => info!(
            target = "pdfsnap::snapshot::launcher",
            op = "launcher::reap",
            result = "published",
            elapsed_ms,
            output = %output_path.display(),
            "Rendered PDF published"
        ),
        Err(err) if err.kind() == ErrorKind::NotFound => warn!(
            target = "pdfsnap::snapshot::launcher",
            op = "launcher::reap",
            result = "missing_output",
            elapsed_ms,
            staging = %staging_path.display(),
            "Rendering worker succeeded without writing output"
        ),
        Err(err) => {
            warn!(
                target = "pdfsnap::snapshot::launcher",
                op = "launcher::reap",
                result = "error",
                elapsed_ms,
                error = %err,
                "Failed to publish rendered PDF"
            );
            discard(staging_path).await;
        }
    }
}

async fn discard(staging_path: &Path) {
    match fs::remove_file(staging_path).await {
        Ok(()) => {}
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => warn!(
            target = "pdfsnap::snapshot::launcher",
            op = "launcher::discard",
            staging = %staging_path.display(),
            error = %err,
            "Failed to remove staging file"
        ),
    }
}
