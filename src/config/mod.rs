//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

use crate::snapshot::{JobScope, PathConditions};
use crate::snapshot::config::{
    DEFAULT_CACHE_TTL_SECS, DEFAULT_POLLING_INTERVAL_SECS, DEFAULT_POLLING_OFFSET_SECS,
    DEFAULT_SESSION_COOKIE, DEFAULT_STAGING_GRACE_SECS, DEFAULT_SWEEP_INTERVAL_SECS,
    DEFAULT_TIMEOUT_INTERVALS,
};

mod cli;

pub use cli::{CliArgs, Command, RenderOverrides, ServeArgs, ServeOverrides, SweepArgs};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "pdfsnap";
const ENV_PREFIX: &str = "PDFSNAP";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_WORKER_PROGRAM: &str = "pdfsnap-worker";
const DEFAULT_WORKER_FORMAT: &str = "A4";
const DEFAULT_WORKER_ORIENTATION: &str = "portrait";
const DEFAULT_WORKER_ZOOM: f64 = 1.0;
const DEFAULT_WORKER_MARGIN: &str = "1cm";
const DEFAULT_WORKER_RENDER_TIMEOUT_MS: u64 = 90_000;

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub render: RenderSettings,
    pub worker: WorkerSettings,
    pub jobs: JobsSettings,
    pub conditions: PathConditions,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
    /// Scheme and authority used to rebuild request URLs instead of `Host`.
    pub public_base_url: Option<Url>,
    /// Required by `serve`, unused by `sweep`.
    pub upstream_url: Option<Url>,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub out_path: PathBuf,
    pub polling_interval: Duration,
    pub polling_offset: Duration,
    pub cache_ttl: Duration,
    pub request_timeout: Duration,
    pub sweep_interval: Duration,
    pub staging_grace: Duration,
}

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub format: String,
    pub orientation: String,
    pub zoom: f64,
    pub margin: String,
    pub render_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct JobsSettings {
    pub scope: JobScope,
    pub session_cookie: String,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    let serving = match cli.command.as_ref() {
        Some(Command::Serve(args)) => {
            raw.apply_serve_overrides(&args.overrides);
            true
        }
        Some(Command::Sweep(args)) => {
            raw.apply_render_overrides(&args.render);
            false
        }
        None => {
            raw.apply_serve_overrides(&ServeOverrides::default());
            true
        }
    };

    let settings = Settings::from_raw(raw)?;
    if serving && settings.server.upstream_url.is_none() {
        return Err(LoadError::invalid(
            "server.upstream_url",
            "required when serving",
        ));
    }
    Ok(settings)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    render: RawRenderSettings,
    worker: RawWorkerSettings,
    jobs: RawJobsSettings,
    conditions: RawConditionsSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(url) = overrides.upstream_url.as_ref() {
            self.server.upstream_url = Some(url.clone());
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(program) = overrides.worker_program.as_ref() {
            self.worker.program = Some(program.clone());
        }

        self.apply_render_overrides(&overrides.render);
    }

    fn apply_render_overrides(&mut self, overrides: &RenderOverrides) {
        if let Some(path) = overrides.out_path.as_ref() {
            self.render.out_path = Some(path.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            render,
            worker,
            jobs,
            conditions,
        } = raw;

        let server = build_server_settings(server)?;
        let logging = build_logging_settings(logging)?;
        let render = build_render_settings(render)?;
        let worker = build_worker_settings(worker)?;
        let jobs = build_jobs_settings(jobs)?;
        let conditions = build_conditions(conditions)?;

        Ok(Self {
            server,
            logging,
            render,
            worker,
            jobs,
            conditions,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }
    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    let public_base_url = parse_http_url(server.public_base_url, "server.public_base_url")?;
    let upstream_url = parse_http_url(server.upstream_url, "server.upstream_url")?;

    Ok(ServerSettings {
        addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
        public_base_url,
        upstream_url,
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_render_settings(render: RawRenderSettings) -> Result<RenderSettings, LoadError> {
    let out_path = render
        .out_path
        .filter(|path| !path.as_os_str().is_empty())
        .ok_or_else(|| LoadError::invalid("render.out_path", "a cache directory is required"))?;

    let interval_secs = render
        .polling_interval_seconds
        .unwrap_or(DEFAULT_POLLING_INTERVAL_SECS);
    let polling_interval = positive_secs(interval_secs, "render.polling_interval_seconds")?;

    let polling_offset = positive_secs(
        render
            .polling_offset_seconds
            .unwrap_or(DEFAULT_POLLING_OFFSET_SECS),
        "render.polling_offset_seconds",
    )?;
    let cache_ttl = Duration::from_secs(render.cache_ttl_seconds.unwrap_or(DEFAULT_CACHE_TTL_SECS));

    let timeout_secs = render
        .request_timeout_seconds
        .unwrap_or_else(|| interval_secs.saturating_mul(DEFAULT_TIMEOUT_INTERVALS));
    let request_timeout = positive_secs(timeout_secs, "render.request_timeout_seconds")?;

    let sweep_interval = positive_secs(
        render
            .sweep_interval_seconds
            .unwrap_or(DEFAULT_SWEEP_INTERVAL_SECS),
        "render.sweep_interval_seconds",
    )?;
    let staging_grace = Duration::from_secs(
        render
            .staging_grace_seconds
            .unwrap_or(DEFAULT_STAGING_GRACE_SECS),
    );

    Ok(RenderSettings {
        out_path,
        polling_interval,
        polling_offset,
        cache_ttl,
        request_timeout,
        sweep_interval,
        staging_grace,
    })
}

fn build_worker_settings(worker: RawWorkerSettings) -> Result<WorkerSettings, LoadError> {
    let program = worker
        .program
        .unwrap_or_else(|| PathBuf::from(DEFAULT_WORKER_PROGRAM));
    if program.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "worker.program",
            "path must not be empty",
        ));
    }

    let zoom = worker.zoom.unwrap_or(DEFAULT_WORKER_ZOOM);
    if !zoom.is_finite() || zoom <= 0.0 {
        return Err(LoadError::invalid(
            "worker.zoom",
            "must be a positive number",
        ));
    }

    let render_timeout_ms = worker
        .render_timeout_ms
        .unwrap_or(DEFAULT_WORKER_RENDER_TIMEOUT_MS);
    if render_timeout_ms == 0 {
        return Err(LoadError::invalid(
            "worker.render_timeout_ms",
            "must be greater than zero",
        ));
    }

    Ok(WorkerSettings {
        program,
        args: worker.args.unwrap_or_default(),
        format: worker
            .format
            .unwrap_or_else(|| DEFAULT_WORKER_FORMAT.to_string()),
        orientation: worker
            .orientation
            .unwrap_or_else(|| DEFAULT_WORKER_ORIENTATION.to_string()),
        zoom,
        margin: worker
            .margin
            .unwrap_or_else(|| DEFAULT_WORKER_MARGIN.to_string()),
        render_timeout: Duration::from_millis(render_timeout_ms),
    })
}

fn build_jobs_settings(jobs: RawJobsSettings) -> Result<JobsSettings, LoadError> {
    let scope = match jobs.scope {
        Some(value) => {
            JobScope::from_str(&value).map_err(|reason| LoadError::invalid("jobs.scope", reason))?
        }
        None => JobScope::default(),
    };

    let session_cookie = jobs
        .session_cookie
        .unwrap_or_else(|| DEFAULT_SESSION_COOKIE.to_string());
    let valid_cookie_name = !session_cookie.is_empty()
        && session_cookie
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
    if !valid_cookie_name {
        return Err(LoadError::invalid(
            "jobs.session_cookie",
            "must be a non-empty token of letters, digits, `_` or `-`",
        ));
    }

    Ok(JobsSettings {
        scope,
        session_cookie,
    })
}

fn build_conditions(conditions: RawConditionsSettings) -> Result<PathConditions, LoadError> {
    let only = conditions.only.unwrap_or_default();
    let except = conditions.except.unwrap_or_default();
    PathConditions::from_patterns(&only, &except)
        .map_err(|err| LoadError::invalid("conditions", format!("invalid pattern: {err}")))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
    public_base_url: Option<String>,
    upstream_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRenderSettings {
    out_path: Option<PathBuf>,
    polling_interval_seconds: Option<u64>,
    polling_offset_seconds: Option<u64>,
    cache_ttl_seconds: Option<u64>,
    request_timeout_seconds: Option<u64>,
    sweep_interval_seconds: Option<u64>,
    staging_grace_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawWorkerSettings {
    program: Option<PathBuf>,
    args: Option<Vec<String>>,
    format: Option<String>,
    orientation: Option<String>,
    zoom: Option<f64>,
    margin: Option<String>,
    render_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawJobsSettings {
    scope: Option<String>,
    session_cookie: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawConditionsSettings {
    only: Option<Vec<String>>,
    except: Option<Vec<String>>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn parse_http_url(value: Option<String>, key: &'static str) -> Result<Option<Url>, LoadError> {
    let Some(value) = value.filter(|value| !value.trim().is_empty()) else {
        return Ok(None);
    };
    let url = Url::parse(value.trim())
        .map_err(|err| LoadError::invalid(key, format!("failed to parse `{value}`: {err}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(LoadError::invalid(key, "scheme must be http or https"));
    }
    Ok(Some(url))
}

fn positive_secs(value: u64, key: &'static str) -> Result<Duration, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_secs(value))
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}
