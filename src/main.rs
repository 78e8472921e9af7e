use std::{process, sync::Arc};

use pdfsnap::{
    config,
    error::AppError,
    infra::{
        error::InfraError,
        http::{self, ProxyState},
        telemetry,
    },
    snapshot::{
        CacheStore, CacheSweeper, Clock, CommandLauncher, HeaderClientClassifier,
        InMemoryJobRegistry, JobRegistry, RenderOrchestrator, SnapshotConfig, SnapshotState,
        SystemClock, WorkerOptions,
    },
};
use tokio::{sync::Notify, task::JoinHandle};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Sweep(_) => run_sweep(settings).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let snapshot_config = SnapshotConfig::from(&settings);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = CacheStore::new(snapshot_config.out_path.clone(), clock.clone());
    store.ensure_dir().await.map_err(InfraError::from)?;

    let jobs: Arc<dyn JobRegistry> = Arc::new(InMemoryJobRegistry::new());
    let launcher = Arc::new(CommandLauncher::new(WorkerOptions::from(&settings.worker)));
    let orchestrator = RenderOrchestrator::new(
        snapshot_config.clone(),
        store.clone(),
        jobs.clone(),
        launcher,
        clock.clone(),
    );

    let sweeper = Arc::new(CacheSweeper::new(
        store,
        jobs,
        clock,
        snapshot_config.clone(),
    ));
    let sweeper_handle = sweeper.spawn();

    let upstream = settings
        .server
        .upstream_url
        .clone()
        .ok_or_else(|| AppError::validation("server.upstream_url is required to serve"))?;
    let client = reqwest::Client::builder()
        .build()
        .map_err(|err| InfraError::configuration(format!("failed to build http client: {err}")))?;

    let snapshot_state = SnapshotState {
        orchestrator: Arc::new(orchestrator),
        rules: Arc::new(settings.conditions.clone()),
        classifier: Arc::new(HeaderClientClassifier),
        public_base_url: settings.server.public_base_url.clone(),
    };
    let router = http::build_router(ProxyState::new(client, upstream.clone()), snapshot_state);

    info!(
        target = "pdfsnap::serve",
        addr = %settings.server.addr,
        upstream = %upstream,
        out_path = %snapshot_config.out_path.display(),
        scope = ?snapshot_config.job_scope,
        "Starting pdf snapshot proxy"
    );

    let result = serve_http(&settings, router).await;

    sweeper_handle.abort();
    let _ = sweeper_handle.await;

    result
}

async fn run_sweep(settings: config::Settings) -> Result<(), AppError> {
    let snapshot_config = SnapshotConfig::from(&settings);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = CacheStore::new(snapshot_config.out_path.clone(), clock.clone());
    let sweeper = CacheSweeper::new(
        store,
        Arc::new(InMemoryJobRegistry::new()),
        clock,
        snapshot_config,
    );

    let report = sweeper.run_once().await.map_err(InfraError::from)?;
    info!(
        target = "pdfsnap::sweep",
        artifacts_removed = report.artifacts_removed,
        staging_removed = report.staging_removed,
        "Sweep completed"
    );
    Ok(())
}

async fn serve_http(settings: &config::Settings, router: axum::Router) -> Result<(), AppError> {
    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    let shutdown = Arc::new(Notify::new());
    let server = axum::serve(listener, router.into_make_service()).with_graceful_shutdown({
        let shutdown = shutdown.clone();
        async move { shutdown.notified().await }
    });
    let mut server: JoinHandle<std::io::Result<()>> = tokio::spawn(server.into_future());

    tokio::select! {
        result = &mut server => return flatten_server_result(result),
        signal = tokio::signal::ctrl_c() => {
            if let Err(err) = signal {
                warn!(
                    target = "pdfsnap::serve",
                    error = %err,
                    "failed to listen for shutdown signal"
                );
            }
        }
    }

    info!(
        target = "pdfsnap::serve",
        grace_secs = settings.server.graceful_shutdown.as_secs(),
        "Shutdown requested, draining connections"
    );
    shutdown.notify_one();

    match tokio::time::timeout(settings.server.graceful_shutdown, &mut server).await {
        Ok(result) => flatten_server_result(result),
        Err(_) => {
            warn!(
                target = "pdfsnap::serve",
                "Graceful shutdown timed out, aborting open connections"
            );
            server.abort();
            Ok(())
        }
    }
}

fn flatten_server_result(
    result: Result<std::io::Result<()>, tokio::task::JoinError>,
) -> Result<(), AppError> {
    match result {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(AppError::unexpected(format!("server error: {err}"))),
        Err(err) => Err(AppError::unexpected(format!("server task failed: {err}"))),
    }
}
