use std::sync::Once;

use metrics::{Unit, describe_counter};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "pdfsnap_render_started_total",
            Unit::Count,
            "Total number of rendering workers launched."
        );
        describe_counter!(
            "pdfsnap_render_served_total",
            Unit::Count,
            "Total number of rendered PDFs served."
        );
        describe_counter!(
            "pdfsnap_render_ready_total",
            Unit::Count,
            "Total number of ready notifications sent to async clients."
        );
        describe_counter!(
            "pdfsnap_render_timeout_total",
            Unit::Count,
            "Total number of render jobs that exceeded the request timeout."
        );
        describe_counter!(
            "pdfsnap_render_invalid_total",
            Unit::Count,
            "Total number of empty artifacts discarded."
        );
        describe_counter!(
            "pdfsnap_render_launch_failed_total",
            Unit::Count,
            "Total number of rendering workers that could not be started."
        );
        describe_counter!(
            "pdfsnap_sweep_removed_total",
            Unit::Count,
            "Total number of cache files and jobs removed by the sweeper, by kind."
        );
    });
}
