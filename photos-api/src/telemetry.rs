use metrics_exporter_statsd::{StatsdBuilder, StatsdError};
use photos::config::{MetricsSettings, Settings};
use photos::metrics_defs::ALL_METRICS;
use shared::metrics_defs::describe_metrics;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(thiserror::Error, Debug)]
pub enum TelemetryError {
    #[error("could not build statsd exporter: {0}")]
    Statsd(#[from] StatsdError),
    #[error("a metrics recorder is already installed")]
    RecorderAlreadySet,
    #[error("could not install tracing subscriber: {0}")]
    Subscriber(#[from] tracing_subscriber::util::TryInitError),
}

/// Keeps the Sentry client alive; events are flushed when it is dropped.
pub struct TelemetryGuard {
    _sentry: Option<sentry::ClientInitGuard>,
}

/// Installs logging, error reporting and metrics according to `settings`.
pub fn init(settings: &Settings) -> Result<TelemetryGuard, TelemetryError> {
    let sentry_guard = settings.logging.sentry_dsn.as_deref().map(|dsn| {
        sentry::init((
            dsn,
            sentry::ClientOptions {
                release: sentry::release_name!(),
                ..Default::default()
            },
        ))
    });

    // RUST_LOG wins over the configured level when set
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.server.log_level.as_filter()));

    let fmt_layer = if settings.logging.as_json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .with(
            sentry_guard
                .as_ref()
                .map(|_| sentry::integrations::tracing::layer()),
        )
        .try_init()?;

    if let Some(metrics_settings) = &settings.metrics {
        init_statsd(metrics_settings)?;
        tracing::info!(
            host = %metrics_settings.statsd_host,
            port = metrics_settings.statsd_port,
            "exporting metrics to statsd"
        );
    }

    Ok(TelemetryGuard {
        _sentry: sentry_guard,
    })
}

fn init_statsd(settings: &MetricsSettings) -> Result<(), TelemetryError> {
    let recorder = StatsdBuilder::from(settings.statsd_host.clone(), settings.statsd_port)
        .build(Some(settings.prefix.as_str()))?;

    metrics::set_global_recorder(recorder).map_err(|_| TelemetryError::RecorderAlreadySet)?;
    describe_metrics(ALL_METRICS);

    Ok(())
}
