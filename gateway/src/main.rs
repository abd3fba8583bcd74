mod config;

use batch_proxy::errors::BatchError;
use clap::{Args, Parser};
use config::{API_BASE_URL_ENV, Config, ConfigError, LoggingConfig, MetricsConfig};
use metrics_exporter_statsd::StatsdBuilder;
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
enum CliCommand {
    /// Serve the batched API proxy
    BatchProxy(CliArgs),
}

#[derive(Args)]
struct CliArgs {
    #[arg(long, default_value = "config.yaml")]
    config_path: PathBuf,
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("could not install metrics recorder: {0}")]
    Metrics(String),
    #[error("could not start runtime: {0}")]
    Runtime(#[from] std::io::Error),
    #[error(transparent)]
    Proxy(#[from] BatchError),
}

fn main() {
    let cli = CliCommand::parse();

    let result = match cli {
        CliCommand::BatchProxy(args) => run_batch_proxy(args),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run_batch_proxy(args: CliArgs) -> Result<(), CliError> {
    let config = Config::from_file(&args.config_path)?
        .finalize(std::env::var(API_BASE_URL_ENV).ok())?;

    // Held for the lifetime of the process so queued events get flushed
    let _sentry = init_logging(config.common.logging.as_ref());
    if let Some(metrics) = &config.common.metrics {
        init_metrics(metrics)?;
    }

    tracing::info!(
        listener_port = config.proxy.listener.port,
        batch_path = %config.proxy.batch_path,
        "Starting batch proxy"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(batch_proxy::run(config.proxy))?;

    Ok(())
}

fn init_logging(logging: Option<&LoggingConfig>) -> Option<sentry::ClientInitGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let guard = logging.map(|logging| {
        sentry::init((
            logging.sentry_dsn.as_str(),
            sentry::ClientOptions {
                release: sentry::release_name!(),
                ..Default::default()
            },
        ))
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(guard.is_some().then(sentry::integrations::tracing::layer))
        .init();

    guard
}

fn init_metrics(metrics: &MetricsConfig) -> Result<(), CliError> {
    let recorder = StatsdBuilder::from(metrics.statsd_host.as_str(), metrics.statsd_port)
        .build(Some("batch_proxy"))
        .map_err(|e| CliError::Metrics(e.to_string()))?;

    metrics::set_global_recorder(recorder).map_err(|e| CliError::Metrics(e.to_string()))?;

    for def in batch_proxy::metrics_defs::ALL_METRICS {
        tracing::debug!(
            name = def.name,
            kind = def.metric_type.as_str(),
            description = def.description,
            "Registered metric"
        );
    }

    Ok(())
}
