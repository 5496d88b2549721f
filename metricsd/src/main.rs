mod config;

use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use config::{CommonConfig, Config};
use query_runner::metrics_defs::ALL_METRICS;
use query_runner::{Datasource, MetricsQuery, ResourceId, ResourceKind, SelectBy, TimeRange};
use shared::metrics_defs::MetricType;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "metricsd", about = "Hetzner Cloud metrics data source")]
struct Cli {
    /// Path to the YAML config file
    #[arg(long, short)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Query metrics and print the resulting series as JSON
    Query(QueryArgs),
    /// List servers or load balancers
    Resources {
        #[arg(long)]
        resource_type: ResourceKind,
        #[arg(long = "label-selector")]
        label_selectors: Vec<String>,
    },
}

#[derive(Args)]
struct QueryArgs {
    #[arg(long)]
    resource_type: ResourceKind,
    #[arg(long)]
    metric: String,
    /// Resource to query, may be repeated
    #[arg(long = "id")]
    ids: Vec<ResourceId>,
    /// Select resources by label instead of id, may be repeated
    #[arg(long = "label-selector", conflicts_with = "ids")]
    label_selectors: Vec<String>,
    #[arg(long)]
    from: DateTime<Utc>,
    #[arg(long)]
    to: DateTime<Utc>,
    #[arg(long, default_value_t = 60)]
    interval_secs: u64,
    #[arg(long, default_value_t = 1000)]
    max_data_points: u64,
    #[arg(long, default_value = "")]
    legend_format: String,
}

impl From<QueryArgs> for MetricsQuery {
    fn from(args: QueryArgs) -> Self {
        let select_by = if args.label_selectors.is_empty() {
            SelectBy::Id
        } else {
            SelectBy::Label
        };

        MetricsQuery {
            resource_type: args.resource_type,
            metrics_type: args.metric,
            select_by,
            resource_ids: args.ids,
            label_selectors: args.label_selectors,
            legend_format: args.legend_format,
            time_range: TimeRange::new(args.from, args.to),
            interval_ms: args.interval_secs.saturating_mul(1000),
            max_data_points: args.max_data_points,
        }
    }
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error(transparent)]
    Query(#[from] query_runner::QueryRunnerError),
    #[error("could not encode output: {0}")]
    Output(#[from] serde_json::Error),
    #[error("could not install metrics exporter: {0}")]
    Metrics(String),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::from_file(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let _sentry = init_logging(&config.common);

    if let Err(e) = init_metrics(&config.common) {
        tracing::warn!("Metrics disabled: {e}");
    }

    match run(cli.command, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Command failed");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(config: &CommonConfig) -> Option<sentry::ClientInitGuard> {
    let guard = config.logging.as_ref().map(|logging| {
        sentry::init((
            logging.sentry_dsn.as_str(),
            sentry::ClientOptions {
                release: sentry::release_name!(),
                ..Default::default()
            },
        ))
    });

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(guard.as_ref().map(|_| sentry::integrations::tracing::layer()))
        .init();

    guard
}

fn init_metrics(config: &CommonConfig) -> Result<(), CliError> {
    let Some(metrics_config) = &config.metrics else {
        return Ok(());
    };

    let recorder = metrics_exporter_statsd::StatsdBuilder::from(
        metrics_config.statsd_host.as_str(),
        metrics_config.statsd_port,
    )
    .build(Some("metricsd"))
    .map_err(|e| CliError::Metrics(e.to_string()))?;
    metrics::set_global_recorder(recorder).map_err(|e| CliError::Metrics(e.to_string()))?;

    for def in ALL_METRICS {
        match def.metric_type {
            MetricType::Counter => metrics::describe_counter!(def.name, def.description),
            MetricType::Gauge => metrics::describe_gauge!(def.name, def.description),
            MetricType::Histogram => metrics::describe_histogram!(def.name, def.description),
        }
    }

    tracing::info!(
        host = %metrics_config.statsd_host,
        port = metrics_config.statsd_port,
        "Sending metrics to statsd"
    );
    Ok(())
}

async fn run(command: Command, config: Config) -> Result<(), CliError> {
    let datasource = Datasource::new(&config.datasource)?;

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, cancelling");
            ctrl_c.cancel();
        }
    });

    let output = match command {
        Command::Query(args) => {
            let query = MetricsQuery::from(args);
            let series = datasource.query_metrics(&cancel, &query).await?;
            tracing::info!(series = series.len(), "Query complete");
            serde_json::to_string_pretty(&series)?
        }
        Command::Resources {
            resource_type,
            label_selectors,
        } => {
            let resources = datasource
                .list_resources(resource_type, &label_selectors)
                .await?;
            serde_json::to_string_pretty(&resources)?
        }
    };

    println!("{output}");
    Ok(())
}
