mod config;
mod database;
mod engine;
mod error;
mod market;
mod ml;
mod types;
mod web;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::config::Settings;
use database::Database;
use engine::{ForecastService, TrainingJob};
use market::{HistoricalSource, YahooClient};
use ml::{ArtifactStore, FileArtifactStore};
use web::{start_server, AppState};

#[derive(Parser)]
#[command(name = "stock-forecaster")]
#[command(version)]
#[command(about = "LSTM stock price forecaster with an HTTP prediction service", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP prediction service
    Serve {
        /// Override the configured port
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Train and persist a model for one ticker and interval
    Train {
        /// Ticker symbol (e.g. AAPL, RELIANCE.NS)
        ticker: String,
        /// Bar interval (1m, 5m, 15m, 30m, 60m, 1h, 1d, ...)
        #[arg(short, long, default_value = "1d")]
        interval: String,
    },
    /// Forecast closing prices with a trained model
    Predict {
        ticker: String,
        #[arg(short, long, default_value = "1d")]
        interval: String,
        /// Horizon such as "5 days" or "2 hours"
        #[arg(short, long, default_value = "5 days")]
        timeframe: String,
    },
    /// List recorded training runs
    Runs {
        /// Only show runs for this ticker
        #[arg(short, long)]
        ticker: Option<String>,
        #[arg(short, long, default_value = "20")]
        limit: u32,
    },
}

struct Components {
    source: Arc<dyn HistoricalSource>,
    store: Arc<dyn ArtifactStore>,
    database: Option<Arc<Database>>,
}

async fn build_components(settings: &Settings) -> Result<Components> {
    let source: Arc<dyn HistoricalSource> = Arc::new(YahooClient::new(&settings.data)?);
    let store: Arc<dyn ArtifactStore> = Arc::new(FileArtifactStore::new(&settings.storage.artifacts_dir));

    let database = match &settings.storage.database_url {
        Some(url) => match Database::new(url).await {
            Ok(db) => Some(Arc::new(db)),
            Err(e) => {
                warn!("Training-run registry unavailable: {}", e);
                None
            }
        },
        None => None,
    };

    Ok(Components { source, store, database })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();

    // Initialize logging; RUST_LOG takes precedence when set
    let log_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Stock Forecaster v{}", env!("CARGO_PKG_VERSION"));

    let mut settings = Settings::load(&cli.config)?;
    if let Commands::Serve { port: Some(port) } = &cli.command {
        settings.server.port = *port;
    }
    if let Err(errors) = settings.validate() {
        return Err(anyhow!("Invalid configuration: {}", errors.join(", ")));
    }

    let components = build_components(&settings).await?;

    match cli.command {
        Commands::Serve { .. } => {
            let state = AppState {
                forecasts: Arc::new(
                    ForecastService::new(components.source.clone(), components.store.clone())
                        .with_max_steps(settings.model.max_steps),
                ),
                trainer: Arc::new(TrainingJob::new(
                    components.source,
                    components.store,
                    components.database.clone(),
                    settings.model.clone(),
                )),
                database: components.database,
            };
            start_server(state, &settings.server).await?;
        }
        Commands::Train { ticker, interval } => {
            let job = TrainingJob::new(
                components.source,
                components.store,
                components.database,
                settings.model.clone(),
            );
            let report = job.run(&ticker, &interval).await?;
            info!("Training report:\n{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Predict { ticker, interval, timeframe } => {
            let service =
                ForecastService::new(components.source, components.store).with_max_steps(settings.model.max_steps);
            let forecast = service.predict(&ticker, &timeframe, &interval).await?;
            if let Some(change) = forecast.projected_move() {
                info!("Projected move: ${}", change);
            }
            println!("{}", serde_json::to_string_pretty(&forecast)?);
        }
        Commands::Runs { ticker, limit } => {
            let db = components
                .database
                .ok_or_else(|| anyhow!("No training-run registry configured (storage.database_url)"))?;
            let runs = db.list_training_runs(ticker.as_deref(), limit).await?;
            if runs.is_empty() {
                info!("No training runs recorded");
            }
            for run in runs {
                info!(
                    "{} {}@{} trained {} | L={} train={} test={} | MAE {} RMSE {} R² {}",
                    run.run_id,
                    run.ticker,
                    run.interval,
                    run.trained_at.format("%Y-%m-%d %H:%M"),
                    run.window,
                    run.train_samples,
                    run.test_samples,
                    fmt_metric(run.mae),
                    fmt_metric(run.rmse),
                    fmt_metric(run.r2),
                );
            }
        }
    }

    Ok(())
}

fn fmt_metric(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{:.4}", v))
}
