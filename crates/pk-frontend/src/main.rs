//! pk main entry point

use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use pk_cad::RebuildTarget;
use pk_core::Config;
use pk_core::constants::DEFAULT_LOG_FILTER;
use pk_frontend::{App, AppError};

/// Lazy, cached rebuilds of parametric feature models
#[derive(Parser, Debug)]
#[command(name = "pk", version, about)]
struct Cli {
    /// Model request file (RON)
    model: PathBuf,

    /// Configuration file (RON); defaults are used when it does not exist
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Only rebuild the first N symbols
    #[arg(long, value_name = "N")]
    up_to: Option<usize>,

    /// Keep running and read commands from stdin
    #[arg(short, long)]
    interactive: bool,

    /// Print the batch report as JSON
    #[arg(long, conflicts_with = "interactive")]
    json: bool,
}

fn init_tracing(config_filter: Option<&str>) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let fallback = config_filter.unwrap_or(DEFAULT_LOG_FILTER).to_string();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| fallback.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Load the config file, or `None` when there is none to load
fn load_config(path: Option<&Path>) -> Result<Option<Config>, AppError> {
    match path {
        Some(path) if path.exists() => Ok(Some(Config::load(path)?)),
        _ => Ok(None),
    }
}

fn run(cli: &Cli, config: &Config) -> Result<bool, AppError> {
    let mut app = App::new(&cli.model, config)?;
    let target = cli.up_to.map_or(RebuildTarget::All, RebuildTarget::UpTo);
    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    if cli.interactive {
        app.run_interactive(BufReader::new(std::io::stdin()), target, &mut out)?;
        Ok(app.state().last_outcome().is_none_or(|o| o.is_success()))
    } else {
        app.run_batch(target, cli.json, &mut out)
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            init_tracing(None);
            tracing::error!("{}", err);
            return ExitCode::FAILURE;
        }
    };
    init_tracing(config.as_ref().and_then(|c| c.log_filter.as_deref()));

    let config = config.unwrap_or_else(|| {
        if let Some(path) = &cli.config {
            tracing::warn!("Config file {} not found, using defaults", path.display());
        }
        Config::default()
    });

    tracing::info!("Starting pk");
    match run(&cli, &config) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            tracing::error!("{}", err);
            ExitCode::FAILURE
        }
    }
}
