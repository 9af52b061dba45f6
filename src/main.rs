use clap::Parser;
use data_extractor::config::PROPERTIES_ENV;
use data_extractor::{Config, DataExtractor};
use std::error::Error as _;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "data-extractor", version, about = "Extract data from a secure agent into a sink")]
struct Args {
    /// Configuration file (TOML)
    #[arg(long, env = PROPERTIES_ENV)]
    config: PathBuf,

    /// Log at debug level
    #[arg(long)]
    verbose: bool,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

fn report(err: &data_extractor::Error) {
    let mut chain = Vec::new();
    let mut source = err.source();
    while let Some(cause) = source {
        chain.push(cause.to_string());
        source = cause.source();
    }
    tracing::debug!(causes = ?chain, "Error running extractor");
    tracing::error!("Error running extractor: {err}");
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.verbose);

    let config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let extractor = match DataExtractor::from_config(&config) {
        Ok(extractor) => extractor,
        Err(e) => {
            report(&e);
            return ExitCode::FAILURE;
        }
    };

    match data_extractor::run_with_shutdown(&extractor).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report(&e);
            ExitCode::FAILURE
        }
    }
}
