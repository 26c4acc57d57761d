mod cli;
mod engine;
mod metrics;
mod model;
mod orchestrator;
mod text_summary;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

fn init_logging(default_level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_env("BARGOZIN_LOG")
        .or_else(|_| EnvFilter::try_new(default_level))?;
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    let is_silent = args.silent;
    init_logging(&args.log_level)?;

    match cli::run(args).await {
        Ok(()) => {
            // Explicitly exit so lingering stdin readers do not keep the process alive
            std::process::exit(0);
        }
        Err(e) => {
            if is_silent {
                println!("{}", e);
                std::process::exit(1);
            } else {
                Err(e)
            }
        }
    }
}
