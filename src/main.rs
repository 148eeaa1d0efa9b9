use axum_media_range::cli::Cli;
use axum_media_range::{logging, server};
use clap::Parser;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(err) = logging::init_logging() {
        eprintln!("media-range: logging unavailable: {:#}", err);
    }

    let result = match cli.into_config() {
        Ok(config) => server::run(config).await,
        Err(err) => Err(err),
    };

    if let Err(err) = result {
        tracing::error!("{:#}", err);
        eprintln!("media-range error: {:#}", err);
        std::process::exit(1);
    }
}
