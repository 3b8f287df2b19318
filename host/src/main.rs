/// YTM Native Host - Main Entry Point
///
/// Native messaging host launched by the browser for each request. Reads one
/// framed JSON request from stdin, runs yt-dlp or a helper command, and writes
/// events plus a final reply to stdout.
mod commands;
mod config;
mod library;
mod output_parser;
mod platform;
mod workers;

use tracing::info;

use commands::AppState;
use config::HostConfig;
use workers::tool_locator::ToolLocator;
use ytm_shared::framing::{FrameReader, FrameWriter};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    // stdout carries the protocol; logs go to stderr
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ytm_host=info,ytm_shared=info".into()),
        )
        .init();

    info!("=== YTM Native Host Starting ===");
    match std::env::args().nth(1) {
        Some(origin) => info!("Caller: {}", origin),
        None => info!("Caller: unknown"),
    }

    let config = HostConfig::from_env();
    info!("Output directory: {}", config.output_dir.display());
    info!("Downloader provider: {}", config.provider.as_str());

    let tools = ToolLocator::system(config.tool_overrides.clone());
    let state = AppState { config, tools };

    let mut reader = FrameReader::stdin();
    let mut writer = FrameWriter::stdout();
    let served = commands::serve_one(&mut reader, &mut writer, &state).await?;

    info!("Host exiting (request served: {})", served);
    Ok(())
}
