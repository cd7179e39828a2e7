use std::path::PathBuf;

use anyhow::{Context, Result};
use cipherline::{ClientConfig, Messenger};
use clap::Parser;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

mod shell;

#[derive(Parser, Debug)]
#[command(name = "cipherline", about = "End-to-end encrypted messaging client")]
struct Args {
    /// Backend base URL. Overrides CIPHERLINE_SERVER_URL.
    #[arg(short, long, value_name = "URL")]
    server: Option<String>,

    /// Directory for the local database and logs. Overrides CIPHERLINE_DATA_DIR.
    #[arg(short, long, value_name = "DIR")]
    data_dir: Option<PathBuf>,
}

/// Log to a daily rolling file in the data directory; the terminal belongs to the shell.
fn setup_logging(config: &ClientConfig) -> WorkerGuard {
    let appender = tracing_appender::rolling::daily(config.data_dir.join("logs"), "cipherline.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false),
        )
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .try_init()
        .ok();
    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let mut config = ClientConfig::from_env().context("invalid configuration")?;
    if let Some(server) = args.server.as_deref() {
        config = config.with_server_url(server)?;
    }
    if let Some(dir) = args.data_dir {
        config = config.with_data_dir(dir);
    }

    let _guard = setup_logging(&config);
    info!(server = %config.server_url, data_dir = %config.data_dir.display(), "starting");

    let messenger = Messenger::open(&config).context("failed to open client")?;
    println!("cipherline, connected to {}", config.server_url);
    if let Some(identity) = messenger.identity() {
        println!("restored session for {}", identity.username);
    }

    shell::run(messenger).await
}
