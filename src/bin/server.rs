//! # Relay Server Binary
//!
//! Thin wrapper that loads configuration and runs the voice relay until Ctrl+C.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin server -- --port 5500
//! cargo run --bin server -- --config config/relay.toml --framing line
//! ```

use clap::Parser;
use env_logger::Builder;
use log::{error, LevelFilter};
use std::io::Write;

use voice_relay::common::framing::FramingMode;
use voice_relay::{RelayConfig, RelayServer};

/// Command-line arguments for the relay server
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a TOML configuration file; defaults are used when omitted
    #[arg(short, long)]
    config: Option<String>,

    /// Interface to listen on (overrides the config file)
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on (overrides the config file)
    #[arg(short, long)]
    port: Option<u16>,

    /// Message framing: one message per line, or one per read
    #[arg(long, value_enum)]
    framing: Option<FramingMode>,
}

/// Initialize logging: `[HH:MM:SS] [LEVEL] message`, INFO unless `RUST_LOG` says otherwise.
fn init_logger() {
    Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}] [{}] {}",
                chrono::Local::now().format("%H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logger();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => RelayConfig::from_file(path)?,
        None => RelayConfig::default(),
    };
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(framing) = args.framing {
        config.relay.framing = framing;
    }

    let server = RelayServer::bind(config).await?;

    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("❌ Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await?;

    Ok(())
}
