//! # Relay Client Binary
//!
//! Interactive line client for poking at a running relay. Every line typed on
//! stdin is sent as-is; every event from the relay is printed.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin client -- --address 127.0.0.1:5500 --register "p1|English"
//! > VOICE:p1|English|hello there
//! ```

use clap::Parser;
use env_logger::Builder;
use log::{error, info, LevelFilter};
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};

use voice_relay::RelayClient;

/// Command-line arguments for the relay client
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Relay address (host:port)
    #[arg(short, long, default_value = "127.0.0.1:5500")]
    address: String,

    /// Register right after connecting, as `identity|language`
    #[arg(short, long)]
    register: Option<String>,
}

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

    let client = RelayClient::connect(&args.address).await?;
    info!("🔗 Connected to {}", args.address);
    let (mut events, mut commands) = client.into_split();

    if let Some(registration) = &args.register {
        match registration.split_once('|') {
            Some((identity, language)) => commands.register(identity, language).await?,
            None => anyhow::bail!("--register expects `identity|language`"),
        }
    }

    let printer = tokio::spawn(async move {
        loop {
            match events.next_event().await {
                Ok(Some(event)) => println!("< {}", event),
                Ok(None) => {
                    info!("🔌 Relay closed the connection");
                    break;
                }
                Err(e) => {
                    error!("❌ {}", e);
                    break;
                }
            }
        }
    });

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = stdin.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        if let Err(e) = commands.send_raw(&line).await {
            error!("❌ Send failed: {}", e);
            break;
        }
    }

    commands.close().await?;
    let _ = printer.await;
    Ok(())
}
