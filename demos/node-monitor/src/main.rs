//! Connects to one node and prints everything it reports as JSON lines.
//!
//! ```text
//! node-monitor <host:port> [--password PASSWORD] [--trace SECONDS]
//! ```
//!
//! Log verbosity follows `RUST_LOG` (e.g. `RUST_LOG=nodelink_session=debug`).
//! Ctrl-C disconnects politely.

use std::time::Duration;

use clap::Parser;
use nodelink::prelude::*;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

// ---------------------------------------------------------------------------
// Arguments
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "node-monitor", version)]
#[command(about = "Connects to one node and prints its events as JSON lines")]
struct Args {
    /// Node address (host:port)
    address: String,

    /// Password for the connect request
    #[arg(short, long, default_value = "")]
    password: String,

    /// Log every frame for this many seconds after connecting
    #[arg(long, value_name = "SECONDS", value_parser = parse_seconds)]
    trace: Option<Duration>,
}

fn parse_seconds(value: &str) -> Result<Duration, String> {
    value
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|_| format!("expected whole seconds, got {value:?}"))
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

fn print_event(event: &SessionEvent) -> Result<(), serde_json::Error> {
    let line = match event {
        // Raw image bytes would swamp the terminal.
        SessionEvent::CameraImage { key, data } => serde_json::json!({
            "event": "camera_image",
            "key": key,
            "bytes": data.len(),
        })
        .to_string(),
        other => serde_json::to_string(other)?,
    };
    println!("{line}");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config = SessionConfig {
        password: args.password,
        frame_trace: args.trace,
        ..SessionConfig::default()
    };

    let (client, mut events) = Client::builder()
        .config(config)
        .address(&args.address)
        .connect()
        .await?;

    let mut interrupted = false;
    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                print_event(&event)?;
                if let SessionEvent::Disconnected { reason } = &event {
                    tracing::info!(%reason, "session ended");
                    break;
                }
            }
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                interrupted = true;
                tracing::info!("interrupted, disconnecting");
                client.disconnect().await?;
            }
        }
    }

    Ok(())
}
