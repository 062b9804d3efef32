use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use eta_watch::config::Config;
use eta_watch::watcher::Watcher;

/// ETA-watch - reports drift between a heating controller and its reference settings
#[derive(Parser, Debug)]
#[command(name = "eta-watch", version, about)]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Snapshot file (overrides the configuration)
    #[arg(short, long)]
    snapshot: Option<PathBuf>,

    /// MQTT broker address
    #[arg(short, long)]
    broker: Option<String>,

    /// MQTT broker port
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,reqwest=warn,rumqttc=warn")),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    if let Some(snapshot) = args.snapshot {
        config.snapshot_path = snapshot;
    }
    if let Some(broker) = args.broker {
        config.mqtt.broker = broker;
    }
    if let Some(port) = args.port {
        config.mqtt.port = port;
    }
    config.validate()?;

    info!(
        snapshot = %config.snapshot_path.display(),
        broker = %config.mqtt.broker,
        port = config.mqtt.port,
        "ETA-watch starting"
    );

    let (watcher, eventloop) = Watcher::new(config).await?;
    watcher.run(eventloop).await
}
