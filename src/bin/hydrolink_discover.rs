use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::Local;
use clap::Parser;
use serde::Serialize;
use tracing::{error, info};

use hydrolink::discovery::clean_devices;
use hydrolink::{Config, Error, HydroLinkApi, logging};

/// Dump every data point the HydroLink cloud reports, raw and categorized.
#[derive(Debug, Parser)]
#[command(version)]
struct Args {
    #[arg(long, env = "HYDROLINK_EMAIL")]
    email: String,

    #[arg(long, env = "HYDROLINK_PASSWORD", hide_env_values = true)]
    password: String,

    /// Optional TOML file for endpoint and timeout overrides
    #[arg(short, long, env = "HYDROLINK_CONFIG")]
    config: Option<PathBuf>,

    #[arg(short, long, default_value = "outputs")]
    output_dir: PathBuf,

    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logging::init(&args.log_level)?;

    let config = match &args.config {
        Some(path) => {
            Config::load(path).with_context(|| format!("loading {}", path.display()))?
        }
        None => Config::default(),
    }
    .with_credentials(Some(args.email), Some(args.password));
    config.validate()?;

    info!("Connecting to HydroLink API...");
    let api = HydroLinkApi::from_config(&config)?;
    let snapshot = match api.get_data().await {
        Ok(snapshot) => snapshot,
        Err(Error::InvalidAuth) => {
            error!("Authentication failed. Please check your email and password.");
            anyhow::bail!(Error::InvalidAuth);
        }
        Err(e) => {
            error!("Could not fetch HydroLink data: {e}");
            return Err(e.into());
        }
    };
    info!(devices = snapshot.devices.len(), "fetched device data");

    tokio::fs::create_dir_all(&args.output_dir)
        .await
        .with_context(|| format!("creating {}", args.output_dir.display()))?;

    let stamp = Local::now().format("%Y%m%d_%H%M%S");
    let raw = args.output_dir.join(format!("discovery_raw_{stamp}.json"));
    write_json(&raw, &snapshot.devices).await?;
    info!("Raw data saved to {}", raw.display());

    let cleaned = args.output_dir.join(format!("discovery_cleaned_{stamp}.json"));
    write_json(&cleaned, &clean_devices(&snapshot.devices)).await?;
    info!("Cleaned data saved to {}", cleaned.display());

    Ok(())
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let body = serde_json::to_string_pretty(value)?;
    tokio::fs::write(path, body)
        .await
        .with_context(|| format!("writing {}", path.display()))
}
