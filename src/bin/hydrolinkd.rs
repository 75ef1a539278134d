use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};

use hydrolink::mqtt::MqttPublisher;
use hydrolink::{Config, Coordinator, HydroLinkApi, build_sensors, logging};

/// Poll HydroLink water softeners and republish their readings over MQTT.
#[derive(Debug, Parser)]
#[command(version)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "HYDROLINK_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, env = "HYDROLINK_EMAIL")]
    email: Option<String>,

    #[arg(long, env = "HYDROLINK_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    #[arg(long, default_value = "info")]
    log_level: String,

    /// Poll once, print the readings and exit
    #[arg(long)]
    once: bool,
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
    .with_credentials(args.email, args.password);
    config.validate()?;

    let api = Arc::new(HydroLinkApi::from_config(&config)?);
    let coordinator = Coordinator::new(api, config.polling.clone());

    match coordinator.first_refresh().await {
        Ok(snapshot) => info!(
            devices = snapshot.devices.len(),
            sensors = build_sensors(&snapshot).len(),
            "initial HydroLink refresh done"
        ),
        Err(e) if e.is_auth() => {
            return Err(e).context("HydroLink rejected the configured credentials");
        }
        Err(e) if args.once => return Err(e).context("initial HydroLink refresh failed"),
        Err(e) => warn!(error = %e, "HydroLink unreachable at startup, will keep polling"),
    }

    if args.once {
        log_readings(&coordinator).await;
        return Ok(());
    }

    let handle = coordinator.spawn();
    let mut updates = coordinator.subscribe();

    let publisher = config.mqtt.as_ref().map(MqttPublisher::new);
    if let Some(publisher) = &publisher {
        publish(publisher, &coordinator).await;
    }

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Received Ctrl-C, shutting down");
                break;
            }
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                match &publisher {
                    Some(publisher) => publish(publisher, &coordinator).await,
                    None => log_readings(&coordinator).await,
                }
            }
        }
    }

    handle.shutdown().await;
    if let Some(publisher) = publisher {
        publisher.shutdown().await;
    }
    Ok(())
}

async fn publish(publisher: &MqttPublisher, coordinator: &Coordinator) {
    let Some(snapshot) = coordinator.snapshot().await else {
        if let Err(e) = publisher.publish_availability(false).await {
            error!("failed to publish availability: {:?}", e);
        }
        return;
    };

    let sensors = build_sensors(&snapshot);
    if let Err(e) = publisher.publish_availability(true).await {
        error!("failed to publish availability: {:?}", e);
    }
    if let Err(e) = publisher.publish_sensors(&sensors, &snapshot).await {
        error!("failed to publish sensor states: {:?}", e);
    }
}

async fn log_readings(coordinator: &Coordinator) {
    let Some(snapshot) = coordinator.snapshot().await else {
        warn!("HydroLink data unavailable");
        return;
    };
    for sensor in build_sensors(&snapshot).iter().filter(|s| s.enabled_by_default) {
        if let Some(value) = sensor.value_in(&snapshot) {
            info!(
                sensor = %sensor.name,
                value = %value,
                unit = sensor.unit().unwrap_or(""),
                "reading"
            );
        }
    }
}
