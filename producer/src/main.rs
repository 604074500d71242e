use anyhow::{Context, Result};
use nearyou::config::NearYouConfig;
use nearyou::nats::{EventPublisher, NatsClient, PositionPublisher};
use producer::{spawn_fleet, OsrmClient, RouteProvider, SimulatorSettings, StraightLineRouter};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "producer=info,nearyou=info".into()),
        )
        .init();

    info!("NearYou producer starting...");

    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("NEARYOU_CONFIG").ok())
        .unwrap_or_else(|| "nearyou.toml".to_string());
    let mut config = NearYouConfig::load_or_default(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path))?;
    config.apply_env_overrides();
    config.validate()?;

    let simulation = config.simulation.clone();
    SimulatorSettings::from_config(&simulation)
        .validate()
        .context("Invalid simulation settings")?;

    // Empty osrm_url walks straight lines
    let router: Arc<dyn RouteProvider> = if simulation.osrm_url.is_empty() {
        Arc::new(StraightLineRouter)
    } else {
        Arc::new(
            OsrmClient::new(
                &simulation.osrm_url,
                &simulation.osrm_profile,
                Duration::from_millis(simulation.route_timeout_ms),
            )
            .context("Failed to build OSRM client")?,
        )
    };

    info!(
        entities = simulation.entities,
        speed_mps = simulation.speed_mps,
        tick_interval_ms = simulation.tick_interval_ms,
        router = router.name(),
        nats_url = %config.nats.url,
        "Configuration loaded"
    );

    let nats = NatsClient::connect(config.nats.clone())
        .await
        .context("Failed to connect to NATS")?;
    let publisher: Arc<dyn PositionPublisher> =
        Arc::new(EventPublisher::new(nats.jetstream().clone(), config.nats.clone()));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handles = spawn_fleet(&simulation, router, publisher, shutdown_rx);
    info!(entities = handles.len(), "Fleet started");

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl_c signal")?;
    info!("Shutdown signal received");
    let _ = shutdown_tx.send(true);

    let mut published = 0u64;
    for handle in handles {
        match handle.await {
            Ok(count) => published += count,
            Err(e) => error!(error = %e, "Entity task panicked"),
        }
    }

    info!(published, "NearYou producer stopped");
    Ok(())
}
