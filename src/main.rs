use anyhow::{Context, Result};
use nearyou::api::{create_router, ApiState};
use nearyou::cache::{run_sweeper, MessageCache};
use nearyou::config::{GeneratorKind, NearYouConfig, SinkKind};
use nearyou::dataflow::{run_metrics_reporter, run_partition, Downstream, MessageComposer, MetricsTracker, PartitionWorker};
use nearyou::generator::{ChatCompletionsGenerator, Generator, OfferDirectory, ProfileDirectory, TemplateGenerator};
use nearyou::geo::{run_refresh_loop, FileCatalog, PoiCatalog, SharedIndex, SpatialIndex};
use nearyou::nats::NatsClient;
use nearyou::sink::{sink_channel, AnalyticsStore, Broadcaster, ClickHouseStore, DiscardStore, JsonLinesStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "nearyou=info".into()),
        )
        .init();

    info!("NearYou dataflow starting...");

    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("NEARYOU_CONFIG").ok())
        .unwrap_or_else(|| "nearyou.toml".to_string());
    let mut config = NearYouConfig::load_or_default(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path))?;
    config.apply_env_overrides();
    config.validate()?;

    info!(
        config = %config_path,
        nats_url = %config.nats.url,
        partitions = config.nats.partitions,
        radius_m = config.proximity.radius_m,
        exit_radius_m = config.proximity.exit_radius_m,
        cooldown_secs = config.proximity.cooldown_secs,
        "Configuration loaded"
    );

    let metrics = MetricsTracker::new();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Spatial index
    let catalog: Arc<dyn PoiCatalog> = Arc::new(FileCatalog::new(&config.index.catalog_path));
    let index = match catalog.load().await {
        Ok(pois) => Arc::new(SharedIndex::new(pois, config.index.cell_size_m)),
        Err(e) => {
            warn!(catalog = %catalog.describe(), error = %e, "POI catalog unavailable, starting with an empty index");
            Arc::new(SharedIndex::empty(config.index.cell_size_m))
        }
    };
    info!(pois = index.len(), "Spatial index ready");

    // Message generation
    let cache = Arc::new(MessageCache::new(config.cache.settings()));
    let generator: Arc<dyn Generator> = match config.generator.kind {
        GeneratorKind::Chat => Arc::new(
            ChatCompletionsGenerator::new(
                config
                    .generator
                    .chat_settings(cache.settings().generation_timeout),
            )
            .context("Failed to build chat completions client")?,
        ),
        GeneratorKind::Template => Arc::new(TemplateGenerator),
    };
    let profiles = match &config.generator.profiles_path {
        Some(path) => ProfileDirectory::load(path)
            .with_context(|| format!("Failed to load profiles from {}", path))?,
        None => ProfileDirectory::default(),
    };
    let offers = match &config.generator.offers_path {
        Some(path) => OfferDirectory::load(path)
            .with_context(|| format!("Failed to load offers from {}", path))?,
        None => OfferDirectory::default(),
    };
    info!(
        generator = generator.name(),
        profiles = profiles.len(),
        offers = offers.len(),
        "Message generator ready"
    );
    let composer =
        MessageComposer::new(Arc::clone(&cache), generator, Arc::new(profiles)).with_offers(Arc::new(offers));

    // Sink and live subscribers
    let sink_settings = config.sink.settings();
    let store: Arc<dyn AnalyticsStore> = match config.sink.kind {
        SinkKind::ClickHouse => Arc::new(
            ClickHouseStore::new(&config.sink.url, &config.sink.table, sink_settings.write_timeout)
                .context("Failed to build ClickHouse client")?,
        ),
        SinkKind::Jsonl => Arc::new(JsonLinesStore::new(&config.sink.path)),
        SinkKind::None => Arc::new(DiscardStore),
    };
    let (sink, writer) = sink_channel(sink_settings, store, metrics.clone());
    let writer_handle = tokio::spawn(writer.run());

    let broadcaster = Arc::new(Broadcaster::new(config.broadcast.subscriber_buffer, metrics.clone()));
    let downstream = Downstream {
        sink,
        broadcaster: Arc::clone(&broadcaster),
    };

    // Partition workers
    let nats = NatsClient::connect(config.nats.clone())
        .await
        .context("Failed to connect to NATS")?;

    let policy = config.proximity.policy();
    let index_timeout = Duration::from_millis(config.proximity.index_timeout_ms);
    let poll_timeout = Duration::from_millis(config.proximity.poll_timeout_ms);
    let shared_index: Arc<dyn SpatialIndex> = index.clone();

    let mut workers = Vec::new();
    for partition in 0..config.nats.partitions {
        let worker = PartitionWorker::new(
            partition,
            policy,
            Arc::clone(&shared_index),
            composer.clone(),
            index_timeout,
            metrics.clone(),
        );
        workers.push(tokio::spawn(run_partition(
            nats.jetstream().clone(),
            config.nats.clone(),
            worker,
            downstream.clone(),
            poll_timeout,
            shutdown_rx.clone(),
        )));
    }
    info!(partitions = workers.len(), "Partition workers started");

    // Background maintenance
    if config.index.refresh_interval_secs > 0 {
        tokio::spawn(run_refresh_loop(
            index.clone(),
            catalog,
            config.index.refresh_interval_secs,
            shutdown_rx.clone(),
        ));
    }
    tokio::spawn(run_sweeper(
        Arc::clone(&cache),
        config.cache.sweep_interval_secs,
        shutdown_rx.clone(),
    ));
    tokio::spawn(run_metrics_reporter(
        metrics.clone(),
        Arc::clone(&cache),
        config.metrics.report_interval_seconds,
        config.metrics.active_entity_window_seconds,
        shutdown_rx.clone(),
    ));

    // HTTP API server
    let router = create_router(ApiState {
        metrics: metrics.clone(),
        cache: Arc::clone(&cache),
        broadcaster,
        index,
        active_window_seconds: config.metrics.active_entity_window_seconds,
    });
    let listener = tokio::net::TcpListener::bind(&config.api.bind)
        .await
        .with_context(|| format!("Failed to bind API address {}", config.api.bind))?;
    info!(bind = %config.api.bind, "API listening");

    let mut server_shutdown = shutdown_rx.clone();
    let server_handle = tokio::spawn(async move {
        let serve = axum::serve(listener, router).with_graceful_shutdown(async move {
            let _ = server_shutdown.changed().await;
        });
        if let Err(e) = serve.await {
            error!(error = %e, "API server error");
        }
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl_c signal")?;
    info!("Shutdown signal received");

    let _ = shutdown_tx.send(true);

    for (partition, handle) in workers.into_iter().enumerate() {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(partition, error = %e, "Partition worker failed"),
            Err(e) => error!(partition, error = %e, "Partition worker panicked"),
        }
    }

    // Last sink handle goes away here, letting the writer drain
    drop(downstream);
    if let Err(e) = writer_handle.await {
        error!(error = %e, "Sink writer panicked");
    }
    let _ = server_handle.await;

    info!(
        events = metrics.get_total_events(),
        "NearYou dataflow stopped"
    );
    Ok(())
}
