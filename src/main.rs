use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::TimeDelta;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use rentrack::config::Config;
use rentrack::engine::{Engine, Policy};
use rentrack::gateway::{run_dispatcher, Fanout, Gateway};
use rentrack::http::{router, AppState};
use rentrack::model::Vehicle;
use rentrack::scheduler::{run_compactor, run_status_scheduler};
use rentrack::store::WalStore;
use rentrack::telemetry::{LocalBroker, Relay, RelayConfig};

/// Returns (vehicles in file, vehicles written).
async fn load_vehicles(
    store: &WalStore,
    path: &Path,
) -> Result<(usize, usize), Box<dyn std::error::Error>> {
    let raw = std::fs::read(path)?;
    let vehicles: Vec<Vehicle> = serde_json::from_slice(&raw)?;
    let count = vehicles.len();
    let mut written = 0;
    for vehicle in vehicles {
        if store.sync_vehicle(vehicle).await? {
            written += 1;
        }
    }
    Ok((count, written))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    rentrack::observability::init(config.metrics_port);

    // Ensure data directory exists
    std::fs::create_dir_all(&config.data_dir)?;
    let store = Arc::new(WalStore::open(&config.data_dir.join("rentrack.wal"))?);
    if let Some(path) = &config.vehicles_file {
        let (n, written) = load_vehicles(&store, path).await?;
        info!("loaded {n} vehicles from {} ({written} new or changed)", path.display());
    }

    let cancel = CancellationToken::new();
    let (fanout, dispatch_rx) = Fanout::channel();
    let gateway = Arc::new(Gateway::new(config.admin_secret.clone()));
    let engine = Arc::new(Engine::new(
        store.clone(),
        store.clone(),
        Policy {
            max_advance_days: config.max_advance_days,
        },
        fanout.clone(),
    ));
    let relay = Arc::new(Relay::new(
        Arc::new(LocalBroker::new()),
        config.persist_positions.then(|| engine.clone()),
        fanout,
        RelayConfig {
            inbound_topic: config.telemetry_topic.clone(),
            liveness_timeout: TimeDelta::from_std(config.liveness_timeout)?,
            sweep_period: config.liveness_sweep,
            alert_policy: config.alert_policy,
        },
    ));

    let mut tasks = JoinSet::new();
    tasks.spawn(run_dispatcher(gateway.clone(), dispatch_rx, cancel.clone()));
    tasks.spawn(run_status_scheduler(engine.clone(), config.scheduler_interval, cancel.clone()));
    tasks.spawn(run_compactor(store.clone(), config.compact_threshold, cancel.clone()));
    tasks.spawn(relay.clone().run(cancel.clone()));
    tasks.spawn(relay.clone().run_liveness_sweep(cancel.clone()));

    let app = router(AppState {
        engine,
        relay,
        gateway,
        shutdown: cancel.clone(),
    });

    let addr = config.listen_addr();
    let listener = TcpListener::bind(&addr).await?;
    info!("rentrack listening on {addr}");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  vehicles: {}", store.vehicle_count());
    info!("  admin observer: {}", if config.admin_secret.is_some() { "enabled" } else { "disabled" });
    info!("  metrics: {}", config.metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics")));

    // Graceful shutdown: stop accepting on SIGTERM/ctrl-c, then stop background tasks
    let shutdown = {
        let cancel = cancel.clone();
        async move {
            let ctrl_c = tokio::signal::ctrl_c();
            #[cfg(unix)]
            {
                let mut sigterm =
                    tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                        .expect("failed to register SIGTERM handler");
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            #[cfg(not(unix))]
            {
                ctrl_c.await.ok();
            }
            info!("shutdown signal received");
            cancel.cancel();
        }
    };
    axum::serve(listener, app).with_graceful_shutdown(shutdown).await?;
    cancel.cancel();

    // Wait for in-flight ticks to finish (up to 10s)
    info!("draining background tasks...");
    let drained = tokio::time::timeout(Duration::from_secs(10), async {
        while tasks.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        warn!("drain timeout, {} background tasks still running", tasks.len());
        tasks.abort_all();
    }

    info!("rentrack stopped");
    Ok(())
}
