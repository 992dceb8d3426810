use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use quantledger::api::{self, AppState};
use quantledger::bus::{BusProfile, MessageBus, NatsBus};
use quantledger::config::Config;
use quantledger::consumers::{spawn_consumers, EventHandlers};
use quantledger::db::{init_db, Repository};
use quantledger::engine::Processor;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env().context("loading configuration")?;
    info!(environment = ?config.environment, "Starting ledger service");

    let pool = init_db(&config.db_path, config.db_max_conns)
        .await
        .context("initializing database")?;
    let repo = Arc::new(Repository::new(pool));
    let processor = Arc::new(Processor::new(repo.clone()));
    let handlers = Arc::new(EventHandlers::new(repo.clone()));

    let cancel = CancellationToken::new();
    let profile = BusProfile::for_environment(config.environment);

    let (bus, consumer_tasks): (Option<Arc<dyn MessageBus>>, Vec<JoinHandle<()>>) =
        if config.bus_enabled {
            let bus: Arc<dyn MessageBus> = Arc::new(
                NatsBus::connect(&config.bus_url, &config.bus_client_id)
                    .await
                    .context("connecting to message bus")?,
            );
            for spec in profile.streams() {
                bus.ensure_stream(&spec).await.context("ensuring stream")?;
            }
            let tasks = spawn_consumers(
                bus.clone(),
                handlers,
                &profile,
                &config.bus_durable_prefix,
                cancel.clone(),
            )
            .await
            .context("starting consumers")?;
            (Some(bus), tasks)
        } else {
            info!("Bus disabled, event consumers not started");
            (None, Vec::new())
        };

    let state = AppState {
        repo,
        processor,
        bus,
        jwt_secret: config.jwt_secret.clone(),
    };
    let app = api::router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("binding listener")?;
    info!(addr = %addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving")?;

    // stop the consumers after the server drains
    cancel.cancel();
    let drain = async {
        for task in consumer_tasks {
            let _ = task.await;
        }
    };
    if tokio::time::timeout(Duration::from_secs(config.shutdown_timeout_secs), drain)
        .await
        .is_err()
    {
        warn!("Consumers did not stop within the shutdown window");
    }

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Shutdown signal received");
}
