//! Server lifecycle management
//!
//! Wires the store, brokers, hub and voting service for either a single node
//! (in-process bus) or a cluster (Redis), then serves HTTP until a shutdown
//! signal arrives.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use ballot_api::{create_router, AppState};
use ballot_cluster::{Broker, MemoryBus, PresenceListener, RedisBroker, SessionHub};
use ballot_core::service::VotingService;
use ballot_core::store::{KeyedStore, MemoryStore, RedisStore};
use ballot_core::{Config, KeyBuilder};

/// How long background tasks get to wind down after the HTTP server stops
const TASK_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// How often the in-memory store drops expired sessions
const MEMORY_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

pub struct BallotServer {
    state: AppState,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl BallotServer {
    /// Build every component and start the background tasks
    pub async fn build(config: &Config) -> Result<Self> {
        let keys = KeyBuilder::from_config(config);
        let ttl = Duration::from_secs(config.session.ttl_seconds);
        let cancel = CancellationToken::new();
        let mut tasks = Vec::new();

        let (store, hub_broker, presence_broker): (
            Arc<dyn KeyedStore>,
            Arc<dyn Broker>,
            Arc<dyn Broker>,
        ) = if config.redis_enabled() {
            let connect_timeout = Duration::from_secs(config.redis.connect_timeout_seconds);
            info!("Connecting to Redis...");

            let store = RedisStore::connect(&config.redis.url, ttl, connect_timeout).await?;
            let hub_broker =
                Arc::new(RedisBroker::connect("hub", &config.redis.url, connect_timeout).await?);
            let presence_broker = Arc::new(
                RedisBroker::connect("presence", &config.redis.url, connect_timeout).await?,
            );

            tasks.push(Arc::clone(&hub_broker).start(cancel.clone()));
            tasks.push(Arc::clone(&presence_broker).start(cancel.clone()));
            info!("Cluster mode: sessions shared through Redis");

            (Arc::new(store), hub_broker, presence_broker)
        } else {
            warn!("redis.url is empty, running as a single node with in-memory state");
            let bus = MemoryBus::new();
            let store = MemoryStore::new(ttl);
            tasks.push(store.start_sweeper(MEMORY_SWEEP_INTERVAL, cancel.clone()));
            (
                Arc::new(store),
                Arc::new(bus.broker()),
                Arc::new(bus.broker()),
            )
        };

        let hub = Arc::new(
            SessionHub::new(hub_broker, keys.clone()).with_presence(Arc::clone(&presence_broker)),
        );
        let voting = VotingService::new(store, hub.clone(), keys.clone());
        let presence = PresenceListener::new(presence_broker, voting.clone(), hub.clone(), keys);

        tasks.push(tokio::spawn(Arc::clone(&hub).run(cancel.clone())));
        tasks.push(tokio::spawn(presence.run(cancel.clone())));

        Ok(Self {
            state: AppState { voting, hub },
            cancel,
            tasks,
        })
    }

    /// Serve HTTP until Ctrl+C or SIGTERM, then stop the background tasks
    pub async fn run(self, config: &Config) -> Result<()> {
        let address = config.http_address();
        let listener = TcpListener::bind(&address).await?;
        info!("HTTP server listening on {}", address);

        let router = create_router(self.state.clone());
        let served = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await;

        if let Err(e) = &served {
            error!("HTTP server error: {}", e);
        }

        self.shutdown().await;
        served?;
        Ok(())
    }

    async fn shutdown(self) {
        info!("Shutting down ballot server...");
        self.cancel.cancel();

        for task in self.tasks {
            match tokio::time::timeout(TASK_SHUTDOWN_TIMEOUT, task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Background task failed: {}", e),
                Err(_) => warn!("Background task did not stop in time"),
            }
        }

        info!(
            remaining_sessions = self.state.hub.session_count().await,
            "Ballot server stopped"
        );
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C signal");
            }
            Err(e) => {
                error!("Failed to install Ctrl+C handler: {}", e);
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
                info!("Received SIGTERM signal");
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
