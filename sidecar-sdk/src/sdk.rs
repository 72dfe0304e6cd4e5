/// SDK facade: lifecycle requests, health pings, auto-connect and GameServer watching
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::SdkConfig;
use crate::error::{Result, SdkError};
use crate::network::{Alpha, Beta, LifecycleClient, Transport, WatchTransport};
use crate::types::GameServer;
use crate::watch::{WatchChannel, WatchHandle, WatchStats};

/// Background task aborted when dropped
#[derive(Debug)]
struct TaskGuard(JoinHandle<()>);

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Client of the local game server sidecar
///
/// Creating an `Sdk` starts, depending on the configuration:
/// - a health ping every `health_period` (unless zero),
/// - an auto-connect task that waits for the sidecar to answer, marks the game server
///   Ready and publishes the first GameServer to [`wait_connected`](Self::wait_connected).
///
/// The watch channel stays idle until the first [`watch_game_server`](Self::watch_game_server).
#[derive(Debug)]
pub struct Sdk {
    config: SdkConfig,
    client: LifecycleClient,
    alpha: Alpha,
    beta: Beta,
    watch: WatchChannel,
    connected_rx: tokio::sync::watch::Receiver<Option<Arc<GameServer>>>,
    health_task: Option<TaskGuard>,
    connect_task: Option<TaskGuard>,
}

impl Sdk {
    /// Start the SDK with the transport named by the configuration
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: SdkConfig) -> Result<Self> {
        let transport = Transport::from_config(&config);
        Self::with_transport(config, transport)
    }

    /// Start the SDK watching through a custom transport
    pub fn with_transport<T: WatchTransport>(config: SdkConfig, transport: T) -> Result<Self> {
        let client = LifecycleClient::new(&config)?;
        let watch = WatchChannel::new(transport, &config.watch);
        let (connected_tx, connected_rx) = tokio::sync::watch::channel(None);

        tracing::info!(
            "Sidecar SDK initialized, sidecar: {}, watch: {}, health ping: {:?}, retry limit: {}, auto-connect: {}",
            client.base_url(),
            watch.name(),
            config.health_period,
            config.retry_limit,
            config.auto_connect
        );

        let health_task = if config.health_period.is_zero() {
            None
        } else {
            Some(TaskGuard(tokio::spawn(health_loop(
                client.clone(),
                config.health_period,
            ))))
        };

        let connect_task = if config.auto_connect {
            let client = client.clone();
            let interval = config.connect_interval;
            Some(TaskGuard(tokio::spawn(async move {
                let game_server = connect_loop(&client, interval).await;
                if let Err(e) = client.ready().await {
                    tracing::error!("Failed to mark the game server Ready: {}", e);
                }
                // Nobody waiting is fine
                let _ = connected_tx.send(Some(Arc::new(game_server)));
            })))
        } else {
            None
        };

        Ok(Self {
            config,
            alpha: Alpha::new(client.clone()),
            beta: Beta::new(client.clone()),
            client,
            watch,
            connected_rx,
            health_task,
            connect_task,
        })
    }

    pub fn config(&self) -> &SdkConfig {
        &self.config
    }

    /// Lifecycle client, for requests not wrapped here
    pub fn client(&self) -> &LifecycleClient {
        &self.client
    }

    /// Player tracking
    pub fn alpha(&self) -> &Alpha {
        &self.alpha
    }

    /// Counters and lists
    pub fn beta(&self) -> &Beta {
        &self.beta
    }

    /// Poll the sidecar every `connect_interval` until it returns the GameServer
    ///
    /// Used when auto-connect is disabled. Does not mark the game server Ready.
    pub async fn connect(&self) -> GameServer {
        connect_loop(&self.client, self.config.connect_interval).await
    }

    /// Wait for the auto-connect task to reach the sidecar
    pub async fn wait_connected(&self) -> Result<Arc<GameServer>> {
        if !self.config.auto_connect {
            return Err(SdkError::InvalidConfig(
                "auto-connect is disabled, use connect() instead".to_string(),
            ));
        }
        let mut rx = self.connected_rx.clone();
        let game_server = rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| SdkError::ChannelClosed)?;
        game_server.clone().ok_or(SdkError::ChannelClosed)
    }

    pub async fn ready(&self) -> Result<()> {
        self.client.ready().await
    }

    pub async fn health(&self) -> Result<()> {
        self.client.health().await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.client.shutdown().await
    }

    pub async fn allocate(&self) -> Result<()> {
        self.client.allocate().await
    }

    pub async fn reserve(&self, duration: Duration) -> Result<()> {
        self.client.reserve(duration).await
    }

    pub async fn set_label(&self, key: &str, value: &str) -> Result<()> {
        self.client.set_label(key, value).await
    }

    pub async fn set_annotation(&self, key: &str, value: &str) -> Result<()> {
        self.client.set_annotation(key, value).await
    }

    pub async fn game_server(&self) -> Result<GameServer> {
        self.client.game_server().await
    }

    /// Register a callback for every GameServer update
    pub fn watch_game_server<F>(&self, callback: F) -> WatchHandle
    where
        F: FnMut(Arc<GameServer>) + Send + 'static,
    {
        self.watch.subscribe(callback)
    }

    /// Whether the watch subscription is live
    pub fn is_watch_connected(&self) -> bool {
        self.watch.is_connected()
    }

    pub fn watch_stats(&self) -> WatchStats {
        self.watch.stats()
    }

    /// Stop background tasks and tear the watch channel down
    pub async fn shutdown_sdk(self) -> Result<()> {
        let Sdk {
            watch,
            health_task,
            connect_task,
            ..
        } = self;
        drop(health_task);
        drop(connect_task);
        watch.shutdown().await
    }
}

async fn health_loop(client: LifecycleClient, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if let Err(e) = client.health().await {
            tracing::warn!("Health ping failed: {}", e);
        }
    }
}

async fn connect_loop(client: &LifecycleClient, interval: Duration) -> GameServer {
    loop {
        match client.game_server().await {
            Ok(game_server) => {
                tracing::info!(
                    "Connected to sidecar, GameServer '{}' is {}",
                    game_server.name(),
                    game_server.state()
                );
                return game_server;
            }
            Err(e) => {
                tracing::info!(
                    "Sidecar not reachable yet, retrying in {:?}: {}",
                    interval,
                    e
                );
                tokio::time::sleep(interval).await;
            }
        }
    }
}
