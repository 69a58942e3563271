use std::sync::Arc;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::info;

use crate::config::Config;
use crate::error::Result;
use crate::maintenance::Maintenance;
use crate::manager::TorrentManager;
use crate::swarm::{LocalNetwork, LocalSwarm, SwarmEngine};

/// Main node orchestrator
pub struct Node {
    config: Config,
    manager: Arc<TorrentManager>,
    maintenance: Maintenance,
    shutdown_tx: mpsc::Sender<()>,
    shutdown_rx: mpsc::Receiver<()>,
}

impl Node {
    /// Node backed by an in-process swarm
    pub async fn new(config: Config) -> Result<Self> {
        let swarm = Arc::new(LocalSwarm::new(LocalNetwork::new()));
        Self::with_swarm(config, swarm).await
    }

    pub async fn with_swarm(config: Config, swarm: Arc<dyn SwarmEngine>) -> Result<Self> {
        info!("Initializing node components...");

        let manager = Arc::new(TorrentManager::new(&config, swarm).await?);
        info!("✓ Torrent manager initialized");

        let maintenance = Maintenance::new(manager.clone(), config.maintenance.clone());
        info!("✓ Record maintenance initialized");

        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        Ok(Self {
            config,
            manager,
            maintenance,
            shutdown_tx,
            shutdown_rx,
        })
    }

    pub fn manager(&self) -> &Arc<TorrentManager> {
        &self.manager
    }

    pub fn maintenance(&self) -> &Maintenance {
        &self.maintenance
    }

    /// Start background services without blocking
    pub fn start(&mut self) {
        self.maintenance.start();
    }

    pub async fn run(&mut self) -> Result<()> {
        info!("Starting swarmlink services...");
        self.start();

        info!("═══════════════════════════════════════════════");
        info!("  swarmlink node is now running");
        info!("═══════════════════════════════════════════════");
        info!("  Name: {}", self.config.node.name);
        info!("  Data Dir: {}", self.config.data_directory.display());
        info!("  Known records: {}", self.manager.list_authored().await?.len());
        info!("═══════════════════════════════════════════════");

        self.wait_for_shutdown().await;

        info!("Shutting down swarmlink node...");
        self.shutdown().await;

        Ok(())
    }

    async fn wait_for_shutdown(&mut self) {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Received Ctrl+C signal");
            }
            _ = self.shutdown_rx.recv() => {
                info!("Received shutdown signal");
            }
        }
    }

    pub async fn shutdown(&mut self) {
        self.maintenance.stop();

        info!("Stopping torrents and closing storage...");
        self.manager.shutdown().await;

        info!("Shutdown complete");
    }

    pub fn shutdown_handle(&self) -> mpsc::Sender<()> {
        self.shutdown_tx.clone()
    }
}
