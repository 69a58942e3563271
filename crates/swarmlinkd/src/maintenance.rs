use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::MaintenanceConfig;
use crate::error::Result;
use crate::manager::TorrentManager;
use swarmlink_dht::PointerRecord;

/// Clears the busy flag when a sweep ends, however it ends
struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Periodic re-put of signed records so they outlive the DHT's expiry
pub struct Maintenance {
    manager: Arc<TorrentManager>,
    config: MaintenanceConfig,
    busy: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl Maintenance {
    pub fn new(manager: Arc<TorrentManager>, config: MaintenanceConfig) -> Self {
        Self {
            manager,
            config,
            busy: Arc::new(AtomicBool::new(false)),
            task: None,
        }
    }

    pub fn start(&mut self) {
        if !self.config.enabled {
            info!("Record maintenance disabled");
            return;
        }
        if self.task.is_some() {
            return;
        }

        let period = self.config.interval();
        let sweeper = Sweeper {
            manager: self.manager.clone(),
            busy: self.busy.clone(),
            item_delay: self.config.item_delay(),
        };
        self.task = Some(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                sweeper.run().await;
            }
        }));
        debug!("Record maintenance started (interval: {}s)", period.as_secs());
    }

    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            info!("Stopping record maintenance...");
            task.abort();
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// One sweep now, returning the number of active handles afterwards;
    /// `None` when a sweep is already running
    pub async fn run_once(&self) -> Option<usize> {
        Sweeper {
            manager: self.manager.clone(),
            busy: self.busy.clone(),
            item_delay: self.config.item_delay(),
        }
        .run()
        .await
    }
}

impl Drop for Maintenance {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Sweeper {
    manager: Arc<TorrentManager>,
    busy: Arc<AtomicBool>,
    item_delay: std::time::Duration,
}

impl Sweeper {
    async fn run(&self) -> Option<usize> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Record maintenance already running, skipping");
            return None;
        }
        let _guard = BusyGuard(self.busy.clone());

        let authored = match self.manager.authored_pointers().await {
            Ok(records) => records,
            Err(e) => {
                warn!("Could not list authored records: {}", e);
                Vec::new()
            }
        };
        let observed = self.manager.observed_pointers().await;

        let mut refreshed = 0;
        let mut first = true;
        for record in authored.iter().chain(observed.iter()) {
            if !first && !self.item_delay.is_zero() {
                tokio::time::sleep(self.item_delay).await;
            }
            first = false;

            match self.republish(record).await {
                Ok(()) => refreshed += 1,
                Err(e) => warn!("Failed to republish {}: {}", record.address, e),
            }
        }

        info!(
            "Republished {} of {} records ({} authored, {} observed)",
            refreshed,
            authored.len() + observed.len(),
            authored.len(),
            observed.len()
        );
        Some(self.manager.active_count().await)
    }

    async fn republish(&self, record: &PointerRecord) -> Result<()> {
        let receipt = self.manager.resolver().republish(record).await?;
        debug!("Republished {} to {} nodes", record.address, receipt.stored_on);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::{LoadOptions, PublishData, PublishId, PublishOptions};
    use crate::storage::MetadataStore;
    use crate::swarm::{LocalNetwork, LocalSwarm};
    use std::time::Duration;
    use tempfile::TempDir;

    async fn manager(temp: &TempDir) -> Arc<TorrentManager> {
        swarmlink_crypto::init().unwrap();
        let store = MetadataStore::new(&temp.path().join("base")).await.unwrap();
        let swarm = Arc::new(LocalSwarm::new(LocalNetwork::new()));
        Arc::new(TorrentManager::with_store(
            store,
            swarm,
            temp.path().join("storage"),
            None,
        ))
    }

    async fn publish_and_open(manager: &TorrentManager, bodies: &[&str]) {
        for body in bodies {
            let outcome = manager
                .publish(
                    PublishId::Pointer(None),
                    "/a.txt",
                    PublishData::Body(body.as_bytes().to_vec()),
                    PublishOptions::default(),
                )
                .await
                .unwrap();
            manager
                .load(&outcome.id, "/", LoadOptions::default())
                .await
                .unwrap();
        }
    }

    fn config(item_delay_ms: u64) -> MaintenanceConfig {
        MaintenanceConfig {
            enabled: true,
            interval_secs: 3600,
            item_delay_ms,
        }
    }

    #[tokio::test]
    async fn test_sweep_reports_active_handles() {
        let temp = TempDir::new().unwrap();
        let manager = manager(&temp).await;

        publish_and_open(&manager, &["one", "two"]).await;

        let maintenance = Maintenance::new(manager.clone(), config(0));
        assert_eq!(maintenance.run_once().await, Some(2));
        assert!(!maintenance.is_busy());
    }

    #[tokio::test]
    async fn test_overlapping_sweep_is_skipped() {
        let temp = TempDir::new().unwrap();
        let manager = manager(&temp).await;

        publish_and_open(&manager, &["one", "two"]).await;

        let maintenance = Maintenance::new(manager, config(50));
        let (first, second) = tokio::join!(maintenance.run_once(), maintenance.run_once());

        let mut outcomes = vec![first, second];
        outcomes.sort();
        assert_eq!(outcomes, vec![None, Some(2)]);
        assert!(!maintenance.is_busy());
    }

    #[tokio::test]
    async fn test_disabled_maintenance_does_not_spawn() {
        let temp = TempDir::new().unwrap();
        let mut maintenance = Maintenance::new(
            manager(&temp).await,
            MaintenanceConfig {
                enabled: false,
                ..config(0)
            },
        );
        maintenance.start();
        assert!(maintenance.task.is_none());

        let mut enabled = Maintenance::new(maintenance.manager.clone(), config(0));
        enabled.start();
        assert!(enabled.task.is_some());
        enabled.stop();
        assert!(enabled.task.is_none());
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}
