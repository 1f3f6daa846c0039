//! Master liveness watchdog.
//!
//! After a grace period the watchdog polls the master's registration port.
//! Consecutive probe failures are counted and the master is restarted once
//! the count reaches the threshold. A set completion flag ends the watch and
//! takes the fleet down.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use common::checkpoint::CheckpointStore;
use common::transport::{self, DEFAULT_DIAL_TIMEOUT};
use tracing::{debug, error, info, warn};

use crate::fleet::FleetControl;

#[derive(Debug, Clone)]
pub struct WatchdogConfig {
    pub master_addr: String,
    pub grace: Duration,
    pub poll_interval: Duration,
    pub failure_threshold: u32,
    pub dial_timeout: Duration,
}

impl WatchdogConfig {
    pub fn new(master_addr: impl Into<String>) -> Self {
        Self {
            master_addr: master_addr.into(),
            grace: Duration::from_secs(10),
            poll_interval: Duration::from_secs(7),
            failure_threshold: 3,
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
        }
    }
}

/// How a watch ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchOutcome {
    /// The flag was set while the master was answering.
    Completed,
    /// The master went away and the flag appeared right after.
    ExitedCleanly,
}

pub struct Watchdog<F> {
    config: WatchdogConfig,
    store: Arc<CheckpointStore>,
    fleet: F,
    restarts: u32,
}

impl<F: FleetControl> Watchdog<F> {
    pub fn new(config: WatchdogConfig, store: Arc<CheckpointStore>, fleet: F) -> Self {
        Self {
            config,
            store,
            fleet,
            restarts: 0,
        }
    }

    /// Restart commands issued so far.
    pub fn restarts(&self) -> u32 {
        self.restarts
    }

    pub fn fleet(&self) -> &F {
        &self.fleet
    }

    pub async fn run(&mut self) -> Result<WatchOutcome> {
        info!(
            "[STANDBY] Watching {} after a {:?} grace period",
            self.config.master_addr, self.config.grace
        );
        tokio::time::sleep(self.config.grace).await;

        let mut failures = 0u32;
        loop {
            if self.store.completed().await {
                info!("[STANDBY] Job completed, shutting down");
                self.shut_down().await;
                return Ok(WatchOutcome::Completed);
            }

            if transport::probe(&self.config.master_addr, self.config.dial_timeout).await {
                if failures > 0 {
                    info!("[STANDBY] Master reachable again");
                }
                debug!("[STANDBY] Master alive");
                failures = 0;
            } else {
                failures += 1;
                warn!(
                    "[STANDBY] Master unreachable ({failures}/{})",
                    self.config.failure_threshold
                );

                if failures == 1 {
                    // The master may have just finished and not yet published the flag.
                    tokio::time::sleep(self.config.poll_interval).await;
                    if self.store.completed().await {
                        info!("[STANDBY] Master exited after completing the job");
                        self.shut_down().await;
                        return Ok(WatchOutcome::ExitedCleanly);
                    }
                    continue;
                }

                if failures >= self.config.failure_threshold {
                    warn!("[STANDBY] Restarting master");
                    self.restarts += 1;
                    if let Err(e) = self.fleet.restart_master().await {
                        error!("[STANDBY] Restart failed: {e:#}");
                    }
                    failures = 0;
                }
            }

            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    async fn shut_down(&self) {
        if let Err(e) = self.fleet.shutdown().await {
            error!("[STANDBY] Fleet shutdown failed: {e:#}");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use tokio::net::TcpListener;

    use super::*;

    /// Sets the completion flag once the master has been restarted
    /// `finish_after` times.
    struct FakeFleet {
        store: Arc<CheckpointStore>,
        finish_after: u32,
        restarts: AtomicU32,
        shutdowns: AtomicU32,
    }

    impl FakeFleet {
        fn new(store: Arc<CheckpointStore>, finish_after: u32) -> Self {
            Self {
                store,
                finish_after,
                restarts: AtomicU32::new(0),
                shutdowns: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl FleetControl for FakeFleet {
        async fn restart_master(&self) -> Result<()> {
            let restarts = self.restarts.fetch_add(1, Ordering::SeqCst) + 1;
            if restarts >= self.finish_after {
                self.store.set_completed().await?;
            }
            Ok(())
        }

        async fn shutdown(&self) -> Result<()> {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn config(master_addr: String) -> WatchdogConfig {
        WatchdogConfig {
            master_addr,
            grace: Duration::from_millis(5),
            poll_interval: Duration::from_millis(10),
            failure_threshold: 3,
            dial_timeout: Duration::from_millis(200),
        }
    }

    fn store() -> (tempfile::TempDir, Arc<CheckpointStore>) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(CheckpointStore::new(dir.path()));
        (dir, store)
    }

    async fn closed_addr() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().to_string()
    }

    #[tokio::test]
    async fn restarts_after_consecutive_failures() {
        let (_dir, store) = store();
        let fleet = FakeFleet::new(store.clone(), 2);
        let mut watchdog = Watchdog::new(config(closed_addr().await), store, fleet);

        let outcome = watchdog.run().await.unwrap();
        assert_eq!(outcome, WatchOutcome::Completed);
        assert_eq!(watchdog.restarts(), 2);
        assert_eq!(watchdog.fleet().restarts.load(Ordering::SeqCst), 2);
        assert_eq!(watchdog.fleet().shutdowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn live_master_is_left_alone() {
        let (_dir, store) = store();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let fleet = FakeFleet::new(store.clone(), u32::MAX);

        let finisher = store.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(80)).await;
            finisher.set_completed().await.unwrap();
        });

        let mut watchdog = Watchdog::new(config(addr), store, fleet);
        assert_eq!(watchdog.run().await.unwrap(), WatchOutcome::Completed);
        assert_eq!(watchdog.restarts(), 0);
        drop(listener);
    }

    #[tokio::test]
    async fn clean_exit_is_not_restarted() {
        let (_dir, store) = store();
        let fleet = FakeFleet::new(store.clone(), u32::MAX);
        let mut config = config(closed_addr().await);
        config.poll_interval = Duration::from_millis(100);

        let finisher = store.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(40)).await;
            finisher.set_completed().await.unwrap();
        });

        let mut watchdog = Watchdog::new(config, store, fleet);
        assert_eq!(watchdog.run().await.unwrap(), WatchOutcome::ExitedCleanly);
        assert_eq!(watchdog.restarts(), 0);
        assert_eq!(watchdog.fleet().shutdowns.load(Ordering::SeqCst), 1);
    }
}
