use std::time::Duration;

use anyhow::{bail, Result};
use common::config::WorkerConfig;
use common::transport;
use tokio::time::Instant;
use tracing::{info, warn};

pub const REGISTER_INTERVAL: Duration = Duration::from_secs(1);

/// Announces `worker` to the master, retrying every `interval` until the
/// master answers or `deadline` has passed.
///
/// A rejected registration means the master already lists this address,
/// which counts as registered.
pub async fn register_with_master(
    master: &str,
    worker: &WorkerConfig,
    dial_timeout: Duration,
    deadline: Duration,
    interval: Duration,
) -> Result<()> {
    let started = Instant::now();
    loop {
        match transport::register(master, worker, dial_timeout).await {
            Ok(true) => {
                info!("Registered with master {master} as {}", worker.role);
                return Ok(());
            }
            Ok(false) => {
                info!("Master {master} already knows {}", worker.address);
                return Ok(());
            }
            Err(e) => warn!("Registration attempt failed: {e}"),
        }

        if started.elapsed() >= deadline {
            bail!("could not register with master {master} within {deadline:?}");
        }
        tokio::time::sleep(interval).await;
    }
}
