use std::sync::Arc;
use std::time::Duration;

use common::config::{Role, WorkerConfig};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::MasterError;

/// Registry shared between the registration service and the job driver.
pub type SharedRegistry = Arc<Mutex<WorkerRegistry>>;

/// Registry for workers.
#[derive(Debug, Default)]
pub struct WorkerRegistry {
    /// Workers in registration order, unique by address.
    worker_list: Vec<WorkerConfig>,
}

impl WorkerRegistry {
    pub fn new(workers: impl IntoIterator<Item = WorkerConfig>) -> Self {
        let mut registry = Self::default();
        registry.seed(workers);
        registry
    }

    pub fn shared(self) -> SharedRegistry {
        Arc::new(Mutex::new(self))
    }

    /// Add a worker. Returns false if its address is already registered.
    pub fn register(&mut self, worker: WorkerConfig) -> bool {
        if self.worker_list.iter().any(|w| w.address == worker.address) {
            debug!("Duplicate registration for {}", worker.address);
            return false;
        }
        info!("Registered {} {}", worker.role, worker.address);
        self.worker_list.push(worker);
        true
    }

    /// Add every worker not yet known. Returns how many were added.
    pub fn seed(&mut self, workers: impl IntoIterator<Item = WorkerConfig>) -> usize {
        workers
            .into_iter()
            .filter(|worker| self.register(worker.clone()))
            .count()
    }

    fn addresses(&self, role: Role) -> Vec<String> {
        self.worker_list
            .iter()
            .filter(|w| w.role == role)
            .map(|w| w.address.clone())
            .collect()
    }

    pub fn mappers(&self) -> Vec<String> {
        self.addresses(Role::Mapper)
    }

    pub fn reducers(&self) -> Vec<String> {
        self.addresses(Role::Reducer)
    }

    pub fn snapshot(&self) -> Vec<WorkerConfig> {
        self.worker_list.clone()
    }

    pub fn len(&self) -> usize {
        self.worker_list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.worker_list.is_empty()
    }
}

/// Polls the registry until it lists at least `want_mappers` mappers and
/// `want_reducers` reducers.
///
/// Returns the mapper and reducer addresses at that point.
pub async fn wait_for_workers(
    registry: &SharedRegistry,
    want_mappers: usize,
    want_reducers: usize,
    deadline: Duration,
    poll: Duration,
) -> Result<(Vec<String>, Vec<String>), MasterError> {
    let started = Instant::now();
    loop {
        let (mappers, reducers) = {
            let registry = registry.lock().await;
            (registry.mappers(), registry.reducers())
        };
        if mappers.len() >= want_mappers && reducers.len() >= want_reducers {
            info!(
                "{} mappers and {} reducers available",
                mappers.len(),
                reducers.len()
            );
            return Ok((mappers, reducers));
        }

        let waited = started.elapsed();
        if waited >= deadline {
            return Err(MasterError::RegistrationTimeout {
                waited,
                mappers: mappers.len(),
                want_mappers,
                reducers: reducers.len(),
                want_reducers,
            });
        }
        debug!(
            "Waiting for workers: {}/{want_mappers} mappers, {}/{want_reducers} reducers",
            mappers.len(),
            reducers.len()
        );
        tokio::time::sleep(poll).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapper(addr: &str) -> WorkerConfig {
        WorkerConfig::new(Role::Mapper, addr)
    }

    fn reducer(addr: &str) -> WorkerConfig {
        WorkerConfig::new(Role::Reducer, addr)
    }

    #[test]
    fn duplicate_address_is_rejected() {
        let mut registry = WorkerRegistry::default();
        assert!(registry.register(mapper("m1:1")));
        assert!(!registry.register(mapper("m1:1")));
        assert!(!registry.register(reducer("m1:1")));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn roles_keep_registration_order() {
        let registry = WorkerRegistry::new([
            reducer("r2:2"),
            mapper("m1:1"),
            reducer("r1:1"),
            mapper("m1:1"),
        ]);
        assert_eq!(registry.mappers(), vec!["m1:1"]);
        assert_eq!(registry.reducers(), vec!["r2:2", "r1:1"]);
        assert_eq!(registry.len(), 3);
    }

    #[tokio::test]
    async fn wait_returns_once_roster_is_complete() {
        let registry = WorkerRegistry::new([mapper("m1:1")]).shared();

        let late = registry.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            late.lock().await.register(reducer("r1:1"));
        });

        let (mappers, reducers) = wait_for_workers(
            &registry,
            1,
            1,
            Duration::from_secs(5),
            Duration::from_millis(10),
        )
        .await
        .unwrap();
        assert_eq!(mappers, vec!["m1:1"]);
        assert_eq!(reducers, vec!["r1:1"]);
    }

    #[tokio::test]
    async fn wait_times_out() {
        let registry = WorkerRegistry::new([mapper("m1:1")]).shared();
        let err = wait_for_workers(
            &registry,
            2,
            1,
            Duration::from_millis(50),
            Duration::from_millis(10),
        )
        .await
        .unwrap_err();
        let MasterError::RegistrationTimeout {
            mappers, reducers, ..
        } = err;
        assert_eq!((mappers, reducers), (1, 0));
    }
}
