//! Map phase dispatch.
//!
//! Every chunk becomes its own task. A task walks the mapper pool, skipping
//! mappers that are busy with another chunk, and stops at the first mapper
//! that acknowledges the chunk. A full pass without success is followed by
//! a pause and a fresh pass, up to `max_retries` passes in total.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use common::busy::BusySet;
use common::checkpoint::CheckpointStore;
use common::failures::FailureLog;
use common::planner::ReducerRanges;
use common::rpc::worker::MapRequest;
use common::transport::{self, CallError, DEFAULT_DIAL_TIMEOUT};
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct DispatchPolicy {
    pub max_retries: usize,
    pub retry_delay: Duration,
    pub dial_timeout: Duration,
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            retry_delay: Duration::from_secs(2),
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
        }
    }
}

#[derive(Debug, Error)]
#[error("{label}: no worker accepted the task in {retries} attempts")]
pub struct DispatchError {
    pub label: String,
    pub retries: usize,
}

/// Runs `attempt` against the first free worker that succeeds.
///
/// A worker is marked busy for the duration of its attempt and freed again
/// whatever the outcome. Returns the address that succeeded.
pub async fn call_with_fallback_busy<F, Fut>(
    workers: &[String],
    busy: &BusySet,
    policy: &DispatchPolicy,
    label: &str,
    mut attempt: F,
) -> Result<String, DispatchError>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<(), CallError>>,
{
    for retry in 1..=policy.max_retries {
        let mut tried = HashSet::new();
        for addr in workers {
            if tried.contains(addr) || busy.get(addr) {
                continue;
            }
            tried.insert(addr);

            busy.set(addr, true);
            let result = attempt(addr.clone()).await;
            busy.set(addr, false);

            match result {
                Ok(()) => {
                    debug!("[DISPATCH] {label} accepted by {addr}");
                    return Ok(addr.clone());
                }
                Err(e) => warn!(
                    "[DISPATCH] {label} failed on {addr} (attempt {retry}/{}): {e}",
                    policy.max_retries
                ),
            }
        }

        if retry < policy.max_retries {
            tokio::time::sleep(policy.retry_delay).await;
        }
    }

    Err(DispatchError {
        label: label.to_string(),
        retries: policy.max_retries,
    })
}

/// Outcome of one map phase. Ids are in completion order.
#[derive(Debug, Default)]
pub struct MapPhaseReport {
    pub done: Vec<usize>,
    pub failed: Vec<usize>,
}

pub struct MapDispatcher {
    mappers: Vec<String>,
    busy: Arc<BusySet>,
    policy: DispatchPolicy,
    store: Arc<CheckpointStore>,
    failures: FailureLog,
}

impl MapDispatcher {
    pub fn new(
        mappers: Vec<String>,
        policy: DispatchPolicy,
        store: Arc<CheckpointStore>,
        failures: FailureLog,
    ) -> Self {
        Self {
            mappers,
            busy: Arc::new(BusySet::new()),
            policy,
            store,
            failures,
        }
    }

    /// Dispatches every `(id, chunk)` concurrently and marks each acknowledged
    /// chunk done exactly once.
    ///
    /// Chunks that exhaust their retries are recorded and reported but do not
    /// fail the phase. Only a failure to persist progress is an error.
    pub async fn execute(
        &self,
        chunks: Vec<(usize, Vec<i64>)>,
        ranges: &ReducerRanges,
    ) -> Result<MapPhaseReport> {
        info!(
            "[MAP PHASE] Dispatching {} chunks over {} mappers",
            chunks.len(),
            self.mappers.len()
        );
        let wire_ranges = ranges.to_wire();

        let mut tasks = JoinSet::new();
        for (id, chunk) in chunks {
            let mappers = self.mappers.clone();
            let busy = self.busy.clone();
            let policy = self.policy.clone();
            let request = MapRequest {
                chunk,
                reducer_ranges: wire_ranges.clone(),
            };

            tasks.spawn(async move {
                let label = format!("chunk {id}");
                let dial_timeout = policy.dial_timeout;
                let result = call_with_fallback_busy(&mappers, &busy, &policy, &label, |addr| {
                    let request = request.clone();
                    async move { transport::map_task(&addr, request, dial_timeout).await }
                })
                .await;
                (id, result)
            });
        }

        let mut report = MapPhaseReport::default();
        while let Some(joined) = tasks.join_next().await {
            let (id, result) = joined.context("map task panicked")?;
            match result {
                Ok(mapper) => {
                    self.store.mark_done(id).await?;
                    info!("[MAP PHASE] Chunk {id} done by {mapper}");
                    report.done.push(id);
                }
                Err(e) => {
                    error!("[MAP PHASE] {e}");
                    self.failures.record("MASTER", &format!("chunk {id}")).await;
                    report.failed.push(id);
                }
            }
        }

        info!(
            "[MAP PHASE] Finished: {} done, {} failed",
            report.done.len(),
            report.failed.len()
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    fn policy() -> DispatchPolicy {
        DispatchPolicy {
            max_retries: 3,
            retry_delay: Duration::from_millis(5),
            dial_timeout: Duration::from_millis(100),
        }
    }

    fn workers(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    fn unreachable(addr: &str) -> CallError {
        CallError::Unreachable {
            addr: addr.to_string(),
            reason: "refused".into(),
        }
    }

    #[tokio::test]
    async fn falls_over_to_next_worker() {
        let busy = BusySet::new();
        let calls = Mutex::new(Vec::new());

        let pool = workers(&["a", "b"]);
        let winner = call_with_fallback_busy(&pool, &busy, &policy(), "chunk 0", |addr| {
            calls.lock().unwrap().push(addr.clone());
            async move {
                if addr == "a" {
                    Err(unreachable(&addr))
                } else {
                    Ok(())
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(winner, "b");
        assert_eq!(*calls.lock().unwrap(), vec!["a", "b"]);
        assert!(!busy.get("a"));
        assert!(!busy.get("b"));
    }

    #[tokio::test]
    async fn negative_ack_counts_as_failure() {
        let busy = BusySet::new();
        let pool = workers(&["a", "b"]);
        let winner = call_with_fallback_busy(&pool, &busy, &policy(), "chunk 1", |addr| async move {
            if addr == "a" {
                Err(CallError::NegativeAck { addr })
            } else {
                Ok(())
            }
        })
        .await
        .unwrap();
        assert_eq!(winner, "b");
        assert!(!busy.get("a"));
    }

    #[tokio::test]
    async fn busy_workers_are_skipped() {
        let busy = BusySet::new();
        busy.set("a", true);
        let calls = Mutex::new(Vec::new());

        call_with_fallback_busy(&workers(&["a", "b"]), &busy, &policy(), "chunk 2", |addr| {
            calls.lock().unwrap().push(addr);
            async { Ok(()) }
        })
        .await
        .unwrap();

        assert_eq!(*calls.lock().unwrap(), vec!["b"]);
        assert!(busy.get("a"));
    }

    #[tokio::test]
    async fn every_cycle_reconsiders_all_workers() {
        let busy = BusySet::new();
        let calls = Mutex::new(0usize);

        let pool = workers(&["a", "b"]);
        let err = call_with_fallback_busy(&pool, &busy, &policy(), "chunk 3", |addr| {
            *calls.lock().unwrap() += 1;
            async move { Err(unreachable(&addr)) }
        })
        .await
        .unwrap_err();

        assert_eq!(*calls.lock().unwrap(), 6);
        assert_eq!(err.label, "chunk 3");
        assert_eq!(err.retries, 3);
    }

    #[tokio::test]
    async fn worker_freed_between_cycles_is_used() {
        let busy = Arc::new(BusySet::new());
        busy.set("a", true);

        let releaser = busy.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(2)).await;
            releaser.set("a", false);
        });

        let policy = DispatchPolicy {
            max_retries: 50,
            retry_delay: Duration::from_millis(5),
            ..policy()
        };
        let pool = workers(&["a"]);
        let winner = call_with_fallback_busy(&pool, &busy, &policy, "chunk 4", |_| async { Ok(()) })
        .await
        .unwrap();
        assert_eq!(winner, "a");
    }

    #[tokio::test]
    async fn failed_chunks_are_recorded_not_marked() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(CheckpointStore::new(dir.path().join("state")));
        store.init_status(1).await.unwrap();

        let closed = {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().to_string()
        };
        let failures = FailureLog::in_dir(dir.path().join("log"));
        let dispatcher = MapDispatcher::new(vec![closed], policy(), store.clone(), failures);

        let ranges = common::planner::assign_ranges(&["r1:1".into()], &[], 0, 9);
        let report = dispatcher.execute(vec![(0, vec![3, 1])], &ranges).await.unwrap();

        assert_eq!(report.failed, vec![0]);
        assert!(report.done.is_empty());
        assert!(!store.all_done().await);
        let failed = std::fs::read_to_string(dir.path().join("log/failed_tasks.log")).unwrap();
        assert_eq!(failed, "MASTER: chunk 0\n");
    }
}
