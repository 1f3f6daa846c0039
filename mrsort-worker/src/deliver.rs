//! Shipping sorted keys to the reducers that own them.
//!
//! Each batch is offered to its owner first and then to every other reducer
//! in turn. Whoever accepts it writes the batch to the owner's file, so a
//! surrogate never changes where the keys end up.

use std::collections::HashSet;
use std::time::Duration;

use common::planner::ReducerRanges;
use common::rpc::worker::ReduceRequest;
use common::transport;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
#[error("no reducer accepted {records} records owned by {owner}")]
pub struct DeliveryError {
    pub owner: String,
    pub records: usize,
}

/// Keys grouped by owning reducer, in range order.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Partition {
    pub buckets: Vec<(String, Vec<i64>)>,

    /// Keys outside every range.
    pub unowned: Vec<i64>,
}

/// Splits `keys` by owning range. Key order is kept within each bucket and
/// reducers without keys are left out.
pub fn partition(keys: &[i64], ranges: &ReducerRanges) -> Partition {
    let mut buckets: Vec<(String, Vec<i64>)> = ranges
        .iter()
        .map(|range| (range.address.clone(), Vec::new()))
        .collect();
    let mut unowned = Vec::new();

    for &key in keys {
        match ranges.index_of(key) {
            Some(index) => buckets[index].1.push(key),
            None => unowned.push(key),
        }
    }

    buckets.retain(|(_, keys)| !keys.is_empty());
    Partition { buckets, unowned }
}

/// Sends `keys` to `owner`, falling back to the other `reducers` in order.
///
/// Returns the address of the reducer that acknowledged the batch.
pub async fn send_to_reducer_with_fallback(
    owner: &str,
    reducers: &[String],
    keys: &[i64],
    dial_timeout: Duration,
) -> Result<String, DeliveryError> {
    let mut tried = HashSet::new();
    let candidates = std::iter::once(owner).chain(reducers.iter().map(String::as_str));

    for addr in candidates {
        if !tried.insert(addr) {
            continue;
        }

        let request = ReduceRequest {
            chunks: keys.to_vec(),
            worker_address: addr.to_string(),
            owner: owner.to_string(),
        };
        match transport::reduce_task(addr, request, dial_timeout).await {
            Ok(()) => {
                if addr == owner {
                    debug!("[REDUCE] {} records -> {addr}", keys.len());
                } else {
                    info!(
                        "[REDUCE] {} records owned by {owner} accepted by surrogate {addr}",
                        keys.len()
                    );
                }
                return Ok(addr.to_string());
            }
            Err(e) => warn!("[REDUCE] Delivery to {addr} failed: {e}"),
        }
    }

    Err(DeliveryError {
        owner: owner.to_string(),
        records: keys.len(),
    })
}
