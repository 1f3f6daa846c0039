use std::path::PathBuf;
use std::time::Duration;

use common::config::Role;
use common::failures::FailureLog;
use common::output;
use common::planner::ReducerRanges;
use common::transport::{DEFAULT_DIAL_TIMEOUT, MAX_MESSAGE_SIZE};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;
use tonic::{Request, Response, Status};
use tracing::{debug, error, info, warn};

pub use common::rpc::worker::worker_server::{Worker, WorkerServer};
use common::rpc::worker::{MapReply, MapRequest, ReduceReply, ReduceRequest};

use crate::deliver;

#[derive(Debug)]
pub struct WorkerService {
    /// Advertised address.
    address: String,
    role: Role,
    output_dir: PathBuf,
    map_delay: Duration,
    dial_timeout: Duration,
    failures: FailureLog,

    /// Keeps concurrent reduce batches from interleaving inside a file.
    append_lock: Mutex<()>,
}

impl WorkerService {
    pub fn new(address: impl Into<String>, role: Role, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            address: address.into(),
            role,
            output_dir: output_dir.into(),
            map_delay: Duration::ZERO,
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
            failures: FailureLog::disabled(),
            append_lock: Mutex::new(()),
        }
    }

    pub fn with_map_delay(mut self, delay: Duration) -> Self {
        self.map_delay = delay;
        self
    }

    pub fn with_dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = timeout;
        self
    }

    pub fn with_failure_log(mut self, failures: FailureLog) -> Self {
        self.failures = failures;
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Sorts a chunk and hands every key to its owning reducer.
    ///
    /// Returns `false` when the chunk could not be partitioned at all.
    /// Batches that no reducer accepts are recorded as failed tasks and do
    /// not fail the chunk.
    async fn map_chunk(&self, mut chunk: Vec<i64>, ranges: ReducerRanges) -> bool {
        if ranges.is_empty() && !chunk.is_empty() {
            warn!("[MAP] Received {} keys without reducer ranges", chunk.len());
            return false;
        }
        if !self.map_delay.is_zero() {
            debug!("[MAP] Delaying map task by {:?}", self.map_delay);
            tokio::time::sleep(self.map_delay).await;
        }

        chunk.sort_unstable();
        let split = deliver::partition(&chunk, &ranges);
        if !split.unowned.is_empty() {
            warn!(
                "[MAP] {} keys fall outside every reducer range",
                split.unowned.len()
            );
            self.failures
                .record(
                    "MAPPER",
                    &format!("{} keys outside every range", split.unowned.len()),
                )
                .await;
        }

        let reducers = ranges.addresses();
        for (owner, keys) in &split.buckets {
            let sent = deliver::send_to_reducer_with_fallback(
                owner,
                &reducers,
                keys,
                self.dial_timeout,
            )
            .await;
            if let Err(e) = sent {
                error!("[MAP] {e}");
                self.failures
                    .record("MAPPER", &format!("reduce of {} records -> {owner}", keys.len()))
                    .await;
            }
        }

        info!(
            "[MAP] Mapped {} keys into {} reducer batches",
            chunk.len(),
            split.buckets.len()
        );
        true
    }
}

#[tonic::async_trait]
impl Worker for WorkerService {
    async fn map_task(&self, request: Request<MapRequest>) -> Result<Response<MapReply>, Status> {
        let MapRequest {
            chunk,
            reducer_ranges,
        } = request.into_inner();
        info!("[MAP] {} ({}) received {} keys", self.address, self.role, chunk.len());

        let ranges = ReducerRanges::from_wire(reducer_ranges);
        let ack = self.map_chunk(chunk, ranges).await;
        Ok(Response::new(MapReply { ack }))
    }

    async fn reduce_task(
        &self,
        request: Request<ReduceRequest>,
    ) -> Result<Response<ReduceReply>, Status> {
        let ReduceRequest {
            chunks,
            worker_address,
            owner,
        } = request.into_inner();

        // An empty owner means the addressed reducer owns the batch.
        let owner = if !owner.is_empty() {
            owner
        } else if !worker_address.is_empty() {
            worker_address
        } else {
            self.address.clone()
        };

        let written = {
            let _guard = self.append_lock.lock().await;
            output::append_records(&self.output_dir, &owner, &chunks).await
        };
        match written {
            Ok(path) => {
                debug!("[REDUCE] Appended {} records to {}", chunks.len(), path.display());
                Ok(Response::new(ReduceReply { ack: true }))
            }
            Err(e) => {
                error!("[REDUCE] Failed to append records for {owner}: {e:#}");
                Ok(Response::new(ReduceReply { ack: false }))
            }
        }
    }
}

/// Serves `service` on `listener` until `shutdown` is cancelled.
pub async fn serve(
    service: WorkerService,
    listener: TcpListener,
    shutdown: CancellationToken,
) -> Result<(), tonic::transport::Error> {
    let server = WorkerServer::new(service)
        .max_decoding_message_size(MAX_MESSAGE_SIZE)
        .max_encoding_message_size(MAX_MESSAGE_SIZE);

    Server::builder()
        .add_service(server)
        .serve_with_incoming_shutdown(
            TcpListenerStream::new(listener),
            shutdown.cancelled_owned(),
        )
        .await
}
