//! One-shot RPC calls with a bounded dial.
//!
//! Every call dials a fresh channel, issues a single request and drops the
//! channel before returning, whatever the outcome.

use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpStream;
use tonic::transport::{Channel, Endpoint};
use tonic::Status;
use tracing::debug;

use crate::config::WorkerConfig;
use crate::rpc::master::master_client::MasterClient;
use crate::rpc::worker::worker_client::WorkerClient;
use crate::rpc::worker::{MapRequest, ReduceRequest};

pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(3);

/// Chunks travel in a single message, so lift tonic's 4 MiB default.
pub const MAX_MESSAGE_SIZE: usize = 256 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum CallError {
    #[error("invalid address `{addr}`: {source}")]
    InvalidAddress {
        addr: String,
        #[source]
        source: tonic::transport::Error,
    },

    #[error("{addr} is unreachable: {reason}")]
    Unreachable { addr: String, reason: String },

    #[error("call to {addr} failed: {status}")]
    Rpc { addr: String, status: Status },

    #[error("{addr} replied without ack")]
    NegativeAck { addr: String },
}

impl CallError {
    pub fn addr(&self) -> &str {
        match self {
            CallError::InvalidAddress { addr, .. }
            | CallError::Unreachable { addr, .. }
            | CallError::Rpc { addr, .. }
            | CallError::NegativeAck { addr } => addr,
        }
    }
}

/// Opens a channel to `host:port`, giving up after `timeout`.
pub async fn dial(addr: &str, timeout: Duration) -> Result<Channel, CallError> {
    let endpoint = Endpoint::from_shared(format!("http://{addr}"))
        .map_err(|source| CallError::InvalidAddress {
            addr: addr.to_string(),
            source,
        })?
        .connect_timeout(timeout);

    match tokio::time::timeout(timeout, endpoint.connect()).await {
        Ok(Ok(channel)) => Ok(channel),
        Ok(Err(e)) => Err(CallError::Unreachable {
            addr: addr.to_string(),
            reason: format!("{e:?}"),
        }),
        Err(_) => Err(CallError::Unreachable {
            addr: addr.to_string(),
            reason: format!("no connection within {timeout:?}"),
        }),
    }
}

pub fn ensure_ack(addr: &str, ack: bool) -> Result<(), CallError> {
    if ack {
        Ok(())
    } else {
        Err(CallError::NegativeAck {
            addr: addr.to_string(),
        })
    }
}

fn rpc_error(addr: &str, status: Status) -> CallError {
    CallError::Rpc {
        addr: addr.to_string(),
        status,
    }
}

async fn worker_client(addr: &str, timeout: Duration) -> Result<WorkerClient<Channel>, CallError> {
    let channel = dial(addr, timeout).await?;
    Ok(WorkerClient::new(channel)
        .max_decoding_message_size(MAX_MESSAGE_SIZE)
        .max_encoding_message_size(MAX_MESSAGE_SIZE))
}

/// `Worker.MapTask`. Succeeds only on a positive ack.
pub async fn map_task(addr: &str, request: MapRequest, timeout: Duration) -> Result<(), CallError> {
    let mut client = worker_client(addr, timeout).await?;
    let reply = client
        .map_task(request)
        .await
        .map_err(|status| rpc_error(addr, status))?;
    debug!("MapTask on {addr} -> {:?}", reply.get_ref());
    ensure_ack(addr, reply.into_inner().ack)
}

/// `Worker.ReduceTask`. Succeeds only on a positive ack.
pub async fn reduce_task(
    addr: &str,
    request: ReduceRequest,
    timeout: Duration,
) -> Result<(), CallError> {
    let mut client = worker_client(addr, timeout).await?;
    let reply = client
        .reduce_task(request)
        .await
        .map_err(|status| rpc_error(addr, status))?;
    ensure_ack(addr, reply.into_inner().ack)
}

/// `Master.Register`. Returns whether the master accepted the worker.
pub async fn register(
    addr: &str,
    worker: &WorkerConfig,
    timeout: Duration,
) -> Result<bool, CallError> {
    let channel = dial(addr, timeout).await?;
    let reply = MasterClient::new(channel)
        .register(crate::rpc::master::WorkerConfig::from(worker))
        .await
        .map_err(|status| rpc_error(addr, status))?;
    Ok(reply.into_inner().accepted)
}

/// Plain TCP liveness check.
pub async fn probe(addr: &str, timeout: Duration) -> bool {
    matches!(
        tokio::time::timeout(timeout, TcpStream::connect(addr)).await,
        Ok(Ok(_))
    )
}
