//! Generated gRPC stubs and conversions to the crate's own types.

pub mod master {
    tonic::include_proto!("master");
}

pub mod worker {
    tonic::include_proto!("worker");
}

use crate::config::{Role, WorkerConfig};

impl From<&WorkerConfig> for master::WorkerConfig {
    fn from(worker: &WorkerConfig) -> Self {
        Self {
            role: worker.role.to_string(),
            address: worker.address.clone(),
        }
    }
}

impl TryFrom<master::WorkerConfig> for WorkerConfig {
    type Error = crate::config::ConfigError;

    fn try_from(worker: master::WorkerConfig) -> Result<Self, Self::Error> {
        Ok(Self {
            role: worker.role.parse::<Role>()?,
            address: worker.address,
        })
    }
}
