use std::sync::Arc;

use common::checkpoint::CheckpointStore;
use common::config::WorkerConfig;
use common::rpc::master::master_server::{Master as MasterRpc, MasterServer};
use common::rpc::master::{self, RegisterReply};
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;
use tonic::{Request, Response, Status};
use tracing::{error, info};

use crate::worker_registry::SharedRegistry;

/// Accepts worker registrations while the job runs.
#[derive(Debug)]
pub struct MasterService {
    registry: SharedRegistry,
    store: Arc<CheckpointStore>,
}

impl MasterService {
    pub fn new(registry: SharedRegistry, store: Arc<CheckpointStore>) -> Self {
        Self { registry, store }
    }
}

#[tonic::async_trait]
impl MasterRpc for MasterService {
    /// Worker requests to join the workforce.
    async fn register(
        &self,
        request: Request<master::WorkerConfig>,
    ) -> Result<Response<RegisterReply>, Status> {
        let worker = WorkerConfig::try_from(request.into_inner())
            .map_err(|e| Status::invalid_argument(e.to_string()))?;
        info!("Registration request from {} {}", worker.role, worker.address);

        // The roster is written under the lock so that saves land in order.
        let mut registry = self.registry.lock().await;
        let accepted = registry.register(worker);
        if accepted {
            if let Err(e) = self.store.save_workers(&registry.snapshot()).await {
                error!("Failed to persist worker roster: {e:#}");
                return Err(Status::internal("failed to persist worker roster"));
            }
        }

        Ok(Response::new(RegisterReply { accepted }))
    }
}

/// Serves registrations on `listener` until `shutdown` is cancelled.
pub async fn serve(
    service: MasterService,
    listener: TcpListener,
    shutdown: CancellationToken,
) -> Result<(), tonic::transport::Error> {
    Server::builder()
        .add_service(MasterServer::new(service))
        .serve_with_incoming_shutdown(
            TcpListenerStream::new(listener),
            shutdown.cancelled_owned(),
        )
        .await
}

#[cfg(test)]
mod tests {
    use common::config::Role;

    use super::*;
    use crate::worker_registry::WorkerRegistry;

    fn request(role: &str, address: &str) -> Request<master::WorkerConfig> {
        Request::new(master::WorkerConfig {
            role: role.into(),
            address: address.into(),
        })
    }

    #[tokio::test]
    async fn first_registration_is_accepted_and_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(CheckpointStore::new(dir.path()));
        let registry = WorkerRegistry::default().shared();
        let service = MasterService::new(registry.clone(), store.clone());

        let reply = service.register(request("mapper", "m1:1")).await.unwrap();
        assert!(reply.into_inner().accepted);
        let reply = service.register(request("reducer", "m1:1")).await.unwrap();
        assert!(!reply.into_inner().accepted);

        assert_eq!(
            store.load_workers().await.unwrap(),
            vec![WorkerConfig::new(Role::Mapper, "m1:1")]
        );
        assert_eq!(registry.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn unknown_role_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(CheckpointStore::new(dir.path()));
        let service = MasterService::new(WorkerRegistry::default().shared(), store);

        let status = service.register(request("combiner", "c:1")).await.unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);
    }
}
