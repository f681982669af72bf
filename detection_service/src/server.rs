use crate::{
    config::Config,
    inference_service::InferenceService,
    model_service::ModelService,
    ort_service::OrtModelService,
    state::{ServiceState, State},
};
use detection_proto::detection_service_server::DetectionServiceServer;
use detection_store::{FrameStore, LocalObjectStore, ObjectStore};
use std::{net::SocketAddr, sync::Arc};
use tokio::signal;
use tonic::transport::server::Router;
use tonic::transport::Server;

pub struct GrpcServer {
    router: Router,
    addr: SocketAddr,
}

impl GrpcServer {
    pub async fn new<M: ModelService, S: State>(
        model_service: M,
        service_state: S,
        frames: FrameStore,
        addr: &str,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let addr = addr.parse()?;
        let inference_service = InferenceService::new(model_service, service_state, frames);

        let reflection_service = tonic_reflection::server::Builder::configure()
            .register_encoded_file_descriptor_set(detection_proto::FILE_DESCRIPTOR_SET)
            .build_v1alpha()?;

        let (health_reporter, health_service) = tonic_health::server::health_reporter();
        health_reporter
            .set_serving::<DetectionServiceServer<InferenceService<M, S>>>()
            .await;

        let router = Server::builder()
            .add_service(health_service)
            .add_service(DetectionServiceServer::new(inference_service))
            .add_service(reflection_service);

        Ok(Self { router, addr })
    }

    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        tracing::info!("Detection service listening on {}", self.addr);

        let shutdown = async {
            shutdown_signal().await;
            tracing::info!("Shutdown signal received, starting graceful shutdown")
        };

        self.router.serve_with_shutdown(self.addr, shutdown).await?;
        Ok(())
    }
}

pub async fn start_server(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let ort_model_service = OrtModelService::new(&config.model)?;
    let service_state = ServiceState::new(&config.labels)?;

    let objects: Arc<dyn ObjectStore> = Arc::new(LocalObjectStore::new(&config.storage.root));
    let frames = FrameStore::new(objects);
    tracing::info!(root = %config.storage.root.display(), "Reading frames from storage");

    let addr = config.server.get_address();
    let grpc_server = GrpcServer::new(ort_model_service, service_state, frames, &addr).await?;

    grpc_server.run().await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
