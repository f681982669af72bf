use crate::config::InferenceServiceConfig;
use detection_proto::{
    detection_service_client::DetectionServiceClient, DetectRequest, Detection, Empty,
};
use detection_store::{DetectionRecord, FrameReference};
use std::sync::Arc;
use thiserror::Error;
use tokio::time::{sleep, timeout, Duration};
use tonic::{
    async_trait,
    transport::{Channel, Error},
    Code, Request, Status,
};
use tracing::instrument;

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("Failed to connect to gRPC server: {0}")]
    ConnectionFailed(#[from] Error),
    #[error("Maximum connection retries exceeded.")]
    MaxRetriesExceeded,
    #[error("gRPC request failed: {0}")]
    GrpcRequestFailed(#[from] Status),
    #[error("Inference service reported failure for {0}")]
    Rejected(FrameReference),
}

impl InferenceError {
    pub fn is_transient(&self) -> bool {
        match self {
            InferenceError::ConnectionFailed(_) | InferenceError::MaxRetriesExceeded => true,
            InferenceError::GrpcRequestFailed(status) => matches!(
                status.code(),
                Code::Unavailable
                    | Code::DeadlineExceeded
                    | Code::ResourceExhausted
                    | Code::Aborted
                    | Code::Unknown
            ),
            InferenceError::Rejected(_) => false,
        }
    }
}

/// Turns a stored frame into detections.
#[async_trait]
pub trait Detector: Send + Sync + 'static {
    async fn detect(&self, frame: &FrameReference)
        -> Result<Vec<DetectionRecord>, InferenceError>;
}

#[async_trait]
impl<D: Detector + ?Sized> Detector for Arc<D> {
    async fn detect(
        &self,
        frame: &FrameReference,
    ) -> Result<Vec<DetectionRecord>, InferenceError> {
        (**self).detect(frame).await
    }
}

/// Client of the remote detection service.
#[derive(Clone)]
pub struct GrpcDetector {
    client: DetectionServiceClient<Channel>,
    class_labels: Arc<Vec<String>>,
}

impl GrpcDetector {
    pub async fn connect(config: &InferenceServiceConfig) -> Result<Self, InferenceError> {
        let mut client = Self::get_client(config.get_address(), config.connect_retries).await?;

        let labels = client
            .get_class_labels(Request::new(Empty {}))
            .await?
            .into_inner()
            .labels;
        tracing::info!(labels = labels.len(), "connected to inference service");

        Ok(Self {
            client,
            class_labels: Arc::new(labels),
        })
    }

    async fn get_client(
        address: String,
        max_retries: u32,
    ) -> Result<DetectionServiceClient<Channel>, InferenceError> {
        let mut retry_delay = Duration::from_millis(50);
        let max_retry_delay = Duration::from_secs(1);
        let mut retry_count = 0;

        while retry_count < max_retries {
            match timeout(
                Duration::from_secs(1),
                DetectionServiceClient::connect(address.clone()),
            )
            .await
            {
                Ok(Ok(client)) => return Ok(client),
                Ok(Err(e)) => {
                    tracing::error!(address = %address, "Failed to connect to gRPC server: {:?}", e);
                }
                Err(_) => {
                    tracing::error!(address = %address, "Connection timeout");
                }
            }

            retry_count += 1;
            let jitter = rand::random::<f32>() * 0.2 + 0.9;
            sleep(retry_delay.mul_f32(jitter)).await;
            retry_delay = (retry_delay * 2).min(max_retry_delay);
        }

        Err(InferenceError::MaxRetriesExceeded)
    }
}

#[async_trait]
impl Detector for GrpcDetector {
    #[instrument(skip(self), fields(frame = %frame))]
    async fn detect(
        &self,
        frame: &FrameReference,
    ) -> Result<Vec<DetectionRecord>, InferenceError> {
        let mut client = self.client.clone();
        let request = Request::new(DetectRequest {
            frame_key: frame.to_string(),
        });

        let response = client.detect(request).await?.into_inner();
        if !response.success {
            return Err(InferenceError::Rejected(frame.clone()));
        }
        if response.detections_count as usize != response.detections.len() {
            tracing::warn!(
                reported = response.detections_count,
                received = response.detections.len(),
                "detection count mismatch"
            );
        }

        Ok(label_detections(response.detections, &self.class_labels))
    }
}

fn label_detections(detections: Vec<Detection>, class_labels: &[String]) -> Vec<DetectionRecord> {
    detections
        .into_iter()
        .map(|d| {
            let class_name = if !d.class_name.is_empty() {
                d.class_name
            } else if let Some(label) = usize::try_from(d.class_id)
                .ok()
                .and_then(|id| class_labels.get(id))
            {
                label.clone()
            } else {
                format!("Unknown class {}", d.class_id)
            };

            DetectionRecord {
                class_id: d.class_id,
                class_name,
                confidence: d.confidence,
                x1: d.x1,
                y1: d.y1,
                x2: d.x2,
                y2: d.y2,
            }
        })
        .collect()
}
