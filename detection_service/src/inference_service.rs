use crate::{model_service::ModelService, state::State};
use detection_proto::{
    detection_service_server::DetectionService, ClassLabels, DetectRequest, DetectResponse, Empty,
};
use detection_store::{FrameReference, FrameStore, StorageError};
use std::sync::Arc;
use tonic::{async_trait, Request, Response, Status};

/// Serves detections for frames already written to the shared frame storage.
/// Nothing is persisted here; the caller owns the detection batches.
pub struct InferenceService<M: ModelService, S: State> {
    model_service: Arc<M>,
    service_state: Arc<S>,
    frames: FrameStore,
}

impl<M: ModelService, S: State> Clone for InferenceService<M, S> {
    fn clone(&self) -> Self {
        Self {
            model_service: self.model_service.clone(),
            service_state: self.service_state.clone(),
            frames: self.frames.clone(),
        }
    }
}

impl<M: ModelService, S: State> InferenceService<M, S> {
    pub fn new(model_service: M, state: S, frames: FrameStore) -> Self {
        Self {
            model_service: Arc::new(model_service),
            service_state: Arc::new(state),
            frames,
        }
    }
}

fn storage_status(err: StorageError) -> Status {
    match err {
        StorageError::MissingReference(reference) => {
            Status::not_found(format!("frame {} not found", reference))
        }
        StorageError::NotFound(key) => Status::not_found(format!("frame {} not found", key)),
        StorageError::InvalidKey(key) => Status::invalid_argument(format!("invalid key {}", key)),
        other => Status::unavailable(format!("frame storage unavailable: {}", other)),
    }
}

#[async_trait]
impl<M: ModelService, S: State> DetectionService for InferenceService<M, S> {
    async fn detect(
        &self,
        request: Request<DetectRequest>,
    ) -> Result<Response<DetectResponse>, Status> {
        let DetectRequest { frame_key } = request.into_inner();
        let reference = FrameReference::parse(&frame_key).map_err(Status::invalid_argument)?;

        let image_data = self.frames.load(&reference).await.map_err(|err| {
            tracing::warn!(frame = %reference, error = %err, "Failed to load frame");
            storage_status(err)
        })?;

        let mut detections = self.model_service.predict(&image_data).await?;

        for detection in detections.iter_mut() {
            if detection.class_name.is_empty() {
                if let Some(label) = self.service_state.label_for(detection.class_id) {
                    detection.class_name = label.to_string();
                }
            }
        }

        tracing::debug!(frame = %reference, "Returning {} detections", detections.len());
        for (i, detection) in detections.iter().enumerate() {
            tracing::debug!(
                "Detection {}: class={} ({}), confidence={:.3}, bbox=({:.1}, {:.1}, {:.1}, {:.1})",
                i,
                detection.class_id,
                detection.class_name,
                detection.confidence,
                detection.x1,
                detection.y1,
                detection.x2,
                detection.y2
            );
        }

        Ok(Response::new(DetectResponse {
            success: true,
            detections_count: detections.len() as u32,
            detections,
        }))
    }

    async fn get_class_labels(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<ClassLabels>, Status> {
        let labels = self.service_state.get_labels().to_vec();
        Ok(Response::new(ClassLabels { labels }))
    }
}
