use detection_proto::Detection;
use tonic::{async_trait, Status};

/// A detection model. Returned detections are in the pixel space of the input
/// image and carry only a class id; labels are resolved by the caller.
#[async_trait]
pub trait ModelService: Send + Sync + 'static {
    async fn predict(&self, image_data: &[u8]) -> Result<Vec<Detection>, Status>;
}
