use crate::error::StorageError;
use crate::key::FrameReference;
use crate::object_store::ObjectStore;
use bytes::Bytes;
use std::sync::Arc;

/// Frame images stored under `images/frame_<NNNN>.jpg`.
#[derive(Clone)]
pub struct FrameStore {
    objects: Arc<dyn ObjectStore>,
}

impl FrameStore {
    pub fn new(objects: Arc<dyn ObjectStore>) -> Self {
        Self { objects }
    }

    pub async fn put(&self, sequence: u64, image: Bytes) -> Result<FrameReference, StorageError> {
        let reference = FrameReference::for_sequence(sequence);
        self.objects.put(reference.as_str(), image).await?;
        Ok(reference)
    }

    pub async fn load(&self, reference: &FrameReference) -> Result<Bytes, StorageError> {
        match self.objects.get(reference.as_str()).await {
            Err(StorageError::NotFound(_)) => {
                Err(StorageError::MissingReference(reference.clone()))
            }
            other => other,
        }
    }
}
