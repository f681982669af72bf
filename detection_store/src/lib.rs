mod batch;
mod detection_store;
mod error;
mod frame_store;
mod key;

pub mod object_store;

pub use batch::{DetectionBatch, DetectionRecord};
pub use detection_store::DetectionStore;
pub use error::StorageError;
pub use frame_store::FrameStore;
pub use key::{partition_prefix, FrameReference, StorageKey, DETECTIONS_PREFIX, IMAGES_PREFIX};
pub use object_store::{LocalObjectStore, MemoryObjectStore, ObjectStore};
