use crate::batch::DetectionBatch;
use crate::error::StorageError;
use crate::key::{partition_prefix, StorageKey};
use crate::object_store::ObjectStore;
use bytes::Bytes;
use chrono::NaiveDate;
use std::sync::Arc;

/// Append-only store of detection batches, partitioned by UTC day.
#[derive(Clone)]
pub struct DetectionStore {
    objects: Arc<dyn ObjectStore>,
}

impl DetectionStore {
    pub fn new(objects: Arc<dyn ObjectStore>) -> Self {
        Self { objects }
    }

    pub async fn write(&self, batch: &DetectionBatch) -> Result<StorageKey, StorageError> {
        batch
            .validate()
            .map_err(|reason| StorageError::InvalidBatch {
                frame: batch.frame.clone(),
                reason,
            })?;

        let key = StorageKey::for_batch(batch.created_at, &batch.frame);
        let body = serde_json::to_vec(batch).map_err(StorageError::Encode)?;
        self.objects.put(key.as_str(), Bytes::from(body)).await?;

        tracing::debug!(
            key = %key,
            frame = %batch.frame,
            detections = batch.detections.len(),
            "detection batch written"
        );
        Ok(key)
    }

    /// Batch keys under `prefix`, oldest first.
    pub async fn list(&self, prefix: &str) -> Result<Vec<StorageKey>, StorageError> {
        let keys = self.objects.list(prefix).await?;
        Ok(keys.into_iter().filter_map(StorageKey::from_listed).collect())
    }

    pub async fn list_day(&self, date: NaiveDate) -> Result<Vec<StorageKey>, StorageError> {
        self.list(&partition_prefix(date)).await
    }

    pub async fn read(&self, key: &StorageKey) -> Result<DetectionBatch, StorageError> {
        let body = self.objects.get(key.as_str()).await?;
        serde_json::from_slice(&body).map_err(|source| StorageError::Decode {
            key: key.to_string(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::DetectionRecord;
    use crate::frame_store::FrameStore;
    use crate::key::{FrameReference, DETECTIONS_PREFIX};
    use crate::object_store::{LocalObjectStore, MemoryObjectStore};
    use chrono::{TimeZone, Utc};

    fn records() -> Vec<DetectionRecord> {
        vec![
            DetectionRecord {
                class_id: 2,
                class_name: "car".to_string(),
                confidence: 0.875,
                x1: 12.5,
                y1: 40.0,
                x2: 220.25,
                y2: 180.0,
            },
            DetectionRecord {
                class_id: 0,
                class_name: "person".to_string(),
                confidence: 0.5,
                x1: 300.0,
                y1: 10.0,
                x2: 340.0,
                y2: 120.0,
            },
        ]
    }

    #[tokio::test]
    async fn test_write_then_read_round_trip() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let store = DetectionStore::new(Arc::new(LocalObjectStore::new(dir.path())));
        let batch = DetectionBatch::new(FrameReference::for_sequence(5), records());

        let key = store.write(&batch).await?;
        let read_back = store.read(&key).await?;

        assert_eq!(read_back, batch);
        assert!(key.as_str().ends_with("_frame_0005.json"));
        Ok(())
    }

    #[tokio::test]
    async fn test_list_returns_only_batches_in_creation_order(
    ) -> Result<(), Box<dyn std::error::Error>> {
        let objects = Arc::new(MemoryObjectStore::new());
        let store = DetectionStore::new(objects.clone());
        let frames = FrameStore::new(objects);
        frames.put(1, Bytes::from_static(b"jpeg")).await?;

        let mut late = DetectionBatch::new(FrameReference::for_sequence(1), records());
        late.created_at = Utc.with_ymd_and_hms(2025, 9, 17, 8, 0, 0).unwrap();
        let mut early = DetectionBatch::new(FrameReference::for_sequence(2), records());
        early.created_at = Utc.with_ymd_and_hms(2025, 9, 16, 8, 0, 0).unwrap();

        let late_key = store.write(&late).await?;
        let early_key = store.write(&early).await?;

        assert_eq!(store.list(DETECTIONS_PREFIX).await?, vec![early_key.clone(), late_key]);
        let day = NaiveDate::from_ymd_opt(2025, 9, 16).unwrap();
        assert_eq!(store.list_day(day).await?, vec![early_key]);
        Ok(())
    }

    #[tokio::test]
    async fn test_invalid_batches_are_not_written() {
        let objects = Arc::new(MemoryObjectStore::new());
        let store = DetectionStore::new(objects.clone());

        let mut bad = records();
        bad[0].x2 = 0.0;
        let err = store
            .write(&DetectionBatch::new(FrameReference::for_sequence(1), bad))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidBatch { .. }));

        let empty = DetectionBatch::new(FrameReference::for_sequence(2), Vec::new());
        assert!(store.write(&empty).await.is_err());
        assert!(objects.is_empty());
    }

    #[tokio::test]
    async fn test_batch_resolves_its_frame() -> Result<(), Box<dyn std::error::Error>> {
        let objects = Arc::new(MemoryObjectStore::new());
        let store = DetectionStore::new(objects.clone());
        let frames = FrameStore::new(objects);

        let reference = frames.put(8, Bytes::from_static(b"jpeg")).await?;
        let key = store.write(&DetectionBatch::new(reference, records())).await?;
        let orphan_key = store
            .write(&DetectionBatch::new(FrameReference::for_sequence(9), records()))
            .await?;

        let batch = store.read(&key).await?;
        assert_eq!(&frames.load(&batch.frame).await?[..], b"jpeg");

        let orphan = store.read(&orphan_key).await?;
        assert!(matches!(
            frames.load(&orphan.frame).await,
            Err(StorageError::MissingReference(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_corrupt_batch_reports_decode_error() {
        let objects = Arc::new(MemoryObjectStore::new());
        let store = DetectionStore::new(objects.clone());
        let key = StorageKey::for_batch(Utc::now(), &FrameReference::for_sequence(1));
        objects
            .put(key.as_str(), Bytes::from_static(b"not json"))
            .await
            .unwrap();

        assert!(matches!(
            store.read(&key).await,
            Err(StorageError::Decode { .. })
        ));
    }
}
