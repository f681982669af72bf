use crate::frame::Frame;
use crate::inference_client::{Detector, InferenceError};
use crate::retry::{RetryError, RetryPolicy};
use crate::telemetry::Metrics;
use detection_store::{
    DetectionBatch, DetectionStore, FrameReference, FrameStore, StorageError, StorageKey,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::instrument;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Inference error: {0}")]
    Inference(#[from] InferenceError),
    #[error("{step} still failing after {attempts} attempts: {source}")]
    RetryExhausted {
        step: &'static str,
        attempts: u32,
        #[source]
        source: Box<PipelineError>,
    },
    #[error("Frame pipeline panicked")]
    Panicked,
}

impl<E: Into<PipelineError>> From<RetryError<E>> for PipelineError {
    fn from(err: RetryError<E>) -> Self {
        match err {
            RetryError::Failed(e) => e.into(),
            RetryError::Exhausted {
                step,
                attempts,
                last,
            } => PipelineError::RetryExhausted {
                step,
                attempts,
                source: Box::new(last.into()),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameOutcome {
    /// The model found nothing; no batch is written.
    NoDetections { frame: FrameReference },
    BatchWritten {
        frame: FrameReference,
        key: StorageKey,
        detections: usize,
    },
}

/// The per-frame work: store the frame, detect, store the detections.
pub struct FramePipeline<D: Detector> {
    frames: FrameStore,
    detections: DetectionStore,
    detector: D,
    retry: RetryPolicy,
    metrics: Arc<Metrics>,
}

impl<D: Detector> FramePipeline<D> {
    pub fn new(
        frames: FrameStore,
        detections: DetectionStore,
        detector: D,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            frames,
            detections,
            detector,
            retry,
            metrics: Arc::new(Metrics::default()),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    async fn timed<T>(&self, step: &'static str, work: impl Future<Output = T>) -> T {
        let started = Instant::now();
        let result = work.await;
        self.metrics.record_step_duration(step, started.elapsed());
        result
    }

    #[instrument(skip(self, frame), fields(frame = frame.sequence))]
    pub async fn process(&self, frame: Frame) -> Result<FrameOutcome, PipelineError> {
        let reference = self
            .timed(
                "store_frame",
                self.retry.run("store_frame", || {
                    self.frames.put(frame.sequence, frame.data.clone())
                }),
            )
            .await?;

        let records = self
            .timed(
                "detect",
                self.retry.run("detect", || self.detector.detect(&reference)),
            )
            .await?;

        if records.is_empty() {
            tracing::debug!(frame = %reference, "no detections");
            return Ok(FrameOutcome::NoDetections { frame: reference });
        }

        let detections = records.len();
        let batch = DetectionBatch::new(reference.clone(), records);
        let key = self
            .timed(
                "store_detections",
                self.retry
                    .run("store_detections", || self.detections.write(&batch)),
            )
            .await?;

        Ok(FrameOutcome::BatchWritten {
            frame: reference,
            key,
            detections,
        })
    }
}
