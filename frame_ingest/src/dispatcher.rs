//! Fixed-size worker pool fed through a bounded queue.
//!
//! Frames are processed independently and in no particular order. A failing
//! frame is logged and counted, and never affects other frames or the producer.

use crate::config::DispatchConfig;
use crate::frame::Frame;
use crate::inference_client::Detector;
use crate::pipeline::{FrameOutcome, FramePipeline, PipelineError};
use crate::telemetry::Metrics;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Dispatcher is closed, frame {0} was not submitted")]
    Closed(u64),
}

/// Run-local tallies behind [`DispatchSummary`]; exported metrics live in [`Metrics`].
#[derive(Debug, Default)]
struct DispatchStats {
    submitted: AtomicU64,
    attempted: AtomicU64,
    batches_written: AtomicU64,
    empty: AtomicU64,
    failed: AtomicU64,
}

impl DispatchStats {
    fn snapshot(&self) -> DispatchSummary {
        DispatchSummary {
            submitted: self.submitted.load(Ordering::Relaxed),
            attempted: self.attempted.load(Ordering::Relaxed),
            batches_written: self.batches_written.load(Ordering::Relaxed),
            empty: self.empty.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Per-frame outcome counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub submitted: u64,
    pub attempted: u64,
    pub batches_written: u64,
    /// Frames processed successfully without any detection.
    pub empty: u64,
    pub failed: u64,
}

impl DispatchSummary {
    pub fn succeeded(&self) -> u64 {
        self.batches_written + self.empty
    }
}

/// Cloneable handle used by producers to enqueue frames.
#[derive(Clone)]
pub struct FrameSubmitter {
    sender: mpsc::Sender<Frame>,
    stats: Arc<DispatchStats>,
    metrics: Arc<Metrics>,
}

impl FrameSubmitter {
    /// Waits while the queue is full.
    pub async fn submit(&self, frame: Frame) -> Result<(), DispatchError> {
        let sequence = frame.sequence;
        self.sender
            .send(frame)
            .await
            .map_err(|_| DispatchError::Closed(sequence))?;
        self.stats.submitted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Blocks the calling thread while the queue is full. Must not be called
    /// from within an async context.
    pub fn submit_blocking(&self, frame: Frame) -> Result<(), DispatchError> {
        let sequence = frame.sequence;
        self.sender
            .blocking_send(frame)
            .map_err(|_| DispatchError::Closed(sequence))?;
        self.stats.submitted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub(crate) fn metrics(&self) -> &Metrics {
        &self.metrics
    }
}

pub struct Dispatcher {
    submitter: FrameSubmitter,
    workers: JoinSet<()>,
    stats: Arc<DispatchStats>,
}

impl Dispatcher {
    pub fn start<D: Detector>(pipeline: FramePipeline<D>, config: &DispatchConfig) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let queue = Arc::new(Mutex::new(receiver));
        let metrics = pipeline.metrics().clone();
        let pipeline = Arc::new(pipeline);
        let stats = Arc::new(DispatchStats::default());

        let num_workers = config.workers.max(1);
        let mut workers = JoinSet::new();
        for worker in 0..num_workers {
            workers.spawn(run_worker(
                worker,
                queue.clone(),
                pipeline.clone(),
                stats.clone(),
                metrics.clone(),
            ));
        }
        tracing::info!(
            workers = num_workers,
            queue_capacity = config.queue_capacity,
            "dispatcher started"
        );

        Self {
            submitter: FrameSubmitter {
                sender,
                stats: stats.clone(),
                metrics,
            },
            workers,
            stats,
        }
    }

    pub fn submitter(&self) -> FrameSubmitter {
        self.submitter.clone()
    }

    pub async fn submit(&self, frame: Frame) -> Result<(), DispatchError> {
        self.submitter.submit(frame).await
    }

    pub fn summary(&self) -> DispatchSummary {
        self.stats.snapshot()
    }

    /// Closes the queue and waits until every submitted frame has been processed.
    /// Submitters cloned from this dispatcher must be dropped first.
    pub async fn finish(self) -> DispatchSummary {
        let Dispatcher {
            submitter,
            mut workers,
            stats,
        } = self;
        drop(submitter);

        while let Some(result) = workers.join_next().await {
            if let Err(e) = result {
                tracing::error!(error = %e, "dispatch worker terminated abnormally");
            }
        }

        let summary = stats.snapshot();
        tracing::info!(
            submitted = summary.submitted,
            batches_written = summary.batches_written,
            empty = summary.empty,
            failed = summary.failed,
            "dispatcher drained"
        );
        summary
    }
}

async fn run_worker<D: Detector>(
    worker: usize,
    queue: Arc<Mutex<mpsc::Receiver<Frame>>>,
    pipeline: Arc<FramePipeline<D>>,
    stats: Arc<DispatchStats>,
    metrics: Arc<Metrics>,
) {
    loop {
        let next = queue.lock().await.recv().await;
        let Some(frame) = next else {
            break;
        };
        let sequence = frame.sequence;
        stats.attempted.fetch_add(1, Ordering::Relaxed);
        metrics.record_frame_attempted();

        // Each frame runs in its own task so a panic only loses that frame.
        let task_pipeline = pipeline.clone();
        let result = match tokio::spawn(async move { task_pipeline.process(frame).await }).await
        {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(worker, frame = sequence, error = %e, "frame task aborted");
                Err(PipelineError::Panicked)
            }
        };

        match result {
            Ok(FrameOutcome::NoDetections { .. }) => {
                stats.empty.fetch_add(1, Ordering::Relaxed);
                metrics.record_empty_frame();
            }
            Ok(FrameOutcome::BatchWritten {
                key, detections, ..
            }) => {
                stats.batches_written.fetch_add(1, Ordering::Relaxed);
                metrics.record_batch_written();
                tracing::info!(worker, frame = sequence, key = %key, detections, "detections stored");
            }
            Err(e) => {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                metrics.record_failed_frame();
                tracing::error!(worker, frame = sequence, error = %e, "frame dropped");
            }
        }
    }

    tracing::debug!(worker, "worker stopped");
}
