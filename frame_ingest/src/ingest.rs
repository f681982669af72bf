use crate::dispatcher::FrameSubmitter;
use crate::source::{FrameSource, SourceError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

const PROGRESS_INTERVAL: u64 = 20;

#[derive(Debug, Default)]
pub struct IngestReport {
    pub frames_submitted: u64,
    /// Set when the source failed before reaching end of stream.
    pub source_error: Option<SourceError>,
    /// Set when ingestion was stopped before the source was exhausted.
    pub interrupted: bool,
}

/// Reads `source` to the end on a blocking thread, submitting every frame in order.
pub async fn run_ingest<S>(source: S, submitter: FrameSubmitter, stop: Arc<AtomicBool>) -> IngestReport
where
    S: FrameSource + 'static,
{
    let producer = tokio::task::spawn_blocking(move || produce(source, submitter, &stop));
    match producer.await {
        Ok(report) => report,
        Err(e) => {
            tracing::error!(error = %e, "frame producer terminated abnormally");
            IngestReport {
                interrupted: true,
                ..IngestReport::default()
            }
        }
    }
}

fn produce<S: FrameSource>(mut source: S, submitter: FrameSubmitter, stop: &AtomicBool) -> IngestReport {
    let start = Instant::now();
    let mut report = IngestReport::default();

    loop {
        if stop.load(Ordering::Relaxed) {
            tracing::info!(frames = report.frames_submitted, "ingestion stopped");
            report.interrupted = true;
            break;
        }

        let frame = match source.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(e) => {
                tracing::error!(error = %e, "frame source failed, stopping ingestion");
                report.source_error = Some(e);
                break;
            }
        };

        if let Err(e) = submitter.submit_blocking(frame) {
            tracing::error!(error = %e, "dispatcher no longer accepts frames");
            report.interrupted = true;
            break;
        }
        report.frames_submitted += 1;

        if report.frames_submitted % PROGRESS_INTERVAL == 0 {
            let elapsed = start.elapsed().as_secs_f64();
            let fps = report.frames_submitted as f64 / elapsed.max(f64::EPSILON);
            submitter.metrics().record_submission_fps(fps);
            tracing::info!(
                frames = report.frames_submitted,
                submission_fps = format!("{:.2}", fps),
                "frames submitted to queue"
            );
        }
    }

    tracing::info!(
        frames = report.frames_submitted,
        "frame submission finished"
    );
    report
}
