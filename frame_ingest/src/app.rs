use crate::config::{Config, SourceKind};
use crate::dispatcher::{DispatchSummary, Dispatcher};
use crate::inference_client::GrpcDetector;
use crate::ingest::{run_ingest, IngestReport};
use crate::pipeline::FramePipeline;
use crate::retry::RetryPolicy;
use crate::source::{FrameSource, ImageSequenceSource};
use crate::telemetry::MetricsExporter;
use anyhow::Context;
use detection_store::{DetectionStore, FrameStore, LocalObjectStore, ObjectStore};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::signal;

pub async fn start_app(config: Config) -> anyhow::Result<DispatchSummary> {
    let objects: Arc<dyn ObjectStore> = Arc::new(LocalObjectStore::new(&config.storage.root));
    tracing::info!(root = %config.storage.root.display(), "using local object storage");

    let detector = GrpcDetector::connect(&config.inference_service)
        .await
        .with_context(|| {
            format!(
                "failed to initialize inference client for {}",
                config.inference_service.get_address()
            )
        })?;

    let exporter = MetricsExporter::new()?;

    let pipeline = FramePipeline::new(
        FrameStore::new(objects.clone()),
        DetectionStore::new(objects),
        detector,
        RetryPolicy::new(&config.retry),
    )
    .with_metrics(Arc::new(exporter.metrics()));
    let dispatcher = Dispatcher::start(pipeline, &config.dispatch);

    let stop = Arc::new(AtomicBool::new(false));
    let signal_stop = stop.clone();
    let signal_handle = tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("Shutdown signal received, finishing in-flight frames.");
        signal_stop.store(true, Ordering::Relaxed);
    });

    let report = match config.source.kind {
        SourceKind::Images => {
            let source = ImageSequenceSource::open(&config.source.path)?;
            ingest(source, &dispatcher, stop).await
        }
        #[cfg(feature = "video")]
        SourceKind::Video => {
            let source = crate::source::VideoFileSource::open(&config.source.path)?;
            ingest(source, &dispatcher, stop).await
        }
        #[cfg(not(feature = "video"))]
        SourceKind::Video => {
            anyhow::bail!("video sources require building with the `video` feature")
        }
    };

    let summary = dispatcher.finish().await;
    signal_handle.abort();

    tracing::info!(
        frames_submitted = report.frames_submitted,
        interrupted = report.interrupted,
        batches_written = summary.batches_written,
        frames_without_detections = summary.empty,
        frames_failed = summary.failed,
        "ingestion complete"
    );

    if let Some(path) = &config.metrics.textfile {
        export_metrics(&exporter, path).await;
    }

    if let Some(e) = report.source_error {
        return Err(e).context("frame source failed before end of stream");
    }
    Ok(summary)
}

async fn ingest<S: FrameSource + 'static>(
    source: S,
    dispatcher: &Dispatcher,
    stop: Arc<AtomicBool>,
) -> IngestReport {
    run_ingest(source, dispatcher.submitter(), stop).await
}

async fn export_metrics(exporter: &MetricsExporter, path: &Path) {
    let written = match exporter.encode() {
        Ok(text) => tokio::fs::write(path, text).await.map_err(|e| e.to_string()),
        Err(e) => Err(e.to_string()),
    };
    match written {
        Ok(()) => tracing::info!(path = %path.display(), "metrics written"),
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to write metrics"),
    }
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
