use detection_store::{
    DetectionRecord, DetectionStore, FrameReference, FrameStore, MemoryObjectStore,
    DETECTIONS_PREFIX,
};
use frame_ingest::config::DispatchConfig;
use frame_ingest::dispatcher::Dispatcher;
use frame_ingest::inference_client::{Detector, InferenceError};
use frame_ingest::pipeline::FramePipeline;
use frame_ingest::retry::RetryPolicy;
use frame_ingest::run_ingest;
use frame_ingest::source::{ImageSequenceSource, SourceError};
use image::{ImageBuffer, Rgb};
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use tonic::async_trait;

#[derive(Default)]
struct RecordingDetector {
    seen: Mutex<Vec<u64>>,
}

#[async_trait]
impl Detector for RecordingDetector {
    async fn detect(
        &self,
        frame: &FrameReference,
    ) -> Result<Vec<DetectionRecord>, InferenceError> {
        self.seen.lock().unwrap().push(frame.sequence().unwrap_or_default());
        Ok(vec![DetectionRecord {
            class_id: 0,
            class_name: "person".to_string(),
            confidence: 0.9,
            x1: 1.0,
            y1: 1.0,
            x2: 4.0,
            y2: 6.0,
        }])
    }
}

fn write_frames(dir: &Path, count: usize) {
    for i in 0..count {
        let img = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_pixel(16, 16, Rgb([i as u8, 0, 0]));
        img.save(dir.join(format!("frame_{i:03}.png"))).unwrap();
    }
}

fn start_dispatcher(
    objects: Arc<MemoryObjectStore>,
    detector: Arc<RecordingDetector>,
) -> Dispatcher {
    let pipeline = FramePipeline::new(
        FrameStore::new(objects.clone()),
        DetectionStore::new(objects),
        detector,
        RetryPolicy::no_retry(),
    );
    Dispatcher::start(
        pipeline,
        &DispatchConfig {
            workers: 4,
            queue_capacity: 2,
        },
    )
}

#[tokio::test]
async fn test_ingests_every_frame_of_the_source() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    write_frames(dir.path(), 25);

    let objects = Arc::new(MemoryObjectStore::new());
    let detector = Arc::new(RecordingDetector::default());
    let dispatcher = start_dispatcher(objects.clone(), detector.clone());

    let source = ImageSequenceSource::open(dir.path())?;
    let report = run_ingest(
        source,
        dispatcher.submitter(),
        Arc::new(AtomicBool::new(false)),
    )
    .await;
    let summary = dispatcher.finish().await;

    assert_eq!(report.frames_submitted, 25);
    assert!(report.source_error.is_none());
    assert!(!report.interrupted);
    assert_eq!(summary.submitted, 25);
    assert_eq!(summary.batches_written, 25);

    let mut seen = detector.seen.lock().unwrap().clone();
    seen.sort_unstable();
    assert_eq!(seen, (1..=25).collect::<Vec<u64>>());

    let keys = DetectionStore::new(objects).list(DETECTIONS_PREFIX).await?;
    assert_eq!(keys.len(), 25);
    Ok(())
}

#[tokio::test]
async fn test_source_error_stops_ingestion_but_not_in_flight_frames(
) -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    write_frames(dir.path(), 2);
    std::fs::write(dir.path().join("frame_999.txt"), b"corrupt")?;

    let objects = Arc::new(MemoryObjectStore::new());
    let detector = Arc::new(RecordingDetector::default());
    let dispatcher = start_dispatcher(objects, detector);

    let source = ImageSequenceSource::open(dir.path())?;
    let report = run_ingest(
        source,
        dispatcher.submitter(),
        Arc::new(AtomicBool::new(false)),
    )
    .await;
    let summary = dispatcher.finish().await;

    assert_eq!(report.frames_submitted, 2);
    assert!(matches!(
        report.source_error,
        Some(SourceError::Decode { sequence: 3, .. })
    ));
    assert_eq!(summary.succeeded(), 2);
    Ok(())
}

#[tokio::test]
async fn test_stop_flag_halts_the_producer() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    write_frames(dir.path(), 3);

    let objects = Arc::new(MemoryObjectStore::new());
    let dispatcher = start_dispatcher(objects, Arc::new(RecordingDetector::default()));

    let source = ImageSequenceSource::open(dir.path())?;
    let report = run_ingest(
        source,
        dispatcher.submitter(),
        Arc::new(AtomicBool::new(true)),
    )
    .await;
    let summary = dispatcher.finish().await;

    assert!(report.interrupted);
    assert_eq!(report.frames_submitted, 0);
    assert_eq!(summary.attempted, 0);
    Ok(())
}

#[tokio::test]
async fn test_submission_fps_is_exported() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    write_frames(dir.path(), 20);

    let exporter = frame_ingest::MetricsExporter::new()?;
    let objects = Arc::new(MemoryObjectStore::new());
    let pipeline = FramePipeline::new(
        FrameStore::new(objects.clone()),
        DetectionStore::new(objects),
        RecordingDetector::default(),
        RetryPolicy::no_retry(),
    )
    .with_metrics(Arc::new(exporter.metrics()));
    let dispatcher = Dispatcher::start(
        pipeline,
        &DispatchConfig {
            workers: 2,
            queue_capacity: 4,
        },
    );

    let source = ImageSequenceSource::open(dir.path())?;
    run_ingest(
        source,
        dispatcher.submitter(),
        Arc::new(AtomicBool::new(false)),
    )
    .await;
    dispatcher.finish().await;

    let fps = exporter
        .registry()
        .gather()
        .into_iter()
        .find(|f| f.get_name().starts_with("submission_fps"))
        .map(|f| f.get_metric()[0].get_gauge().get_value())
        .unwrap_or_default();
    assert!(fps > 0.0);
    Ok(())
}
