use crate::config::LogLevel;
use opentelemetry::{
    global,
    metrics::{Counter, Gauge, Histogram, Meter, MeterProvider},
    KeyValue,
};
use opentelemetry_sdk::metrics::SdkMeterProvider;
use prometheus::{Encoder, Registry, TextEncoder};
use std::time::Duration;
use thiserror::Error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const METER_NAME: &str = "frame_ingest";

/// JSON logs; `RUST_LOG` takes precedence over the configured level.
pub fn init_tracing(log_level: &LogLevel) {
    let directives = format!("{},h2=info,tower=info", log_level.as_str());

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| directives.into()),
        )
        .with(tracing_subscriber::fmt::layer().json().with_level(true))
        .init();
}

#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to build metrics exporter: {0}")]
    Exporter(String),
    #[error("Failed to encode metrics: {0}")]
    Encode(#[from] prometheus::Error),
    #[error("Encoded metrics are not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Pipeline instruments. Built from any meter; [`Metrics::default`] uses the
/// global meter provider, which records nothing unless one was installed.
pub struct Metrics {
    frames_attempted: Counter<u64>,
    batches_written: Counter<u64>,
    empty_frames: Counter<u64>,
    failed_frames: Counter<u64>,
    step_duration: Histogram<u64>,
    submission_fps: Gauge<f64>,
}

impl Metrics {
    pub fn new(meter: &Meter) -> Self {
        let frames_attempted = meter
            .u64_counter("frames_attempted")
            .with_description("Frames taken off the queue by a worker")
            .build();

        let batches_written = meter
            .u64_counter("batches_written")
            .with_description("Detection batches persisted")
            .build();

        let empty_frames = meter
            .u64_counter("empty_frames")
            .with_description("Frames processed without any detection")
            .build();

        let failed_frames = meter
            .u64_counter("failed_frames")
            .with_description("Frames dropped after an error")
            .build();

        let step_duration = meter
            .u64_histogram("frame_step_duration_ms")
            .with_boundaries(vec![
                5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0,
            ])
            .with_description("Duration of each frame pipeline step in milliseconds")
            .build();

        let submission_fps = meter
            .f64_gauge("submission_fps")
            .with_description("Frames submitted to the dispatch queue per second")
            .build();

        Metrics {
            frames_attempted,
            batches_written,
            empty_frames,
            failed_frames,
            step_duration,
            submission_fps,
        }
    }

    pub fn record_frame_attempted(&self) {
        self.frames_attempted.add(1, &[]);
    }

    pub fn record_batch_written(&self) {
        self.batches_written.add(1, &[]);
    }

    pub fn record_empty_frame(&self) {
        self.empty_frames.add(1, &[]);
    }

    pub fn record_failed_frame(&self) {
        self.failed_frames.add(1, &[]);
    }

    pub fn record_step_duration(&self, step: &'static str, duration: Duration) {
        let attributes = [KeyValue::new("step", step)];
        self.step_duration
            .record(duration.as_millis() as u64, &attributes);
    }

    pub fn record_submission_fps(&self, fps: f64) {
        self.submission_fps.record(fps, &[]);
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new(&global::meter(METER_NAME))
    }
}

/// Meter provider backed by a Prometheus registry.
pub struct MetricsExporter {
    provider: SdkMeterProvider,
    registry: Registry,
}

impl MetricsExporter {
    pub fn new() -> Result<Self, TelemetryError> {
        let registry = Registry::new();
        let exporter = opentelemetry_prometheus::exporter()
            .with_registry(registry.clone())
            .build()
            .map_err(|e| TelemetryError::Exporter(e.to_string()))?;

        let provider = SdkMeterProvider::builder().with_reader(exporter).build();

        Ok(Self { provider, registry })
    }

    pub fn metrics(&self) -> Metrics {
        Metrics::new(&self.provider.meter(METER_NAME))
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Prometheus text exposition of every instrument.
    pub fn encode(&self) -> Result<String, TelemetryError> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}
