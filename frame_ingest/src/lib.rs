mod app;
mod frame;
mod ingest;
mod telemetry;

pub mod config;
pub mod dispatcher;
pub mod inference_client;
pub mod pipeline;
pub mod retry;
pub mod source;

pub use app::start_app;
pub use frame::{Frame, SequenceCounter};
pub use ingest::{run_ingest, IngestReport};
pub use telemetry::{init_tracing, Metrics, MetricsExporter, TelemetryError};
