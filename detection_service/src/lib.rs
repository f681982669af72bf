mod inference_service;
mod model_service;
mod ort_service;
mod server;
mod state;
mod telemetry;

pub mod config;

pub use inference_service::InferenceService;
pub use model_service::ModelService;
pub use ort_service::OrtModelService;
pub use server::{start_server, GrpcServer};
pub use state::{load_class_labels, ServiceState, State};
pub use telemetry::init_tracing;
