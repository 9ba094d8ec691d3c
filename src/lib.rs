mod ort_service;
mod routes;
#[cfg(test)]
mod test_support;

pub mod app;
pub mod codec;
pub mod config;
pub mod detection;
pub mod envelope;
pub mod model_service;
pub mod normalizer;
pub mod persistence;
pub mod pipeline;
pub mod server;
pub mod storage;
pub mod telemetry;

pub use app::start_app;
pub use detection::{ClassTable, Detection};
pub use envelope::{EnvelopeFormat, ResultEnvelope, NO_OBJECT_LABEL};
pub use normalizer::{normalize, IndexMappingError, NormalizeError};
pub use ort_service::OrtModelService;
