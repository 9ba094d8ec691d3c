use crate::detection::Detection;
use async_trait::async_trait;
use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("ONNX runtime error: {0}")]
    Ort(#[from] ort::Error),
    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),
    #[error("Inference failed: {0}")]
    Inference(String),
    #[error("Unexpected model output: {0}")]
    InvalidOutput(String),
}

/// Runs the object-detection model on an image already resized to the
/// model's input geometry.
#[async_trait]
pub trait Detector: Send + Sync + 'static {
    async fn detect(&self, image: RgbImage) -> Result<Vec<Detection>, DetectorError>;
}
