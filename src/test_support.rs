use crate::{
    codec::JpegCodec,
    config::{DatabaseConfig, StorageConfig},
    detection::{ClassTable, Detection},
    model_service::{Detector, DetectorError},
    persistence::SqlitePlantRepository,
    pipeline::PlantAnalyzer,
    storage::LocalBucket,
};
use async_trait::async_trait;
use image::{Rgb, RgbImage};
use std::{io::Cursor, sync::Arc};
use tempfile::TempDir;

pub const TEST_BUCKET: &str = "garden_genie_image";

/// Detector returning the same detections for every image.
pub struct StaticDetector {
    detections: Vec<Detection>,
}

impl StaticDetector {
    pub fn classes(class_indices: &[usize]) -> Self {
        let detections = class_indices
            .iter()
            .map(|&class_index| Detection::new(class_index, 0.9, [0., 0., 10., 10.]))
            .collect();
        Self { detections }
    }
}

#[async_trait]
impl Detector for StaticDetector {
    async fn detect(&self, _image: RgbImage) -> Result<Vec<Detection>, DetectorError> {
        Ok(self.detections.clone())
    }
}

pub fn encode_png(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_pixel(width, height, Rgb([30, 140, 50]));
    let mut cursor = Cursor::new(Vec::new());
    img.write_to(&mut cursor, image::ImageFormat::Png).unwrap();
    cursor.into_inner()
}

/// Analyzer over an in-memory database and a temporary bucket holding
/// `leaf.png`.
pub async fn test_analyzer(detector: impl Detector) -> (PlantAnalyzer, TempDir) {
    let bucket_dir = tempfile::tempdir().unwrap();
    std::fs::write(bucket_dir.path().join("leaf.png"), encode_png(24, 24)).unwrap();

    let store = LocalBucket::new(&StorageConfig {
        bucket: TEST_BUCKET.to_string(),
        root_dir: bucket_dir.path().to_path_buf(),
    });
    let repository = SqlitePlantRepository::connect(&DatabaseConfig {
        url: "sqlite::memory:".to_string(),
        max_connections: 1,
    })
    .await
    .unwrap();

    let analyzer = PlantAnalyzer::new(
        Arc::new(detector),
        ClassTable::plants(),
        Arc::new(JpegCodec::default()),
        Arc::new(store),
        Arc::new(repository),
        32,
    );

    (analyzer, bucket_dir)
}
