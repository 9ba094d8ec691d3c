use crate::{
    codec::ImageCodec,
    detection::ClassTable,
    envelope::ResultEnvelope,
    model_service::{Detector, DetectorError},
    normalizer::{normalize, NormalizeError},
    persistence::{NewPlant, PersistenceError, PlantRecord, PlantRepository},
    storage::{ImageRef, ImageStore, StorageError},
};
use image::{imageops::FilterType, DynamicImage, RgbImage};
use serde::Serialize;
use std::{sync::Arc, time::Instant};
use thiserror::Error;
use tracing::instrument;

#[derive(Error, Debug)]
pub enum AnalyzeError {
    #[error(transparent)]
    Source(#[from] StorageError),
    #[error("Failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error(transparent)]
    Detector(#[from] DetectorError),
    #[error(transparent)]
    Normalize(#[from] NormalizeError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

/// Outcome of one analyzed image.
#[derive(Debug, Clone)]
pub struct Analysis {
    pub envelope: ResultEnvelope,
    /// Present when a plant was detected and recorded.
    pub record: Option<PlantRecord>,
    pub inference_time_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum BucketOutcome {
    Analyzed {
        image_url: String,
        label: String,
        labels: Vec<String>,
        #[serde(skip_serializing)]
        inference_time_ms: u64,
    },
    Failed {
        image_url: String,
        error: String,
    },
}

/// Resizes to the square model input and drops any alpha channel.
pub fn preprocess(image: &DynamicImage, input_size: u32) -> RgbImage {
    image
        .resize_exact(input_size, input_size, FilterType::CatmullRom)
        .to_rgb8()
}

pub struct PlantAnalyzer {
    detector: Arc<dyn Detector>,
    class_table: ClassTable,
    codec: Arc<dyn ImageCodec>,
    store: Arc<dyn ImageStore>,
    repository: Arc<dyn PlantRepository>,
    input_size: u32,
}

impl PlantAnalyzer {
    pub fn new(
        detector: Arc<dyn Detector>,
        class_table: ClassTable,
        codec: Arc<dyn ImageCodec>,
        store: Arc<dyn ImageStore>,
        repository: Arc<dyn PlantRepository>,
        input_size: u32,
    ) -> Self {
        Self {
            detector,
            class_table,
            codec,
            store,
            repository,
            input_size,
        }
    }

    pub fn class_table(&self) -> &ClassTable {
        &self.class_table
    }

    pub fn bucket(&self) -> &str {
        self.store.bucket()
    }

    #[instrument(skip(self, image_data), fields(bytes = image_data.len()))]
    pub async fn analyze_upload(
        &self,
        image_data: &[u8],
        owner_id: Option<i64>,
    ) -> Result<Analysis, AnalyzeError> {
        self.analyze_bytes(image_data, None, owner_id).await
    }

    #[instrument(skip(self, image), fields(image = %image))]
    pub async fn analyze_reference(
        &self,
        image: &ImageRef,
        owner_id: Option<i64>,
    ) -> Result<Analysis, AnalyzeError> {
        let image_data = self.store.fetch(image).await?;
        self.analyze_bytes(&image_data, Some(image), owner_id).await
    }

    /// Analyzes every image of the bucket, reporting failures per image.
    #[instrument(skip(self))]
    pub async fn analyze_bucket(&self) -> Result<Vec<BucketOutcome>, AnalyzeError> {
        let images = self.store.list_images().await?;
        let mut outcomes = Vec::with_capacity(images.len());

        for image in images {
            let image_url = image.to_string();
            match self.analyze_reference(&image, None).await {
                Ok(analysis) => {
                    tracing::info!("Analyzed {}: {}", image_url, analysis.envelope.label);
                    outcomes.push(BucketOutcome::Analyzed {
                        image_url,
                        label: analysis.envelope.label,
                        labels: analysis.envelope.labels,
                        inference_time_ms: analysis.inference_time_ms,
                    });
                }
                Err(AnalyzeError::Normalize(NormalizeError::IndexMapping(e))) => {
                    return Err(NormalizeError::IndexMapping(e).into());
                }
                Err(e) => {
                    tracing::warn!("Failed to analyze {}: {}", image_url, e);
                    outcomes.push(BucketOutcome::Failed {
                        image_url,
                        error: e.to_string(),
                    });
                }
            }
        }

        Ok(outcomes)
    }

    pub async fn list_images(&self) -> Result<Vec<ImageRef>, StorageError> {
        self.store.list_images().await
    }

    pub async fn list_plants(
        &self,
        owner_id: Option<i64>,
    ) -> Result<Vec<PlantRecord>, PersistenceError> {
        self.repository.list(owner_id).await
    }

    async fn analyze_bytes(
        &self,
        image_data: &[u8],
        source: Option<&ImageRef>,
        owner_id: Option<i64>,
    ) -> Result<Analysis, AnalyzeError> {
        let decoded = image::load_from_memory(image_data)?;
        let input = preprocess(&decoded, self.input_size);

        let started = Instant::now();
        let detections = self.detector.detect(input.clone()).await?;
        let inference_time_ms = started.elapsed().as_millis() as u64;
        tracing::debug!(
            "Detector returned {} boxes in {} ms",
            detections.len(),
            inference_time_ms
        );

        let envelope = normalize(&input, &detections, &self.class_table, self.codec.as_ref())
            .inspect_err(|e| {
                if let NormalizeError::IndexMapping(e) = e {
                    tracing::error!("Class table out of sync with detector: {}", e);
                }
            })?;

        let record = if envelope.detected() {
            let record = self
                .repository
                .save(NewPlant {
                    name: envelope.label.clone(),
                    image_ref: source.map(ToString::to_string),
                    owner_id,
                })
                .await?;
            tracing::info!(plt_id = record.plt_id, "Saved plant {}", record.plt_name);
            Some(record)
        } else {
            tracing::info!("No plant detected, nothing saved");
            None
        };

        Ok(Analysis {
            envelope,
            record,
            inference_time_ms,
        })
    }
}
