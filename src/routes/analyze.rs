use crate::{
    envelope::EnvelopeFormat,
    model_service::DetectorError,
    pipeline::{AnalyzeError, Analysis, BucketOutcome},
    server::SharedState,
    storage::{ImageRef, StorageError},
};
use axum::{
    body::Bytes,
    extract::{
        multipart::{Multipart, MultipartError, MultipartRejection},
        rejection::QueryRejection,
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::instrument;

const IMAGE_FIELD: &str = "image";

#[derive(Debug, Default, Deserialize)]
pub struct AnalyzeParams {
    pub image_url: Option<String>,
    #[serde(default)]
    pub format: EnvelopeFormat,
    pub user_id: Option<i64>,
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("No image found in request.")]
    MissingImage,
    #[error("{}", .0.body_text())]
    Query(#[from] QueryRejection),
    #[error("Failed to read upload: {0}")]
    Upload(#[from] MultipartError),
    #[error(transparent)]
    Analyze(#[from] AnalyzeError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("Failed to serialize response: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::MissingImage | ApiError::Query(_) => StatusCode::BAD_REQUEST,
            ApiError::Upload(e) => e.status(),
            ApiError::Storage(e) | ApiError::Analyze(AnalyzeError::Source(e)) => match e {
                StorageError::InvalidReference(_) | StorageError::UnknownBucket(_) => {
                    StatusCode::BAD_REQUEST
                }
                StorageError::NotFound(_) => StatusCode::NOT_FOUND,
                StorageError::Unavailable(_) => StatusCode::BAD_GATEWAY,
            },
            ApiError::Analyze(AnalyzeError::Decode(_)) => StatusCode::BAD_REQUEST,
            ApiError::Analyze(AnalyzeError::Detector(DetectorError::ModelUnavailable(_))) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ApiError::Analyze(_) | ApiError::Serialize(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        } else {
            tracing::warn!("Request rejected: {}", self);
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

async fn read_image_field(multipart: &mut Multipart) -> Result<Option<Bytes>, ApiError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() == Some(IMAGE_FIELD) {
            return Ok(Some(field.bytes().await?));
        }
    }
    Ok(None)
}

/// Accepts either a multipart upload (`image` field) or an `image_url`
/// query parameter pointing into the bucket.
#[instrument(skip(state, multipart))]
pub async fn analyze_image(
    State(state): State<SharedState>,
    params: Result<Query<AnalyzeParams>, QueryRejection>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, ApiError> {
    state.metrics.record_request("analyze");
    let Query(params) = params?;

    let (source, result) = match params.image_url.as_deref() {
        Some(image_url) => {
            let image: ImageRef = image_url.parse()?;
            let result = state.analyzer.analyze_reference(&image, params.user_id).await;
            ("url", result)
        }
        None => {
            let image_data = match multipart {
                Ok(mut multipart) => read_image_field(&mut multipart).await?,
                Err(_) => None,
            };
            let image_data = image_data.ok_or(ApiError::MissingImage)?;
            let result = state
                .analyzer
                .analyze_upload(&image_data, params.user_id)
                .await;
            ("upload", result)
        }
    };

    let analysis = record_outcome(&state, source, result)?;
    let body = analysis.envelope.to_json(params.format)?;

    Ok(Json(body).into_response())
}

#[instrument(skip(state))]
pub async fn analyze_bucket(State(state): State<SharedState>) -> Result<Response, ApiError> {
    state.metrics.record_request("analyze_bucket");

    let outcomes = state.analyzer.analyze_bucket().await?;
    for outcome in &outcomes {
        match outcome {
            BucketOutcome::Analyzed {
                labels,
                inference_time_ms,
                ..
            } => {
                let result = if labels.is_empty() { "empty" } else { "detected" };
                state.metrics.record_analysis("bucket", result);
                state
                    .metrics
                    .record_inference_duration(*inference_time_ms, "bucket");
            }
            BucketOutcome::Failed { .. } => state.metrics.record_analysis("bucket", "error"),
        }
    }

    Ok(Json(outcomes).into_response())
}

fn record_outcome(
    state: &SharedState,
    source: &str,
    result: Result<Analysis, AnalyzeError>,
) -> Result<Analysis, AnalyzeError> {
    match &result {
        Ok(analysis) => {
            let outcome = if analysis.envelope.detected() {
                "detected"
            } else {
                "empty"
            };
            state.metrics.record_analysis(source, outcome);
            state
                .metrics
                .record_inference_duration(analysis.inference_time_ms, source);
        }
        Err(_) => state.metrics.record_analysis(source, "error"),
    }
    result
}
