use super::ApiError;
use crate::{pipeline::AnalyzeError, server::SharedState};
use axum::{
    extract::{rejection::QueryRejection, Query, State},
    response::{IntoResponse, Json, Response},
};
use serde::Deserialize;
use tracing::instrument;

#[derive(Debug, Deserialize)]
pub struct PlantsParams {
    pub user_id: Option<i64>,
}

#[instrument(skip(state))]
pub async fn list_plants(
    State(state): State<SharedState>,
    params: Result<Query<PlantsParams>, QueryRejection>,
) -> Result<Response, ApiError> {
    state.metrics.record_request("plants");
    let Query(params) = params?;

    let plants = state
        .analyzer
        .list_plants(params.user_id)
        .await
        .map_err(AnalyzeError::from)?;
    Ok(Json(plants).into_response())
}
