mod analyze;
mod health;
mod index;
mod metrics;
mod plants;

use crate::server::SharedState;
use axum::{
    routing::{get, post},
    Router,
};

pub use analyze::ApiError;

pub fn api_routes() -> Router<SharedState> {
    Router::new()
        .route("/", get(index::index))
        .route("/analyze", post(analyze::analyze_image))
        .route("/analyze/bucket", post(analyze::analyze_bucket))
        .route("/images", get(index::list_images))
        .route("/plants", get(plants::list_plants))
        .route("/health", get(health::healthcheck))
        .route("/metrics", get(metrics::metrics_handler))
}
