use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use uuid::Uuid;

use crate::core::ranking::{RankReport, RankedResult};

/// Success envelope. Failures are rendered by `AppError` instead.
#[derive(Serialize)]
pub(crate) struct ApiResponse<T: Serialize> {
    pub(crate) success: bool,
    pub(crate) data: T,
}

impl<T: Serialize> ApiResponse<T> {
    pub(crate) fn success(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

/// Body of a completed visual search. An empty `results` list is a normal,
/// successful outcome.
#[derive(Serialize)]
pub(crate) struct VisualSearchResponse<'a> {
    pub(crate) message: &'static str,
    pub(crate) search_id: Uuid,
    pub(crate) query_image: String,
    pub(crate) total_products_compared: usize,
    pub(crate) results: Vec<RankedResult<'a>>,
    pub(crate) diagnostics: RankReport,
}

#[derive(Serialize)]
pub(crate) struct ExtractFeaturesResponse {
    pub(crate) filename: String,
    pub(crate) model_name: String,
    pub(crate) feature_vector_size: usize,
    pub(crate) features: Vec<f32>,
    pub(crate) message: &'static str,
}

#[derive(Serialize)]
pub(crate) struct HealthResponse {
    pub(crate) status: &'static str,
    pub(crate) model_loaded: bool,
    pub(crate) model_name: String,
    pub(crate) dimension: usize,
    pub(crate) version: &'static str,
}
