use axum::{
    extract::{Multipart, Query, State},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    core::{
        embedding::Embedding,
        preprocess::normalize_image,
        ranking::SearchQuery,
    },
    error::{AppError, Result},
    utils::{display_filename, is_image_upload, validate_file_extension},
    AppState,
};

use super::responses::{ApiResponse, ExtractFeaturesResponse, HealthResponse, VisualSearchResponse};

/// Number of feature values echoed back by `/extract-features`.
const FEATURE_PREVIEW_LEN: usize = 10;

/// Query string of `/visual-search`.
#[derive(Debug, Deserialize)]
pub struct SearchParams {
    /// Maximum number of results
    pub limit: Option<usize>,
    /// Category id or slug to restrict the search to
    pub category: Option<String>,
    /// Minimum similarity, overriding the configured default
    pub threshold: Option<f64>,
}

struct Upload {
    filename: String,
    data: Bytes,
}

/// Pull the `file` field out of a multipart form.
async fn read_image_upload(state: &AppState, multipart: &mut Multipart) -> Result<Upload> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("file") {
            continue;
        }

        let filename = display_filename(field.file_name().unwrap_or("upload"));
        if !is_image_upload(field.content_type(), &filename) {
            return Err(AppError::InvalidInput("File must be an image".to_string()));
        }
        if filename.contains('.')
            && !validate_file_extension(&filename, &state.config.allowed_extensions)
        {
            return Err(AppError::InvalidInput(format!(
                "Unsupported file extension: {}",
                filename
            )));
        }

        let data = field.bytes().await?;
        if data.len() > state.config.max_upload_size {
            return Err(AppError::PayloadTooLarge(format!(
                "{} bytes exceeds the {} byte limit",
                data.len(),
                state.config.max_upload_size
            )));
        }
        return Ok(Upload { filename, data });
    }

    Err(AppError::UploadError("No file provided".to_string()))
}

/// Normalize an upload and run it through the embedding generator.
///
/// Inference is CPU bound, so it runs on the blocking pool and at most
/// `inference_permits` calls run at once.
async fn embed_upload(state: &Arc<AppState>, data: Bytes) -> Result<Embedding> {
    let _permit = state
        .inference
        .clone()
        .acquire_owned()
        .await
        .map_err(|e| AppError::Internal(format!("inference pool closed: {}", e)))?;

    let state = Arc::clone(state);
    tokio::task::spawn_blocking(move || {
        let image = normalize_image(&data, &state.config.image)?;
        state.generator.generate(&image)
    })
    .await?
}

/// `POST /visual-search`: rank the catalog against an uploaded image.
#[tracing::instrument(skip_all)]
pub async fn visual_search(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SearchParams>,
    mut multipart: Multipart,
) -> Result<Response> {
    let search_id = Uuid::new_v4();
    let upload = read_image_upload(&state, &mut multipart).await?;
    log::info!("[{}] Processing image: {}", search_id, upload.filename);

    let category = params.category.filter(|c| !c.trim().is_empty());
    let max_items = state.config.catalog.max_items;
    let (embedding, snapshot) = tokio::join!(
        embed_upload(&state, upload.data),
        state.loader.load(category.as_deref(), max_items),
    );
    let embedding = embedding?;
    log::debug!("[{}] Extracted features: {} dimensions", search_id, embedding.dim());

    let mut query = SearchQuery::new(embedding)
        .with_top_k(params.limit.unwrap_or(state.config.search.default_top_k))
        .with_threshold(
            params
                .threshold
                .unwrap_or(state.config.search.similarity_threshold),
        );
    if let Some(category) = category {
        query = query.with_category(category);
    }

    let ranking = state.engine.rank(&query, &snapshot)?;

    let message = if snapshot.is_empty() {
        log::warn!("[{}] No products available for comparison", search_id);
        "No products available for comparison"
    } else {
        "Visual search completed"
    };
    if ranking.report.anomalies() > 0 {
        log::warn!(
            "[{}] Skipped {} malformed catalog entries",
            search_id,
            ranking.report.anomalies()
        );
    }
    match ranking.results.first() {
        Some(best) => log::info!(
            "[{}] Found {} similar products, best match: {} ({}%)",
            search_id,
            ranking.results.len(),
            best.entry.name,
            best.match_percentage
        ),
        None => log::info!("[{}] Found no similar products", search_id),
    }

    let response = VisualSearchResponse {
        message,
        search_id,
        query_image: upload.filename,
        total_products_compared: snapshot.len(),
        results: ranking.results,
        diagnostics: ranking.report,
    };
    Ok(ApiResponse::success(response).into_response())
}

/// `POST /extract-features`: embed an uploaded image and preview the vector.
#[tracing::instrument(skip_all)]
pub async fn extract_features(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse> {
    let upload = read_image_upload(&state, &mut multipart).await?;
    let embedding = embed_upload(&state, upload.data).await?;
    log::info!(
        "Extracted {} features from {}",
        embedding.dim(),
        upload.filename
    );

    Ok(ApiResponse::success(ExtractFeaturesResponse {
        filename: upload.filename,
        model_name: state.generator.model_name().to_string(),
        feature_vector_size: embedding.dim(),
        features: embedding.iter().take(FEATURE_PREVIEW_LEN).collect(),
        message: "Features extracted successfully",
    }))
}

/// `GET /health`
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let model_loaded = state.generator.is_ready();
    Json(HealthResponse {
        status: if model_loaded { "healthy" } else { "degraded" },
        model_loaded,
        model_name: state.generator.model_name().to_string(),
        dimension: state.generator.dimension(),
        version: crate::built_info::PKG_VERSION,
    })
}

/// `GET /`
pub async fn root() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": crate::built_info::PKG_NAME,
        "version": crate::built_info::PKG_VERSION,
        "built_at": crate::built_info::BUILT_TIME_UTC,
        "endpoints": {
            "health": "/health",
            "visual_search": "/visual-search",
            "extract_features": "/extract-features",
        }
    }))
}
