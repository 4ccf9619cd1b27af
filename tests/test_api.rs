#![cfg(feature = "web")]

use std::io::Cursor;
use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use image::{DynamicImage, ImageFormat, RgbImage};
use imagematch::{
    create_router, AppState, CatalogEntry, CatalogSnapshot, Category, Config, Embedding,
    EmbeddingGenerator, NormalizedImage, Result, StaticCatalogLoader,
};
use serde_json::Value;
use tower::ServiceExt;

const BOUNDARY: &str = "imagematch-test-boundary";

/// Embeds an image as its mean RGB colour.
#[derive(Debug)]
struct MeanColourGenerator;

impl EmbeddingGenerator for MeanColourGenerator {
    fn model_name(&self) -> &str {
        "mean-colour"
    }

    fn dimension(&self) -> usize {
        3
    }

    fn generate(&self, image: &NormalizedImage) -> Result<Embedding> {
        let mut sums = [0f32; 3];
        for pixel in image.pixels().pixels() {
            for c in 0..3 {
                sums[c] += f32::from(pixel[c]);
            }
        }
        let n = (image.width() * image.height()) as f32;
        Ok(sums.iter().map(|s| s / n / 255.0).collect())
    }
}

fn solid_png(r: u8, g: u8, b: u8) -> Vec<u8> {
    let mut buf = RgbImage::new(64, 64);
    for pixel in buf.pixels_mut() {
        *pixel = image::Rgb([r, g, b]);
    }
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(buf)
        .write_to(&mut out, ImageFormat::Png)
        .unwrap();
    out.into_inner()
}

fn catalog() -> CatalogSnapshot {
    let tops = Category {
        id: "c-tops".into(),
        name: "Tops".into(),
        slug: "tops".into(),
    };
    CatalogSnapshot::new(vec![
        CatalogEntry::new("blue", "Blue kurta").with_embedding(vec![0.0, 0.0, 1.0]),
        CatalogEntry::new("red", "Red kurta")
            .with_embedding(vec![1.0, 0.05, 0.05])
            .with_category(tops.clone()),
        CatalogEntry::new("orange", "Orange kurta")
            .with_embedding(vec![1.0, 0.5, 0.0])
            .with_category(tops),
        CatalogEntry::new("bare", "No picture yet"),
        CatalogEntry::new("broken", "Broken vector").with_embedding(vec![1.0, 0.0]),
    ])
}

fn app(snapshot: CatalogSnapshot) -> Router {
    let state = AppState::with_parts(
        Config::default(),
        Arc::new(MeanColourGenerator),
        Arc::new(StaticCatalogLoader::new(snapshot)),
    );
    create_router(state)
}

fn multipart_body(field: &str, filename: &str, content_type: &str, data: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
            field, filename
        )
        .as_bytes(),
    );
    body.extend_from_slice(format!("Content-Type: {}\r\n\r\n", content_type).as_bytes());
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
    body
}

fn upload(uri: &str, body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            "content-type",
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap()
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

fn result_ids(json: &Value) -> Vec<String> {
    json["data"]["results"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["id"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn visual_search_ranks_catalog() {
    let body = multipart_body("file", "query.png", "image/png", &solid_png(240, 10, 10));
    let (status, json) = send(app(catalog()), upload("/visual-search", body)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    assert_eq!(json["data"]["message"], "Visual search completed");
    assert_eq!(json["data"]["query_image"], "query.png");
    assert_eq!(json["data"]["total_products_compared"], 5);
    assert_eq!(result_ids(&json), vec!["red", "orange"]);

    let best = &json["data"]["results"][0];
    assert_eq!(best["name"], "Red kurta");
    assert_eq!(best["category"]["slug"], "tops");
    assert_eq!(best["match_percentage"], 100);
    assert!(best.get("feature_vector").is_none());

    let diagnostics = &json["data"]["diagnostics"];
    assert_eq!(diagnostics["missing_embedding"], 1);
    assert_eq!(diagnostics["dimension_mismatch"], 1);
    assert_eq!(diagnostics["below_threshold"], 1);
}

#[tokio::test]
async fn visual_search_respects_limit_and_threshold() {
    let body = multipart_body("file", "query.png", "image/png", &solid_png(240, 10, 10));
    let (status, json) = send(
        app(catalog()),
        upload("/visual-search?limit=1&threshold=-1", body),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(result_ids(&json), vec!["red"]);
    assert_eq!(json["data"]["diagnostics"]["passed_threshold"], 3);
}

#[tokio::test]
async fn visual_search_filters_by_category() {
    let body = multipart_body("file", "query.png", "image/png", &solid_png(10, 10, 240));
    let (status, json) = send(
        app(catalog()),
        upload("/visual-search?category=tops&threshold=-1", body),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["total_products_compared"], 2);
    let ids = result_ids(&json);
    assert!(!ids.contains(&"blue".to_string()));
}

#[tokio::test]
async fn visual_search_with_empty_catalog_succeeds() {
    let body = multipart_body("file", "query.png", "image/png", &solid_png(240, 10, 10));
    let (status, json) = send(app(CatalogSnapshot::empty()), upload("/visual-search", body)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["message"], "No products available for comparison");
    assert_eq!(json["data"]["results"], Value::Array(vec![]));
}

#[tokio::test]
async fn visual_search_rejects_zero_limit() {
    let body = multipart_body("file", "query.png", "image/png", &solid_png(240, 10, 10));
    let (status, json) = send(app(catalog()), upload("/visual-search?limit=0", body)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["details"], "invalid_query");
}

#[tokio::test]
async fn visual_search_rejects_non_image() {
    let body = multipart_body("file", "notes.txt", "text/plain", b"hello");
    let (status, json) = send(app(catalog()), upload("/visual-search", body)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["message"], "Invalid input: File must be an image");
}

#[tokio::test]
async fn visual_search_rejects_undecodable_image() {
    let body = multipart_body("file", "fake.png", "image/png", b"not really a png");
    let (status, json) = send(app(catalog()), upload("/visual-search", body)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["details"], "invalid_image");
}

#[tokio::test]
async fn visual_search_requires_file_field() {
    let body = multipart_body("picture", "query.png", "image/png", &solid_png(1, 2, 3));
    let (status, json) = send(app(catalog()), upload("/visual-search", body)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["details"], "upload");
}

#[tokio::test]
async fn extract_features_previews_vector() {
    let body = multipart_body("file", "query.png", "image/png", &solid_png(255, 0, 0));
    let (status, json) = send(app(catalog()), upload("/extract-features", body)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    assert!(json.get("error").is_none());
    assert_eq!(json["data"]["feature_vector_size"], 3);
    assert_eq!(json["data"]["model_name"], "mean-colour");
    assert_eq!(json["data"]["features"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn health_reports_generator() {
    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let (status, json) = send(app(catalog()), request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["model_loaded"], true);
    assert_eq!(json["model_name"], "mean-colour");
    assert_eq!(json["dimension"], 3);
}

#[tokio::test]
async fn root_lists_endpoints() {
    let request = Request::builder().uri("/").body(Body::empty()).unwrap();
    let (status, json) = send(app(catalog()), request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["service"], "imagematch");
    assert_eq!(json["endpoints"]["visual_search"], "/visual-search");
}
