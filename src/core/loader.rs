//! Catalog sources.
//!
//! A loader hands the search path a [`CatalogSnapshot`]. Loaders never fail:
//! a degraded source produces a partial or empty snapshot and a warning, and
//! the ranking engine treats that as ordinary input.

use std::path::Path;
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::Value;

use crate::{
    error::{AppError, Result, ResultExt},
    models::catalog::{products_from_value, CatalogEntry, CatalogSnapshot},
};

/// Supplies catalog snapshots.
pub trait CatalogLoader: Send + Sync + std::fmt::Debug {
    /// Load at most `max_items` entries, optionally restricted to a category.
    fn load<'a>(&'a self, category: Option<&'a str>, max_items: usize) -> BoxFuture<'a, CatalogSnapshot>;
}

/// Loads products from the storefront backend over HTTP.
///
/// Calls `GET {base_url}/products?limit=N[&category=C]` and reads the
/// `products` array from the response. One [`reqwest::Client`] is reused for
/// every call so connections are pooled.
#[derive(Debug, Clone)]
pub struct HttpCatalogLoader {
    client: reqwest::Client,
    base_url: String,
}

impl HttpCatalogLoader {
    /// Create a loader for `base_url` with the given request timeout.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("building catalog HTTP client")?;
        Ok(Self::with_client(client, base_url))
    }

    /// Create a loader around an existing client.
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Base URL of the backend API.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn fetch_products(&self, category: Option<&str>, max_items: usize) -> Result<Vec<Value>> {
        let url = format!("{}/products", self.base_url);
        let mut params = vec![("limit", max_items.to_string())];
        if let Some(category) = category {
            params.push(("category", category.to_string()));
        }

        let response = self
            .client
            .get(&url)
            .query(&params)
            .send()
            .await?
            .error_for_status()?;
        let body: Value = response.json().await?;
        Ok(products_from_value(body))
    }

    /// Fetch a single product by id. Returns `None` when it does not exist or
    /// the backend cannot be reached.
    pub async fn fetch_entry(&self, id: &str) -> Option<CatalogEntry> {
        let url = format!("{}/products/{}", self.base_url, id);
        let response = match self.client.get(&url).send().await {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                log::debug!("Product {} lookup returned status {}", id, response.status());
                return None;
            }
            Err(e) => {
                log::warn!("Failed to fetch product {}: {}", id, e);
                return None;
            }
        };

        let mut body: Value = match response.json().await {
            Ok(body) => body,
            Err(e) => {
                log::warn!("Invalid product {} response: {}", id, e);
                return None;
            }
        };
        let product = if body.get("product").is_some() {
            body["product"].take()
        } else {
            body
        };
        serde_json::from_value(product)
            .map_err(|e| log::warn!("Malformed product {}: {}", id, e))
            .ok()
    }
}

impl CatalogLoader for HttpCatalogLoader {
    fn load<'a>(&'a self, category: Option<&'a str>, max_items: usize) -> BoxFuture<'a, CatalogSnapshot> {
        Box::pin(async move {
            match self.fetch_products(category, max_items).await {
                Ok(products) => {
                    let snapshot = CatalogSnapshot::from_values(products);
                    log::debug!("Loaded {} catalog entries from {}", snapshot.len(), self.base_url);
                    // The backend is asked for at most max_items but is not trusted to honour it.
                    snapshot.filtered(None, max_items)
                }
                Err(e) => {
                    log::warn!("Catalog backend unavailable, using empty snapshot: {}", e);
                    CatalogSnapshot::empty()
                }
            }
        })
    }
}

/// Serves a fixed snapshot, for offline use and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalogLoader {
    snapshot: CatalogSnapshot,
}

impl StaticCatalogLoader {
    /// Serve `snapshot` on every call.
    pub fn new(snapshot: CatalogSnapshot) -> Self {
        Self { snapshot }
    }

    /// Read a snapshot from a JSON file holding a product array or a
    /// `{"products": [...]}` document.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            log::error!("Failed to read catalog file {}: {}", path.display(), e);
            AppError::Io(e)
        })?;
        let snapshot = CatalogSnapshot::from_json(&json).map_err(|e| {
            log::error!("Failed to parse catalog file {}: {}", path.display(), e);
            AppError::Json(e)
        })?;
        log::info!("Loaded {} catalog entries from {}", snapshot.len(), path.display());
        Ok(Self::new(snapshot))
    }

    /// The full snapshot this loader serves from.
    pub fn snapshot(&self) -> &CatalogSnapshot {
        &self.snapshot
    }
}

impl CatalogLoader for StaticCatalogLoader {
    fn load<'a>(&'a self, category: Option<&'a str>, max_items: usize) -> BoxFuture<'a, CatalogSnapshot> {
        Box::pin(async move { self.snapshot.clone().filtered(category, max_items) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::catalog::Category;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn test_static_loader_filters() {
        let shoes = Category {
            id: "c-shoes".into(),
            name: "Shoes".into(),
            slug: "shoes".into(),
        };
        let loader = StaticCatalogLoader::new(
            vec![
                CatalogEntry::new("a", "A").with_category(shoes.clone()),
                CatalogEntry::new("b", "B"),
                CatalogEntry::new("c", "C").with_category(shoes),
            ]
            .into(),
        );

        assert_eq!(loader.load(None, 100).await.len(), 3);
        assert_eq!(loader.load(None, 2).await.len(), 2);
        assert_eq!(loader.load(Some("c-shoes"), 100).await.len(), 2);
        assert!(loader.load(Some("hats"), 100).await.is_empty());
    }

    #[tokio::test]
    async fn test_static_loader_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"products": [{{"id": "a", "name": "A", "feature_vector": [1.0, 0.0]}}]}}"#
        )
        .unwrap();

        let loader = StaticCatalogLoader::from_file(file.path()).unwrap();
        let snapshot = loader.load(None, 10).await;
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.entries()[0].embedding.is_some());
    }

    #[test]
    fn test_static_loader_missing_file() {
        let err = StaticCatalogLoader::from_file("/nonexistent/catalog.json").unwrap_err();
        assert!(matches!(err, AppError::Io(_)));
        assert_eq!(err.kind(), "io");
    }

    #[test]
    fn test_static_loader_malformed_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{{\"products\": [").unwrap();

        let err = StaticCatalogLoader::from_file(file.path()).unwrap_err();
        assert!(matches!(err, AppError::Json(_)));
    }

    #[tokio::test]
    async fn test_http_loader_degrades_to_empty() {
        // Nothing listens on port 9 of localhost in the test environment.
        let loader =
            HttpCatalogLoader::new("http://127.0.0.1:9/api/", Duration::from_millis(500)).unwrap();
        assert_eq!(loader.base_url(), "http://127.0.0.1:9/api");
        assert!(loader.load(None, 10).await.is_empty());
        assert!(loader.fetch_entry("p1").await.is_none());
    }
}
