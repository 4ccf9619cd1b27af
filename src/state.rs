use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;

use crate::{
    core::{
        generator::{EmbeddingGenerator, HistogramGenerator},
        loader::{CatalogLoader, HttpCatalogLoader, StaticCatalogLoader},
        preprocess::ImageConfig,
        ranking::{RankingEngine, DEFAULT_THRESHOLD, DEFAULT_TOP_K, MAX_TOP_K},
        similarity::ScoringMode,
    },
    error::{AppError, Result},
};

/// Configuration for the application
#[derive(Clone, Debug)]
pub struct Config {
    /// Address the HTTP server binds to
    pub bind_addr: String,
    /// Port the HTTP server listens on
    pub port: u16,
    /// Maximum upload size in bytes
    pub max_upload_size: usize,
    /// Allowed file extensions for uploads
    pub allowed_extensions: Vec<String>,
    /// Origins allowed by CORS; empty means any
    pub cors_origins: Vec<String>,
    /// Image normalization rules
    pub image: ImageConfig,
    /// Search defaults and limits
    pub search: SearchConfig,
    /// Catalog source
    pub catalog: CatalogConfig,
    /// Embedding generator
    pub embedding: EmbeddingConfig,
}

/// Search defaults and limits
#[derive(Clone, Debug)]
pub struct SearchConfig {
    /// Results returned when the request does not say
    pub default_top_k: usize,
    /// Upper bound on results per request
    pub max_top_k: usize,
    /// Minimum similarity for a result
    pub similarity_threshold: f64,
    /// Batch or per-candidate scoring
    pub scoring_mode: ScoringMode,
}

/// Where catalog snapshots come from
#[derive(Clone, Debug)]
pub struct CatalogConfig {
    /// Backend API base URL
    pub backend_api_url: String,
    /// Serve a fixed snapshot from this JSON file instead of the backend
    pub catalog_file: Option<PathBuf>,
    /// Products fetched per search
    pub max_items: usize,
    /// Timeout for backend requests
    pub timeout: Duration,
}

/// Which embedding generator to run
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GeneratorKind {
    /// Pixel statistics, no model files required
    Histogram,
    /// TorchScript model (requires the `torch` feature)
    Torch,
}

impl FromStr for GeneratorKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "histogram" => Ok(Self::Histogram),
            "torch" | "torchscript" => Ok(Self::Torch),
            other => Err(format!("unknown generator: {}", other)),
        }
    }
}

/// Embedding generator configuration
#[derive(Clone, Debug)]
pub struct EmbeddingConfig {
    /// Generator implementation
    pub generator: GeneratorKind,
    /// TorchScript model path
    pub model_path: Option<PathBuf>,
    /// Output dimension of the model
    pub dimension: usize,
    /// Concurrent inference calls allowed
    pub inference_permits: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: String::from("0.0.0.0"),
            port: 8000,
            max_upload_size: 10 * 1024 * 1024, // 10MB
            allowed_extensions: vec!["jpg", "jpeg", "png", "webp"]
                .into_iter()
                .map(String::from)
                .collect(),
            cors_origins: vec![
                String::from("http://localhost:5173"),
                String::from("http://localhost:3000"),
            ],
            image: ImageConfig::default(),
            search: SearchConfig::default(),
            catalog: CatalogConfig::default(),
            embedding: EmbeddingConfig::default(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_top_k: DEFAULT_TOP_K,
            max_top_k: MAX_TOP_K,
            similarity_threshold: DEFAULT_THRESHOLD,
            scoring_mode: ScoringMode::Batch,
        }
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            backend_api_url: String::from("http://localhost:3000/api"),
            catalog_file: None,
            max_items: 100,
            timeout: Duration::from_secs(10),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            generator: GeneratorKind::Histogram,
            model_path: None,
            dimension: 1280, // MobileNetV2 pooled features
            inference_permits: 1,
        }
    }
}

impl Config {
    /// Build the configuration from the environment, after loading `.env`.
    ///
    /// Unset variables keep their defaults; malformed ones are an error.
    pub fn from_env() -> Result<Self> {
        if let Ok(path) = dotenv::dotenv() {
            log::debug!("Loaded environment from {}", path.display());
        }
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = var("IMAGEMATCH_BIND_ADDR") {
            config.bind_addr = v;
        }
        if let Some(v) = var("IMAGEMATCH_PORT").or_else(|| var("PORT")) {
            config.port = parse("PORT", &v)?;
        }
        if let Some(v) = var("IMAGEMATCH_MAX_UPLOAD_BYTES") {
            config.max_upload_size = parse("IMAGEMATCH_MAX_UPLOAD_BYTES", &v)?;
        }
        if let Some(v) = var("IMAGEMATCH_CORS_ORIGINS") {
            config.cors_origins = split_list(&v);
        }

        if let Some(v) = var("IMAGEMATCH_TOP_K") {
            config.search.default_top_k = parse("IMAGEMATCH_TOP_K", &v)?;
        }
        if let Some(v) = var("IMAGEMATCH_MAX_TOP_K") {
            config.search.max_top_k = parse("IMAGEMATCH_MAX_TOP_K", &v)?;
        }
        if let Some(v) = var("IMAGEMATCH_SIMILARITY_THRESHOLD") {
            config.search.similarity_threshold = parse("IMAGEMATCH_SIMILARITY_THRESHOLD", &v)?;
        }
        if let Some(v) = var("IMAGEMATCH_SCORING_MODE") {
            config.search.scoring_mode = v.parse().map_err(AppError::Config)?;
        }

        if let Some(v) = var("IMAGEMATCH_BACKEND_API_URL").or_else(|| var("BACKEND_API_URL")) {
            config.catalog.backend_api_url = v;
        }
        if let Some(v) = var("IMAGEMATCH_CATALOG_FILE") {
            config.catalog.catalog_file = Some(PathBuf::from(v));
        }
        if let Some(v) = var("IMAGEMATCH_CATALOG_MAX_ITEMS") {
            config.catalog.max_items = parse("IMAGEMATCH_CATALOG_MAX_ITEMS", &v)?;
        }
        if let Some(v) = var("IMAGEMATCH_BACKEND_TIMEOUT_SECS") {
            config.catalog.timeout =
                Duration::from_secs(parse("IMAGEMATCH_BACKEND_TIMEOUT_SECS", &v)?);
        }

        if let Some(v) = var("IMAGEMATCH_GENERATOR") {
            config.embedding.generator = v.parse().map_err(AppError::Config)?;
        }
        if let Some(v) = var("IMAGEMATCH_MODEL_PATH") {
            config.embedding.model_path = Some(PathBuf::from(v));
        }
        if let Some(v) = var("IMAGEMATCH_EMBEDDING_DIM") {
            config.embedding.dimension = parse("IMAGEMATCH_EMBEDDING_DIM", &v)?;
        }
        if let Some(v) = var("IMAGEMATCH_INFERENCE_PERMITS") {
            config.embedding.inference_permits = parse("IMAGEMATCH_INFERENCE_PERMITS", &v)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        let search = &self.search;
        if search.max_top_k == 0 {
            return Err(AppError::Config("max_top_k must be positive".into()));
        }
        if search.default_top_k == 0 || search.default_top_k > search.max_top_k {
            return Err(AppError::Config(format!(
                "default top_k must be within 1..={}",
                search.max_top_k
            )));
        }
        if !(-1.0..=1.0).contains(&search.similarity_threshold) {
            return Err(AppError::Config(
                "similarity threshold must be within [-1, 1]".into(),
            ));
        }
        if self.catalog.max_items == 0 {
            return Err(AppError::Config("catalog max items must be positive".into()));
        }
        if self.embedding.inference_permits == 0 {
            return Err(AppError::Config("inference permits must be positive".into()));
        }
        if self.embedding.generator == GeneratorKind::Torch && self.embedding.model_path.is_none() {
            return Err(AppError::Config(
                "IMAGEMATCH_MODEL_PATH is required for the torch generator".into(),
            ));
        }
        Ok(())
    }
}

fn parse<T>(key: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| AppError::Config(format!("{}={:?}: {}", key, value, e)))
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Build the embedding generator described by `config`.
pub fn build_generator(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingGenerator>> {
    match config.generator {
        GeneratorKind::Histogram => Ok(Arc::new(HistogramGenerator::default())),
        #[cfg(feature = "torch")]
        GeneratorKind::Torch => {
            let path = config
                .model_path
                .as_ref()
                .ok_or_else(|| AppError::Config("model path not set".into()))?;
            Ok(Arc::new(crate::core::generator::TorchGenerator::load(
                path,
                config.dimension,
            )?))
        }
        #[cfg(not(feature = "torch"))]
        GeneratorKind::Torch => Err(AppError::Config(
            "torch generator not available - enable the 'torch' feature".into(),
        )),
    }
}

/// Build the catalog loader described by `config`.
pub fn build_loader(config: &CatalogConfig) -> Result<Arc<dyn CatalogLoader>> {
    match &config.catalog_file {
        Some(path) => Ok(Arc::new(StaticCatalogLoader::from_file(path)?)),
        None => Ok(Arc::new(HttpCatalogLoader::new(
            config.backend_api_url.clone(),
            config.timeout,
        )?)),
    }
}

/// Application state that can be shared across handlers
#[derive(Debug)]
pub struct AppState {
    /// Application configuration
    pub config: Config,
    /// Embedding generator handle
    pub generator: Arc<dyn EmbeddingGenerator>,
    /// Catalog source
    pub loader: Arc<dyn CatalogLoader>,
    /// Ranking engine
    pub engine: RankingEngine,
    /// Bounds concurrent access to the generator
    pub inference: Arc<Semaphore>,
}

impl AppState {
    /// Create the application state, building the generator and loader from `config`
    pub fn new(config: Config) -> Result<Arc<Self>> {
        let generator = build_generator(&config.embedding)?;
        let loader = build_loader(&config.catalog)?;
        Ok(Self::with_parts(config, generator, loader))
    }

    /// Create the application state from already constructed collaborators
    pub fn with_parts(
        config: Config,
        generator: Arc<dyn EmbeddingGenerator>,
        loader: Arc<dyn CatalogLoader>,
    ) -> Arc<Self> {
        let engine = RankingEngine::new(config.search.scoring_mode)
            .with_max_top_k(config.search.max_top_k);
        let inference = Arc::new(Semaphore::new(config.embedding.inference_permits));

        Arc::new(Self {
            config,
            generator,
            loader,
            engine,
            inference,
        })
    }
}
