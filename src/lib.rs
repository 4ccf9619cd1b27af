#![doc(html_root_url = "https://docs.rs/imagematch/0.1.0")]
#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

//! # ImageMatch
//!
//! Visual product search: find the catalog items whose pictures look most
//! like a query image by comparing image embeddings.
//!
//! ## Features
//!
//! - **Ranking Engine**: exact cosine-similarity ranking with threshold,
//!   top-k, category filtering and deterministic tie-breaking
//! - **Embeddings**: an immutable embedding type and pluggable generators
//!   (colour histogram out of the box, TorchScript models with `torch`)
//! - **Image Processing**: decode, validate and normalize uploads to the
//!   model's input shape
//! - **Catalog Loading**: fetch products from the storefront backend or a
//!   static JSON file
//! - **Web API**: HTTP server with visual search and feature extraction
//!
//! ## Quick Start
//!
//! ```rust
//! use imagematch::{rank, CatalogEntry, CatalogSnapshot, Embedding, Result};
//!
//! fn main() -> Result<()> {
//!     let catalog = CatalogSnapshot::new(vec![
//!         CatalogEntry::new("a", "Red dress").with_embedding(vec![1.0, 0.0]),
//!         CatalogEntry::new("b", "Blue dress").with_embedding(vec![0.0, 1.0]),
//!     ]);
//!     let query = Embedding::new(vec![0.9, 0.1]);
//!
//!     let results = rank(&query, &catalog, 10, 0.5, None)?;
//!     assert_eq!(results[0].entry.id, "a");
//!     Ok(())
//! }
//! ```

// Internal modules
pub mod api;
pub mod core;
/// Defines the application's error types and result aliases.
pub mod error;
pub mod models;
mod state;
mod utils;

/// Build metadata generated at compile time.
#[allow(dead_code, missing_docs, unreachable_pub)]
pub(crate) mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

// Public API exports
pub use crate::{
    core::{
        embedding::Embedding,
        generator::{EmbeddingGenerator, HistogramGenerator},
        loader::{CatalogLoader, HttpCatalogLoader, StaticCatalogLoader},
        preprocess::{normalize_image, ImageConfig, NormalizedImage},
        ranking::{rank, RankReport, RankedResult, Ranking, RankingEngine, SearchQuery},
        similarity::{cosine_similarity, ScoringMode, SkipReason},
    },
    error::{AppError, Result, ResultExt},
    models::catalog::{CatalogEntry, CatalogSnapshot, Category},
    state::{
        build_generator, build_loader, AppState, CatalogConfig, Config, EmbeddingConfig,
        GeneratorKind, SearchConfig,
    },
};

#[cfg(feature = "torch")]
pub use crate::core::generator::TorchGenerator;

#[cfg(feature = "web")]
pub use crate::api::create_router;

/// Initialize logging with sensible defaults
///
/// Honours `RUST_LOG`; defaults to `info`. Safe to call more than once.
///
/// # Example
///
/// ```no_run
/// use imagematch::init;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     init()?;
///     // Application code here
///     Ok(())
/// }
/// ```
pub fn init() -> Result<()> {
    let env = env_logger::Env::default()
        .default_filter_or("info")
        .default_write_style_or("auto");

    let initialized = env_logger::Builder::from_env(env)
        .format_timestamp_millis()
        .format_module_path(false)
        .try_init()
        .is_ok();

    if initialized {
        log::info!(
            "Initializing {} {}",
            built_info::PKG_NAME,
            built_info::PKG_VERSION
        );
    }
    Ok(())
}

/// Decode an image, normalize it and compute its embedding
///
/// # Errors
///
/// Returns [`AppError::InvalidImage`] if the bytes are not an accepted image,
/// or whatever the generator reports if inference fails.
pub fn embed_image(
    generator: &dyn EmbeddingGenerator,
    data: &[u8],
    config: &ImageConfig,
) -> Result<Embedding> {
    let image = normalize_image(data, config)?;
    let embedding = generator.generate(&image)?;
    log::debug!(
        "Computed {}-dimensional embedding with {}",
        embedding.dim(),
        generator.model_name()
    );
    Ok(embedding)
}

/// Embed a query image and rank `catalog` against it in one call
///
/// # Errors
///
/// Fails if the image cannot be embedded or the query is invalid; an empty
/// or fully filtered catalog is not an error.
pub fn search_image<'a>(
    generator: &dyn EmbeddingGenerator,
    engine: &RankingEngine,
    data: &[u8],
    catalog: &'a CatalogSnapshot,
    top_k: usize,
    threshold: f64,
    category: Option<&str>,
) -> Result<Ranking<'a>> {
    let mut query = SearchQuery::new(embed_image(generator, data, &ImageConfig::default())?)
        .with_top_k(top_k)
        .with_threshold(threshold);
    if let Some(category) = category {
        query = query.with_category(category);
    }
    engine.rank(&query, catalog)
}
