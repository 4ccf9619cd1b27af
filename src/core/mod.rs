//! Core functionality: embeddings, scoring and ranking, plus the image and
//! catalog collaborators the search path depends on.

/// The embedding value type.
pub mod embedding;
/// Embedding generators (colour histogram, TorchScript).
pub mod generator;
/// Catalog loaders (HTTP backend, static file).
pub mod loader;
/// Image decoding, validation and normalization.
pub mod preprocess;
/// Filtering, scoring and ordering of catalog entries.
pub mod ranking;
/// Cosine similarity with explicit skip policies.
pub mod similarity;
