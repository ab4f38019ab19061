//! Vector backends for semantic search
//!
//! Two concrete backends sit behind one contract: an in-process
//! persistent collection (L2 distance normalized to a similarity) and a
//! relational store keeping vectors next to the test metadata (cosine
//! distance used directly). The distance metric and its transformation
//! never leak past `search_similar`.

pub mod embedded;
pub mod relational;

use serde::{Deserialize, Serialize};

use crate::config::{Settings, SEMANTIC_SCORE_CAP};
use crate::embedding::TestProfile;
use crate::error::{ImpactError, Result};

pub use embedded::EmbeddedBackend;
pub use relational::RelationalBackend;

/// One semantic search result, sorted by similarity descending
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticMatch {
    pub test_id: String,
    pub method_name: String,
    pub class_name: Option<String>,
    pub test_file_path: String,
    pub test_type: String,
    /// Similarity in [0, 1]
    pub similarity: f32,
    pub match_type: String,
    /// Pre-capped confidence in [0, 60]
    pub confidence_score: i32,
}

impl SemanticMatch {
    pub fn from_parts(
        test_id: String,
        method_name: String,
        class_name: Option<String>,
        test_file_path: String,
        test_type: String,
        similarity: f32,
    ) -> Self {
        Self {
            test_id,
            method_name,
            class_name,
            test_file_path,
            test_type,
            similarity,
            match_type: "semantic".to_string(),
            confidence_score: (similarity * SEMANTIC_SCORE_CAP as f32) as i32,
        }
    }
}

/// Common contract both backends implement
pub trait VectorBackend {
    /// Backend name as selected by `VECTOR_BACKEND`
    fn name(&self) -> &'static str;

    /// Upsert one vector per test by `test_id`.
    /// Returns `(stored, failed)`.
    fn store(&mut self, tests: &[TestProfile], vectors: &[Vec<f32>]) -> Result<(usize, usize)>;

    /// Cosine-style top-k: results above `threshold`, at most
    /// `max_results`, sorted by similarity descending.
    fn search_similar(
        &self,
        query: &[f32],
        threshold: f32,
        max_results: usize,
    ) -> Result<Vec<SemanticMatch>>;

    /// Whether the backend is ready to serve queries
    fn is_available(&self) -> bool;

    /// Drop every stored vector. Returns how many were removed.
    fn clear(&mut self) -> Result<usize>;

    /// Number of stored vectors
    fn count(&self) -> Result<usize>;
}

/// Instantiate the backend selected by settings (or an explicit
/// override from the CLI).
pub fn create_backend(settings: &Settings, choice: Option<&str>) -> Result<Box<dyn VectorBackend>> {
    let name = choice.unwrap_or(settings.vector_backend.as_str());
    match name {
        "chromadb" => Ok(Box::new(EmbeddedBackend::open(
            &settings.chromadb_data_path,
        )?)),
        "pgvector" => Ok(Box::new(RelationalBackend::open(
            &settings.database_path(),
            &settings.db_schema,
        )?)),
        other => Err(ImpactError::VectorBackendUnavailable {
            message: format!("unknown vector backend: {other}"),
        }),
    }
}

// ============================================================================
// Distance helpers
// ============================================================================

/// Euclidean distance between two vectors
pub fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

/// Cosine similarity in [-1, 1]; zero vectors yield 0
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
