//! Relational vector backend
//!
//! Keeps one vector per test in the `embedding` column of
//! `test_metadata`, right next to the facts it describes. Similarity is
//! `1 − cosine distance`, used directly.

use std::path::Path;

use super::{cosine_similarity, SemanticMatch, VectorBackend};
use crate::embedding::TestProfile;
use crate::error::{ImpactError, Result};
use crate::store::FactStore;

/// Vector backend over the fact store's metadata table
pub struct RelationalBackend {
    store: FactStore,
}

impl RelationalBackend {
    /// Open against the fact-store database
    pub fn open(db_path: &Path, schema: &str) -> Result<Self> {
        let store = FactStore::open(db_path, schema).map_err(|e| {
            ImpactError::VectorBackendUnavailable {
                message: format!("fact store not reachable: {e}"),
            }
        })?;
        Ok(Self { store })
    }

    /// Wrap an already-open store (used by tests)
    pub fn from_store(store: FactStore) -> Self {
        Self { store }
    }
}

impl VectorBackend for RelationalBackend {
    fn name(&self) -> &'static str {
        "pgvector"
    }

    fn store(&mut self, tests: &[TestProfile], vectors: &[Vec<f32>]) -> Result<(usize, usize)> {
        if tests.len() != vectors.len() {
            return Err(ImpactError::InputMalformed {
                message: format!(
                    "mismatch: {} tests but {} vectors",
                    tests.len(),
                    vectors.len()
                ),
            });
        }
        self.store.require_schema()?;

        let mut stored = 0;
        let mut failed = 0;
        for (test, vector) in tests.iter().zip(vectors.iter()) {
            // a vector without its metadata row is useless for query
            if self.store.set_embedding(&test.test_id, vector)? {
                stored += 1;
            } else {
                tracing::warn!("no metadata row for {}; vector skipped", test.test_id);
                failed += 1;
            }
        }
        Ok((stored, failed))
    }

    fn search_similar(
        &self,
        query: &[f32],
        threshold: f32,
        max_results: usize,
    ) -> Result<Vec<SemanticMatch>> {
        self.store.require_schema()?;

        let mut matches: Vec<SemanticMatch> = self
            .store
            .tests_with_embeddings()?
            .into_iter()
            .filter(|(_, vector)| vector.len() == query.len())
            .map(|(row, vector)| {
                // cosine distance d in [0, 2]; similarity = 1 − d
                let similarity = cosine_similarity(query, &vector);
                SemanticMatch::from_parts(
                    row.test_id,
                    row.method_name,
                    row.class_name,
                    row.test_file_path,
                    row.test_type,
                    similarity,
                )
            })
            .filter(|m| m.similarity > threshold)
            .collect();

        matches.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.test_id.cmp(&b.test_id))
        });
        matches.truncate(max_results);
        Ok(matches)
    }

    fn is_available(&self) -> bool {
        self.store.schema_exists()
    }

    fn clear(&mut self) -> Result<usize> {
        self.store.require_schema()?;
        self.store.clear_embeddings()
    }

    fn count(&self) -> Result<usize> {
        Ok(self.store.count_embeddings()? as usize)
    }
}
