//! Embedded vector backend
//!
//! In-process persistent collection, one binary file under the data
//! directory. Distances are Euclidean, mapped to a similarity via
//! `1 / (1 + d/100)` so downstream thresholds stay in [0, 1].

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::{l2_distance, SemanticMatch, VectorBackend};
use crate::embedding::TestProfile;
use crate::error::{ImpactError, Result};
use crate::paths::ensure_directory;

const COLLECTION_FILE: &str = "test_embeddings.bin";

/// One stored record, keyed by test id
#[derive(Debug, Clone, Serialize, Deserialize)]
struct EmbeddedRecord {
    test_id: String,
    method_name: String,
    class_name: Option<String>,
    test_file_path: String,
    test_type: String,
    vector: Vec<f32>,
}

/// Persistent embedded collection
pub struct EmbeddedBackend {
    path: PathBuf,
    records: BTreeMap<String, EmbeddedRecord>,
}

impl EmbeddedBackend {
    /// Open (or create) the collection under `data_dir`
    pub fn open(data_dir: &Path) -> Result<Self> {
        ensure_directory(data_dir).map_err(|e| ImpactError::VectorBackendUnavailable {
            message: format!("cannot create {}: {}", data_dir.display(), e),
        })?;

        let path = data_dir.join(COLLECTION_FILE);
        let records = if path.exists() {
            let bytes = fs::read(&path)?;
            let list: Vec<EmbeddedRecord> =
                bincode::deserialize(&bytes).map_err(|e| ImpactError::VectorBackendUnavailable {
                    message: format!("corrupt collection {}: {}", path.display(), e),
                })?;
            list.into_iter().map(|r| (r.test_id.clone(), r)).collect()
        } else {
            BTreeMap::new()
        };

        Ok(Self { path, records })
    }

    fn persist(&self) -> Result<()> {
        let list: Vec<&EmbeddedRecord> = self.records.values().collect();
        let bytes =
            bincode::serialize(&list).map_err(|e| ImpactError::VectorBackendUnavailable {
                message: format!("serialization failed: {e}"),
            })?;
        fs::write(&self.path, bytes)?;
        Ok(())
    }
}

impl VectorBackend for EmbeddedBackend {
    fn name(&self) -> &'static str {
        "chromadb"
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

        let mut stored = 0;
        for (test, vector) in tests.iter().zip(vectors.iter()) {
            self.records.insert(
                test.test_id.clone(),
                EmbeddedRecord {
                    test_id: test.test_id.clone(),
                    method_name: test.method_name.clone(),
                    class_name: test.class_name.clone(),
                    test_file_path: test.file_path.clone(),
                    test_type: test.test_type.clone(),
                    vector: vector.clone(),
                },
            );
            stored += 1;
        }

        self.persist()?;
        Ok((stored, 0))
    }

    fn search_similar(
        &self,
        query: &[f32],
        threshold: f32,
        max_results: usize,
    ) -> Result<Vec<SemanticMatch>> {
        let mut matches: Vec<SemanticMatch> = self
            .records
            .values()
            .filter(|r| r.vector.len() == query.len())
            .map(|r| {
                let distance = l2_distance(query, &r.vector);
                let similarity = 1.0 / (1.0 + distance / 100.0);
                SemanticMatch::from_parts(
                    r.test_id.clone(),
                    r.method_name.clone(),
                    r.class_name.clone(),
                    r.test_file_path.clone(),
                    r.test_type.clone(),
                    similarity,
                )
            })
            .filter(|m| m.similarity >= threshold)
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
        self.path.parent().map(|p| p.exists()).unwrap_or(false)
    }

    fn clear(&mut self) -> Result<usize> {
        let removed = self.records.len();
        self.records.clear();
        if self.path.exists() {
            fs::remove_file(&self.path)?;
        }
        Ok(removed)
    }

    fn count(&self) -> Result<usize> {
        Ok(self.records.len())
    }
}
