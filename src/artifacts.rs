//! Per-stage JSON artifacts
//!
//! Every pipeline stage writes a single JSON object `{generated_at, data}`
//! so a crashed run can always be re-derived from the upstream artifact.
//! Loading a missing artifact is a hard error carrying the stage file name.

use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{ImpactError, Result};
use crate::paths::ensure_directory;

/// Artifact file names, one per pipeline stage
pub const STAGE_SCAN: &str = "01_test_files.json";
pub const STAGE_FRAMEWORK: &str = "02_framework_detection.json";
pub const STAGE_REGISTRY: &str = "03_test_registry.json";
pub const STAGE_DEPENDENCIES: &str = "04_static_dependencies.json";
pub const STAGE_FUNCTION_CALLS: &str = "05_function_calls.json";
pub const STAGE_REVERSE_INDEX: &str = "06_reverse_index.json";
pub const STAGE_METADATA: &str = "07_test_metadata.json";
pub const STAGE_STRUCTURE: &str = "08_test_structure.json";

/// Envelope written to disk for every stage
#[derive(Debug, Serialize, Deserialize)]
pub struct Artifact<T> {
    pub generated_at: String,
    pub data: T,
}

impl<T: Serialize> Artifact<T> {
    pub fn new(data: T) -> Self {
        Self {
            generated_at: chrono::Utc::now().to_rfc3339(),
            data,
        }
    }
}

/// Write a stage artifact under the artifacts directory
pub fn write_artifact<T: Serialize>(dir: &Path, name: &str, data: &T) -> Result<PathBuf> {
    ensure_directory(dir)?;
    let envelope = Artifact {
        generated_at: chrono::Utc::now().to_rfc3339(),
        data,
    };
    let path = dir.join(name);
    let json = serde_json::to_string_pretty(&envelope)?;
    fs::write(&path, json)?;
    tracing::debug!("wrote artifact {}", path.display());
    Ok(path)
}

/// Read a stage artifact, erroring with `ArtifactMissing` when the
/// upstream stage has not run.
pub fn read_artifact<T: DeserializeOwned>(dir: &Path, name: &str) -> Result<T> {
    let path = dir.join(name);
    if !path.exists() {
        return Err(ImpactError::ArtifactMissing {
            artifact: name.to_string(),
        });
    }
    let content = fs::read_to_string(&path)?;
    let envelope: Artifact<T> = serde_json::from_str(&content)?;
    Ok(envelope.data)
}

/// Whether a stage artifact exists on disk
pub fn artifact_exists(dir: &Path, name: &str) -> bool {
    dir.join(name).exists()
}
