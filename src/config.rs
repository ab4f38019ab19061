//! Environment-driven configuration
//!
//! All knobs have working defaults so `tia build-index` runs without any
//! setup. Environment variables override; CLI flags override both.

use std::env;
use std::path::PathBuf;

/// Default schema name for the fact store
pub const DEFAULT_SCHEMA: &str = "planon1";

/// Default similarity threshold for semantic search
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.3;

/// Maximum number of results returned by semantic search
pub const DEFAULT_MAX_RESULTS: usize = 20;

/// Semantic score cap, so semantic hits never outrank exact matches
pub const SEMANTIC_SCORE_CAP: i32 = 60;

/// Embedding vector dimension (nomic-embed-text produces 768)
pub const EMBEDDING_DIMENSIONS: usize = 768;

/// Batch size for embedding generation
pub const EMBEDDING_BATCH_SIZE: usize = 10;

/// Resolved runtime settings
#[derive(Debug, Clone)]
pub struct Settings {
    /// Root directory for all persisted state
    pub data_dir: PathBuf,
    /// Fact-store namespace; names the database file
    pub db_schema: String,
    /// Explicit database file override
    pub db_path: Option<PathBuf>,
    /// Vector backend selector: "chromadb" or "pgvector"
    pub vector_backend: String,
    /// Embedded vector collection directory
    pub chromadb_data_path: PathBuf,
    /// Embedding provider selector
    pub embedding_provider: String,
    /// Embedding provider endpoint
    pub ollama_base_url: String,
    /// Embedding model name
    pub ollama_embedding_model: String,
    /// Default test-tree root
    pub test_repo: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        let data_dir = PathBuf::from(".tia");
        Self {
            chromadb_data_path: data_dir.join("chromadb_data"),
            data_dir,
            db_schema: DEFAULT_SCHEMA.to_string(),
            db_path: None,
            vector_backend: "chromadb".to_string(),
            embedding_provider: "ollama".to_string(),
            ollama_base_url: "http://localhost:11434".to_string(),
            ollama_embedding_model: "nomic-embed-text".to_string(),
            test_repo: PathBuf::from("test_repository"),
        }
    }
}

impl Settings {
    /// Build settings from the environment, falling back to defaults
    pub fn from_env() -> Self {
        let mut settings = Self::default();

        if let Ok(dir) = env::var("TIA_DATA_DIR") {
            if !dir.is_empty() {
                settings.data_dir = PathBuf::from(&dir);
                settings.chromadb_data_path = settings.data_dir.join("chromadb_data");
            }
        }
        if let Ok(schema) = env::var("DB_SCHEMA") {
            if !schema.is_empty() {
                settings.db_schema = schema;
            }
        }
        if let Ok(path) = env::var("DB_PATH") {
            if !path.is_empty() {
                settings.db_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(backend) = env::var("VECTOR_BACKEND") {
            if !backend.is_empty() {
                settings.vector_backend = backend.to_lowercase();
            }
        }
        if let Ok(path) = env::var("CHROMADB_DATA_PATH") {
            if !path.is_empty() {
                settings.chromadb_data_path = PathBuf::from(path);
            }
        }
        if let Ok(provider) = env::var("EMBEDDING_PROVIDER") {
            if !provider.is_empty() {
                settings.embedding_provider = provider.to_lowercase();
            }
        }
        if let Ok(url) = env::var("OLLAMA_BASE_URL") {
            if !url.is_empty() {
                settings.ollama_base_url = url;
            }
        }
        if let Ok(model) = env::var("OLLAMA_EMBEDDING_MODEL") {
            if !model.is_empty() {
                settings.ollama_embedding_model = model;
            }
        }
        if let Ok(repo) = env::var("TIA_TEST_REPO") {
            if !repo.is_empty() {
                settings.test_repo = PathBuf::from(repo);
            }
        }

        settings
    }

    /// Resolved path of the fact-store database file
    pub fn database_path(&self) -> PathBuf {
        match &self.db_path {
            Some(p) => p.clone(),
            None => self.data_dir.join(format!("{}.sqlite3", self.db_schema)),
        }
    }

    /// Directory holding the per-stage JSON artifacts
    pub fn artifacts_dir(&self) -> PathBuf {
        self.data_dir.join("artifacts")
    }

    /// Directory for selection result reports
    pub fn results_dir(&self) -> PathBuf {
        self.data_dir.join("results")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let s = Settings::default();
        assert_eq!(s.db_schema, "planon1");
        assert_eq!(s.vector_backend, "chromadb");
        assert_eq!(s.database_path(), PathBuf::from(".tia/planon1.sqlite3"));
        assert_eq!(s.artifacts_dir(), PathBuf::from(".tia/artifacts"));
    }

    #[test]
    fn test_db_path_override_wins() {
        let mut s = Settings::default();
        s.db_path = Some(PathBuf::from("/tmp/custom.sqlite3"));
        assert_eq!(s.database_path(), PathBuf::from("/tmp/custom.sqlite3"));
    }

    #[test]
    fn test_schema_names_database_file() {
        let mut s = Settings::default();
        s.db_schema = "staging".to_string();
        assert!(s.database_path().ends_with("staging.sqlite3"));
    }
}
