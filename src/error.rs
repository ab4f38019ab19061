//! Error types and exit codes for tia-engine

use std::process::ExitCode;
use thiserror::Error;

/// Main error type for tia-engine operations
#[derive(Error, Debug)]
pub enum ImpactError {
    #[error("File not found: {path}")]
    FileNotFound { path: String },

    #[error("Unsupported language for extension: {extension}")]
    UnsupportedLanguage { extension: String },

    #[error("Failed to parse file: {message}")]
    ParseFailure { message: String },

    #[error("Could not acquire file after {attempts} attempts: {path}")]
    AcquisitionFailure { path: String, attempts: u32 },

    #[error("Fact store unavailable: {message}")]
    StoreUnavailable { message: String },

    #[error("Schema '{schema}' missing — run `tia build-index` to create it")]
    SchemaMissing { schema: String },

    #[error("Vector backend unavailable: {message}")]
    VectorBackendUnavailable { message: String },

    #[error("Upstream artifact missing: {artifact} — run the earlier pipeline stage first")]
    ArtifactMissing { artifact: String },

    #[error("Malformed input: {message}")]
    InputMalformed { message: String },

    #[error("Embedding service error: {message}")]
    EmbeddingFailure { message: String },

    #[error("Store query failed: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ImpactError {
    /// Convert error to appropriate exit code:
    /// - 0: Success
    /// - 1: File not found / IO error
    /// - 2: Unsupported language / malformed input
    /// - 3: Parse or acquisition failure
    /// - 4: Store unavailable / schema missing / query failure
    /// - 5: Missing upstream artifact
    /// - 6: Vector backend / embedding service failure
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::FileNotFound { .. } => ExitCode::from(1),
            Self::Io(_) => ExitCode::from(1),
            Self::UnsupportedLanguage { .. } => ExitCode::from(2),
            Self::InputMalformed { .. } => ExitCode::from(2),
            Self::Json(_) => ExitCode::from(2),
            Self::ParseFailure { .. } => ExitCode::from(3),
            Self::AcquisitionFailure { .. } => ExitCode::from(3),
            Self::StoreUnavailable { .. } => ExitCode::from(4),
            Self::SchemaMissing { .. } => ExitCode::from(4),
            Self::Sql(_) => ExitCode::from(4),
            Self::ArtifactMissing { .. } => ExitCode::from(5),
            Self::VectorBackendUnavailable { .. } => ExitCode::from(6),
            Self::EmbeddingFailure { .. } => ExitCode::from(6),
        }
    }

    /// Whether this error is recoverable at per-file granularity.
    ///
    /// Per-file failures (parse, acquisition) are logged and skipped;
    /// anything touching the store or a required artifact aborts.
    pub fn is_per_file(&self) -> bool {
        matches!(
            self,
            Self::ParseFailure { .. } | Self::AcquisitionFailure { .. }
        )
    }
}

/// Result type alias for tia-engine operations
pub type Result<T> = std::result::Result<T, ImpactError>;
