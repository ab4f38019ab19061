//! Indexing pipeline, stages 1–8
//!
//! Each stage reads the file tree or a prior JSON artifact, writes its
//! own artifact, and loads its share of the fact store. Stages are
//! idempotent: re-running one upserts by `test_id` and converges to the
//! same store content. Per-file parsing fans out on a rayon pool; the
//! `test_id` counter is the only cross-file state and is taken under a
//! mutex at the commit boundary.

pub mod dependencies;
pub mod framework;
pub mod function_calls;
pub mod metadata;
pub mod registry;
pub mod reverse_index;
pub mod scan;
pub mod structure;

use std::path::PathBuf;

use crate::error::{ImpactError, Result};
use crate::store::FactStore;

/// Shared context handed to every stage
#[derive(Debug, Clone)]
pub struct PipelineContext {
    /// Root of the test tree being indexed
    pub test_repo: PathBuf,
    /// Directory receiving the per-stage JSON artifacts
    pub artifacts_dir: PathBuf,
}

impl PipelineContext {
    pub fn new(test_repo: PathBuf, artifacts_dir: PathBuf) -> Self {
        Self {
            test_repo,
            artifacts_dir,
        }
    }
}

/// Counts reported after a full pipeline run
#[derive(Debug, Clone, Default)]
pub struct PipelineSummary {
    pub files_scanned: usize,
    pub framework: String,
    pub tests_registered: usize,
    pub dependencies: usize,
    pub function_mappings: usize,
    pub reverse_entries: usize,
    pub metadata_rows: usize,
    pub directories: usize,
}

/// Run stages 1–8 in order
pub fn run_all(ctx: &PipelineContext, store: &mut FactStore) -> Result<PipelineSummary> {
    if !ctx.test_repo.exists() {
        return Err(ImpactError::FileNotFound {
            path: ctx.test_repo.display().to_string(),
        });
    }
    store.ensure_schema()?;

    let mut summary = PipelineSummary::default();

    tracing::info!("stage 1: scanning {}", ctx.test_repo.display());
    let scan_data = scan::run(ctx)?;
    summary.files_scanned = scan_data.total_files;

    tracing::info!("stage 2: detecting test framework");
    let framework_data = framework::run(ctx)?;
    summary.framework = framework_data.primary_framework;

    tracing::info!("stage 3: building test registry");
    let registry_data = registry::run(ctx, store)?;
    summary.tests_registered = registry_data.total_tests;

    tracing::info!("stage 4: extracting static dependencies");
    let dependency_data = dependencies::run(ctx, store)?;
    summary.dependencies = dependency_data.total_references;

    tracing::info!("stage 5: extracting function calls");
    let call_data = function_calls::run(ctx, store)?;
    summary.function_mappings = call_data.total_mappings;

    tracing::info!("stage 6: building reverse index");
    let reverse_data = reverse_index::run(ctx, store)?;
    summary.reverse_entries = reverse_data.total_mappings;

    tracing::info!("stage 7: extracting test metadata");
    let metadata_data = metadata::run(ctx, store)?;
    summary.metadata_rows = metadata_data.total_tests;

    tracing::info!("stage 8: mapping test structure");
    let structure_data = structure::run(ctx, store)?;
    summary.directories = structure_data.directories.len();

    Ok(summary)
}

/// Shared test-framework allowlist: imports whose top-level segment is
/// one of these are never production code.
pub const TEST_FRAMEWORK_IMPORTS: &[&str] = &[
    "pytest",
    "unittest",
    "mock",
    "pytest_mock",
    "pytest_asyncio",
    "pytest_cov",
    "test",
    "tests",
    "testing",
];

/// Common standard-library modules, also never production code
pub const STDLIB_MODULES: &[&str] = &[
    "os",
    "sys",
    "pathlib",
    "json",
    "datetime",
    "typing",
    "collections",
    "itertools",
    "functools",
    "asyncio",
    "abc",
    "dataclasses",
    "enum",
    "logging",
    "re",
];

/// A reference is production iff its top-level segment is neither a
/// test-framework nor a standard-library module.
pub fn is_production_import(name: &str) -> bool {
    let first = name.split('.').next().unwrap_or(name);
    !TEST_FRAMEWORK_IMPORTS.contains(&first) && !STDLIB_MODULES.contains(&first)
}
