//! Common test utilities and fixtures for tia-engine integration tests
//!
//! Provides a `TestRepo` builder for laying out miniature Python test
//! trees on disk and a helper that runs the full indexing pipeline over
//! one into an in-memory fact store.

#![allow(dead_code)]

pub mod test_repo;

pub use test_repo::TestRepo;

use tia_engine::pipeline::{run_all, PipelineContext};
use tia_engine::store::FactStore;

/// Run pipeline stages 1-8 over a repo, returning the loaded store and
/// the pipeline context (for artifact access).
pub fn index_repo(repo: &TestRepo) -> (FactStore, PipelineContext) {
    let ctx = PipelineContext::new(repo.root().to_path_buf(), repo.artifacts_dir());
    let mut store = FactStore::open_in_memory().expect("in-memory store");
    store.ensure_schema().expect("schema");
    run_all(&ctx, &mut store).expect("pipeline run");
    (store, ctx)
}
