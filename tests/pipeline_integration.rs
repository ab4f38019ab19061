//! End-to-end pipeline tests: stages 1-8 over an on-disk fixture tree

mod common;

use std::collections::BTreeSet;

use common::{index_repo, TestRepo};
use tia_engine::artifacts::{
    read_artifact, STAGE_DEPENDENCIES, STAGE_METADATA, STAGE_REGISTRY, STAGE_REVERSE_INDEX,
};
use tia_engine::pipeline::dependencies::DependencyData;
use tia_engine::pipeline::metadata::MetadataData;
use tia_engine::pipeline::registry::RegistryData;
use tia_engine::pipeline::reverse_index::{self, ReverseIndexData};
use tia_engine::pipeline::run_all;

#[test]
fn test_registry_covers_every_test_function() {
    let repo = TestRepo::agent_fixture();
    let (store, ctx) = index_repo(&repo);

    let registry: RegistryData = read_artifact(&ctx.artifacts_dir, STAGE_REGISTRY).unwrap();
    // 3 class methods + 2 free functions + 1 integration test
    assert_eq!(registry.total_tests, 6);
    assert_eq!(store.count_tests().unwrap(), 6);

    assert_eq!(registry.tests_by_type.get("unit"), Some(&5));
    assert_eq!(registry.tests_by_type.get("integration"), Some(&1));

    // ids are unique and sequential from test_0001
    let ids: BTreeSet<&str> = registry.tests.iter().map(|t| t.test_id.as_str()).collect();
    assert_eq!(ids.len(), 6);
    assert!(ids.contains("test_0001"));
    assert!(ids.contains("test_0006"));

    // file paths are written canonicalized-absolute
    for test in &registry.tests {
        assert!(std::path::Path::new(&test.file_path).is_absolute());
    }
}

#[test]
fn test_dependency_and_reverse_index_agree() {
    let repo = TestRepo::agent_fixture();
    let (_store, ctx) = index_repo(&repo);

    let deps: DependencyData = read_artifact(&ctx.artifacts_dir, STAGE_DEPENDENCIES).unwrap();
    let reverse: ReverseIndexData =
        read_artifact(&ctx.artifacts_dir, STAGE_REVERSE_INDEX).unwrap();

    // every (test, class, type) dependency edge has its inverse, and
    // nothing else exists in the reverse index
    let forward: BTreeSet<(String, String, String)> = deps
        .test_dependencies
        .iter()
        .flat_map(|t| {
            t.referenced_classes.iter().map(|c| {
                (
                    c.clone(),
                    t.test_id.clone(),
                    t.reference_types.get(c).cloned().unwrap_or_default(),
                )
            })
        })
        .collect();
    let backward: BTreeSet<(String, String, String)> = reverse
        .entries
        .iter()
        .map(|e| {
            (
                e.production_class.clone(),
                e.test_id.clone(),
                e.reference_type.clone(),
            )
        })
        .collect();
    assert_eq!(forward, backward);
}

#[test]
fn test_reverse_index_rebuild_is_identical() {
    let repo = TestRepo::agent_fixture();
    let (mut store, ctx) = index_repo(&repo);

    let first: ReverseIndexData =
        read_artifact(&ctx.artifacts_dir, STAGE_REVERSE_INDEX).unwrap();

    // drop and rebuild stage 6 from the stage 4 artifact
    let rebuilt = reverse_index::run(&ctx, &mut store).unwrap();

    let key = |d: &ReverseIndexData| {
        d.entries
            .iter()
            .map(|e| {
                (
                    e.production_class.clone(),
                    e.test_id.clone(),
                    e.reference_type.clone(),
                )
            })
            .collect::<Vec<_>>()
    };
    assert_eq!(key(&first), key(&rebuilt));
}

#[test]
fn test_string_refs_become_function_mappings() {
    let repo = TestRepo::agent_fixture();
    let (store, _ctx) = index_repo(&repo);

    // the patched path maps every test in the file to the function
    let rows = store
        .tests_for_function("agent.langgraph_agent", "initialize")
        .unwrap();
    assert_eq!(rows.len(), 3);
    for row in &rows {
        assert_eq!(row.source.as_deref(), Some("patch_ref"));
    }
}

#[test]
fn test_metadata_extraction() {
    let repo = TestRepo::agent_fixture();
    let (_store, ctx) = index_repo(&repo);

    let metadata: MetadataData = read_artifact(&ctx.artifacts_dir, STAGE_METADATA).unwrap();
    assert_eq!(metadata.total_tests, 6);
    assert_eq!(metadata.async_tests, 1);

    let described = metadata
        .rows
        .iter()
        .find(|r| r.description.contains("tool conversion"))
        .unwrap();
    assert_eq!(described.pattern, "test_prefix");

    let marked = metadata
        .rows
        .iter()
        .filter(|r| r.markers.contains(&"integration".to_string()))
        .count();
    assert_eq!(marked, 1);
}

#[test]
fn test_rerun_converges_without_new_ids() {
    let repo = TestRepo::agent_fixture();
    let (mut store, ctx) = index_repo(&repo);

    let before = store.max_test_id().unwrap();
    run_all(&ctx, &mut store).unwrap();

    assert_eq!(store.count_tests().unwrap(), 6);
    assert_eq!(store.max_test_id().unwrap(), before);
}

#[test]
fn test_new_file_gets_fresh_ids_only() {
    let repo = TestRepo::agent_fixture();
    let (mut store, ctx) = index_repo(&repo);

    repo.add_file(
        "unit/test_added_later.py",
        "def test_late():\n    pass\n",
    );
    run_all(&ctx, &mut store).unwrap();

    assert_eq!(store.count_tests().unwrap(), 7);
    // the old maximum plus exactly one
    assert_eq!(store.max_test_id().unwrap(), Some(7));
}
