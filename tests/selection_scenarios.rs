//! Diff-to-selection scenarios: one test per end-to-end behavior the
//! engine guarantees

mod common;

use common::{index_repo, TestRepo};
use tia_engine::diff::{build_search_queries, parse_diff};
use tia_engine::embedding::{
    load_test_profiles, EmbeddingGenerator, EmbeddingProvider, SemanticSearch, TestProfile,
};
use tia_engine::error::Result;
use tia_engine::matcher::{MatchEngine, MatchReason, MatchedTest};
use tia_engine::score::{build_run_plans, rank_tests, HIGH_CONFIDENCE_THRESHOLD};
use tia_engine::vector::EmbeddedBackend;
use tia_engine::Settings;

fn select(
    store: &tia_engine::FactStore,
    diff: &str,
    semantic: Option<&dyn tia_engine::SemanticSearcher>,
) -> tia_engine::MatchOutcome {
    let parsed = parse_diff(diff).unwrap();
    let queries = build_search_queries(&parsed.file_changes);
    let engine = MatchEngine::new(store);
    let mut outcome = engine
        .find_affected_tests(&queries, &parsed.file_changes, semantic)
        .unwrap();
    rank_tests(&mut outcome);
    outcome
}

fn has_reason(test: &MatchedTest, predicate: impl Fn(&MatchReason) -> bool) -> bool {
    test.reasons.iter().any(predicate)
}

const FUNCTION_CHANGE_DIFF: &str = "\
diff --git a/agent/langgraph_agent.py b/agent/langgraph_agent.py
--- a/agent/langgraph_agent.py
+++ b/agent/langgraph_agent.py
@@ -60,4 +60,4 @@ class LangGraphAgent:
-    def initialize(self):
+    def initialize(self, config=None):
         self.graph = build_graph()
";

#[test]
fn scenario_function_change_selects_calling_tests() {
    let repo = TestRepo::agent_fixture();
    let (store, _ctx) = index_repo(&repo);

    let outcome = select(&store, FUNCTION_CHANGE_DIFF, None);

    // exactly the three tests in the patching file carry a
    // function-level reason, each scoring at least 70
    let function_level: Vec<&MatchedTest> = outcome
        .tests
        .iter()
        .filter(|t| has_reason(t, |r| matches!(r, MatchReason::FunctionLevel { .. })))
        .collect();
    assert_eq!(function_level.len(), 3);
    for test in &function_level {
        assert!(test.row.test_file_path.ends_with("test_langgraph_agent.py"));
        assert!(test.confidence_score >= 70);
        // all three are unit tests, so the floor is 85
        assert!(test.confidence_score >= 85);
    }

    // function-level hits outrank everything else
    assert!(has_reason(&outcome.tests[0], |r| {
        matches!(r, MatchReason::FunctionLevel { .. })
    }));
}

#[test]
fn scenario_import_only_change_suppresses_module_patterns() {
    let repo = TestRepo::agent_fixture();
    let (store, _ctx) = index_repo(&repo);

    let diff = "\
diff --git a/agent/mcp_client.py b/agent/mcp_client.py
--- a/agent/mcp_client.py
+++ b/agent/mcp_client.py
@@ -1,4 +1,5 @@
 import os
+import json
 import sys
";
    let outcome = select(&store, diff, None);

    // the integration test imports agent.mcp_client directly, so the
    // exact-class strategy still finds it
    let workflow = outcome
        .tests
        .iter()
        .find(|t| t.row.test_file_path.ends_with("test_agent_workflow.py"))
        .expect("direct importer selected");
    assert!(has_reason(workflow, |r| matches!(
        r,
        MatchReason::Exact { reference_type, .. } if reference_type == "direct_import"
    )));

    // but no module-pattern or integration-scope fan-out fires
    for test in &outcome.tests {
        assert!(!has_reason(test, |r| matches!(r, MatchReason::Module { .. })));
        assert!(!has_reason(test, |r| {
            matches!(r, MatchReason::Integration { .. })
        }));
    }
}

#[test]
fn scenario_patch_string_ref_matches_edited_module() {
    let repo = TestRepo::agent_fixture();
    let (store, _ctx) = index_repo(&repo);

    let outcome = select(&store, FUNCTION_CHANGE_DIFF, None);

    let patched = outcome
        .tests
        .iter()
        .find(|t| t.row.test_file_path.ends_with("test_state_converter.py"))
        .expect("patch-decorated test selected");

    assert!(has_reason(patched, |r| matches!(
        r,
        MatchReason::Exact { reference_type, .. } if reference_type == "string_ref"
    )));
    // string_ref weight plus the unit-type bonus at minimum
    assert!(patched.confidence_score >= 55);
}

/// Deterministic stand-in for the embedding service: texts about tool
/// conversion land near the query vector, everything else far away.
struct KeywordProvider;

impl EmbeddingProvider for KeywordProvider {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|text| {
                let lower = text.to_lowercase();
                if lower.starts_with("changed functions:") {
                    vec![390.0, 0.0]
                } else if lower.contains("tool conversion") {
                    vec![400.0, 0.0]
                } else {
                    vec![0.0, 400.0]
                }
            })
            .collect())
    }

    fn model_name(&self) -> &str {
        "keyword-stub"
    }
}

fn embed_fixture(repo: &TestRepo, ctx: &tia_engine::PipelineContext) -> EmbeddedBackend {
    let mut settings = Settings::default();
    settings.test_repo = repo.root().to_path_buf();

    let profiles: Vec<TestProfile> =
        load_test_profiles(&ctx.artifacts_dir, &settings).unwrap();
    let vector_dir = repo.root().join(".vectors");
    let mut backend = EmbeddedBackend::open(&vector_dir).unwrap();
    let provider = KeywordProvider;
    EmbeddingGenerator::new(&provider)
        .generate(&profiles, &mut backend)
        .unwrap();
    backend
}

#[test]
fn scenario_semantic_pickup_stays_below_high_confidence() {
    let repo = TestRepo::agent_fixture();
    let (store, ctx) = index_repo(&repo);
    let backend = embed_fixture(&repo, &ctx);

    let diff = "\
diff --git a/agent/tool_converter.py b/agent/tool_converter.py
--- a/agent/tool_converter.py
+++ b/agent/tool_converter.py
@@ -80,4 +80,4 @@ class ToolConverter:
-    def convert(self, entry):
+    def convert(self, entry, strict=True):
         return schema_for(entry)
";
    let provider = KeywordProvider;
    let searcher = SemanticSearch::new(&provider, &backend);
    let outcome = select(&store, diff, Some(&searcher));

    // no name-based strategy knows this test; the semantic layer does
    let semantic = outcome
        .tests
        .iter()
        .find(|t| t.row.test_file_path.ends_with("test_conversion_behavior.py"))
        .expect("semantic pickup");
    assert_eq!(semantic.reasons.len(), 1);
    assert!(has_reason(semantic, |r| {
        matches!(r, MatchReason::Semantic { .. })
    }));
    assert!(semantic.confidence_score <= 60);
    assert!(semantic.confidence_score < HIGH_CONFIDENCE_THRESHOLD);

    // in run_all but never in run_high
    let plans = build_run_plans(&outcome, store.count_tests().unwrap());
    let node = tia_engine::node_id(&semantic.row);
    assert!(plans.run_all.contains(&node));
    assert!(!plans.run_high.contains(&node));
}

#[test]
fn scenario_semantic_unavailable_degrades_gracefully() {
    let repo = TestRepo::agent_fixture();
    let (store, _ctx) = index_repo(&repo);

    struct DownSearcher;
    impl tia_engine::SemanticSearcher for DownSearcher {
        fn search(&self, _q: &str) -> Result<Vec<tia_engine::SemanticHit>> {
            Err(tia_engine::ImpactError::VectorBackendUnavailable {
                message: "no collection".into(),
            })
        }
    }

    let outcome = select(&store, FUNCTION_CHANGE_DIFF, Some(&DownSearcher));
    // AST strategies still produce the full result
    assert!(outcome.total_tests >= 3);
}

#[test]
fn scenario_non_production_diff_selects_nothing() {
    let repo = TestRepo::agent_fixture();
    let (store, _ctx) = index_repo(&repo);

    let diff = "\
diff --git a/frontend/src/ChatPage.tsx b/frontend/src/ChatPage.tsx
--- a/frontend/src/ChatPage.tsx
+++ b/frontend/src/ChatPage.tsx
@@ -1,3 +1,4 @@
+import React from 'react';
diff --git a/frontend/styles/app.css b/frontend/styles/app.css
--- a/frontend/styles/app.css
+++ b/frontend/styles/app.css
@@ -1,2 +1,3 @@
+body { margin: 0; }
";
    let parsed = parse_diff(diff).unwrap();
    let queries = build_search_queries(&parsed.file_changes);

    // zero candidate symbols, zero selected tests
    assert!(queries.exact_matches.is_empty());
    assert!(queries.module_matches.is_empty());
    assert!(queries.test_file_candidates.is_empty());
    assert!(queries.changed_functions.is_empty());

    let outcome = select(&store, diff, None);
    assert_eq!(outcome.total_tests, 0);
}

#[test]
fn scenario_run_plans_are_nested() {
    let repo = TestRepo::agent_fixture();
    let (store, _ctx) = index_repo(&repo);

    let outcome = select(&store, FUNCTION_CHANGE_DIFF, None);
    let plans = build_run_plans(&outcome, store.count_tests().unwrap());

    for node in &plans.run_fast {
        assert!(plans.run_high.contains(node));
    }
    for node in &plans.run_high {
        assert!(plans.run_all.contains(node));
    }
    assert!(plans.stats.selected >= plans.stats.high_priority);
    assert!(plans.stats.high_priority >= plans.stats.fast_subset);
}

#[test]
fn scenario_dedup_keeps_lowest_id_per_identity() {
    let repo = TestRepo::agent_fixture();
    let (mut store, _ctx) = index_repo(&repo);
    let before = store.count_tests().unwrap();

    // the same file indexed again under a cloud-synced mirror path
    let victim = store
        .all_tests()
        .unwrap()
        .into_iter()
        .find(|t| t.test_type == "unit")
        .unwrap();
    let aliased = tia_engine::TestRow {
        test_id: "test_0099".into(),
        file_path: format!(
            "/mirror/OneDrive/checkout/test_repository/unit/{}",
            std::path::Path::new(&victim.file_path)
                .file_name()
                .unwrap()
                .to_string_lossy()
        ),
        ..victim.clone()
    };
    store.upsert_tests(std::slice::from_ref(&aliased)).unwrap();
    assert_eq!(store.count_tests().unwrap(), before + 1);

    let report = tia_engine::remove_duplicates(&mut store, false).unwrap();
    assert_eq!(report.removed, 1);
    assert_eq!(report.test_ids_removed, vec!["test_0099".to_string()]);
    assert_eq!(store.count_tests().unwrap(), before);

    // the surviving row is the original with the lower id
    assert!(store
        .all_tests()
        .unwrap()
        .iter()
        .any(|t| t.test_id == victim.test_id));
}
