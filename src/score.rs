//! Confidence scoring and ranking
//!
//! Collapses each test's match reasons into a score in [0, 100] and
//! derives the three runner plans. The weights are part of the tool's
//! contract; changing one changes which tests land in `run_high`.
//!
//! | signal                      | delta |
//! |-----------------------------|-------|
//! | function_level match        |  +50  |
//! | exact + direct_import       |  +45  |
//! | exact + string_ref          |  +40  |
//! | direct_file                 |  +35  |
//! | integration                 |  +25  |
//! | module pattern              |  +15  |
//! | any function-level present  |  +20  |
//! | test_type == unit           |  +15  |
//! | test_type == integration    |   +5  |
//!
//! Semantic-only hits score `floor(similarity × 60)` with no bonuses so
//! they can never outrank a name-based match.

use serde::{Deserialize, Serialize};

use crate::config::SEMANTIC_SCORE_CAP;
use crate::matcher::{MatchOutcome, MatchReason, MatchedTest};
use crate::store::MatchedTestRow;

/// Tests scoring at or above this land in `run_high`
pub const HIGH_CONFIDENCE_THRESHOLD: i32 = 60;

/// Compute the confidence score for one test's accumulated reasons
pub fn confidence_score(reasons: &[MatchReason], test_type: &str) -> i32 {
    if reasons.is_empty() {
        return 0;
    }

    // a semantic-only hit is capped by similarity alone
    let semantic_only = reasons
        .iter()
        .all(|r| matches!(r, MatchReason::Semantic { .. }));
    if semantic_only {
        let best = reasons
            .iter()
            .map(|r| match r {
                MatchReason::Semantic { similarity, .. } => {
                    (similarity * SEMANTIC_SCORE_CAP as f32) as i32
                }
                _ => 0,
            })
            .max()
            .unwrap_or(0);
        return best.clamp(0, SEMANTIC_SCORE_CAP);
    }

    let mut score = 0;
    let mut has_function_level = false;

    for reason in reasons {
        match reason {
            MatchReason::FunctionLevel { .. } => {
                score += 50;
                has_function_level = true;
            }
            MatchReason::Exact { reference_type, .. } => match reference_type.as_str() {
                "direct_import" => score += 45,
                "string_ref" => score += 40,
                _ => {}
            },
            MatchReason::DirectFile { .. } => score += 35,
            MatchReason::Integration { .. } => score += 25,
            MatchReason::Module { .. } => score += 15,
            MatchReason::Semantic { .. } => {}
        }
    }

    if has_function_level {
        score += 20;
    }

    match test_type {
        "unit" => score += 15,
        "integration" => score += 5,
        _ => {}
    }

    score.min(100)
}

/// Score every matched test and sort by score descending, then test id
pub fn rank_tests(outcome: &mut MatchOutcome) {
    for test in &mut outcome.tests {
        test.confidence_score = confidence_score(&test.reasons, &test.row.test_type);
    }
    outcome
        .tests
        .sort_by(|a, b| {
            b.confidence_score
                .cmp(&a.confidence_score)
                .then_with(|| a.row.test_id.cmp(&b.row.test_id))
        });
}

/// Plan statistics reported alongside the runner commands
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStats {
    pub total_in_repo: i64,
    pub selected: usize,
    pub high_priority: usize,
    pub fast_subset: usize,
    pub reduction_pct: f64,
}

/// The three pytest-style invocation plans
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunPlans {
    pub run_all: Vec<String>,
    pub run_high: Vec<String>,
    pub run_fast: Vec<String>,
    pub run_all_cmd: String,
    pub run_high_cmd: String,
    pub run_fast_cmd: String,
    pub stats: PlanStats,
}

/// pytest node identifier: `file::class::method`, class omitted for free
/// functions
pub fn node_id(row: &MatchedTestRow) -> String {
    match &row.class_name {
        Some(class) if !class.is_empty() => {
            format!("{}::{}::{}", row.test_file_path, class, row.method_name)
        }
        _ => format!("{}::{}", row.test_file_path, row.method_name),
    }
}

fn build_command(node_ids: &[String]) -> String {
    if node_ids.is_empty() {
        return "# No tests matched this filter".to_string();
    }
    format!("pytest {} -v", node_ids.join(" \\\n       "))
}

/// Derive run plans from an already-ranked outcome.
/// Invariant: `run_fast ⊆ run_high ⊆ run_all`.
pub fn build_run_plans(outcome: &MatchOutcome, total_in_repo: i64) -> RunPlans {
    let run_all: Vec<String> = outcome.tests.iter().map(|t| node_id(&t.row)).collect();

    let high_tests: Vec<&MatchedTest> = outcome
        .tests
        .iter()
        .filter(|t| t.confidence_score >= HIGH_CONFIDENCE_THRESHOLD)
        .collect();
    let run_high: Vec<String> = high_tests.iter().map(|t| node_id(&t.row)).collect();

    let run_fast: Vec<String> = high_tests
        .iter()
        .filter(|t| t.row.test_type == "unit")
        .map(|t| node_id(&t.row))
        .collect();

    let selected = run_all.len();
    let reduction_pct = if total_in_repo > 0 {
        ((1.0 - selected as f64 / total_in_repo as f64) * 1000.0).round() / 10.0
    } else {
        0.0
    };

    RunPlans {
        run_all_cmd: build_command(&run_all),
        run_high_cmd: build_command(&run_high),
        run_fast_cmd: build_command(&run_fast),
        stats: PlanStats {
            total_in_repo,
            selected,
            high_priority: run_high.len(),
            fast_subset: run_fast.len(),
            reduction_pct,
        },
        run_all,
        run_high,
        run_fast,
    }
}
