//! Text report rendering for `select` runs
//!
//! One ranked block per selected test (score, type, file, one line per
//! match reason) followed by the three copy-paste runner commands.

use crate::matcher::{MatchOutcome, MatchReason};
use crate::score::RunPlans;

/// Render one match reason as a single report line
pub fn describe_reason(reason: &MatchReason) -> String {
    match reason {
        MatchReason::FunctionLevel {
            module,
            function,
            source,
            ..
        } => {
            let via = source.as_deref().unwrap_or("method_call");
            format!("function_level: {module}.{function} (via {via})")
        }
        MatchReason::DirectFile {
            test_file,
            match_strategy,
            ..
        } => format!("direct_file: {test_file} ({match_strategy})"),
        MatchReason::Integration { module, .. } => {
            format!("integration: references {module}")
        }
        MatchReason::Exact {
            class,
            reference_type,
            ..
        } => format!("exact: {class} ({reference_type})"),
        MatchReason::Module {
            pattern,
            reference_type,
            ..
        } => format!("module: {pattern} ({reference_type})"),
        MatchReason::Semantic { similarity, .. } => {
            format!("semantic: similarity {similarity:.3}")
        }
    }
}

/// Render the full selection report
pub fn render_report(outcome: &MatchOutcome, plans: &RunPlans, diff_name: &str) -> String {
    let mut out = String::new();
    let rule = "=".repeat(60);

    out.push_str(&rule);
    out.push_str(&format!("\nTEST IMPACT REPORT — {diff_name}\n"));
    out.push_str(&rule);
    out.push('\n');

    if outcome.tests.is_empty() {
        out.push_str("\nNo affected tests found.\n");
        out.push_str("Possible causes:\n");
        out.push_str("  - the diff touches no production source\n");
        out.push_str("  - production module names do not match the index\n");
        out.push_str("  - the index is stale (re-run `tia build-index`)\n\n");
    } else {
        out.push_str(&format!(
            "\n{} affected test(s), ranked by confidence (0-100)\n\n",
            outcome.total_tests
        ));

        for test in &outcome.tests {
            let name = match &test.row.class_name {
                Some(class) if !class.is_empty() => {
                    format!("{}.{}", class, test.row.method_name)
                }
                _ => test.row.method_name.clone(),
            };
            out.push_str(&format!(
                "  [{:>3}] {}  {}  ({})\n",
                test.confidence_score, test.row.test_id, name, test.row.test_type
            ));
            out.push_str(&format!("        file: {}\n", test.row.test_file_path));
            for reason in &test.reasons {
                out.push_str(&format!("        - {}\n", describe_reason(reason)));
            }
        }
        out.push('\n');
    }

    out.push_str(&"-".repeat(60));
    out.push_str("\nRUN PLANS\n");
    out.push_str(&"-".repeat(60));
    out.push_str(&format!(
        "\nselected: {} / {} in repo  |  high priority: {}  |  fast subset: {}  |  reduction: {:.1}%\n\n",
        plans.stats.selected,
        plans.stats.total_in_repo,
        plans.stats.high_priority,
        plans.stats.fast_subset,
        plans.stats.reduction_pct
    ));

    out.push_str("# run_all — every selected test\n");
    out.push_str(&plans.run_all_cmd);
    out.push_str("\n\n# run_high — score >= 60\n");
    out.push_str(&plans.run_high_cmd);
    out.push_str("\n\n# run_fast — high-confidence unit tests only\n");
    out.push_str(&plans.run_fast_cmd);
    out.push('\n');

    out
}
