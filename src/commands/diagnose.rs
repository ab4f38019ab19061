//! `tia diagnose` — explain why expected tests may be missing
//!
//! Reports per-table row counts, and for a given diff walks each
//! changed production file showing which derived candidates actually hit
//! the index. When a query comes back empty, sample production classes
//! from the reverse index are shown so name mismatches are obvious.

use std::path::Path;

use super::CommandContext;
use crate::diff::{
    build_search_queries, parse_diff, production_modules_for, read_diff_file,
    test_file_candidates_for,
};
use crate::error::Result;
use crate::matcher::MatchEngine;
use crate::store::FactStore;

pub fn run_diagnose(ctx: &CommandContext, diff_file: Option<&Path>) -> Result<String> {
    let store = ctx.open_store()?;
    store.require_schema()?;

    let mut out = String::new();
    out.push_str("INDEX STATE\n");
    for table in [
        "test_registry",
        "test_dependencies",
        "reverse_index",
        "test_function_mapping",
        "test_metadata",
        "test_structure",
    ] {
        out.push_str(&format!("  {:22} {}\n", table, store.count_rows(table)?));
    }
    out.push_str(&format!(
        "  {:22} {}\n",
        "embeddings",
        store.count_embeddings()?
    ));

    let Some(diff_file) = diff_file else {
        return Ok(out);
    };

    let content = read_diff_file(diff_file)?;
    let parsed = parse_diff(&content)?;

    out.push_str(&format!("\nDIFF: {}\n", diff_file.display()));
    for change in &parsed.file_changes {
        out.push_str(&format!(
            "\n  {} ({:?})\n",
            change.file,
            change.change_type()
        ));

        let modules = production_modules_for(&change.file);
        if modules.is_empty() {
            out.push_str("    not a production file — no queries issued\n");
            continue;
        }

        for module in &modules {
            let hits = store.tests_for_class(module)?;
            out.push_str(&format!(
                "    class query {:40} -> {} test(s)\n",
                module,
                hits.len()
            ));
            if hits.is_empty() {
                diagnose_empty_class_query(&store, module, &mut out)?;
            }
        }

        for candidate in test_file_candidates_for(&change.file) {
            let hits = store.tests_by_path_pattern(&format!("%{candidate}"))?;
            out.push_str(&format!(
                "    file query  {:40} -> {} test(s)\n",
                candidate,
                hits.len()
            ));
        }
    }

    // full run comparison: how much does each half of the engine add
    let queries = build_search_queries(&parsed.file_changes);
    let engine = MatchEngine::new(&store);
    let ast_only = engine.find_tests_ast_only(&queries, &parsed.file_changes)?;
    out.push_str(&format!(
        "\nAST strategies select {} test(s) for this diff.\n",
        ast_only.total_tests
    ));
    if store.count_embeddings()? == 0 {
        out.push_str("No embeddings stored — the semantic strategy cannot add more.\n");
    }

    Ok(out)
}

fn diagnose_empty_class_query(store: &FactStore, module: &str, out: &mut String) -> Result<()> {
    let first_segment = module.split('.').next().unwrap_or(module);
    let samples = store.sample_production_classes(first_segment, 3)?;
    if samples.is_empty() {
        out.push_str("      (no production classes under this prefix — re-run `tia build-index`)\n");
    } else {
        let rendered: Vec<String> = samples
            .iter()
            .map(|(class, ref_type)| format!("{class} ({ref_type})"))
            .collect();
        out.push_str(&format!(
            "      closest indexed classes: {}\n",
            rendered.join(", ")
        ));
    }
    Ok(())
}
