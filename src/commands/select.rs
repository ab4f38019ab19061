//! `tia select` — map a diff to the ranked set of affected tests

use std::fs;
use std::path::Path;

use super::CommandContext;
use crate::diff::{build_search_queries, parse_diff, read_diff_file};
use crate::embedding::{create_provider, SemanticSearch};
use crate::error::Result;
use crate::matcher::{MatchEngine, SemanticSearcher};
use crate::paths::{ensure_directory, file_stem};
use crate::report::render_report;
use crate::score::{build_run_plans, rank_tests};
use crate::vector::create_backend;

pub fn run_select(ctx: &CommandContext, diff_file: &Path, no_semantic: bool) -> Result<String> {
    let content = read_diff_file(diff_file)?;
    let parsed = parse_diff(&content)?;
    let queries = build_search_queries(&parsed.file_changes);

    let store = ctx.open_store()?;
    store.require_schema()?;

    // the semantic layer is optional: a missing provider or backend
    // degrades to AST-only selection
    let semantic_parts = if no_semantic {
        None
    } else {
        match (
            create_provider(&ctx.settings),
            create_backend(&ctx.settings, None),
        ) {
            (Ok(provider), Ok(backend)) => Some((provider, backend)),
            (Err(e), _) | (_, Err(e)) => {
                tracing::warn!("semantic strategy disabled: {}", e);
                None
            }
        }
    };
    let searcher = semantic_parts
        .as_ref()
        .map(|(provider, backend)| SemanticSearch::new(provider.as_ref(), backend.as_ref()));

    let engine = MatchEngine::new(&store);
    let mut outcome = engine.find_affected_tests(
        &queries,
        &parsed.file_changes,
        searcher.as_ref().map(|s| s as &dyn SemanticSearcher),
    )?;

    rank_tests(&mut outcome);
    let plans = build_run_plans(&outcome, store.count_tests()?);

    let diff_name = diff_file
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| diff_file.display().to_string());
    let report = render_report(&outcome, &plans, &diff_name);

    // keep a copy next to the artifacts
    let results_dir = ctx.settings.results_dir();
    ensure_directory(&results_dir)?;
    let report_path = results_dir.join(format!("selection_{}.txt", file_stem(&diff_name)));
    fs::write(&report_path, &report)?;
    tracing::info!("report written to {}", report_path.display());

    Ok(report)
}
