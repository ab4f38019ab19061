//! `tia verify` — compare on-disk test files against the index

use std::path::PathBuf;

use super::CommandContext;
use crate::dedup::verify_indexing;
use crate::error::Result;

pub fn run_verify(ctx: &CommandContext, test_repo: Option<PathBuf>) -> Result<String> {
    let test_repo = test_repo.unwrap_or_else(|| ctx.settings.test_repo.clone());
    let store = ctx.open_store()?;
    store.require_schema()?;

    let report = verify_indexing(&test_repo, &store)?;

    let mut out = String::new();
    out.push_str(&format!("Test files on disk: {}\n", report.total_on_disk));
    out.push_str(&format!("Files indexed:      {}\n", report.total_indexed));
    out.push_str(&format!("Coverage:           {:.1}%\n", report.coverage_percent));

    if report.missing_files.is_empty() {
        out.push_str("\nAll test files are indexed.\n");
    } else {
        out.push_str(&format!(
            "\n{} file(s) missing from the index:\n",
            report.missing_files.len()
        ));
        for file in &report.missing_files {
            out.push_str(&format!("  - {file}\n"));
        }
        out.push_str("\nRun `tia reindex` to index them.\n");
    }
    Ok(out)
}
