//! `tia reindex` — index only the files missing from the store

use std::path::PathBuf;

use super::CommandContext;
use crate::dedup::reindex_missing;
use crate::error::Result;

pub fn run_reindex(ctx: &CommandContext, test_repo: Option<PathBuf>) -> Result<String> {
    let test_repo = test_repo.unwrap_or_else(|| ctx.settings.test_repo.clone());
    let mut store = ctx.open_store()?;
    store.require_schema()?;

    let report = reindex_missing(&test_repo, &mut store)?;

    let mut out = String::new();
    if report.indexed == 0 && report.duplicates_avoided == 0 {
        out.push_str("Index is complete — nothing to do.\n");
    } else {
        out.push_str(&format!("Newly indexed tests:  {}\n", report.indexed));
        out.push_str(&format!("Files skipped:        {}\n", report.skipped));
        out.push_str(&format!(
            "Duplicates avoided:   {}\n",
            report.duplicates_avoided
        ));
        out.push_str(
            "\nRe-run `tia build-index` to refresh dependencies and metadata\nfor the new tests.\n",
        );
    }
    Ok(out)
}
