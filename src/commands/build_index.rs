//! `tia build-index` — run pipeline stages 1-8

use std::path::PathBuf;

use super::CommandContext;
use crate::error::Result;
use crate::pipeline::{self, PipelineContext};

pub fn run_build_index(ctx: &CommandContext, test_repo: Option<PathBuf>) -> Result<String> {
    let test_repo = test_repo.unwrap_or_else(|| ctx.settings.test_repo.clone());
    let pipeline_ctx = PipelineContext::new(test_repo.clone(), ctx.settings.artifacts_dir());

    let mut store = ctx.open_store()?;
    let summary = pipeline::run_all(&pipeline_ctx, &mut store)?;

    let mut out = String::new();
    out.push_str(&format!("Indexed test tree: {}\n", test_repo.display()));
    out.push_str(&format!("  files scanned:      {}\n", summary.files_scanned));
    out.push_str(&format!("  framework:          {}\n", summary.framework));
    out.push_str(&format!("  tests registered:   {}\n", summary.tests_registered));
    out.push_str(&format!("  dependencies:       {}\n", summary.dependencies));
    out.push_str(&format!("  function mappings:  {}\n", summary.function_mappings));
    out.push_str(&format!("  reverse entries:    {}\n", summary.reverse_entries));
    out.push_str(&format!("  metadata rows:      {}\n", summary.metadata_rows));
    out.push_str(&format!("  directories mapped: {}\n", summary.directories));
    out.push_str(&format!(
        "\nStore: {} (schema {})\n",
        ctx.settings.database_path().display(),
        ctx.settings.db_schema
    ));
    out.push_str("Run `tia embed` to enable the semantic strategy.\n");
    Ok(out)
}
