//! Stage 8: map the test-tree structure
//!
//! Summarises the scanned tree into per-directory rows (category, file
//! count, total lines).

use serde::{Deserialize, Serialize};

use super::PipelineContext;
use crate::artifacts::{read_artifact, write_artifact, STAGE_SCAN, STAGE_STRUCTURE};
use crate::error::Result;
use crate::pipeline::scan::ScanData;
use crate::scanner::group_by_directory;
use crate::store::{FactStore, StructureRow};

/// Stage 8 artifact payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructureData {
    pub directories: Vec<StructureRow>,
}

pub fn run(ctx: &PipelineContext, store: &mut FactStore) -> Result<StructureData> {
    let scan: ScanData = read_artifact(&ctx.artifacts_dir, STAGE_SCAN)?;

    let groups = group_by_directory(&scan.files);
    let directories: Vec<StructureRow> = groups
        .into_iter()
        .map(|(dir, (category, file_count, total_lines))| StructureRow {
            directory_path: dir,
            category: category.as_str().to_string(),
            file_count: file_count as i64,
            total_lines: total_lines as i64,
        })
        .collect();

    store.replace_structure(&directories)?;

    let data = StructureData { directories };
    write_artifact(&ctx.artifacts_dir, STAGE_STRUCTURE, &data)?;
    Ok(data)
}
