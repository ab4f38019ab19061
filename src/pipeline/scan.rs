//! Stage 1: scan the test tree
//!
//! Emits every test file with its metadata (path, size, lines, category)
//! as the `01_test_files.json` artifact.

use std::collections::BTreeMap;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::PipelineContext;
use crate::artifacts::{write_artifact, STAGE_SCAN};
use crate::error::Result;
use crate::scanner::{file_metadata, scan_directory, ScannedFile};

/// Stage 1 artifact payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanData {
    pub total_files: usize,
    pub by_category: BTreeMap<String, usize>,
    pub files: Vec<ScannedFile>,
}

pub fn run(ctx: &PipelineContext) -> Result<ScanData> {
    let paths = scan_directory(&ctx.test_repo);

    let files: Vec<ScannedFile> = paths.par_iter().map(|p| file_metadata(p)).collect();

    let mut by_category = BTreeMap::new();
    for file in &files {
        *by_category
            .entry(file.category.as_str().to_string())
            .or_insert(0) += 1;
    }

    let data = ScanData {
        total_files: files.len(),
        by_category,
        files,
    };
    write_artifact(&ctx.artifacts_dir, STAGE_SCAN, &data)?;
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::read_artifact;
    use std::fs;

    #[test]
    fn test_scan_stage_writes_artifact() {
        let repo = tempfile::tempdir().unwrap();
        let artifacts = tempfile::tempdir().unwrap();
        fs::create_dir_all(repo.path().join("unit")).unwrap();
        fs::write(
            repo.path().join("unit/test_sample.py"),
            "def test_a():\n    pass\n",
        )
        .unwrap();

        let ctx = PipelineContext::new(
            repo.path().to_path_buf(),
            artifacts.path().to_path_buf(),
        );
        let data = run(&ctx).unwrap();
        assert_eq!(data.total_files, 1);
        assert_eq!(data.by_category.get("unit"), Some(&1));

        let loaded: ScanData = read_artifact(artifacts.path(), STAGE_SCAN).unwrap();
        assert_eq!(loaded.files.len(), 1);
        assert!(loaded.files[0].absolute_path.ends_with("test_sample.py"));
    }
}
