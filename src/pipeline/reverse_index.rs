//! Stage 6: build the reverse index
//!
//! Inverts stage 4 into `production class → tests` rows, carrying each
//! test's reference type. The reverse index is a materialized view: it
//! can be dropped and rebuilt from the dependency artifact at any time
//! with identical store content.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::PipelineContext;
use crate::artifacts::{read_artifact, write_artifact, STAGE_DEPENDENCIES, STAGE_REVERSE_INDEX};
use crate::error::Result;
use crate::pipeline::dependencies::DependencyData;
use crate::store::{FactStore, ReverseIndexRow};

/// Stage 6 artifact payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReverseIndexData {
    pub total_production_classes: usize,
    pub total_mappings: usize,
    pub entries: Vec<ReverseIndexRow>,
}

/// Invert dependency records into reverse-index rows, deterministically
/// ordered by (production class, test id).
pub fn invert(dependencies: &DependencyData) -> Vec<ReverseIndexRow> {
    let mut by_class: BTreeMap<(String, String), ReverseIndexRow> = BTreeMap::new();

    for test in &dependencies.test_dependencies {
        for class in &test.referenced_classes {
            let reference_type = test
                .reference_types
                .get(class)
                .cloned()
                .unwrap_or_else(|| "direct_import".to_string());
            by_class.insert(
                (class.clone(), test.test_id.clone()),
                ReverseIndexRow {
                    production_class: class.clone(),
                    test_id: test.test_id.clone(),
                    test_file_path: test.file_path.clone(),
                    reference_type,
                },
            );
        }
    }

    by_class.into_values().collect()
}

pub fn run(ctx: &PipelineContext, store: &mut FactStore) -> Result<ReverseIndexData> {
    let dependencies: DependencyData = read_artifact(&ctx.artifacts_dir, STAGE_DEPENDENCIES)?;

    let entries = invert(&dependencies);
    store.replace_reverse_index(&entries)?;

    let total_production_classes = entries
        .iter()
        .map(|e| e.production_class.as_str())
        .collect::<std::collections::BTreeSet<_>>()
        .len();

    let data = ReverseIndexData {
        total_production_classes,
        total_mappings: entries.len(),
        entries,
    };
    write_artifact(&ctx.artifacts_dir, STAGE_REVERSE_INDEX, &data)?;
    Ok(data)
}
