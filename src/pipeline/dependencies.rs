//! Stage 4: extract static dependencies
//!
//! For each test, aggregates the file's production imports, from-import
//! modules and names, and production string references into
//! `referenced_classes`, tagged with how each was referenced
//! (`direct_import` vs `string_ref`).

use std::collections::BTreeMap;
use std::path::PathBuf;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::{is_production_import, PipelineContext};
use crate::artifacts::{read_artifact, write_artifact, STAGE_DEPENDENCIES, STAGE_REGISTRY};
use crate::error::Result;
use crate::parsers::registry as parser_registry;
use crate::pipeline::registry::RegistryData;
use crate::store::{DependencyRow, FactStore};

/// Per-file production references
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileDependencies {
    pub file_path: String,
    pub production_imports: Vec<String>,
    pub production_string_references: Vec<String>,
    pub production_from_imports: Vec<(String, Vec<String>)>,
}

/// Per-test dependency record carried in the artifact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestDependencies {
    pub test_id: String,
    pub file_path: String,
    pub class_name: Option<String>,
    pub method_name: String,
    pub referenced_classes: Vec<String>,
    pub reference_types: BTreeMap<String, String>,
}

/// Stage 4 artifact payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyData {
    pub total_tests: usize,
    pub tests_with_dependencies: usize,
    pub total_references: usize,
    pub test_dependencies: Vec<TestDependencies>,
}

/// Extract production references from one parsed file
fn file_dependencies(path: &PathBuf) -> Option<FileDependencies> {
    let parsers = parser_registry();
    let parser = parsers.get_parser(path)?;
    let parsed = parser.parse_file(path)?;

    let imports = parser.extract_imports(&parsed);
    let string_refs = parser.extract_string_references(&parsed);

    let production_imports: Vec<String> = imports
        .all_imports
        .iter()
        .filter(|i| is_production_import(i))
        .cloned()
        .collect();
    let production_string_references: Vec<String> = string_refs
        .into_iter()
        .filter(|r| is_production_import(r))
        .collect();
    let production_from_imports: Vec<(String, Vec<String>)> = imports
        .from_imports
        .into_iter()
        .filter(|(module, _)| is_production_import(module))
        .collect();

    Some(FileDependencies {
        file_path: path.display().to_string(),
        production_imports,
        production_string_references,
        production_from_imports,
    })
}

/// Referenced classes with their reference type for one file.
/// String references win over imports when both name the same symbol.
fn referenced_classes(deps: &FileDependencies) -> BTreeMap<String, String> {
    let mut types = BTreeMap::new();
    for import in &deps.production_imports {
        types.insert(import.clone(), "direct_import".to_string());
    }
    for (module, names) in &deps.production_from_imports {
        types
            .entry(module.clone())
            .or_insert_with(|| "direct_import".to_string());
        for name in names {
            types
                .entry(name.clone())
                .or_insert_with(|| "direct_import".to_string());
        }
    }
    for string_ref in &deps.production_string_references {
        types.insert(string_ref.clone(), "string_ref".to_string());
    }
    types
}

pub fn run(ctx: &PipelineContext, store: &mut FactStore) -> Result<DependencyData> {
    let registry: RegistryData = read_artifact(&ctx.artifacts_dir, STAGE_REGISTRY)?;

    let files: Vec<PathBuf> = registry
        .tests
        .iter()
        .map(|t| PathBuf::from(&t.file_path))
        .collect::<std::collections::BTreeSet<_>>()
        .into_iter()
        .collect();

    let per_file: BTreeMap<String, FileDependencies> = files
        .par_iter()
        .filter_map(|path| {
            let deps = file_dependencies(path)?;
            Some((path.display().to_string(), deps))
        })
        .collect::<Vec<_>>()
        .into_iter()
        .collect();

    let mut test_dependencies = Vec::new();
    let mut store_rows = Vec::new();

    for test in &registry.tests {
        let Some(deps) = per_file.get(&test.file_path) else {
            continue;
        };
        let types = referenced_classes(deps);
        let classes: Vec<String> = types.keys().cloned().collect();

        for (class, ref_type) in &types {
            store_rows.push(DependencyRow {
                test_id: test.test_id.clone(),
                referenced_class: class.clone(),
                import_type: ref_type.clone(),
            });
        }

        test_dependencies.push(TestDependencies {
            test_id: test.test_id.clone(),
            file_path: test.file_path.clone(),
            class_name: test.class_name.clone(),
            method_name: test.method_name.clone(),
            referenced_classes: classes,
            reference_types: types,
        });
    }

    let scope: Vec<String> = registry.tests.iter().map(|t| t.test_id.clone()).collect();
    store.replace_dependencies(&scope, &store_rows)?;

    let tests_with_dependencies = test_dependencies
        .iter()
        .filter(|t| !t.referenced_classes.is_empty())
        .count();

    let data = DependencyData {
        total_tests: test_dependencies.len(),
        tests_with_dependencies,
        total_references: store_rows.len(),
        test_dependencies,
    };
    write_artifact(&ctx.artifacts_dir, STAGE_DEPENDENCIES, &data)?;
    Ok(data)
}
