//! Stage 3: build the test registry
//!
//! Every test function becomes one registry row. Enclosing test classes
//! (name begins with `Test` or extends a `*TestCase*` base) are
//! preserved; free test functions get no class. `test_id`s come from a
//! monotonic counter that continues from the existing maximum on
//! incremental runs.

use std::collections::BTreeMap;
use std::path::PathBuf;

use parking_lot::Mutex;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::PipelineContext;
use crate::artifacts::{read_artifact, write_artifact, STAGE_REGISTRY, STAGE_SCAN};
use crate::error::Result;
use crate::parsers::{registry as parser_registry, ClassFacts, TestMethodFacts};
use crate::paths::canonicalize_path;
use crate::pipeline::scan::ScanData;
use crate::scanner::categorize_path;
use crate::store::{FactStore, TestRow};

/// Stage 3 artifact payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryData {
    pub total_tests: usize,
    pub total_classes: usize,
    pub total_files: usize,
    pub tests_by_type: BTreeMap<String, usize>,
    pub tests: Vec<TestRow>,
}

/// Tests found in one file, before id assignment
struct FileTests {
    path: PathBuf,
    tests: Vec<(Option<String>, String, usize)>,
}

/// Whether a class holds tests: name begins with `Test` or it extends a
/// `*TestCase*` base.
pub fn is_test_class(class: &ClassFacts) -> bool {
    class.name.starts_with("Test") || class.bases.iter().any(|b| b.contains("TestCase"))
}

/// Extract `(class_name, method_name, line)` rows for one file
fn tests_in_file(
    classes: &[ClassFacts],
    methods: &[TestMethodFacts],
) -> Vec<(Option<String>, String, usize)> {
    let mut rows = Vec::new();
    for method in methods {
        match &method.class_name {
            Some(class_name) => {
                let owning = classes.iter().find(|c| &c.name == class_name);
                if owning.map(is_test_class).unwrap_or(false) {
                    rows.push((Some(class_name.clone()), method.name.clone(), method.line));
                }
            }
            None => rows.push((None, method.name.clone(), method.line)),
        }
    }
    rows
}

pub fn run(ctx: &PipelineContext, store: &mut FactStore) -> Result<RegistryData> {
    let scan: ScanData = read_artifact(&ctx.artifacts_dir, STAGE_SCAN)?;
    let parsers = parser_registry();

    // parse files in parallel; ordering of the input list is preserved
    // so id assignment below stays deterministic
    let per_file: Vec<FileTests> = scan
        .files
        .par_iter()
        .filter_map(|file| {
            let path = PathBuf::from(&file.absolute_path);
            let parser = parsers.get_parser(&path)?;
            let parsed = parser.parse_file(&path)?;
            let classes = parser.extract_classes(&parsed);
            let methods = parser.extract_test_methods(&parsed);
            Some(FileTests {
                path,
                tests: tests_in_file(&classes, &methods),
            })
        })
        .collect();

    // the counter continues from the stored maximum; the mutex guards
    // the commit boundary
    let start = store.max_test_id()?.unwrap_or(0) + 1;
    let counter = Mutex::new(start);

    // re-runs keep existing ids stable
    let existing: BTreeMap<(String, String, String), String> = store
        .all_tests()?
        .into_iter()
        .map(|t| {
            (
                (
                    t.file_path.clone(),
                    t.class_name.clone().unwrap_or_default(),
                    t.method_name.clone(),
                ),
                t.test_id,
            )
        })
        .collect();

    let mut rows = Vec::new();
    for file in &per_file {
        let canonical = canonicalize_path(&file.path).display().to_string();
        let test_type = categorize_path(&file.path).as_str().to_string();
        for (class_name, method_name, line) in &file.tests {
            let key = (
                canonical.clone(),
                class_name.clone().unwrap_or_default(),
                method_name.clone(),
            );
            let test_id = match existing.get(&key) {
                Some(id) => id.clone(),
                None => {
                    let mut guard = counter.lock();
                    let id = format!("test_{:04}", *guard);
                    *guard += 1;
                    id
                }
            };
            rows.push(TestRow {
                test_id,
                file_path: canonical.clone(),
                class_name: class_name.clone(),
                method_name: method_name.clone(),
                test_type: test_type.clone(),
                line_number: Some(*line as i64),
            });
        }
    }

    store.upsert_tests(&rows)?;

    let total_classes = rows
        .iter()
        .filter_map(|t| t.class_name.clone())
        .collect::<std::collections::BTreeSet<_>>()
        .len();
    let mut tests_by_type = BTreeMap::new();
    for row in &rows {
        *tests_by_type.entry(row.test_type.clone()).or_insert(0) += 1;
    }

    let data = RegistryData {
        total_tests: rows.len(),
        total_classes,
        total_files: per_file.len(),
        tests_by_type,
        tests: rows,
    };
    write_artifact(&ctx.artifacts_dir, STAGE_REGISTRY, &data)?;
    Ok(data)
}
