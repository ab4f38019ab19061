//! Deduplication, verification and incremental re-indexing
//!
//! Path aliasing (cloud-synced mirrors, casing differences) can index
//! the same test twice under different absolute paths. The dedup key
//! normalizes paths down to their test-tree-relative form; the row with
//! the lowest `test_id` survives and child rows cascade with it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::parsers::registry as parser_registry;
use crate::paths::{canonicalize_path, file_name, normalize_separators, parent_dir_name};
use crate::pipeline::registry::is_test_class;
use crate::scanner::{categorize_path, scan_directory};
use crate::store::{FactStore, TestRow};

/// Directory names that keep their segment in the fallback dedup key
const KEYED_PARENT_DIRS: &[&str] = &["unit", "integration", "e2e", "tests", "test"];

/// Normalize a file path for duplicate detection.
///
/// Strips everything up to and including a `test_repository` segment;
/// falls back to `parent_dir/filename` when the parent is a test
/// directory, else the bare filename.
pub fn normalize_for_dedup(file_path: &str) -> String {
    let normalized = normalize_separators(file_path);

    if let Some(idx) = normalized.find("test_repository") {
        let after = &normalized[idx + "test_repository".len()..];
        return after.trim_start_matches('/').to_string();
    }

    let name = file_name(&normalized);
    if let Some(parent) = parent_dir_name(&normalized) {
        if KEYED_PARENT_DIRS.contains(&parent) {
            return format!("{parent}/{name}");
        }
    }
    name.to_string()
}

/// The identity of one test for dedup purposes
pub type DedupKey = (String, String, String);

pub fn dedup_key(test: &TestRow) -> DedupKey {
    (
        normalize_for_dedup(&test.file_path),
        test.class_name.clone().unwrap_or_default(),
        test.method_name.clone(),
    )
}

/// A group of rows sharing one dedup key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateGroup {
    pub normalized_path: String,
    pub class_name: String,
    pub method_name: String,
    pub tests: Vec<TestRow>,
}

/// Duplicate-detection report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateReport {
    pub total_tests: usize,
    pub unique_tests: usize,
    pub duplicate_groups: usize,
    pub duplicate_tests: usize,
    pub groups: Vec<DuplicateGroup>,
}

/// Find duplicate registry rows by normalized identity
pub fn find_duplicates(store: &FactStore) -> Result<DuplicateReport> {
    let all_tests = store.all_tests()?;

    let mut by_key: BTreeMap<DedupKey, Vec<TestRow>> = BTreeMap::new();
    for test in &all_tests {
        by_key.entry(dedup_key(test)).or_default().push(test.clone());
    }

    let unique_tests = by_key.len();
    let mut groups = Vec::new();
    let mut duplicate_tests = 0;
    for ((normalized_path, class_name, method_name), tests) in by_key {
        if tests.len() > 1 {
            duplicate_tests += tests.len() - 1;
            groups.push(DuplicateGroup {
                normalized_path,
                class_name,
                method_name,
                tests,
            });
        }
    }

    Ok(DuplicateReport {
        total_tests: all_tests.len(),
        unique_tests,
        duplicate_groups: groups.len(),
        duplicate_tests,
        groups,
    })
}

/// Removal report from a dedup pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemovalReport {
    pub removed: usize,
    pub kept: usize,
    pub dry_run: bool,
    pub test_ids_removed: Vec<String>,
}

/// Remove duplicate rows, keeping the lowest `test_id` in each group.
/// Child tables follow through the cascade. With `dry_run`, only
/// reports what would happen.
pub fn remove_duplicates(store: &mut FactStore, dry_run: bool) -> Result<RemovalReport> {
    let report = find_duplicates(store)?;
    if report.duplicate_groups == 0 {
        return Ok(RemovalReport {
            removed: 0,
            kept: 0,
            dry_run,
            test_ids_removed: Vec::new(),
        });
    }

    let mut to_remove = Vec::new();
    let mut kept = 0;
    for group in &report.groups {
        let mut sorted = group.tests.clone();
        sorted.sort_by(|a, b| a.test_id.cmp(&b.test_id));
        kept += 1;
        for test in &sorted[1..] {
            to_remove.push(test.test_id.clone());
        }
    }

    if !dry_run {
        store.delete_tests(&to_remove)?;
    }

    Ok(RemovalReport {
        removed: to_remove.len(),
        kept,
        dry_run,
        test_ids_removed: to_remove,
    })
}

/// On-disk vs indexed coverage report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationReport {
    pub total_on_disk: usize,
    pub total_indexed: usize,
    pub missing_files: Vec<String>,
    pub coverage_percent: f64,
}

/// Compare canonicalized paths from a fresh walk against the store
pub fn verify_indexing(test_repo: &Path, store: &FactStore) -> Result<VerificationReport> {
    let on_disk: Vec<String> = scan_directory(test_repo)
        .into_iter()
        .filter(|p| !is_support_file(p))
        .map(|p| canonicalize_path(&p).display().to_string())
        .collect();

    let indexed: std::collections::BTreeSet<String> = store
        .distinct_file_paths()?
        .into_iter()
        .map(|p| canonicalize_path(Path::new(&p)).display().to_string())
        .collect();

    let missing_files: Vec<String> = on_disk
        .iter()
        .filter(|p| !indexed.contains(*p))
        .cloned()
        .collect();

    let coverage_percent = if on_disk.is_empty() {
        100.0
    } else {
        (on_disk.len() - missing_files.len()) as f64 / on_disk.len() as f64 * 100.0
    };

    Ok(VerificationReport {
        total_on_disk: on_disk.len(),
        total_indexed: indexed.len(),
        missing_files,
        coverage_percent,
    })
}

/// Package markers and fixtures are not indexable tests
fn is_support_file(path: &Path) -> bool {
    matches!(
        path.file_name().and_then(|n| n.to_str()),
        Some("__init__.py") | Some("conftest.py")
    )
}

/// Re-index report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReindexReport {
    pub indexed: usize,
    pub skipped: usize,
    pub duplicates_avoided: usize,
}

/// Index only the files missing from the store. Within the pass, each
/// `(path, class, method)` is checked against existing rows before a
/// new `test_id` is assigned, so aliased paths never mint fresh ids.
pub fn reindex_missing(test_repo: &Path, store: &mut FactStore) -> Result<ReindexReport> {
    let verification = verify_indexing(test_repo, store)?;
    if verification.missing_files.is_empty() {
        return Ok(ReindexReport {
            indexed: 0,
            skipped: 0,
            duplicates_avoided: 0,
        });
    }

    let mut existing: std::collections::BTreeSet<DedupKey> = store
        .all_tests()?
        .iter()
        .map(dedup_key)
        .collect();

    let mut counter = store.max_test_id()?.unwrap_or(0) + 1;
    let parsers = parser_registry();
    let mut rows = Vec::new();
    let mut skipped = 0;
    let mut duplicates_avoided = 0;

    for file in &verification.missing_files {
        let path = PathBuf::from(file);
        let Some(parser) = parsers.get_parser(&path) else {
            skipped += 1;
            continue;
        };
        let Some(parsed) = parser.parse_file(&path) else {
            skipped += 1;
            continue;
        };

        let canonical = canonicalize_path(&path).display().to_string();
        let test_type = categorize_path(&path).as_str().to_string();
        let classes = parser.extract_classes(&parsed);

        for method in parser.extract_test_methods(&parsed) {
            let class_name = match &method.class_name {
                Some(name) => {
                    let owning = classes.iter().find(|c| &c.name == name);
                    if !owning.map(is_test_class).unwrap_or(false) {
                        continue;
                    }
                    Some(name.clone())
                }
                None => None,
            };

            let key = (
                normalize_for_dedup(&canonical),
                class_name.clone().unwrap_or_default(),
                method.name.clone(),
            );
            if !existing.insert(key) {
                duplicates_avoided += 1;
                continue;
            }

            rows.push(TestRow {
                test_id: format!("test_{counter:04}"),
                file_path: canonical.clone(),
                class_name,
                method_name: method.name,
                test_type: test_type.clone(),
                line_number: Some(method.line as i64),
            });
            counter += 1;
        }
    }

    store.upsert_tests(&rows)?;

    Ok(ReindexReport {
        indexed: rows.len(),
        skipped,
        duplicates_avoided,
    })
}
