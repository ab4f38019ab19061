//! Test-tree scanner and categorizer
//!
//! Walks a test root, keeps files that look like tests (by name pattern
//! or by residing in a test directory), excludes infrastructure
//! directories, and classifies every file as unit / integration / e2e
//! from its path.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use ignore::WalkBuilder;
use serde::{Deserialize, Serialize};

use crate::parsers::{registry, ParserRegistry};
use crate::paths::{canonicalize_path, normalize_separators, parent_dir_name};

/// Infrastructure directories never scanned
const EXCLUDED_DIRS: &[&str] = &[
    "__pycache__",
    ".git",
    ".hg",
    ".pytest_cache",
    ".tox",
    "node_modules",
    ".venv",
    "venv",
    "env",
    ".env",
    "dist",
    "build",
];

/// Directory names that mark their contents as tests even when the
/// filename does not match a test pattern
const TEST_DIR_NAMES: &[&str] = &["unit", "integration", "e2e", "end_to_end", "tests", "test"];

/// Test category derived from path
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestCategory {
    Unit,
    Integration,
    E2e,
}

impl TestCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unit => "unit",
            Self::Integration => "integration",
            Self::E2e => "e2e",
        }
    }

    pub fn from_str_or_unit(s: &str) -> Self {
        match s {
            "integration" => Self::Integration,
            "e2e" => Self::E2e,
            _ => Self::Unit,
        }
    }
}

/// One scanned test file with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannedFile {
    pub path: String,
    pub absolute_path: String,
    pub size_bytes: u64,
    pub line_count: usize,
    pub category: TestCategory,
}

/// Whether a file name matches one of the test-file patterns
/// (`test_*.ext`, `*_test.ext`, `*Test.ext`)
pub fn is_test_file_name(name: &str) -> bool {
    let lower = name.to_lowercase();
    let Some(stem) = lower.rsplit_once('.').map(|(s, _)| s) else {
        return false;
    };
    stem.starts_with("test_") || stem.ends_with("_test") || name_has_camel_test_suffix(name)
}

fn name_has_camel_test_suffix(name: &str) -> bool {
    match name.rsplit_once('.') {
        Some((stem, _)) => stem.ends_with("Test"),
        None => false,
    }
}

/// Whether any path component marks this file as living in a test tree
fn resides_in_test_dir(path: &Path) -> bool {
    path.components().any(|c| {
        let name = c.as_os_str().to_string_lossy().to_lowercase();
        TEST_DIR_NAMES.contains(&name.as_str())
    })
}

fn is_excluded(path: &Path) -> bool {
    path.components().any(|c| {
        let name = c.as_os_str().to_string_lossy();
        EXCLUDED_DIRS.contains(&name.as_ref())
    })
}

/// Walk the test root and return every test file, deduplicated by
/// canonicalized path and sorted for stable downstream ordering.
pub fn scan_directory(root: &Path) -> Vec<PathBuf> {
    scan_directory_with(root, registry())
}

/// As [`scan_directory`], against an explicit parser registry
pub fn scan_directory_with(root: &Path, parsers: &ParserRegistry) -> Vec<PathBuf> {
    let mut seen = BTreeMap::new();

    let walker = WalkBuilder::new(root)
        .standard_filters(false)
        .hidden(false)
        .filter_entry(|entry| {
            let name = entry.file_name().to_string_lossy();
            !EXCLUDED_DIRS.contains(&name.as_ref())
        })
        .build();

    for entry in walker.flatten() {
        let path = entry.path();
        if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }
        if is_excluded(path) {
            continue;
        }
        if parsers.get_parser(path).is_none() {
            continue;
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        if !is_test_file_name(&name) && !resides_in_test_dir(path) {
            continue;
        }

        let canonical = canonicalize_path(path);
        seen.entry(canonical).or_insert_with(|| path.to_path_buf());
    }

    let mut files: Vec<PathBuf> = seen.into_keys().collect();
    files.sort();
    files
}

/// Classify a file as unit / integration / e2e from its path.
///
/// First match wins: e2e spellings, then integration, then unit; if the
/// path itself says nothing, the immediate parent directory is checked
/// against the same table; everything else defaults to unit.
pub fn categorize_path(path: &Path) -> TestCategory {
    let path_str = normalize_separators(&path.to_string_lossy()).to_lowercase();

    if ["e2e", "end_to_end", "endtoend", "end-to-end"]
        .iter()
        .any(|m| path_str.contains(m))
    {
        return TestCategory::E2e;
    }
    if path_str.contains("integration") {
        return TestCategory::Integration;
    }
    if path_str.contains("unit") {
        return TestCategory::Unit;
    }

    if let Some(parent) = parent_dir_name(&path_str) {
        match parent {
            "e2e" | "end_to_end" | "endtoend" | "end-to-end" => return TestCategory::E2e,
            "integration" => return TestCategory::Integration,
            "unit" => return TestCategory::Unit,
            _ => {}
        }
    }

    TestCategory::Unit
}

/// Read size and line count for a scanned file
pub fn file_metadata(path: &Path) -> ScannedFile {
    let (size_bytes, line_count) = match fs::read_to_string(path) {
        Ok(content) => (content.len() as u64, content.lines().count()),
        Err(_) => (
            fs::metadata(path).map(|m| m.len()).unwrap_or(0),
            0,
        ),
    };

    ScannedFile {
        path: path.display().to_string(),
        absolute_path: canonicalize_path(path).display().to_string(),
        size_bytes,
        line_count,
        category: categorize_path(path),
    }
}

/// Group scanned files by their containing directory (for the structure
/// map): directory → (category, file count, total lines)
pub fn group_by_directory(files: &[ScannedFile]) -> BTreeMap<String, (TestCategory, usize, usize)> {
    let mut groups: BTreeMap<String, (TestCategory, usize, usize)> = BTreeMap::new();
    for file in files {
        let normalized = normalize_separators(&file.absolute_path);
        let dir = match normalized.rfind('/') {
            Some(idx) => normalized[..idx].to_string(),
            None => String::new(),
        };
        let entry = groups.entry(dir).or_insert((file.category, 0, 0));
        entry.1 += 1;
        entry.2 += file.line_count;
    }
    groups
}
