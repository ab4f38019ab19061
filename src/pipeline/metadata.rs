//! Stage 7: extract test metadata
//!
//! Docstrings, pytest markers, async flag, parameterization, and a
//! naming-pattern classifier. Exactly one metadata row per test.

use std::collections::BTreeMap;
use std::path::PathBuf;

use once_cell::sync::Lazy;
use rayon::prelude::*;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::PipelineContext;
use crate::artifacts::{read_artifact, write_artifact, STAGE_METADATA, STAGE_REGISTRY};
use crate::error::Result;
use crate::parsers::{registry as parser_registry, FunctionFacts};
use crate::pipeline::registry::RegistryData;
use crate::store::{FactStore, MetadataRow};

static MARKER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)mark\.(\w+)").unwrap());

/// Stage 7 artifact payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataData {
    pub total_tests: usize,
    pub tests_with_descriptions: usize,
    pub tests_with_markers: usize,
    pub async_tests: usize,
    pub parameterized_tests: usize,
    pub pattern_counts: BTreeMap<String, usize>,
    pub rows: Vec<MetadataRow>,
}

/// Marker names from qualified decorators (`@pytest.mark.asyncio` →
/// `asyncio`), lower-cased
pub fn markers_of(decorators: &[String]) -> Vec<String> {
    let mut markers = Vec::new();
    for decorator in decorators {
        if let Some(caps) = MARKER_RE.captures(decorator) {
            markers.push(caps[1].to_lowercase());
        }
    }
    markers
}

/// A test is parameterized when a decorator's qualified name ends in
/// `parametrize` or its parameter list goes beyond `self`.
pub fn is_parameterized(facts: &FunctionFacts) -> bool {
    facts.decorators.iter().any(|d| d.ends_with("parametrize"))
        || facts.parameters.iter().any(|p| p != "self")
}

/// Naming-pattern classifier
pub fn identify_pattern(name: &str) -> &'static str {
    let lower = name.to_lowercase();
    if lower.contains("should") {
        "should_pattern"
    } else if lower.contains("when") || lower.contains("given") {
        "bdd_pattern"
    } else if name.starts_with("test_") {
        "test_prefix"
    } else {
        "other"
    }
}

pub fn run(ctx: &PipelineContext, store: &mut FactStore) -> Result<MetadataData> {
    let registry: RegistryData = read_artifact(&ctx.artifacts_dir, STAGE_REGISTRY)?;

    let mut tests_by_file: BTreeMap<String, Vec<&crate::store::TestRow>> = BTreeMap::new();
    for test in &registry.tests {
        tests_by_file
            .entry(test.file_path.clone())
            .or_default()
            .push(test);
    }

    let facts_by_file: BTreeMap<String, Vec<FunctionFacts>> = tests_by_file
        .keys()
        .cloned()
        .collect::<Vec<_>>()
        .par_iter()
        .filter_map(|path_str| {
            let path = PathBuf::from(path_str);
            let parsers = parser_registry();
            let parser = parsers.get_parser(&path)?;
            let parsed = parser.parse_file(&path)?;
            Some((path_str.clone(), parser.extract_functions(&parsed)))
        })
        .collect::<Vec<_>>()
        .into_iter()
        .collect();

    let mut rows = Vec::new();
    for (file_path, tests) in &tests_by_file {
        let empty = Vec::new();
        let functions = facts_by_file.get(file_path).unwrap_or(&empty);

        for test in tests {
            // match on (class, name) first; a free function matches a
            // facts entry with no class
            let facts = functions
                .iter()
                .find(|f| f.name == test.method_name && f.class_name == test.class_name)
                .or_else(|| functions.iter().find(|f| f.name == test.method_name));

            let row = match facts {
                Some(f) => MetadataRow {
                    test_id: test.test_id.clone(),
                    description: f.docstring.clone().unwrap_or_default(),
                    markers: markers_of(&f.decorators),
                    is_async: f.is_async,
                    is_parameterized: is_parameterized(f),
                    pattern: identify_pattern(&f.name).to_string(),
                    line_number: Some(f.line as i64),
                },
                None => MetadataRow {
                    test_id: test.test_id.clone(),
                    description: String::new(),
                    markers: Vec::new(),
                    is_async: false,
                    is_parameterized: false,
                    pattern: identify_pattern(&test.method_name).to_string(),
                    line_number: test.line_number,
                },
            };
            rows.push(row);
        }
    }

    store.upsert_metadata(&rows)?;

    let mut pattern_counts = BTreeMap::new();
    for row in &rows {
        *pattern_counts.entry(row.pattern.clone()).or_insert(0) += 1;
    }

    let data = MetadataData {
        total_tests: rows.len(),
        tests_with_descriptions: rows.iter().filter(|r| !r.description.is_empty()).count(),
        tests_with_markers: rows.iter().filter(|r| !r.markers.is_empty()).count(),
        async_tests: rows.iter().filter(|r| r.is_async).count(),
        parameterized_tests: rows.iter().filter(|r| r.is_parameterized).count(),
        pattern_counts,
        rows,
    };
    write_artifact(&ctx.artifacts_dir, STAGE_METADATA, &data)?;
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_extraction_lowercases() {
        let markers = markers_of(&[
            "pytest.mark.asyncio".to_string(),
            "pytest.mark.SLOW".to_string(),
            "staticmethod".to_string(),
        ]);
        assert_eq!(markers, vec!["asyncio", "slow"]);
    }

    #[test]
    fn test_pattern_classifier() {
        assert_eq!(identify_pattern("test_should_reject_bad_input"), "should_pattern");
        assert_eq!(identify_pattern("test_when_empty_returns_none"), "bdd_pattern");
        assert_eq!(identify_pattern("test_initialize"), "test_prefix");
        assert_eq!(identify_pattern("check_invariants"), "other");
    }

    #[test]
    fn test_parameterization_detection() {
        let base = FunctionFacts {
            name: "test_x".into(),
            is_async: false,
            parameters: vec!["self".into()],
            decorators: vec![],
            class_name: Some("TestX".into()),
            docstring: None,
            line: 1,
        };
        assert!(!is_parameterized(&base));

        let decorated = FunctionFacts {
            decorators: vec!["pytest.mark.parametrize".into()],
            ..base.clone()
        };
        assert!(is_parameterized(&decorated));

        let with_params = FunctionFacts {
            parameters: vec!["self".into(), "value".into()],
            decorators: vec![],
            ..base
        };
        assert!(is_parameterized(&with_params));
    }

    #[test]
    fn test_stage_end_to_end() {
        let repo = tempfile::tempdir().unwrap();
        let artifacts = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(repo.path().join("unit")).unwrap();
        std::fs::write(
            repo.path().join("unit/test_agent.py"),
            r#"
import pytest

@pytest.mark.asyncio
async def test_should_initialize(mock_agent):
    """Verifies the agent initializes."""
    pass
"#,
        )
        .unwrap();

        let ctx = PipelineContext::new(
            repo.path().to_path_buf(),
            artifacts.path().to_path_buf(),
        );
        let mut store = FactStore::open_in_memory().unwrap();
        store.ensure_schema().unwrap();
        crate::pipeline::scan::run(&ctx).unwrap();
        crate::pipeline::registry::run(&ctx, &mut store).unwrap();
        let data = run(&ctx, &mut store).unwrap();

        assert_eq!(data.total_tests, 1);
        let row = &data.rows[0];
        assert_eq!(row.description, "Verifies the agent initializes.");
        assert_eq!(row.markers, vec!["asyncio"]);
        assert!(row.is_async);
        assert!(row.is_parameterized); // fixture argument beyond self
        assert_eq!(row.pattern, "should_pattern");
    }
}
