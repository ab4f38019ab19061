//! Stage 2: detect the test framework
//!
//! Heuristic scoring over config files, conftest and per-file imports.
//! The result is advisory only; nothing downstream branches on it.

use std::path::Path;
use std::sync::Arc;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::PipelineContext;
use crate::artifacts::{write_artifact, STAGE_FRAMEWORK};
use crate::error::Result;
use crate::parsers::{registry, LanguageParser};
use crate::scanner::scan_directory;

/// Stage 2 artifact payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameworkData {
    pub primary_framework: String,
    pub confidence: String,
    pub pytest_score: i32,
    pub unittest_score: i32,
    pub indicators: Vec<String>,
}

pub fn run(ctx: &PipelineContext) -> Result<FrameworkData> {
    let mut pytest_score = 0;
    let mut unittest_score = 0;
    let mut indicators = Vec::new();

    // pytest-style config file
    if ctx.test_repo.join("pytest.ini").exists() {
        pytest_score += 3;
        indicators.push("pytest.ini found".to_string());
    }

    // root-level conftest
    let conftest = ctx.test_repo.join("conftest.py");
    if conftest.exists() {
        pytest_score += 2;
        indicators.push("conftest.py found".to_string());
        if conftest_imports_pytest(&conftest) {
            pytest_score += 1;
            indicators.push("conftest.py uses pytest".to_string());
        }
    }

    // per-file signals
    let files = scan_directory(&ctx.test_repo);
    let parsers = registry();
    let signals: Vec<(i32, i32)> = files
        .par_iter()
        .map(|path| {
            let Some(parser) = parsers.get_parser(path) else {
                return (0, 0);
            };
            file_signals(path, parser)
        })
        .collect();

    for (py, ut) in signals {
        pytest_score += py;
        unittest_score += ut;
    }

    let (primary, confidence) = determine(pytest_score, unittest_score);

    let data = FrameworkData {
        primary_framework: primary,
        confidence,
        pytest_score,
        unittest_score,
        indicators,
    };
    write_artifact(&ctx.artifacts_dir, STAGE_FRAMEWORK, &data)?;
    Ok(data)
}

fn conftest_imports_pytest(path: &Path) -> bool {
    let parsers = registry();
    let Some(parser) = parsers.get_parser(path) else {
        return false;
    };
    let Some(parsed) = parser.parse_file(path) else {
        return false;
    };
    parser
        .extract_imports(&parsed)
        .all_imports
        .iter()
        .any(|i| i.to_lowercase().contains("pytest"))
}

/// Per-file (pytest, unittest) indicator counts
fn file_signals(path: &Path, parser: Arc<dyn LanguageParser>) -> (i32, i32) {
    let mut pytest = 0;
    let mut unittest = 0;

    let Some(parsed) = parser.parse_file(path) else {
        return (0, 0);
    };

    let imports = parser.extract_imports(&parsed);
    let joined = imports.all_imports.join(" ").to_lowercase();
    if joined.contains("pytest") {
        pytest += 1;
    }
    if joined.contains("unittest") {
        unittest += 1;
    }

    let content = &parsed.source;
    if content.contains("pytest.mark") {
        pytest += 1;
    }
    if content.contains("@pytest.fixture") {
        pytest += 1;
    }
    if content.contains("TestCase") && content.contains("unittest") {
        unittest += 1;
    }

    (pytest, unittest)
}

fn determine(pytest_score: i32, unittest_score: i32) -> (String, String) {
    if pytest_score > unittest_score && pytest_score > 0 {
        let confidence = if pytest_score >= 5 {
            "high"
        } else if pytest_score >= 3 {
            "medium"
        } else {
            "low"
        };
        ("pytest".to_string(), confidence.to_string())
    } else if unittest_score > pytest_score && unittest_score > 0 {
        let confidence = if unittest_score >= 3 { "high" } else { "medium" };
        ("unittest".to_string(), confidence.to_string())
    } else if pytest_score == unittest_score && pytest_score > 0 {
        ("mixed".to_string(), "medium".to_string())
    } else {
        ("unknown".to_string(), "low".to_string())
    }
}
