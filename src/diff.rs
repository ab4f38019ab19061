//! Unified-diff parsing and symbol extraction
//!
//! Parses `diff --git` output, classifies every file change, filters to
//! production source, and derives the candidate symbols (modules,
//! classes, functions, test-file names) the match engine queries for.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{ImpactError, Result};
use crate::paths::{file_stem, normalize_separators, parent_dir_name};

static FILE_HEADER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^diff --git a/(.+?) b/(.+?)$").unwrap());
static HUNK_HEADER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"@@ -(\d+)(?:,(\d+))? \+(\d+)(?:,(\d+))? @@").unwrap());
static CLASS_DEF_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"class\s+(\w+)").unwrap());
static FUNCTION_DEF_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"def\s+(\w+)").unwrap());

/// Directories whose files are never production source
const SKIP_DIRS: &[&str] = &[
    "mlartifacts",
    "artifacts",
    "data",
    "chromadb_data",
    "node_modules",
    "__pycache__",
    ".git",
    "venv",
    "env",
    "frontend",
    "static",
    "templates",
    "vendor",
];

/// Changed lines in the first N lines count as the import section
const IMPORT_SECTION_LINES: usize = 50;

/// File status from the diff header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Added,
    Deleted,
    Modified,
}

/// Per-file classification of what a diff touches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Code,
    ImportOnly,
    CommentOnly,
    Added,
    Deleted,
}

/// One file's worth of parsed diff
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileChange {
    pub file: String,
    pub status: FileStatus,
    pub additions: usize,
    pub deletions: usize,
    pub changed_lines: Vec<usize>,
    pub changed_classes: Vec<String>,
    pub changed_methods: Vec<String>,
}

impl FileChange {
    fn new(file: String, status: FileStatus) -> Self {
        Self {
            file,
            status,
            additions: 0,
            deletions: 0,
            changed_lines: Vec::new(),
            changed_classes: Vec::new(),
            changed_methods: Vec::new(),
        }
    }

    /// Classify what kind of change this file saw
    pub fn change_type(&self) -> ChangeType {
        match self.status {
            FileStatus::Deleted => return ChangeType::Deleted,
            FileStatus::Added => return ChangeType::Added,
            FileStatus::Modified => {}
        }

        let has_code_changes = !self.changed_classes.is_empty()
            || !self.changed_methods.is_empty()
            || self.additions > 0;
        if !has_code_changes {
            return ChangeType::CommentOnly;
        }

        if !self.changed_lines.is_empty()
            && self
                .changed_lines
                .iter()
                .all(|&line| line <= IMPORT_SECTION_LINES)
            && self.changed_classes.is_empty()
            && self.changed_methods.is_empty()
        {
            return ChangeType::ImportOnly;
        }

        ChangeType::Code
    }
}

/// Full parse result of one unified diff
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParsedDiff {
    pub changed_files: Vec<String>,
    pub changed_classes: Vec<String>,
    pub changed_methods: Vec<String>,
    pub file_changes: Vec<FileChange>,
}

/// A changed production function paired with its module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangedFunction {
    pub module: String,
    pub function: String,
}

/// Structured query request handed to the match engine
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchQueries {
    pub changed_functions: Vec<ChangedFunction>,
    pub exact_matches: Vec<String>,
    pub module_matches: Vec<String>,
    pub file_patterns: Vec<String>,
    pub test_file_candidates: Vec<String>,
}

/// Read a diff from disk
pub fn read_diff_file(path: &Path) -> Result<String> {
    if !path.exists() {
        return Err(ImpactError::FileNotFound {
            path: path.display().to_string(),
        });
    }
    Ok(fs::read_to_string(path)?)
}

/// Parse unified diff content.
///
/// Errors with `InputMalformed` when the content carries no recognizable
/// `diff --git` header.
pub fn parse_diff(content: &str) -> Result<ParsedDiff> {
    if content.trim().is_empty() {
        return Err(ImpactError::InputMalformed {
            message: "diff is empty".to_string(),
        });
    }

    let lines: Vec<&str> = content.lines().collect();
    let mut file_changes: Vec<FileChange> = Vec::new();
    let mut changed_files = Vec::new();
    let mut changed_classes = BTreeSet::new();
    let mut changed_methods = BTreeSet::new();

    let mut current: Option<FileChange> = None;
    let mut in_hunk = false;
    let mut old_line = 0usize;
    let mut new_line = 0usize;

    let mut i = 0;
    while i < lines.len() {
        let line = lines[i];

        if let Some(caps) = FILE_HEADER_RE.captures(line) {
            if let Some(finished) = current.take() {
                file_changes.push(finished);
            }

            let old_path = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
            let new_path = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
            let file = if new_path == "/dev/null" {
                old_path.to_string()
            } else {
                new_path.to_string()
            };

            let mut status = FileStatus::Modified;
            if let Some(next) = lines.get(i + 1) {
                if next.contains("new file") {
                    status = FileStatus::Added;
                } else if next.contains("deleted file") {
                    status = FileStatus::Deleted;
                }
            }

            changed_files.push(file.clone());
            current = Some(FileChange::new(file, status));
            in_hunk = false;
            i += 1;
            continue;
        }

        if let Some(caps) = HUNK_HEADER_RE.captures(line) {
            if current.is_some() {
                old_line = caps
                    .get(1)
                    .and_then(|m| m.as_str().parse().ok())
                    .unwrap_or(0);
                new_line = caps
                    .get(3)
                    .and_then(|m| m.as_str().parse().ok())
                    .unwrap_or(0);
                in_hunk = true;
                i += 1;
                continue;
            }
        }

        if in_hunk {
            if let Some(change) = current.as_mut() {
                if let Some(added) = line.strip_prefix('+') {
                    if !line.starts_with("+++") {
                        change.additions += 1;
                        change.changed_lines.push(new_line);

                        // only added lines are scanned for definitions
                        if let Some(caps) = CLASS_DEF_RE.captures(added) {
                            let name = caps[1].to_string();
                            changed_classes.insert(name.clone());
                            if !change.changed_classes.contains(&name) {
                                change.changed_classes.push(name);
                            }
                        }
                        if let Some(caps) = FUNCTION_DEF_RE.captures(added) {
                            let name = caps[1].to_string();
                            changed_methods.insert(name.clone());
                            if !change.changed_methods.contains(&name) {
                                change.changed_methods.push(name);
                            }
                        }
                        new_line += 1;
                    }
                } else if line.starts_with('-') && !line.starts_with("---") {
                    change.deletions += 1;
                    change.changed_lines.push(old_line);
                    old_line += 1;
                } else if line.starts_with(' ') {
                    old_line += 1;
                    new_line += 1;
                }
            }
        }

        i += 1;
    }

    if let Some(finished) = current.take() {
        file_changes.push(finished);
    }

    if file_changes.is_empty() {
        return Err(ImpactError::InputMalformed {
            message: "no `diff --git` header found".to_string(),
        });
    }

    Ok(ParsedDiff {
        changed_files,
        changed_classes: changed_classes.into_iter().collect(),
        changed_methods: changed_methods.into_iter().collect(),
        file_changes,
    })
}

/// Production-file filter: language extension, not a test file, not
/// under an artifact / data / frontend / vendor directory.
pub fn is_production_file(path: &str) -> bool {
    if path.is_empty() || path == "/dev/null" {
        return false;
    }
    if !path.ends_with(".py") {
        return false;
    }

    let normalized = normalize_separators(path).to_lowercase();
    if normalized.contains("test") {
        return false;
    }

    !normalized
        .split('/')
        .any(|component| SKIP_DIRS.contains(&component))
}

/// Derive dotted module-name candidates from a production file path:
/// the full dotted name plus its first segment.
pub fn production_modules_for(path: &str) -> Vec<String> {
    if !is_production_file(path) {
        return Vec::new();
    }

    let trimmed = path.strip_suffix(".py").unwrap_or(path);
    let mut module = normalize_separators(trimmed).replace('/', ".");

    // indexed module paths carry no project prefix
    if let Some(stripped) = module.strip_prefix("backend.") {
        module = stripped.to_string();
    }

    let mut candidates = vec![module.clone()];
    if let Some((first, _)) = module.split_once('.') {
        candidates.push(first.to_string());
    }
    candidates
}

/// Candidate test file names for a production path
pub fn test_file_candidates_for(path: &str) -> Vec<String> {
    if path.is_empty() || path == "/dev/null" || !path.ends_with(".py") {
        return Vec::new();
    }

    let normalized = normalize_separators(path);
    let stem = file_stem(&normalized);
    let mut candidates = BTreeSet::new();

    candidates.insert(format!("test_{stem}.py"));
    candidates.insert(format!("test_{stem}_*.py"));

    if let Some(parent) = parent_dir_name(&normalized) {
        candidates.insert(format!("test_{parent}_{stem}.py"));
    }

    if stem.contains('_') {
        let collapsed = stem.replace('_', "");
        candidates.insert(format!("test_{collapsed}.py"));
    }

    candidates.into_iter().collect()
}

/// Build the structured query request for the match engine
pub fn build_search_queries(file_changes: &[FileChange]) -> SearchQueries {
    let mut changed_functions = Vec::new();
    let mut exact_matches = BTreeSet::new();
    let mut module_matches = BTreeSet::new();
    let mut file_patterns = BTreeSet::new();
    let mut test_file_candidates = BTreeSet::new();

    for change in file_changes {
        let modules = production_modules_for(&change.file);
        if modules.is_empty() {
            continue;
        }
        let change_type = change.change_type();

        for module in &modules {
            exact_matches.insert(module.clone());
            // import-only changes never fan out to module patterns
            if change_type != ChangeType::ImportOnly {
                if let Some((first, _)) = module.split_once('.') {
                    module_matches.insert(format!("{first}.*"));
                }
            }
        }

        let stem = file_stem(&change.file).to_string();
        if !stem.is_empty() {
            file_patterns.insert(stem);
        }

        for candidate in test_file_candidates_for(&change.file) {
            test_file_candidates.insert(candidate);
        }

        // pair every changed function with the full dotted module
        let full_module = &modules[0];
        for method in &change.changed_methods {
            let pair = ChangedFunction {
                module: full_module.clone(),
                function: method.clone(),
            };
            if !changed_functions.contains(&pair) {
                changed_functions.push(pair);
            }
        }
    }

    SearchQueries {
        changed_functions,
        exact_matches: exact_matches.into_iter().collect(),
        module_matches: module_matches.into_iter().collect(),
        file_patterns: file_patterns.into_iter().collect(),
        test_file_candidates: test_file_candidates.into_iter().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_DIFF: &str = "\
diff --git a/agent/langgraph_agent.py b/agent/langgraph_agent.py
index 1111111..2222222 100644
--- a/agent/langgraph_agent.py
+++ b/agent/langgraph_agent.py
@@ -60,7 +60,9 @@ class LangGraphAgent:
     def initialize(self):
-        self.graph = None
+        self.graph = build_graph()
+        self.ready = True
     def shutdown(self):
         pass
diff --git a/frontend/src/ChatPage.tsx b/frontend/src/ChatPage.tsx
index 3333333..4444444 100644
--- a/frontend/src/ChatPage.tsx
+++ b/frontend/src/ChatPage.tsx
@@ -1,3 +1,4 @@
+import React from 'react';
";

    #[test]
    fn test_parse_diff_files_and_counters() {
        let parsed = parse_diff(SAMPLE_DIFF).unwrap();
        assert_eq!(parsed.changed_files.len(), 2);

        let agent = &parsed.file_changes[0];
        assert_eq!(agent.file, "agent/langgraph_agent.py");
        assert_eq!(agent.status, FileStatus::Modified);
        assert_eq!(agent.additions, 2);
        assert_eq!(agent.deletions, 1);
        assert!(agent.changed_lines.contains(&61));
    }

    #[test]
    fn test_added_and_deleted_status() {
        let diff = "\
diff --git a/agent/new_module.py b/agent/new_module.py
new file mode 100644
--- /dev/null
+++ b/agent/new_module.py
@@ -0,0 +1,2 @@
+def fresh():
+    pass
diff --git a/agent/old_module.py b/agent/old_module.py
deleted file mode 100644
--- a/agent/old_module.py
+++ /dev/null
@@ -1,2 +0,0 @@
-def gone():
-    pass
";
        let parsed = parse_diff(diff).unwrap();
        assert_eq!(parsed.file_changes[0].status, FileStatus::Added);
        assert_eq!(parsed.file_changes[0].change_type(), ChangeType::Added);
        assert_eq!(parsed.file_changes[1].status, FileStatus::Deleted);
        assert_eq!(parsed.file_changes[1].change_type(), ChangeType::Deleted);
    }

    #[test]
    fn test_definition_scan_on_added_lines_only() {
        let parsed = parse_diff(SAMPLE_DIFF).unwrap();
        // `def initialize` appears only on a context line; the removed
        // `self.graph = None` is not a definition
        assert!(parsed.changed_methods.is_empty());

        let diff = "\
diff --git a/agent/tool_converter.py b/agent/tool_converter.py
--- a/agent/tool_converter.py
+++ b/agent/tool_converter.py
@@ -100,3 +100,6 @@
+class ToolConverter:
+    def convert(self):
+        pass
";
        let parsed = parse_diff(diff).unwrap();
        assert_eq!(parsed.changed_classes, vec!["ToolConverter"]);
        assert_eq!(parsed.changed_methods, vec!["convert"]);
    }

    #[test]
    fn test_malformed_diff_is_rejected() {
        assert!(matches!(
            parse_diff("this is not a diff at all\n"),
            Err(ImpactError::InputMalformed { .. })
        ));
        assert!(matches!(
            parse_diff("   \n"),
            Err(ImpactError::InputMalformed { .. })
        ));
    }

    #[test]
    fn test_import_only_classification() {
        let mut change = FileChange::new("agent/mcp_client.py".into(), FileStatus::Modified);
        change.additions = 2;
        change.changed_lines = vec![3, 5];
        assert_eq!(change.change_type(), ChangeType::ImportOnly);

        // a touched line past the import section makes it a code change
        change.changed_lines.push(120);
        assert_eq!(change.change_type(), ChangeType::Code);
    }

    #[test]
    fn test_comment_only_classification() {
        let mut change = FileChange::new("agent/x.py".into(), FileStatus::Modified);
        change.deletions = 1;
        change.changed_lines = vec![200];
        assert_eq!(change.change_type(), ChangeType::CommentOnly);
    }

    #[test]
    fn test_production_filter() {
        assert!(is_production_file("agent/langgraph_agent.py"));
        assert!(is_production_file("backend/api/routes.py"));
        assert!(!is_production_file("frontend/src/ChatPage.tsx"));
        assert!(!is_production_file("styles/app.css"));
        assert!(!is_production_file("tests/test_agent.py"));
        assert!(!is_production_file("agent/agent_test.py"));
        assert!(!is_production_file("mlartifacts/run_1/model.py"));
        assert!(!is_production_file("frontend/helpers.py"));
        assert!(!is_production_file("/dev/null"));
    }

    #[test]
    fn test_module_candidates() {
        assert_eq!(
            production_modules_for("agent/agent_pool.py"),
            vec!["agent.agent_pool".to_string(), "agent".to_string()]
        );
        // project prefix stripped
        assert_eq!(
            production_modules_for("backend/agent/agent_pool.py"),
            vec!["agent.agent_pool".to_string(), "agent".to_string()]
        );
        assert!(production_modules_for("frontend/src/ChatPage.tsx").is_empty());
    }

    #[test]
    fn test_test_file_candidates() {
        let candidates = test_file_candidates_for("backend/agent/agent_pool.py");
        assert!(candidates.contains(&"test_agent_pool.py".to_string()));
        assert!(candidates.contains(&"test_agent_agent_pool.py".to_string()));
        assert!(candidates.contains(&"test_agent_pool_*.py".to_string()));
        assert!(candidates.contains(&"test_agentpool.py".to_string()));
    }

    #[test]
    fn test_build_search_queries() {
        let diff = "\
diff --git a/agent/langgraph_agent.py b/agent/langgraph_agent.py
--- a/agent/langgraph_agent.py
+++ b/agent/langgraph_agent.py
@@ -100,3 +100,5 @@
+    def initialize(self):
+        pass
";
        let parsed = parse_diff(diff).unwrap();
        let queries = build_search_queries(&parsed.file_changes);

        assert_eq!(
            queries.changed_functions,
            vec![ChangedFunction {
                module: "agent.langgraph_agent".into(),
                function: "initialize".into(),
            }]
        );
        assert!(queries
            .exact_matches
            .contains(&"agent.langgraph_agent".to_string()));
        assert!(queries.exact_matches.contains(&"agent".to_string()));
        assert!(queries.module_matches.contains(&"agent.*".to_string()));
        assert!(queries
            .test_file_candidates
            .contains(&"test_langgraph_agent.py".to_string()));
    }

    #[test]
    fn test_non_production_changes_issue_no_queries() {
        let diff = "\
diff --git a/frontend/src/App.tsx b/frontend/src/App.tsx
--- a/frontend/src/App.tsx
+++ b/frontend/src/App.tsx
@@ -1,2 +1,3 @@
+const x = 1;
diff --git a/styles/site.css b/styles/site.css
--- a/styles/site.css
+++ b/styles/site.css
@@ -1,1 +1,2 @@
+body { margin: 0; }
";
        let parsed = parse_diff(diff).unwrap();
        let queries = build_search_queries(&parsed.file_changes);
        assert!(queries.exact_matches.is_empty());
        assert!(queries.module_matches.is_empty());
        assert!(queries.test_file_candidates.is_empty());
        assert!(queries.changed_functions.is_empty());
    }

    #[test]
    fn test_import_only_suppresses_module_patterns() {
        let diff = "\
diff --git a/agent/mcp_client.py b/agent/mcp_client.py
--- a/agent/mcp_client.py
+++ b/agent/mcp_client.py
@@ -1,4 +1,5 @@
 import os
+import json
 import sys
";
        let parsed = parse_diff(diff).unwrap();
        assert_eq!(
            parsed.file_changes[0].change_type(),
            ChangeType::ImportOnly
        );
        let queries = build_search_queries(&parsed.file_changes);
        assert!(queries.module_matches.is_empty());
        // direct-file candidates and exact names still fire
        assert!(queries
            .exact_matches
            .contains(&"agent.mcp_client".to_string()));
        assert!(queries
            .test_file_candidates
            .contains(&"test_mcp_client.py".to_string()));
    }
}
