//! Multi-strategy match engine
//!
//! Runs the five AST-based strategies plus the semantic strategy in a
//! fixed order against the fact store. Strategies only ever add tests;
//! every matched test accumulates the list of reasons it was selected,
//! which the scorer later collapses into a confidence score.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::diff::{build_search_queries, ChangeType, FileChange, SearchQueries};
use crate::error::{ImpactError, Result};
use crate::paths::file_stem;
use crate::store::{FactStore, MatchedTestRow};

/// Strategy confidence label attached to each match reason
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    VeryHigh,
    High,
    Medium,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::VeryHigh => "very_high",
            Self::High => "high",
            Self::Medium => "medium",
        }
    }
}

/// One piece of evidence that a test is affected by the diff
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MatchReason {
    FunctionLevel {
        module: String,
        function: String,
        call_type: Option<String>,
        source: Option<String>,
        confidence: Confidence,
    },
    DirectFile {
        test_file: String,
        match_strategy: String,
        confidence: Confidence,
    },
    Integration {
        module: String,
        confidence: Confidence,
    },
    Exact {
        class: String,
        reference_type: String,
        confidence: Confidence,
    },
    Module {
        pattern: String,
        reference_type: String,
        confidence: Confidence,
    },
    Semantic {
        similarity: f32,
        confidence: Confidence,
    },
}

/// A selected test with every reason it matched
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchedTest {
    #[serde(flatten)]
    pub row: MatchedTestRow,
    pub reasons: Vec<MatchReason>,
    /// Filled in by the scorer
    pub confidence_score: i32,
}

/// Result of a query run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatchOutcome {
    pub tests: Vec<MatchedTest>,
    pub total_tests: usize,
}

/// A semantic hit from the vector backend
#[derive(Debug, Clone)]
pub struct SemanticHit {
    pub row: MatchedTestRow,
    pub similarity: f32,
}

/// Semantic strategy hook. The engine only knows this contract; the
/// embedding provider and vector backend live behind it.
pub trait SemanticSearcher {
    fn search(&self, change_description: &str) -> Result<Vec<SemanticHit>>;
}

/// Insertion-ordered accumulator keyed by test id
#[derive(Default)]
struct Accumulator {
    order: Vec<String>,
    tests: HashMap<String, MatchedTest>,
}

impl Accumulator {
    fn add(&mut self, row: MatchedTestRow, reason: MatchReason) {
        let test_id = row.test_id.clone();
        let entry = self.tests.entry(test_id.clone()).or_insert_with(|| {
            self.order.push(test_id);
            MatchedTest {
                row,
                reasons: Vec::new(),
                confidence_score: 0,
            }
        });
        entry.reasons.push(reason);
    }

    fn contains(&self, test_id: &str) -> bool {
        self.tests.contains_key(test_id)
    }

    fn into_outcome(mut self) -> MatchOutcome {
        let tests: Vec<MatchedTest> = self
            .order
            .iter()
            .filter_map(|id| self.tests.remove(id))
            .collect();
        MatchOutcome {
            total_tests: tests.len(),
            tests,
        }
    }
}

/// The match engine, bound to one store connection
pub struct MatchEngine<'a> {
    store: &'a FactStore,
}

impl<'a> MatchEngine<'a> {
    pub fn new(store: &'a FactStore) -> Self {
        Self { store }
    }

    /// Run all strategies (0–4) and return every affected test with its
    /// accumulated match reasons. Semantic search failures degrade to a
    /// warning; the AST result stands on its own.
    pub fn find_affected_tests(
        &self,
        queries: &SearchQueries,
        file_changes: &[FileChange],
        semantic: Option<&dyn SemanticSearcher>,
    ) -> Result<MatchOutcome> {
        let mut acc = Accumulator::default();

        self.run_function_level(queries, &mut acc)?;
        self.run_direct_files(queries, file_changes, &mut acc)?;
        self.run_integration(file_changes, &mut acc)?;
        self.run_exact(queries, &mut acc)?;
        self.run_module_patterns(queries, file_changes, &mut acc)?;

        if let Some(searcher) = semantic {
            self.run_semantic(queries, searcher, &mut acc);
        }

        Ok(acc.into_outcome())
    }

    /// Strategies 0–3 only (used by `diagnose` for comparison runs)
    pub fn find_tests_ast_only(
        &self,
        queries: &SearchQueries,
        file_changes: &[FileChange],
    ) -> Result<MatchOutcome> {
        self.find_affected_tests(queries, file_changes, None)
    }

    /// Semantic strategy alone (used by `diagnose` for comparison runs)
    pub fn find_tests_semantic_only(
        &self,
        queries: &SearchQueries,
        searcher: &dyn SemanticSearcher,
    ) -> Result<MatchOutcome> {
        let mut acc = Accumulator::default();
        self.run_semantic(queries, searcher, &mut acc);
        Ok(acc.into_outcome())
    }

    /// Strategy 0: function-level matching, highest precision
    fn run_function_level(&self, queries: &SearchQueries, acc: &mut Accumulator) -> Result<()> {
        for changed in &queries.changed_functions {
            let rows = self
                .store
                .tests_for_function(&changed.module, &changed.function)?;
            tracing::debug!(
                "function-level: {}.{} -> {} test(s)",
                changed.module,
                changed.function,
                rows.len()
            );
            for row in rows {
                let reason = MatchReason::FunctionLevel {
                    module: changed.module.clone(),
                    function: changed.function.clone(),
                    call_type: row.call_type.clone(),
                    source: row.source.clone(),
                    confidence: Confidence::VeryHigh,
                };
                acc.add(row, reason);
            }
        }
        Ok(())
    }

    /// Strategy 1: direct test files, four sub-strategies per candidate
    fn run_direct_files(
        &self,
        queries: &SearchQueries,
        file_changes: &[FileChange],
        acc: &mut Accumulator,
    ) -> Result<()> {
        if queries.test_file_candidates.is_empty() {
            return Ok(());
        }

        // map the first (full dotted) module of each changed file to its
        // path so sub-strategies 3 and 4 can anchor on it
        let mut module_file_map: Vec<(String, String)> = Vec::new();
        for change in file_changes {
            let modules = crate::diff::production_modules_for(&change.file);
            if let Some(module) = modules.first() {
                module_file_map.push((module.clone(), change.file.clone()));
            }
        }

        let mut matched: Vec<(MatchedTestRow, String, String)> = Vec::new();

        for candidate in &queries.test_file_candidates {
            let core = candidate
                .trim_start_matches("test_")
                .trim_end_matches("_*.py")
                .trim_end_matches("*.py")
                .trim_end_matches(".py");

            // (i) exact filename suffix match
            let exact_file = candidate.replace("*.py", ".py");
            for row in self
                .store
                .tests_by_path_pattern(&format!("%/{exact_file}"))?
            {
                matched.push((row, candidate.clone(), "exact_filename".into()));
            }

            // (ii) wildcard pattern match (parameterized test files)
            if candidate.contains('*') {
                for pattern in [format!("%test_{core}_%"), format!("%test_%{core}%")] {
                    for row in self.store.tests_by_path_pattern(&pattern)? {
                        matched.push((row, candidate.clone(), "pattern_match".into()));
                    }
                }
            }

            // (iii)/(iv) anchored on the changed module and its file
            let anchor = module_file_map
                .iter()
                .find(|(module, path)| module.contains(core) || path.contains(core));
            if let Some((module, path)) = anchor {
                let basename = module.rsplit('.').next().unwrap_or(module);
                for pattern in [format!("%test_{basename}%"), format!("%{basename}%")] {
                    for row in self.store.tests_by_path_pattern(&pattern)? {
                        matched.push((row, candidate.clone(), "module_basename".into()));
                    }
                }

                let stem = file_stem(path);
                for pattern in [format!("%{stem}%"), format!("%test_{stem}%")] {
                    for row in self.store.tests_by_path_pattern(&pattern)? {
                        matched.push((row, candidate.clone(), "file_path_based".into()));
                    }
                }
            }
        }

        let mut seen = std::collections::HashSet::new();
        for (row, _candidate, strategy) in matched {
            if !seen.insert(row.test_id.clone()) {
                continue;
            }
            let reason = MatchReason::DirectFile {
                test_file: row.test_file_path.clone(),
                match_strategy: strategy,
                confidence: Confidence::VeryHigh,
            };
            acc.add(row, reason);
        }
        Ok(())
    }

    /// Strategy 1.5: integration / e2e tests for the changed module.
    /// Import-only changes do not reach integration scope.
    fn run_integration(&self, file_changes: &[FileChange], acc: &mut Accumulator) -> Result<()> {
        for change in file_changes {
            if change.change_type() == ChangeType::ImportOnly {
                continue;
            }
            let modules = crate::diff::production_modules_for(&change.file);
            let Some(module) = modules.first() else {
                continue;
            };
            for row in self.store.integration_tests_for_class(module)? {
                let reason = MatchReason::Integration {
                    module: module.clone(),
                    confidence: Confidence::High,
                };
                acc.add(row, reason);
            }
        }
        Ok(())
    }

    /// Strategy 2: exact class matches, including string refs from
    /// patch/Mock literals
    fn run_exact(&self, queries: &SearchQueries, acc: &mut Accumulator) -> Result<()> {
        for class in &queries.exact_matches {
            let rows = self.store.tests_for_class(class)?;
            for row in rows {
                let reference_type = row
                    .reference_type
                    .clone()
                    .unwrap_or_else(|| "direct_import".to_string());
                let reason = MatchReason::Exact {
                    class: class.clone(),
                    reference_type,
                    confidence: Confidence::High,
                };
                acc.add(row, reason);
            }
        }
        Ok(())
    }

    /// Strategy 3: module patterns, restricted to modules with real code
    /// changes and narrowed to the classes actually touched
    fn run_module_patterns(
        &self,
        queries: &SearchQueries,
        file_changes: &[FileChange],
        acc: &mut Accumulator,
    ) -> Result<()> {
        let mut code_changed_modules: std::collections::HashSet<String> =
            std::collections::HashSet::new();
        let mut module_to_classes: HashMap<String, Vec<String>> = HashMap::new();

        for change in file_changes {
            if change.change_type() != ChangeType::Code {
                continue;
            }
            for class in crate::diff::production_modules_for(&change.file) {
                if let Some((first, _)) = class.split_once('.') {
                    code_changed_modules.insert(first.to_string());
                    let entry = module_to_classes.entry(first.to_string()).or_default();
                    if !entry.contains(&class) {
                        entry.push(class.clone());
                    }
                }
            }
        }

        for pattern in &queries.module_matches {
            let prefix = pattern.trim_end_matches(".*");

            if !code_changed_modules.is_empty() && !code_changed_modules.contains(prefix) {
                tracing::debug!("module pattern {} skipped (import-only changes)", pattern);
                continue;
            }

            let specific = module_to_classes.get(prefix).map(|v| v.as_slice());
            let rows = self.store.tests_for_module_pattern(prefix, true, specific)?;
            for row in rows {
                let reference_type = row
                    .reference_type
                    .clone()
                    .unwrap_or_else(|| "direct_import".to_string());
                let reason = MatchReason::Module {
                    pattern: pattern.clone(),
                    reference_type,
                    confidence: Confidence::Medium,
                };
                acc.add(row, reason);
            }
        }
        Ok(())
    }

    /// Strategy 4: semantic search. Only adds tests not already present;
    /// an unavailable backend degrades to a warning.
    fn run_semantic(
        &self,
        queries: &SearchQueries,
        searcher: &dyn SemanticSearcher,
        acc: &mut Accumulator,
    ) {
        if queries.changed_functions.is_empty() {
            return;
        }

        let description = change_description(queries);
        match searcher.search(&description) {
            Ok(hits) => {
                let mut added = 0;
                for hit in hits {
                    if acc.contains(&hit.row.test_id) {
                        continue;
                    }
                    let reason = MatchReason::Semantic {
                        similarity: hit.similarity,
                        confidence: Confidence::Medium,
                    };
                    acc.add(hit.row, reason);
                    added += 1;
                }
                tracing::info!("semantic search added {} test(s)", added);
            }
            Err(ImpactError::VectorBackendUnavailable { message }) => {
                tracing::warn!("semantic search skipped: {}", message);
            }
            Err(e) => {
                tracing::warn!("semantic search failed: {}", e);
            }
        }
    }
}

/// Human-readable description of the change, embedded as the semantic
/// query: `"Changed functions: f1() in m1, f2() in m2. Module: m1."`
pub fn change_description(queries: &SearchQueries) -> String {
    let functions = queries
        .changed_functions
        .iter()
        .map(|cf| format!("{}() in {}", cf.function, cf.module))
        .collect::<Vec<_>>()
        .join(", ");
    let module = queries
        .changed_functions
        .first()
        .map(|cf| cf.module.as_str())
        .unwrap_or_default();
    format!("Changed functions: {functions}. Module: {module}.")
}

/// Convenience wrapper: parse queries out of file changes and run the
/// full strategy stack.
pub fn select_tests(
    store: &FactStore,
    file_changes: &[FileChange],
    semantic: Option<&dyn SemanticSearcher>,
) -> Result<MatchOutcome> {
    let queries = build_search_queries(file_changes);
    MatchEngine::new(store).find_affected_tests(&queries, file_changes, semantic)
}
