//! Stage 5: extract function calls
//!
//! Derives function-level mappings from (a) call sites inside test
//! bodies after object→module resolution against from-imports and
//! (b) string references split on the last dot. Rows whose module cannot
//! be resolved are discarded — callers rely on string references for
//! precise matching.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::{is_production_import, PipelineContext};
use crate::artifacts::{read_artifact, write_artifact, STAGE_FUNCTION_CALLS, STAGE_REGISTRY};
use crate::error::Result;
use crate::parsers::{registry as parser_registry, ImportFacts, TestCalls};
use crate::pipeline::registry::RegistryData;
use crate::store::{FactStore, FunctionMappingRow};

/// Stage 5 artifact payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCallData {
    pub total_tests: usize,
    pub tests_with_function_calls: usize,
    pub total_mappings: usize,
    pub discarded_unresolved: usize,
    pub mappings: Vec<FunctionMappingRow>,
}

/// Facts needed from one parsed test file
struct FileFacts {
    calls: Vec<TestCalls>,
    imports: ImportFacts,
    string_refs: Vec<String>,
}

fn parse_file_facts(path: &PathBuf) -> Option<FileFacts> {
    let parsers = parser_registry();
    let parser = parsers.get_parser(path)?;
    let parsed = parser.parse_file(path)?;
    Some(FileFacts {
        calls: parser.extract_function_calls(&parsed),
        imports: parser.extract_imports(&parsed),
        string_refs: parser.extract_string_references(&parsed),
    })
}

/// Resolve a call receiver to the module that exported it. Only
/// from-imports are consulted; anything else stays unresolved.
fn resolve_object_to_module(object: &str, imports: &ImportFacts) -> Option<String> {
    for (module, names) in &imports.from_imports {
        if names.iter().any(|n| n == object) && is_production_import(module) {
            return Some(module.clone());
        }
    }
    None
}

/// Split a string reference on its last dot into `(module, symbol)`.
/// The module segment must itself contain a dot — single-word modules
/// are too broad to be useful.
pub fn split_string_reference(string_ref: &str) -> Option<(String, String)> {
    let (module, symbol) = string_ref.rsplit_once('.')?;
    if !module.contains('.') {
        return None;
    }
    if !is_production_import(module) {
        return None;
    }
    Some((module.to_string(), symbol.to_string()))
}

pub fn run(ctx: &PipelineContext, store: &mut FactStore) -> Result<FunctionCallData> {
    let registry: RegistryData = read_artifact(&ctx.artifacts_dir, STAGE_REGISTRY)?;

    // group tests by file
    let mut tests_by_file: BTreeMap<String, Vec<&crate::store::TestRow>> = BTreeMap::new();
    for test in &registry.tests {
        tests_by_file
            .entry(test.file_path.clone())
            .or_default()
            .push(test);
    }

    let facts_by_file: BTreeMap<String, FileFacts> = tests_by_file
        .keys()
        .cloned()
        .collect::<Vec<_>>()
        .par_iter()
        .filter_map(|path| {
            let facts = parse_file_facts(&PathBuf::from(path))?;
            Some((path.clone(), facts))
        })
        .collect::<Vec<_>>()
        .into_iter()
        .collect();

    let mut seen = BTreeSet::new();
    let mut mappings = Vec::new();
    let mut discarded_unresolved = 0usize;

    for (file_path, tests) in &tests_by_file {
        let Some(facts) = facts_by_file.get(file_path) else {
            continue;
        };
        let calls_by_method: BTreeMap<&str, &TestCalls> = facts
            .calls
            .iter()
            .map(|tc| (tc.test_method.as_str(), tc))
            .collect();

        for test in tests {
            // call sites in this test's body
            if let Some(test_calls) = calls_by_method.get(test.method_name.as_str()) {
                for call in &test_calls.calls {
                    let module = call
                        .object
                        .as_deref()
                        .and_then(|o| resolve_object_to_module(o, &facts.imports));
                    let Some(module) = module else {
                        discarded_unresolved += 1;
                        continue;
                    };
                    let row = FunctionMappingRow {
                        test_id: test.test_id.clone(),
                        module_name: module,
                        function_name: call.function.clone(),
                        call_type: call.kind.as_str().to_string(),
                        source: "method_call".to_string(),
                    };
                    push_unique(&mut mappings, &mut seen, row);
                }
            }

            // string references apply file-wide: a patched path guards
            // every test in the file
            for string_ref in &facts.string_refs {
                let Some((module, symbol)) = split_string_reference(string_ref) else {
                    continue;
                };
                let row = FunctionMappingRow {
                    test_id: test.test_id.clone(),
                    module_name: module,
                    function_name: symbol,
                    call_type: "patch_ref".to_string(),
                    source: "patch_ref".to_string(),
                };
                push_unique(&mut mappings, &mut seen, row);
            }
        }
    }

    let scope: Vec<String> = registry.tests.iter().map(|t| t.test_id.clone()).collect();
    store.replace_function_mappings(&scope, &mappings)?;

    let tests_with_function_calls = mappings
        .iter()
        .map(|m| m.test_id.as_str())
        .collect::<BTreeSet<_>>()
        .len();

    let data = FunctionCallData {
        total_tests: registry.tests.len(),
        tests_with_function_calls,
        total_mappings: mappings.len(),
        discarded_unresolved,
        mappings,
    };
    write_artifact(&ctx.artifacts_dir, STAGE_FUNCTION_CALLS, &data)?;
    Ok(data)
}

fn push_unique(
    mappings: &mut Vec<FunctionMappingRow>,
    seen: &mut BTreeSet<(String, String, String, String)>,
    row: FunctionMappingRow,
) {
    let key = (
        row.test_id.clone(),
        row.module_name.clone(),
        row.function_name.clone(),
        row.source.clone(),
    );
    if seen.insert(key) {
        mappings.push(row);
    }
}
