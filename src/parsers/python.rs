//! Python language parser
//!
//! Walks tree-sitter syntax trees to pull out the four kinds of facts the
//! index is built from: imports, classes, functions (with call sites
//! inside test bodies), and string references passed to mocking sinks.
//!
//! Every extractor ignores unrecognized nodes silently; malformed input
//! never fails extraction, it just yields fewer facts.

use std::collections::{BTreeSet, HashSet};
use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;

use once_cell::sync::Lazy;
use tree_sitter::Node;

use super::{
    CallKind, CallSite, ClassFacts, FunctionFacts, ImportFacts, LanguageParser, ParsedFile,
    TestCalls, TestMethodFacts,
};
use crate::lang::Lang;

/// Retry budget for transient file-acquisition failures
const MAX_PARSE_RETRIES: u32 = 3;
/// Base backoff, doubled per attempt
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

/// Test-framework call sites excluded from call extraction
static TEST_FRAMEWORK_FUNCTIONS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "assert",
        "assertEqual",
        "assertNotEqual",
        "assertTrue",
        "assertFalse",
        "assertIn",
        "assertNotIn",
        "assertIs",
        "assertIsNot",
        "assertIsNone",
        "assertIsNotNone",
        "assertRaises",
        "assertRaisesRegex",
        "patch",
        "Mock",
        "MagicMock",
        "AsyncMock",
        "PropertyMock",
        "pytest",
        "fixture",
        "mark",
        "raises",
        "parametrize",
        "setUp",
        "tearDown",
        "setUpClass",
        "tearDownClass",
    ]
    .into_iter()
    .collect()
});

/// Callees whose string-literal arguments are collected as references
static MOCK_SINKS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    ["patch", "Mock", "MagicMock", "PropertyMock", "AsyncMock"]
        .into_iter()
        .collect()
});

/// Python parser backed by tree-sitter
#[derive(Default)]
pub struct PythonParser;

impl PythonParser {
    pub fn new() -> Self {
        Self
    }
}

impl LanguageParser for PythonParser {
    fn language_name(&self) -> &'static str {
        "python"
    }

    fn file_extensions(&self) -> &'static [&'static str] {
        &["py", "pyi"]
    }

    fn can_parse(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| {
                let lower = e.to_lowercase();
                self.file_extensions().contains(&lower.as_str())
            })
            .unwrap_or(false)
    }

    fn parse_file(&self, path: &Path) -> Option<ParsedFile> {
        let mut delay = RETRY_BASE_DELAY;
        for attempt in 0..MAX_PARSE_RETRIES {
            match std::fs::read_to_string(path) {
                Ok(source) => return self.parse_source(&source),
                Err(e) => {
                    let transient = matches!(
                        e.kind(),
                        ErrorKind::PermissionDenied
                            | ErrorKind::WouldBlock
                            | ErrorKind::Interrupted
                            | ErrorKind::TimedOut
                    );
                    if attempt + 1 < MAX_PARSE_RETRIES && transient {
                        tracing::debug!(
                            "transient read failure on {} (attempt {}): {}",
                            path.display(),
                            attempt + 1,
                            e
                        );
                        std::thread::sleep(delay);
                        delay *= 2;
                        continue;
                    }
                    tracing::warn!(
                        "could not read {} after {} attempt(s): {} — skipping",
                        path.display(),
                        attempt + 1,
                        e
                    );
                    return None;
                }
            }
        }
        None
    }

    fn parse_source(&self, source: &str) -> Option<ParsedFile> {
        let mut parser = tree_sitter::Parser::new();
        if parser
            .set_language(&Lang::Python.tree_sitter_language())
            .is_err()
        {
            tracing::warn!("failed to load the python grammar");
            return None;
        }
        let tree = parser.parse(source, None)?;
        Some(ParsedFile {
            source: source.to_string(),
            tree,
        })
    }

    fn extract_imports(&self, parsed: &ParsedFile) -> ImportFacts {
        let source = parsed.source.as_str();
        let mut imports = Vec::new();
        let mut from_imports = Vec::new();

        for_each_node(parsed.tree.root_node(), &mut |node| match node.kind() {
            "import_statement" => {
                let mut cursor = node.walk();
                for child in node.named_children(&mut cursor) {
                    match child.kind() {
                        "dotted_name" => imports.push(node_text(&child, source)),
                        "aliased_import" => {
                            if let Some(name) = child.child_by_field_name("name") {
                                imports.push(node_text(&name, source));
                            }
                        }
                        _ => {}
                    }
                }
            }
            "import_from_statement" => {
                let Some(module_node) = node.child_by_field_name("module_name") else {
                    return;
                };
                // relative imports carry no resolvable module
                if module_node.kind() == "relative_import" {
                    return;
                }
                let module = node_text(&module_node, source);

                let mut names = Vec::new();
                let mut cursor = node.walk();
                for child in node.children_by_field_name("name", &mut cursor) {
                    match child.kind() {
                        "dotted_name" => names.push(node_text(&child, source)),
                        "aliased_import" => {
                            if let Some(name) = child.child_by_field_name("name") {
                                names.push(node_text(&name, source));
                            }
                        }
                        _ => {}
                    }
                }
                // the module itself also joins the flat list
                imports.push(module.clone());
                from_imports.push((module, names));
            }
            _ => {}
        });

        let all_imports: Vec<String> = imports
            .iter()
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        ImportFacts {
            imports,
            from_imports,
            all_imports,
        }
    }

    fn extract_classes(&self, parsed: &ParsedFile) -> Vec<ClassFacts> {
        let source = parsed.source.as_str();
        let mut classes = Vec::new();

        for_each_node(parsed.tree.root_node(), &mut |node| {
            if node.kind() != "class_definition" {
                return;
            }
            let Some(name_node) = node.child_by_field_name("name") else {
                return;
            };

            let mut bases = Vec::new();
            if let Some(superclasses) = node.child_by_field_name("superclasses") {
                let mut cursor = superclasses.walk();
                for base in superclasses.named_children(&mut cursor) {
                    match base.kind() {
                        "identifier" | "attribute" => bases.push(node_text(&base, source)),
                        _ => {}
                    }
                }
            }

            let mut methods = Vec::new();
            if let Some(body) = node.child_by_field_name("body") {
                let mut cursor = body.walk();
                for item in body.named_children(&mut cursor) {
                    if let Some(func) = definition_in(item) {
                        if let Some(fname) = func.child_by_field_name("name") {
                            methods.push(node_text(&fname, source));
                        }
                    }
                }
            }

            classes.push(ClassFacts {
                name: node_text(&name_node, source),
                bases,
                methods,
                line: node.start_position().row + 1,
            });
        });

        classes
    }

    fn extract_functions(&self, parsed: &ParsedFile) -> Vec<FunctionFacts> {
        let source = parsed.source.as_str();
        let mut functions = Vec::new();

        for_each_node(parsed.tree.root_node(), &mut |node| {
            if node.kind() != "function_definition" {
                return;
            }
            let Some(name_node) = node.child_by_field_name("name") else {
                return;
            };

            functions.push(FunctionFacts {
                name: node_text(&name_node, source),
                is_async: is_async_def(&node),
                parameters: parameter_names(&node, source),
                decorators: decorator_names(&node, source),
                class_name: enclosing_class(&node, source),
                docstring: docstring_of(&node, source),
                line: node.start_position().row + 1,
            });
        });

        functions
    }

    fn extract_test_methods(&self, parsed: &ParsedFile) -> Vec<TestMethodFacts> {
        self.extract_functions(parsed)
            .into_iter()
            .filter(|f| f.is_test())
            .map(|f| TestMethodFacts {
                name: f.name,
                class_name: f.class_name,
                line: f.line,
                is_async: f.is_async,
            })
            .collect()
    }

    fn extract_function_calls(&self, parsed: &ParsedFile) -> Vec<TestCalls> {
        let source = parsed.source.as_str();
        let mut per_test = Vec::new();

        for_each_node(parsed.tree.root_node(), &mut |node| {
            if node.kind() != "function_definition" {
                return;
            }
            let Some(name_node) = node.child_by_field_name("name") else {
                return;
            };
            let test_name = node_text(&name_node, source);
            if !test_name.starts_with("test_") {
                return;
            }

            let mut calls = Vec::new();
            for_each_node(node, &mut |child| {
                if child.kind() != "call" {
                    return;
                }
                let Some(callee) = child.child_by_field_name("function") else {
                    return;
                };
                let (function, object, kind) = match callee.kind() {
                    "identifier" => (node_text(&callee, source), None, CallKind::Direct),
                    "attribute" => {
                        let Some(attr) = callee.child_by_field_name("attribute") else {
                            return;
                        };
                        let object = callee
                            .child_by_field_name("object")
                            .and_then(|o| leftmost_name(&o, source));
                        (node_text(&attr, source), object, CallKind::Method)
                    }
                    _ => return,
                };

                if TEST_FRAMEWORK_FUNCTIONS.contains(function.as_str()) {
                    return;
                }

                calls.push(CallSite {
                    function,
                    object,
                    kind,
                    line: child.start_position().row + 1,
                });
            });

            if !calls.is_empty() {
                per_test.push(TestCalls {
                    test_method: test_name,
                    calls,
                });
            }
        });

        per_test
    }

    fn extract_string_references(&self, parsed: &ParsedFile) -> Vec<String> {
        let source = parsed.source.as_str();
        let mut refs = BTreeSet::new();

        // decorated forms (`@patch('…')`) are plain call nodes in the
        // tree, so one walk covers decorators and bodies alike
        for_each_node(parsed.tree.root_node(), &mut |node| {
            if node.kind() != "call" {
                return;
            }
            let Some(callee) = node.child_by_field_name("function") else {
                return;
            };
            if !is_mock_sink(&callee, source) {
                return;
            }
            let Some(args) = node.child_by_field_name("arguments") else {
                return;
            };
            let mut cursor = args.walk();
            for arg in args.named_children(&mut cursor) {
                if arg.kind() != "string" {
                    continue;
                }
                if let Some(value) = string_literal_value(&arg, source) {
                    if is_symbol_reference(&value) {
                        refs.insert(value);
                    }
                }
            }
        });

        refs.into_iter().collect()
    }

    fn resolve_module_name(&self, path: &Path, project_root: &Path) -> String {
        match path.strip_prefix(project_root) {
            Ok(relative) => {
                let mut parts: Vec<String> = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().to_string())
                    .collect();
                if let Some(last) = parts.last_mut() {
                    let stem = last
                        .strip_suffix(".py")
                        .or_else(|| last.strip_suffix(".pyi"))
                        .map(|s| s.to_string());
                    if let Some(stem) = stem {
                        *last = stem;
                    }
                }
                parts.join(".")
            }
            Err(_) => path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default(),
        }
    }
}

// ============================================================================
// Node helpers
// ============================================================================

/// Pre-order visit of every node in a subtree
fn for_each_node<'a>(root: Node<'a>, f: &mut dyn FnMut(Node<'a>)) {
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        f(node);
        for i in (0..node.child_count()).rev() {
            if let Some(child) = node.child(i) {
                stack.push(child);
            }
        }
    }
}

fn node_text(node: &Node, source: &str) -> String {
    node.utf8_text(source.as_bytes())
        .unwrap_or_default()
        .to_string()
}

/// `async def` keeps the `async` keyword as the first child token
fn is_async_def(node: &Node) -> bool {
    node.child(0).map(|c| c.kind() == "async").unwrap_or(false)
}

/// Unwrap a possibly-decorated statement down to a function definition
fn definition_in(node: Node) -> Option<Node> {
    match node.kind() {
        "function_definition" => Some(node),
        "decorated_definition" => {
            let def = node.child_by_field_name("definition")?;
            (def.kind() == "function_definition").then_some(def)
        }
        _ => None,
    }
}

fn parameter_names(func: &Node, source: &str) -> Vec<String> {
    let mut names = Vec::new();
    let Some(params) = func.child_by_field_name("parameters") else {
        return names;
    };
    let mut cursor = params.walk();
    for param in params.named_children(&mut cursor) {
        match param.kind() {
            "identifier" => names.push(node_text(&param, source)),
            "typed_parameter" => {
                let mut inner = param.walk();
                for c in param.named_children(&mut inner) {
                    if c.kind() == "identifier" {
                        names.push(node_text(&c, source));
                        break;
                    }
                }
            }
            "default_parameter" | "typed_default_parameter" => {
                if let Some(name) = param.child_by_field_name("name") {
                    names.push(node_text(&name, source));
                }
            }
            "list_splat_pattern" | "dictionary_splat_pattern" => {
                let mut inner = param.walk();
                for c in param.named_children(&mut inner) {
                    if c.kind() == "identifier" {
                        names.push(node_text(&c, source));
                    }
                }
            }
            _ => {}
        }
    }
    names
}

/// Qualified decorator names for a function, reconstructed from the
/// enclosing `decorated_definition` if present.
fn decorator_names(func: &Node, source: &str) -> Vec<String> {
    let mut decorators = Vec::new();
    let Some(parent) = func.parent() else {
        return decorators;
    };
    if parent.kind() != "decorated_definition" {
        return decorators;
    }
    let mut cursor = parent.walk();
    for child in parent.named_children(&mut cursor) {
        if child.kind() != "decorator" {
            continue;
        }
        let mut inner = child.walk();
        for expr in child.named_children(&mut inner) {
            match expr.kind() {
                "identifier" | "attribute" => decorators.push(node_text(&expr, source)),
                "call" => {
                    if let Some(callee) = expr.child_by_field_name("function") {
                        decorators.push(node_text(&callee, source));
                    }
                }
                _ => {}
            }
        }
    }
    decorators
}

/// Name of the nearest enclosing class, if this is a method
fn enclosing_class(node: &Node, source: &str) -> Option<String> {
    let mut current = node.parent();
    while let Some(parent) = current {
        if parent.kind() == "class_definition" {
            return parent
                .child_by_field_name("name")
                .map(|n| node_text(&n, source));
        }
        current = parent.parent();
    }
    None
}

/// Leading docstring of a function body, if any
fn docstring_of(func: &Node, source: &str) -> Option<String> {
    let body = func.child_by_field_name("body")?;
    let first = body.named_child(0)?;
    if first.kind() != "expression_statement" {
        return None;
    }
    let expr = first.named_child(0)?;
    if expr.kind() != "string" {
        return None;
    }
    let value = string_literal_value(&expr, source)?;
    let trimmed = value.trim().to_string();
    (!trimmed.is_empty()).then_some(trimmed)
}

/// Leftmost identifier of a receiver path (`a.b.c()` → `a`)
fn leftmost_name(node: &Node, source: &str) -> Option<String> {
    let mut current = *node;
    while current.kind() == "attribute" {
        current = current.child_by_field_name("object")?;
    }
    (current.kind() == "identifier").then(|| node_text(&current, source))
}

/// Whether a callee is one of the mocking constructors, bare or as the
/// final attribute segment (`mock.patch`, `unittest.mock.MagicMock`).
fn is_mock_sink(callee: &Node, source: &str) -> bool {
    match callee.kind() {
        "identifier" => MOCK_SINKS.contains(node_text(callee, source).as_str()),
        "attribute" => callee
            .child_by_field_name("attribute")
            .map(|a| MOCK_SINKS.contains(node_text(&a, source).as_str()))
            .unwrap_or(false),
        _ => false,
    }
}

/// Literal value of a string node, with quote and prefix characters
/// stripped. Returns `None` for f-strings with interpolations.
fn string_literal_value(node: &Node, source: &str) -> Option<String> {
    let mut value = String::new();
    let mut cursor = node.walk();
    let mut saw_content = false;
    for child in node.children(&mut cursor) {
        match child.kind() {
            "string_content" => {
                saw_content = true;
                value.push_str(&node_text(&child, source));
            }
            "interpolation" => return None,
            _ => {}
        }
    }
    if saw_content {
        return Some(value);
    }
    // empty string literal ('' or "")
    Some(String::new())
}

/// String references must look like dotted symbol paths, not URLs or
/// filesystem paths.
fn is_symbol_reference(value: &str) -> bool {
    value.contains('.')
        && !value.starts_with("http")
        && !value.starts_with('/')
        && !value.starts_with('\\')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> ParsedFile {
        PythonParser::new().parse_source(source).unwrap()
    }

    #[test]
    fn test_extract_plain_and_from_imports() {
        let parsed = parse(
            r#"
import os
import agent.langgraph_agent
from agent.tool_converter import ToolConverter, convert
from . import helpers
"#,
        );
        let facts = PythonParser::new().extract_imports(&parsed);

        assert!(facts.imports.contains(&"os".to_string()));
        assert!(facts.imports.contains(&"agent.langgraph_agent".to_string()));
        // from-import module joins the flat list too
        assert!(facts.imports.contains(&"agent.tool_converter".to_string()));
        assert_eq!(facts.from_imports.len(), 1);
        assert_eq!(facts.from_imports[0].0, "agent.tool_converter");
        assert_eq!(
            facts.from_imports[0].1,
            vec!["ToolConverter".to_string(), "convert".to_string()]
        );
        // relative import is skipped entirely
        assert!(!facts.all_imports.iter().any(|i| i.contains("helpers")));
    }

    #[test]
    fn test_extract_aliased_imports_keep_original_name() {
        let parsed = parse("import numpy as np\nfrom agent.state import State as S\n");
        let facts = PythonParser::new().extract_imports(&parsed);
        assert!(facts.imports.contains(&"numpy".to_string()));
        assert_eq!(facts.from_imports[0].1, vec!["State".to_string()]);
    }

    #[test]
    fn test_extract_classes_with_bases_and_methods() {
        let parsed = parse(
            r#"
class TestAgent(unittest.TestCase):
    def setUp(self):
        pass

    def test_init(self):
        pass

    async def test_run(self):
        pass
"#,
        );
        let classes = PythonParser::new().extract_classes(&parsed);
        assert_eq!(classes.len(), 1);
        assert_eq!(classes[0].name, "TestAgent");
        assert_eq!(classes[0].bases, vec!["unittest.TestCase".to_string()]);
        assert_eq!(classes[0].methods, vec!["setUp", "test_init", "test_run"]);
        assert_eq!(classes[0].line, 2);
    }

    #[test]
    fn test_extract_decorated_methods_are_listed() {
        let parsed = parse(
            r#"
class TestX:
    @pytest.mark.asyncio
    async def test_y(self):
        pass
"#,
        );
        let classes = PythonParser::new().extract_classes(&parsed);
        assert_eq!(classes[0].methods, vec!["test_y"]);
    }

    #[test]
    fn test_extract_functions_records_async_params_decorators() {
        let parsed = parse(
            r#"
@pytest.mark.asyncio
@patch('agent.langgraph_agent.LangGraphAgent')
async def test_initialize(mock_agent, config=None):
    """Agent initializes cleanly."""
    pass
"#,
        );
        let functions = PythonParser::new().extract_functions(&parsed);
        assert_eq!(functions.len(), 1);
        let f = &functions[0];
        assert_eq!(f.name, "test_initialize");
        assert!(f.is_async);
        assert_eq!(f.parameters, vec!["mock_agent", "config"]);
        assert!(f.decorators.contains(&"pytest.mark.asyncio".to_string()));
        assert!(f.decorators.contains(&"patch".to_string()));
        assert_eq!(f.docstring.as_deref(), Some("Agent initializes cleanly."));
        assert!(f.class_name.is_none());
    }

    #[test]
    fn test_methods_know_their_class() {
        let parsed = parse(
            r#"
class TestAgent:
    def test_one(self):
        pass

def test_free():
    pass
"#,
        );
        let tests = PythonParser::new().extract_test_methods(&parsed);
        assert_eq!(tests.len(), 2);
        assert_eq!(tests.iter().filter(|t| t.class_name.is_some()).count(), 1);
        let method = tests.iter().find(|t| t.name == "test_one").unwrap();
        assert_eq!(method.class_name.as_deref(), Some("TestAgent"));
    }

    #[test]
    fn test_call_sites_inside_test_bodies() {
        let parsed = parse(
            r#"
def test_agent_flow():
    agent = build_agent()
    agent.initialize()
    result = agent.graph.invoke(state)
    assertEqual(result, None)
"#,
        );
        let calls = PythonParser::new().extract_function_calls(&parsed);
        assert_eq!(calls.len(), 1);
        let sites = &calls[0].calls;

        let direct = sites.iter().find(|c| c.function == "build_agent").unwrap();
        assert_eq!(direct.kind, CallKind::Direct);
        assert!(direct.object.is_none());

        let method = sites.iter().find(|c| c.function == "initialize").unwrap();
        assert_eq!(method.kind, CallKind::Method);
        assert_eq!(method.object.as_deref(), Some("agent"));

        // receiver path collapses to its leftmost name
        let nested = sites.iter().find(|c| c.function == "invoke").unwrap();
        assert_eq!(nested.object.as_deref(), Some("agent"));

        // framework helpers are excluded
        assert!(!sites.iter().any(|c| c.function == "assertEqual"));
    }

    #[test]
    fn test_non_test_functions_are_not_visited() {
        let parsed = parse(
            r#"
def helper():
    dangerous_call()

def test_nothing():
    pass
"#,
        );
        let calls = PythonParser::new().extract_function_calls(&parsed);
        assert!(calls.is_empty());
    }

    #[test]
    fn test_string_references_from_patch_calls_and_decorators() {
        let parsed = parse(
            r#"
@patch('agent.langgraph_agent.LangGraphAgent')
def test_agent(mock_cls):
    with patch('agent.mcp_client.McpClient.connect'):
        m = MagicMock('llm.factory.LLMFactory')
    patch('http://localhost:11434/api')
    patch('/tmp/some/path.py')
    patch('noperiod')
"#,
        );
        let refs = PythonParser::new().extract_string_references(&parsed);
        assert_eq!(
            refs,
            vec![
                "agent.langgraph_agent.LangGraphAgent".to_string(),
                "agent.mcp_client.McpClient.connect".to_string(),
                "llm.factory.LLMFactory".to_string(),
            ]
        );
    }

    #[test]
    fn test_string_references_final_attribute_segment() {
        let parsed = parse(
            r#"
def test_x():
    unittest.mock.patch('agent.state_converter.StateConverter')
"#,
        );
        let refs = PythonParser::new().extract_string_references(&parsed);
        assert_eq!(
            refs,
            vec!["agent.state_converter.StateConverter".to_string()]
        );
    }

    #[test]
    fn test_resolve_module_name() {
        let parser = PythonParser::new();
        let module = parser.resolve_module_name(
            Path::new("/project/agent/langgraph_agent.py"),
            Path::new("/project"),
        );
        assert_eq!(module, "agent.langgraph_agent");

        // outside the root falls back to the stem
        let fallback =
            parser.resolve_module_name(Path::new("/elsewhere/util.py"), Path::new("/project"));
        assert_eq!(fallback, "util");
    }

    #[test]
    fn test_malformed_input_extracts_nothing_but_does_not_fail() {
        let parsed = parse("def broken(:\n    ???\nclass \n");
        let parser = PythonParser::new();
        let _ = parser.extract_imports(&parsed);
        let _ = parser.extract_classes(&parsed);
        let _ = parser.extract_functions(&parsed);
        let _ = parser.extract_string_references(&parsed);
    }
}
