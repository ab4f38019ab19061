//! Language parser registry
//!
//! Each supported language ships one statically registered parser
//! implementing the fixed [`LanguageParser`] capability set. The registry
//! maps a lowercased file extension to exactly one parser; re-registering
//! an extension wins with a warning. The registry is build-once/read-many
//! and is the only in-process state shared across queries.

pub mod python;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tree_sitter::Tree;

pub use python::PythonParser;

/// A parsed source file: the syntax tree plus the source it was built
/// from. Extractors are pure functions over this handle and return plain
/// data structures; the tree never escapes.
pub struct ParsedFile {
    pub source: String,
    pub tree: Tree,
}

/// Import facts for one file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImportFacts {
    /// Plain imports plus the module of every from-import
    pub imports: Vec<String>,
    /// From-imports as `(module, [imported names])`
    pub from_imports: Vec<(String, Vec<String>)>,
    /// Deduplicated union of everything imported
    pub all_imports: Vec<String>,
}

/// One class definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassFacts {
    pub name: String,
    pub bases: Vec<String>,
    pub methods: Vec<String>,
    pub line: usize,
}

/// One function or method definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionFacts {
    pub name: String,
    pub is_async: bool,
    pub parameters: Vec<String>,
    pub decorators: Vec<String>,
    pub class_name: Option<String>,
    pub docstring: Option<String>,
    pub line: usize,
}

impl FunctionFacts {
    /// A function is a test function iff its name begins with `test_`
    pub fn is_test(&self) -> bool {
        self.name.starts_with("test_")
    }
}

/// A declared test method
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestMethodFacts {
    pub name: String,
    pub class_name: Option<String>,
    pub line: usize,
    pub is_async: bool,
}

/// How a call site invokes its target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallKind {
    Direct,
    Method,
}

impl CallKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Method => "method",
        }
    }
}

/// One call site inside a test body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallSite {
    pub function: String,
    /// Leftmost receiver name for a method call
    pub object: Option<String>,
    pub kind: CallKind,
    pub line: usize,
}

/// All call sites recorded for one test method
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCalls {
    pub test_method: String,
    pub calls: Vec<CallSite>,
}

/// Fixed capability set every language parser must provide.
///
/// Extractors are total: unrecognized nodes are ignored silently and no
/// extractor may fail on malformed input.
pub trait LanguageParser: Send + Sync {
    /// Canonical language name (e.g. `python`)
    fn language_name(&self) -> &'static str;

    /// Supported file extensions, without the leading dot
    fn file_extensions(&self) -> &'static [&'static str];

    /// Whether this parser handles the given file
    fn can_parse(&self, path: &Path) -> bool;

    /// Parse a file into a syntax tree.
    ///
    /// Retries up to three times with exponential backoff on transient
    /// acquisition failures (file locked by a syncing tool). Returns
    /// `None` on permanent parse failure — callers skip the file.
    fn parse_file(&self, path: &Path) -> Option<ParsedFile>;

    /// Parse already-read source (used by tests and the diff scanner)
    fn parse_source(&self, source: &str) -> Option<ParsedFile>;

    fn extract_imports(&self, parsed: &ParsedFile) -> ImportFacts;
    fn extract_classes(&self, parsed: &ParsedFile) -> Vec<ClassFacts>;
    fn extract_functions(&self, parsed: &ParsedFile) -> Vec<FunctionFacts>;
    fn extract_test_methods(&self, parsed: &ParsedFile) -> Vec<TestMethodFacts>;
    fn extract_function_calls(&self, parsed: &ParsedFile) -> Vec<TestCalls>;
    fn extract_string_references(&self, parsed: &ParsedFile) -> Vec<String>;

    /// Convert a file path to a dotted module name relative to a root
    fn resolve_module_name(&self, path: &Path, project_root: &Path) -> String;
}

/// Registry mapping file extensions to parsers
#[derive(Default)]
pub struct ParserRegistry {
    parsers: HashMap<&'static str, Arc<dyn LanguageParser>>,
    extensions: HashMap<String, &'static str>,
}

impl ParserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with the built-in parsers
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(PythonParser::new()));
        registry
    }

    /// Register a parser. Extension conflicts are resolved
    /// last-registration-wins with a warning.
    pub fn register(&mut self, parser: Arc<dyn LanguageParser>) {
        let language = parser.language_name();
        for ext in parser.file_extensions() {
            let ext_lower = ext.to_lowercase();
            if let Some(existing) = self.extensions.get(&ext_lower) {
                if *existing != language {
                    tracing::warn!(
                        "extension .{} already mapped to {}, overriding with {}",
                        ext_lower,
                        existing,
                        language
                    );
                }
            }
            self.extensions.insert(ext_lower, language);
        }
        self.parsers.insert(language, parser);
    }

    /// Look up the parser for a file by lowercased suffix only
    pub fn get_parser(&self, path: &Path) -> Option<Arc<dyn LanguageParser>> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        let language = self.extensions.get(&ext)?;
        self.parsers.get(language).cloned()
    }

    /// Detect the registered language for a file, if any
    pub fn detect_language(&self, path: &Path) -> Option<&'static str> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        self.extensions.get(&ext).copied()
    }

    /// Names of all registered languages
    pub fn languages(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.parsers.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

static REGISTRY: Lazy<ParserRegistry> = Lazy::new(ParserRegistry::with_defaults);

/// The shared build-once registry with all built-in parsers
pub fn registry() -> &'static ParserRegistry {
    &REGISTRY
}
