//! Language detection and tree-sitter grammar loading

use std::path::Path;
use tree_sitter::Language;

use crate::error::{ImpactError, Result};

/// Languages the indexer ships a parser for.
///
/// The registry is multi-language by design; Python is the one
/// statically registered parser today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lang {
    Python,
}

impl Lang {
    /// Detect language from file path extension
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .ok_or_else(|| ImpactError::UnsupportedLanguage {
                extension: "none".to_string(),
            })?;

        Self::from_extension(ext)
    }

    /// Detect language from file extension string
    pub fn from_extension(ext: &str) -> Result<Self> {
        match ext.to_lowercase().as_str() {
            "py" | "pyi" => Ok(Self::Python),
            _ => Err(ImpactError::UnsupportedLanguage {
                extension: ext.to_string(),
            }),
        }
    }

    /// Get the canonical name of the language
    pub fn name(&self) -> &'static str {
        match self {
            Self::Python => "python",
        }
    }

    /// Get the tree-sitter Language for parsing
    pub fn tree_sitter_language(&self) -> Language {
        match self {
            Self::Python => tree_sitter_python::LANGUAGE.into(),
        }
    }

    /// Get common file extensions for this language
    pub fn extensions(&self) -> &'static [&'static str] {
        match self {
            Self::Python => &["py", "pyi"],
        }
    }

    /// Default test-file glob patterns for this language
    pub fn test_file_patterns(&self) -> &'static [&'static str] {
        match self {
            Self::Python => &["test_*.py", "*_test.py", "*Test.py"],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_language_detection() {
        assert_eq!(Lang::from_extension("py").unwrap(), Lang::Python);
        assert_eq!(Lang::from_extension("PYI").unwrap(), Lang::Python);
    }

    #[test]
    fn test_language_from_path() {
        let path = PathBuf::from("tests/unit/test_agent.py");
        assert_eq!(Lang::from_path(&path).unwrap(), Lang::Python);
    }

    #[test]
    fn test_unsupported_extension() {
        assert!(Lang::from_extension("tsx").is_err());
        assert!(Lang::from_path(&PathBuf::from("styles.css")).is_err());
        assert!(Lang::from_path(&PathBuf::from("Makefile")).is_err());
    }
}
