#![allow(clippy::type_complexity)]
#![allow(clippy::too_many_arguments)]

//! tia-engine: static test-impact analysis
//!
//! Indexes a test tree into a persistent fact store linking each test to
//! the production symbols it exercises (by import, by mocking string, by
//! call-site), then maps the symbols touched by a unified diff back to
//! the smallest set of tests whose behavior could be affected, ranked by
//! confidence.
//!
//! # Example
//!
//! ```ignore
//! use tia_engine::diff::{parse_diff, build_search_queries};
//! use tia_engine::matcher::MatchEngine;
//! use tia_engine::score::{rank_tests, build_run_plans};
//! use tia_engine::store::FactStore;
//!
//! let store = FactStore::open("planon1.sqlite3".as_ref(), "planon1")?;
//! let parsed = parse_diff(&std::fs::read_to_string("change.diff")?)?;
//! let queries = build_search_queries(&parsed.file_changes);
//!
//! let engine = MatchEngine::new(&store);
//! let mut outcome = engine.find_affected_tests(&queries, &parsed.file_changes, None)?;
//! rank_tests(&mut outcome);
//! let plans = build_run_plans(&outcome, store.count_tests()?);
//! println!("{}", plans.run_high_cmd);
//! ```

pub mod artifacts;
pub mod cli;
pub mod commands;
pub mod config;
pub mod dedup;
pub mod diff;
pub mod embedding;
pub mod error;
pub mod lang;
pub mod matcher;
pub mod parsers;
pub mod paths;
pub mod pipeline;
pub mod report;
pub mod scanner;
pub mod score;
pub mod store;
pub mod vector;

// Re-export commonly used types
pub use cli::{Cli, Command};
pub use config::Settings;
pub use error::{ImpactError, Result};
pub use lang::Lang;

pub use parsers::{
    registry, LanguageParser, ParsedFile, ParserRegistry, PythonParser,
};

pub use scanner::{categorize_path, is_test_file_name, scan_directory, TestCategory};

pub use store::{
    DependencyRow, FactStore, FunctionMappingRow, MatchedTestRow, MetadataRow, ReverseIndexRow,
    StructureRow, TestRow,
};

pub use diff::{
    build_search_queries, parse_diff, read_diff_file, ChangeType, ChangedFunction, FileChange,
    FileStatus, ParsedDiff, SearchQueries,
};

pub use matcher::{
    select_tests, MatchEngine, MatchOutcome, MatchReason, MatchedTest, SemanticHit,
    SemanticSearcher,
};

pub use score::{
    build_run_plans, confidence_score, node_id, rank_tests, RunPlans,
    HIGH_CONFIDENCE_THRESHOLD,
};

pub use embedding::{
    build_embedding_text, create_provider, EmbeddingGenerator, EmbeddingProvider, OllamaProvider,
    SemanticSearch, TestProfile,
};

pub use vector::{create_backend, EmbeddedBackend, RelationalBackend, SemanticMatch, VectorBackend};

pub use dedup::{
    find_duplicates, normalize_for_dedup, reindex_missing, remove_duplicates, verify_indexing,
};

pub use pipeline::{run_all as run_pipeline, PipelineContext, PipelineSummary};
