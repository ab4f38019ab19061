//! CLI argument definitions using clap

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Static test-impact analyzer
#[derive(Parser, Debug)]
#[command(name = "tia")]
#[command(about = "Selects the minimal set of tests affected by a code change")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Show verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Root directory for persisted state (database, artifacts, vectors)
    #[arg(long, global = true, value_name = "PATH", env = "TIA_DATA_DIR")]
    pub data_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Index a test tree: run pipeline stages 1-8
    BuildIndex {
        /// Test-tree root to index
        #[arg(long, value_name = "PATH", env = "TIA_TEST_REPO")]
        test_repo: Option<PathBuf>,
    },

    /// Generate (or regenerate) test embeddings in the vector backend
    Embed {
        /// Vector backend override
        #[arg(long, value_enum)]
        backend: Option<BackendChoice>,
    },

    /// Select the tests affected by a unified diff
    Select {
        /// Path to a `diff --git` file
        #[arg(value_name = "DIFF_FILE")]
        diff_file: PathBuf,

        /// Skip the semantic strategy even when a backend is configured
        #[arg(long)]
        no_semantic: bool,
    },

    /// Compare on-disk test files against the index
    Verify {
        #[arg(long, value_name = "PATH", env = "TIA_TEST_REPO")]
        test_repo: Option<PathBuf>,
    },

    /// Index only the files missing from the store
    Reindex {
        #[arg(long, value_name = "PATH", env = "TIA_TEST_REPO")]
        test_repo: Option<PathBuf>,
    },

    /// Explain why expected tests may be missing for a diff
    Diagnose {
        /// Optional diff to diagnose against
        #[arg(value_name = "DIFF_FILE")]
        diff_file: Option<PathBuf>,
    },

    /// Find (and optionally remove) duplicate test rows
    Deduplicate {
        /// Actually delete duplicates instead of reporting them
        #[arg(long)]
        remove_duplicates: bool,
    },

    /// Drop every stored embedding
    ClearEmbeddings {
        /// Vector backend override
        #[arg(long, value_enum)]
        backend: Option<BackendChoice>,
    },
}

/// Vector backend selector
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum BackendChoice {
    Chromadb,
    Pgvector,
}

impl BackendChoice {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chromadb => "chromadb",
            Self::Pgvector => "pgvector",
        }
    }
}

impl Cli {
    /// Parse CLI arguments from the command line
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
