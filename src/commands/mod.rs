//! Command modules for the tia CLI
//!
//! Each module implements one subcommand. Handlers take a shared
//! [`CommandContext`] and return the text to print; `main` owns process
//! exit codes.

pub mod build_index;
pub mod clear_embeddings;
pub mod deduplicate;
pub mod diagnose;
pub mod embed;
pub mod reindex;
pub mod select;
pub mod verify;

pub use build_index::run_build_index;
pub use clear_embeddings::run_clear_embeddings;
pub use deduplicate::run_deduplicate;
pub use diagnose::run_diagnose;
pub use embed::run_embed;
pub use reindex::run_reindex;
pub use select::run_select;
pub use verify::run_verify;

use crate::config::Settings;
use crate::error::Result;
use crate::store::FactStore;

/// Shared context passed to all command handlers
#[derive(Debug, Clone)]
pub struct CommandContext {
    pub settings: Settings,
    pub verbose: bool,
}

impl CommandContext {
    pub fn new(settings: Settings, verbose: bool) -> Self {
        Self { settings, verbose }
    }

    /// Open the fact store for this context
    pub fn open_store(&self) -> Result<FactStore> {
        FactStore::open(&self.settings.database_path(), &self.settings.db_schema)
    }
}
