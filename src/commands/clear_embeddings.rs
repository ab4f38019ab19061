//! `tia clear-embeddings` — drop every stored vector

use super::CommandContext;
use crate::cli::BackendChoice;
use crate::error::Result;
use crate::vector::create_backend;

pub fn run_clear_embeddings(
    ctx: &CommandContext,
    backend_choice: Option<BackendChoice>,
) -> Result<String> {
    let choice = backend_choice.map(|b| b.as_str());
    let mut backend = create_backend(&ctx.settings, choice)?;
    let removed = backend.clear()?;
    Ok(format!(
        "Cleared {} embedding(s) from the {} backend.\n",
        removed,
        backend.name()
    ))
}
