//! `tia embed` — generate test embeddings into the vector backend

use super::CommandContext;
use crate::cli::BackendChoice;
use crate::embedding::{create_provider, load_test_profiles, EmbeddingGenerator};
use crate::error::Result;
use crate::vector::create_backend;

pub fn run_embed(ctx: &CommandContext, backend_choice: Option<BackendChoice>) -> Result<String> {
    let profiles = load_test_profiles(&ctx.settings.artifacts_dir(), &ctx.settings)?;
    if profiles.is_empty() {
        return Ok("No tests in the index — run `tia build-index` first.\n".to_string());
    }

    let provider = create_provider(&ctx.settings)?;
    let choice = backend_choice.map(|b| b.as_str());
    let mut backend = create_backend(&ctx.settings, choice)?;

    tracing::info!(
        "embedding {} tests via {} into the {} backend",
        profiles.len(),
        provider.model_name(),
        backend.name()
    );

    let generator = EmbeddingGenerator::new(provider.as_ref());
    let (stored, failed) = generator.generate(&profiles, backend.as_mut())?;

    Ok(format!(
        "Embeddings stored: {stored} | failed: {failed}\nBackend: {} | model: {}\n",
        backend.name(),
        provider.model_name()
    ))
}
