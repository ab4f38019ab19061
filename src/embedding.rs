//! Embedding generation for semantic test search
//!
//! Builds a descriptive text per test (name, purpose, module under test,
//! functions tested, markers), obtains vectors from the configured
//! embedding service, and upserts them into the vector backend. The
//! service contract is one vector per text; per-text failures are
//! skipped, never partially written.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::artifacts::{
    read_artifact, STAGE_FUNCTION_CALLS, STAGE_METADATA, STAGE_REGISTRY,
};
use crate::config::{Settings, EMBEDDING_BATCH_SIZE};
use crate::error::{ImpactError, Result};
use crate::matcher::{SemanticHit, SemanticSearcher};
use crate::paths::normalize_separators;
use crate::pipeline::function_calls::FunctionCallData;
use crate::pipeline::metadata::MetadataData;
use crate::pipeline::registry::RegistryData;
use crate::store::MatchedTestRow;
use crate::vector::VectorBackend;

/// Everything the embedding text and vector metadata need for one test
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestProfile {
    pub test_id: String,
    pub method_name: String,
    pub class_name: Option<String>,
    pub test_type: String,
    pub file_path: String,
    pub module: String,
    pub description: String,
    pub markers: Vec<String>,
    pub is_async: bool,
    /// Up to the full set of `(module, function)` pairs; the text
    /// builder takes the first ten
    pub functions_tested: Vec<(String, String)>,
}

/// `embed(texts) -> vectors` contract with the external service
pub trait EmbeddingProvider: Send + Sync {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
    fn model_name(&self) -> &str;
}

/// Ollama embedding client (`POST /api/embeddings`, one text per call)
pub struct OllamaProvider {
    base_url: String,
    model: String,
    client: reqwest::blocking::Client,
}

#[derive(Serialize)]
struct OllamaEmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct OllamaEmbeddingResponse {
    #[serde(default)]
    embedding: Vec<f32>,
}

impl OllamaProvider {
    pub fn new(base_url: &str, model: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            client: reqwest::blocking::Client::new(),
        }
    }

    fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let response = self
            .client
            .post(format!("{}/api/embeddings", self.base_url))
            .json(&OllamaEmbeddingRequest {
                model: &self.model,
                prompt: text,
            })
            .send()
            .map_err(|e| ImpactError::EmbeddingFailure {
                message: format!("request failed: {e}"),
            })?;

        let response = response
            .error_for_status()
            .map_err(|e| ImpactError::EmbeddingFailure {
                message: format!("service returned error: {e}"),
            })?;

        let body: OllamaEmbeddingResponse =
            response.json().map_err(|e| ImpactError::EmbeddingFailure {
                message: format!("bad response body: {e}"),
            })?;

        if body.embedding.is_empty() {
            return Err(ImpactError::EmbeddingFailure {
                message: "service returned no embedding".to_string(),
            });
        }
        Ok(body.embedding)
    }
}

impl EmbeddingProvider for OllamaProvider {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed_one(t)).collect()
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Instantiate the configured embedding provider
pub fn create_provider(settings: &Settings) -> Result<Box<dyn EmbeddingProvider>> {
    match settings.embedding_provider.as_str() {
        "ollama" => Ok(Box::new(OllamaProvider::new(
            &settings.ollama_base_url,
            &settings.ollama_embedding_model,
        ))),
        other => Err(ImpactError::EmbeddingFailure {
            message: format!("unknown embedding provider: {other}"),
        }),
    }
}

/// Derive the dotted module of a test file: path components below the
/// test root (a `test_repository` segment when present), stem last.
pub fn derive_module(file_path: &str, test_repo: &Path) -> String {
    let normalized = normalize_separators(file_path);
    let repo_root = normalize_separators(&test_repo.to_string_lossy());

    let relative = if let Some(stripped) = normalized.strip_prefix(&repo_root) {
        stripped.trim_start_matches('/').to_string()
    } else if let Some(idx) = normalized.find("test_repository/") {
        normalized[idx + "test_repository/".len()..].to_string()
    } else {
        // last resort: the stem alone
        return crate::paths::file_stem(&normalized).to_string();
    };

    let trimmed = relative
        .strip_suffix(".py")
        .unwrap_or(relative.as_str());
    trimmed.replace('/', ".")
}

/// Newline-joined descriptive text for one test. Only non-empty fields
/// contribute lines.
pub fn build_embedding_text(profile: &TestProfile) -> String {
    let mut parts = Vec::new();

    if !profile.method_name.is_empty() {
        let readable = profile
            .method_name
            .trim_start_matches("test_")
            .replace('_', " ");
        parts.push(format!("Test: {readable}"));
    }

    if let Some(class_name) = &profile.class_name {
        if !class_name.is_empty() {
            let readable = class_name.replace("Test", "").replace('_', " ");
            parts.push(format!("Component: {readable}"));
        }
    }

    if !profile.description.is_empty() {
        parts.push(format!("Purpose: {}", profile.description));
    }

    if !profile.module.is_empty() {
        parts.push(format!("Module under test: {}", profile.module));
    }

    if !profile.functions_tested.is_empty() {
        let functions: Vec<String> = profile
            .functions_tested
            .iter()
            .take(10)
            .map(|(module, function)| format!("{module}.{function}"))
            .collect();
        parts.push(format!("Tests functions: {}", functions.join(", ")));
    }

    if !profile.test_type.is_empty() {
        parts.push(format!("Test type: {}", profile.test_type));
    }

    if !profile.markers.is_empty() {
        parts.push(format!("Markers: {}", profile.markers.join(", ")));
    }

    if profile.is_async {
        parts.push("Async test".to_string());
    }

    parts.join("\n")
}

/// Merge the registry, metadata and function-call artifacts into one
/// profile per test.
pub fn load_test_profiles(artifacts_dir: &Path, settings: &Settings) -> Result<Vec<TestProfile>> {
    let registry: RegistryData = read_artifact(artifacts_dir, STAGE_REGISTRY)?;
    let metadata: MetadataData = read_artifact(artifacts_dir, STAGE_METADATA)?;

    let meta_map: BTreeMap<&str, &crate::store::MetadataRow> = metadata
        .rows
        .iter()
        .map(|m| (m.test_id.as_str(), m))
        .collect();

    // function mappings are optional but sharpen the text considerably
    let mut function_map: BTreeMap<String, Vec<(String, String)>> = BTreeMap::new();
    match read_artifact::<FunctionCallData>(artifacts_dir, STAGE_FUNCTION_CALLS) {
        Ok(calls) => {
            for mapping in calls.mappings {
                function_map
                    .entry(mapping.test_id.clone())
                    .or_default()
                    .push((mapping.module_name, mapping.function_name));
            }
        }
        Err(ImpactError::ArtifactMissing { artifact }) => {
            tracing::warn!(
                "{} not found; embeddings will lack function-level context",
                artifact
            );
        }
        Err(e) => return Err(e),
    }

    let profiles = registry
        .tests
        .into_iter()
        .map(|test| {
            let meta = meta_map.get(test.test_id.as_str());
            TestProfile {
                module: derive_module(&test.file_path, &settings.test_repo),
                test_id: test.test_id.clone(),
                method_name: test.method_name,
                class_name: test.class_name,
                test_type: test.test_type,
                file_path: test.file_path,
                description: meta.map(|m| m.description.clone()).unwrap_or_default(),
                markers: meta.map(|m| m.markers.clone()).unwrap_or_default(),
                is_async: meta.map(|m| m.is_async).unwrap_or(false),
                functions_tested: function_map.remove(&test.test_id).unwrap_or_default(),
            }
        })
        .collect();

    Ok(profiles)
}

/// Batched generator writing one vector per test to the backend
pub struct EmbeddingGenerator<'a> {
    provider: &'a dyn EmbeddingProvider,
    batch_size: usize,
}

impl<'a> EmbeddingGenerator<'a> {
    pub fn new(provider: &'a dyn EmbeddingProvider) -> Self {
        Self {
            provider,
            batch_size: EMBEDDING_BATCH_SIZE,
        }
    }

    /// Generate and store embeddings for every profile.
    /// Returns `(stored, failed)`.
    pub fn generate(
        &self,
        profiles: &[TestProfile],
        backend: &mut dyn VectorBackend,
    ) -> Result<(usize, usize)> {
        let mut stored = 0;
        let mut failed = 0;

        for batch in profiles.chunks(self.batch_size) {
            let mut ok_profiles = Vec::new();
            let mut ok_vectors = Vec::new();

            for profile in batch {
                let text = build_embedding_text(profile);
                match self.provider.embed(std::slice::from_ref(&text)) {
                    Ok(mut vectors) if !vectors.is_empty() => {
                        ok_profiles.push(profile.clone());
                        ok_vectors.push(vectors.remove(0));
                    }
                    Ok(_) => {
                        tracing::warn!("no vector returned for {}", profile.test_id);
                        failed += 1;
                    }
                    Err(e) => {
                        tracing::warn!("embedding failed for {}: {}", profile.test_id, e);
                        failed += 1;
                    }
                }
            }

            let (batch_stored, batch_failed) = backend.store(&ok_profiles, &ok_vectors)?;
            stored += batch_stored;
            failed += batch_failed;
            tracing::info!("embeddings: {} stored, {} failed so far", stored, failed);
        }

        Ok((stored, failed))
    }
}

/// Binds a provider and a backend into the match engine's semantic hook
pub struct SemanticSearch<'a> {
    provider: &'a dyn EmbeddingProvider,
    backend: &'a dyn VectorBackend,
    threshold: f32,
    max_results: usize,
}

impl<'a> SemanticSearch<'a> {
    pub fn new(provider: &'a dyn EmbeddingProvider, backend: &'a dyn VectorBackend) -> Self {
        Self {
            provider,
            backend,
            threshold: crate::config::DEFAULT_SIMILARITY_THRESHOLD,
            max_results: crate::config::DEFAULT_MAX_RESULTS,
        }
    }
}

impl SemanticSearcher for SemanticSearch<'_> {
    fn search(&self, change_description: &str) -> Result<Vec<SemanticHit>> {
        if !self.backend.is_available() {
            return Err(ImpactError::VectorBackendUnavailable {
                message: format!("{} backend is not ready", self.backend.name()),
            });
        }

        let vectors = self.provider.embed(&[change_description.to_string()])?;
        let query = vectors.into_iter().next().ok_or_else(|| {
            ImpactError::EmbeddingFailure {
                message: "no vector returned for the change description".to_string(),
            }
        })?;

        let matches = self
            .backend
            .search_similar(&query, self.threshold, self.max_results)?;

        Ok(matches
            .into_iter()
            .map(|m| SemanticHit {
                row: MatchedTestRow {
                    test_id: m.test_id,
                    class_name: m.class_name,
                    method_name: m.method_name,
                    test_file_path: m.test_file_path,
                    test_type: m.test_type,
                    reference_type: None,
                    call_type: None,
                    source: None,
                },
                similarity: m.similarity,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn profile() -> TestProfile {
        TestProfile {
            test_id: "test_0001".into(),
            method_name: "test_tool_conversion_roundtrip".into(),
            class_name: Some("TestToolConverter".into()),
            test_type: "unit".into(),
            file_path: "/repo/test_repository/agent/test_tool_converter.py".into(),
            module: "agent.test_tool_converter".into(),
            description: "verifies tool conversion".into(),
            markers: vec!["asyncio".into()],
            is_async: true,
            functions_tested: vec![("agent.tool_converter".into(), "convert".into())],
        }
    }

    #[test]
    fn test_embedding_text_layout() {
        let text = build_embedding_text(&profile());
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Test: tool conversion roundtrip");
        assert_eq!(lines[1], "Component: ToolConverter");
        assert_eq!(lines[2], "Purpose: verifies tool conversion");
        assert_eq!(lines[3], "Module under test: agent.test_tool_converter");
        assert_eq!(lines[4], "Tests functions: agent.tool_converter.convert");
        assert_eq!(lines[5], "Test type: unit");
        assert_eq!(lines[6], "Markers: asyncio");
        assert_eq!(lines[7], "Async test");
    }

    #[test]
    fn test_embedding_text_skips_empty_fields() {
        let mut p = profile();
        p.class_name = None;
        p.description = String::new();
        p.markers.clear();
        p.is_async = false;
        p.functions_tested.clear();
        let text = build_embedding_text(&p);
        assert!(!text.contains("Component:"));
        assert!(!text.contains("Purpose:"));
        assert!(!text.contains("Markers:"));
        assert!(!text.contains("Async test"));
    }

    #[test]
    fn test_functions_capped_at_ten() {
        let mut p = profile();
        p.functions_tested = (0..15)
            .map(|i| ("agent.module".to_string(), format!("func_{i}")))
            .collect();
        let text = build_embedding_text(&p);
        let functions_line = text
            .lines()
            .find(|l| l.starts_with("Tests functions:"))
            .unwrap();
        assert_eq!(functions_line.matches("agent.module.").count(), 10);
    }

    #[test]
    fn test_derive_module() {
        assert_eq!(
            derive_module(
                "/home/ci/project/test_repository/agent/test_langgraph_agent.py",
                &PathBuf::from("/does/not/match"),
            ),
            "agent.test_langgraph_agent"
        );
        assert_eq!(
            derive_module(
                "/repo/tests/unit/test_core.py",
                &PathBuf::from("/repo/tests"),
            ),
            "unit.test_core"
        );
        // no test root marker at all: stem only
        assert_eq!(
            derive_module("/somewhere/else/test_x.py", &PathBuf::from("/repo")),
            "test_x"
        );
    }
}
