//! On-disk test repository builder

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

/// A throwaway Python test tree
pub struct TestRepo {
    dir: TempDir,
}

impl TestRepo {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("temp dir"),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Artifacts live outside the scanned tree
    pub fn artifacts_dir(&self) -> PathBuf {
        self.dir.path().join(".artifacts")
    }

    /// Write a file under the repo root, creating parent directories
    pub fn add_file(&self, relative: &str, content: &str) -> PathBuf {
        let path = self.dir.path().join(relative);
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(&path, content).expect("write fixture");
        path
    }

    /// The standard agent-flavored fixture: a unit test class whose file
    /// patches `agent.langgraph_agent.initialize`, a patch-decorated
    /// free test, an integration workflow test, and a test reachable
    /// only by meaning.
    pub fn agent_fixture() -> Self {
        let repo = Self::new();

        repo.add_file(
            "unit/test_langgraph_agent.py",
            r#"
import pytest
from unittest.mock import patch
from agent.langgraph_agent import LangGraphAgent


class TestLangGraphAgent:
    """Unit tests for the LangGraph agent."""

    def test_initialize_builds_graph(self):
        """Agent initialization builds the graph."""
        with patch('agent.langgraph_agent.initialize'):
            agent = LangGraphAgent()
            agent.initialize()

    def test_initialize_sets_ready_flag(self):
        agent = LangGraphAgent()
        agent.initialize()
        assert agent.ready

    @pytest.mark.asyncio
    async def test_initialize_async_path(self):
        agent = LangGraphAgent()
        await agent.ainitialize()
"#,
        );

        repo.add_file(
            "unit/test_state_converter.py",
            r#"
from unittest.mock import patch


@patch('agent.langgraph_agent.LangGraphAgent')
def test_state_round_trip(mock_agent):
    """State conversion round trip with the agent mocked out."""
    state = {"messages": []}
    mock_agent.return_value.convert(state)
"#,
        );

        repo.add_file(
            "unit/test_conversion_behavior.py",
            r#"
def test_catalog_entries_are_converted():
    """Verifies tool conversion of catalog entries into API schemas."""
    entries = load_entries()
    result = convert_all(entries)
    assert result
"#,
        );

        repo.add_file(
            "integration/test_agent_workflow.py",
            r#"
import pytest
from agent.langgraph_agent import LangGraphAgent
from agent.mcp_client import McpClient


@pytest.mark.integration
def test_full_agent_workflow():
    """End-to-end agent workflow against the catalog."""
    agent = LangGraphAgent()
    client = McpClient()
    agent.run(client)
"#,
        );

        repo
    }
}

impl Default for TestRepo {
    fn default() -> Self {
        Self::new()
    }
}
