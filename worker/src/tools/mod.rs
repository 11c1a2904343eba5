//! Tool adapters hosted by a worker.
//!
//! Every adapter implements [`ToolAdapter`]. The set a worker serves is a
//! [`ToolTable`], built from a TOML tools file whose `[[tools]]` entries name
//! an adapter `kind` from the built-in factory.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use shared_types::ExecuteOutput;
use thiserror::Error;

mod arithmetic;
mod echo;

pub use arithmetic::ArithmeticTool;
pub use echo::EchoTool;

/// Capability contract of a hosted tool.
///
/// Adapters own their per-instance state and guard it themselves; the worker
/// delegates every call without additional locking.
#[async_trait]
pub trait ToolAdapter: Send + Sync {
    /// Default name the tool is registered under
    fn name(&self) -> &str;

    async fn create(&self, instance_id: &str, identity: Option<Value>) -> Result<Value, AdapterError>;

    async fn execute(
        &self,
        instance_id: &str,
        parameters: Map<String, Value>,
    ) -> Result<ExecuteOutput, AdapterError>;

    async fn release(&self, instance_id: &str) -> Result<bool, AdapterError>;

    /// Cumulative reward of the instance so far.
    async fn calc_reward(&self, instance_id: &str) -> Result<f64, AdapterError>;
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum AdapterError {
    #[error("Unknown instance: {0}")]
    UnknownInstance(String),

    #[error("Instance already exists: {0}")]
    InstanceExists(String),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Tool error: {0}")]
    Internal(String),
}

// ============================================================================
// Tools file
// ============================================================================

pub const DEFAULT_TOOLS_FILE: &str = "tools.toml";

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct ToolsFile {
    #[serde(default)]
    pub tools: Vec<ToolEntry>,
}

/// One `[[tools]]` entry.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ToolEntry {
    pub kind: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Adapter-specific settings, handed to the factory untouched.
    #[serde(default)]
    pub config: Option<Value>,
}

impl ToolsFile {
    pub fn parse(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }
}

/// Resolve a `kind` through the built-in factory table.
pub fn build_adapter(entry: &ToolEntry) -> Result<Arc<dyn ToolAdapter>, AdapterError> {
    let config = entry.config.clone().unwrap_or(Value::Null);
    match entry.kind.as_str() {
        "arithmetic" => Ok(Arc::new(ArithmeticTool::from_config(&config)?)),
        "echo" => Ok(Arc::new(EchoTool::new())),
        other => Err(AdapterError::Internal(format!("unknown tool kind '{other}'"))),
    }
}

/// Walk from `start` towards the filesystem root looking for `file_name`.
pub fn find_upwards(start: &Path, file_name: &str) -> Option<PathBuf> {
    let mut current = start.to_path_buf();
    loop {
        let candidate = current.join(file_name);
        if candidate.is_file() {
            return Some(candidate);
        }
        if !current.pop() {
            return None;
        }
    }
}

// ============================================================================
// Tool table
// ============================================================================

/// Tools served by this worker, in registration order.
#[derive(Clone, Default)]
pub struct ToolTable {
    order: Vec<String>,
    adapters: HashMap<String, Arc<dyn ToolAdapter>>,
}

impl ToolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The demo adapters hosted when no tools file is present.
    pub fn builtin() -> Self {
        let mut table = Self::new();
        table.insert(Arc::new(ArithmeticTool::default()));
        table.insert(Arc::new(EchoTool::new()));
        table
    }

    /// Build from parsed entries. Entries that fail to build are logged and
    /// skipped; a repeated name replaces the earlier adapter.
    pub fn from_entries(entries: &[ToolEntry]) -> Self {
        let mut table = Self::new();
        for entry in entries {
            let adapter = match build_adapter(entry) {
                Ok(adapter) => adapter,
                Err(e) => {
                    tracing::warn!(kind = %entry.kind, error = %e, "skipping tool entry");
                    continue;
                }
            };
            let name = entry
                .name
                .clone()
                .unwrap_or_else(|| adapter.name().to_string());
            if table.adapters.contains_key(&name) {
                tracing::warn!(tool = %name, "duplicate tool name; later entry wins");
            }
            table.insert_named(name, adapter);
        }
        table
    }

    /// Load the table from `explicit`, or from the default tools file found
    /// upward from `cwd`. No file at all means the built-in set.
    pub fn load(explicit: Option<&Path>, cwd: &Path) -> anyhow::Result<Self> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => match find_upwards(cwd, DEFAULT_TOOLS_FILE) {
                Some(path) => path,
                None => {
                    tracing::info!(
                        cwd = %cwd.display(),
                        "No tools file found; hosting built-in tools"
                    );
                    return Ok(Self::builtin());
                }
            },
        };

        let raw = std::fs::read_to_string(&path).map_err(|e| {
            anyhow::anyhow!("Failed to read tools file {}: {e}", path.display())
        })?;
        let file = ToolsFile::parse(&raw).map_err(|e| {
            anyhow::anyhow!("Failed to parse tools file {}: {e}", path.display())
        })?;
        let table = Self::from_entries(&file.tools);
        tracing::info!(path = %path.display(), tools = ?table.names(), "Loaded tools file");
        Ok(table)
    }

    pub fn insert(&mut self, adapter: Arc<dyn ToolAdapter>) {
        let name = adapter.name().to_string();
        self.insert_named(name, adapter);
    }

    pub fn insert_named(&mut self, name: String, adapter: Arc<dyn ToolAdapter>) {
        if self.adapters.insert(name.clone(), adapter).is_none() {
            self.order.push(name);
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolAdapter>> {
        self.adapters.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.order.clone()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_table() {
        let table = ToolTable::builtin();
        assert_eq!(table.names(), vec!["ArithmeticTool", "EchoTool"]);
        assert!(table.get("ArithmeticTool").is_some());
        assert!(table.get("Missing").is_none());
    }

    #[test]
    fn test_tools_file_entries() {
        let file = ToolsFile::parse(
            r#"
            [[tools]]
            kind = "arithmetic"

            [[tools]]
            kind = "echo"
            name = "Mirror"

            [[tools]]
            kind = "arithmetic"
            name = "StrictMath"
            config = { step_reward = 0.2, penalty = -0.5 }
            "#,
        )
        .unwrap();

        assert_eq!(file.tools.len(), 3);
        assert_eq!(file.tools[1].name.as_deref(), Some("Mirror"));

        let table = ToolTable::from_entries(&file.tools);
        assert_eq!(table.names(), vec!["ArithmeticTool", "Mirror", "StrictMath"]);
    }

    #[test]
    fn test_bad_entries_are_skipped() {
        let file = ToolsFile::parse(
            r#"
            [[tools]]
            kind = "teleporter"

            [[tools]]
            kind = "arithmetic"
            config = { step_reward = "lots" }

            [[tools]]
            kind = "echo"
            "#,
        )
        .unwrap();

        let table = ToolTable::from_entries(&file.tools);
        assert_eq!(table.names(), vec!["EchoTool"]);
    }

    #[test]
    fn test_duplicate_name_last_wins() {
        let entries = vec![
            ToolEntry {
                kind: "arithmetic".to_string(),
                name: Some("Shared".to_string()),
                config: None,
            },
            ToolEntry {
                kind: "echo".to_string(),
                name: Some("Shared".to_string()),
                config: None,
            },
        ];
        let table = ToolTable::from_entries(&entries);
        assert_eq!(table.len(), 1);
        assert_eq!(table.get("Shared").unwrap().name(), "EchoTool");
    }

    #[test]
    fn test_load_searches_upwards_and_falls_back() {
        let root = tempfile::tempdir().unwrap();
        let nested = root.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();

        // No file anywhere below the temp root: built-ins. The walk may still
        // reach a tools.toml above the temp dir, so only assert when it does not.
        if find_upwards(root.path(), DEFAULT_TOOLS_FILE).is_none() {
            let table = ToolTable::load(None, &nested).unwrap();
            assert_eq!(table.names(), ToolTable::builtin().names());
        }

        std::fs::write(
            root.path().join(DEFAULT_TOOLS_FILE),
            "[[tools]]\nkind = \"echo\"\n",
        )
        .unwrap();
        let table = ToolTable::load(None, &nested).unwrap();
        assert_eq!(table.names(), vec!["EchoTool"]);
    }

    #[test]
    fn test_explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(ToolTable::load(Some(&missing), dir.path()).is_err());
    }
}
