use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Per-project state directory name.
pub const STATE_DIR_NAME: &str = ".mcp-launch";

/// Resolver for everything mcp-launch keeps on disk.
///
/// ```text
/// .mcp-launch/
///   state.json                       instance records
///   overrides.json                   composite overlay
///   tmp/<instance>/mcp.config.json   filtered gateway config clones
///   openapi_<instance>.json          last merged spec (debug artifact)
///   logs/
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateLayout {
    root: PathBuf,
}

impl StateLayout {
    /// Layout rooted at `<base>/.mcp-launch`.
    pub fn in_dir(base: &Path) -> Self {
        Self {
            root: base.join(STATE_DIR_NAME),
        }
    }

    /// Layout for the current working directory.
    pub fn discover() -> Result<Self> {
        let cwd = std::env::current_dir().context("failed to resolve current directory")?;
        Ok(Self::in_dir(&cwd))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn state_file(&self) -> PathBuf {
        self.root.join("state.json")
    }

    pub fn overrides_file(&self) -> PathBuf {
        self.root.join("overrides.json")
    }

    pub fn cloned_config(&self, instance: &str) -> PathBuf {
        self.root.join("tmp").join(instance).join("mcp.config.json")
    }

    pub fn openapi_artifact(&self, instance: &str) -> PathBuf {
        self.root.join(format!("openapi_{instance}.json"))
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    /// Create the root directory if needed.
    pub fn ensure_root(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root)
            .with_context(|| format!("failed to create state dir: {}", self.root.display()))
    }

    /// Create and return the clone directory for one instance.
    pub fn ensure_clone_dir(&self, instance: &str) -> Result<PathBuf> {
        let dir = self.root.join("tmp").join(instance);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create clone dir: {}", dir.display()))?;
        Ok(dir)
    }
}
