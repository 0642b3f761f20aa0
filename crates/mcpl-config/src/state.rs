use anyhow::{Context, Result};
use mcpl_core::types::Instance;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

use crate::paths::StateLayout;

/// One launched stack as recorded for `status`/`share`/`openapi`/`down`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceRecord {
    #[serde(flatten)]
    pub instance: Instance,
    /// Discovered tool names per server, from the preflight inventory.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tools: BTreeMap<String, Vec<String>>,
}

/// Contents of `.mcp-launch/state.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateFile {
    #[serde(default)]
    pub instances: Vec<InstanceRecord>,
    #[serde(default)]
    pub saved_at: String,
}

/// Load recorded state; `None` when absent or unreadable.
pub fn load_state(layout: &StateLayout) -> Option<StateFile> {
    let path = layout.state_file();
    let raw = std::fs::read_to_string(&path).ok()?;
    match serde_json::from_str(&raw) {
        Ok(state) => Some(state),
        Err(error) => {
            warn!(path = %path.display(), error = %error, "ignoring malformed state file");
            None
        }
    }
}

/// Persist recorded state, stamping `saved_at`.
pub fn save_state(layout: &StateLayout, instances: Vec<InstanceRecord>) -> Result<()> {
    layout.ensure_root()?;
    let state = StateFile {
        instances,
        saved_at: chrono::Utc::now().to_rfc3339(),
    };
    let payload = serde_json::to_vec_pretty(&state).context("failed to serialize state")?;
    let path = layout.state_file();
    std::fs::write(&path, payload)
        .with_context(|| format!("failed to write state: {}", path.display()))
}
