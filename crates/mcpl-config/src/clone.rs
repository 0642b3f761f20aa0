use anyhow::{Context, Result};
use mcpl_core::overlay::NestedOverlay;
use serde_json::{Map, Value, json};
use std::path::PathBuf;
use tracing::debug;

use crate::config::LaunchConfig;
use crate::paths::StateLayout;

/// Write the gateway-readable clone of one instance's config.
///
/// The only mutation at clone time is dropping servers the overlay disables.
/// Allow/deny filters and description overrides stay out of the clone: the
/// gateway advertises every configured server's tools regardless, so those
/// are enforced when the merged OpenAPI is built.
pub fn write_filtered_clone(
    config: &LaunchConfig,
    instance: &str,
    overlay: &NestedOverlay,
    layout: &StateLayout,
) -> Result<PathBuf> {
    let mut servers = Map::new();
    for (name, definition) in &config.servers {
        if overlay.is_disabled(instance, name) {
            debug!(instance, server = %name, "omitting disabled server from clone");
            continue;
        }
        servers.insert(name.clone(), definition.raw.clone());
    }

    let clone = json!({ "mcpServers": Value::Object(servers) });
    let dir = layout.ensure_clone_dir(instance)?;
    let path = dir.join("mcp.config.json");
    let payload = serde_json::to_vec_pretty(&clone).context("failed to serialize clone")?;
    std::fs::write(&path, payload)
        .with_context(|| format!("failed to write cloned config: {}", path.display()))?;
    Ok(path)
}
