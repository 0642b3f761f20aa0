use anyhow::{Context, Result};
use mcpl_core::overlay::CompositeOverlay;
use tracing::{debug, warn};

use crate::paths::StateLayout;

/// Load the persisted composite overlay.
///
/// Missing and malformed files both yield `None`: a broken overlay must not
/// guess at prior intent, the curation starts empty instead.
pub fn load_overlay(layout: &StateLayout) -> Option<CompositeOverlay> {
    let path = layout.overrides_file();
    let raw = match std::fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(error) => {
            debug!(path = %path.display(), error = %error, "no overlay to load");
            return None;
        }
    };
    match serde_json::from_str(&raw) {
        Ok(overlay) => Some(overlay),
        Err(error) => {
            warn!(path = %path.display(), error = %error, "ignoring malformed overlay");
            None
        }
    }
}

/// Persist the composite overlay, write-then-rename.
pub fn save_overlay(layout: &StateLayout, overlay: &CompositeOverlay) -> Result<()> {
    layout.ensure_root()?;
    let path = layout.overrides_file();
    let payload =
        serde_json::to_vec_pretty(overlay).context("failed to serialize overlay")?;

    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, payload)
        .with_context(|| format!("failed to write overlay: {}", tmp.display()))?;
    std::fs::rename(&tmp, &path)
        .with_context(|| format!("failed to persist overlay: {}", path.display()))
}
