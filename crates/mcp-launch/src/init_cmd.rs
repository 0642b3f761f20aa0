use anyhow::{Context, Result, bail};
use std::path::Path;

const STARTER_CONFIG: &str = r#"{
  "mcpServers": {
    "time": {
      "command": "uvx",
      "args": ["mcp-server-time"]
    }
  }
}
"#;

/// Write a starter config; refuses to clobber an existing one.
pub fn handle_init(path: &Path) -> Result<()> {
    if path.exists() {
        bail!("{} already exists; not overwriting", path.display());
    }
    std::fs::write(path, STARTER_CONFIG)
        .with_context(|| format!("failed to write {}", path.display()))?;
    println!("wrote {}", path.display());
    println!("next: mcp-launch up --config {}", path.display());
    Ok(())
}
