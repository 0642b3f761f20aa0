use clap::ValueEnum;
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Length of generated per-instance API keys.
pub const API_KEY_LEN: usize = 40;

/// One tool advertised by an MCP server.
///
/// `description` is the only field the operator can override later; the
/// override is applied when the merged OpenAPI is built, never here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// How a stack is exposed publicly.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum TunnelMode {
    /// Ephemeral `cloudflared tunnel --url …` with an auto-assigned URL.
    #[default]
    Quick,
    /// Operator-owned `cloudflared tunnel run [name]`; URL supplied via flag.
    Named,
    /// No tunnel; stack is local-only.
    None,
}

impl TunnelMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Quick => "quick",
            Self::Named => "named",
            Self::None => "none",
        }
    }
}

impl std::fmt::Display for TunnelMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Runtime binding of one config file: ports, key, children, diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    pub name: String,
    pub config_path: PathBuf,
    pub front_port: u16,
    pub gateway_port: u16,
    pub api_key: String,
    pub tunnel_mode: TunnelMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway_pid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tunnel_pid: Option<u32>,
    #[serde(default)]
    pub diagnostics: InstanceDiagnostics,
}

impl Instance {
    /// Loopback origin of the front proxy.
    pub fn local_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.front_port)
    }

    /// Externally-visible origin: the tunnel URL when captured, else local.
    pub fn effective_url(&self) -> String {
        self.public_url.clone().unwrap_or_else(|| self.local_url())
    }
}

/// Counters and warnings accumulated while merging one instance's OpenAPI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceDiagnostics {
    /// Tools discovered during preflight inspection.
    pub tool_count: usize,
    /// HTTP operations in the merged document.
    pub total_operations: usize,
    /// Operations contributed per server, counted by HTTP-method keys.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub operations_per_server: BTreeMap<String, usize>,
    /// Per server: `METHOD /path (tool=T): description length N > 300` lines.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub long_descriptions: BTreeMap<String, Vec<String>>,
}

/// Derive an instance name from a config file basename.
///
/// The extension is stripped and every character outside `[A-Za-z0-9_-]`
/// becomes `_`, so `mcp.config.json` yields `mcp_config`.
pub fn instance_name_from_path(config_path: &Path) -> String {
    let stem = config_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("stack");
    let sanitized: String = stem
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if sanitized.is_empty() {
        "stack".to_string()
    } else {
        sanitized
    }
}

/// Random 40-character alphanumeric API key.
pub fn generate_api_key() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(API_KEY_LEN)
        .map(char::from)
        .collect()
}
