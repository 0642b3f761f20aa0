use anyhow::{Context, Result, bail};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Transport half of a server definition.
///
/// Wire format is the gateway's: a stdio entry carries `command` (+ optional
/// `args`, `env`); a remote entry carries `type = "streamable-http"` and
/// `url` (+ optional `headers`). An entry with a `command` and no `type` is
/// stdio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerTransport {
    Stdio {
        command: String,
        args: Vec<String>,
        env: BTreeMap<String, String>,
    },
    StreamableHttp {
        url: String,
        headers: BTreeMap<String, String>,
    },
}

impl ServerTransport {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Stdio { .. } => "stdio",
            Self::StreamableHttp { .. } => "streamable-http",
        }
    }
}

/// One named server inside a config file.
///
/// The raw JSON object is kept verbatim so clones reproduce the entry
/// byte-for-byte in meaning, including fields this tool does not interpret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerDefinition {
    pub transport: ServerTransport,
    pub raw: Value,
}

impl ServerDefinition {
    fn from_value(name: &str, raw: &Value) -> Result<Self> {
        let obj = raw
            .as_object()
            .with_context(|| format!("server '{name}': expected a JSON object"))?;

        let string_map = |key: &str| -> BTreeMap<String, String> {
            obj.get(key)
                .and_then(Value::as_object)
                .map(|m| {
                    m.iter()
                        .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                        .collect()
                })
                .unwrap_or_default()
        };
        let string_list = |key: &str| -> Vec<String> {
            obj.get(key)
                .and_then(Value::as_array)
                .map(|a| {
                    a.iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default()
        };

        let transport = match obj.get("type").and_then(Value::as_str) {
            Some("streamable-http") => {
                let url = obj
                    .get("url")
                    .and_then(Value::as_str)
                    .with_context(|| {
                        format!("server '{name}': type \"streamable-http\" requires 'url'")
                    })?
                    .to_string();
                ServerTransport::StreamableHttp {
                    url,
                    headers: string_map("headers"),
                }
            }
            Some(other) => bail!(
                "server '{name}': unknown transport type '{other}' \
                 (expected \"streamable-http\", or omit for stdio)"
            ),
            None => {
                let command = obj
                    .get("command")
                    .and_then(Value::as_str)
                    .with_context(|| {
                        format!(
                            "server '{name}': missing 'command' \
                             (stdio) or type = \"streamable-http\" with 'url'"
                        )
                    })?
                    .to_string();
                ServerTransport::Stdio {
                    command,
                    args: string_list("args"),
                    env: string_map("env"),
                }
            }
        };

        Ok(Self {
            transport,
            raw: raw.clone(),
        })
    }

    /// Stdio invocation for inspection, regardless of declared type.
    ///
    /// Streamable-HTTP inspection is not implemented; a remote entry that
    /// also names a `command` is inspected over stdio through this.
    pub fn stdio_invocation(&self) -> Option<(String, Vec<String>, BTreeMap<String, String>)> {
        if let ServerTransport::Stdio { command, args, env } = &self.transport {
            return Some((command.clone(), args.clone(), env.clone()));
        }
        let obj = self.raw.as_object()?;
        let command = obj.get("command")?.as_str()?.to_string();
        let args = obj
            .get("args")
            .and_then(Value::as_array)
            .map(|a| {
                a.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let env = obj
            .get("env")
            .and_then(Value::as_object)
            .map(|m| {
                m.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default();
        Some((command, args, env))
    }
}

/// Parsed config file: the `mcpServers` map plus its origin path.
#[derive(Debug, Clone)]
pub struct LaunchConfig {
    pub path: PathBuf,
    pub servers: BTreeMap<String, ServerDefinition>,
}

impl LaunchConfig {
    /// Load and validate a config file.
    ///
    /// A missing or empty `mcpServers` map is a hard error for the instance.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {}", path.display()))?;
        let value: Value = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse config: {}", path.display()))?;

        let servers_obj = value
            .get("mcpServers")
            .and_then(Value::as_object)
            .filter(|m| !m.is_empty());
        let Some(servers_obj) = servers_obj else {
            bail!("no mcpServers in {}", path.display());
        };

        let mut servers = BTreeMap::new();
        for (name, entry) in servers_obj {
            let definition = ServerDefinition::from_value(name, entry)
                .with_context(|| format!("invalid server in {}", path.display()))?;
            servers.insert(name.clone(), definition);
        }

        Ok(Self {
            path: path.to_path_buf(),
            servers,
        })
    }

    /// Server names in lexicographic order (the merge order).
    pub fn server_names(&self) -> Vec<String> {
        self.servers.keys().cloned().collect()
    }
}
