//! MCP stdio inspector: initialize, notify, enumerate tools, get out.
//!
//! The client survives the variance real servers exhibit: package runners
//! with cold caches that take tens of seconds to answer `initialize`,
//! human-readable banners printed to stdout before (and between) JSON-RPC
//! messages, responses declaring older protocol dates, and disagreement
//! about what the first `tools/list` page's parameters should look like.

mod protocol;

use anyhow::{Context, Result, anyhow, bail};
use mcpl_config::ServerDefinition;
use mcpl_core::error::LaunchError;
use mcpl_core::types::ToolDescriptor;
use serde_json::{Value, json};
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, ChildStdout};
use tokio::time::Instant;
use tracing::debug;

pub use protocol::PROTOCOL_VERSION;
use protocol::{RpcReply, initialize_request, initialized_notification, tools_list_request};

/// Environment override for the slow `initialize` window, in seconds.
pub const MCP_INIT_TIMEOUT_ENV: &str = "MCP_INIT_TIMEOUT_SEC";

const INIT_ID: i64 = 1;
const FIRST_LIST_ID: i64 = 3;
const INIT_FAST_WINDOW: Duration = Duration::from_secs(6);
const INIT_SLOW_WINDOW_DEFAULT: Duration = Duration::from_secs(20);
const PAGE_WINDOW: Duration = Duration::from_secs(10);
/// Enumeration budget granted on top of the handshake windows.
const ENUMERATION_BUDGET: Duration = Duration::from_secs(15);

/// Tunable windows; defaults honor `MCP_INIT_TIMEOUT_SEC`.
#[derive(Debug, Clone)]
pub struct InspectorOptions {
    pub client_name: String,
    pub client_version: String,
    /// First wait for the `initialize` response.
    pub init_fast: Duration,
    /// Retry window when the fast wait hit its deadline (cold caches).
    pub init_slow: Duration,
    /// Per-page wait for `tools/list` responses.
    pub page_window: Duration,
}

impl Default for InspectorOptions {
    fn default() -> Self {
        Self {
            client_name: "mcp-launch".to_string(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
            init_fast: INIT_FAST_WINDOW,
            init_slow: slow_window_from_env(),
            page_window: PAGE_WINDOW,
        }
    }
}

impl InspectorOptions {
    /// Watchdog budget for one whole inspection: both handshake windows
    /// plus time to enumerate pages.
    pub fn outer_deadline(&self) -> Duration {
        self.init_fast + self.init_slow + ENUMERATION_BUDGET
    }
}

fn slow_window_from_env() -> Duration {
    std::env::var(MCP_INIT_TIMEOUT_ENV)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|&secs| secs > 0)
        .map(Duration::from_secs)
        .unwrap_or(INIT_SLOW_WINDOW_DEFAULT)
}

/// Inspect one server definition, returning its advertised tools.
///
/// Streamable-HTTP inspection is not implemented; definitions that also
/// carry a `command` are inspected over stdio, everything else errors.
/// The child is killed (whole process group) whether inspection succeeds
/// or not.
pub async fn inspect_server(
    server_name: &str,
    definition: &ServerDefinition,
    options: &InspectorOptions,
) -> Result<Vec<ToolDescriptor>> {
    let Some((command, args, env)) = definition.stdio_invocation() else {
        bail!(
            "streamable-http inspection not implemented for '{server_name}' \
             (add a 'command' to inspect over stdio)"
        );
    };

    let cmd = mcpl_process::build_command(&command, &args, &env);
    let mut child = mcpl_process::spawn_group(cmd, mcpl_process::StdinMode::Piped)
        .with_context(|| format!("failed to spawn MCP server '{server_name}'"))?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| anyhow!("failed to capture stdin for '{server_name}'"))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("failed to capture stdout for '{server_name}'"))?;
    // Never parsed; chatty servers block on a full stderr pipe otherwise.
    if let Some(stderr) = child.stderr.take() {
        mcpl_process::drain_stream(stderr);
    }

    let mut session = Session {
        stdin,
        reader: BufReader::new(stdout),
        line: String::new(),
    };
    let result = session.run(options).await;
    mcpl_process::kill_child_group(&mut child).await;
    result
}

enum ReadError {
    Deadline,
    Closed,
    Io(std::io::Error),
}

struct Session {
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    line: String,
}

impl Session {
    async fn run(&mut self, options: &InspectorOptions) -> Result<Vec<ToolDescriptor>> {
        self.initialize(options).await?;
        self.enumerate_tools(options).await
    }

    async fn initialize(&mut self, options: &InspectorOptions) -> Result<()> {
        self.send(&initialize_request(
            INIT_ID,
            &options.client_name,
            &options.client_version,
        ))
        .await?;

        // Fast-slow strategy: only a deadline on the fast window earns the
        // longer retry; every other failure is final.
        let reply = match self.read_reply(INIT_ID, options.init_fast).await {
            Ok(reply) => reply,
            Err(ReadError::Deadline) => {
                debug!(window_secs = options.init_slow.as_secs(), "slow init retry");
                match self.read_reply(INIT_ID, options.init_slow).await {
                    Ok(reply) => reply,
                    Err(ReadError::Deadline) => return Err(LaunchError::InitTimeout.into()),
                    Err(other) => return Err(read_failure(other)),
                }
            }
            Err(other) => return Err(read_failure(other)),
        };

        if let Some(error) = reply.error {
            return Err(LaunchError::InitializeFailed(error.message).into());
        }
        if let Some(version) = reply
            .result
            .as_ref()
            .and_then(|r| r.get("protocolVersion"))
            .and_then(Value::as_str)
        {
            // Older dates (e.g. 2024-11-05) are fine; record what we got.
            debug!(protocol = version, "initialize accepted");
        }

        self.send(&initialized_notification()).await
    }

    async fn enumerate_tools(&mut self, options: &InspectorOptions) -> Result<Vec<ToolDescriptor>> {
        let mut next_id = FIRST_LIST_ID;
        let mut tools = Vec::new();

        // First page: servers disagree on the empty-cursor spelling, so walk
        // the known shapes until one is not rejected.
        let shapes: [Option<Value>; 4] = [
            Some(json!({})),
            Some(json!({"cursor": ""})),
            Some(json!({"cursor": null})),
            None,
        ];
        let mut first_result = None;
        let mut last_rejection = None;
        for shape in shapes {
            let id = next_id;
            next_id += 1;
            self.send(&tools_list_request(id, shape)).await?;
            let reply = self
                .read_reply(id, options.page_window)
                .await
                .map_err(page_failure)?;
            match reply.error {
                Some(error) => last_rejection = Some(error.message),
                None => {
                    first_result = Some(reply.result.unwrap_or(Value::Null));
                    break;
                }
            }
        }
        let Some(mut result) = first_result else {
            let message =
                last_rejection.unwrap_or_else(|| "no parameter shape accepted".to_string());
            return Err(LaunchError::ToolsList(message).into());
        };

        loop {
            append_tools(&result, &mut tools)?;
            let Some(cursor) = next_cursor(&result) else {
                break;
            };
            let id = next_id;
            next_id += 1;
            self.send(&tools_list_request(id, Some(json!({"cursor": cursor}))))
                .await?;
            let reply = self
                .read_reply(id, options.page_window)
                .await
                .map_err(page_failure)?;
            if let Some(error) = reply.error {
                return Err(LaunchError::ToolsList(error.message).into());
            }
            result = reply.result.unwrap_or(Value::Null);
        }

        Ok(tools)
    }

    async fn send(&mut self, value: &Value) -> Result<()> {
        let payload = serde_json::to_string(value).context("failed to serialize request")?;
        self.stdin
            .write_all(payload.as_bytes())
            .await
            .context("failed to write request")?;
        self.stdin
            .write_all(b"\n")
            .await
            .context("failed to write request delimiter")?;
        self.stdin.flush().await.context("failed to flush request")
    }

    /// Scan stdout until the response matching `id` arrives or the window
    /// closes. Non-JSON lines and unrelated messages are skipped. Exiting
    /// only through these returns is what keeps a stale match from being
    /// mistaken for a timeout.
    async fn read_reply(&mut self, id: i64, window: Duration) -> Result<RpcReply, ReadError> {
        use tokio::io::AsyncBufReadExt;

        let deadline = Instant::now() + window;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ReadError::Deadline);
            }
            self.line.clear();
            match tokio::time::timeout(remaining, self.reader.read_line(&mut self.line)).await {
                Err(_) => return Err(ReadError::Deadline),
                Ok(Ok(0)) => return Err(ReadError::Closed),
                Ok(Ok(_)) => {
                    if let Some(reply) = protocol::parse_reply(&self.line, id) {
                        return Ok(reply);
                    }
                }
                Ok(Err(error)) => return Err(ReadError::Io(error)),
            }
        }
    }
}

fn read_failure(error: ReadError) -> anyhow::Error {
    match error {
        ReadError::Deadline => LaunchError::InitTimeout.into(),
        ReadError::Closed => anyhow!("server closed stdout before responding"),
        ReadError::Io(error) => anyhow::Error::new(error).context("failed to read response"),
    }
}

fn page_failure(error: ReadError) -> anyhow::Error {
    match error {
        ReadError::Deadline => LaunchError::ToolsList("deadline exceeded".into()).into(),
        ReadError::Closed => {
            LaunchError::ToolsList("server closed stdout mid-enumeration".into()).into()
        }
        ReadError::Io(error) => anyhow::Error::new(error).context("failed to read tools/list page"),
    }
}

fn append_tools(result: &Value, tools: &mut Vec<ToolDescriptor>) -> Result<()> {
    let page = result
        .get("tools")
        .and_then(Value::as_array)
        .context("tools/list result has no tools array")?;
    for tool in page {
        let descriptor: ToolDescriptor = serde_json::from_value(tool.clone())
            .context("tools/list entry is not a tool descriptor")?;
        tools.push(descriptor);
    }
    Ok(())
}

fn next_cursor(result: &Value) -> Option<String> {
    result
        .get("nextCursor")
        .and_then(Value::as_str)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
