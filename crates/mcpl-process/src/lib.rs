//! Process management: group spawning, line streaming, and termination.
//!
//! Every child runs in its own process group so one group signal reaps the
//! whole tree. The gateway spawns MCP servers of its own; killing only the
//! gateway PID would strand them.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

/// Grace after SIGTERM to a single PID before giving up on it.
const PID_TERM_GRACE: Duration = Duration::from_millis(300);
/// Grace after group SIGTERM before escalating to SIGKILL.
const GROUP_TERM_GRACE: Duration = Duration::from_millis(800);

/// Whether the child gets a writable stdin pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StdinMode {
    Null,
    Piped,
}

/// Build a command with args and extra environment applied.
pub fn build_command(
    program: &str,
    args: &[String],
    env: &BTreeMap<String, String>,
) -> Command {
    let mut cmd = Command::new(program);
    cmd.args(args);
    for (key, value) in env {
        cmd.env(key, value);
    }
    cmd
}

/// Spawn a child in a new process group with piped stdout/stderr.
///
/// POSIX children call `setsid()` before exec; Windows children get
/// `CREATE_NEW_PROCESS_GROUP`. `kill_on_drop` is a safety net only, the
/// supervisor owns orderly teardown.
pub fn spawn_group(mut cmd: Command, stdin: StdinMode) -> Result<Child> {
    cmd.stdout(std::process::Stdio::piped());
    cmd.stderr(std::process::Stdio::piped());
    cmd.stdin(match stdin {
        StdinMode::Null => std::process::Stdio::null(),
        StdinMode::Piped => std::process::Stdio::piped(),
    });
    cmd.kill_on_drop(true);

    // SAFETY: setsid() is async-signal-safe and runs before exec.
    #[cfg(unix)]
    unsafe {
        cmd.pre_exec(|| {
            libc::setsid();
            Ok(())
        });
    }
    #[cfg(windows)]
    {
        const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
        cmd.creation_flags(CREATE_NEW_PROCESS_GROUP);
    }

    cmd.spawn().context("failed to spawn command")
}

/// Append-only log file shared by every stream reader in the run.
#[derive(Clone)]
pub struct SharedLog {
    file: Arc<Mutex<std::fs::File>>,
}

impl SharedLog {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create log dir: {}", parent.display()))?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open log file: {}", path.display()))?;
        Ok(Self {
            file: Arc::new(Mutex::new(file)),
        })
    }

    fn append(&self, tag: &str, line: &str) {
        if let Ok(mut file) = self.file.lock() {
            let _ = writeln!(file, "[{tag}] {line}");
        }
    }
}

/// Where streamed lines go besides the optional hook.
#[derive(Clone, Default)]
pub struct StreamSink {
    /// Echo `[tag] line` to this process's stdout.
    pub echo: bool,
    /// Tee tagged lines to the shared log file.
    pub log: Option<SharedLog>,
}

/// Callback invoked with each raw line (URL scraping and the like).
pub type LineHook = Arc<dyn Fn(&str) + Send + Sync>;

/// Read one stream line-by-line until EOF in a background task.
///
/// No accumulation across newlines: each `read_line` result is handled and
/// dropped. The task ends when the pipe closes, which the owning kill
/// guarantees eventually happens.
pub fn stream_lines<R>(
    stream: R,
    tag: String,
    sink: StreamSink,
    hook: Option<LineHook>,
) -> tokio::task::JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        loop {
            line.clear();
            match reader.read_line(&mut line).await {
                Ok(0) => break,
                Ok(_) => {
                    let trimmed = line.trim_end_matches(['\r', '\n']);
                    if sink.echo {
                        println!("[{tag}] {trimmed}");
                    }
                    if let Some(log) = &sink.log {
                        log.append(&tag, trimmed);
                    }
                    if let Some(hook) = &hook {
                        hook(trimmed);
                    }
                }
                Err(error) => {
                    debug!(tag = %tag, error = %error, "stream read failed");
                    break;
                }
            }
        }
    })
}

/// Drain a stream to nowhere.
///
/// Chatty children block on a full pipe; anything not worth parsing still
/// has to be consumed.
pub fn drain_stream<R>(stream: R) -> tokio::task::JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut stream = stream;
        let mut sink = tokio::io::sink();
        let _ = tokio::io::copy(&mut stream, &mut sink).await;
    })
}

/// Terminate a single PID: SIGTERM then a short grace.
#[cfg(unix)]
pub async fn kill_pid(pid: u32) {
    // SAFETY: kill() is async-signal-safe; a stale PID returns ESRCH.
    unsafe {
        libc::kill(pid as i32, libc::SIGTERM);
    }
    tokio::time::sleep(PID_TERM_GRACE).await;
}

#[cfg(windows)]
pub async fn kill_pid(pid: u32) {
    let _ = Command::new("taskkill")
        .args(["/T", "/F", "/PID", &pid.to_string()])
        .output()
        .await;
}

/// Terminate a whole process group: TERM, grace, then KILL.
#[cfg(unix)]
pub async fn kill_process_group(pid: u32) {
    let group = -(pid as i32);
    // SAFETY: negative PID targets the process group; stale groups ESRCH.
    unsafe {
        libc::kill(group, libc::SIGTERM);
    }
    tokio::time::sleep(GROUP_TERM_GRACE).await;
    unsafe {
        libc::kill(group, libc::SIGKILL);
    }
}

/// Windows has no group signals; the tree-kill flag covers descendants.
#[cfg(windows)]
pub async fn kill_process_group(pid: u32) {
    kill_pid(pid).await;
}

/// Kill a child's process group and reap it.
pub async fn kill_child_group(child: &mut Child) {
    let Some(pid) = child.id() else {
        return;
    };
    kill_process_group(pid).await;
    match child.wait().await {
        Ok(status) => debug!(pid, %status, "child group reaped"),
        Err(error) => warn!(pid, error = %error, "failed to reap child"),
    }
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
