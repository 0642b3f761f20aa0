use anyhow::{Context, Result};
use mcpl_process::{LineHook, StdinMode, StreamSink, stream_lines};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::process::Child;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// How long the supervisor waits for a quick tunnel to print its URL.
pub const QUICK_TUNNEL_WAIT: Duration = Duration::from_secs(25);

/// Pull the public URL out of a tunnel log line.
///
/// Quick tunnels print their assigned hostname on an arbitrary stream and
/// wrap it in changing decoration; the contract here is just "contains
/// `trycloudflare.com`": take the first `http…` substring up to whitespace
/// and strip trailing brackets and quotes.
pub fn extract_public_url(line: &str) -> Option<String> {
    if !line.contains("trycloudflare.com") {
        return None;
    }
    let start = line.find("http")?;
    let tail = &line[start..];
    let end = tail
        .find(char::is_whitespace)
        .unwrap_or(tail.len());
    let url = tail[..end].trim_end_matches(['[', ']', '(', ')', '{', '}', '<', '>', '"', '\'']);
    if url.is_empty() {
        None
    } else {
        Some(url.to_string())
    }
}

/// A running tunnel process.
pub struct Tunnel {
    pub pid: Option<u32>,
    child: Child,
    url_rx: Option<mpsc::Receiver<String>>,
}

impl Tunnel {
    /// Wait up to `window` for the quick-tunnel URL. `None` on timeout or
    /// for named tunnels, which never report one.
    pub async fn wait_for_url(&mut self, window: Duration) -> Option<String> {
        let rx = self.url_rx.as_mut()?;
        match tokio::time::timeout(window, rx.recv()).await {
            Ok(Some(url)) => Some(url),
            _ => None,
        }
    }

    /// Signal-only termination; the supervisor owns ordering and grace.
    pub async fn kill(&mut self) {
        if let Some(pid) = self.pid {
            mcpl_process::kill_pid(pid).await;
        }
        let _ = self.child.start_kill();
        let _ = self.child.wait().await;
    }
}

/// Starts tunnels and enforces the one-named-tunnel-per-run rule.
pub struct TunnelController {
    program: String,
    named_started: AtomicBool,
}

impl Default for TunnelController {
    fn default() -> Self {
        Self::with_program("cloudflared")
    }
}

impl TunnelController {
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            named_started: AtomicBool::new(false),
        }
    }

    /// Quick tunnel: `cloudflared tunnel --url http://127.0.0.1:<port>`.
    ///
    /// Both output streams are scanned; the first captured URL lands in a
    /// single-slot channel the supervisor waits on.
    pub fn start_quick(&self, front_port: u16, sink: &StreamSink) -> Result<Tunnel> {
        let args = vec![
            "tunnel".to_string(),
            "--url".to_string(),
            format!("http://127.0.0.1:{front_port}"),
        ];
        let cmd = mcpl_process::build_command(&self.program, &args, &Default::default());
        let mut child = mcpl_process::spawn_group(cmd, StdinMode::Null)
            .context("failed to start quick tunnel")?;
        let pid = child.id();

        let (url_tx, url_rx) = mpsc::channel::<String>(1);
        let hook: LineHook = Arc::new(move |line: &str| {
            if let Some(url) = extract_public_url(line) {
                let _ = url_tx.try_send(url);
            }
        });
        if let Some(stdout) = child.stdout.take() {
            stream_lines(stdout, "tunnel".into(), sink.clone(), Some(hook.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            stream_lines(stderr, "tunnel".into(), sink.clone(), Some(hook));
        }

        debug!(pid, front_port, "quick tunnel started");
        Ok(Tunnel {
            pid,
            child,
            url_rx: Some(url_rx),
        })
    }

    /// Named tunnel: `cloudflared tunnel run [name]`.
    ///
    /// Only the first named tunnel in a run is started; later requests are
    /// no-ops (`None`). One named tunnel can only route to one origin, so a
    /// multi-stack run gets a public URL for the first stack only.
    pub fn start_named(&self, name: Option<&str>, sink: &StreamSink) -> Result<Option<Tunnel>> {
        if self.named_started.swap(true, Ordering::SeqCst) {
            info!("named tunnel already running; skipping");
            return Ok(None);
        }

        let mut args = vec!["tunnel".to_string(), "run".to_string()];
        if let Some(name) = name {
            args.push(name.to_string());
        }
        let cmd = mcpl_process::build_command(&self.program, &args, &Default::default());
        let mut child = mcpl_process::spawn_group(cmd, StdinMode::Null)
            .context("failed to start named tunnel")?;
        let pid = child.id();

        if let Some(stdout) = child.stdout.take() {
            stream_lines(stdout, "tunnel".into(), sink.clone(), None);
        }
        if let Some(stderr) = child.stderr.take() {
            stream_lines(stderr, "tunnel".into(), sink.clone(), None);
        }

        debug!(pid, name = name.unwrap_or(""), "named tunnel started");
        Ok(Some(Tunnel {
            pid,
            child,
            url_rx: None,
        }))
    }
}
