use anyhow::{Context, Result};
use mcpl_core::error::LaunchError;
use mcpl_core::overlay::NestedOverlay;
use mcpl_core::types::{Instance, TunnelMode};
use mcpl_openapi::{MergeOutput, merge_instance};
use mcpl_process::{StdinMode, StreamSink, build_command, kill_process_group, spawn_group, stream_lines};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::proxy::FrontProxy;
use crate::tunnel::{QUICK_TUNNEL_WAIT, Tunnel, TunnelController};

const READINESS_POLL: Duration = Duration::from_millis(500);
const READINESS_TIMEOUT: Duration = Duration::from_secs(60);
const PROXY_CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Knobs shared by every stack in a run.
#[derive(Clone)]
pub struct StackOptions {
    /// Gateway binary; the real one is `mcpo`.
    pub gateway_program: String,
    /// Echo/log sinks for child stdio.
    pub sink: StreamSink,
    /// Shared so the one-named-tunnel-per-run rule holds across stacks.
    pub tunnel: Arc<TunnelController>,
    pub tunnel_name: Option<String>,
    pub readiness_poll: Duration,
    pub readiness_timeout: Duration,
    pub quick_tunnel_wait: Duration,
    pub proxy_close_grace: Duration,
}

impl Default for StackOptions {
    fn default() -> Self {
        Self {
            gateway_program: "mcpo".to_string(),
            sink: StreamSink::default(),
            tunnel: Arc::new(TunnelController::default()),
            tunnel_name: None,
            readiness_poll: READINESS_POLL,
            readiness_timeout: READINESS_TIMEOUT,
            quick_tunnel_wait: QUICK_TUNNEL_WAIT,
            proxy_close_grace: PROXY_CLOSE_GRACE,
        }
    }
}

/// One started stack, ready for supervision.
pub struct RunningStack {
    pub instance: Instance,
    pub proxy: FrontProxy,
    /// Merge result; `None` when the merge failed and `/openapi.json` serves 503.
    pub merge: Option<MergeOutput>,
    pub merge_error: Option<String>,
    gateway: Option<Child>,
    tunnel: Option<Tunnel>,
}

impl std::fmt::Debug for RunningStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunningStack")
            .field("instance", &self.instance)
            .field("merge_error", &self.merge_error)
            .finish_non_exhaustive()
    }
}

/// Start one instance: gateway, readiness, front proxy, tunnel, merge.
///
/// A readiness timeout is fatal for this instance (the caller skips it); a
/// failed merge or missed tunnel URL degrades it but keeps it running.
pub async fn start_stack(
    mut instance: Instance,
    cloned_config: &Path,
    server_names: &[String],
    overlay: &NestedOverlay,
    options: &StackOptions,
) -> Result<RunningStack> {
    let args = vec![
        "--port".to_string(),
        instance.gateway_port.to_string(),
        "--api-key".to_string(),
        instance.api_key.clone(),
        "--config".to_string(),
        cloned_config.display().to_string(),
        "--hot-reload".to_string(),
    ];
    let cmd = build_command(&options.gateway_program, &args, &BTreeMap::new());
    let mut gateway = spawn_group(cmd, StdinMode::Null)
        .with_context(|| format!("failed to start gateway for '{}'", instance.name))?;
    let gateway_pid = gateway
        .id()
        .with_context(|| format!("gateway for '{}' exited before reporting a PID", instance.name))?;
    instance.gateway_pid = Some(gateway_pid);

    let tag = format!("mcpo:{}", instance.name);
    if let Some(stdout) = gateway.stdout.take() {
        stream_lines(stdout, tag.clone(), options.sink.clone(), None);
    }
    if let Some(stderr) = gateway.stderr.take() {
        stream_lines(stderr, tag, options.sink.clone(), None);
    }

    let client = reqwest::Client::new();
    if let Err(error) = wait_until_ready(
        &client,
        instance.gateway_port,
        options.readiness_poll,
        options.readiness_timeout,
    )
    .await
    {
        kill_process_group(gateway_pid).await;
        return Err(error).with_context(|| format!("instance '{}' never became ready", instance.name));
    }

    let proxy = match FrontProxy::start(instance.front_port, instance.gateway_port).await {
        Ok(proxy) => proxy,
        Err(error) => {
            kill_process_group(gateway_pid).await;
            return Err(error);
        }
    };

    let tunnel = start_tunnel(&mut instance, options).await;
    instance.tunnel_pid = tunnel.as_ref().and_then(|t| t.pid);

    let base_url = instance.effective_url();
    let mut merge = None;
    let mut merge_error = None;
    match merge_instance(&instance, &base_url, server_names, overlay).await {
        Ok(output) => {
            proxy.set_openapi(output.bytes.clone()).await;
            instance.diagnostics.total_operations = output.total_operations;
            instance.diagnostics.operations_per_server = output.operations_per_server.clone();
            instance.diagnostics.long_descriptions = output.long_descriptions.clone();
            merge = Some(output);
        }
        Err(error) => {
            // The proxy keeps serving 503 for /openapi.json and forwarding
            // everything else.
            warn!(instance = %instance.name, error = %format!("{error:#}"), "merge failed");
            merge_error = Some(format!("{error:#}"));
        }
    }

    Ok(RunningStack {
        instance,
        proxy,
        merge,
        merge_error,
        gateway: Some(gateway),
        tunnel,
    })
}

async fn start_tunnel(instance: &mut Instance, options: &StackOptions) -> Option<Tunnel> {
    match instance.tunnel_mode {
        TunnelMode::None => None,
        TunnelMode::Quick => match options.tunnel.start_quick(instance.front_port, &options.sink) {
            Ok(mut tunnel) => {
                match tunnel.wait_for_url(options.quick_tunnel_wait).await {
                    Some(url) => {
                        info!(instance = %instance.name, url = %url, "quick tunnel up");
                        instance.public_url = Some(url);
                    }
                    None => {
                        let error =
                            LaunchError::TunnelTimeout(options.quick_tunnel_wait.as_secs());
                        warn!(instance = %instance.name, error = %error, "continuing with local URL");
                    }
                }
                Some(tunnel)
            }
            Err(error) => {
                warn!(instance = %instance.name, error = %error, "failed to start quick tunnel");
                None
            }
        },
        TunnelMode::Named => {
            match options
                .tunnel
                .start_named(options.tunnel_name.as_deref(), &options.sink)
            {
                Ok(tunnel) => tunnel,
                Err(error) => {
                    warn!(instance = %instance.name, error = %error, "failed to start named tunnel");
                    None
                }
            }
        }
    }
}

/// Any HTTP response from `/docs`, even 4xx, proves the gateway is alive.
async fn wait_until_ready(
    client: &reqwest::Client,
    port: u16,
    poll: Duration,
    timeout: Duration,
) -> Result<()> {
    let url = format!("http://127.0.0.1:{port}/docs");
    let deadline = Instant::now() + timeout;
    let mut ticker = tokio::time::interval(poll);
    loop {
        ticker.tick().await;
        if client.get(&url).send().await.is_ok() {
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(LaunchError::Readiness {
                port,
                timeout_secs: timeout.as_secs(),
            }
            .into());
        }
    }
}

/// Block until a signal arrives or any gateway exits, then tear everything
/// down. Returns the final instance records for reporting.
pub async fn supervise_all(
    mut stacks: Vec<RunningStack>,
    options: &StackOptions,
) -> Result<Vec<Instance>> {
    if stacks.is_empty() {
        return Ok(Vec::new());
    }

    let (exit_tx, mut exit_rx) = mpsc::channel::<String>(stacks.len());
    for stack in &mut stacks {
        if let Some(mut child) = stack.gateway.take() {
            let name = stack.instance.name.clone();
            let tx = exit_tx.clone();
            tokio::spawn(async move {
                let _ = child.wait().await;
                let _ = tx.send(name).await;
            });
        }
    }
    drop(exit_tx);

    wait_for_shutdown_signal(&mut exit_rx).await?;
    Ok(shutdown_stacks(stacks, options).await)
}

#[cfg(unix)]
async fn wait_for_shutdown_signal(exit_rx: &mut mpsc::Receiver<String>) -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};
    let mut term =
        signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("failed to wait for interrupt")?;
            info!("interrupt received; shutting down");
        }
        _ = term.recv() => {
            info!("termination signal received; shutting down");
        }
        name = exit_rx.recv() => {
            if let Some(name) = name {
                warn!(instance = %name, "gateway exited; tearing down the run");
            }
        }
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal(exit_rx: &mut mpsc::Receiver<String>) -> Result<()> {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("failed to wait for interrupt")?;
            info!("interrupt received; shutting down");
        }
        name = exit_rx.recv() => {
            if let Some(name) = name {
                warn!(instance = %name, "gateway exited; tearing down the run");
            }
        }
    }
    Ok(())
}

/// Teardown, in order, bounded by short timeouts per step:
/// front proxy (graceful), tunnel (signal only), gateway process group
/// (the tree-kill that reaps the MCP children the gateway spawned).
pub async fn shutdown_stacks(stacks: Vec<RunningStack>, options: &StackOptions) -> Vec<Instance> {
    let mut instances = Vec::new();
    for stack in stacks {
        let RunningStack {
            instance,
            proxy,
            mut tunnel,
            ..
        } = stack;

        proxy.close(options.proxy_close_grace).await;
        if let Some(tunnel) = tunnel.as_mut() {
            tunnel.kill().await;
        }
        if let Some(pid) = instance.gateway_pid {
            kill_process_group(pid).await;
        }
        info!(instance = %instance.name, "stack shut down");
        instances.push(instance);
    }
    instances
}

#[cfg(test)]
#[path = "supervisor_tests.rs"]
mod tests;
