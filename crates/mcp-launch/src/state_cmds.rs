//! Commands over the recorded state of the last `up`: status, share,
//! openapi, down.

use anyhow::{Context, Result, bail};
use mcpl_config::{StateFile, StateLayout, load_state};

fn recorded_state(layout: &StateLayout) -> Result<StateFile> {
    load_state(layout).with_context(|| {
        format!(
            "no recorded stacks at {} (run `mcp-launch up` first)",
            layout.state_file().display()
        )
    })
}

pub fn handle_status() -> Result<()> {
    let layout = StateLayout::discover()?;
    let state = recorded_state(&layout)?;

    println!("recorded at {}", state.saved_at);
    for record in &state.instances {
        let instance = &record.instance;
        let liveness = match instance.gateway_pid {
            Some(pid) if pid_alive(pid) => format!("running (pid {pid})"),
            Some(pid) => format!("gone (was pid {pid})"),
            None => "never started".to_string(),
        };
        println!(
            "{}: front {} gateway {} {}",
            instance.name, instance.front_port, instance.gateway_port, liveness
        );
        println!("  url: {}", instance.effective_url());
        let tool_total: usize = record.tools.values().map(Vec::len).sum();
        println!(
            "  servers: {}  tools: {}  operations: {}",
            record.tools.len(),
            tool_total,
            instance.diagnostics.total_operations
        );
    }
    Ok(())
}

pub fn handle_share() -> Result<()> {
    let layout = StateLayout::discover()?;
    let state = recorded_state(&layout)?;

    for record in &state.instances {
        let instance = &record.instance;
        println!("== {} ==", instance.name);
        println!("  Import URL: {}/openapi.json", instance.effective_url());
        println!("  API key:    {} (header X-API-Key)", instance.api_key);
    }
    Ok(())
}

pub fn handle_openapi(instance: Option<&str>, print: bool) -> Result<()> {
    let layout = StateLayout::discover()?;
    let state = recorded_state(&layout)?;

    let mut matched = false;
    for record in &state.instances {
        let name = &record.instance.name;
        if instance.is_some_and(|wanted| wanted != name) {
            continue;
        }
        matched = true;
        let artifact = layout.openapi_artifact(name);
        if !artifact.exists() {
            println!("{name}: no merged document (merge failed or never ran)");
            continue;
        }
        if print {
            let contents = std::fs::read_to_string(&artifact)
                .with_context(|| format!("failed to read {}", artifact.display()))?;
            println!("{contents}");
        } else {
            println!("{name}: {}", artifact.display());
        }
    }
    if !matched {
        bail!("no recorded instance named '{}'", instance.unwrap_or(""));
    }
    Ok(())
}

pub async fn handle_down() -> Result<()> {
    let layout = StateLayout::discover()?;
    let state = recorded_state(&layout)?;

    for record in &state.instances {
        let instance = &record.instance;
        if let Some(pid) = instance.tunnel_pid {
            println!("{}: stopping tunnel (pid {pid})", instance.name);
            mcpl_process::kill_pid(pid).await;
        }
        if let Some(pid) = instance.gateway_pid {
            println!("{}: stopping gateway group (pid {pid})", instance.name);
            mcpl_process::kill_process_group(pid).await;
        }
    }

    std::fs::remove_file(layout.state_file())
        .with_context(|| format!("failed to clear {}", layout.state_file().display()))?;
    println!("state cleared");
    Ok(())
}

#[cfg(unix)]
fn pid_alive(pid: u32) -> bool {
    // SAFETY: signal 0 performs only the existence/permission check.
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

#[cfg(not(unix))]
fn pid_alive(_pid: u32) -> bool {
    false
}
