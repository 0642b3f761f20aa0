use anyhow::{Context, Result, bail};
use mcpl_config::{
    InstanceRecord, LaunchConfig, StateLayout, load_overlay, save_state, write_filtered_clone,
};
use mcpl_core::overlay::NestedOverlay;
use mcpl_core::types::{Instance, InstanceDiagnostics, generate_api_key, instance_name_from_path};
use mcpl_process::{SharedLog, StreamSink};
use mcpl_stack::{RunningStack, StackOptions, TunnelController, reserve_port, start_stack, supervise_all};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use crate::cli::UpArgs;
use crate::preflight::run_preflight;
use crate::report::{StackSummary, print_report};

/// Launch one stack per config: preflight, clone, start, report, supervise.
pub async fn handle_up(args: UpArgs) -> Result<i32> {
    let layout = StateLayout::discover()?;
    layout.ensure_root()?;

    let config_paths = if args.configs.is_empty() {
        vec![PathBuf::from("mcp.config.json")]
    } else {
        args.configs.clone()
    };

    // A bad config forfeits its instance, not the run.
    let mut configs = Vec::new();
    for path in &config_paths {
        match LaunchConfig::load(path) {
            Ok(config) => configs.push(config),
            Err(error) => {
                warn!(path = %path.display(), error = %format!("{error:#}"), "skipping config");
            }
        }
    }
    if configs.is_empty() {
        bail!("no usable config: nothing to launch");
    }

    let pairs = build_instances(&args, configs)?;

    // Curated preflight with --tui, persisted overlay otherwise.
    let (overlay, tools) = if args.tui {
        match run_preflight(&pairs, &layout, true).await? {
            Some(preflight) => (preflight.overlay, preflight.tools),
            None => {
                println!("cancelled");
                return Ok(0);
            }
        }
    } else {
        let composite = load_overlay(&layout).unwrap_or_default();
        let known: Vec<String> = pairs.iter().map(|(i, _)| i.name.clone()).collect();
        (
            NestedOverlay::from_composite(&composite, &known),
            BTreeMap::new(),
        )
    };

    let sink = StreamSink {
        echo: args.verbose >= 1 || args.stream,
        log: match &args.log_file {
            Some(path) => Some(SharedLog::open(path)?),
            None => None,
        },
    };
    let options = StackOptions {
        sink,
        tunnel: Arc::new(TunnelController::default()),
        tunnel_name: args.tunnel_name.clone(),
        ..StackOptions::default()
    };

    let mut stacks: Vec<RunningStack> = Vec::new();
    let mut server_counts = BTreeMap::new();
    for (mut instance, config) in pairs {
        let name = instance.name.clone();
        if let Some(discovered) = tools.get(&name) {
            instance.diagnostics.tool_count = discovered.values().map(Vec::len).sum();
        }
        let enabled_servers = config
            .server_names()
            .into_iter()
            .filter(|s| !overlay.is_disabled(&name, s))
            .count();
        server_counts.insert(name.clone(), enabled_servers);

        let cloned = match write_filtered_clone(&config, &name, &overlay, &layout) {
            Ok(path) => path,
            Err(error) => {
                warn!(instance = %name, error = %format!("{error:#}"), "failed to clone config; skipping");
                continue;
            }
        };
        match start_stack(instance, &cloned, &config.server_names(), &overlay, &options).await {
            Ok(stack) => {
                info!(instance = %stack.instance.name, url = %stack.instance.effective_url(), "stack up");
                if let Some(merge) = &stack.merge {
                    let artifact = layout.openapi_artifact(&stack.instance.name);
                    if let Err(error) = std::fs::write(&artifact, &merge.bytes) {
                        warn!(path = %artifact.display(), error = %error, "failed to write openapi artifact");
                    }
                }
                stacks.push(stack);
            }
            Err(error) => {
                warn!(instance = %name, error = %format!("{error:#}"), "instance failed to start; continuing");
            }
        }
    }
    if stacks.is_empty() {
        bail!("no stack started");
    }

    let summaries: Vec<StackSummary<'_>> = stacks
        .iter()
        .map(|stack| StackSummary {
            instance: &stack.instance,
            server_count: server_counts
                .get(&stack.instance.name)
                .copied()
                .unwrap_or_default(),
            merge_error: stack.merge_error.as_deref(),
        })
        .collect();
    print_report(&summaries, args.verbose >= 1);

    let records: Vec<InstanceRecord> = stacks
        .iter()
        .map(|stack| InstanceRecord {
            instance: stack.instance.clone(),
            tools: tools.get(&stack.instance.name).cloned().unwrap_or_default(),
        })
        .collect();
    save_state(&layout, records)?;

    println!("press Ctrl-C to stop");
    let finished = supervise_all(stacks, &options).await?;
    info!(stacks = finished.len(), "run complete");
    Ok(0)
}

/// Reserve ports, pick API keys, and bind configs to instances.
fn build_instances(
    args: &UpArgs,
    configs: Vec<LaunchConfig>,
) -> Result<Vec<(Instance, LaunchConfig)>> {
    let mut taken = BTreeSet::new();
    let mut used_names = BTreeSet::new();
    let shared_key = if args.shared_key {
        Some(
            args.api_key
                .clone()
                .unwrap_or_else(generate_api_key),
        )
    } else {
        args.api_key.clone()
    };

    let mut pairs = Vec::new();
    for (i, config) in configs.into_iter().enumerate() {
        let offset = u16::try_from(i).context("too many configs")?;
        let mut name = instance_name_from_path(&config.path);
        let mut suffix = 2;
        while !used_names.insert(name.clone()) {
            name = format!("{}_{suffix}", instance_name_from_path(&config.path));
            suffix += 1;
        }

        let front_port = reserve_port(
            args.port.checked_add(offset).context("front port overflow")?,
            &mut taken,
        );
        let gateway_port = reserve_port(
            args.mcpo_port
                .checked_add(offset)
                .context("gateway port overflow")?,
            &mut taken,
        );

        let instance = Instance {
            name,
            config_path: config.path.clone(),
            front_port,
            gateway_port,
            api_key: shared_key.clone().unwrap_or_else(generate_api_key),
            tunnel_mode: args.tunnel,
            public_url: args.public_urls.get(i).cloned(),
            gateway_pid: None,
            tunnel_pid: None,
            diagnostics: InstanceDiagnostics::default(),
        };
        pairs.push((instance, config));
    }
    Ok(pairs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use mcpl_core::types::TunnelMode;
    use std::path::Path;

    fn up_args(argv: &[&str]) -> UpArgs {
        let mut full = vec!["mcp-launch", "up"];
        full.extend_from_slice(argv);
        let crate::cli::Cli { command } = crate::cli::Cli::parse_from(full);
        match command {
            crate::cli::Commands::Up(args) => args,
            _ => panic!("expected up"),
        }
    }

    fn write_config(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(
            &path,
            r#"{"mcpServers": {"fs": {"command": "true"}}}"#,
        )
        .unwrap();
        path
    }

    #[test]
    fn instances_get_distinct_ports_and_keys() {
        let temp = tempfile::tempdir().unwrap();
        let a = write_config(temp.path(), "code.json");
        let b = write_config(temp.path(), "data.json");
        let args = up_args(&[
            "--config",
            a.to_str().unwrap(),
            "--config",
            b.to_str().unwrap(),
        ]);

        let configs = vec![
            LaunchConfig::load(&a).unwrap(),
            LaunchConfig::load(&b).unwrap(),
        ];
        let pairs = build_instances(&args, configs).unwrap();
        assert_eq!(pairs.len(), 2);
        let (first, second) = (&pairs[0].0, &pairs[1].0);

        assert_eq!(first.name, "code");
        assert_eq!(second.name, "data");
        let mut ports = BTreeSet::new();
        for port in [
            first.front_port,
            first.gateway_port,
            second.front_port,
            second.gateway_port,
        ] {
            assert!(ports.insert(port), "port {port} reused");
        }
        assert!(first.front_port >= 8000);
        assert!(second.front_port >= 8001);
        assert!(first.gateway_port >= 8800);
        assert!(second.gateway_port >= 8801);

        assert_eq!(first.api_key.len(), 40);
        assert_eq!(second.api_key.len(), 40);
        assert_ne!(first.api_key, second.api_key);
        assert_eq!(first.tunnel_mode, TunnelMode::Quick);
    }

    #[test]
    fn shared_key_is_applied_to_all_instances() {
        let temp = tempfile::tempdir().unwrap();
        let a = write_config(temp.path(), "code.json");
        let b = write_config(temp.path(), "data.json");
        let args = up_args(&[
            "--config",
            a.to_str().unwrap(),
            "--config",
            b.to_str().unwrap(),
            "--shared-key",
            "--api-key",
            "fixed-key-value",
        ]);

        let configs = vec![
            LaunchConfig::load(&a).unwrap(),
            LaunchConfig::load(&b).unwrap(),
        ];
        let pairs = build_instances(&args, configs).unwrap();
        assert_eq!(pairs[0].0.api_key, "fixed-key-value");
        assert_eq!(pairs[1].0.api_key, "fixed-key-value");
    }

    #[test]
    fn duplicate_basenames_get_suffixes() {
        let temp = tempfile::tempdir().unwrap();
        let dir_a = temp.path().join("a");
        let dir_b = temp.path().join("b");
        std::fs::create_dir_all(&dir_a).unwrap();
        std::fs::create_dir_all(&dir_b).unwrap();
        let a = write_config(&dir_a, "mcp.config.json");
        let b = write_config(&dir_b, "mcp.config.json");
        let args = up_args(&[
            "--config",
            a.to_str().unwrap(),
            "--config",
            b.to_str().unwrap(),
        ]);

        let configs = vec![
            LaunchConfig::load(&a).unwrap(),
            LaunchConfig::load(&b).unwrap(),
        ];
        let pairs = build_instances(&args, configs).unwrap();
        assert_eq!(pairs[0].0.name, "mcp_config");
        assert_eq!(pairs[1].0.name, "mcp_config_2");
    }

    #[test]
    fn public_urls_bind_by_position() {
        let temp = tempfile::tempdir().unwrap();
        let a = write_config(temp.path(), "code.json");
        let b = write_config(temp.path(), "data.json");
        let args = up_args(&[
            "--config",
            a.to_str().unwrap(),
            "--config",
            b.to_str().unwrap(),
            "--tunnel",
            "named",
            "--public-url",
            "https://only-first.example.com",
        ]);

        let configs = vec![
            LaunchConfig::load(&a).unwrap(),
            LaunchConfig::load(&b).unwrap(),
        ];
        let pairs = build_instances(&args, configs).unwrap();
        assert_eq!(
            pairs[0].0.public_url.as_deref(),
            Some("https://only-first.example.com")
        );
        assert_eq!(pairs[1].0.public_url, None);
    }
}
