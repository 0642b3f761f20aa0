//! Environment diagnostics: platform, required binaries, state directory.

use anyhow::Result;
use mcpl_config::StateLayout;
use std::env;

struct BinaryStatus {
    name: &'static str,
    required: bool,
    path: Option<String>,
}

fn install_hint(name: &str) -> &'static str {
    match name {
        "mcpo" => "uv tool install mcpo (or pipx install mcpo)",
        "cloudflared" => "https://developers.cloudflare.com/cloudflare-one/connections/connect-networks/downloads/",
        "npx" => "install Node.js",
        "uvx" => "install uv (https://docs.astral.sh/uv/)",
        _ => "unknown binary",
    }
}

pub fn handle_doctor() -> Result<()> {
    println!("=== mcp-launch environment ===");
    println!("Platform:   {} {}", env::consts::OS, env::consts::ARCH);
    println!("Version:    {}", env!("CARGO_PKG_VERSION"));
    let layout = StateLayout::discover()?;
    println!(
        "State dir:  {} ({})",
        layout.root().display(),
        if layout.root().exists() {
            "present"
        } else {
            "not created yet"
        }
    );
    println!();

    println!("=== binaries ===");
    let binaries = [
        check_binary("mcpo", true),
        check_binary("cloudflared", false),
        check_binary("npx", false),
        check_binary("uvx", false),
    ];
    let mut missing_required = 0;
    for status in &binaries {
        let mark = if status.path.is_some() { "✓" } else { "✗" };
        let role = if status.required { "required" } else { "optional" };
        match &status.path {
            Some(path) => println!("{mark} {:<12} {role:<9} {path}", status.name),
            None => {
                if status.required {
                    missing_required += 1;
                }
                println!(
                    "{mark} {:<12} {role:<9} not found; {}",
                    status.name,
                    install_hint(status.name)
                );
            }
        }
    }

    println!();
    if missing_required == 0 {
        println!("ready to launch");
    } else {
        println!("required binaries missing: {missing_required}");
    }
    Ok(())
}

fn check_binary(name: &'static str, required: bool) -> BinaryStatus {
    let path = which::which(name)
        .ok()
        .map(|p| p.display().to_string());
    BinaryStatus {
        name,
        required,
        path,
    }
}
