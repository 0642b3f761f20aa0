//! Curation backend for the preflight: the state the terminal UI reads and
//! writes, plus a plain line-oriented driver.
//!
//! The backend is widget-free on purpose. Everything a richer front-end
//! would need (entries with status badges, per-tool enable bits, draft
//! description overrides, accept/cancel) lives in [`CurationSession`]; the
//! driver below is just one way to poke at it.

use mcpl_core::overlay::{CompositeOverlay, ServerOverlay};
use mcpl_core::types::ToolDescriptor;
use std::io::BufRead;
use std::io::Write;

/// Inspection status of one `(instance, server)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerStatus {
    Ok,
    Err(String),
}

/// One row in the curation view.
#[derive(Debug, Clone)]
pub struct CurationEntry {
    /// Composite key, `"<instance>/<server>"`.
    pub key: String,
    pub status: ServerStatus,
    pub tools: Vec<ToolDescriptor>,
}

/// Editable curation state, seeded from the persisted overlay.
pub struct CurationSession {
    entries: Vec<CurationEntry>,
    overlay: CompositeOverlay,
}

impl CurationSession {
    pub fn new(entries: Vec<CurationEntry>, seed: CompositeOverlay) -> Self {
        Self { entries, overlay: seed }
    }

    pub fn entries(&self) -> &[CurationEntry] {
        &self.entries
    }

    fn entry_overlay(&self, key: &str) -> Option<&ServerOverlay> {
        self.overlay.servers.get(key)
    }

    fn entry_overlay_mut(&mut self, key: &str) -> &mut ServerOverlay {
        self.overlay.servers.entry(key.to_string()).or_default()
    }

    pub fn is_server_disabled(&self, key: &str) -> bool {
        self.entry_overlay(key).map(|o| o.disabled).unwrap_or(false)
    }

    pub fn toggle_server(&mut self, key: &str) {
        let overlay = self.entry_overlay_mut(key);
        overlay.disabled = !overlay.disabled;
    }

    pub fn is_tool_enabled(&self, key: &str, tool: &str) -> bool {
        match self.entry_overlay(key) {
            Some(overlay) => overlay.allows(tool),
            None => true,
        }
    }

    /// Flip one tool. An existing allow-set is edited in place; otherwise
    /// the deny-set carries the change.
    pub fn set_tool_enabled(&mut self, key: &str, tool: &str, enabled: bool) {
        let overlay = self.entry_overlay_mut(key);
        if let Some(allow) = overlay.allow.as_mut() {
            if enabled {
                allow.insert(tool.to_string());
            } else {
                allow.remove(tool);
            }
            return;
        }
        if enabled {
            overlay.deny.remove(tool);
        } else {
            overlay.deny.insert(tool.to_string());
        }
    }

    pub fn description_override(&self, key: &str, tool: &str) -> Option<&str> {
        self.entry_overlay(key)?
            .descriptions
            .get(tool)
            .map(String::as_str)
    }

    pub fn set_description(&mut self, key: &str, tool: &str, text: &str) {
        let overlay = self.entry_overlay_mut(key);
        if text.is_empty() {
            overlay.descriptions.remove(tool);
        } else {
            overlay
                .descriptions
                .insert(tool.to_string(), text.to_string());
        }
    }

    /// Final composite overlay; overlays that change nothing are pruned so
    /// accepting without edits reproduces the seed.
    pub fn finish(mut self) -> CompositeOverlay {
        self.overlay.servers.retain(|_, overlay| !overlay.is_neutral());
        self.overlay
    }
}

fn styled() -> bool {
    std::env::var_os("NO_COLOR").is_none()
        && std::env::var("TERM").map(|t| t != "dumb").unwrap_or(true)
}

fn badge(status: &ServerStatus) -> String {
    match (status, styled()) {
        (ServerStatus::Ok, true) => "\x1b[32mOK \x1b[0m".to_string(),
        (ServerStatus::Ok, false) => "OK ".to_string(),
        (ServerStatus::Err(_), true) => "\x1b[31mERR\x1b[0m".to_string(),
        (ServerStatus::Err(_), false) => "ERR".to_string(),
    }
}

fn print_listing(session: &CurationSession) {
    println!();
    for entry in session.entries() {
        let disabled = if session.is_server_disabled(&entry.key) {
            "  [disabled]"
        } else {
            ""
        };
        println!("{} {}{disabled}", badge(&entry.status), entry.key);
        if let ServerStatus::Err(text) = &entry.status {
            println!("      {text}");
        }
        for tool in &entry.tools {
            let mark = if session.is_tool_enabled(&entry.key, &tool.name) {
                "[x]"
            } else {
                "[ ]"
            };
            let override_mark = if session.description_override(&entry.key, &tool.name).is_some() {
                " *"
            } else {
                ""
            };
            println!("      {mark} {}{override_mark}", tool.name);
        }
    }
    println!();
    println!("commands: toggle KEY | off KEY TOOL | on KEY TOOL | desc KEY TOOL TEXT | list | go | cancel");
}

/// Drive a [`CurationSession`] over plain stdin/stdout.
///
/// Returns the edited overlay, or `None` when the operator cancels.
pub fn run_terminal_curation(mut session: CurationSession) -> Option<CompositeOverlay> {
    print_listing(&session);
    let stdin = std::io::stdin();
    let mut line = String::new();
    loop {
        print!("> ");
        let _ = std::io::stdout().flush();
        line.clear();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => return None,
            Ok(_) => {}
            Err(_) => return None,
        }
        let mut parts = line.trim().splitn(4, ' ');
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some("go"), ..) => return Some(session.finish()),
            (Some("cancel"), ..) | (Some("quit"), ..) => return None,
            (Some("list"), ..) | (Some(""), ..) => print_listing(&session),
            (Some("toggle"), Some(key), ..) => {
                session.toggle_server(key);
                print_listing(&session);
            }
            (Some("off"), Some(key), Some(tool), _) => {
                session.set_tool_enabled(key, tool, false);
                print_listing(&session);
            }
            (Some("on"), Some(key), Some(tool), _) => {
                session.set_tool_enabled(key, tool, true);
                print_listing(&session);
            }
            (Some("desc"), Some(key), Some(tool), text) => {
                session.set_description(key, tool, text.unwrap_or("").trim());
                print_listing(&session);
            }
            _ => println!("unrecognized command"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn tool(name: &str) -> ToolDescriptor {
        ToolDescriptor {
            name: name.into(),
            title: None,
            description: None,
        }
    }

    fn session_with_seed(seed: CompositeOverlay) -> CurationSession {
        CurationSession::new(
            vec![
                CurationEntry {
                    key: "alpha/fs".into(),
                    status: ServerStatus::Ok,
                    tools: vec![tool("read"), tool("write")],
                },
                CurationEntry {
                    key: "alpha/web".into(),
                    status: ServerStatus::Err("init read: deadline exceeded".into()),
                    tools: Vec::new(),
                },
            ],
            seed,
        )
    }

    #[test]
    fn errored_servers_stay_visible() {
        let session = session_with_seed(CompositeOverlay::default());
        assert_eq!(session.entries().len(), 2);
        assert!(matches!(
            session.entries()[1].status,
            ServerStatus::Err(ref text) if text.contains("deadline")
        ));
    }

    #[test]
    fn toggling_and_tool_edits_round_trip() {
        let mut session = session_with_seed(CompositeOverlay::default());
        assert!(!session.is_server_disabled("alpha/web"));
        session.toggle_server("alpha/web");
        assert!(session.is_server_disabled("alpha/web"));

        assert!(session.is_tool_enabled("alpha/fs", "write"));
        session.set_tool_enabled("alpha/fs", "write", false);
        assert!(!session.is_tool_enabled("alpha/fs", "write"));
        session.set_tool_enabled("alpha/fs", "write", true);
        assert!(session.is_tool_enabled("alpha/fs", "write"));

        session.set_description("alpha/fs", "read", "Reads files verbatim");
        assert_eq!(
            session.description_override("alpha/fs", "read"),
            Some("Reads files verbatim")
        );
        session.set_description("alpha/fs", "read", "");
        assert_eq!(session.description_override("alpha/fs", "read"), None);
    }

    #[test]
    fn allow_set_edits_stay_in_the_allow_set() {
        let mut seed = CompositeOverlay::default();
        seed.insert(
            "alpha",
            "fs",
            ServerOverlay {
                allow: Some(BTreeSet::from(["read".to_string()])),
                ..ServerOverlay::default()
            },
        );
        let mut session = session_with_seed(seed);

        assert!(!session.is_tool_enabled("alpha/fs", "write"));
        session.set_tool_enabled("alpha/fs", "write", true);
        assert!(session.is_tool_enabled("alpha/fs", "write"));

        let overlay = session.finish();
        let fs = &overlay.servers["alpha/fs"];
        assert!(fs.allow.as_ref().unwrap().contains("write"));
        assert!(fs.deny.is_empty());
    }

    #[test]
    fn accepting_without_edits_reproduces_the_seed() {
        let mut seed = CompositeOverlay {
            last_launch: "t".into(),
            ..CompositeOverlay::default()
        };
        seed.insert(
            "alpha",
            "fs",
            ServerOverlay {
                deny: BTreeSet::from(["write".to_string()]),
                ..ServerOverlay::default()
            },
        );

        let session = session_with_seed(seed.clone());
        assert_eq!(session.finish(), seed);
    }

    #[test]
    fn neutral_edits_are_pruned() {
        let mut session = session_with_seed(CompositeOverlay::default());
        // Disable then re-enable: no net change, nothing persisted.
        session.toggle_server("alpha/fs");
        session.toggle_server("alpha/fs");
        session.set_tool_enabled("alpha/fs", "read", false);
        session.set_tool_enabled("alpha/fs", "read", true);

        let overlay = session.finish();
        assert!(overlay.servers.is_empty());
    }
}
