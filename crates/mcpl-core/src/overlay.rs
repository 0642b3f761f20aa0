//! Operator-curated filtering and description overrides.
//!
//! The overlay exists in two shapes. The composite form is what the curation
//! UI edits and what `.mcp-launch/overrides.json` persists: one flat map
//! keyed `"<instance>/<server>"`. The nested form is what the launch path
//! consumes: instance → server → overlay. Neither is derivable without the
//! split rule, so both live here along with the translation.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Separator joining instance and server in composite keys.
pub const KEY_SEPARATOR: char = '/';

/// Curation state for one `(instance, server)` pair.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerOverlay {
    /// Disabled servers are removed from the cloned gateway config and
    /// contribute nothing to the merged OpenAPI.
    pub disabled: bool,
    /// When present, only listed tools pass; an empty set rejects everything.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow: Option<BTreeSet<String>>,
    /// Consulted only when no allow-set is present.
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    pub deny: BTreeSet<String>,
    /// Per-tool description overrides applied at merge time.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub descriptions: BTreeMap<String, String>,
}

impl ServerOverlay {
    /// Filter verdict for one tool on this server.
    pub fn allows(&self, tool: &str) -> bool {
        if self.disabled {
            return false;
        }
        if let Some(allow) = &self.allow {
            return allow.contains(tool);
        }
        !self.deny.contains(tool)
    }

    /// True when this overlay changes nothing.
    pub fn is_neutral(&self) -> bool {
        !self.disabled
            && self.allow.is_none()
            && self.deny.is_empty()
            && self.descriptions.is_empty()
    }
}

/// Persisted, UI-facing overlay: flat `"<instance>/<server>"` keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompositeOverlay {
    pub servers: BTreeMap<String, ServerOverlay>,
    pub last_launch: String,
}

impl CompositeOverlay {
    pub fn composite_key(instance: &str, server: &str) -> String {
        format!("{instance}{KEY_SEPARATOR}{server}")
    }

    pub fn get(&self, instance: &str, server: &str) -> Option<&ServerOverlay> {
        self.servers.get(&Self::composite_key(instance, server))
    }

    pub fn insert(&mut self, instance: &str, server: &str, overlay: ServerOverlay) {
        self.servers
            .insert(Self::composite_key(instance, server), overlay);
    }
}

/// Runtime overlay reshaped as instance → server → state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NestedOverlay {
    pub instances: BTreeMap<String, BTreeMap<String, ServerOverlay>>,
}

impl NestedOverlay {
    /// Reshape a composite overlay.
    ///
    /// Composite keys split on the first separator; entries naming unknown
    /// instances are discarded. Every known instance gets an entry even when
    /// the composite carried nothing for it, so lookups never miss.
    pub fn from_composite(composite: &CompositeOverlay, known_instances: &[String]) -> Self {
        let mut instances: BTreeMap<String, BTreeMap<String, ServerOverlay>> = known_instances
            .iter()
            .map(|name| (name.clone(), BTreeMap::new()))
            .collect();

        for (key, overlay) in &composite.servers {
            let Some((instance, server)) = key.split_once(KEY_SEPARATOR) else {
                continue;
            };
            let Some(servers) = instances.get_mut(instance) else {
                continue;
            };
            servers.insert(server.to_string(), overlay.clone());
        }

        Self { instances }
    }

    /// Reverse of [`from_composite`]: re-join the split keys.
    ///
    /// [`from_composite`]: NestedOverlay::from_composite
    pub fn to_composite(&self, last_launch: String) -> CompositeOverlay {
        let mut composite = CompositeOverlay {
            last_launch,
            ..CompositeOverlay::default()
        };
        for (instance, servers) in &self.instances {
            for (server, overlay) in servers {
                composite.insert(instance, server, overlay.clone());
            }
        }
        composite
    }

    pub fn server(&self, instance: &str, server: &str) -> Option<&ServerOverlay> {
        self.instances.get(instance)?.get(server)
    }

    pub fn is_disabled(&self, instance: &str, server: &str) -> bool {
        self.server(instance, server)
            .map(|o| o.disabled)
            .unwrap_or(false)
    }

    /// Filter verdict for one tool. Absent overlays allow everything.
    pub fn allowed(&self, instance: &str, server: &str, tool: &str) -> bool {
        match self.server(instance, server) {
            Some(overlay) => overlay.allows(tool),
            None => true,
        }
    }

    /// Non-empty description override for one tool, if any.
    pub fn description_override(&self, instance: &str, server: &str, tool: &str) -> Option<&str> {
        let text = self.server(instance, server)?.descriptions.get(tool)?;
        if text.is_empty() { None } else { Some(text) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn overlay_with(
        disabled: bool,
        allow: Option<&[&str]>,
        deny: &[&str],
    ) -> ServerOverlay {
        ServerOverlay {
            disabled,
            allow: allow.map(|a| a.iter().map(|s| s.to_string()).collect()),
            deny: deny.iter().map(|s| s.to_string()).collect(),
            descriptions: BTreeMap::new(),
        }
    }

    #[test]
    fn disabled_server_rejects_all_tools() {
        let overlay = overlay_with(true, Some(&["read"]), &[]);
        assert!(!overlay.allows("read"));
    }

    #[test]
    fn allow_set_is_exclusive() {
        let overlay = overlay_with(false, Some(&["read"]), &["read"]);
        // Allow wins over deny, and membership decides.
        assert!(overlay.allows("read"));
        assert!(!overlay.allows("write"));
    }

    #[test]
    fn empty_allow_set_rejects_everything() {
        let overlay = overlay_with(false, Some(&[]), &[]);
        assert!(!overlay.allows("anything"));
    }

    #[test]
    fn deny_set_applies_without_allow() {
        let overlay = overlay_with(false, None, &["dangerous"]);
        assert!(!overlay.allows("dangerous"));
        assert!(overlay.allows("safe"));
    }

    #[test]
    fn absent_overlay_allows() {
        let nested = NestedOverlay::default();
        assert!(nested.allowed("alpha", "fs", "read"));
        assert!(!nested.is_disabled("alpha", "fs"));
    }

    #[test]
    fn empty_description_override_is_ignored() {
        let mut composite = CompositeOverlay::default();
        let mut overlay = ServerOverlay::default();
        overlay.descriptions.insert("search".into(), String::new());
        overlay.descriptions.insert("fetch".into(), "does fetch".into());
        composite.insert("beta", "web", overlay);

        let nested = NestedOverlay::from_composite(&composite, &["beta".to_string()]);
        assert_eq!(nested.description_override("beta", "web", "search"), None);
        assert_eq!(
            nested.description_override("beta", "web", "fetch"),
            Some("does fetch")
        );
    }

    #[test]
    fn from_composite_discards_unknown_instances() {
        let mut composite = CompositeOverlay::default();
        composite.insert("alpha", "fs", overlay_with(true, None, &[]));
        composite.insert("ghost", "fs", overlay_with(true, None, &[]));

        let nested =
            NestedOverlay::from_composite(&composite, &["alpha".to_string(), "beta".to_string()]);
        assert!(nested.is_disabled("alpha", "fs"));
        assert!(!nested.instances.contains_key("ghost"));
        // Known instances get entries even without composite data.
        assert!(nested.instances.contains_key("beta"));
    }

    #[test]
    fn server_names_containing_separator_survive_round_trip() {
        // Split happens on the FIRST separator; the remainder is the server.
        let mut composite = CompositeOverlay::default();
        composite.insert("alpha", "ns/tooling", overlay_with(false, None, &["x"]));

        let nested = NestedOverlay::from_composite(&composite, &["alpha".to_string()]);
        assert!(nested.server("alpha", "ns/tooling").is_some());

        let back = nested.to_composite(String::new());
        assert!(back.servers.contains_key("alpha/ns/tooling"));
    }

    #[test]
    fn composite_nested_round_trip_restricted_to_known() {
        let mut composite = CompositeOverlay {
            last_launch: "2026-07-31T12:00:00Z".into(),
            ..CompositeOverlay::default()
        };
        let mut fs = overlay_with(false, None, &["rm"]);
        fs.descriptions.insert("read".into(), "read files".into());
        composite.insert("alpha", "fs", fs);
        composite.insert("alpha", "web", overlay_with(true, None, &[]));
        composite.insert("zombie", "x", overlay_with(true, None, &[]));

        let known = vec!["alpha".to_string()];
        let nested = NestedOverlay::from_composite(&composite, &known);
        let back = nested.to_composite(composite.last_launch.clone());

        let mut expected = composite.clone();
        expected.servers.remove("zombie/x");
        assert_eq!(back, expected);
    }

    #[test]
    fn composite_json_shape_is_stable() {
        let mut composite = CompositeOverlay {
            last_launch: "t".into(),
            ..CompositeOverlay::default()
        };
        composite.insert("a", "s", overlay_with(false, None, &["bad"]));

        let json = serde_json::to_value(&composite).unwrap();
        assert_eq!(json["lastLaunch"], "t");
        assert_eq!(json["servers"]["a/s"]["deny"][0], "bad");
        // Neutral fields are omitted from the wire form.
        assert!(json["servers"]["a/s"].get("allow").is_none());
        assert!(composite.get("a", "s").is_some_and(|o| !o.allows("bad")));
    }
}
