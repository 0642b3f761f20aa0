use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

use crate::MANAGED_SECTIONS;

/// Names defined per managed component section, taken from the ORIGINAL
/// document before any mutation. Rewriting consults this snapshot so refs to
/// names the document never defined pass through untouched.
pub fn local_component_names(doc: &Value) -> BTreeMap<String, BTreeSet<String>> {
    let mut local = BTreeMap::new();
    for section in MANAGED_SECTIONS {
        let names: BTreeSet<String> = doc
            .get("components")
            .and_then(|c| c.get(section))
            .and_then(Value::as_object)
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default();
        local.insert(section.to_string(), names);
    }
    local
}

/// Split `#/components/<section>/<name>` into its two variable parts.
fn split_component_ref(reference: &str) -> Option<(&str, &str)> {
    let rest = reference.strip_prefix("#/components/")?;
    let (section, name) = rest.split_once('/')?;
    // Nested pointers (e.g. …/Foo/properties/x) are not component renames.
    if name.is_empty() || name.contains('/') {
        return None;
    }
    Some((section, name))
}

/// Rewrite every `$ref` to a locally-defined component as
/// `<server>__<name>`. Refs outside the managed sections, and refs to names
/// not in the local snapshot, are left alone.
pub fn rewrite_local_refs(
    value: &mut Value,
    server: &str,
    local: &BTreeMap<String, BTreeSet<String>>,
) {
    match value {
        Value::Object(map) => {
            for (key, entry) in map.iter_mut() {
                if key == "$ref" {
                    if let Some(renamed) = renamed_ref(entry, server, local) {
                        *entry = Value::String(renamed);
                    }
                    continue;
                }
                rewrite_local_refs(entry, server, local);
            }
        }
        Value::Array(items) => {
            for item in items {
                rewrite_local_refs(item, server, local);
            }
        }
        _ => {}
    }
}

fn renamed_ref(
    entry: &Value,
    server: &str,
    local: &BTreeMap<String, BTreeSet<String>>,
) -> Option<String> {
    let (section, name) = split_component_ref(entry.as_str()?)?;
    if !local.get(section).is_some_and(|names| names.contains(name)) {
        return None;
    }
    Some(format!("#/components/{section}/{server}__{name}"))
}

/// Walk the document and report refs into managed sections whose target key
/// does not exist. Deduplicated, sorted; never mutates.
pub fn audit_refs(doc: &Value) -> Vec<String> {
    let mut dangling = BTreeSet::new();
    collect_dangling(doc, doc, &mut dangling);
    dangling.into_iter().collect()
}

fn collect_dangling(doc: &Value, value: &Value, dangling: &mut BTreeSet<String>) {
    match value {
        Value::Object(map) => {
            for (key, entry) in map {
                if key == "$ref"
                    && let Some(reference) = entry.as_str()
                    && let Some((section, name)) = split_component_ref(reference)
                    && MANAGED_SECTIONS.contains(&section)
                {
                    let exists = doc
                        .get("components")
                        .and_then(|c| c.get(section))
                        .and_then(|s| s.get(name))
                        .is_some();
                    if !exists {
                        dangling.insert(reference.to_string());
                    }
                }
                collect_dangling(doc, entry, dangling);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_dangling(doc, item, dangling);
            }
        }
        _ => {}
    }
}
