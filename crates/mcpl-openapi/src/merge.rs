use anyhow::{Context, Result};
use mcpl_core::overlay::NestedOverlay;
use mcpl_core::types::Instance;
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use tracing::{debug, warn};
use unicode_segmentation::UnicodeSegmentation;

use crate::cleanup::{coerce_integer_types, tighten_responses};
use crate::components::{audit_refs, local_component_names, rewrite_local_refs};
use crate::fetch::fetch_server_spec;
use crate::{API_KEY_HEADER, DESCRIPTION_LIMIT, HTTP_METHODS, MANAGED_SECTIONS, SECURITY_SCHEME};

/// Result of merging one instance's per-server documents.
#[derive(Debug, Clone)]
pub struct MergeOutput {
    /// The merged document.
    pub document: Value,
    /// Serialized form (what the front proxy serves and the artifact holds).
    pub bytes: Vec<u8>,
    pub total_operations: usize,
    pub operations_per_server: BTreeMap<String, usize>,
    /// Per server: `METHOD /path (tool=T): description length N > 300`.
    pub long_descriptions: BTreeMap<String, Vec<String>>,
    /// Managed-section refs whose target is absent. Logged, never fixed up.
    pub dangling_refs: Vec<String>,
}

/// Fetch every enabled server's document from the gateway and merge.
pub async fn merge_instance(
    instance: &Instance,
    base_url: &str,
    server_names: &[String],
    overlay: &NestedOverlay,
) -> Result<MergeOutput> {
    let client = reqwest::Client::new();
    let mut documents = Vec::new();
    let mut names: Vec<&String> = server_names.iter().collect();
    names.sort();
    for server in names {
        if overlay.is_disabled(&instance.name, server) {
            debug!(instance = %instance.name, server = %server, "skipping disabled server");
            continue;
        }
        let doc =
            fetch_server_spec(&client, instance.gateway_port, server, &instance.api_key).await?;
        documents.push((server.clone(), doc));
    }
    merge_documents(&instance.name, base_url, &documents, overlay)
}

/// Merge already-fetched `(server, document)` pairs.
///
/// Servers arrive in lexicographic order; disabled ones are skipped even if
/// handed in. The output is deterministic for identical inputs.
pub fn merge_documents(
    instance_name: &str,
    base_url: &str,
    documents: &[(String, Value)],
    overlay: &NestedOverlay,
) -> Result<MergeOutput> {
    let mut merged = skeleton(instance_name, base_url);
    let mut total_operations = 0;
    let mut operations_per_server = BTreeMap::new();
    let mut long_descriptions: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for (server, original) in documents {
        if overlay.is_disabled(instance_name, server) {
            continue;
        }

        // Snapshot before mutation: only names this document defines are
        // renamed; refs to anything else pass through untouched.
        let local = local_component_names(original);
        let mut doc = original.clone();
        rewrite_local_refs(&mut doc, server, &local);

        merge_components(&mut merged, &mut doc, server);

        let Some(paths) = doc.get_mut("paths").and_then(Value::as_object_mut) else {
            // No paths is fine; the components above still count.
            continue;
        };
        for (raw_path, mut path_item) in std::mem::take(paths) {
            let tool = tool_name(&raw_path);
            if !overlay.allowed(instance_name, server, tool) {
                debug!(server = %server, tool, "tool filtered out of merged spec");
                continue;
            }
            let merged_path = format!("/{server}{}", ensure_leading_slash(&raw_path));
            if let Some(item) = path_item.as_object_mut() {
                for method in HTTP_METHODS {
                    let Some(op) = item.get_mut(method).and_then(Value::as_object_mut) else {
                        continue;
                    };
                    rewrite_operation(
                        op,
                        server,
                        method,
                        &raw_path,
                        &merged_path,
                        tool,
                        instance_name,
                        overlay,
                        &mut long_descriptions,
                    );
                    total_operations += 1;
                    *operations_per_server.entry(server.clone()).or_insert(0) += 1;
                }
            }
            merged["paths"][&merged_path] = path_item;
        }
    }

    tighten_responses(&mut merged);
    coerce_integer_types(&mut merged);

    let bytes = serde_json::to_vec_pretty(&merged).context("failed to serialize merged spec")?;
    let dangling_refs = audit_refs(&merged);
    if !dangling_refs.is_empty() {
        warn!(
            instance = instance_name,
            count = dangling_refs.len(),
            "merged spec contains dangling component refs"
        );
    }

    Ok(MergeOutput {
        document: merged,
        bytes,
        total_operations,
        operations_per_server,
        long_descriptions,
        dangling_refs,
    })
}

fn skeleton(instance_name: &str, base_url: &str) -> Value {
    json!({
        "openapi": "3.1.0",
        "info": {
            "title": format!("MCP Tools via mcpo ({instance_name})"),
            "version": "1.0.0",
        },
        "servers": [{"url": base_url}],
        "paths": {},
        "components": {
            "schemas": {},
            "parameters": {},
            "responses": {},
            "requestBodies": {},
            "securitySchemes": {
                (SECURITY_SCHEME): {
                    "type": "apiKey",
                    "in": "header",
                    "name": API_KEY_HEADER,
                }
            }
        },
        "security": [{(SECURITY_SCHEME): []}],
    })
}

/// Move this document's managed components into the merged document under
/// `<server>__<name>` keys.
fn merge_components(merged: &mut Value, doc: &mut Value, server: &str) {
    let Some(components) = doc.get_mut("components").and_then(Value::as_object_mut) else {
        return;
    };
    for section in MANAGED_SECTIONS {
        let Some(Value::Object(entries)) = components.remove(section) else {
            continue;
        };
        for (name, component) in entries {
            merged["components"][section][format!("{server}__{name}")] = component;
        }
    }
}

/// The tool a path belongs to: its first segment.
fn tool_name(raw_path: &str) -> &str {
    raw_path
        .trim_start_matches('/')
        .split('/')
        .next()
        .unwrap_or("")
}

fn ensure_leading_slash(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

#[allow(clippy::too_many_arguments)]
fn rewrite_operation(
    op: &mut Map<String, Value>,
    server: &str,
    method: &str,
    raw_path: &str,
    merged_path: &str,
    tool: &str,
    instance_name: &str,
    overlay: &NestedOverlay,
    long_descriptions: &mut BTreeMap<String, Vec<String>>,
) {
    let operation_id = match op.get("operationId").and_then(Value::as_str) {
        Some(existing) => format!("{server}__{existing}"),
        None => format!("{server}__{method}_{}", sanitize_path(raw_path)),
    };
    op.insert("operationId".to_string(), Value::String(operation_id));

    if let Some(text) = overlay.description_override(instance_name, server, tool) {
        op.insert(
            "description".to_string(),
            Value::String(text.to_string()),
        );
    }
    if let Some(description) = op.get("description").and_then(Value::as_str) {
        let length = description.graphemes(true).count();
        if length > DESCRIPTION_LIMIT {
            long_descriptions.entry(server.to_string()).or_default().push(format!(
                "{} {merged_path} (tool={tool}): description length {length} > {DESCRIPTION_LIMIT}",
                method.to_uppercase(),
            ));
        }
    }

    // Operations inherit the document-level requirement.
    op.remove("security");
}

fn sanitize_path(path: &str) -> String {
    path.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

#[cfg(test)]
#[path = "merge_tests.rs"]
mod tests;
