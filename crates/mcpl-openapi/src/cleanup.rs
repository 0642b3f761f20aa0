use serde_json::{Map, Value};

use crate::HTTP_METHODS;

/// Make every response object importer-friendly:
/// - missing `description` becomes `"Successful Response"`
/// - media types whose schema is `{}` (directly or after pruning) are removed
/// - `{}` branches inside `anyOf` are dropped; a single survivor replaces a
///   bare `anyOf` wrapper
/// - responses whose media types all vanished lose their `content` block
pub fn tighten_responses(doc: &mut Value) {
    if let Some(paths) = doc.get_mut("paths").and_then(Value::as_object_mut) {
        for path_item in paths.values_mut() {
            let Some(path_item) = path_item.as_object_mut() else {
                continue;
            };
            for method in HTTP_METHODS {
                if let Some(responses) = path_item
                    .get_mut(method)
                    .and_then(|op| op.get_mut("responses"))
                    .and_then(Value::as_object_mut)
                {
                    for response in responses.values_mut() {
                        tighten_response(response);
                    }
                }
            }
        }
    }
    if let Some(responses) = doc
        .get_mut("components")
        .and_then(|c| c.get_mut("responses"))
        .and_then(Value::as_object_mut)
    {
        for response in responses.values_mut() {
            tighten_response(response);
        }
    }
}

fn tighten_response(response: &mut Value) {
    let Some(response) = response.as_object_mut() else {
        return;
    };
    response
        .entry("description")
        .or_insert_with(|| Value::String("Successful Response".to_string()));

    let mut drop_content = false;
    if let Some(content) = response.get_mut("content").and_then(Value::as_object_mut) {
        let empty_media: Vec<String> = content
            .iter_mut()
            .filter_map(|(media, body)| {
                if let Some(schema) = body.get_mut("schema") {
                    prune_empty_schemas(schema);
                    if is_empty_schema(schema) {
                        return Some(media.clone());
                    }
                }
                None
            })
            .collect();
        for media in empty_media {
            content.remove(&media);
        }
        drop_content = content.is_empty();
    }
    if drop_content {
        response.remove("content");
    }
}

/// Remove `{}` branches from every `anyOf` in the tree. An `anyOf` reduced
/// to one branch, with no sibling keywords, collapses to that branch.
fn prune_empty_schemas(schema: &mut Value) {
    match schema {
        Value::Object(map) => {
            let single_branch = match map.get_mut("anyOf").and_then(Value::as_array_mut) {
                Some(branches) => {
                    branches.retain(|branch| !is_empty_schema(branch));
                    branches.len() == 1
                }
                None => false,
            };
            if single_branch && map.len() == 1 {
                if let Some(Value::Array(mut branches)) = map.remove("anyOf") {
                    *schema = branches.remove(0);
                    prune_empty_schemas(schema);
                    return;
                }
            }
            for entry in map.values_mut() {
                prune_empty_schemas(entry);
            }
        }
        Value::Array(items) => {
            for item in items {
                prune_empty_schemas(item);
            }
        }
        _ => {}
    }
}

fn is_empty_schema(schema: &Value) -> bool {
    match schema {
        Value::Object(map) => {
            map.is_empty()
                || map
                    .get("anyOf")
                    .and_then(Value::as_array)
                    .is_some_and(|b| b.is_empty() && map.len() == 1)
        }
        _ => false,
    }
}

/// Rewrite `type: "number"` to `type: "integer"` wherever the schema is
/// provably integral: an integral `default`, a non-empty all-integral
/// `enum`, or an integral `multipleOf`. `format` is never guessed.
pub fn coerce_integer_types(value: &mut Value) {
    match value {
        Value::Object(map) => {
            if map.get("type").and_then(Value::as_str) == Some("number")
                && is_provably_integral(map)
            {
                map.insert("type".to_string(), Value::String("integer".to_string()));
            }
            for entry in map.values_mut() {
                coerce_integer_types(entry);
            }
        }
        Value::Array(items) => {
            for item in items {
                coerce_integer_types(item);
            }
        }
        _ => {}
    }
}

fn is_provably_integral(schema: &Map<String, Value>) -> bool {
    if schema.get("default").is_some_and(is_integral_number) {
        return true;
    }
    if let Some(entries) = schema.get("enum").and_then(Value::as_array)
        && !entries.is_empty()
        && entries.iter().all(is_integral_number)
    {
        return true;
    }
    schema.get("multipleOf").is_some_and(is_integral_number)
}

fn is_integral_number(value: &Value) -> bool {
    let Value::Number(n) = value else {
        return false;
    };
    if n.is_i64() || n.is_u64() {
        return true;
    }
    n.as_f64().is_some_and(|f| f.is_finite() && f.fract() == 0.0)
}
