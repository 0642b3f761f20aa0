//! Fetching, namespacing, and merging per-tool OpenAPI documents.
//!
//! The gateway serves one OpenAPI document per MCP server; this crate folds
//! the enabled ones into a single 3.1.0 document whose paths, operation ids,
//! and local components are namespaced by server so nothing collides.

mod cleanup;
mod components;
mod fetch;
mod merge;

pub use cleanup::{coerce_integer_types, tighten_responses};
pub use components::{audit_refs, local_component_names, rewrite_local_refs};
pub use fetch::fetch_server_spec;
pub use merge::{MergeOutput, merge_documents, merge_instance};

/// Component sections whose names are namespaced and audited.
pub const MANAGED_SECTIONS: [&str; 4] = ["schemas", "parameters", "responses", "requestBodies"];

/// HTTP-method keys counted as operations on a path item.
pub const HTTP_METHODS: [&str; 9] = [
    "get", "post", "put", "delete", "patch", "options", "head", "trace", "connect",
];

/// Name of the merged document's API-key security scheme.
pub const SECURITY_SCHEME: &str = "mcpoApiKey";

/// Header carrying the API key.
pub const API_KEY_HEADER: &str = "X-API-Key";

/// Descriptions longer than this (in graphemes) get a warning.
pub const DESCRIPTION_LIMIT: usize = 300;
