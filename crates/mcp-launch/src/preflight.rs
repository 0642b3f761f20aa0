//! Preflight driver: inspect every `(instance, server)`, seed the curation
//! with the persisted overlay, hand off to the UI, translate the result.

use anyhow::Result;
use mcpl_config::{LaunchConfig, StateLayout, load_overlay, save_overlay};
use mcpl_core::overlay::{CompositeOverlay, NestedOverlay};
use mcpl_core::types::Instance;
use mcpl_inspect::InspectorOptions;
use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::curate::{CurationEntry, CurationSession, ServerStatus, run_terminal_curation};

/// What preflight hands back to the launch path.
pub struct Preflight {
    pub overlay: NestedOverlay,
    pub composite: CompositeOverlay,
    /// instance → server → discovered tool names.
    pub tools: BTreeMap<String, BTreeMap<String, Vec<String>>>,
}

/// Inspect, curate, persist, translate.
///
/// `None` means the operator cancelled; nothing may be launched. Servers
/// that fail inspection stay visible in the curation with their error text;
/// hiding them silently is exactly the failure mode this exists to avoid.
pub async fn run_preflight(
    pairs: &[(Instance, LaunchConfig)],
    layout: &StateLayout,
    interactive: bool,
) -> Result<Option<Preflight>> {
    let options = InspectorOptions::default();
    let mut entries = Vec::new();
    let mut tools: BTreeMap<String, BTreeMap<String, Vec<String>>> = BTreeMap::new();

    for (instance, config) in pairs {
        for (server, definition) in &config.servers {
            let key = CompositeOverlay::composite_key(&instance.name, server);
            let outcome = tokio::time::timeout(
                options.outer_deadline(),
                mcpl_inspect::inspect_server(server, definition, &options),
            )
            .await;

            let (status, discovered) = match outcome {
                Ok(Ok(discovered)) => {
                    info!(
                        key = %key,
                        transport = definition.transport.label(),
                        tools = discovered.len(),
                        "inspected"
                    );
                    (ServerStatus::Ok, discovered)
                }
                Ok(Err(error)) => {
                    warn!(key = %key, error = %format!("{error:#}"), "inspection failed");
                    (ServerStatus::Err(format!("{error:#}")), Vec::new())
                }
                Err(_) => {
                    let message = format!(
                        "inspection timed out after {}s",
                        options.outer_deadline().as_secs()
                    );
                    warn!(key = %key, "{message}");
                    (ServerStatus::Err(message), Vec::new())
                }
            };

            tools
                .entry(instance.name.clone())
                .or_default()
                .insert(server.clone(), discovered.iter().map(|t| t.name.clone()).collect());
            entries.push(CurationEntry {
                key,
                status,
                tools: discovered,
            });
        }
    }

    let seed = load_overlay(layout).unwrap_or_default();
    let composite = if interactive {
        let session = CurationSession::new(entries, seed);
        let edited =
            tokio::task::spawn_blocking(move || run_terminal_curation(session)).await?;
        match edited {
            Some(composite) => composite,
            None => return Ok(None),
        }
    } else {
        seed
    };

    let mut composite = composite;
    composite.last_launch = chrono::Utc::now().to_rfc3339();
    save_overlay(layout, &composite)?;

    let known: Vec<String> = pairs.iter().map(|(i, _)| i.name.clone()).collect();
    let overlay = NestedOverlay::from_composite(&composite, &known);
    Ok(Some(Preflight {
        overlay,
        composite,
        tools,
    }))
}
