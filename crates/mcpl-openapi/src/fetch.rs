use anyhow::{Context, Result};
use mcpl_core::error::LaunchError;
use serde_json::Value;

use crate::API_KEY_HEADER;

/// Fetch one server's OpenAPI document from the gateway.
///
/// Anything but 200 fails the merge for this instance, with the response
/// body attached for the operator.
pub async fn fetch_server_spec(
    client: &reqwest::Client,
    gateway_port: u16,
    server: &str,
    api_key: &str,
) -> Result<Value> {
    let url = format!("http://127.0.0.1:{gateway_port}/{server}/openapi.json");
    let response = client
        .get(&url)
        .header(API_KEY_HEADER, api_key)
        .send()
        .await
        .with_context(|| format!("failed to fetch {url}"))?;

    let status = response.status();
    if status.as_u16() != 200 {
        let body = response.text().await.unwrap_or_default();
        return Err(LaunchError::Fetch {
            url,
            status: status.as_u16(),
            body,
        }
        .into());
    }

    response
        .json()
        .await
        .with_context(|| format!("failed to parse OpenAPI from {url}"))
}
