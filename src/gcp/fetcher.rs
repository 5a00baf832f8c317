//! Resource Fetcher
//!
//! Pages GCP list endpoints to exhaustion. A failed page fails the whole
//! listing; partial results are never returned.

use super::client::GcpClient;
use anyhow::{Context, Result};
use serde_json::Value;
use std::future::Future;
use url::Url;

/// Fetch every item under `items_key`, following `nextPageToken`
pub async fn fetch_all(client: &GcpClient, url: &str, items_key: &str) -> Result<Vec<Value>> {
    let mut all_items = Vec::new();
    for_each_page(client, url, items_key, |items| {
        all_items.extend(items);
        async { Ok::<_, anyhow::Error>(()) }
    })
    .await?;
    Ok(all_items)
}

/// Hand each page's items to `on_page` before requesting the next one, so
/// large listings are never held in memory at once. Stops at the first error.
pub async fn for_each_page<F, Fut>(
    client: &GcpClient,
    url: &str,
    items_key: &str,
    mut on_page: F,
) -> Result<()>
where
    F: FnMut(Vec<Value>) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let mut page_token: Option<String> = None;

    loop {
        let page_url = with_page_token(url, page_token.as_deref())?;
        let response = client
            .get(&page_url)
            .await
            .with_context(|| format!("Failed to list {}", items_key))?;

        let items = response
            .get(items_key)
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();
        on_page(items).await?;

        page_token = next_page_token(&response);
        if page_token.is_none() {
            return Ok(());
        }
    }
}

/// Fetch every item of a Compute aggregated list, across all zones/regions
pub async fn fetch_aggregated(client: &GcpClient, url: &str) -> Result<Vec<Value>> {
    let mut all_items = Vec::new();
    let mut page_token: Option<String> = None;

    loop {
        let page_url = with_page_token(url, page_token.as_deref())?;
        let response = client
            .get(&page_url)
            .await
            .context("Failed to fetch aggregated list")?;

        all_items.extend(flatten_aggregated_response(&response));

        page_token = next_page_token(&response);
        if page_token.is_none() {
            break;
        }
    }

    Ok(all_items)
}

fn next_page_token(response: &Value) -> Option<String> {
    response
        .get("nextPageToken")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

fn with_page_token(url: &str, page_token: Option<&str>) -> Result<String> {
    let Some(token) = page_token else {
        return Ok(url.to_string());
    };
    let mut parsed = Url::parse(url).with_context(|| format!("Invalid URL: {}", url))?;
    parsed.query_pairs_mut().append_pair("pageToken", token);
    Ok(parsed.into())
}

/// Flatten an aggregated API response into a plain item list.
/// Aggregated responses have format: { "items": { "zones/us-central1-a": { "instances": [...] }, ... } }
fn flatten_aggregated_response(response: &Value) -> Vec<Value> {
    let Some(items) = response.get("items").and_then(|v| v.as_object()) else {
        return Vec::new();
    };

    let mut all_items = Vec::new();
    for scoped in items.values() {
        let Some(obj) = scoped.as_object() else {
            continue;
        };
        for (key, value) in obj {
            // Scopes with nothing in them only carry a warning
            if key == "warning" {
                continue;
            }
            if let Some(arr) = value.as_array() {
                all_items.extend(arr.iter().cloned());
            }
        }
    }
    all_items
}

/// Last path segment of a resource URL (`.../zones/us-central1-a` -> `us-central1-a`)
pub fn extract_short_name(url: &str) -> &str {
    url.rsplit('/').next().unwrap_or(url)
}

/// String field of a JSON item
pub fn str_field<'a>(item: &'a Value, key: &str) -> Option<&'a str> {
    item.get(key).and_then(|v| v.as_str())
}
