//! VPC networks
//!
//! A network cannot be deleted while anything references it. Each network is
//! torn down in a fixed order: its firewall rules, its custom routes, its
//! subnetworks (custom-mode networks only), then the network itself. Child
//! lookups follow the client's degrade policy.

use super::{candidate, delete_and_wait, scoped};
use crate::gcp::client::GcpClient;
use crate::gcp::fetcher::{extract_short_name, fetch_aggregated, fetch_all, str_field};
use crate::resource::{CallContext, Candidate, DeletionStrategy, Resource, ResourceType, Step};
use anyhow::{Context, Result};
use futures::future::try_join_all;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

pub const TYPE_NAME: &str = "compute-networks";

pub fn resource(client: GcpClient) -> Box<dyn ResourceType> {
    Box::new(
        Resource::new(
            TYPE_NAME,
            scoped(client),
            |ctx: CallContext<GcpClient>, _filter| async move { list(&ctx.client).await },
            DeletionStrategy::multi_step(vec![
                Step::new("delete-firewalls", |ctx: CallContext<GcpClient>, network: String| async move {
                    delete_firewalls(&ctx.client, &network, &ctx.cancel).await
                }),
                Step::new("delete-routes", |ctx: CallContext<GcpClient>, network: String| async move {
                    delete_routes(&ctx.client, &network, &ctx.cancel).await
                }),
                Step::new("delete-subnetworks", |ctx: CallContext<GcpClient>, network: String| async move {
                    delete_subnetworks(&ctx.client, &network, &ctx.cancel).await
                }),
                Step::new("delete-network", |ctx: CallContext<GcpClient>, network: String| async move {
                    let url = network_url(&ctx.client, &network);
                    delete_and_wait(&ctx.client, &url, &ctx.cancel)
                        .await
                        .with_context(|| format!("Failed to delete network {}", network))
                }),
            ]),
        )
        .global()
        .batch_size(5),
    )
}

fn network_url(client: &GcpClient, network: &str) -> String {
    client.compute_global_url(&format!("networks/{}", network))
}

async fn list(client: &GcpClient) -> Result<Vec<Candidate>> {
    let items = fetch_all(client, &client.compute_global_url("networks"), "items").await?;
    Ok(items
        .iter()
        .filter_map(|item| {
            let name = str_field(item, "name")?;
            Some(candidate(name.to_string(), item, "creationTimestamp"))
        })
        .collect())
}

/// Whether `item.network` points at `network`
fn belongs_to(item: &Value, network: &str) -> bool {
    str_field(item, "network")
        .map(|url| extract_short_name(url) == network)
        .unwrap_or(false)
}

async fn delete_all(client: &GcpClient, urls: Vec<String>, cancel: &CancellationToken) -> Result<()> {
    try_join_all(urls.iter().map(|url| delete_and_wait(client, url, cancel))).await?;
    Ok(())
}

async fn delete_firewalls(client: &GcpClient, network: &str, cancel: &CancellationToken) -> Result<()> {
    let lookup = fetch_all(client, &client.compute_global_url("firewalls"), "items").await;
    let firewalls = client.lookup_or_empty(&format!("firewalls of network {}", network), lookup)?;

    let urls: Vec<String> = firewalls
        .iter()
        .filter(|fw| belongs_to(fw, network))
        .filter_map(|fw| str_field(fw, "name"))
        .map(|name| client.compute_global_url(&format!("firewalls/{}", name)))
        .collect();

    tracing::debug!(network = %network, count = urls.len(), "Deleting firewall rules");
    delete_all(client, urls, cancel).await
}

/// Routes created by GCP for subnets and peerings go away with the network
fn is_custom_route(route: &Value) -> bool {
    route.get("nextHopNetwork").is_none()
        && route.get("nextHopPeering").is_none()
        && !str_field(route, "name")
            .map(|n| n.starts_with("default-route-"))
            .unwrap_or(false)
}

async fn delete_routes(client: &GcpClient, network: &str, cancel: &CancellationToken) -> Result<()> {
    let lookup = fetch_all(client, &client.compute_global_url("routes"), "items").await;
    let routes = client.lookup_or_empty(&format!("routes of network {}", network), lookup)?;

    let urls: Vec<String> = routes
        .iter()
        .filter(|r| belongs_to(r, network) && is_custom_route(r))
        .filter_map(|r| str_field(r, "name"))
        .map(|name| client.compute_global_url(&format!("routes/{}", name)))
        .collect();

    tracing::debug!(network = %network, count = urls.len(), "Deleting routes");
    delete_all(client, urls, cancel).await
}

async fn delete_subnetworks(client: &GcpClient, network: &str, cancel: &CancellationToken) -> Result<()> {
    let details = client
        .get(&network_url(client, network))
        .await
        .with_context(|| format!("Failed to look up network {}", network))?;

    // Auto-mode subnetworks cannot be deleted individually
    if details
        .get("autoCreateSubnetworks")
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
    {
        return Ok(());
    }

    let lookup = fetch_aggregated(client, &client.compute_aggregated_url("subnetworks")).await;
    let subnetworks = client.lookup_or_empty(&format!("subnetworks of network {}", network), lookup)?;

    let urls: Vec<String> = subnetworks
        .iter()
        .filter(|s| belongs_to(s, network))
        .filter_map(|s| {
            let name = str_field(s, "name")?;
            let region = extract_short_name(str_field(s, "region")?);
            Some(client.compute_regional_url(region, &format!("subnetworks/{}", name)))
        })
        .collect();

    tracing::debug!(network = %network, count = urls.len(), "Deleting subnetworks");
    delete_all(client, urls, cancel).await
}
