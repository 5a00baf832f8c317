//! VPC firewall rules

use super::{candidate, delete_and_wait, scoped};
use crate::gcp::client::GcpClient;
use crate::gcp::fetcher::{fetch_all, str_field};
use crate::resource::{CallContext, Candidate, DeletionStrategy, Resource, ResourceType};
use anyhow::Result;

pub const TYPE_NAME: &str = "compute-firewalls";

pub fn resource(client: GcpClient) -> Box<dyn ResourceType> {
    Box::new(
        Resource::new(
            TYPE_NAME,
            scoped(client),
            |ctx: CallContext<GcpClient>, _filter| async move { list(&ctx.client).await },
            DeletionStrategy::simple_batch(|ctx: CallContext<GcpClient>, name: String| async move {
                let url = ctx.client.compute_global_url(&format!("firewalls/{}", name));
                delete_and_wait(&ctx.client, &url, &ctx.cancel).await
            }),
        )
        .global()
        .batch_size(20),
    )
}

async fn list(client: &GcpClient) -> Result<Vec<Candidate>> {
    let items = fetch_all(client, &client.compute_global_url("firewalls"), "items").await?;
    Ok(items
        .iter()
        .filter_map(|item| {
            let name = str_field(item, "name")?;
            Some(candidate(name.to_string(), item, "creationTimestamp"))
        })
        .collect())
}
