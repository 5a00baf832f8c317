//! Compute Engine persistent disks
//!
//! Identifier is `zone/name`. Each delete waits for its own operation.

use super::{candidate, delete_and_wait, list_zonal, require_permission, scoped, split_zonal_id};
use crate::gcp::client::GcpClient;
use crate::resource::{CallContext, Candidate, DeletionStrategy, Resource, ResourceType};
use anyhow::Result;

pub const TYPE_NAME: &str = "compute-disks";

const DELETE_PERMISSION: &str = "compute.disks.delete";

pub fn resource(client: GcpClient) -> Box<dyn ResourceType> {
    Box::new(
        Resource::new(
            TYPE_NAME,
            scoped(client),
            |ctx: CallContext<GcpClient>, _filter| async move { list(&ctx.client).await },
            DeletionStrategy::simple_batch(|ctx: CallContext<GcpClient>, id: String| async move {
                let (zone, name) = split_zonal_id(&id)?;
                delete_and_wait(&ctx.client, &disk_url(&ctx.client, zone, name), &ctx.cancel).await
            }),
        )
        .batch_size(20)
        .with_permission_verifier(|ctx: CallContext<GcpClient>, id: String| async move {
            let (zone, name) = split_zonal_id(&id)?;
            let url = format!("{}/testIamPermissions", disk_url(&ctx.client, zone, name));
            require_permission(&ctx.client, &url, DELETE_PERMISSION).await
        }),
    )
}

fn disk_url(client: &GcpClient, zone: &str, name: &str) -> String {
    client.compute_zonal_url(zone, &format!("disks/{}", name))
}

async fn list(client: &GcpClient) -> Result<Vec<Candidate>> {
    let items = list_zonal(client, "disks").await?;
    Ok(items
        .iter()
        .filter_map(|(zone, item)| {
            let name = item.get("name")?.as_str()?;
            Some(candidate(format!("{}/{}", zone, name), item, "creationTimestamp"))
        })
        .collect())
}
