//! Compute Engine VM instances
//!
//! Identifier is `zone/name`. Deletes are issued concurrently, then the whole
//! set is polled until every instance is gone, so that disks and networks
//! processed afterwards are no longer in use.

use super::{candidate, list_zonal, require_permission, scoped, split_zonal_id};
use crate::gcp::client::GcpClient;
use crate::resource::{CallContext, Candidate, DeletionStrategy, Resource, ResourceType};
use crate::wait::WaitConfig;
use anyhow::Result;
use futures::future::try_join_all;
use std::time::Duration;

pub const TYPE_NAME: &str = "compute-instances";

const DELETE_PERMISSION: &str = "compute.instances.delete";

const INSTANCES_WAIT: WaitConfig = WaitConfig {
    interval: Duration::from_secs(10),
    max_attempts: 60,
};

pub fn resource(client: GcpClient) -> Box<dyn ResourceType> {
    Box::new(
        Resource::new(
            TYPE_NAME,
            scoped(client),
            |ctx: CallContext<GcpClient>, _filter| async move { list(&ctx.client).await },
            DeletionStrategy::concurrent_delete_then_wait_all(
                |ctx: CallContext<GcpClient>, id: String| async move {
                    let (zone, name) = split_zonal_id(&id)?;
                    ctx.client.delete(&instance_url(&ctx.client, zone, name)).await?;
                    Ok(())
                },
                |ctx: CallContext<GcpClient>, ids: Vec<String>| async move {
                    all_absent(&ctx.client, &ids).await
                },
                INSTANCES_WAIT,
            ),
        )
        .batch_size(20)
        .with_permission_verifier(|ctx: CallContext<GcpClient>, id: String| async move {
            let (zone, name) = split_zonal_id(&id)?;
            let url = format!("{}/testIamPermissions", instance_url(&ctx.client, zone, name));
            require_permission(&ctx.client, &url, DELETE_PERMISSION).await
        }),
    )
}

fn instance_url(client: &GcpClient, zone: &str, name: &str) -> String {
    client.compute_zonal_url(zone, &format!("instances/{}", name))
}

async fn list(client: &GcpClient) -> Result<Vec<Candidate>> {
    let items = list_zonal(client, "instances").await?;
    Ok(items
        .iter()
        .filter_map(|(zone, item)| {
            let name = item.get("name")?.as_str()?;
            Some(candidate(format!("{}/{}", zone, name), item, "creationTimestamp"))
        })
        .collect())
}

async fn all_absent(client: &GcpClient, ids: &[String]) -> Result<bool> {
    let present = try_join_all(ids.iter().map(|id| async move {
        let (zone, name) = split_zonal_id(id)?;
        let found = client.get_optional(&instance_url(client, zone, name)).await?;
        Ok::<_, anyhow::Error>(found.is_some())
    }))
    .await?;

    let remaining = present.iter().filter(|p| **p).count();
    if remaining > 0 {
        tracing::debug!(type_name = TYPE_NAME, remaining, "Instances still present");
    }
    Ok(remaining == 0)
}
