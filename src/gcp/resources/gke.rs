//! GKE clusters
//!
//! Identifier is `location/name`, where location is a region or a zone.
//! Deletion is asynchronous on the GKE side, so each cluster is waited on
//! until it is gone.

use super::{parse_time, scoped};
use crate::gcp::client::{is_not_found, region_of_zone, GcpClient};
use crate::gcp::fetcher::str_field;
use crate::gcp::labels::labels_to_tags;
use crate::resource::{CallContext, Candidate, DeletionStrategy, Resource, ResourceType};
use crate::wait::WaitConfig;
use anyhow::Result;
use std::time::Duration;

pub const TYPE_NAME: &str = "gke-clusters";

/// Cluster teardown routinely takes several minutes
const CLUSTER_WAIT: WaitConfig = WaitConfig {
    interval: Duration::from_secs(15),
    max_attempts: 80,
};

pub fn resource(client: GcpClient) -> Box<dyn ResourceType> {
    Box::new(
        Resource::new(
            TYPE_NAME,
            scoped(client),
            |ctx: CallContext<GcpClient>, _filter| async move { list(&ctx.client).await },
            DeletionStrategy::delete_then_wait(
                |ctx: CallContext<GcpClient>, id: String| async move {
                    let (location, name) = split_location_id(&id)?;
                    ctx.client.delete(&cluster_url(&ctx.client, location, name)).await?;
                    Ok(())
                },
                |ctx: CallContext<GcpClient>, id: String| async move {
                    let (location, name) = split_location_id(&id)?;
                    is_absent(&ctx.client, location, name).await
                },
                CLUSTER_WAIT,
            ),
        )
        .batch_size(5),
    )
}

fn cluster_url(client: &GcpClient, location: &str, name: &str) -> String {
    client.container_location_url(location, &format!("clusters/{}", name))
}

fn split_location_id(id: &str) -> Result<(&str, &str)> {
    Ok(super::split_zonal_id(id)?)
}

/// Clusters whose location is the client's region or one of its zones
async fn list(client: &GcpClient) -> Result<Vec<Candidate>> {
    let region = client.region()?;
    let response = client
        .get(&client.container_location_url("-", "clusters"))
        .await?;

    let clusters = response
        .get("clusters")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();

    Ok(clusters
        .iter()
        .filter_map(|cluster| {
            let name = str_field(cluster, "name")?;
            let location = str_field(cluster, "location")?;
            if location != region && region_of_zone(location) != region {
                return None;
            }
            Some(
                Candidate::new(format!("{}/{}", location, name))
                    .named(name)
                    .created_at(parse_time(cluster, "createTime"))
                    .tagged(labels_to_tags(cluster.get("resourceLabels"))),
            )
        })
        .collect())
}

async fn is_absent(client: &GcpClient, location: &str, name: &str) -> Result<bool> {
    match client.get(&cluster_url(client, location, name)).await {
        Ok(_) => Ok(false),
        Err(e) if is_not_found(&e) => Ok(true),
        Err(e) => Err(e),
    }
}
