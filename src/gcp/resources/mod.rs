//! GCP resource type bindings
//!
//! Each binding supplies a lister, a deletion strategy and optional
//! capabilities to a [`Resource`](crate::resource::Resource) descriptor.
//! [`registry`] fixes the processing order: children before parents.

pub mod buckets;
pub mod disks;
pub mod firewalls;
pub mod gke;
pub mod instances;
pub mod networks;
pub mod pubsub;

use super::client::GcpClient;
use super::fetcher::{extract_short_name, fetch_all, str_field};
use super::labels::labels_to_tags;
use crate::error::{ConfigError, NukeError};
use crate::resource::{Candidate, Registry, Scope};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::future::{ready, try_join_all, Ready};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

/// All GCP resource types, in deletion order
pub fn registry(client: &GcpClient) -> Result<Registry, ConfigError> {
    let mut registry = Registry::new();

    let c = client.clone();
    registry.register(move || gke::resource(c.clone()))?;
    let c = client.clone();
    registry.register(move || instances::resource(c.clone()))?;
    let c = client.clone();
    registry.register(move || disks::resource(c.clone()))?;
    let c = client.clone();
    registry.register(move || pubsub::subscriptions(c.clone()))?;
    let c = client.clone();
    registry.register(move || pubsub::topics(c.clone()))?;
    let c = client.clone();
    registry.register(move || buckets::resource(c.clone()))?;
    let c = client.clone();
    registry.register(move || firewalls::resource(c.clone()))?;
    let c = client.clone();
    registry.register(move || networks::resource(c.clone()))?;

    Ok(registry)
}

/// Client factory handing out copies of `client` bound to the requested scope
pub(crate) fn scoped(
    client: GcpClient,
) -> impl Fn(Scope) -> Ready<Result<GcpClient>> + Send + Sync + 'static {
    move |scope| ready(Ok(client.scoped(&scope)))
}

/// Split a `zone/name` identifier
pub(crate) fn split_zonal_id(id: &str) -> Result<(&str, &str), NukeError> {
    match id.split_once('/') {
        Some((zone, name)) if !zone.is_empty() && !name.is_empty() && !name.contains('/') => {
            Ok((zone, name))
        }
        _ => Err(NukeError::Structural(format!(
            "expected `zone/name` identifier, got `{}`",
            id
        ))),
    }
}

/// RFC3339 timestamp field of an API item
pub(crate) fn parse_time(item: &Value, key: &str) -> Option<DateTime<Utc>> {
    str_field(item, key)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// Candidate for an item carrying `name`, `labels` and a creation timestamp
pub(crate) fn candidate(identifier: String, item: &Value, time_key: &str) -> Candidate {
    let name = str_field(item, "name").map(|n| extract_short_name(n).to_string());
    let mut candidate = Candidate::new(identifier)
        .created_at(parse_time(item, time_key))
        .tagged(labels_to_tags(item.get("labels")));
    candidate.name = name;
    candidate
}

/// Zones of the client's region
pub(crate) async fn zones_in_region(client: &GcpClient) -> Result<Vec<String>> {
    let region = client.region()?;
    let response = client
        .get(&client.compute_url(&format!("regions/{}", region)))
        .await
        .with_context(|| format!("Failed to look up region {}", region))?;

    Ok(response
        .get("zones")
        .and_then(|v| v.as_array())
        .map(|zones| {
            zones
                .iter()
                .filter_map(|z| z.as_str())
                .map(|z| extract_short_name(z).to_string())
                .collect()
        })
        .unwrap_or_default())
}

/// List a zonal Compute resource in every zone of the client's region.
/// Zones are fetched concurrently; any failed zone fails the listing.
pub(crate) async fn list_zonal(client: &GcpClient, resource: &str) -> Result<Vec<(String, Value)>> {
    let zones = zones_in_region(client).await?;

    let per_zone = try_join_all(zones.iter().map(|zone| async move {
        let items = fetch_all(client, &client.compute_zonal_url(zone, resource), "items").await?;
        Ok::<_, anyhow::Error>(items.into_iter().map(|item| (zone.clone(), item)).collect::<Vec<_>>())
    }))
    .await?;

    Ok(per_zone.into_iter().flatten().collect())
}

/// DELETE a Compute or GKE resource and wait for the operation
pub(crate) async fn delete_and_wait(client: &GcpClient, url: &str, cancel: &CancellationToken) -> Result<()> {
    let op = client.delete(url).await?;
    client.wait_for_operation(&op, cancel).await
}

/// Dry-run a delete through `testIamPermissions`
pub(crate) async fn require_permission(client: &GcpClient, url: &str, permission: &str) -> Result<()> {
    let response = client
        .post(url, Some(&json!({ "permissions": [permission] })))
        .await?;

    let granted = response
        .get("permissions")
        .and_then(|v| v.as_array())
        .map(|perms| perms.iter().any(|p| p.as_str() == Some(permission)))
        .unwrap_or(false);

    if granted {
        Ok(())
    } else {
        Err(NukeError::PermissionDenied(format!("missing {}", permission)).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gcp::auth::GcpCredentials;
    use crate::gcp::client::Endpoints;

    #[test]
    fn zonal_ids() {
        assert_eq!(split_zonal_id("us-east1-b/vm-1").unwrap(), ("us-east1-b", "vm-1"));
        for bad in ["vm-1", "/vm-1", "us-east1-b/", "a/b/c"] {
            assert!(matches!(split_zonal_id(bad), Err(NukeError::Structural(_))));
        }
    }

    #[test]
    fn candidate_from_item() {
        let item = json!({
            "name": "vm-1",
            "creationTimestamp": "2024-01-15T10:30:00.000-08:00",
            "labels": {"env": "ci"}
        });
        let c = candidate("us-east1-b/vm-1".to_string(), &item, "creationTimestamp");
        assert_eq!(c.identifier, "us-east1-b/vm-1");
        assert_eq!(c.name.as_deref(), Some("vm-1"));
        assert!(c.time.is_some());
        assert_eq!(c.tags.get("env").map(String::as_str), Some("ci"));
    }

    #[test]
    fn registry_order_puts_children_first() {
        let client = GcpClient::with_credentials(
            GcpCredentials::from_static_token("t"),
            "my-project-123",
            Endpoints::default(),
        )
        .unwrap();
        let registry = registry(&client).unwrap();
        let names = registry.type_names();

        let pos = |name: &str| names.iter().position(|n| *n == name).unwrap();
        assert!(pos(gke::TYPE_NAME) < pos(instances::TYPE_NAME));
        assert!(pos(instances::TYPE_NAME) < pos(disks::TYPE_NAME));
        assert!(pos(pubsub::SUBSCRIPTIONS) < pos(pubsub::TOPICS));
        assert!(pos(firewalls::TYPE_NAME) < pos(networks::TYPE_NAME));
        assert_eq!(names.len(), 8);
    }
}
