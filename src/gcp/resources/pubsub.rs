//! Pub/Sub subscriptions and topics
//!
//! Neither exposes a creation time, so both use first-seen labels. Identifiers
//! are short names; subscriptions are removed before topics.

use super::scoped;
use crate::gcp::client::GcpClient;
use crate::gcp::fetcher::{extract_short_name, fetch_all, str_field};
use crate::gcp::labels::{labels_to_tags, tags_to_labels};
use crate::resource::{CallContext, Candidate, DeletionStrategy, Resource, ResourceType};
use anyhow::{Context, Result};
use serde_json::json;
use std::collections::HashMap;

pub const SUBSCRIPTIONS: &str = "pubsub-subscriptions";
pub const TOPICS: &str = "pubsub-topics";

/// Deleted one at a time: a subscription delete detaches it from its topic
pub fn subscriptions(client: GcpClient) -> Box<dyn ResourceType> {
    Box::new(
        Resource::new(
            SUBSCRIPTIONS,
            scoped(client),
            |ctx: CallContext<GcpClient>, _filter| async move {
                list(&ctx.client, "subscriptions").await
            },
            DeletionStrategy::sequential(|ctx: CallContext<GcpClient>, id: String| async move {
                delete(&ctx.client, "subscriptions", &id).await
            }),
        )
        .global()
        .with_first_seen(|ctx: CallContext<GcpClient>, id: String, tags| async move {
            write_labels(&ctx.client, "subscriptions", "subscription", &id, &tags).await
        }),
    )
}

pub fn topics(client: GcpClient) -> Box<dyn ResourceType> {
    Box::new(
        Resource::new(
            TOPICS,
            scoped(client),
            |ctx: CallContext<GcpClient>, _filter| async move { list(&ctx.client, "topics").await },
            DeletionStrategy::simple_batch(|ctx: CallContext<GcpClient>, id: String| async move {
                delete(&ctx.client, "topics", &id).await
            }),
        )
        .global()
        .batch_size(25)
        .with_first_seen(|ctx: CallContext<GcpClient>, id: String, tags| async move {
            write_labels(&ctx.client, "topics", "topic", &id, &tags).await
        }),
    )
}

async fn list(client: &GcpClient, collection: &str) -> Result<Vec<Candidate>> {
    let items = fetch_all(client, &client.pubsub_url(collection), collection).await?;
    Ok(items
        .iter()
        .filter_map(|item| {
            let name = extract_short_name(str_field(item, "name")?);
            // No native creation time; first-seen labels stand in
            Some(Candidate::new(name).tagged(labels_to_tags(item.get("labels"))))
        })
        .collect())
}

async fn delete(client: &GcpClient, collection: &str, name: &str) -> Result<()> {
    client
        .delete(&client.pubsub_url(&format!("{}/{}", collection, name)))
        .await
        .with_context(|| format!("Failed to delete {} {}", collection, name))?;
    Ok(())
}

/// Replace the resource's labels; `field` is the request body key
async fn write_labels(
    client: &GcpClient,
    collection: &str,
    field: &str,
    name: &str,
    tags: &HashMap<String, String>,
) -> Result<()> {
    let body = json!({
        field: { "labels": tags_to_labels(tags) },
        "updateMask": "labels",
    });
    client
        .patch(&client.pubsub_url(&format!("{}/{}", collection, name)), &body)
        .await
        .with_context(|| format!("Failed to label {} {}", collection, name))?;
    Ok(())
}
