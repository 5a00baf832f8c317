//! Cloud Storage buckets
//!
//! A bucket can only be deleted once it is empty, and objects under a
//! retention policy cannot be deleted, so each bucket goes through a fixed
//! pipeline: clear retention, delete every object version, clear lifecycle,
//! delete the bucket.

use super::{candidate, scoped};
use crate::gcp::client::{is_not_found, GcpClient};
use crate::gcp::fetcher::{fetch_all, for_each_page, str_field};
use crate::resource::{CallContext, Candidate, DeletionStrategy, Resource, ResourceType, Step};
use anyhow::{Context, Result};
use futures::stream::{self, StreamExt, TryStreamExt};
use serde_json::{json, Value};

pub const TYPE_NAME: &str = "storage-buckets";

/// Concurrent object deletes per bucket
const OBJECT_DELETE_CONCURRENCY: usize = 16;

pub fn resource(client: GcpClient) -> Box<dyn ResourceType> {
    Box::new(
        Resource::new(
            TYPE_NAME,
            scoped(client),
            |ctx: CallContext<GcpClient>, _filter| async move { list(&ctx.client).await },
            DeletionStrategy::multi_step(vec![
                Step::new("clear-retention", |ctx: CallContext<GcpClient>, bucket: String| async move {
                    patch_bucket(&ctx.client, &bucket, json!({ "retentionPolicy": null })).await
                }),
                Step::new("empty", |ctx: CallContext<GcpClient>, bucket: String| async move {
                    empty_bucket(&ctx.client, &bucket).await
                }),
                Step::new("clear-lifecycle", |ctx: CallContext<GcpClient>, bucket: String| async move {
                    patch_bucket(&ctx.client, &bucket, json!({ "lifecycle": null })).await
                }),
                Step::new("delete", |ctx: CallContext<GcpClient>, bucket: String| async move {
                    ctx.client
                        .delete(&ctx.client.storage_bucket_url(&bucket))
                        .await
                        .with_context(|| format!("Failed to delete bucket {}", bucket))?;
                    Ok(())
                }),
            ]),
        )
        .global()
        .batch_size(10),
    )
}

async fn list(client: &GcpClient) -> Result<Vec<Candidate>> {
    let url = format!(
        "{}?project={}",
        client.storage_url("b"),
        urlencoding::encode(&client.project_id)
    );
    let items = fetch_all(client, &url, "items").await?;
    Ok(items
        .iter()
        .filter_map(|item| {
            let name = str_field(item, "name")?;
            Some(candidate(name.to_string(), item, "timeCreated"))
        })
        .collect())
}

async fn patch_bucket(client: &GcpClient, bucket: &str, body: Value) -> Result<()> {
    client
        .patch(&client.storage_bucket_url(bucket), &body)
        .await
        .with_context(|| format!("Failed to update bucket {}", bucket))?;
    Ok(())
}

/// Delete every object version in the bucket, one listing page at a time
async fn empty_bucket(client: &GcpClient, bucket: &str) -> Result<()> {
    let url = format!("{}?versions=true", client.storage_objects_url(bucket));
    let mut count = 0usize;

    for_each_page(client, &url, "items", |objects| {
        count += objects.len();
        delete_objects(client, bucket, objects)
    })
    .await?;

    tracing::debug!(bucket = %bucket, count, "Deleted objects");
    Ok(())
}

async fn delete_objects(client: &GcpClient, bucket: &str, objects: Vec<Value>) -> Result<()> {
    stream::iter(objects)
        .map(Ok::<_, anyhow::Error>)
        .try_for_each_concurrent(OBJECT_DELETE_CONCURRENCY, |object| async move {
            let Some(name) = str_field(&object, "name") else {
                return Ok(());
            };
            let mut url = client.storage_object_url(bucket, name);
            if let Some(generation) = str_field(&object, "generation") {
                url = format!("{}?generation={}", url, generation);
            }
            match client.delete(&url).await {
                Ok(_) => Ok(()),
                // Already gone
                Err(e) if is_not_found(&e) => Ok(()),
                Err(e) => Err(e.context(format!("Failed to delete gs://{}/{}", bucket, name))),
            }
        })
        .await
}
