//! First-seen tag manager
//!
//! Some resource types expose no creation time. For those the engine stamps a
//! marker tag on the resource the first time it is observed and reads it back
//! on later runs, so that age-based filters see a stable timestamp.
//!
//! Concurrent first observations of the same resource are not coordinated:
//! the last write wins and later runs converge on the persisted value.

use crate::error::NukeError;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Timelike, Utc};
use std::collections::HashMap;
use tracing::debug;

/// Marker tag key holding the RFC3339 first-seen timestamp
pub const FIRST_SEEN_TAG_KEY: &str = "cloud-nuke-first-seen";

/// Persists a full tag set onto a resource.
#[async_trait]
pub trait TagWriter: Send + Sync {
    async fn write_tags(
        &self,
        identifier: &str,
        tags: &HashMap<String, String>,
    ) -> anyhow::Result<()>;
}

/// Return the persisted first-seen time, writing it first if absent.
pub async fn get_or_create_first_seen(
    writer: &dyn TagWriter,
    identifier: &str,
    existing_tags: &HashMap<String, String>,
) -> Result<DateTime<Utc>, NukeError> {
    get_or_create_first_seen_at(writer, identifier, existing_tags, Utc::now()).await
}

/// Same as [`get_or_create_first_seen`] with an explicit clock.
pub async fn get_or_create_first_seen_at(
    writer: &dyn TagWriter,
    identifier: &str,
    existing_tags: &HashMap<String, String>,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>, NukeError> {
    if let Some(raw) = existing_tags.get(FIRST_SEEN_TAG_KEY) {
        return parse_first_seen(raw).ok_or_else(|| {
            NukeError::Structural(format!(
                "{identifier}: unparseable {FIRST_SEEN_TAG_KEY} value `{raw}`"
            ))
        });
    }

    // Persisted at second precision, so the returned value must match what a
    // later read parses back.
    let now = now.with_nanosecond(0).unwrap_or(now);

    let mut tags = existing_tags.clone();
    tags.insert(FIRST_SEEN_TAG_KEY.to_string(), format_first_seen(now));

    writer
        .write_tags(identifier, &tags)
        .await
        .map_err(|e| NukeError::Tagging(format!("{identifier}: {e:#}")))?;

    debug!(identifier = %identifier, first_seen = %format_first_seen(now), "Tagged first-seen");
    Ok(now)
}

pub fn format_first_seen(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn parse_first_seen(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
