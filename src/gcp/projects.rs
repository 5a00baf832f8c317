//! GCP Projects
//!
//! Lookup of the target project before a run.

use super::client::GcpClient;
use anyhow::{Context, Result};
use serde_json::Value;

/// Project information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Project {
    pub project_id: String,
    pub name: String,
    pub project_number: String,
    pub lifecycle_state: String,
}

impl From<&Value> for Project {
    fn from(value: &Value) -> Self {
        let field = |key: &str, default: &str| {
            value
                .get(key)
                .and_then(|v| v.as_str())
                .unwrap_or(default)
                .to_string()
        };
        Self {
            project_id: field("projectId", "-"),
            name: field("name", "-"),
            project_number: field("projectNumber", "-"),
            lifecycle_state: field("lifecycleState", "UNKNOWN"),
        }
    }
}

impl Project {
    pub fn is_active(&self) -> bool {
        self.lifecycle_state == "ACTIVE"
    }
}

/// Get the client's project
pub async fn get_project(client: &GcpClient) -> Result<Project> {
    let url = client.resourcemanager_url(&format!("projects/{}", client.project_id));
    let response = client
        .get(&url)
        .await
        .with_context(|| format!("Failed to look up project {}", client.project_id))?;
    Ok(Project::from(&response))
}

/// Refuse to run against a project that is missing or being deleted
pub async fn ensure_active(client: &GcpClient) -> Result<Project> {
    let project = get_project(client).await?;
    if !project.is_active() {
        anyhow::bail!(
            "Project {} is {}, refusing to run",
            project.project_id,
            project.lifecycle_state
        );
    }
    tracing::info!(project = %project.project_id, name = %project.name, "Target project is active");
    Ok(project)
}

/// Regions the Compute API reports for the project
pub async fn list_regions(client: &GcpClient) -> Result<Vec<String>> {
    let items = super::fetcher::fetch_all(client, &client.compute_url("regions"), "items").await?;
    let mut regions: Vec<String> = items
        .iter()
        .filter(|r| r.get("status").and_then(|v| v.as_str()).unwrap_or("UP") == "UP")
        .filter_map(|r| r.get("name").and_then(|v| v.as_str()).map(str::to_string))
        .collect();
    regions.sort();
    Ok(regions)
}
