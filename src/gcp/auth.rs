//! GCP Authentication
//!
//! Bearer tokens come from Application Default Credentials (service account
//! key, gcloud user credentials or the metadata server). The `gcp_auth`
//! providers cache and refresh tokens themselves. Project resolution reads the
//! environment and the gcloud configuration files.

use anyhow::{Context, Result};
use gcp_auth::TokenProvider;
use std::path::PathBuf;
use std::sync::Arc;

/// Default scopes for GCP API access
pub const DEFAULT_SCOPES: &[&str] = &["https://www.googleapis.com/auth/cloud-platform"];

#[derive(Clone)]
enum TokenSource {
    Adc(Arc<dyn TokenProvider>),
    /// Fixed bearer token (emulators, tests)
    Static(String),
}

/// Source of bearer tokens for API calls
#[derive(Clone)]
pub struct GcpCredentials {
    source: TokenSource,
}

impl GcpCredentials {
    /// Resolve Application Default Credentials
    pub async fn new() -> Result<Self> {
        let provider = gcp_auth::provider().await.context(
            "Failed to initialize GCP authentication. Run 'gcloud auth application-default login'",
        )?;
        Ok(Self {
            source: TokenSource::Adc(provider),
        })
    }

    /// Credentials that always present the same bearer token
    pub fn from_static_token(token: impl Into<String>) -> Self {
        Self {
            source: TokenSource::Static(token.into()),
        }
    }

    pub async fn get_token(&self) -> Result<String> {
        match &self.source {
            TokenSource::Static(token) => Ok(token.clone()),
            TokenSource::Adc(provider) => {
                let token = provider
                    .token(DEFAULT_SCOPES)
                    .await
                    .context("Failed to get access token")?;
                Ok(token.as_str().to_string())
            }
        }
    }
}

/// Get the gcloud configuration directory
pub fn get_gcloud_config_dir() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("CLOUDSDK_CONFIG") {
        return Some(PathBuf::from(path));
    }

    // Default to ~/.config/gcloud on Linux/macOS
    dirs::config_dir().map(|p| p.join("gcloud"))
}

/// Validate a GCP project ID format
/// Project IDs must be 6-30 characters, lowercase letters, digits, and hyphens
/// Must start with a letter and cannot end with a hyphen
pub fn validate_project_id(project: &str) -> bool {
    if project.len() < 6 || project.len() > 30 {
        return false;
    }

    match project.chars().next() {
        Some(c) if c.is_ascii_lowercase() => {}
        _ => return false,
    }

    if project.ends_with('-') {
        return false;
    }

    project
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

/// Environment variables consulted for the project, in priority order
const PROJECT_ENV_VARS: &[&str] = &[
    "CLOUDSDK_CORE_PROJECT",
    "GOOGLE_CLOUD_PROJECT",
    "GCLOUD_PROJECT",
];

/// Read the default project from the environment, then gcloud configuration
/// Security: Validates project ID format before returning
pub fn get_default_project() -> Option<String> {
    for var in PROJECT_ENV_VARS {
        if let Ok(project) = std::env::var(var) {
            if validate_project_id(&project) {
                return Some(project);
            }
            tracing::warn!("Invalid project ID format in {}", var);
        }
    }

    let config_dir = get_gcloud_config_dir()?;

    if let Ok(content) = std::fs::read_to_string(config_dir.join("properties")) {
        if let Some(project) = project_from_ini(&content, None) {
            return Some(project);
        }
    }

    let active_config = std::fs::read_to_string(config_dir.join("active_config")).ok()?;
    let config_name = active_config.trim();

    // Security: Validate config name to prevent path traversal
    if !config_name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        tracing::warn!("Invalid characters in active_config name");
        return None;
    }

    let config_path = config_dir
        .join("configurations")
        .join(format!("config_{}", config_name));
    let content = std::fs::read_to_string(config_path).ok()?;
    project_from_ini(&content, Some("core"))
}

/// Find a valid `project = ...` entry, optionally only inside `[section]`
fn project_from_ini(content: &str, section: Option<&str>) -> Option<String> {
    let mut in_section = section.is_none();

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if line.starts_with('[') {
            in_section = match section {
                Some(name) => line == format!("[{}]", name),
                None => true,
            };
            continue;
        }
        if !in_section {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        if key.trim() != "project" {
            continue;
        }
        let project = value.trim();
        if validate_project_id(project) {
            return Some(project.to_string());
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_id_rules() {
        assert!(validate_project_id("my-project-123"));
        assert!(!validate_project_id("short"));
        assert!(!validate_project_id("1starts-with-digit"));
        assert!(!validate_project_id("ends-with-hyphen-"));
        assert!(!validate_project_id("Upper-Case-Project"));
    }

    #[test]
    fn project_from_core_section() {
        let content = "[compute]\nproject = wrong-section\n\n[core]\n# comment\naccount = me@example.com\nproject = my-project-123\n";
        assert_eq!(
            project_from_ini(content, Some("core")).as_deref(),
            Some("my-project-123")
        );
    }

    #[test]
    fn project_key_must_match_exactly() {
        let content = "[core]\nproject_number = 1234567\n";
        assert_eq!(project_from_ini(content, Some("core")), None);
    }

    #[tokio::test]
    async fn static_token_is_returned_as_is() {
        let creds = GcpCredentials::from_static_token("test-token");
        assert_eq!(creds.get_token().await.unwrap(), "test-token");
    }
}
