//! GCP Client
//!
//! Main client for interacting with GCP APIs, combining authentication,
//! HTTP functionality, URL building and long-running operation polling.

use super::auth::GcpCredentials;
use super::http::GcpHttpClient;
use crate::error::NukeError;
use crate::resource::Scope;
use crate::wait::{poll_until, WaitConfig};
use anyhow::{Context, Result};
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Base URLs of the APIs the client talks to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub compute: String,
    pub storage: String,
    pub container: String,
    pub pubsub: String,
    pub resourcemanager: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            compute: "https://compute.googleapis.com".to_string(),
            storage: "https://storage.googleapis.com".to_string(),
            container: "https://container.googleapis.com".to_string(),
            pubsub: "https://pubsub.googleapis.com".to_string(),
            resourcemanager: "https://cloudresourcemanager.googleapis.com".to_string(),
        }
    }
}

impl Endpoints {
    /// Route every API to one base URL (emulators, mock servers)
    pub fn with_base(base: &str) -> Result<Self> {
        let parsed = Url::parse(base).with_context(|| format!("Invalid endpoint URL: {}", base))?;
        let base = parsed.as_str().trim_end_matches('/').to_string();
        Ok(Self {
            compute: base.clone(),
            storage: base.clone(),
            container: base.clone(),
            pubsub: base.clone(),
            resourcemanager: base,
        })
    }
}

/// State of a long-running operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationStatus {
    Done,
    Failed(String),
    Running,
}

impl OperationStatus {
    /// Read a Compute or GKE operation payload
    pub fn from_operation(op: &Value) -> Self {
        let status = op.get("status").and_then(|v| v.as_str()).unwrap_or("");
        if status != "DONE" {
            return OperationStatus::Running;
        }

        let Some(error) = op.get("error").filter(|e| !e.is_null()) else {
            return OperationStatus::Done;
        };

        // Compute: error.errors[].message, GKE: error.message
        let messages: Vec<&str> = error
            .get("errors")
            .and_then(|v| v.as_array())
            .map(|errors| {
                errors
                    .iter()
                    .filter_map(|e| e.get("message").and_then(|m| m.as_str()))
                    .collect()
            })
            .unwrap_or_default();

        if !messages.is_empty() {
            return OperationStatus::Failed(messages.join("; "));
        }

        OperationStatus::Failed(
            error
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("operation failed")
                .to_string(),
        )
    }
}

/// Main GCP client
#[derive(Clone)]
pub struct GcpClient {
    pub credentials: GcpCredentials,
    pub http: GcpHttpClient,
    pub project_id: String,
    /// Region this client is scoped to, `None` for the global scope
    pub region: Option<String>,
    pub endpoints: Endpoints,
    /// Fail on ancillary lookups instead of degrading to an empty list
    pub strict_lookups: bool,
    /// Polling policy for long-running operations
    pub operation_wait: WaitConfig,
    /// Run-wide cancellation; every API call stops once it fires
    pub cancel: CancellationToken,
}

impl GcpClient {
    /// Create a new GCP client using Application Default Credentials
    pub async fn new(project_id: &str) -> Result<Self> {
        let credentials = GcpCredentials::new()
            .await
            .context("Failed to initialize GCP credentials")?;

        Self::with_credentials(credentials, project_id, Endpoints::default())
    }

    pub fn with_credentials(
        credentials: GcpCredentials,
        project_id: &str,
        endpoints: Endpoints,
    ) -> Result<Self> {
        Ok(Self {
            credentials,
            http: GcpHttpClient::new()?,
            project_id: project_id.to_string(),
            region: None,
            endpoints,
            strict_lookups: false,
            operation_wait: WaitConfig::default(),
            cancel: CancellationToken::new(),
        })
    }

    pub fn strict_lookups(mut self, strict: bool) -> Self {
        self.strict_lookups = strict;
        self
    }

    pub fn operation_wait(mut self, wait: WaitConfig) -> Self {
        self.operation_wait = wait;
        self
    }

    /// Abort in-flight and future calls when `cancel` fires
    pub fn cancel_on(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.http = GcpHttpClient::with_timeout(timeout)?;
        Ok(self)
    }

    /// Copy of this client bound to a scope
    pub fn scoped(&self, scope: &Scope) -> Self {
        let mut client = self.clone();
        client.region = (!scope.is_global).then(|| scope.region.clone());
        client
    }

    /// Region of a regional client
    pub fn region(&self) -> Result<&str> {
        self.region
            .as_deref()
            .context("Client is not scoped to a region")
    }

    pub async fn get_token(&self) -> Result<String> {
        self.credentials.get_token().await
    }

    /// Race an API call against the run's cancellation
    async fn cancellable<T>(&self, call: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(NukeError::Cancelled.into()),
            result = call => result,
        }
    }

    pub async fn get(&self, url: &str) -> Result<Value> {
        self.cancellable(async {
            let token = self.get_token().await?;
            self.http.get(url, &token).await
        })
        .await
    }

    /// GET that maps 404 to `None`
    pub async fn get_optional(&self, url: &str) -> Result<Option<Value>> {
        match self.get(url).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn post(&self, url: &str, body: Option<&Value>) -> Result<Value> {
        self.cancellable(async {
            let token = self.get_token().await?;
            self.http.post(url, &token, body).await
        })
        .await
    }

    pub async fn patch(&self, url: &str, body: &Value) -> Result<Value> {
        self.cancellable(async {
            let token = self.get_token().await?;
            self.http.patch(url, &token, body).await
        })
        .await
    }

    pub async fn delete(&self, url: &str) -> Result<Value> {
        self.cancellable(async {
            let token = self.get_token().await?;
            self.http.delete(url, &token).await
        })
        .await
    }

    /// Fetch the current state of an operation by its self link
    pub async fn poll_operation(&self, operation_url: &str) -> Result<OperationStatus> {
        let op = self.get(operation_url).await?;
        Ok(OperationStatus::from_operation(&op))
    }

    /// Block until `op` is done, polling its self link.
    ///
    /// Empty responses (APIs that delete synchronously) return immediately.
    pub async fn wait_for_operation(&self, op: &Value, cancel: &CancellationToken) -> Result<()> {
        if op.is_null() {
            return Ok(());
        }

        let name = op.get("name").and_then(|v| v.as_str()).unwrap_or("operation");
        match OperationStatus::from_operation(op) {
            OperationStatus::Done => return Ok(()),
            OperationStatus::Failed(msg) => anyhow::bail!("Operation {} failed: {}", name, msg),
            OperationStatus::Running => {}
        }

        let Some(link) = op.get("selfLink").and_then(|v| v.as_str()) else {
            tracing::debug!("Operation {} has no selfLink, not waiting", name);
            return Ok(());
        };

        poll_until(self.operation_wait, cancel, name, || async move {
            match self.poll_operation(link).await? {
                OperationStatus::Done => Ok(true),
                OperationStatus::Failed(msg) => Err(anyhow::anyhow!("Operation {} failed: {}", name, msg)),
                OperationStatus::Running => Ok(false),
            }
        })
        .await
        .map_err(anyhow::Error::new)
    }

    /// Apply the degrade policy to an ancillary lookup
    pub fn lookup_or_empty(&self, what: &str, result: Result<Vec<Value>>) -> Result<Vec<Value>> {
        match result {
            Ok(items) => Ok(items),
            Err(e) if self.strict_lookups => Err(e.context(format!("Failed to look up {}", what))),
            Err(e) => {
                tracing::warn!(lookup = %what, error = %format!("{:#}", e), "Lookup failed, continuing with none");
                Ok(Vec::new())
            }
        }
    }

    // =========================================================================
    // Compute Engine API helpers
    // =========================================================================

    /// Build Compute Engine API URL
    pub fn compute_url(&self, path: &str) -> String {
        format!(
            "{}/compute/v1/projects/{}/{}",
            self.endpoints.compute, self.project_id, path
        )
    }

    /// Build zonal Compute Engine API URL
    pub fn compute_zonal_url(&self, zone: &str, resource: &str) -> String {
        self.compute_url(&format!("zones/{}/{}", zone, resource))
    }

    /// Build regional Compute Engine API URL
    pub fn compute_regional_url(&self, region: &str, resource: &str) -> String {
        self.compute_url(&format!("regions/{}/{}", region, resource))
    }

    /// Build global Compute Engine API URL
    pub fn compute_global_url(&self, resource: &str) -> String {
        self.compute_url(&format!("global/{}", resource))
    }

    /// Build aggregated Compute Engine API URL (all zones or regions)
    pub fn compute_aggregated_url(&self, resource: &str) -> String {
        self.compute_url(&format!("aggregated/{}", resource))
    }

    // =========================================================================
    // Cloud Storage API helpers
    // =========================================================================

    /// Build Cloud Storage API URL
    pub fn storage_url(&self, path: &str) -> String {
        format!("{}/storage/v1/{}", self.endpoints.storage, path)
    }

    pub fn storage_bucket_url(&self, bucket: &str) -> String {
        self.storage_url(&format!("b/{}", urlencoding::encode(bucket)))
    }

    pub fn storage_objects_url(&self, bucket: &str) -> String {
        self.storage_url(&format!("b/{}/o", urlencoding::encode(bucket)))
    }

    pub fn storage_object_url(&self, bucket: &str, object: &str) -> String {
        self.storage_url(&format!(
            "b/{}/o/{}",
            urlencoding::encode(bucket),
            urlencoding::encode(object)
        ))
    }

    // =========================================================================
    // GKE API helpers
    // =========================================================================

    /// Build GKE API URL
    pub fn container_url(&self, path: &str) -> String {
        format!(
            "{}/v1/projects/{}/{}",
            self.endpoints.container, self.project_id, path
        )
    }

    /// Build GKE location URL (region or zone)
    pub fn container_location_url(&self, location: &str, resource: &str) -> String {
        self.container_url(&format!("locations/{}/{}", location, resource))
    }

    // =========================================================================
    // Pub/Sub API helpers
    // =========================================================================

    pub fn pubsub_url(&self, path: &str) -> String {
        format!(
            "{}/v1/projects/{}/{}",
            self.endpoints.pubsub, self.project_id, path
        )
    }

    // =========================================================================
    // Resource Manager API helpers
    // =========================================================================

    /// Build Resource Manager API URL
    pub fn resourcemanager_url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.endpoints.resourcemanager, path)
    }
}

/// Whether the error chain carries a 404 from the API
pub fn is_not_found(error: &anyhow::Error) -> bool {
    error
        .chain()
        .filter_map(|c| c.downcast_ref::<crate::error::GcpApiError>())
        .any(|api| api.is_not_found())
}

/// Region a zone belongs to (`us-central1-a` -> `us-central1`)
pub fn region_of_zone(zone: &str) -> &str {
    zone.rsplit_once('-').map(|(region, _)| region).unwrap_or(zone)
}
