//! Error types
//!
//! Provider calls use `anyhow` internally. Anything that ends up attached to an
//! identifier in the report is converted into a [`NukeError`], which is `Clone`
//! so a single bulk failure can be recorded against every identifier of the
//! batch.

use thiserror::Error;

/// Non-success HTTP response from a GCP REST endpoint.
#[derive(Debug, Clone, Error)]
#[error("API request failed: {status} {message}")]
pub struct GcpApiError {
    pub status: u16,
    pub message: String,
}

impl GcpApiError {
    pub fn is_not_found(&self) -> bool {
        self.status == 404
    }
}

/// Per-identifier (or per-resource-type) failure recorded by the engine.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NukeError {
    /// Provider API rejected the call
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Caller is not allowed to perform the operation
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// A waiter exceeded its attempt ceiling
    #[error("timed out waiting for {type_name} after {attempts} attempts")]
    Timeout { type_name: String, attempts: usize },

    /// Malformed identifier or missing cross-reference
    #[error("invalid resource: {0}")]
    Structural(String),

    /// Run was interrupted before the operation was attempted or completed
    #[error("operation cancelled")]
    Cancelled,

    /// First-seen marker could not be persisted
    #[error("failed to write first-seen tag: {0}")]
    Tagging(String),

    /// Provider client could not be constructed for the scope
    #[error("failed to initialize client: {0}")]
    Client(String),

    /// One step of a multi-step deletion failed
    #[error("step `{step}` failed: {source}")]
    Step {
        step: String,
        #[source]
        source: Box<NukeError>,
    },

    #[error("{0}")]
    Other(String),
}

impl NukeError {
    /// Classify an error by walking its chain for a typed cause.
    pub fn from_anyhow(error: &anyhow::Error) -> Self {
        for cause in error.chain() {
            if let Some(api) = cause.downcast_ref::<GcpApiError>() {
                return Self::from_api(api);
            }
            if let Some(nuke) = cause.downcast_ref::<NukeError>() {
                return nuke.clone();
            }
        }
        NukeError::Other(format!("{error:#}"))
    }

    fn from_api(api: &GcpApiError) -> Self {
        match api.status {
            401 | 403 => NukeError::PermissionDenied(api.message.clone()),
            status => NukeError::Api {
                status,
                message: api.message.clone(),
            },
        }
    }

    /// Throttling or server-side errors. Reported, never retried by the engine.
    pub fn is_transient(&self) -> bool {
        match self {
            NukeError::Api { status, .. } => *status == 429 || *status >= 500,
            NukeError::Step { source, .. } => source.is_transient(),
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            NukeError::Api { status, .. } => *status == 404,
            NukeError::Step { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    pub fn is_permission_denied(&self) -> bool {
        match self {
            NukeError::PermissionDenied(_) => true,
            NukeError::Step { source, .. } => source.is_permission_denied(),
            _ => false,
        }
    }
}

impl From<anyhow::Error> for NukeError {
    fn from(error: anyhow::Error) -> Self {
        Self::from_anyhow(&error)
    }
}

/// Invalid user configuration: filter file, CLI overlay or resource selection.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid regex `{pattern}`: {source}")]
    InvalidRegex {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("invalid timestamp `{0}`, expected RFC3339 (e.g. 2024-01-01T00:00:00Z)")]
    InvalidTime(String),

    #[error("invalid duration `{0}`, expected e.g. 30m, 24h, 7d")]
    InvalidDuration(String),

    #[error("unknown resource type `{0}`")]
    UnknownResourceType(String),

    #[error("resource type `{0}` registered twice")]
    DuplicateResourceType(String),

    #[error("regional resource type `{regional}` registered after global type `{global}`")]
    RegionalAfterGlobal { regional: String, global: String },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    fn api(status: u16) -> anyhow::Error {
        anyhow::Error::new(GcpApiError {
            status,
            message: "boom".to_string(),
        })
    }

    #[test]
    fn forbidden_is_permission_denied() {
        let err = NukeError::from_anyhow(&api(403));
        assert!(err.is_permission_denied());
        assert!(!err.is_transient());
    }

    #[test]
    fn throttling_and_server_errors_are_transient() {
        assert!(NukeError::from_anyhow(&api(429)).is_transient());
        assert!(NukeError::from_anyhow(&api(503)).is_transient());
        assert!(!NukeError::from_anyhow(&api(400)).is_transient());
    }

    #[test]
    fn classification_survives_context() {
        let err = Err::<(), _>(api(404))
            .context("Failed to delete instance")
            .unwrap_err();
        assert!(NukeError::from_anyhow(&err).is_not_found());
    }

    #[test]
    fn nuke_error_round_trips_through_anyhow() {
        let err = anyhow::Error::new(NukeError::Structural("bad id".to_string()));
        assert_eq!(
            NukeError::from_anyhow(&err),
            NukeError::Structural("bad id".to_string())
        );
    }

    #[test]
    fn untyped_errors_keep_message() {
        let err = anyhow::anyhow!("socket closed");
        assert_eq!(
            NukeError::from_anyhow(&err),
            NukeError::Other("socket closed".to_string())
        );
    }

    #[test]
    fn step_error_delegates_classification() {
        let err = NukeError::Step {
            step: "empty".to_string(),
            source: Box::new(NukeError::Api {
                status: 500,
                message: "x".to_string(),
            }),
        };
        assert!(err.is_transient());
        assert!(err.to_string().contains("empty"));
    }
}
