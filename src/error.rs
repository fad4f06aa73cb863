//! Error types for the Dell CSI operator
//!
//! Errors fall into two groups that the reconciler treats differently:
//! deterministic configuration/validation failures, which park a resource in
//! `InvalidConfig` until its spec changes, and transient API/sync failures,
//! which drive the retry and backoff path.

use thiserror::Error;

/// Crate-wide error type
#[derive(Error, Debug)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Kubernetes version (or config version on this Kubernetes version) not supported
    #[error("{0}")]
    UnsupportedVersion(String),

    /// Config version or driver type unknown to the operator config
    #[error("{0}")]
    UnsupportedDriverConfigVersion(String),

    #[error("{0}")]
    ValidationError(String),

    #[error("{0}")]
    SyncError(String),

    /// Composite error from the state calculator
    #[error("{0}")]
    StatusError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl Error {
    /// Whether retrying without a spec change can succeed
    pub fn is_retriable(&self) -> bool {
        match self {
            Error::KubeError(kube::Error::Api(e)) => e.code >= 500 || e.code == 409 || e.code == 429,
            Error::KubeError(_) | Error::SyncError(_) | Error::StatusError(_) => true,
            Error::IoError(_) => true,
            _ => false,
        }
    }

    /// True for an API 404
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::KubeError(kube::Error::Api(e)) if e.code == 404)
    }

    /// Short label used for metrics and logs
    pub fn kind(&self) -> &'static str {
        match self {
            Error::KubeError(_) => "kube",
            Error::ConfigError(_) => "config",
            Error::UnsupportedVersion(_) | Error::UnsupportedDriverConfigVersion(_) => "version",
            Error::ValidationError(_) => "validation",
            Error::SyncError(_) => "sync",
            Error::StatusError(_) => "status",
            Error::SerializationError(_) | Error::YamlError(_) => "serialization",
            Error::IoError(_) => "io",
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
