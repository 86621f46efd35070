//! Narrow interface over the Kubernetes API.
//!
//! Everything the lock and remote config subsystems need from a cluster goes
//! through [`K8sBackend`]; [`K8sFactory`] hands out one backend per kube
//! context so the remote config can be written to every cluster of a
//! deployment.

use async_trait::async_trait;
use std::sync::Arc;

pub mod backend;
pub mod factory;

pub use backend::{K8sBackend, KubeBackend};
pub use factory::KubeFactory;

/// Error type for Kubernetes API operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum K8sError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("kubernetes API error ({code}): {message}")]
    Api { code: u16, message: String },
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: &'static str,
        namespace: String,
        name: String,
    },
    #[error("unknown kube context: {0}")]
    UnknownContext(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl K8sError {
    /// Server-side failures worth retrying (5xx).
    pub fn is_transient(&self) -> bool {
        matches!(self, K8sError::Api { code, .. } if *code >= 500)
    }
}

impl From<kube::Error> for K8sError {
    fn from(e: kube::Error) -> Self {
        match e {
            kube::Error::Api(resp) if resp.code == 409 => K8sError::Conflict(resp.message),
            kube::Error::Api(resp) => K8sError::Api {
                code: resp.code,
                message: resp.message,
            },
            kube::Error::SerdeError(e) => K8sError::Serialization(e.to_string()),
            other => K8sError::ConnectionFailed(other.to_string()),
        }
    }
}

/// Hands out API backends per kube context.
#[async_trait]
pub trait K8sFactory: Send + Sync + 'static {
    /// Backend for the current (default) context.
    fn default_backend(&self) -> Arc<dyn K8sBackend>;

    /// Backend for a named context.
    async fn backend_for_context(&self, context: &str) -> Result<Arc<dyn K8sBackend>, K8sError>;

    /// Name of the current context, when known.
    fn current_context(&self) -> Option<String>;
}
