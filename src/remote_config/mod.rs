//! The remote config: one versioned document per deployment, stored as YAML
//! in a labelled ConfigMap and replicated to every cluster context the
//! deployment spans.
//!
//! The document is only ever changed through
//! [`RemoteConfigDataWrapper::with_mutation`], which validates the result
//! before committing it, so an invalid document is never observable and never
//! written. Access exclusivity is not enforced here: callers hold the namespace
//! lock (see [`crate::lock`]) around `modify`.

use crate::k8s::K8sError;

pub mod cluster;
pub mod components;
pub mod document;
pub mod flags;
pub mod manager;
pub mod metadata;
pub mod validator;

pub use cluster::ClusterInfo;
pub use components::{
    BaseComponent, BlockNodeComponent, Component, ComponentKind, ComponentState,
    ComponentVariant, ComponentsDataWrapper, ConsensusNodeComponent, ConsensusNodeState,
    EnvoyProxyComponent, HaProxyComponent, MirrorNodeComponent, MirrorNodeExplorerComponent,
    RelayComponent,
};
pub use document::{RemoteConfigData, RemoteConfigDataWrapper, RemoteConfigDocument};
pub use flags::CommonFlags;
pub use manager::{CreateRemoteConfig, RemoteConfigManager, ReplicationReport};
pub use metadata::{DeploymentState, Migration, RemoteConfigMetadata};

/// Schema version written into new documents.
pub const REMOTE_CONFIG_VERSION: &str = "1.0.0";

/// Command history keeps this many most recent entries.
pub const MAX_COMMAND_HISTORY: usize = 50;

/// Error type for remote config operations
#[derive(Debug, thiserror::Error)]
pub enum RemoteConfigError {
    #[error("invalid remote config: {0}")]
    Validation(String),
    #[error("attempting to modify remote config without loading it first")]
    NotLoaded,
    #[error("remote config ConfigMap not found for namespace: {namespace}, context: {context}")]
    ConfigMapNotFound { namespace: String, context: String },
    #[error("component {name} of type {kind} already exists")]
    ComponentExists { kind: ComponentKind, name: String },
    #[error("component {name} of type {kind} not found")]
    ComponentNotFound { kind: ComponentKind, name: String },
    #[error("{kind} {name} references cluster {cluster}, which the remote config does not list")]
    UnknownCluster {
        kind: ComponentKind,
        name: String,
        cluster: String,
    },
    #[error("{0}")]
    ComponentUnhealthy(String),
    #[error("no namespace given and none configured for the deployment")]
    NamespaceUnresolved,
    #[error("no kube context given and none current")]
    ContextUnresolved,
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("kubernetes error: {0}")]
    K8s(#[from] K8sError),
    #[error("remote config could not be written to any cluster: {}", .failed.iter().map(|(ctx, err)| format!("{ctx}: {err}")).collect::<Vec<_>>().join("; "))]
    ReplicationFailed { failed: Vec<(String, String)> },
}

impl RemoteConfigError {
    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        RemoteConfigError::Validation(msg.into())
    }
}
