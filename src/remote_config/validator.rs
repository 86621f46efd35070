//! Checks that the components the remote config lists are actually running.

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{Component, RemoteConfigDataWrapper, RemoteConfigError};
use crate::k8s::K8sFactory;

/// Verify every live component has at least one pod in its cluster.
///
/// `contexts` maps each cluster reference of the document to the kube
/// context it lives in. Deleted components are skipped, as are consensus
/// nodes that have not been deployed yet. `skip_consensus_nodes` skips
/// consensus nodes entirely, for commands that are about to (re)create them.
pub async fn validate_components(
    factory: &Arc<dyn K8sFactory>,
    contexts: &BTreeMap<String, String>,
    remote_config: &RemoteConfigDataWrapper,
    skip_consensus_nodes: bool,
) -> Result<(), RemoteConfigError> {
    for component in remote_config.components().iter() {
        if !needs_pods(component, skip_consensus_nodes) {
            continue;
        }
        let Some(context) = contexts.get(component.cluster()) else {
            return Err(RemoteConfigError::UnknownCluster {
                kind: component.kind(),
                name: component.name().to_string(),
                cluster: component.cluster().to_string(),
            });
        };
        let backend = factory.backend_for_context(context).await?;
        let selector = component.pod_selector();
        let pods = backend.list_pods(component.namespace(), &selector).await?;
        if pods.is_empty() {
            warn!(
                kind = %component.kind(),
                name = component.name(),
                context = %context,
                selector = %selector,
                "component has no pods"
            );
            return Err(RemoteConfigError::ComponentUnhealthy(format!(
                "{} in remote config with name {} was not found in namespace: {}, cluster: {}",
                component.kind(),
                component.name(),
                component.namespace(),
                context
            )));
        }
        debug!(kind = %component.kind(), name = component.name(), pods = pods.len(), "component healthy");
    }
    Ok(())
}

fn needs_pods(component: &Component, skip_consensus_nodes: bool) -> bool {
    match component {
        Component::ConsensusNode(node) => !skip_consensus_nodes && node.state.has_pods(),
        other => !other.is_deleted(),
    }
}
