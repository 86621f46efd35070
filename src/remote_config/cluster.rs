use serde::{Deserialize, Serialize};

use super::RemoteConfigError;

pub const DEFAULT_DNS_BASE_DOMAIN: &str = "cluster.local";
pub const DEFAULT_DNS_CONSENSUS_NODE_PATTERN: &str = "network-{nodeAlias}-svc.{namespace}.svc";

/// One cluster participating in a deployment, keyed by its cluster reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterInfo {
    pub name: String,
    pub namespace: String,
    pub deployment: String,
    #[serde(default = "default_dns_base_domain")]
    pub dns_base_domain: String,
    #[serde(default = "default_dns_consensus_node_pattern")]
    pub dns_consensus_node_pattern: String,
}

fn default_dns_base_domain() -> String {
    DEFAULT_DNS_BASE_DOMAIN.to_string()
}

fn default_dns_consensus_node_pattern() -> String {
    DEFAULT_DNS_CONSENSUS_NODE_PATTERN.to_string()
}

impl ClusterInfo {
    pub fn new(
        name: impl Into<String>,
        namespace: impl Into<String>,
        deployment: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            deployment: deployment.into(),
            dns_base_domain: default_dns_base_domain(),
            dns_consensus_node_pattern: default_dns_consensus_node_pattern(),
        }
    }

    pub fn validate(&self) -> Result<(), RemoteConfigError> {
        if self.name.trim().is_empty() {
            return Err(RemoteConfigError::validation("cluster name is empty"));
        }
        if self.namespace.trim().is_empty() {
            return Err(RemoteConfigError::validation(format!(
                "cluster {} has an empty namespace",
                self.name
            )));
        }
        if self.deployment.trim().is_empty() {
            return Err(RemoteConfigError::validation(format!(
                "cluster {} has an empty deployment",
                self.name
            )));
        }
        Ok(())
    }

    /// In-cluster DNS name of a consensus node's service.
    pub fn consensus_node_fqdn(&self, node_alias: &str) -> String {
        let host = self
            .dns_consensus_node_pattern
            .replace("{nodeAlias}", node_alias)
            .replace("{namespace}", &self.namespace);
        format!("{}.{}", host, self.dns_base_domain)
    }
}
