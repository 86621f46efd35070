//! Names and label selectors for the Kubernetes objects this crate owns.

use std::collections::BTreeMap;

/// Name of the ConfigMap holding the remote config document.
pub const REMOTE_CONFIG_CONFIGMAP_NAME: &str = "solo-remote-config";

/// ConfigMap data key holding the YAML document.
pub const REMOTE_CONFIG_DATA_KEY: &str = "remote-config-data";

/// Label key/value attached to every remote config ConfigMap.
pub const REMOTE_CONFIG_LABEL_KEY: &str = "solo.hedera.com/type";
pub const REMOTE_CONFIG_LABEL_VALUE: &str = "remote-config";

/// Label key attached to namespace leases.
pub const LEASE_LABEL_KEY: &str = "solo.hedera.com/type";
pub const LEASE_LABEL_VALUE: &str = "namespace-lock";

/// The lease guarding a namespace is named after the namespace itself.
pub fn lease_name(namespace: &str) -> String {
    namespace.to_string()
}

/// Selector used to discover remote config ConfigMaps without knowing their name.
pub fn remote_config_label_selector() -> String {
    format!("{}={}", REMOTE_CONFIG_LABEL_KEY, REMOTE_CONFIG_LABEL_VALUE)
}

pub fn remote_config_labels() -> BTreeMap<String, String> {
    [(
        REMOTE_CONFIG_LABEL_KEY.to_string(),
        REMOTE_CONFIG_LABEL_VALUE.to_string(),
    )]
    .into()
}

pub fn lease_labels() -> BTreeMap<String, String> {
    [(LEASE_LABEL_KEY.to_string(), LEASE_LABEL_VALUE.to_string())].into()
}

/// Pods backing a consensus node
pub fn consensus_node_pod_selector(node_alias: &str) -> String {
    format!("app=network-{}", node_alias)
}

/// Pods backing a HAProxy instance
pub fn haproxy_pod_selector(name: &str) -> String {
    format!("app={}", name)
}

/// Pods backing an Envoy proxy instance
pub fn envoy_proxy_pod_selector(name: &str) -> String {
    format!("app={}", name)
}

pub fn relay_pod_selector() -> String {
    "app.kubernetes.io/name=relay".to_string()
}

pub fn mirror_node_pod_selector() -> String {
    "app.kubernetes.io/name=postgres".to_string()
}

pub fn explorer_pod_selector() -> String {
    "app.kubernetes.io/component=hiero-explorer".to_string()
}

pub fn block_node_pod_selector(name: &str) -> String {
    format!("app.kubernetes.io/instance={}", name)
}

/// Consensus node aliases are `node<N>`; their numeric id is `N - 1`.
pub fn node_id_from_alias(alias: &str) -> Option<u64> {
    alias
        .strip_prefix("node")
        .and_then(|n| n.parse::<u64>().ok())
        .and_then(|n| n.checked_sub(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_ids() {
        assert_eq!(node_id_from_alias("node1"), Some(0));
        assert_eq!(node_id_from_alias("node12"), Some(11));
        assert_eq!(node_id_from_alias("node0"), None);
        assert_eq!(node_id_from_alias("relay-1"), None);
    }

    #[test]
    fn selector_matches_labels() {
        let labels = remote_config_labels();
        let (k, v) = labels.iter().next().unwrap();
        assert_eq!(remote_config_label_selector(), format!("{k}={v}"));
    }
}
