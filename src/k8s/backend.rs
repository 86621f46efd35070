//! Abstraction over Kubernetes API operations for testability.
//!
//! `IntervalLock` and `RemoteConfigManager` only ever talk to a cluster through
//! [`K8sBackend`], so tests can substitute an in-memory API server.

use async_trait::async_trait;
use k8s_openapi::api::coordination::v1::Lease;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Pod};
use kube::api::{Api, DeleteParams, ListParams, ObjectMeta, PostParams};

use super::K8sError;

/// Trait abstracting Kubernetes API operations.
///
/// This allows the lock and remote config code to work with either:
/// - `KubeBackend`: Real Kubernetes API via kube-rs
/// - Test implementations: Simulated K8s API for deterministic testing
#[async_trait]
pub trait K8sBackend: Send + Sync + 'static {
    // ========================================================================
    // Lease operations
    // ========================================================================

    /// Get a lease by namespace and name.
    /// Returns None if the lease doesn't exist.
    async fn get_lease(&self, namespace: &str, name: &str) -> Result<Option<Lease>, K8sError>;

    /// Create a new lease.
    /// Returns `K8sError::Conflict` if the lease already exists.
    async fn create_lease(&self, namespace: &str, lease: &Lease) -> Result<Lease, K8sError>;

    /// Replace an existing lease using CAS semantics.
    /// The lease's resourceVersion must match the current version.
    async fn replace_lease(
        &self,
        namespace: &str,
        name: &str,
        lease: &Lease,
    ) -> Result<Lease, K8sError>;

    /// Delete a lease by name.
    /// Not finding the lease is not an error (idempotent).
    async fn delete_lease(&self, namespace: &str, name: &str) -> Result<(), K8sError>;

    // ========================================================================
    // ConfigMap operations
    // ========================================================================

    /// Get a ConfigMap by namespace and name.
    /// Returns None if the ConfigMap doesn't exist.
    async fn get_configmap(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ConfigMap>, K8sError>;

    /// Create a new ConfigMap.
    /// Returns `K8sError::Conflict` if the ConfigMap already exists.
    async fn create_configmap(
        &self,
        namespace: &str,
        configmap: &ConfigMap,
    ) -> Result<ConfigMap, K8sError>;

    /// Replace an existing ConfigMap.
    /// A resourceVersion on `configmap` makes the write conditional.
    async fn replace_configmap(
        &self,
        namespace: &str,
        name: &str,
        configmap: &ConfigMap,
    ) -> Result<ConfigMap, K8sError>;

    /// List ConfigMaps matching the given label selector.
    async fn list_configmaps(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<ConfigMap>, K8sError>;

    // ========================================================================
    // Namespaces and pods
    // ========================================================================

    async fn namespace_exists(&self, name: &str) -> Result<bool, K8sError>;

    async fn create_namespace(&self, name: &str) -> Result<(), K8sError>;

    /// Names of the pods matching `label_selector` in `namespace`.
    async fn list_pods(&self, namespace: &str, label_selector: &str)
    -> Result<Vec<String>, K8sError>;
}

// ============================================================================
// Real Kubernetes backend using kube-rs
// ============================================================================

/// Real Kubernetes backend using kube-rs client.
#[derive(Clone)]
pub struct KubeBackend {
    client: kube::Client,
}

impl KubeBackend {
    /// Create a new KubeBackend from a kube::Client.
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }

    /// Create a new KubeBackend using the default in-cluster or kubeconfig configuration.
    pub async fn try_default() -> Result<Self, K8sError> {
        let client = kube::Client::try_default()
            .await
            .map_err(|e| K8sError::ConnectionFailed(e.to_string()))?;
        Ok(Self::new(client))
    }

    fn leases(&self, namespace: &str) -> Api<Lease> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn configmaps(&self, namespace: &str) -> Api<ConfigMap> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl K8sBackend for KubeBackend {
    async fn get_lease(&self, namespace: &str, name: &str) -> Result<Option<Lease>, K8sError> {
        match self.leases(namespace).get(name).await {
            Ok(lease) => Ok(Some(lease)),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn create_lease(&self, namespace: &str, lease: &Lease) -> Result<Lease, K8sError> {
        Ok(self
            .leases(namespace)
            .create(&PostParams::default(), lease)
            .await?)
    }

    async fn replace_lease(
        &self,
        namespace: &str,
        name: &str,
        lease: &Lease,
    ) -> Result<Lease, K8sError> {
        match self
            .leases(namespace)
            .replace(name, &PostParams::default(), lease)
            .await
        {
            Ok(l) => Ok(l),
            Err(kube::Error::Api(e)) if e.code == 409 => Err(K8sError::Conflict(
                "CAS conflict: resourceVersion mismatch".into(),
            )),
            Err(kube::Error::Api(e)) if e.code == 404 => Err(K8sError::NotFound {
                kind: "Lease",
                namespace: namespace.to_string(),
                name: name.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_lease(&self, namespace: &str, name: &str) -> Result<(), K8sError> {
        match self
            .leases(namespace)
            .delete(name, &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(()), // Already deleted
            Err(e) => Err(e.into()),
        }
    }

    async fn get_configmap(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ConfigMap>, K8sError> {
        match self.configmaps(namespace).get(name).await {
            Ok(cm) => Ok(Some(cm)),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn create_configmap(
        &self,
        namespace: &str,
        configmap: &ConfigMap,
    ) -> Result<ConfigMap, K8sError> {
        match self
            .configmaps(namespace)
            .create(&PostParams::default(), configmap)
            .await
        {
            Ok(cm) => Ok(cm),
            Err(kube::Error::Api(e)) if e.code == 409 => Err(K8sError::Conflict(
                "ConfigMap already exists (conflict)".into(),
            )),
            Err(e) => Err(e.into()),
        }
    }

    async fn replace_configmap(
        &self,
        namespace: &str,
        name: &str,
        configmap: &ConfigMap,
    ) -> Result<ConfigMap, K8sError> {
        match self
            .configmaps(namespace)
            .replace(name, &PostParams::default(), configmap)
            .await
        {
            Ok(cm) => Ok(cm),
            Err(kube::Error::Api(e)) if e.code == 404 => Err(K8sError::NotFound {
                kind: "ConfigMap",
                namespace: namespace.to_string(),
                name: name.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_configmaps(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<ConfigMap>, K8sError> {
        let lp = ListParams::default().labels(label_selector);
        let list = self.configmaps(namespace).list(&lp).await?;
        Ok(list.items)
    }

    async fn namespace_exists(&self, name: &str) -> Result<bool, K8sError> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        Ok(namespaces.get_opt(name).await?.is_some())
    }

    async fn create_namespace(&self, name: &str) -> Result<(), K8sError> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        let ns = Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        match namespaces.create(&PostParams::default(), &ns).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 409 => Ok(()), // Created concurrently
            Err(e) => Err(e.into()),
        }
    }

    async fn list_pods(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<String>, K8sError> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let lp = ListParams::default().labels(label_selector);
        let list = pods.list(&lp).await?;
        Ok(list
            .items
            .into_iter()
            .filter_map(|p| p.metadata.name)
            .collect())
    }
}
