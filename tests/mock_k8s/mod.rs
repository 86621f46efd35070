//! In-memory Kubernetes API for tests.
//!
//! `MockK8sState` stores Leases, ConfigMaps, Namespaces and Pods with:
//! - Resource versioning and CAS on replace
//! - 409 on duplicate create, `None` for missing objects
//! - Label-selector filtering
//! - Per-operation failure injection and call counting
//!
//! `MockK8sBackend` implements `K8sBackend` over a shared state, and
//! `MockK8sFactory` maps kube context names to independent states so
//! multi-cluster replication can be exercised.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::MicroTime;
use kube::api::ObjectMeta;
use solo::k8s::{K8sBackend, K8sError, K8sFactory};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::Mutex;
use tracing::trace;

/// API operations that can be counted and made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    GetLease,
    CreateLease,
    ReplaceLease,
    DeleteLease,
    GetConfigMap,
    CreateConfigMap,
    ReplaceConfigMap,
    ListConfigMaps,
    NamespaceExists,
    CreateNamespace,
    ListPods,
}

#[derive(Debug)]
struct InjectedFailure {
    remaining: usize,
    error: K8sError,
}

#[derive(Debug, Clone)]
struct StoredPod {
    name: String,
    labels: BTreeMap<String, String>,
}

/// In-memory state for the mock K8s API, simulating one cluster's API server.
#[derive(Debug)]
pub struct MockK8sState {
    /// Leases stored by namespace -> name -> lease
    leases: Mutex<HashMap<String, HashMap<String, Lease>>>,
    /// ConfigMaps stored by namespace -> name -> configmap
    configmaps: Mutex<HashMap<String, HashMap<String, ConfigMap>>>,
    namespaces: Mutex<HashSet<String>>,
    pods: Mutex<HashMap<String, Vec<StoredPod>>>,
    /// Monotonically increasing resource version counter
    resource_version: AtomicU64,
    failures: Mutex<HashMap<Op, InjectedFailure>>,
    calls: Mutex<HashMap<Op, usize>>,
    /// When set, the next lease replace sees a concurrent write first.
    race_next_lease_replace: AtomicBool,
    /// When set, namespace creation reports success without creating anything.
    drop_namespace_creation: AtomicBool,
}

impl MockK8sState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            leases: Mutex::new(HashMap::new()),
            configmaps: Mutex::new(HashMap::new()),
            namespaces: Mutex::new(HashSet::new()),
            pods: Mutex::new(HashMap::new()),
            resource_version: AtomicU64::new(1),
            failures: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
            race_next_lease_replace: AtomicBool::new(false),
            drop_namespace_creation: AtomicBool::new(false),
        })
    }

    fn next_resource_version(&self) -> String {
        self.resource_version
            .fetch_add(1, Ordering::SeqCst)
            .to_string()
    }

    /// Make the next `times` calls of `op` fail with `error`.
    pub async fn fail_next(&self, op: Op, times: usize, error: K8sError) {
        self.failures.lock().await.insert(
            op,
            InjectedFailure {
                remaining: times,
                error,
            },
        );
    }

    /// Make every call of `op` fail with `error` until cleared.
    pub async fn fail_always(&self, op: Op, error: K8sError) {
        self.fail_next(op, usize::MAX, error).await;
    }

    pub async fn clear_failures(&self) {
        self.failures.lock().await.clear();
    }

    /// Number of times `op` was called, failed calls included.
    pub async fn calls(&self, op: Op) -> usize {
        self.calls.lock().await.get(&op).copied().unwrap_or(0)
    }

    /// Bump the stored lease's resourceVersion right before the next replace,
    /// as if another process had written it after our read.
    pub fn race_next_lease_replace(&self) {
        self.race_next_lease_replace.store(true, Ordering::SeqCst);
    }

    pub fn drop_namespace_creation(&self, drop: bool) {
        self.drop_namespace_creation.store(drop, Ordering::SeqCst);
    }

    /// Count the call and fail it if a failure is injected.
    async fn enter(&self, op: Op) -> Result<(), K8sError> {
        *self.calls.lock().await.entry(op).or_default() += 1;
        let mut failures = self.failures.lock().await;
        if let Some(failure) = failures.get_mut(&op) {
            if failure.remaining > 0 {
                failure.remaining = failure.remaining.saturating_sub(1);
                let error = failure.error.clone();
                if failure.remaining == 0 {
                    failures.remove(&op);
                }
                return Err(error);
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Direct state manipulation for test setup
    // ------------------------------------------------------------------

    /// Store a lease as-is (bypassing CAS), assigning a fresh resourceVersion.
    pub async fn put_lease(&self, namespace: &str, mut lease: Lease) {
        let name = lease.metadata.name.clone().unwrap_or_default();
        lease.metadata.namespace = Some(namespace.to_string());
        lease.metadata.resource_version = Some(self.next_resource_version());
        self.leases
            .lock()
            .await
            .entry(namespace.to_string())
            .or_default()
            .insert(name, lease);
    }

    pub async fn lease(&self, namespace: &str, name: &str) -> Option<Lease> {
        self.leases
            .lock()
            .await
            .get(namespace)
            .and_then(|ns| ns.get(name))
            .cloned()
    }

    /// Delete a lease behind the locks' back.
    pub async fn remove_lease(&self, namespace: &str, name: &str) {
        if let Some(ns) = self.leases.lock().await.get_mut(namespace) {
            ns.remove(name);
        }
    }

    pub async fn configmap(&self, namespace: &str, name: &str) -> Option<ConfigMap> {
        self.configmaps
            .lock()
            .await
            .get(namespace)
            .and_then(|ns| ns.get(name))
            .cloned()
    }

    pub async fn put_configmap(&self, namespace: &str, mut cm: ConfigMap) {
        let name = cm.metadata.name.clone().unwrap_or_default();
        cm.metadata.namespace = Some(namespace.to_string());
        cm.metadata.resource_version = Some(self.next_resource_version());
        self.configmaps
            .lock()
            .await
            .entry(namespace.to_string())
            .or_default()
            .insert(name, cm);
    }

    pub async fn add_namespace(&self, name: &str) {
        self.namespaces.lock().await.insert(name.to_string());
    }

    pub async fn has_namespace(&self, name: &str) -> bool {
        self.namespaces.lock().await.contains(name)
    }

    pub async fn add_pod(&self, namespace: &str, name: &str, labels: &[(&str, &str)]) {
        self.pods
            .lock()
            .await
            .entry(namespace.to_string())
            .or_default()
            .push(StoredPod {
                name: name.to_string(),
                labels: labels
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            });
    }
}

/// Parse simple label selector (e.g., "key=value,key2=value2")
fn match_labels(labels: Option<&BTreeMap<String, String>>, selector: &str) -> bool {
    selector
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .all(|part| match part.split_once('=') {
            Some((key, value)) => labels.and_then(|l| l.get(key)).map(String::as_str) == Some(value),
            None => labels.is_some_and(|l| l.contains_key(part)),
        })
}

fn conflict(kind: &str, name: &str) -> K8sError {
    K8sError::Conflict(format!("{kind} {name} already exists (conflict)"))
}

fn not_found(kind: &'static str, namespace: &str, name: &str) -> K8sError {
    K8sError::NotFound {
        kind,
        namespace: namespace.to_string(),
        name: name.to_string(),
    }
}

/// Wrapper around Arc<MockK8sState> that implements K8sBackend trait.
#[derive(Clone)]
pub struct MockK8sBackend {
    pub state: Arc<MockK8sState>,
}

impl MockK8sBackend {
    pub fn new(state: Arc<MockK8sState>) -> Arc<Self> {
        Arc::new(Self { state })
    }
}

#[async_trait]
impl K8sBackend for MockK8sBackend {
    async fn get_lease(&self, namespace: &str, name: &str) -> Result<Option<Lease>, K8sError> {
        self.state.enter(Op::GetLease).await?;
        Ok(self.state.lease(namespace, name).await)
    }

    async fn create_lease(&self, namespace: &str, lease: &Lease) -> Result<Lease, K8sError> {
        self.state.enter(Op::CreateLease).await?;
        let name = lease
            .metadata
            .name
            .clone()
            .ok_or_else(|| K8sError::Api {
                code: 422,
                message: "name is required".into(),
            })?;
        let mut leases = self.state.leases.lock().await;
        let ns_leases = leases.entry(namespace.to_string()).or_default();
        if ns_leases.contains_key(&name) {
            return Err(conflict("lease", &name));
        }
        let mut stored = lease.clone();
        stored.metadata.namespace = Some(namespace.to_string());
        stored.metadata.resource_version = Some(self.state.next_resource_version());
        ns_leases.insert(name.clone(), stored.clone());
        trace!(namespace, name = %name, "mock: created lease");
        Ok(stored)
    }

    async fn replace_lease(
        &self,
        namespace: &str,
        name: &str,
        lease: &Lease,
    ) -> Result<Lease, K8sError> {
        self.state.enter(Op::ReplaceLease).await?;
        let mut leases = self.state.leases.lock().await;
        let existing = leases
            .get_mut(namespace)
            .and_then(|ns| ns.get_mut(name))
            .ok_or_else(|| not_found("Lease", namespace, name))?;

        if self.state.race_next_lease_replace.swap(false, Ordering::SeqCst) {
            existing.metadata.resource_version = Some(self.state.next_resource_version());
        }

        // Check resourceVersion for CAS
        if let Some(provided) = &lease.metadata.resource_version {
            if Some(provided) != existing.metadata.resource_version.as_ref() {
                return Err(K8sError::Conflict(format!(
                    "CAS conflict: resourceVersion mismatch (provided {} != current {:?})",
                    provided, existing.metadata.resource_version
                )));
            }
        }

        let mut stored = lease.clone();
        stored.metadata.namespace = Some(namespace.to_string());
        stored.metadata.resource_version = Some(self.state.next_resource_version());
        *existing = stored.clone();
        trace!(namespace, name, "mock: replaced lease");
        Ok(stored)
    }

    async fn delete_lease(&self, namespace: &str, name: &str) -> Result<(), K8sError> {
        self.state.enter(Op::DeleteLease).await?;
        if let Some(ns) = self.state.leases.lock().await.get_mut(namespace) {
            ns.remove(name);
        }
        Ok(())
    }

    async fn get_configmap(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ConfigMap>, K8sError> {
        self.state.enter(Op::GetConfigMap).await?;
        Ok(self.state.configmap(namespace, name).await)
    }

    async fn create_configmap(
        &self,
        namespace: &str,
        configmap: &ConfigMap,
    ) -> Result<ConfigMap, K8sError> {
        self.state.enter(Op::CreateConfigMap).await?;
        let name = configmap.metadata.name.clone().unwrap_or_default();
        let mut configmaps = self.state.configmaps.lock().await;
        let ns_cms = configmaps.entry(namespace.to_string()).or_default();
        if ns_cms.contains_key(&name) {
            return Err(conflict("configmap", &name));
        }
        let mut stored = configmap.clone();
        stored.metadata.namespace = Some(namespace.to_string());
        stored.metadata.resource_version = Some(self.state.next_resource_version());
        ns_cms.insert(name, stored.clone());
        Ok(stored)
    }

    async fn replace_configmap(
        &self,
        namespace: &str,
        name: &str,
        configmap: &ConfigMap,
    ) -> Result<ConfigMap, K8sError> {
        self.state.enter(Op::ReplaceConfigMap).await?;
        let mut configmaps = self.state.configmaps.lock().await;
        let existing = configmaps
            .get_mut(namespace)
            .and_then(|ns| ns.get_mut(name))
            .ok_or_else(|| not_found("ConfigMap", namespace, name))?;
        if let Some(provided) = &configmap.metadata.resource_version {
            if Some(provided) != existing.metadata.resource_version.as_ref() {
                return Err(K8sError::Conflict("CAS conflict: resourceVersion mismatch".into()));
            }
        }
        let mut stored = configmap.clone();
        stored.metadata.namespace = Some(namespace.to_string());
        stored.metadata.resource_version = Some(self.state.next_resource_version());
        *existing = stored.clone();
        Ok(stored)
    }

    async fn list_configmaps(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<ConfigMap>, K8sError> {
        self.state.enter(Op::ListConfigMaps).await?;
        let configmaps = self.state.configmaps.lock().await;
        let mut found: Vec<ConfigMap> = configmaps
            .get(namespace)
            .map(|ns| {
                ns.values()
                    .filter(|cm| match_labels(cm.metadata.labels.as_ref(), label_selector))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        found.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
        Ok(found)
    }

    async fn namespace_exists(&self, name: &str) -> Result<bool, K8sError> {
        self.state.enter(Op::NamespaceExists).await?;
        Ok(self.state.has_namespace(name).await)
    }

    async fn create_namespace(&self, name: &str) -> Result<(), K8sError> {
        self.state.enter(Op::CreateNamespace).await?;
        if !self.state.drop_namespace_creation.load(Ordering::SeqCst) {
            self.state.add_namespace(name).await;
        }
        Ok(())
    }

    async fn list_pods(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<String>, K8sError> {
        self.state.enter(Op::ListPods).await?;
        let pods = self.state.pods.lock().await;
        Ok(pods
            .get(namespace)
            .map(|ns| {
                ns.iter()
                    .filter(|p| match_labels(Some(&p.labels), label_selector))
                    .map(|p| p.name.clone())
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// Kube contexts backed by independent mock clusters.
pub struct MockK8sFactory {
    default_context: String,
    contexts: std::sync::Mutex<HashMap<String, Arc<MockK8sState>>>,
}

impl MockK8sFactory {
    /// A factory with one context, `default_context`, which is current.
    pub fn new(default_context: &str) -> Arc<Self> {
        let contexts = HashMap::from([(default_context.to_string(), MockK8sState::new())]);
        Arc::new(Self {
            default_context: default_context.to_string(),
            contexts: std::sync::Mutex::new(contexts),
        })
    }

    /// Add (or return) the cluster behind `context`.
    pub fn add_context(&self, context: &str) -> Arc<MockK8sState> {
        self.contexts
            .lock()
            .unwrap()
            .entry(context.to_string())
            .or_insert_with(MockK8sState::new)
            .clone()
    }

    pub fn state(&self, context: &str) -> Arc<MockK8sState> {
        self.contexts
            .lock()
            .unwrap()
            .get(context)
            .cloned()
            .unwrap_or_else(|| panic!("no mock context {context}"))
    }

    pub fn default_state(&self) -> Arc<MockK8sState> {
        self.state(&self.default_context)
    }
}

#[async_trait]
impl K8sFactory for MockK8sFactory {
    fn default_backend(&self) -> Arc<dyn K8sBackend> {
        MockK8sBackend::new(self.default_state())
    }

    async fn backend_for_context(&self, context: &str) -> Result<Arc<dyn K8sBackend>, K8sError> {
        let state = self
            .contexts
            .lock()
            .unwrap()
            .get(context)
            .cloned()
            .ok_or_else(|| K8sError::UnknownContext(context.to_string()))?;
        Ok(MockK8sBackend::new(state))
    }

    fn current_context(&self) -> Option<String> {
        Some(self.default_context.clone())
    }
}

/// A lease held by `holder_json`, last renewed `renewed_secs_ago` seconds ago.
pub fn lease_renewed_ago(
    name: &str,
    holder_json: Option<&str>,
    duration_secs: i32,
    renewed_secs_ago: i64,
) -> Lease {
    let at = Utc::now() - ChronoDuration::seconds(renewed_secs_ago);
    Lease {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        spec: Some(LeaseSpec {
            holder_identity: holder_json.map(str::to_string),
            lease_duration_seconds: Some(duration_secs),
            acquire_time: Some(MicroTime(at)),
            renew_time: Some(MicroTime(at)),
            lease_transitions: Some(0),
            ..Default::default()
        }),
    }
}

pub fn transient_error() -> K8sError {
    K8sError::Api {
        code: 503,
        message: "simulated server error".into(),
    }
}
