use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use k8s_openapi::api::core::v1::ConfigMap;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{
    ClusterInfo, CommonFlags, ComponentsDataWrapper, DeploymentState, RemoteConfigData,
    RemoteConfigDataWrapper, RemoteConfigError, RemoteConfigMetadata, REMOTE_CONFIG_VERSION,
    validator,
};
use crate::invocation::{CommandInvocation, flags};
use crate::k8s::K8sFactory;
use crate::keys;
use crate::settings::AppConfig;

/// Version of this tool, stamped into documents it writes.
pub const SOLO_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Parameters of a brand new deployment's remote config.
#[derive(Debug, Clone)]
pub struct CreateRemoteConfig {
    pub namespace: String,
    pub deployment: String,
    pub cluster_ref: String,
    pub context: String,
    pub state: DeploymentState,
    pub node_aliases: Vec<String>,
    pub dns_base_domain: Option<String>,
    pub dns_consensus_node_pattern: Option<String>,
}

/// Outcome of writing the document to every cluster of the deployment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplicationReport {
    /// Contexts that hold the new document.
    pub written: Vec<String>,
    /// Context -> error, for contexts that could not be written.
    pub failed: Vec<(String, String)>,
}

impl ReplicationReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

struct Loaded {
    doc: RemoteConfigDataWrapper,
    namespace: String,
    context: String,
    /// Cluster refs whose context is known from where the document was
    /// created or read, rather than from settings.
    pinned: BTreeMap<String, String>,
}

/// Loads, caches, mutates and replicates one deployment's remote config.
///
/// Callers hold the namespace lock around `modify` and `save`; the manager
/// itself only serializes access within this process.
pub struct RemoteConfigManager {
    factory: Arc<dyn K8sFactory>,
    config: Arc<AppConfig>,
    loaded: Mutex<Option<Loaded>>,
}

impl RemoteConfigManager {
    pub fn new(factory: Arc<dyn K8sFactory>, config: Arc<AppConfig>) -> Self {
        Self {
            factory,
            config,
            loaded: Mutex::new(None),
        }
    }

    pub async fn is_loaded(&self) -> bool {
        self.loaded.lock().await.is_some()
    }

    /// Drop the cached document; the next `load` reads the cluster again.
    pub async fn unload(&self) {
        self.loaded.lock().await.take();
    }

    /// The cached document.
    pub async fn get(&self) -> Result<RemoteConfigDataWrapper, RemoteConfigError> {
        self.loaded
            .lock()
            .await
            .as_ref()
            .map(|l| l.doc.clone())
            .ok_or(RemoteConfigError::NotLoaded)
    }

    /// The cached document, fetching it from `namespace` on `context` first
    /// if nothing is cached.
    ///
    /// No component health checks run here; see [`Self::load_checked`].
    pub async fn load(
        &self,
        namespace: &str,
        context: &str,
    ) -> Result<RemoteConfigDataWrapper, RemoteConfigError> {
        let mut loaded = self.loaded.lock().await;
        if let Some(existing) = loaded.as_ref() {
            return Ok(existing.doc.clone());
        }
        let cm = self.get_config_map(namespace, context).await?;
        let doc = RemoteConfigDataWrapper::from_configmap(&cm)?;
        debug!(namespace, context, clusters = doc.clusters().len(), "remote config loaded");
        let pinned = self.pin_source_cluster(&doc, namespace, context);
        *loaded = Some(Loaded {
            doc: doc.clone(),
            namespace: namespace.to_string(),
            context: context.to_string(),
            pinned,
        });
        Ok(doc)
    }

    /// `load`, then verify that every live component has pods in its cluster
    /// unless `validate` is false.
    pub async fn load_checked(
        &self,
        namespace: &str,
        context: &str,
        validate: bool,
        skip_consensus_node_validation: bool,
    ) -> Result<RemoteConfigDataWrapper, RemoteConfigError> {
        let doc = self.load(namespace, context).await?;
        if validate {
            self.validate_components(skip_consensus_node_validation).await?;
        }
        Ok(doc)
    }

    /// Health-check the cached document's components.
    pub async fn validate_components(
        &self,
        skip_consensus_node_validation: bool,
    ) -> Result<(), RemoteConfigError> {
        let (doc, contexts) = {
            let loaded = self.loaded.lock().await;
            let current = loaded.as_ref().ok_or(RemoteConfigError::NotLoaded)?;
            (current.doc.clone(), self.cluster_contexts(current))
        };
        validator::validate_components(&self.factory, &contexts, &doc, skip_consensus_node_validation)
            .await
    }

    /// Fetch the remote config ConfigMap, failing when there is none.
    pub async fn get_config_map(
        &self,
        namespace: &str,
        context: &str,
    ) -> Result<ConfigMap, RemoteConfigError> {
        let backend = self.factory.backend_for_context(context).await?;
        backend
            .get_configmap(namespace, keys::REMOTE_CONFIG_CONFIGMAP_NAME)
            .await?
            .ok_or_else(|| RemoteConfigError::ConfigMapNotFound {
                namespace: namespace.to_string(),
                context: context.to_string(),
            })
    }

    /// Every remote config ConfigMap in `namespace`, found by label.
    pub async fn find_config_maps(
        &self,
        namespace: &str,
        context: &str,
    ) -> Result<Vec<ConfigMap>, RemoteConfigError> {
        let backend = self.factory.backend_for_context(context).await?;
        Ok(backend
            .list_configmaps(namespace, &keys::remote_config_label_selector())
            .await?)
    }

    /// Write a new document for a fresh deployment and cache it.
    ///
    /// Fails with a conflict if the deployment already has a remote config.
    pub async fn create(
        &self,
        params: CreateRemoteConfig,
        invocation: &CommandInvocation,
    ) -> Result<RemoteConfigDataWrapper, RemoteConfigError> {
        let email = self.config.user.email.clone();
        let mut cluster = ClusterInfo::new(&params.cluster_ref, &params.namespace, &params.deployment);
        if let Some(domain) = params.dns_base_domain {
            cluster.dns_base_domain = domain;
        }
        if let Some(pattern) = params.dns_consensus_node_pattern {
            cluster.dns_consensus_node_pattern = pattern;
        }
        let command = invocation.command_line();
        let doc = RemoteConfigDataWrapper::new(RemoteConfigData {
            version: REMOTE_CONFIG_VERSION.to_string(),
            metadata: RemoteConfigMetadata::new(
                &params.namespace,
                &params.deployment,
                params.state,
                Utc::now(),
                email,
                SOLO_VERSION,
            ),
            clusters: BTreeMap::from([(params.cluster_ref.clone(), cluster)]),
            components: ComponentsDataWrapper::initialize_with_nodes(
                &params.node_aliases,
                &params.cluster_ref,
                &params.namespace,
            )?,
            command_history: vec![command.clone()],
            last_executed_command: command,
            flags: CommonFlags::from_invocation(invocation),
        })?;

        let backend = self.factory.backend_for_context(&params.context).await?;
        backend
            .create_configmap(&params.namespace, &doc.to_configmap(&params.namespace)?)
            .await?;
        info!(namespace = %params.namespace, context = %params.context, deployment = %params.deployment, "remote config created");

        *self.loaded.lock().await = Some(Loaded {
            doc: doc.clone(),
            namespace: params.namespace,
            pinned: BTreeMap::from([(params.cluster_ref, params.context.clone())]),
            context: params.context,
        });
        Ok(doc)
    }

    /// Apply `f` to the cached document and replicate the result.
    ///
    /// If `f` fails or the result does not validate, nothing changes locally
    /// or remotely. If no cluster accepts the result, the cached document is
    /// restored and `ReplicationFailed` returned. A partial failure keeps the
    /// change and reports the contexts that missed it.
    pub async fn modify<F>(&self, f: F) -> Result<ReplicationReport, RemoteConfigError>
    where
        F: FnOnce(&mut RemoteConfigData) -> Result<(), RemoteConfigError>,
    {
        let mut loaded = self.loaded.lock().await;
        let current = loaded.as_mut().ok_or(RemoteConfigError::NotLoaded)?;
        let previous = current.doc.clone();
        current.doc.with_mutation(f)?;
        let result = self.replicate(current).await;
        if result.is_err() {
            debug!("no cluster accepted the change, restoring cached remote config");
            current.doc = previous;
        }
        result
    }

    /// Write the cached document to every cluster of the deployment.
    pub async fn save(&self) -> Result<ReplicationReport, RemoteConfigError> {
        let loaded = self.loaded.lock().await;
        let current = loaded.as_ref().ok_or(RemoteConfigError::NotLoaded)?;
        self.replicate(current).await
    }

    /// Resolve the deployment an invocation targets, load its remote config,
    /// optionally check component health, then record the command and the
    /// invocation's flags in the document and save it.
    ///
    /// Flags the invocation omits are filled in from the document.
    pub async fn load_and_validate(
        &self,
        invocation: &mut CommandInvocation,
        validate: bool,
        skip_consensus_node_validation: bool,
    ) -> Result<RemoteConfigDataWrapper, RemoteConfigError> {
        self.config.apply_deployment_defaults(invocation);
        let namespace = invocation
            .namespace()
            .map(str::to_string)
            .ok_or(RemoteConfigError::NamespaceUnresolved)?;
        let context = self
            .config
            .context_of(invocation)
            .or_else(|| self.factory.current_context())
            .ok_or(RemoteConfigError::ContextUnresolved)?;

        self.load_checked(&namespace, &context, validate, skip_consensus_node_validation)
            .await?;

        let email = self.config.user.email.clone();
        let entry = format!(
            "Executed by {email}: {} {}",
            invocation.command_line(),
            invocation.stringify_flags()
        )
        .trim()
        .to_string();

        let report = self
            .modify(|data| {
                let changed = data.flags.handle_flags(invocation);
                if !changed.is_empty() {
                    debug!(?changed, "stored flags updated");
                }
                populate_versions(&mut data.metadata, invocation);
                if data.metadata.solo_version != SOLO_VERSION {
                    let previous = std::mem::replace(
                        &mut data.metadata.solo_version,
                        SOLO_VERSION.to_string(),
                    );
                    data.metadata.make_migration(email.as_str(), previous);
                }
                data.metadata.touch(email.as_str());
                data.push_history(entry);
                Ok(())
            })
            .await?;
        if !report.is_complete() {
            warn!(failed = ?report.failed, "remote config not written to every cluster");
        }
        self.get().await
    }

    /// Kube context of every cluster in the cached document. Pinned refs win
    /// over settings; unmapped refs are used as context names.
    fn cluster_contexts(&self, loaded: &Loaded) -> BTreeMap<String, String> {
        loaded
            .doc
            .clusters()
            .keys()
            .map(|cluster_ref| {
                let context = loaded
                    .pinned
                    .get(cluster_ref)
                    .cloned()
                    .unwrap_or_else(|| self.config.context_for(cluster_ref));
                (cluster_ref.clone(), context)
            })
            .collect()
    }

    /// A document read from `context` came from one of its clusters. When
    /// exactly one cluster in `namespace` has no context in settings, that
    /// cluster is the one read.
    fn pin_source_cluster(
        &self,
        doc: &RemoteConfigDataWrapper,
        namespace: &str,
        context: &str,
    ) -> BTreeMap<String, String> {
        let mut unmapped = doc
            .clusters()
            .values()
            .filter(|c| c.namespace == namespace && !self.config.cluster_refs.contains_key(&c.name));
        match (unmapped.next(), unmapped.next()) {
            (Some(only), None) => BTreeMap::from([(only.name.clone(), context.to_string())]),
            _ => BTreeMap::new(),
        }
    }

    async fn replicate(&self, loaded: &Loaded) -> Result<ReplicationReport, RemoteConfigError> {
        let contexts = self.cluster_contexts(loaded);
        let mut targets: Vec<(String, String)> = loaded
            .doc
            .clusters()
            .values()
            .filter_map(|c| contexts.get(&c.name).map(|ctx| (ctx.clone(), c.namespace.clone())))
            .collect();
        if targets.is_empty() {
            targets.push((loaded.context.clone(), loaded.namespace.clone()));
        }

        let mut report = ReplicationReport::default();
        for (context, namespace) in targets {
            match self.write_to(&loaded.doc, &context, &namespace).await {
                Ok(()) => {
                    debug!(context = %context, namespace = %namespace, "remote config written");
                    report.written.push(context);
                }
                Err(e) => {
                    warn!(context = %context, namespace = %namespace, error = %e, "failed to write remote config");
                    report.failed.push((context, e.to_string()));
                }
            }
        }
        if report.written.is_empty() {
            return Err(RemoteConfigError::ReplicationFailed {
                failed: report.failed,
            });
        }
        Ok(report)
    }

    async fn write_to(
        &self,
        doc: &RemoteConfigDataWrapper,
        context: &str,
        namespace: &str,
    ) -> Result<(), RemoteConfigError> {
        let backend = self.factory.backend_for_context(context).await?;
        let mut cm = doc.to_configmap(namespace)?;
        match backend
            .get_configmap(namespace, keys::REMOTE_CONFIG_CONFIGMAP_NAME)
            .await?
        {
            Some(existing) => {
                cm.metadata.resource_version = existing.metadata.resource_version;
                backend
                    .replace_configmap(namespace, keys::REMOTE_CONFIG_CONFIGMAP_NAME, &cm)
                    .await?;
            }
            None => {
                backend.create_configmap(namespace, &cm).await?;
            }
        }
        Ok(())
    }
}

/// Copy chart and platform versions the invocation names into the metadata.
fn populate_versions(metadata: &mut RemoteConfigMetadata, invocation: &CommandInvocation) {
    let pairs = [
        (flags::RELEASE_TAG, &mut metadata.hedera_platform_version),
        (flags::SOLO_CHART_VERSION, &mut metadata.solo_chart_version),
        (flags::MIRROR_NODE_VERSION, &mut metadata.hedera_mirror_node_chart_version),
        (flags::EXPLORER_VERSION, &mut metadata.hedera_explorer_chart_version),
        (flags::RELAY_RELEASE_TAG, &mut metadata.hedera_json_rpc_relay_chart_version),
    ];
    for (flag, slot) in pairs {
        if let Some(value) = invocation.flag(flag) {
            *slot = Some(value.to_string());
        }
    }
}
