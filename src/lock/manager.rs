use std::sync::Arc;
use tracing::{debug, info};

use super::{IntervalLock, LockError, LockHolder, LockRenewalService};
use crate::invocation::CommandInvocation;
use crate::k8s::K8sFactory;
use crate::settings::AppConfig;

/// Produces namespace locks bound to the current process.
pub struct LockManager {
    factory: Arc<dyn K8sFactory>,
    renewal: Arc<LockRenewalService>,
    config: Arc<AppConfig>,
}

impl LockManager {
    pub fn new(
        factory: Arc<dyn K8sFactory>,
        renewal: Arc<LockRenewalService>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            factory,
            renewal,
            config,
        }
    }

    pub fn renewal_service(&self) -> &Arc<LockRenewalService> {
        &self.renewal
    }

    /// Create the lock for the namespace `invocation` targets.
    ///
    /// The deployment namespace wins over the cluster-setup namespace. With
    /// neither set the lock has no namespace and all its operations are
    /// no-ops. A namespace that does not exist yet is created, because the
    /// lease has to live somewhere.
    pub async fn create(&self, invocation: &CommandInvocation) -> Result<IntervalLock, LockError> {
        let namespace = current_namespace(invocation)?;
        self.create_for(namespace, LockHolder::current()).await
    }

    /// Create a lock for an explicit namespace and holder.
    pub async fn create_for(
        &self,
        namespace: Option<String>,
        holder: LockHolder,
    ) -> Result<IntervalLock, LockError> {
        let backend = self.factory.default_backend();

        if let Some(ns) = &namespace {
            let namespace_error = |source| LockError::Acquisition {
                message: format!("failed to create namespace '{ns}'"),
                namespace: ns.clone(),
                lease_name: crate::keys::lease_name(ns),
                self_holder: holder.to_json(),
                other_holder: None,
                source,
            };
            let exists = backend
                .namespace_exists(ns)
                .await
                .map_err(|e| namespace_error(Some(e)))?;
            if !exists {
                info!(namespace = %ns, "creating namespace for lock");
                backend
                    .create_namespace(ns)
                    .await
                    .map_err(|e| namespace_error(Some(e)))?;
                let confirmed = backend
                    .namespace_exists(ns)
                    .await
                    .map_err(|e| namespace_error(Some(e)))?;
                if !confirmed {
                    return Err(namespace_error(None));
                }
            }
        } else {
            debug!("no namespace configured, lock will not coordinate");
        }

        Ok(IntervalLock::new(
            backend,
            self.renewal.clone(),
            holder,
            namespace,
            None,
            Some(self.config.lease.duration_secs),
        ))
    }
}

/// Deployment namespace, falling back to the cluster-setup namespace.
pub fn current_namespace(invocation: &CommandInvocation) -> Result<Option<String>, LockError> {
    let Some(namespace) = invocation
        .namespace()
        .or_else(|| invocation.cluster_setup_namespace())
    else {
        return Ok(None);
    };
    if !is_valid_namespace(namespace) {
        return Err(LockError::InvalidNamespace(namespace.to_string()));
    }
    Ok(Some(namespace.to_string()))
}

/// RFC 1123 label: lowercase alphanumerics and '-', at most 63 characters,
/// starting and ending with an alphanumeric.
pub fn is_valid_namespace(name: &str) -> bool {
    let bytes = name.as_bytes();
    let alnum = |b: &u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    !bytes.is_empty()
        && bytes.len() <= 63
        && bytes.first().is_some_and(alnum)
        && bytes.last().is_some_and(alnum)
        && bytes.iter().all(|b| alnum(b) || *b == b'-')
}
