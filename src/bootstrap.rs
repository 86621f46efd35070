use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::k8s::{K8sFactory, KubeFactory};
use crate::lock::{LockManager, LockRenewalService};
use crate::remote_config::RemoteConfigManager;
use crate::settings::AppConfig;

/// Everything a command needs, wired once per process.
#[derive(Clone)]
pub struct Services {
    pub config: Arc<AppConfig>,
    pub factory: Arc<dyn K8sFactory>,
    pub renewal: Arc<LockRenewalService>,
    pub lock_manager: Arc<LockManager>,
    pub remote_config: Arc<RemoteConfigManager>,
}

impl Services {
    pub fn new(config: AppConfig, factory: Arc<dyn K8sFactory>) -> Self {
        let config = Arc::new(config);
        let renewal = Arc::new(LockRenewalService::new());
        let lock_manager = Arc::new(LockManager::new(
            factory.clone(),
            renewal.clone(),
            config.clone(),
        ));
        let remote_config = Arc::new(RemoteConfigManager::new(factory.clone(), config.clone()));
        Self {
            config,
            factory,
            renewal,
            lock_manager,
            remote_config,
        }
    }

    /// Load settings, install logging and connect to the current kube context.
    pub async fn from_config(path: Option<&Path>) -> anyhow::Result<Self> {
        let config = AppConfig::load(path)?;
        crate::trace::init(config.logging.format)?;
        let factory = KubeFactory::try_default().await?;
        debug!(context = ?factory.current_context(), "connected to kubernetes");
        Ok(Self::new(config, Arc::new(factory)))
    }

    /// Stop every renewal schedule still running.
    pub async fn shutdown(&self) {
        let cancelled = self.renewal.cancel_all().await;
        if !cancelled.is_empty() {
            debug!(count = cancelled.len(), "cancelled renewal schedules at shutdown");
        }
    }
}
