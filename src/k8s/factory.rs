use async_trait::async_trait;
use kube::config::{KubeConfigOptions, Kubeconfig};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use super::{K8sBackend, K8sError, K8sFactory, KubeBackend};

/// Builds one kube-rs client per kubeconfig context, on first use.
pub struct KubeFactory {
    default: Arc<KubeBackend>,
    current_context: Option<String>,
    by_context: Mutex<HashMap<String, Arc<KubeBackend>>>,
}

impl KubeFactory {
    /// Connect using the default in-cluster or kubeconfig configuration.
    pub async fn try_default() -> Result<Self, K8sError> {
        let default = Arc::new(KubeBackend::try_default().await?);
        // In-cluster configuration has no kubeconfig; that only loses the context name.
        let current_context = Kubeconfig::read()
            .ok()
            .and_then(|kc| kc.current_context);
        let mut by_context = HashMap::new();
        if let Some(ctx) = &current_context {
            by_context.insert(ctx.clone(), default.clone());
        }
        Ok(Self {
            default,
            current_context,
            by_context: Mutex::new(by_context),
        })
    }
}

#[async_trait]
impl K8sFactory for KubeFactory {
    fn default_backend(&self) -> Arc<dyn K8sBackend> {
        self.default.clone()
    }

    async fn backend_for_context(&self, context: &str) -> Result<Arc<dyn K8sBackend>, K8sError> {
        let mut cache = self.by_context.lock().await;
        if let Some(existing) = cache.get(context) {
            return Ok(existing.clone());
        }
        debug!(context, "connecting to kube context");
        let options = KubeConfigOptions {
            context: Some(context.to_string()),
            ..Default::default()
        };
        let config = kube::Config::from_kubeconfig(&options)
            .await
            .map_err(|e| match e {
                kube::config::KubeconfigError::LoadContext(_) => {
                    K8sError::UnknownContext(context.to_string())
                }
                other => K8sError::ConnectionFailed(other.to_string()),
            })?;
        let client = kube::Client::try_from(config)
            .map_err(|e| K8sError::ConnectionFailed(e.to_string()))?;
        let backend = Arc::new(KubeBackend::new(client));
        cache.insert(context.to_string(), backend.clone());
        Ok(backend)
    }

    fn current_context(&self) -> Option<String> {
        self.current_context.clone()
    }
}
