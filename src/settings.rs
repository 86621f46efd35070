use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::invocation::{CommandInvocation, flags};

/// Overrides `lease.duration_secs` process-wide.
pub const LEASE_DURATION_ENV: &str = "SOLO_LEASE_DURATION";
/// Overrides `lease.acquire_attempts` process-wide.
pub const LEASE_ACQUIRE_ATTEMPTS_ENV: &str = "SOLO_LEASE_ACQUIRE_ATTEMPTS";

pub const DEFAULT_LEASE_DURATION_SECS: i32 = 20;
pub const DEFAULT_LEASE_ACQUIRE_ATTEMPTS: u32 = 10;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub user: UserConfig,
    #[serde(default)]
    pub lease: LeaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Cluster reference -> kube context name
    #[serde(default)]
    pub cluster_refs: BTreeMap<String, String>,
    #[serde(default)]
    pub deployments: BTreeMap<String, DeploymentConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct UserConfig {
    #[serde(default = "default_email")]
    pub email: String,
}

impl Default for UserConfig {
    fn default() -> Self {
        Self {
            email: default_email(),
        }
    }
}

fn default_email() -> String {
    "john@doe.com".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LeaseConfig {
    #[serde(default = "default_lease_duration")]
    pub duration_secs: i32,
    #[serde(default = "default_acquire_attempts")]
    pub acquire_attempts: u32,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            duration_secs: default_lease_duration(),
            acquire_attempts: default_acquire_attempts(),
        }
    }
}

fn default_lease_duration() -> i32 {
    DEFAULT_LEASE_DURATION_SECS
}

fn default_acquire_attempts() -> u32 {
    DEFAULT_LEASE_ACQUIRE_ATTEMPTS
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DeploymentConfig {
    pub namespace: String,
    #[serde(default)]
    pub clusters: Vec<String>,
}

impl AppConfig {
    /// Load from an optional TOML file, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut cfg = match path {
            Some(p) => {
                let data = fs::read_to_string(p)?;
                toml::from_str::<Self>(&data)?
            }
            None => Self::default(),
        };
        cfg.apply_env_overrides(|key| std::env::var(key).ok())?;
        Ok(cfg)
    }

    /// Apply `SOLO_LEASE_*` overrides read through `lookup`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(LEASE_DURATION_ENV) {
            let secs: i32 = raw
                .trim()
                .parse()
                .map_err(|e| anyhow::anyhow!("invalid {LEASE_DURATION_ENV}={raw:?}: {e}"))?;
            anyhow::ensure!(secs > 0, "{LEASE_DURATION_ENV} must be positive, got {secs}");
            self.lease.duration_secs = secs;
        }
        if let Some(raw) = lookup(LEASE_ACQUIRE_ATTEMPTS_ENV) {
            let attempts: u32 = raw
                .trim()
                .parse()
                .map_err(|e| anyhow::anyhow!("invalid {LEASE_ACQUIRE_ATTEMPTS_ENV}={raw:?}: {e}"))?;
            anyhow::ensure!(attempts > 0, "{LEASE_ACQUIRE_ATTEMPTS_ENV} must be at least 1");
            self.lease.acquire_attempts = attempts;
        }
        Ok(())
    }

    /// Kube context for a cluster reference. Unmapped refs are used as context names.
    pub fn context_for(&self, cluster_ref: &str) -> String {
        self.cluster_refs
            .get(cluster_ref)
            .cloned()
            .unwrap_or_else(|| cluster_ref.to_string())
    }

    pub fn deployment(&self, name: &str) -> Option<&DeploymentConfig> {
        self.deployments.get(name)
    }

    /// Fill `namespace` and `cluster-ref` from the invocation's configured
    /// deployment, without overriding flags the user gave.
    pub fn apply_deployment_defaults(&self, invocation: &mut CommandInvocation) {
        let Some(deployment) = invocation.deployment().and_then(|d| self.deployment(d)) else {
            return;
        };
        let deployment = deployment.clone();
        if invocation.namespace().is_none() {
            invocation.set_flag(flags::NAMESPACE, deployment.namespace);
        }
        if invocation.context().is_none() && invocation.cluster_ref().is_none() {
            if let Some(first) = deployment.clusters.first() {
                invocation.set_flag(flags::CLUSTER_REF, first.as_str());
            }
        }
    }

    /// Kube context an invocation targets: `--context`, else the context of
    /// `--cluster-ref`, else none.
    pub fn context_of(&self, invocation: &CommandInvocation) -> Option<String> {
        invocation
            .context()
            .map(str::to_string)
            .or_else(|| invocation.cluster_ref().map(|r| self.context_for(r)))
    }
}
