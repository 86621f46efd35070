use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::RemoteConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum DeploymentState {
    #[default]
    PreGenesis,
    Genesis,
}

/// Record of the document having been rewritten by a newer tool version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Migration {
    pub migrated_at: DateTime<Utc>,
    pub migrated_by: String,
    pub from_version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteConfigMetadata {
    pub namespace: String,
    pub deployment_name: String,
    pub state: DeploymentState,
    pub last_updated_at: DateTime<Utc>,
    pub last_updated_by: String,
    pub solo_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub solo_chart_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hedera_platform_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hedera_mirror_node_chart_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hedera_explorer_chart_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hedera_json_rpc_relay_chart_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub migration: Option<Migration>,
}

impl RemoteConfigMetadata {
    pub fn new(
        namespace: impl Into<String>,
        deployment_name: impl Into<String>,
        state: DeploymentState,
        last_updated_at: DateTime<Utc>,
        last_updated_by: impl Into<String>,
        solo_version: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            deployment_name: deployment_name.into(),
            state,
            last_updated_at,
            last_updated_by: last_updated_by.into(),
            solo_version: solo_version.into(),
            solo_chart_version: None,
            hedera_platform_version: None,
            hedera_mirror_node_chart_version: None,
            hedera_explorer_chart_version: None,
            hedera_json_rpc_relay_chart_version: None,
            migration: None,
        }
    }

    pub fn make_migration(&mut self, email: impl Into<String>, from_version: impl Into<String>) {
        self.migration = Some(Migration {
            migrated_at: Utc::now(),
            migrated_by: email.into(),
            from_version: from_version.into(),
        });
    }

    /// Record who touched the document last.
    pub fn touch(&mut self, email: impl Into<String>) {
        self.last_updated_at = Utc::now();
        self.last_updated_by = email.into();
    }

    pub fn validate(&self) -> Result<(), RemoteConfigError> {
        if self.namespace.trim().is_empty() {
            return Err(RemoteConfigError::validation("metadata namespace is empty"));
        }
        if self.deployment_name.trim().is_empty() {
            return Err(RemoteConfigError::validation("metadata deployment name is empty"));
        }
        if self.last_updated_by.trim().is_empty() {
            return Err(RemoteConfigError::validation("metadata lastUpdatedBy is empty"));
        }
        if let Some(m) = &self.migration {
            if m.migrated_by.trim().is_empty() || m.from_version.trim().is_empty() {
                return Err(RemoteConfigError::validation("metadata migration is incomplete"));
            }
        }
        Ok(())
    }
}
