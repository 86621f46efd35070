use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::ObjectMeta;
use serde::{Deserialize, Serialize};

use super::components::ComponentsDocument;
use super::{
    ClusterInfo, CommonFlags, ComponentsDataWrapper, MAX_COMMAND_HISTORY, RemoteConfigError,
    RemoteConfigMetadata,
};
use crate::keys;

/// On-the-wire shape of the remote config, as stored in the ConfigMap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteConfigDocument {
    pub version: String,
    pub metadata: RemoteConfigMetadata,
    #[serde(default)]
    pub clusters: BTreeMap<String, ClusterInfo>,
    #[serde(default)]
    pub components: ComponentsDocument,
    pub command_history: Vec<String>,
    pub last_executed_command: String,
    #[serde(default)]
    pub flags: CommonFlags,
}

/// The remote config contents. Freely mutable; only
/// [`RemoteConfigDataWrapper`] guarantees they are valid.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteConfigData {
    pub version: String,
    pub metadata: RemoteConfigMetadata,
    /// Cluster reference -> cluster
    pub clusters: BTreeMap<String, ClusterInfo>,
    pub components: ComponentsDataWrapper,
    pub command_history: Vec<String>,
    pub last_executed_command: String,
    pub flags: CommonFlags,
}

impl RemoteConfigData {
    pub fn validate(&self) -> Result<(), RemoteConfigError> {
        if self.version.trim().is_empty() {
            return Err(RemoteConfigError::validation("version is empty"));
        }
        self.metadata.validate()?;
        for (cluster_ref, cluster) in &self.clusters {
            cluster.validate()?;
            if cluster.name != *cluster_ref {
                return Err(RemoteConfigError::validation(format!(
                    "cluster registered as {cluster_ref:?} is named {:?}",
                    cluster.name
                )));
            }
        }
        self.components.validate()?;
        Ok(())
    }

    /// Record `command` as executed, keeping the newest entries.
    pub fn push_history(&mut self, command: String) {
        self.command_history.push(command.clone());
        self.last_executed_command = command;
        if self.command_history.len() > MAX_COMMAND_HISTORY {
            let excess = self.command_history.len() - MAX_COMMAND_HISTORY;
            self.command_history.drain(..excess);
        }
    }
}

/// A remote config that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteConfigDataWrapper {
    data: RemoteConfigData,
}

impl RemoteConfigDataWrapper {
    pub fn new(data: RemoteConfigData) -> Result<Self, RemoteConfigError> {
        data.validate()?;
        Ok(Self { data })
    }

    pub fn data(&self) -> &RemoteConfigData {
        &self.data
    }

    pub fn into_data(self) -> RemoteConfigData {
        self.data
    }

    pub fn version(&self) -> &str {
        &self.data.version
    }

    pub fn metadata(&self) -> &RemoteConfigMetadata {
        &self.data.metadata
    }

    pub fn clusters(&self) -> &BTreeMap<String, ClusterInfo> {
        &self.data.clusters
    }

    pub fn components(&self) -> &ComponentsDataWrapper {
        &self.data.components
    }

    /// Oldest first, at most [`MAX_COMMAND_HISTORY`] entries.
    pub fn command_history(&self) -> &[String] {
        &self.data.command_history
    }

    pub fn last_executed_command(&self) -> &str {
        &self.data.last_executed_command
    }

    pub fn flags(&self) -> &CommonFlags {
        &self.data.flags
    }

    /// Run `f` against a copy of the contents and commit the copy only if
    /// both `f` and validation succeed. On error `self` is unchanged.
    pub fn with_mutation<T, F>(&mut self, f: F) -> Result<T, RemoteConfigError>
    where
        F: FnOnce(&mut RemoteConfigData) -> Result<T, RemoteConfigError>,
    {
        let mut draft = self.data.clone();
        let out = f(&mut draft)?;
        draft.validate()?;
        self.data = draft;
        Ok(out)
    }

    /// Append to the history, dropping the oldest entries beyond the cap,
    /// and record it as the last executed command.
    pub fn add_command_to_history(&mut self, command: impl Into<String>) -> Result<(), RemoteConfigError> {
        let command = command.into();
        self.with_mutation(|data| {
            data.push_history(command);
            Ok(())
        })
    }

    pub fn validate(&self) -> Result<(), RemoteConfigError> {
        self.data.validate()
    }

    /// Documents are considered equal when they span the same clusters, in the same order.
    pub fn compare(a: &RemoteConfigDataWrapper, b: &RemoteConfigDataWrapper) -> bool {
        a.data.clusters.keys().eq(b.data.clusters.keys())
    }

    pub fn to_document(&self) -> RemoteConfigDocument {
        let d = &self.data;
        RemoteConfigDocument {
            version: d.version.clone(),
            metadata: d.metadata.clone(),
            clusters: d.clusters.clone(),
            components: d.components.to_document(),
            command_history: d.command_history.clone(),
            last_executed_command: d.last_executed_command.clone(),
            flags: d.flags.clone(),
        }
    }

    pub fn from_document(doc: RemoteConfigDocument) -> Result<Self, RemoteConfigError> {
        Self::new(RemoteConfigData {
            version: doc.version,
            metadata: doc.metadata,
            clusters: doc.clusters,
            components: ComponentsDataWrapper::from_document(doc.components)?,
            command_history: doc.command_history,
            last_executed_command: doc.last_executed_command,
            flags: doc.flags,
        })
    }

    pub fn to_yaml(&self) -> Result<String, RemoteConfigError> {
        serde_yaml::to_string(&self.to_document())
            .map_err(|e| RemoteConfigError::Serialization(e.to_string()))
    }

    /// Parse and validate. Unparseable YAML is a serialization error; a
    /// well-formed document of the wrong shape is a validation error.
    pub fn from_yaml(yaml: &str) -> Result<Self, RemoteConfigError> {
        let value: serde_yaml::Value =
            serde_yaml::from_str(yaml).map_err(|e| RemoteConfigError::Serialization(e.to_string()))?;
        let doc: RemoteConfigDocument = serde_yaml::from_value(value)
            .map_err(|e| RemoteConfigError::validation(format!("malformed document: {e}")))?;
        Self::from_document(doc)
    }

    pub fn from_configmap(cm: &ConfigMap) -> Result<Self, RemoteConfigError> {
        let yaml = cm
            .data
            .as_ref()
            .and_then(|d| d.get(keys::REMOTE_CONFIG_DATA_KEY))
            .ok_or_else(|| {
                RemoteConfigError::validation(format!(
                    "ConfigMap has no {} entry",
                    keys::REMOTE_CONFIG_DATA_KEY
                ))
            })?;
        Self::from_yaml(yaml)
    }

    /// A labelled ConfigMap carrying this document, for `namespace`.
    pub fn to_configmap(&self, namespace: &str) -> Result<ConfigMap, RemoteConfigError> {
        Ok(ConfigMap {
            metadata: ObjectMeta {
                name: Some(keys::REMOTE_CONFIG_CONFIGMAP_NAME.to_string()),
                namespace: Some(namespace.to_string()),
                labels: Some(keys::remote_config_labels()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([(
                keys::REMOTE_CONFIG_DATA_KEY.to_string(),
                self.to_yaml()?,
            )])),
            ..Default::default()
        })
    }
}
