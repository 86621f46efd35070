//! The parsed form of one CLI invocation, as seen by the coordination layer.
//!
//! Argument parsing itself belongs to the binary; the lock manager and the
//! remote config manager only need the command words and the flag values.

use std::collections::BTreeMap;

/// Flag names the coordination layer reads.
pub mod flags {
    pub const NAMESPACE: &str = "namespace";
    pub const CLUSTER_SETUP_NAMESPACE: &str = "cluster-setup-namespace";
    pub const DEPLOYMENT: &str = "deployment";
    pub const CONTEXT: &str = "context";
    pub const CLUSTER_REF: &str = "cluster-ref";
    pub const NODE_ALIASES: &str = "node-aliases";
    pub const RELEASE_TAG: &str = "release-tag";
    pub const CHART_DIRECTORY: &str = "chart-dir";
    pub const RELAY_RELEASE_TAG: &str = "relay-release";
    pub const SOLO_CHART_VERSION: &str = "solo-chart-version";
    pub const MIRROR_NODE_VERSION: &str = "mirror-node-version";
    pub const EXPLORER_VERSION: &str = "explorer-version";
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandInvocation {
    /// Command words, e.g. `["network", "deploy"]`
    pub command: Vec<String>,
    /// Flag name (without dashes) -> value. Boolean flags carry "true".
    pub flags: BTreeMap<String, String>,
}

impl CommandInvocation {
    pub fn new<I, S>(command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.into_iter().map(Into::into).collect(),
            flags: BTreeMap::new(),
        }
    }

    pub fn with_flag(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set_flag(name, value);
        self
    }

    pub fn set_flag(&mut self, name: &str, value: impl Into<String>) {
        self.flags.insert(name.to_string(), value.into());
    }

    /// A flag's value; empty values count as unset.
    pub fn flag(&self, name: &str) -> Option<&str> {
        self.flags
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    pub fn namespace(&self) -> Option<&str> {
        self.flag(flags::NAMESPACE)
    }

    pub fn cluster_setup_namespace(&self) -> Option<&str> {
        self.flag(flags::CLUSTER_SETUP_NAMESPACE)
    }

    pub fn deployment(&self) -> Option<&str> {
        self.flag(flags::DEPLOYMENT)
    }

    pub fn context(&self) -> Option<&str> {
        self.flag(flags::CONTEXT)
    }

    pub fn cluster_ref(&self) -> Option<&str> {
        self.flag(flags::CLUSTER_REF)
    }

    /// Comma separated `node-aliases`, e.g. `node1,node2`.
    pub fn node_aliases(&self) -> Vec<String> {
        self.flag(flags::NODE_ALIASES)
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|a| !a.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The command words, space separated.
    pub fn command_line(&self) -> String {
        self.command.join(" ")
    }

    /// Flags rendered back to CLI form, sorted by name: `--a 1 --verbose`.
    pub fn stringify_flags(&self) -> String {
        self.flags
            .iter()
            .map(|(name, value)| {
                if value == "true" {
                    format!("--{name}")
                } else if value.contains(char::is_whitespace) {
                    format!("--{name} {value:?}")
                } else {
                    format!("--{name} {value}")
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}
