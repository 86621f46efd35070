use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::invocation::{CommandInvocation, flags};

/// Snapshot of the flags every command of a deployment should agree on.
///
/// Flags given on the command line are stored; flags omitted on the command
/// line are filled in from the snapshot, so a deployment keeps using the same
/// chart versions without the operator repeating them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommonFlags {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chart_directory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relay_release_tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub solo_chart_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mirror_node_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_aliases_unparsed: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hedera_explorer_version: Option<String>,
}

impl CommonFlags {
    fn fields_mut(&mut self) -> [(&'static str, &mut Option<String>); 7] {
        [
            (flags::RELEASE_TAG, &mut self.release_tag),
            (flags::CHART_DIRECTORY, &mut self.chart_directory),
            (flags::RELAY_RELEASE_TAG, &mut self.relay_release_tag),
            (flags::SOLO_CHART_VERSION, &mut self.solo_chart_version),
            (flags::MIRROR_NODE_VERSION, &mut self.mirror_node_version),
            (flags::NODE_ALIASES, &mut self.node_aliases_unparsed),
            (flags::EXPLORER_VERSION, &mut self.hedera_explorer_version),
        ]
    }

    pub fn from_invocation(invocation: &CommandInvocation) -> Self {
        let mut snapshot = Self::default();
        for (flag, slot) in snapshot.fields_mut() {
            *slot = invocation.flag(flag).map(str::to_string);
        }
        snapshot
    }

    /// Two-way merge with an invocation: its flags overwrite the snapshot,
    /// and snapshot values fill in flags it does not set. Returns the names of
    /// flags whose stored value changed.
    pub fn handle_flags(&mut self, invocation: &mut CommandInvocation) -> Vec<&'static str> {
        let mut changed = Vec::new();
        for (flag, slot) in self.fields_mut() {
            match (invocation.flag(flag), slot.as_deref()) {
                (Some(given), stored) if stored != Some(given) => {
                    debug!(flag, given, previous = ?stored, "updating stored flag");
                    *slot = Some(given.to_string());
                    changed.push(flag);
                }
                (None, Some(stored)) => {
                    invocation.set_flag(flag, stored);
                }
                _ => {}
            }
        }
        changed
    }
}
