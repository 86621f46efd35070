//! Registry of deployed components, grouped by kind and keyed by name.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::RemoteConfigError;
use crate::keys;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ComponentKind {
    ConsensusNode,
    HaProxy,
    EnvoyProxy,
    MirrorNode,
    MirrorNodeExplorer,
    Relay,
    BlockNode,
}

impl ComponentKind {
    pub const ALL: [ComponentKind; 7] = [
        ComponentKind::ConsensusNode,
        ComponentKind::HaProxy,
        ComponentKind::EnvoyProxy,
        ComponentKind::MirrorNode,
        ComponentKind::MirrorNodeExplorer,
        ComponentKind::Relay,
        ComponentKind::BlockNode,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentKind::ConsensusNode => "consensus node",
            ComponentKind::HaProxy => "haproxy",
            ComponentKind::EnvoyProxy => "envoy proxy",
            ComponentKind::MirrorNode => "mirror node",
            ComponentKind::MirrorNodeExplorer => "mirror node explorer",
            ComponentKind::Relay => "relay",
            ComponentKind::BlockNode => "block node",
        }
    }

    /// Name prefix used when generating component names, e.g. `haproxy-3`.
    fn name_prefix(&self) -> &'static str {
        match self {
            ComponentKind::ConsensusNode => "node",
            ComponentKind::HaProxy => "haproxy",
            ComponentKind::EnvoyProxy => "envoy-proxy",
            ComponentKind::MirrorNode => "mirror-node",
            ComponentKind::MirrorNodeExplorer => "mirror-node-explorer",
            ComponentKind::Relay => "relay",
            ComponentKind::BlockNode => "block-node",
        }
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a consensus node, in deployment order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConsensusNodeState {
    NonDeployed,
    Requested,
    Initialized,
    Setup,
    Started,
    Frozen,
    Stopped,
}

impl ConsensusNodeState {
    /// Whether pods are expected to exist for a node in this state.
    pub fn has_pods(&self) -> bool {
        !matches!(
            self,
            ConsensusNodeState::NonDeployed | ConsensusNodeState::Requested
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComponentState {
    #[default]
    Active,
    Deleted,
}

/// Identity shared by every component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseComponent {
    pub name: String,
    pub cluster: String,
    pub namespace: String,
}

impl BaseComponent {
    pub fn new(
        name: impl Into<String>,
        cluster: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            cluster: cluster.into(),
            namespace: namespace.into(),
        }
    }

    fn validate(&self, kind: ComponentKind) -> Result<(), RemoteConfigError> {
        for (field, value) in [
            ("name", &self.name),
            ("cluster", &self.cluster),
            ("namespace", &self.namespace),
        ] {
            if value.trim().is_empty() {
                return Err(RemoteConfigError::validation(format!(
                    "{kind} {:?} has an empty {field}",
                    self.name
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsensusNodeComponent {
    #[serde(flatten)]
    pub base: BaseComponent,
    pub node_id: u64,
    pub state: ConsensusNodeState,
}

macro_rules! simple_component {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
        pub struct $name {
            #[serde(flatten)]
            pub base: BaseComponent,
            #[serde(default)]
            pub state: ComponentState,
        }

        impl $name {
            pub fn new(
                name: impl Into<String>,
                cluster: impl Into<String>,
                namespace: impl Into<String>,
            ) -> Self {
                Self {
                    base: BaseComponent::new(name, cluster, namespace),
                    state: ComponentState::Active,
                }
            }
        }
    };
}

simple_component!(HaProxyComponent);
simple_component!(EnvoyProxyComponent);
simple_component!(MirrorNodeComponent);
simple_component!(MirrorNodeExplorerComponent);
simple_component!(BlockNodeComponent);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayComponent {
    #[serde(flatten)]
    pub base: BaseComponent,
    #[serde(default)]
    pub state: ComponentState,
    #[serde(default)]
    pub consensus_node_aliases: Vec<String>,
}

impl ConsensusNodeComponent {
    pub fn new(
        name: impl Into<String>,
        cluster: impl Into<String>,
        namespace: impl Into<String>,
        node_id: u64,
        state: ConsensusNodeState,
    ) -> Self {
        Self {
            base: BaseComponent::new(name, cluster, namespace),
            node_id,
            state,
        }
    }
}

impl RelayComponent {
    pub fn new(
        name: impl Into<String>,
        cluster: impl Into<String>,
        namespace: impl Into<String>,
        consensus_node_aliases: Vec<String>,
    ) -> Self {
        Self {
            base: BaseComponent::new(name, cluster, namespace),
            state: ComponentState::Active,
            consensus_node_aliases,
        }
    }
}

/// A registered component of any kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Component {
    ConsensusNode(ConsensusNodeComponent),
    HaProxy(HaProxyComponent),
    EnvoyProxy(EnvoyProxyComponent),
    MirrorNode(MirrorNodeComponent),
    MirrorNodeExplorer(MirrorNodeExplorerComponent),
    Relay(RelayComponent),
    BlockNode(BlockNodeComponent),
}

impl Component {
    pub fn kind(&self) -> ComponentKind {
        match self {
            Component::ConsensusNode(_) => ComponentKind::ConsensusNode,
            Component::HaProxy(_) => ComponentKind::HaProxy,
            Component::EnvoyProxy(_) => ComponentKind::EnvoyProxy,
            Component::MirrorNode(_) => ComponentKind::MirrorNode,
            Component::MirrorNodeExplorer(_) => ComponentKind::MirrorNodeExplorer,
            Component::Relay(_) => ComponentKind::Relay,
            Component::BlockNode(_) => ComponentKind::BlockNode,
        }
    }

    pub fn base(&self) -> &BaseComponent {
        match self {
            Component::ConsensusNode(c) => &c.base,
            Component::HaProxy(c) => &c.base,
            Component::EnvoyProxy(c) => &c.base,
            Component::MirrorNode(c) => &c.base,
            Component::MirrorNodeExplorer(c) => &c.base,
            Component::Relay(c) => &c.base,
            Component::BlockNode(c) => &c.base,
        }
    }

    pub fn name(&self) -> &str {
        &self.base().name
    }

    pub fn cluster(&self) -> &str {
        &self.base().cluster
    }

    pub fn namespace(&self) -> &str {
        &self.base().namespace
    }

    /// Whether the component has been removed from the deployment but is
    /// still tracked.
    pub fn is_deleted(&self) -> bool {
        match self {
            Component::ConsensusNode(_) => false,
            Component::HaProxy(c) => c.state == ComponentState::Deleted,
            Component::EnvoyProxy(c) => c.state == ComponentState::Deleted,
            Component::MirrorNode(c) => c.state == ComponentState::Deleted,
            Component::MirrorNodeExplorer(c) => c.state == ComponentState::Deleted,
            Component::Relay(c) => c.state == ComponentState::Deleted,
            Component::BlockNode(c) => c.state == ComponentState::Deleted,
        }
    }

    /// Same kind and identity, ignoring state and kind-specific fields.
    pub fn same_identity(&self, other: &Component) -> bool {
        self.kind() == other.kind() && self.base() == other.base()
    }

    /// Label selector matching the pods that back this component.
    pub fn pod_selector(&self) -> String {
        match self {
            Component::ConsensusNode(c) => keys::consensus_node_pod_selector(&c.base.name),
            Component::HaProxy(c) => keys::haproxy_pod_selector(&c.base.name),
            Component::EnvoyProxy(c) => keys::envoy_proxy_pod_selector(&c.base.name),
            Component::MirrorNode(_) => keys::mirror_node_pod_selector(),
            Component::MirrorNodeExplorer(_) => keys::explorer_pod_selector(),
            Component::Relay(_) => keys::relay_pod_selector(),
            Component::BlockNode(c) => keys::block_node_pod_selector(&c.base.name),
        }
    }

    pub fn validate(&self) -> Result<(), RemoteConfigError> {
        self.base().validate(self.kind())?;
        if let Component::Relay(relay) = self {
            if relay.consensus_node_aliases.iter().any(|a| a.trim().is_empty()) {
                return Err(RemoteConfigError::validation(format!(
                    "relay {:?} lists an empty consensus node alias",
                    relay.base.name
                )));
            }
        }
        Ok(())
    }
}

/// Typed access to one component kind.
pub trait ComponentVariant: Sized {
    const KIND: ComponentKind;
    fn from_component(component: &Component) -> Option<&Self>;
    fn into_component(self) -> Component;
}

macro_rules! component_variant {
    ($ty:ty, $variant:ident) => {
        impl ComponentVariant for $ty {
            const KIND: ComponentKind = ComponentKind::$variant;

            fn from_component(component: &Component) -> Option<&Self> {
                match component {
                    Component::$variant(c) => Some(c),
                    _ => None,
                }
            }

            fn into_component(self) -> Component {
                Component::$variant(self)
            }
        }

        impl From<$ty> for Component {
            fn from(c: $ty) -> Self {
                Component::$variant(c)
            }
        }
    };
}

component_variant!(ConsensusNodeComponent, ConsensusNode);
component_variant!(HaProxyComponent, HaProxy);
component_variant!(EnvoyProxyComponent, EnvoyProxy);
component_variant!(MirrorNodeComponent, MirrorNode);
component_variant!(MirrorNodeExplorerComponent, MirrorNodeExplorer);
component_variant!(RelayComponent, Relay);
component_variant!(BlockNodeComponent, BlockNode);

/// Serialized form of the registry, one map per kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentsDocument {
    #[serde(default)]
    pub consensus_nodes: BTreeMap<String, ConsensusNodeComponent>,
    #[serde(default)]
    pub relays: BTreeMap<String, RelayComponent>,
    #[serde(default)]
    pub ha_proxies: BTreeMap<String, HaProxyComponent>,
    #[serde(default)]
    pub envoy_proxies: BTreeMap<String, EnvoyProxyComponent>,
    #[serde(default)]
    pub mirror_nodes: BTreeMap<String, MirrorNodeComponent>,
    #[serde(default)]
    pub mirror_node_explorers: BTreeMap<String, MirrorNodeExplorerComponent>,
    #[serde(default)]
    pub block_nodes: BTreeMap<String, BlockNodeComponent>,
}

/// Every component of a deployment. Names are unique within a kind.
///
/// All mutators validate the whole registry before returning, and leave it
/// untouched when they fail. `Clone` is a deep copy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComponentsDataWrapper {
    groups: BTreeMap<ComponentKind, BTreeMap<String, Component>>,
}

impl ComponentsDataWrapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding one not-yet-deployed consensus node per alias, all
    /// on the same cluster and namespace.
    pub fn initialize_with_nodes(
        node_aliases: &[String],
        cluster: &str,
        namespace: &str,
    ) -> Result<Self, RemoteConfigError> {
        let mut components = Self::new();
        for alias in node_aliases {
            let node_id = keys::node_id_from_alias(alias).ok_or_else(|| {
                RemoteConfigError::validation(format!("invalid node alias {alias:?}"))
            })?;
            components.add_new_component(ConsensusNodeComponent::new(
                alias.as_str(),
                cluster,
                namespace,
                node_id,
                ConsensusNodeState::NonDeployed,
            ))?;
        }
        Ok(components)
    }

    fn group(&self, kind: ComponentKind) -> Option<&BTreeMap<String, Component>> {
        self.groups.get(&kind)
    }

    /// Apply `f` to a copy of the registry and keep the copy only when it
    /// validates.
    fn apply<F>(&mut self, f: F) -> Result<(), RemoteConfigError>
    where
        F: FnOnce(&mut BTreeMap<ComponentKind, BTreeMap<String, Component>>) -> Result<(), RemoteConfigError>,
    {
        let mut groups = self.groups.clone();
        f(&mut groups)?;
        groups.retain(|_, g| !g.is_empty());
        let candidate = Self { groups };
        candidate.validate()?;
        *self = candidate;
        Ok(())
    }

    pub fn add_new_component(&mut self, component: impl Into<Component>) -> Result<(), RemoteConfigError> {
        let component = component.into();
        component.validate()?;
        let kind = component.kind();
        let name = component.name().to_string();
        self.apply(|groups| {
            let group = groups.entry(kind).or_default();
            if group.contains_key(&name) || group.values().any(|c| c.same_identity(&component)) {
                return Err(RemoteConfigError::ComponentExists { kind, name });
            }
            group.insert(name, component);
            Ok(())
        })
    }

    pub fn edit_component(&mut self, component: impl Into<Component>) -> Result<(), RemoteConfigError> {
        let component = component.into();
        component.validate()?;
        let kind = component.kind();
        let name = component.name().to_string();
        self.apply(|groups| {
            let slot = groups
                .get_mut(&kind)
                .and_then(|g| g.get_mut(&name))
                .ok_or_else(|| RemoteConfigError::ComponentNotFound {
                    kind,
                    name: name.clone(),
                })?;
            *slot = component;
            Ok(())
        })
    }

    pub fn remove_component(&mut self, name: &str, kind: ComponentKind) -> Result<(), RemoteConfigError> {
        self.apply(|groups| {
            groups
                .get_mut(&kind)
                .and_then(|g| g.remove(name))
                .map(|_| ())
                .ok_or_else(|| RemoteConfigError::ComponentNotFound {
                    kind,
                    name: name.to_string(),
                })
        })
    }

    pub fn get_component(&self, kind: ComponentKind, name: &str) -> Result<&Component, RemoteConfigError> {
        self.group(kind)
            .and_then(|g| g.get(name))
            .ok_or_else(|| RemoteConfigError::ComponentNotFound {
                kind,
                name: name.to_string(),
            })
    }

    /// Typed lookup, e.g. `get::<RelayComponent>("relay")`.
    pub fn get<T: ComponentVariant>(&self, name: &str) -> Result<&T, RemoteConfigError> {
        let component = self.get_component(T::KIND, name)?;
        T::from_component(component).ok_or_else(|| {
            RemoteConfigError::validation(format!(
                "component {name:?} is registered as {} but stored as {}",
                T::KIND,
                component.kind()
            ))
        })
    }

    pub fn components_of(&self, kind: ComponentKind) -> impl Iterator<Item = &Component> {
        self.group(kind).into_iter().flat_map(|g| g.values())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Component> {
        self.groups.values().flat_map(|g| g.values())
    }

    pub fn consensus_nodes(&self) -> impl Iterator<Item = &ConsensusNodeComponent> {
        self.components_of(ComponentKind::ConsensusNode)
            .filter_map(ConsensusNodeComponent::from_component)
    }

    pub fn len(&self) -> usize {
        self.groups.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Numeric suffix for the next generated name of `kind`: one more than
    /// the number of registered components of that kind.
    pub fn next_component_index(&self, kind: ComponentKind) -> usize {
        self.components_of(kind).count() + 1
    }

    /// Generated name for a new component of `kind`, e.g. `relay-2`.
    pub fn new_component_name(&self, kind: ComponentKind) -> String {
        format!("{}-{}", kind.name_prefix(), self.next_component_index(kind))
    }

    pub fn change_node_state(
        &mut self,
        node_alias: &str,
        state: ConsensusNodeState,
    ) -> Result<(), RemoteConfigError> {
        let mut node = self.get::<ConsensusNodeComponent>(node_alias)?.clone();
        node.state = state;
        self.edit_component(node)
    }

    pub fn validate(&self) -> Result<(), RemoteConfigError> {
        for (kind, group) in &self.groups {
            for (name, component) in group {
                if component.kind() != *kind {
                    return Err(RemoteConfigError::validation(format!(
                        "component {name:?} of type {} filed under {kind}",
                        component.kind()
                    )));
                }
                if component.name() != name {
                    return Err(RemoteConfigError::validation(format!(
                        "{kind} registered as {name:?} is named {:?}",
                        component.name()
                    )));
                }
                component.validate()?;
            }
        }
        Ok(())
    }

    pub fn to_document(&self) -> ComponentsDocument {
        fn collect<T: ComponentVariant + Clone>(
            wrapper: &ComponentsDataWrapper,
        ) -> BTreeMap<String, T> {
            wrapper
                .components_of(T::KIND)
                .filter_map(|c| T::from_component(c).map(|t| (c.name().to_string(), t.clone())))
                .collect()
        }
        ComponentsDocument {
            consensus_nodes: collect(self),
            relays: collect(self),
            ha_proxies: collect(self),
            envoy_proxies: collect(self),
            mirror_nodes: collect(self),
            mirror_node_explorers: collect(self),
            block_nodes: collect(self),
        }
    }

    pub fn from_document(doc: ComponentsDocument) -> Result<Self, RemoteConfigError> {
        fn insert<T: ComponentVariant>(
            groups: &mut BTreeMap<ComponentKind, BTreeMap<String, Component>>,
            entries: BTreeMap<String, T>,
        ) {
            let group = groups.entry(T::KIND).or_default();
            for (key, component) in entries {
                group.insert(key, component.into_component());
            }
        }

        let mut groups = BTreeMap::new();
        insert(&mut groups, doc.consensus_nodes);
        insert(&mut groups, doc.relays);
        insert(&mut groups, doc.ha_proxies);
        insert(&mut groups, doc.envoy_proxies);
        insert(&mut groups, doc.mirror_nodes);
        insert(&mut groups, doc.mirror_node_explorers);
        insert(&mut groups, doc.block_nodes);
        groups.retain(|_, g| !g.is_empty());

        let wrapper = Self { groups };
        wrapper.validate()?;
        Ok(wrapper)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aliases(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn next_index_counts_components_of_kind() {
        let mut c = ComponentsDataWrapper::new();
        assert_eq!(c.next_component_index(ComponentKind::HaProxy), 1);
        c.add_new_component(HaProxyComponent::new("haproxy-1", "c1", "ns")).unwrap();
        c.add_new_component(HaProxyComponent::new("haproxy-node1", "c1", "ns")).unwrap();
        assert_eq!(c.next_component_index(ComponentKind::HaProxy), 3);
        assert_eq!(c.new_component_name(ComponentKind::HaProxy), "haproxy-3");
        assert_eq!(c.new_component_name(ComponentKind::Relay), "relay-1");
    }

    #[test]
    fn initialize_rejects_bad_alias() {
        let err = ComponentsDataWrapper::initialize_with_nodes(&aliases(&["node1", "bogus"]), "c1", "ns")
            .unwrap_err();
        assert!(matches!(err, RemoteConfigError::Validation(_)));
    }

    #[test]
    fn failed_mutation_leaves_registry_untouched() {
        let mut c = ComponentsDataWrapper::initialize_with_nodes(&aliases(&["node1"]), "c1", "ns").unwrap();
        let before = c.clone();
        let err = c
            .add_new_component(RelayComponent::new("relay-1", "c1", "ns", aliases(&["node1", " "])))
            .unwrap_err();
        assert!(matches!(err, RemoteConfigError::Validation(_)));
        assert_eq!(c, before);
    }
}
