use solo::remote_config::{
    BlockNodeComponent, Component, ComponentKind, ComponentState, ComponentsDataWrapper,
    ConsensusNodeComponent, ConsensusNodeState, EnvoyProxyComponent, HaProxyComponent,
    MirrorNodeComponent, RelayComponent, RemoteConfigError,
};

fn aliases(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

fn registry() -> ComponentsDataWrapper {
    ComponentsDataWrapper::initialize_with_nodes(&aliases(&["node1", "node2"]), "cluster-1", "solo")
        .unwrap()
}

#[solo::test]
fn nodes_start_undeployed_with_ids_from_aliases() {
    let components = registry();

    let nodes: Vec<_> = components.consensus_nodes().collect();
    assert_eq!(nodes.len(), 2);
    assert!(nodes.iter().all(|n| n.state == ConsensusNodeState::NonDeployed));
    let node2 = components.get::<ConsensusNodeComponent>("node2").unwrap();
    assert_eq!(node2.node_id, 1);
    assert_eq!(node2.base.cluster, "cluster-1");
    assert_eq!(node2.base.namespace, "solo");
}

#[solo::test]
fn names_are_unique_within_a_kind() {
    let mut components = registry();
    components
        .add_new_component(HaProxyComponent::new("haproxy-node1", "cluster-1", "solo"))
        .unwrap();

    let err = components
        .add_new_component(HaProxyComponent::new("haproxy-node1", "cluster-2", "other"))
        .unwrap_err();
    assert!(matches!(
        err,
        RemoteConfigError::ComponentExists { kind: ComponentKind::HaProxy, ref name } if name == "haproxy-node1"
    ));

    // The same name under another kind is a different component.
    components
        .add_new_component(EnvoyProxyComponent::new("haproxy-node1", "cluster-1", "solo"))
        .unwrap();
    assert_eq!(components.len(), 4);
}

#[solo::test]
fn editing_or_removing_unknown_components_fails() {
    let mut components = registry();
    let before = components.clone();

    let err = components
        .edit_component(MirrorNodeComponent::new("mirror-node", "cluster-1", "solo"))
        .unwrap_err();
    assert!(matches!(err, RemoteConfigError::ComponentNotFound { kind: ComponentKind::MirrorNode, .. }));

    let err = components
        .remove_component("node9", ComponentKind::ConsensusNode)
        .unwrap_err();
    assert!(matches!(err, RemoteConfigError::ComponentNotFound { .. }));

    // node1 exists, but not as a relay.
    let err = components.remove_component("node1", ComponentKind::Relay).unwrap_err();
    assert!(matches!(err, RemoteConfigError::ComponentNotFound { kind: ComponentKind::Relay, .. }));

    assert_eq!(components, before);
}

#[solo::test]
fn edit_replaces_the_stored_component() {
    let mut components = registry();
    components
        .add_new_component(RelayComponent::new("relay-1", "cluster-1", "solo", aliases(&["node1"])))
        .unwrap();

    let mut relay = components.get::<RelayComponent>("relay-1").unwrap().clone();
    relay.consensus_node_aliases.push("node2".into());
    relay.state = ComponentState::Deleted;
    components.edit_component(relay).unwrap();

    let stored = components.get_component(ComponentKind::Relay, "relay-1").unwrap();
    assert!(stored.is_deleted());
    match stored {
        Component::Relay(r) => assert_eq!(r.consensus_node_aliases, aliases(&["node1", "node2"])),
        other => panic!("unexpected component {other:?}"),
    }
}

#[solo::test]
fn removing_the_last_component_of_a_kind() {
    let mut components = ComponentsDataWrapper::new();
    components
        .add_new_component(BlockNodeComponent::new("block-node-1", "cluster-1", "solo"))
        .unwrap();

    components
        .remove_component("block-node-1", ComponentKind::BlockNode)
        .unwrap();

    assert!(components.is_empty());
    assert_eq!(components, ComponentsDataWrapper::new());
    assert_eq!(components.next_component_index(ComponentKind::BlockNode), 1);
}

#[solo::test]
fn node_state_changes_are_recorded() {
    let mut components = registry();

    components
        .change_node_state("node1", ConsensusNodeState::Started)
        .unwrap();

    assert_eq!(
        components.get::<ConsensusNodeComponent>("node1").unwrap().state,
        ConsensusNodeState::Started
    );
    assert_eq!(
        components.get::<ConsensusNodeComponent>("node2").unwrap().state,
        ConsensusNodeState::NonDeployed
    );
    assert!(matches!(
        components.change_node_state("node7", ConsensusNodeState::Started),
        Err(RemoteConfigError::ComponentNotFound { .. })
    ));
}

#[solo::test]
fn components_with_empty_identity_fields_are_rejected() {
    let mut components = registry();
    let err = components
        .add_new_component(HaProxyComponent::new("haproxy-1", "", "solo"))
        .unwrap_err();
    assert!(matches!(err, RemoteConfigError::Validation(_)));
    assert_eq!(components.components_of(ComponentKind::HaProxy).count(), 0);
}

#[solo::test]
fn generated_names_follow_the_count() {
    let mut components = registry();
    assert_eq!(components.new_component_name(ComponentKind::Relay), "relay-1");
    components
        .add_new_component(RelayComponent::new("relay-1", "cluster-1", "solo", aliases(&["node1"])))
        .unwrap();
    assert_eq!(components.new_component_name(ComponentKind::Relay), "relay-2");
    assert_eq!(components.next_component_index(ComponentKind::ConsensusNode), 3);
}

#[solo::test]
fn document_form_groups_components_by_kind() {
    let mut components = registry();
    components
        .add_new_component(HaProxyComponent::new("haproxy-node1", "cluster-1", "solo"))
        .unwrap();
    components
        .add_new_component(RelayComponent::new("relay-1", "cluster-1", "solo", aliases(&["node1"])))
        .unwrap();

    let doc = components.to_document();
    let json = serde_json::to_value(&doc).unwrap();

    assert_eq!(json["consensusNodes"]["node1"]["state"], "NON_DEPLOYED");
    assert_eq!(json["consensusNodes"]["node1"]["nodeId"], 0);
    assert_eq!(json["consensusNodes"]["node1"]["cluster"], "cluster-1");
    assert_eq!(json["haProxies"]["haproxy-node1"]["state"], "ACTIVE");
    assert_eq!(json["relays"]["relay-1"]["consensusNodeAliases"][0], "node1");

    let back = ComponentsDataWrapper::from_document(doc).unwrap();
    assert_eq!(back, components);
}

#[solo::test]
fn document_with_mismatched_key_is_rejected() {
    let mut doc = registry().to_document();
    let node = doc.consensus_nodes.remove("node2").unwrap();
    doc.consensus_nodes.insert("node3".into(), node);

    assert!(matches!(
        ComponentsDataWrapper::from_document(doc),
        Err(RemoteConfigError::Validation(_))
    ));
}

#[solo::test]
fn pod_selectors_per_kind() {
    let components = registry();
    let node = components
        .get_component(ComponentKind::ConsensusNode, "node1")
        .unwrap();
    assert_eq!(node.pod_selector(), "app=network-node1");
    assert_eq!(
        Component::from(RelayComponent::new("relay-1", "c", "n", vec![])).pod_selector(),
        "app.kubernetes.io/name=relay"
    );
}
