use std::collections::BTreeMap;

use chrono::Utc;
use k8s_openapi::api::core::v1::ConfigMap;
use solo::keys;
use solo::remote_config::{
    ClusterInfo, CommonFlags, ComponentKind, ComponentsDataWrapper, ConsensusNodeState,
    DeploymentState, HaProxyComponent, MAX_COMMAND_HISTORY, REMOTE_CONFIG_VERSION,
    RemoteConfigData, RemoteConfigDataWrapper, RemoteConfigError, RemoteConfigMetadata,
};

fn data() -> RemoteConfigData {
    let aliases = vec!["node1".to_string()];
    RemoteConfigData {
        version: REMOTE_CONFIG_VERSION.to_string(),
        metadata: RemoteConfigMetadata::new(
            "solo",
            "solo-deployment",
            DeploymentState::PreGenesis,
            Utc::now(),
            "ops@example.com",
            "0.1.0",
        ),
        clusters: BTreeMap::from([(
            "c1".to_string(),
            ClusterInfo::new("c1", "solo", "solo-deployment"),
        )]),
        components: ComponentsDataWrapper::initialize_with_nodes(&aliases, "c1", "solo").unwrap(),
        command_history: vec!["deployment create".to_string()],
        last_executed_command: "deployment create".to_string(),
        flags: CommonFlags::default(),
    }
}

fn wrapper() -> RemoteConfigDataWrapper {
    RemoteConfigDataWrapper::new(data()).unwrap()
}

#[solo::test]
fn empty_cluster_namespace_is_rejected_on_construction() {
    let mut d = data();
    d.clusters.get_mut("c1").unwrap().namespace = String::new();

    let err = RemoteConfigDataWrapper::new(d).unwrap_err();
    assert!(matches!(err, RemoteConfigError::Validation(_)), "got {err:?}");
}

#[solo::test]
fn cluster_key_must_match_its_name() {
    let mut d = data();
    let cluster = d.clusters.remove("c1").unwrap();
    d.clusters.insert("c2".into(), cluster);

    assert!(matches!(
        RemoteConfigDataWrapper::new(d),
        Err(RemoteConfigError::Validation(_))
    ));
}

#[solo::test]
fn non_string_last_command_is_a_validation_error() {
    let mut value: serde_yaml::Value = serde_yaml::from_str(&wrapper().to_yaml().unwrap()).unwrap();
    value["lastExecutedCommand"] = serde_yaml::Value::Number(serde_yaml::Number::from(5i64));
    let yaml = serde_yaml::to_string(&value).unwrap();

    let err = RemoteConfigDataWrapper::from_yaml(&yaml).unwrap_err();
    assert!(matches!(err, RemoteConfigError::Validation(ref m) if m.contains("malformed")), "got {err:?}");
}

#[solo::test]
fn unparseable_yaml_is_a_serialization_error() {
    let err = RemoteConfigDataWrapper::from_yaml("version: [unclosed").unwrap_err();
    assert!(matches!(err, RemoteConfigError::Serialization(_)), "got {err:?}");
}

#[solo::test]
fn history_keeps_only_the_newest_entries() {
    let mut doc = wrapper();
    let total = MAX_COMMAND_HISTORY + 5;
    for i in 0..total {
        doc.add_command_to_history(format!("command {i}")).unwrap();
    }

    let history = doc.command_history();
    assert_eq!(history.len(), MAX_COMMAND_HISTORY);
    assert_eq!(history.first().map(String::as_str), Some("command 5"));
    assert_eq!(
        history.last().map(String::as_str),
        Some(format!("command {}", total - 1).as_str())
    );
    assert_eq!(doc.last_executed_command(), format!("command {}", total - 1));
}

#[solo::test]
fn failed_mutation_leaves_document_unchanged() {
    let mut doc = wrapper();
    let before = doc.clone();

    let err = doc
        .with_mutation(|d| {
            d.push_history("partial".into());
            d.metadata.deployment_name.clear();
            Ok(())
        })
        .unwrap_err();
    assert!(matches!(err, RemoteConfigError::Validation(_)));
    assert_eq!(doc, before);

    let err = doc
        .with_mutation(|d| {
            d.components
                .remove_component("node9", ComponentKind::ConsensusNode)
        })
        .unwrap_err();
    assert!(matches!(err, RemoteConfigError::ComponentNotFound { .. }));
    assert_eq!(doc, before);
}

#[solo::test]
fn mutation_can_touch_several_fields_before_validating() {
    let mut doc = wrapper();

    let index = doc
        .with_mutation(|d| {
            d.metadata.state = DeploymentState::Genesis;
            let name = d.components.new_component_name(ComponentKind::HaProxy);
            d.components
                .add_new_component(HaProxyComponent::new(name, "c1", "solo"))?;
            d.components
                .change_node_state("node1", ConsensusNodeState::Started)?;
            Ok(d.components.next_component_index(ComponentKind::HaProxy))
        })
        .unwrap();

    assert_eq!(index, 2);
    assert_eq!(doc.metadata().state, DeploymentState::Genesis);
    assert!(doc.components().get_component(ComponentKind::HaProxy, "haproxy-1").is_ok());
}

#[solo::test]
fn yaml_document_uses_camel_case_keys() {
    let doc = wrapper();
    let yaml = doc.to_yaml().unwrap();

    assert!(yaml.contains("lastExecutedCommand: deployment create"), "{yaml}");
    assert!(yaml.contains("commandHistory:"), "{yaml}");
    assert!(yaml.contains("deploymentName: solo-deployment"), "{yaml}");
    assert!(yaml.contains("state: pre-genesis"), "{yaml}");
    assert!(yaml.contains("dnsBaseDomain: cluster.local"), "{yaml}");
    assert!(yaml.contains("state: NON_DEPLOYED"), "{yaml}");

    assert_eq!(RemoteConfigDataWrapper::from_yaml(&yaml).unwrap(), doc);
}

#[solo::test]
fn configmap_carries_labels_and_data_key() {
    let doc = wrapper();
    let cm = doc.to_configmap("solo").unwrap();

    assert_eq!(cm.metadata.name.as_deref(), Some(keys::REMOTE_CONFIG_CONFIGMAP_NAME));
    assert_eq!(cm.metadata.namespace.as_deref(), Some("solo"));
    assert_eq!(cm.metadata.labels, Some(keys::remote_config_labels()));
    assert_eq!(RemoteConfigDataWrapper::from_configmap(&cm).unwrap(), doc);

    let empty = ConfigMap::default();
    assert!(matches!(
        RemoteConfigDataWrapper::from_configmap(&empty),
        Err(RemoteConfigError::Validation(_))
    ));
}

#[solo::test]
fn compare_looks_at_cluster_membership() {
    let a = wrapper();
    let mut b = wrapper();
    b.add_command_to_history("something else").unwrap();
    assert!(RemoteConfigDataWrapper::compare(&a, &b));

    let mut c = wrapper();
    c.with_mutation(|d| {
        d.clusters
            .insert("c2".into(), ClusterInfo::new("c2", "solo", "solo-deployment"));
        Ok(())
    })
    .unwrap();
    assert!(!RemoteConfigDataWrapper::compare(&a, &c));
}

#[solo::test]
fn migration_is_validated() {
    let mut doc = wrapper();
    doc.with_mutation(|d| {
        d.metadata.make_migration("ops@example.com", "0.0.9");
        Ok(())
    })
    .unwrap();
    let migration = doc.metadata().migration.clone().unwrap();
    assert_eq!(migration.from_version, "0.0.9");

    let err = doc
        .with_mutation(|d| {
            d.metadata.make_migration("", "0.0.9");
            Ok(())
        })
        .unwrap_err();
    assert!(matches!(err, RemoteConfigError::Validation(_)));
}
