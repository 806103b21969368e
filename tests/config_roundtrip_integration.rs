//! Node configuration files: save, load and run

mod common;

use common::builders::{ImageBuilder, NodeConfigBuilder};
use common::{fixture, host_session};
use kernel_node_rs::node::{ConfigFormat, KernelNode, KernelNodeConfig, ParamKind, ParamValue};
use tempfile::TempDir;

fn sample_config() -> KernelNodeConfig {
    NodeConfigBuilder::identity()
        .entry_point("flip")
        .param_value("flipX", true)
        .param_value("level", 0.25)
        .param_value("label", "left")
        .param("passes", ParamKind::Integer)
        .build()
}

#[test]
fn test_toml_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nodes").join("flip.toml");
    let config = sample_config();

    config.save(&path).unwrap();
    assert_eq!(ConfigFormat::from_path(&path).unwrap(), ConfigFormat::Toml);
    assert_eq!(KernelNodeConfig::load(&path).unwrap(), config);
}

#[test]
fn test_json_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("flip.json");
    let config = sample_config();

    config.save(&path).unwrap();
    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.trim_start().starts_with('{'));
    assert_eq!(KernelNodeConfig::load(&path).unwrap(), config);
}

#[test]
fn test_unknown_extension_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("flip.yaml");
    assert!(sample_config().save(&path).is_err());
    assert!(!path.exists());
}

#[test]
fn test_fixture_loads_and_runs() {
    let config = KernelNodeConfig::load(fixture("flip.toml")).unwrap();
    assert_eq!(config.limits.max_operations, 1_000_000);
    assert_eq!(
        config.parameters[0].value,
        Some(ParamValue::Boolean(true))
    );

    let node = KernelNode::new(config, host_session());
    assert!(node.is_valid(), "{}", node.report());

    let invocation = node
        .invoke_with([("src", ImageBuilder::new(4, 1).build())])
        .unwrap();
    assert_eq!(
        invocation.output("dst").unwrap().to_vec(),
        vec![3.0, 2.0, 1.0, 0.0]
    );
}

#[test]
fn test_saved_edits_survive_reload() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("edited.toml");

    let mut node = KernelNode::new(NodeConfigBuilder::identity().build(), host_session());
    node.declare_parameter("gain", ParamKind::Float).unwrap();
    node.set_parameter("gain", 2).unwrap();
    node.rename_slot("dst", "out").unwrap();
    node.config().save(&path).unwrap();

    let reloaded = KernelNodeConfig::load(&path).unwrap();
    assert_eq!(reloaded.outputs, vec!["out"]);
    assert_eq!(reloaded.parameter_kind("gain"), Some(ParamKind::Float));
    assert_eq!(reloaded.parameters[0].value, Some(ParamValue::Float(2.0)));
}
