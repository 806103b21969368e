//! Test to verify test infrastructure works correctly

mod common;

use common::builders::{ImageBuilder, NodeConfigBuilder};
use common::mock_helpers::{mock_session, MockRunner};
use kernel_node_rs::node::Validator;
use kernel_node_rs::types::PixelType;

#[test]
fn test_infrastructure_setup() {
    // Test that builders work
    let config = NodeConfigBuilder::identity().build();
    assert!(Validator::new().validate(&config).is_valid());

    let image = ImageBuilder::new(2, 2)
        .pixel_type(PixelType::Float32)
        .offset(0.5)
        .build();
    assert_eq!(image.pixel_type(), PixelType::Float32);
    common::assert_float_eq(image.get(1, 1, 0).unwrap() as f64, 3.5, 1e-6);
}

#[test]
fn test_mock_session() {
    let session = mock_session(MockRunner::new());
    assert_eq!(session.name(), "mock");
}

#[test]
fn test_fixture_path() {
    assert!(common::fixture("flip.toml").exists());
}

#[test]
fn test_float_comparison() {
    common::assert_float_eq(1.0, 1.0000001, 0.001);
}

#[test]
#[should_panic]
fn test_float_comparison_fails() {
    common::assert_float_eq(1.0, 2.0, 0.001);
}
