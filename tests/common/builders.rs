//! Test data builders for node configurations and images

use kernel_node_rs::backend::DeviceBuffer;
use kernel_node_rs::node::{KernelNodeConfig, ParamKind, ParamValue, ParameterDecl};
use kernel_node_rs::types::{Extents, PixelType};

/// Kernels shared by the integration tests
pub const KERNELS: &str = r#"
fn copy(x, y, z, args) {
    args.dst.write(x, y, args.src.read(x, y));
}

fn flip(x, y, z, args) {
    let sx = if args.flipX == 1 { args.src.width - 1 - x } else { x };
    args.dst.write(x, y, args.src.read(sx, y));
}

fn fill(x, y, z, args) {
    args.dst.write(x, y, args.level);
}

fn fail(x, y, z, args) {
    if args.explode == 1 { throw "device lost"; }
    args.dst.write(x, y, args.src.read(x, y));
}

fn scribble(x, y, z, args) {
    args.src.write(x, y, 0);
}
"#;

/// Allocates `dst` like `src` and launches over its extents
pub const COPY_SCRIPT: &str = r#"
outputs.dst = create_like(src);
dimensions = dims(src);
"#;

/// Builder for test node configurations
pub struct NodeConfigBuilder {
    config: KernelNodeConfig,
}

impl NodeConfigBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            config: KernelNodeConfig::new(name).with_kernel(KERNELS, "copy"),
        }
    }

    /// `src` → `dst` copy node
    pub fn identity() -> Self {
        Self::new("identity")
            .input("src")
            .output("dst")
            .script(COPY_SCRIPT)
    }

    pub fn input(mut self, name: &str) -> Self {
        self.config.inputs.push(name.to_string());
        self
    }

    pub fn output(mut self, name: &str) -> Self {
        self.config.outputs.push(name.to_string());
        self
    }

    pub fn param(mut self, name: &str, kind: ParamKind) -> Self {
        self.config.parameters.push(ParameterDecl::new(name, kind));
        self
    }

    pub fn param_value(mut self, name: &str, value: impl Into<ParamValue>) -> Self {
        let value = value.into();
        self.config
            .parameters
            .push(ParameterDecl::new(name, value.kind()).with_value(value));
        self
    }

    pub fn entry_point(mut self, entry: &str) -> Self {
        self.config.entry_point = entry.to_string();
        self
    }

    pub fn kernel(mut self, source: &str) -> Self {
        self.config.kernel_source = source.to_string();
        self
    }

    pub fn script(mut self, script: &str) -> Self {
        self.config.binding_script = script.to_string();
        self
    }

    pub fn build(self) -> KernelNodeConfig {
        self.config
    }
}

/// Builder for input images
pub struct ImageBuilder {
    axes: Vec<usize>,
    pixel_type: PixelType,
    offset: f32,
}

impl ImageBuilder {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            axes: vec![width, height],
            pixel_type: PixelType::UnsignedByte,
            offset: 0.0,
        }
    }

    pub fn pixel_type(mut self, pixel_type: PixelType) -> Self {
        self.pixel_type = pixel_type;
        self
    }

    /// Shift every value, to tell inputs apart
    pub fn offset(mut self, offset: f32) -> Self {
        self.offset = offset;
        self
    }

    /// Buffer holding `linear index + offset` at every element
    pub fn build(self) -> DeviceBuffer {
        let extents = Extents::new(self.axes).unwrap();
        let data = (0..extents.element_count())
            .map(|i| i as f32 + self.offset)
            .collect();
        DeviceBuffer::from_data(extents, self.pixel_type, data).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_builder() {
        let config = NodeConfigBuilder::identity().build();
        assert_eq!(config.inputs, vec!["src"]);
        assert_eq!(config.outputs, vec!["dst"]);
        assert_eq!(config.entry_point, "copy");
    }

    #[test]
    fn test_image_builder() {
        let image = ImageBuilder::new(3, 2).offset(1.0).build();
        assert_eq!(image.to_vec(), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }
}
