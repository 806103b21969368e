//! Kernel Node - Command Line Entry Point
//!
//! ```text
//! kernel-node validate <node.toml>
//! kernel-node run <node.toml> <W>x<H>[x<D>] [uint8|uint16|float32]
//! ```
//!
//! `run` feeds every input slot a ramp image on the host backend and prints
//! the shape and checksum of each published output.

use anyhow::{bail, Context};
use kernel_node_rs::{
    backend::{BackendSession, DeviceBuffer, HostBackend},
    node::{KernelNode, KernelNodeConfig},
    types::{Extents, PixelType},
};
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const USAGE: &str = "usage:
  kernel-node validate <node.toml|node.json>
  kernel-node run <node.toml|node.json> <W>x<H>[x<D>] [pixel type]";

fn main() -> ExitCode {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,kernel_node_rs=debug")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    match run_cli(&args) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run_cli(args: &[String]) -> anyhow::Result<ExitCode> {
    match args {
        [cmd, path] if cmd == "validate" => validate(path),
        [cmd, path, size] if cmd == "run" => run(path, size, PixelType::default()),
        [cmd, path, size, pixel] if cmd == "run" => {
            let pixel_type = pixel.parse().map_err(anyhow::Error::msg)?;
            run(path, size, pixel_type)
        }
        _ => {
            eprintln!("{}", USAGE);
            Ok(ExitCode::from(2))
        }
    }
}

fn load_node(path: &str) -> anyhow::Result<KernelNode> {
    let config = KernelNodeConfig::load(path)
        .with_context(|| format!("loading node configuration from {}", path))?;
    let session = BackendSession::new(HostBackend::with_limits(config.limits));
    Ok(KernelNode::new(config, session))
}

fn validate(path: &str) -> anyhow::Result<ExitCode> {
    let node = load_node(path)?;
    println!("{}: {}", node.name(), node.report());
    Ok(if node.is_valid() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn run(path: &str, size: &str, pixel_type: PixelType) -> anyhow::Result<ExitCode> {
    let node = load_node(path)?;
    if !node.is_valid() {
        bail!("{} is not valid:\n{}", path, node.report());
    }
    let extents: Extents = size.parse().map_err(anyhow::Error::msg)?;

    let mut slots = node.slots()?;
    let input_names: Vec<String> = slots.inputs().map(|s| s.name().to_string()).collect();
    for (i, name) in input_names.iter().enumerate() {
        let buffer = ramp(&extents, pixel_type, i)?;
        slots.bind_input(name, buffer)?;
    }

    let invocation = node.invoke(slots)?;
    println!(
        "{}: entry point '{}', dimensions {}, global sizes {}",
        node.name(),
        invocation.entry_point,
        invocation.dimensions,
        invocation.global_sizes
    );
    for slot in invocation.slots.outputs() {
        if let Some(buffer) = slot.buffer() {
            let checksum: f64 = buffer.to_vec().iter().map(|&v| v as f64).sum();
            println!(
                "  {} -> {} {} checksum {}",
                slot.name(),
                buffer.extents(),
                buffer.pixel_type(),
                checksum
            );
        }
    }
    Ok(ExitCode::SUCCESS)
}

/// Ramp image `value = (linear index + offset) mod range`, shifted per input
fn ramp(extents: &Extents, pixel_type: PixelType, offset: usize) -> anyhow::Result<DeviceBuffer> {
    let range = match pixel_type {
        PixelType::UnsignedByte => 256,
        PixelType::UnsignedShort => 65536,
        PixelType::Float32 => extents.element_count().max(1),
    };
    let data = (0..extents.element_count())
        .map(|i| ((i + offset) % range) as f32)
        .collect();
    Ok(DeviceBuffer::from_data(extents.clone(), pixel_type, data)?)
}
