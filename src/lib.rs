//! # Kernel Node: scriptable compute-kernel execution
//!
//! A generic pipeline operator that compiles and runs a user-supplied compute
//! kernel whose inputs, outputs and scalar parameters are decided at
//! configuration time. The hard part is binding: mapping an arbitrary set of
//! named data slots and typed parameters onto the argument map a kernel
//! expects, while keeping names collision-free and execution deterministic.
//!
//! ## Architecture
//!
//! - **Parameter Registry**: typed, user-declared scalar parameters
//! - **Slot Catalog**: named input and output data connections
//! - **Binding Script Engine**: a Rhai script, run once per invocation, that
//!   allocates outputs and chooses the launch geometry and entry point
//! - **Kernel Dispatcher**: merges everything into one argument map, runs the
//!   kernel under an exclusive backend lease and publishes the outputs
//! - **Validator**: static checks re-run after every configuration edit
//!
//! The compute backend is an injected collaborator ([`backend::ComputeBackend`])
//! shared through a [`backend::BackendSession`]. [`backend::HostBackend`] is a
//! CPU reference implementation whose kernels are also Rhai scripts.
//!
//! ## Example
//!
//! ```ignore
//! use kernel_node_rs::{
//!     backend::{BackendSession, HostBackend},
//!     node::{KernelNode, KernelNodeConfig},
//! };
//!
//! let config = KernelNodeConfig::new("copy")
//!     .with_kernel(
//!         "fn copy(x, y, z, args) { args.dst.write(x, y, args.src.read(x, y)); }",
//!         "copy",
//!     )
//!     .with_binding_script("outputs.dst = create_like(src); dimensions = dims(src);")
//!     .with_input("src")
//!     .with_output("dst");
//!
//! let node = KernelNode::new(config, BackendSession::new(HostBackend::new()));
//! let invocation = node.invoke_with([("src", image)])?;
//! let dst = invocation.output("dst");
//! ```

pub mod backend;
pub mod error;
pub mod node;
pub mod pipeline;
pub mod scripting;
pub mod types;

pub use backend::{BackendError, BackendSession, ComputeBackend, DeviceBuffer, HostBackend};
pub use error::{ErrorKind, KernelNodeError, Result, ResultExt};
pub use node::{KernelNode, KernelNodeConfig, ParamKind, ParamValue, SlotCatalog};
pub use types::{Extents, PixelType};
