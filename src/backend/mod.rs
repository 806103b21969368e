//! Compute backend interface.
//!
//! The node never talks to a GPU API directly. Everything it needs from the
//! compute backend is captured by [`ComputeBackend`]:
//!
//! - allocate a buffer (from explicit extents, or shaped like another buffer)
//! - read a buffer's dimensions
//! - compile and run a named kernel entry point with an argument map over a
//!   launch domain
//!
//! Backends are shared through a [`BackendSession`], an explicit handle that is
//! passed into the dispatcher at construction. The session serializes
//! [`ComputeBackend::execute`] calls because backends are not assumed reentrant.
//!
//! [`HostBackend`] is a CPU reference implementation whose kernel language is
//! Rhai; it is used by the CLI, the benches and the test suite.

pub mod buffer;
pub mod host;
pub mod session;

pub use buffer::{BufferId, DeviceBuffer};
pub use host::HostBackend;
pub use session::{BackendLease, BackendSession};

use crate::types::{Extents, PixelType};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Errors reported by a compute backend
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    /// The kernel source failed to compile
    #[error("Kernel compilation failed: {0}")]
    Compile(String),

    /// The requested entry point does not exist in the kernel source
    #[error("Kernel entry point '{0}' not found")]
    EntryPointNotFound(String),

    /// An argument could not be bound to the kernel
    #[error("Invalid kernel argument: {0}")]
    InvalidArgument(String),

    /// The kernel failed while running
    #[error("Kernel launch failed: {0}")]
    Launch(String),

    /// A buffer could not be allocated
    #[error("Buffer allocation failed: {0}")]
    Allocation(String),

    /// A kernel attempted to write through a read-only handle
    #[error("Buffer {0} is read-only")]
    ReadOnlyBuffer(BufferId),
}

impl BackendError {
    /// Whether the failure happened before any work item ran
    pub fn is_compile_time(&self) -> bool {
        matches!(
            self,
            BackendError::Compile(_) | BackendError::EntryPointNotFound(_)
        )
    }
}

pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// A single value in the merged kernel argument map
#[derive(Debug, Clone)]
pub enum KernelArg {
    Int(i64),
    Float(f64),
    Str(String),
    Buffer(DeviceBuffer),
}

impl KernelArg {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            KernelArg::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            KernelArg::Float(v) => Some(*v),
            KernelArg::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_buffer(&self) -> Option<&DeviceBuffer> {
        match self {
            KernelArg::Buffer(b) => Some(b),
            _ => None,
        }
    }

    /// Short type label for diagnostics
    pub fn type_name(&self) -> &'static str {
        match self {
            KernelArg::Int(_) => "int",
            KernelArg::Float(_) => "float",
            KernelArg::Str(_) => "string",
            KernelArg::Buffer(_) => "buffer",
        }
    }
}

impl fmt::Display for KernelArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelArg::Int(v) => write!(f, "{}", v),
            KernelArg::Float(v) => write!(f, "{}", v),
            KernelArg::Str(v) => write!(f, "{:?}", v),
            KernelArg::Buffer(b) => write!(f, "buffer {} ({})", b.id(), b.extents()),
        }
    }
}

/// Name → value map handed to the backend. Ordered so launches are reproducible.
pub type ArgumentMap = BTreeMap<String, KernelArg>;

/// Everything the backend needs to run one kernel
#[derive(Debug, Clone)]
pub struct KernelLaunch {
    /// Kernel source text, passed through unmodified
    pub source: Arc<str>,
    /// Function inside `source` to launch
    pub entry_point: String,
    /// Buffer/domain dimensions
    pub dimensions: Extents,
    /// Extents over which the kernel is invoked
    pub global_sizes: Extents,
    pub arguments: ArgumentMap,
}

/// The compute backend collaborator.
pub trait ComputeBackend: Send {
    /// Human-readable backend name
    fn name(&self) -> &str;

    /// Allocate a zero-filled buffer
    fn create_buffer(&mut self, extents: &Extents, pixel_type: PixelType)
        -> BackendResult<DeviceBuffer>;

    /// Allocate a buffer with the same shape and pixel type as `template`
    fn create_like(&mut self, template: &DeviceBuffer) -> BackendResult<DeviceBuffer> {
        let extents = self.dimensions(template);
        self.create_buffer(&extents, template.pixel_type())
    }

    /// Read a buffer's dimensions
    fn dimensions(&self, buffer: &DeviceBuffer) -> Extents {
        buffer.extents().clone()
    }

    /// Drop any compiled form of `source` held by the backend
    fn release_kernel(&mut self, _source: &str) {}

    /// Compile (or fetch from cache) and run a kernel to completion
    fn execute(&mut self, launch: &KernelLaunch) -> BackendResult<()>;
}
