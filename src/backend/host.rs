//! CPU reference backend.
//!
//! Kernels for the host backend are Rhai scripts. The entry point must take
//! four parameters and is called once per work item:
//!
//! ```rhai
//! fn copy(x, y, z, args) {
//!     args.dst.write(x, y, args.src.read(x, y));
//! }
//! ```
//!
//! `args` is a map holding the merged kernel arguments. Input buffers arrive as
//! read-only views, so a kernel that writes to one fails with
//! [`BackendError::ReadOnlyBuffer`].

use crate::backend::{
    ArgumentMap, BackendError, BackendResult, ComputeBackend, DeviceBuffer, KernelArg,
    KernelLaunch,
};
use crate::error::KernelNodeError;
use crate::scripting::{
    backend_error_of, configure_engine, describe_script_error, dims_array, ScriptCache,
    ScriptLimits,
};
use crate::types::{Extents, PixelType};
use rhai::{CallFnOptions, Dynamic, Engine, Map, Scope, AST};
use std::sync::Arc;

/// Number of parameters a host kernel entry point takes: `(x, y, z, args)`
const ENTRY_ARITY: usize = 4;

/// Largest buffer the host backend allocates, in elements (1 GiB of `f32`)
pub const MAX_HOST_ELEMENTS: usize = 1 << 28;

/// Runs Rhai kernels on the calling thread
pub struct HostBackend {
    engine: Engine,
    kernels: ScriptCache,
    launches: u64,
}

impl HostBackend {
    pub fn new() -> Self {
        Self::with_limits(ScriptLimits::default())
    }

    /// Create a backend whose kernel engine applies `limits`
    pub fn with_limits(limits: ScriptLimits) -> Self {
        let mut engine = Engine::new();
        configure_engine(&mut engine, &limits);
        engine.register_fn("dims", |b: &mut DeviceBuffer| dims_array(b.extents()));
        Self {
            engine,
            kernels: ScriptCache::new(),
            launches: 0,
        }
    }

    /// Number of kernels launched so far
    pub fn launch_count(&self) -> u64 {
        self.launches
    }

    /// Number of distinct kernel sources compiled
    pub fn cached_kernels(&self) -> usize {
        self.kernels.len()
    }

    fn compile(&mut self, source: &str) -> BackendResult<Arc<AST>> {
        self.kernels
            .get_or_compile(&self.engine, source)
            .map_err(|err| match err {
                KernelNodeError::Script(msg) => BackendError::Compile(msg),
                other => BackendError::Compile(other.to_string()),
            })
    }
}

impl Default for HostBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn find_entry_point(ast: &AST, name: &str) -> BackendResult<()> {
    let arities: Vec<usize> = ast
        .iter_functions()
        .filter(|f| f.name == name)
        .map(|f| f.params.len())
        .collect();

    if arities.contains(&ENTRY_ARITY) {
        return Ok(());
    }
    match arities.first() {
        Some(n) => Err(BackendError::InvalidArgument(format!(
            "entry point '{}' takes {} parameters, expected (x, y, z, args)",
            name, n
        ))),
        None => Err(BackendError::EntryPointNotFound(name.to_string())),
    }
}

fn to_script_args(arguments: &ArgumentMap) -> Map {
    arguments
        .iter()
        .map(|(name, arg)| {
            let value = match arg {
                KernelArg::Int(v) => Dynamic::from(*v),
                KernelArg::Float(v) => Dynamic::from(*v),
                KernelArg::Str(v) => Dynamic::from(v.clone()),
                KernelArg::Buffer(b) => Dynamic::from(b.clone()),
            };
            (name.as_str().into(), value)
        })
        .collect()
}

impl ComputeBackend for HostBackend {
    fn name(&self) -> &str {
        "host"
    }

    fn create_buffer(
        &mut self,
        extents: &Extents,
        pixel_type: PixelType,
    ) -> BackendResult<DeviceBuffer> {
        if extents.element_count() > MAX_HOST_ELEMENTS {
            return Err(BackendError::Allocation(format!(
                "{} buffer of {} exceeds the host limit of {} elements",
                pixel_type, extents, MAX_HOST_ELEMENTS
            )));
        }
        DeviceBuffer::try_zeroed(extents.clone(), pixel_type)
    }

    fn release_kernel(&mut self, source: &str) {
        self.kernels.invalidate(source);
    }

    fn execute(&mut self, launch: &KernelLaunch) -> BackendResult<()> {
        let ast = self.compile(&launch.source)?;
        find_entry_point(&ast, &launch.entry_point)?;

        let args = to_script_args(&launch.arguments);
        let sizes = &launch.global_sizes;
        let mut scope = Scope::new();

        tracing::trace!(
            entry = %launch.entry_point,
            global_sizes = %sizes,
            args = launch.arguments.len(),
            "host kernel launch"
        );

        for z in 0..sizes.depth() {
            for y in 0..sizes.height() {
                for x in 0..sizes.width() {
                    self.engine
                        .call_fn_with_options::<Dynamic>(
                            CallFnOptions::new().eval_ast(false).rewind_scope(true),
                            &mut scope,
                            &ast,
                            &launch.entry_point,
                            (x as i64, y as i64, z as i64, args.clone()),
                        )
                        .map_err(|err| {
                            backend_error_of(&err).unwrap_or_else(|| {
                                BackendError::Launch(format!(
                                    "work item ({}, {}, {}): {}",
                                    x,
                                    y,
                                    z,
                                    describe_script_error(&err)
                                ))
                            })
                        })?;
                }
            }
        }

        self.launches += 1;
        Ok(())
    }
}
