//! Binding Script Engine.
//!
//! The binding script runs once per invocation, before dispatch, and decides
//! the shape of the launch. Its environment is a fixed, documented contract.
//!
//! ## Provided to the script
//!
//! - `inputs` - Map of input slot name to buffer (read-only views)
//! - each input by its own name, when the name is a script identifier
//! - `params` - Map of parameter name to value (booleans stay booleans here)
//! - each parameter by its own name, when the name is a script identifier
//! - `output_names` - Array of declared output slot names
//! - `create_like(buf)`, `create_like(buf, pixel_type)`, `create(dims, pixel_type)`
//!   - allocate zero-filled buffers on the node's backend
//! - `dims(buf)` - the buffer's dimensions as reported by the backend
//!
//! ## Read back after the script
//!
//! - `outputs` - Map covering every declared output slot with a writable buffer
//! - `dimensions` - Array of 1 to 3 positive integers (required)
//! - `global_sizes` - Same shape as `dimensions`; left empty, it defaults to `dimensions`
//! - `entry_point` - Optional string overriding the configured entry point
//!
//! ## Example
//!
//! ```rhai
//! for name in output_names {
//!     outputs[name] = create_like(src, "float32");
//! }
//! dimensions = dims(src);
//! if params.flipX { entry_point = "flip_x"; }
//! ```

use crate::backend::session::panic_message;
use crate::backend::{BackendResult, BackendSession, ComputeBackend, DeviceBuffer};
use crate::error::{KernelNodeError, Result};
use crate::node::params::ParamValue;
use crate::node::validator::RESERVED_NAMES;
use crate::scripting::{
    backend_error_of, configure_engine, create_shared_cache, describe_script_error, dims_array,
    is_identifier, raise_backend_error, raise_session_error, session_error_of, ScriptLimits,
    SharedScriptCache,
};
use crate::types::{Extents, PixelType};
use rhai::{Array, Dynamic, Engine, EvalAltResult, Map, Scope};
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};

type ScriptResult<T> = std::result::Result<T, Box<EvalAltResult>>;

/// Read-only context handed to the binding script
#[derive(Debug, Clone, Default)]
pub struct BindingInputs {
    /// Bound input buffers by slot name
    pub inputs: BTreeMap<String, DeviceBuffer>,
    /// Resolved parameter values in declaration order
    pub params: Vec<(String, ParamValue)>,
    /// Declared output slot names in declaration order
    pub output_names: Vec<String>,
}

/// What the binding script decided for one invocation
#[derive(Debug, Clone)]
pub struct BindingPlan {
    pub outputs: BTreeMap<String, DeviceBuffer>,
    pub dimensions: Extents,
    pub global_sizes: Extents,
    /// Entry point chosen by the script, if it overrode the default
    pub entry_point: Option<String>,
}

/// Runs binding scripts against a backend session
pub struct BindingScriptEngine {
    engine: Engine,
    cache: SharedScriptCache,
}

impl BindingScriptEngine {
    pub fn new(session: BackendSession, limits: &ScriptLimits) -> Self {
        let mut engine = Engine::new();
        configure_engine(&mut engine, limits);
        register_backend_api(&mut engine, session);
        Self {
            engine,
            cache: create_shared_cache(),
        }
    }

    /// Run `script` and check its results against the declared outputs
    pub fn run(&self, script: &str, context: &BindingInputs) -> Result<BindingPlan> {
        let ast = {
            let mut cache = self.cache.write().map_err(|_| {
                KernelNodeError::Script("binding script cache lock poisoned".to_string())
            })?;
            cache.get_or_compile(&self.engine, script)?
        };

        let mut scope = build_scope(context);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.engine.run_ast_with_scope(&mut scope, &ast)
        }));
        match outcome {
            Ok(result) => result.map_err(|err| script_failure(&err))?,
            Err(payload) => {
                return Err(KernelNodeError::Script(format!(
                    "binding script panicked: {}",
                    panic_message(payload.as_ref())
                )))
            }
        }

        read_plan(&scope, context)
    }

    /// Drop the compiled form of `script`
    pub fn forget(&self, script: &str) {
        if let Ok(mut cache) = self.cache.write() {
            cache.invalidate(script);
        }
    }

    /// Number of compiled scripts held
    pub fn cached_scripts(&self) -> usize {
        self.cache.read().map(|c| c.len()).unwrap_or(0)
    }
}

fn script_failure(err: &EvalAltResult) -> KernelNodeError {
    if let Some(backend) = backend_error_of(err) {
        return KernelNodeError::Backend(backend);
    }
    match session_error_of(err) {
        Some(message) => KernelNodeError::Session(message),
        None => KernelNodeError::Script(describe_script_error(err)),
    }
}

fn register_backend_api(engine: &mut Engine, session: BackendSession) {
    let s = session.clone();
    engine.register_fn("dims", move |buffer: DeviceBuffer| -> ScriptResult<Array> {
        let extents = s.call(|backend| Ok(backend.dimensions(&buffer))).map_err(raise)?;
        Ok(dims_array(&extents))
    });

    let s = session.clone();
    engine.register_fn("create_like", move |template: DeviceBuffer| {
        allocate(&s, |backend| backend.create_like(&template))
    });

    let s = session.clone();
    engine.register_fn(
        "create_like",
        move |template: DeviceBuffer, pixel_type: &str| -> ScriptResult<DeviceBuffer> {
            let pixel_type = parse_pixel_type(pixel_type)?;
            let extents = template.extents().clone();
            allocate(&s, |backend| backend.create_buffer(&extents, pixel_type))
        },
    );

    engine.register_fn(
        "create",
        move |dims: Array, pixel_type: &str| -> ScriptResult<DeviceBuffer> {
            let pixel_type = parse_pixel_type(pixel_type)?;
            let extents = extents_from_array(&dims, "create")?;
            allocate(&session, |backend| backend.create_buffer(&extents, pixel_type))
        },
    );
}

fn allocate<F>(session: &BackendSession, f: F) -> ScriptResult<DeviceBuffer>
where
    F: FnOnce(&mut dyn ComputeBackend) -> BackendResult<DeviceBuffer>,
{
    session.call(f).map_err(raise)
}

/// Carry a node error through the script with its category intact
fn raise(err: KernelNodeError) -> Box<EvalAltResult> {
    match err {
        KernelNodeError::Backend(backend) => raise_backend_error(backend),
        KernelNodeError::Session(message) => raise_session_error(message),
        other => other.to_string().into(),
    }
}

fn parse_pixel_type(name: &str) -> ScriptResult<PixelType> {
    name.parse::<PixelType>().map_err(|e| e.into())
}

fn extents_from_array(values: &Array, what: &str) -> std::result::Result<Extents, String> {
    let axes = values
        .iter()
        .map(|v| {
            v.as_int()
                .map_err(|t| format!("{}: extents must be integers, found {}", what, t))
        })
        .collect::<std::result::Result<Vec<i64>, String>>()?;
    Extents::from_signed(&axes).map_err(|e| format!("{}: {}", what, e))
}

fn build_scope(context: &BindingInputs) -> Scope<'static> {
    let mut scope = Scope::new();

    let mut inputs = Map::new();
    for (name, buffer) in &context.inputs {
        let view = buffer.read_only();
        if injectable(name) {
            scope.push(name.clone(), view.clone());
        }
        inputs.insert(name.as_str().into(), Dynamic::from(view));
    }
    scope.push("inputs", inputs);

    let mut params = Map::new();
    for (name, value) in &context.params {
        if injectable(name) {
            scope.push_dynamic(name.clone(), value.to_dynamic());
        }
        params.insert(name.as_str().into(), value.to_dynamic());
    }
    scope.push("params", params);

    let output_names: Array = context
        .output_names
        .iter()
        .map(|n| Dynamic::from(n.clone()))
        .collect();
    scope.push("output_names", output_names);

    scope.push("outputs", Map::new());
    scope.push("dimensions", Array::new());
    scope.push("global_sizes", Array::new());
    scope.push("entry_point", ());
    scope
}

fn injectable(name: &str) -> bool {
    is_identifier(name) && !RESERVED_NAMES.contains(&name)
}

fn config_error(message: impl Into<String>) -> KernelNodeError {
    KernelNodeError::Config(message.into())
}

fn read_plan(scope: &Scope, context: &BindingInputs) -> Result<BindingPlan> {
    let outputs = read_outputs(scope, context)?;

    let dimensions = read_extents(scope, "dimensions")?
        .ok_or_else(|| config_error("Binding script did not set `dimensions`"))?;
    let global_sizes = read_extents(scope, "global_sizes")?.unwrap_or_else(|| dimensions.clone());

    let entry_point = match scope.get_value::<Dynamic>("entry_point") {
        None => None,
        Some(value) if value.is_unit() => None,
        Some(value) => {
            let type_name = value.type_name();
            let name = value.into_string().map_err(|_| {
                config_error(format!("`entry_point` must be a string, found {}", type_name))
            })?;
            if name.trim().is_empty() {
                return Err(config_error("`entry_point` override is empty"));
            }
            Some(name)
        }
    };

    Ok(BindingPlan {
        outputs,
        dimensions,
        global_sizes,
        entry_point,
    })
}

fn read_outputs(scope: &Scope, context: &BindingInputs) -> Result<BTreeMap<String, DeviceBuffer>> {
    let map = scope
        .get_value::<Dynamic>("outputs")
        .and_then(|v| v.try_cast::<Map>())
        .ok_or_else(|| config_error("Binding script replaced `outputs` with a non-map value"))?;

    let mut outputs = BTreeMap::new();
    for (key, value) in map {
        let name = key.to_string();
        if !context.output_names.contains(&name) {
            return Err(config_error(format!(
                "Binding script produced a buffer for '{}', which is not a declared output slot",
                name
            )));
        }
        let type_name = value.type_name();
        let buffer = value.try_cast::<DeviceBuffer>().ok_or_else(|| {
            config_error(format!(
                "Output '{}' must be a buffer, found {}",
                name, type_name
            ))
        })?;
        if !buffer.is_writable() {
            return Err(config_error(format!(
                "Output '{}' refers to read-only buffer {}; allocate it with create_like",
                name,
                buffer.id()
            )));
        }
        outputs.insert(name, buffer);
    }

    for name in &context.output_names {
        if !outputs.contains_key(name) {
            return Err(config_error(format!(
                "Binding script did not produce a buffer for output slot '{}'",
                name
            )));
        }
    }
    Ok(outputs)
}

fn read_extents(scope: &Scope, var: &str) -> Result<Option<Extents>> {
    let value = match scope.get_value::<Dynamic>(var) {
        Some(value) => value,
        None => return Ok(None),
    };
    let type_name = value.type_name();
    let array = value
        .try_cast::<Array>()
        .ok_or_else(|| config_error(format!("`{}` must be an array, found {}", var, type_name)))?;
    if array.is_empty() {
        return Ok(None);
    }
    extents_from_array(&array, var)
        .map(Some)
        .map_err(|e| config_error(e))
}
