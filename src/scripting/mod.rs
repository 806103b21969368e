//! Rhai scripting support shared by binding scripts and host kernels
//!
//! Both script flavours run on a Rhai [`Engine`] configured by
//! [`configure_engine`], which applies [`ScriptLimits`] and registers the
//! buffer API below. Compiled scripts are memoized per source text in a
//! [`ScriptCache`].
//!
//! ## Buffer API
//!
//! Device buffers appear in scripts as values of type `Buffer`:
//!
//! - `buf.width`, `buf.height`, `buf.depth` - Extents (missing axes read as 1)
//! - `buf.pixel_type` - `"uint8"`, `"uint16"` or `"float32"`
//! - `buf.len` - Number of elements
//! - `dims(buf)` - Extents as an array, e.g. `[512, 512]`, answered by the
//!   backend (registered by each engine's owner, not here)
//! - `buf.read(x)`, `buf.read(x, y)`, `buf.read(x, y, z)` - Element value as float
//! - `buf.write(x, v)`, `buf.write(x, y, v)`, `buf.write(x, y, z, v)` - Store a
//!   value, coerced to the pixel type; fails on read-only buffers
//!
//! ## Helper Functions
//!
//! - `clamp(x, min, max)`, `lerp(a, b, t)`, `map_range(x, in_min, in_max, out_min, out_max)`
//! - `to_float(i)`, `to_int(f)`
//!
//! ## Example
//!
//! ```rhai
//! // Binding script: allocate the output like the input and launch over it
//! outputs.dst = create_like(src);
//! dimensions = dims(src);
//! global_sizes = dimensions;
//! ```

mod buffer_api;

pub use buffer_api::{
    backend_error_of, describe_script_error, dims_array, raise_backend_error,
    raise_session_error, register_buffer_api, session_error_of,
};

use crate::error::{KernelNodeError, Result};
use rhai::{Engine, AST};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Resource limits applied to a Rhai engine.
///
/// The defaults leave the operation count unbounded: a script or host kernel
/// that never terminates blocks its invocation. Set `max_operations` to
/// opt into a bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptLimits {
    /// Maximum operations per evaluation (0 = unbounded)
    pub max_operations: u64,
    /// Maximum function call nesting
    pub max_call_levels: usize,
    /// Maximum expression nesting depth
    pub max_expr_depth: usize,
}

impl Default for ScriptLimits {
    fn default() -> Self {
        Self {
            max_operations: 0,
            max_call_levels: 32,
            max_expr_depth: 64,
        }
    }
}

/// Apply limits and register the shared buffer API and helpers
pub fn configure_engine(engine: &mut Engine, limits: &ScriptLimits) {
    engine.set_max_expr_depths(limits.max_expr_depth, limits.max_expr_depth);
    engine.set_max_call_levels(limits.max_call_levels);
    engine.set_max_operations(limits.max_operations);

    register_buffer_api(engine);

    // Bounds are accepted in either order.
    engine.register_fn("clamp", |x: f64, a: f64, b: f64| x.max(a.min(b)).min(a.max(b)));
    engine.register_fn("clamp", |x: i64, a: i64, b: i64| x.max(a.min(b)).min(a.max(b)));
    engine.register_fn("lerp", |a: f64, b: f64, t: f64| a + (b - a) * t);
    engine.register_fn(
        "map_range",
        |x: f64, in_min: f64, in_max: f64, out_min: f64, out_max: f64| {
            (x - in_min) * (out_max - out_min) / (in_max - in_min) + out_min
        },
    );
    engine.register_fn("to_int", |x: f64| x as i64);
    engine.register_fn("to_float", |x: i64| x as f64);
}

/// Cache for compiled scripts to avoid recompilation
#[derive(Default)]
pub struct ScriptCache {
    /// Map from script source to compiled AST
    cache: HashMap<String, Arc<AST>>,
}

impl ScriptCache {
    /// Create a new empty cache
    pub fn new() -> Self {
        Self {
            cache: HashMap::new(),
        }
    }

    /// Get a cached AST or compile and cache it
    pub fn get_or_compile(&mut self, engine: &Engine, source: &str) -> Result<Arc<AST>> {
        if let Some(ast) = self.cache.get(source) {
            return Ok(Arc::clone(ast));
        }

        let ast = Arc::new(engine.compile(source).map_err(KernelNodeError::from)?);
        self.cache.insert(source.to_string(), Arc::clone(&ast));
        Ok(ast)
    }

    /// Number of cached scripts
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Remove a specific script from the cache
    pub fn invalidate(&mut self, source: &str) {
        self.cache.remove(source);
    }
}

/// Thread-safe script cache wrapper
pub type SharedScriptCache = Arc<RwLock<ScriptCache>>;

/// Create a new shared script cache
pub fn create_shared_cache() -> SharedScriptCache {
    Arc::new(RwLock::new(ScriptCache::new()))
}

/// Whether `name` can be used as a Rhai variable name
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c == '_' || c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    name != "_"
        && chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
        && !is_rhai_keyword(name)
}

fn is_rhai_keyword(name: &str) -> bool {
    matches!(
        name,
        "true"
            | "false"
            | "let"
            | "const"
            | "if"
            | "else"
            | "switch"
            | "do"
            | "while"
            | "until"
            | "loop"
            | "for"
            | "in"
            | "continue"
            | "break"
            | "return"
            | "throw"
            | "try"
            | "catch"
            | "fn"
            | "private"
            | "import"
            | "export"
            | "as"
            | "global"
            | "this"
            | "is"
            | "Fn"
            | "call"
            | "curry"
            | "type_of"
            | "print"
            | "debug"
            | "eval"
            | "is_def_var"
            | "is_def_fn"
            | "is_shared"
    )
}
