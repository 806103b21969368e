//! Registration of the `Buffer` type and its accessors.

use crate::backend::{BackendError, DeviceBuffer};
use crate::types::Extents;
use rhai::{Array, Dynamic, Engine, EvalAltResult, Position};

type ScriptResult<T> = Result<T, Box<EvalAltResult>>;

fn index(value: i64, axis: &str) -> ScriptResult<usize> {
    if value < 0 {
        Err(format!("negative {} coordinate {}", axis, value).into())
    } else {
        Ok(value as usize)
    }
}

fn read(buf: &DeviceBuffer, x: i64, y: i64, z: i64) -> ScriptResult<f64> {
    let (x, y, z) = (index(x, "x")?, index(y, "y")?, index(z, "z")?);
    buf.get(x, y, z).map(|v| v as f64).ok_or_else(|| {
        format!(
            "read at ({}, {}, {}) is outside buffer {} of size {}",
            x,
            y,
            z,
            buf.id(),
            buf.extents()
        )
        .into()
    })
}

fn write(buf: &DeviceBuffer, x: i64, y: i64, z: i64, value: f64) -> ScriptResult<()> {
    let (x, y, z) = (index(x, "x")?, index(y, "y")?, index(z, "z")?);
    buf.set(x, y, z, value).map_err(raise_backend_error)
}

/// Raise a backend error inside a script, keeping it as the error payload so
/// the host can recover the typed error with [`backend_error_of`].
pub fn raise_backend_error(err: BackendError) -> Box<EvalAltResult> {
    Box::new(EvalAltResult::ErrorRuntime(Dynamic::from(err), Position::NONE))
}

/// Find a [`BackendError`] raised by [`raise_backend_error`], looking through
/// function-call wrappers.
pub fn backend_error_of(err: &EvalAltResult) -> Option<BackendError> {
    payload_of(err)
}

/// Backend session failure carried through a script
#[derive(Debug, Clone)]
struct SessionFault(String);

/// Raise a session failure inside a script, recoverable with [`session_error_of`]
pub fn raise_session_error(message: String) -> Box<EvalAltResult> {
    Box::new(EvalAltResult::ErrorRuntime(
        Dynamic::from(SessionFault(message)),
        Position::NONE,
    ))
}

/// Message of a session failure raised by [`raise_session_error`]
pub fn session_error_of(err: &EvalAltResult) -> Option<String> {
    payload_of::<SessionFault>(err).map(|fault| fault.0)
}

fn payload_of<T: Clone + Send + Sync + 'static>(err: &EvalAltResult) -> Option<T> {
    match err {
        EvalAltResult::ErrorRuntime(payload, _) => payload.clone().try_cast::<T>(),
        EvalAltResult::ErrorInFunctionCall(_, _, inner, _) => payload_of(inner),
        _ => None,
    }
}

/// Render a script error, preferring the message of an embedded backend error
pub fn describe_script_error(err: &EvalAltResult) -> String {
    if let Some(backend) = backend_error_of(err) {
        return backend.to_string();
    }
    match session_error_of(err) {
        Some(message) => message,
        None => err.to_string(),
    }
}

/// Extents as a Rhai array of integers
pub fn dims_array(extents: &Extents) -> Array {
    extents
        .as_slice()
        .iter()
        .map(|&axis| Dynamic::from(axis as i64))
        .collect()
}

/// Register `Buffer` with its properties and the read/write methods
pub fn register_buffer_api(engine: &mut Engine) {
    engine.register_type_with_name::<DeviceBuffer>("Buffer");

    engine.register_get("width", |b: &mut DeviceBuffer| b.extents().width() as i64);
    engine.register_get("height", |b: &mut DeviceBuffer| b.extents().height() as i64);
    engine.register_get("depth", |b: &mut DeviceBuffer| b.extents().depth() as i64);
    engine.register_get("len", |b: &mut DeviceBuffer| b.len() as i64);
    engine.register_get("pixel_type", |b: &mut DeviceBuffer| {
        b.pixel_type().as_str().to_string()
    });
    engine.register_fn("to_string", |b: &mut DeviceBuffer| {
        format!("Buffer({}, {}, {})", b.id(), b.extents(), b.pixel_type())
    });

    engine.register_fn("read", |b: &mut DeviceBuffer, x: i64| read(b, x, 0, 0));
    engine.register_fn("read", |b: &mut DeviceBuffer, x: i64, y: i64| read(b, x, y, 0));
    engine.register_fn("read", |b: &mut DeviceBuffer, x: i64, y: i64, z: i64| {
        read(b, x, y, z)
    });

    engine.register_fn("write", |b: &mut DeviceBuffer, x: i64, v: f64| write(b, x, 0, 0, v));
    engine.register_fn("write", |b: &mut DeviceBuffer, x: i64, v: i64| {
        write(b, x, 0, 0, v as f64)
    });
    engine.register_fn("write", |b: &mut DeviceBuffer, x: i64, y: i64, v: f64| {
        write(b, x, y, 0, v)
    });
    engine.register_fn("write", |b: &mut DeviceBuffer, x: i64, y: i64, v: i64| {
        write(b, x, y, 0, v as f64)
    });
    engine.register_fn(
        "write",
        |b: &mut DeviceBuffer, x: i64, y: i64, z: i64, v: f64| write(b, x, y, z, v),
    );
    engine.register_fn(
        "write",
        |b: &mut DeviceBuffer, x: i64, y: i64, z: i64, v: i64| write(b, x, y, z, v as f64),
    );
}
