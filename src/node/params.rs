//! Parameter Registry.
//!
//! Parameters are user-declared, typed scalar values. They are edited as
//! configuration, read by the binding script through the `params` map, and
//! bound into the kernel argument map with booleans coerced to `1`/`0`.

use crate::backend::KernelArg;
use crate::error::{KernelNodeError, Result};
use rhai::Dynamic;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Declared type of a parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    Integer,
    Float,
    Boolean,
    String,
}

impl ParamKind {
    /// Value reported for a declared parameter that was never assigned
    pub fn zero_value(&self) -> ParamValue {
        match self {
            ParamKind::Integer => ParamValue::Integer(0),
            ParamKind::Float => ParamValue::Float(0.0),
            ParamKind::Boolean => ParamValue::Boolean(false),
            ParamKind::String => ParamValue::String(String::new()),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ParamKind::Integer => "integer",
            ParamKind::Float => "float",
            ParamKind::Boolean => "boolean",
            ParamKind::String => "string",
        }
    }

    /// Check `value` against this kind. Integers widen to floats; nothing else converts.
    pub fn accept(&self, value: ParamValue) -> std::result::Result<ParamValue, ParamValue> {
        match (self, value) {
            (ParamKind::Integer, v @ ParamValue::Integer(_)) => Ok(v),
            (ParamKind::Float, v @ ParamValue::Float(_)) => Ok(v),
            (ParamKind::Float, ParamValue::Integer(i)) => Ok(ParamValue::Float(i as f64)),
            (ParamKind::Boolean, v @ ParamValue::Boolean(_)) => Ok(v),
            (ParamKind::String, v @ ParamValue::String(_)) => Ok(v),
            (_, other) => Err(other),
        }
    }
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ParamKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "integer" | "int" | "i64" => Ok(ParamKind::Integer),
            "float" | "number" | "f64" => Ok(ParamKind::Float),
            "boolean" | "bool" => Ok(ParamKind::Boolean),
            "string" | "str" => Ok(ParamKind::String),
            other => Err(format!("unknown parameter kind '{}'", other)),
        }
    }
}

/// Concrete parameter value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

impl ParamValue {
    pub fn kind(&self) -> ParamKind {
        match self {
            ParamValue::Boolean(_) => ParamKind::Boolean,
            ParamValue::Integer(_) => ParamKind::Integer,
            ParamValue::Float(_) => ParamKind::Float,
            ParamValue::String(_) => ParamKind::String,
        }
    }

    /// Kernel argument form; booleans follow the backend's 0/1 integer convention
    pub fn to_kernel_arg(&self) -> KernelArg {
        match self {
            ParamValue::Boolean(b) => KernelArg::Int(i64::from(*b)),
            ParamValue::Integer(i) => KernelArg::Int(*i),
            ParamValue::Float(f) => KernelArg::Float(*f),
            ParamValue::String(s) => KernelArg::Str(s.clone()),
        }
    }

    /// Script form; booleans stay booleans
    pub fn to_dynamic(&self) -> Dynamic {
        match self {
            ParamValue::Boolean(b) => Dynamic::from(*b),
            ParamValue::Integer(i) => Dynamic::from(*i),
            ParamValue::Float(f) => Dynamic::from(*f),
            ParamValue::String(s) => Dynamic::from(s.clone()),
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Boolean(b) => write!(f, "{}", b),
            ParamValue::Integer(i) => write!(f, "{}", i),
            ParamValue::Float(v) => write!(f, "{}", v),
            ParamValue::String(s) => write!(f, "{:?}", s),
        }
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Boolean(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Integer(v)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::String(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        ParamValue::String(v)
    }
}

/// Serialized parameter declaration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDecl {
    pub name: String,
    pub kind: ParamKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<ParamValue>,
}

impl ParameterDecl {
    pub fn new(name: impl Into<String>, kind: ParamKind) -> Self {
        Self {
            name: name.into(),
            kind,
            value: None,
        }
    }

    pub fn with_value(mut self, value: impl Into<ParamValue>) -> Self {
        self.value = Some(value.into());
        self
    }
}

/// A declared parameter
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    name: String,
    kind: ParamKind,
    value: Option<ParamValue>,
}

impl Parameter {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ParamKind {
        self.kind
    }

    /// Whether a value was ever assigned
    pub fn is_set(&self) -> bool {
        self.value.is_some()
    }

    /// Current value, or the kind's zero value when unset
    pub fn value(&self) -> ParamValue {
        self.value
            .clone()
            .unwrap_or_else(|| self.kind.zero_value())
    }
}

/// Ordered, name-unique set of parameters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterRegistry {
    params: Vec<Parameter>,
}

impl ParameterRegistry {
    pub fn new() -> Self {
        Self { params: Vec::new() }
    }

    /// Build a registry from declarations, applying declared values
    pub fn from_decls(decls: &[ParameterDecl]) -> Result<Self> {
        let mut registry = Self::new();
        for decl in decls {
            registry.declare(&decl.name, decl.kind)?;
            if let Some(value) = &decl.value {
                registry.set(&decl.name, value.clone())?;
            }
        }
        Ok(registry)
    }

    pub fn to_decls(&self) -> Vec<ParameterDecl> {
        self.params
            .iter()
            .map(|p| ParameterDecl {
                name: p.name.clone(),
                kind: p.kind,
                value: p.value.clone(),
            })
            .collect()
    }

    /// Declare a new parameter. Fails if the name is empty or already declared.
    pub fn declare(&mut self, name: &str, kind: ParamKind) -> Result<&Parameter> {
        if name.is_empty() {
            return Err(KernelNodeError::Config(
                "Parameter names must not be empty".to_string(),
            ));
        }
        if self.contains(name) {
            return Err(KernelNodeError::Config(format!(
                "Parameter '{}' is already declared",
                name
            )));
        }
        tracing::debug!(param = name, kind = %kind, "parameter declared");
        self.params.push(Parameter {
            name: name.to_string(),
            kind,
            value: None,
        });
        Ok(&self.params[self.params.len() - 1])
    }

    /// Assign a value, type-checked against the declared kind
    pub fn set(&mut self, name: &str, value: impl Into<ParamValue>) -> Result<()> {
        let param = self
            .params
            .iter_mut()
            .find(|p| p.name == name)
            .ok_or_else(|| KernelNodeError::Config(format!("Unknown parameter '{}'", name)))?;

        let value = param.kind.accept(value.into()).map_err(|rejected| {
            KernelNodeError::Config(format!(
                "Parameter '{}' is declared {} but was given a {} value",
                name,
                param.kind,
                rejected.kind()
            ))
        })?;
        param.value = Some(value);
        Ok(())
    }

    /// Current value of a declared parameter (zero value when unset)
    pub fn get(&self, name: &str) -> Option<ParamValue> {
        self.find(name).map(Parameter::value)
    }

    pub fn find(&self, name: &str) -> Option<&Parameter> {
        self.params.iter().find(|p| p.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    pub fn remove(&mut self, name: &str) -> Option<Parameter> {
        let index = self.params.iter().position(|p| p.name == name)?;
        tracing::debug!(param = name, "parameter removed");
        Some(self.params.remove(index))
    }

    /// Parameters in declaration order
    pub fn iter(&self) -> impl Iterator<Item = &Parameter> {
        self.params.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.params.iter().map(|p| p.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Resolved values in declaration order
    pub fn snapshot(&self) -> Vec<(String, ParamValue)> {
        self.params
            .iter()
            .map(|p| (p.name.clone(), p.value()))
            .collect()
    }

    /// Resolved values in kernel-argument form
    pub fn kernel_args(&self) -> Vec<(String, KernelArg)> {
        self.params
            .iter()
            .map(|p| (p.name.clone(), p.value().to_kernel_arg()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declare_and_default_value() {
        let mut registry = ParameterRegistry::new();
        registry.declare("gain", ParamKind::Float).unwrap();
        registry.declare("label", ParamKind::String).unwrap();

        assert_eq!(registry.get("gain"), Some(ParamValue::Float(0.0)));
        assert_eq!(registry.get("label"), Some(ParamValue::String(String::new())));
        assert_eq!(registry.get("missing"), None);
        assert!(!registry.find("gain").unwrap().is_set());
    }

    #[test]
    fn test_duplicate_and_empty_names() {
        let mut registry = ParameterRegistry::new();
        registry.declare("radius", ParamKind::Integer).unwrap();
        assert!(registry.declare("radius", ParamKind::Float).is_err());
        assert!(registry.declare("", ParamKind::Float).is_err());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_set_type_checked() {
        let mut registry = ParameterRegistry::new();
        registry.declare("sigma", ParamKind::Float).unwrap();
        registry.declare("flipX", ParamKind::Boolean).unwrap();

        registry.set("sigma", 2i64).unwrap();
        assert_eq!(registry.get("sigma"), Some(ParamValue::Float(2.0)));

        let err = registry.set("flipX", 1i64).unwrap_err();
        assert!(err.to_string().contains("boolean"));
        assert!(registry.set("nope", true).is_err());
    }

    #[test]
    fn test_boolean_binds_as_int() {
        let mut registry = ParameterRegistry::new();
        registry.declare("flipX", ParamKind::Boolean).unwrap();
        registry.declare("flipY", ParamKind::Boolean).unwrap();
        registry.set("flipX", true).unwrap();

        let args = registry.kernel_args();
        assert_eq!(args[0].1.as_int(), Some(1));
        assert_eq!(args[1].1.as_int(), Some(0));
    }

    #[test]
    fn test_order_and_remove() {
        let mut registry = ParameterRegistry::new();
        for name in ["c", "a", "b"] {
            registry.declare(name, ParamKind::Integer).unwrap();
        }
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["c", "a", "b"]);

        let removed = registry.remove("a").unwrap();
        assert_eq!(removed.name(), "a");
        assert!(registry.remove("a").is_none());
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["c", "b"]);
    }

    #[test]
    fn test_decl_round_trip() {
        let decls = vec![
            ParameterDecl::new("flipX", ParamKind::Boolean).with_value(true),
            ParameterDecl::new("sigma", ParamKind::Float),
        ];
        let registry = ParameterRegistry::from_decls(&decls).unwrap();
        assert_eq!(registry.to_decls(), decls);
    }

    #[test]
    fn test_decl_with_mismatched_value() {
        let decls = vec![ParameterDecl::new("n", ParamKind::Integer).with_value("three")];
        assert!(ParameterRegistry::from_decls(&decls).is_err());
    }

    #[test]
    fn test_kind_parsing() {
        assert_eq!("bool".parse::<ParamKind>().unwrap(), ParamKind::Boolean);
        assert_eq!("Number".parse::<ParamKind>().unwrap(), ParamKind::Float);
        assert!("matrix".parse::<ParamKind>().is_err());
    }
}
