//! Node configuration file and per-invocation snapshot.
//!
//! A [`KernelNodeConfig`] is the whole static configuration surface of a
//! kernel node. It is stored as TOML (hand-written node files) or JSON
//! (machine exchange); the format follows the file extension.
//!
//! ```toml
//! version = 1
//! name = "copy"
//! entry_point = "copy"
//! inputs = ["src"]
//! outputs = ["dst"]
//! kernel_source = """
//! fn copy(x, y, z, args) { args.dst.write(x, y, args.src.read(x, y)); }
//! """
//! binding_script = """
//! outputs.dst = create_like(src);
//! dimensions = dims(src);
//! """
//!
//! [[parameters]]
//! name = "flipX"
//! kind = "boolean"
//! value = true
//! ```

use crate::error::{KernelNodeError, Result, ResultExt};
use crate::node::params::{ParamKind, ParameterDecl, ParameterRegistry};
use crate::node::slots::SlotCatalog;
use crate::scripting::ScriptLimits;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// Current configuration format version
pub const CONFIG_VERSION: u32 = 1;

fn default_config_version() -> u32 {
    CONFIG_VERSION
}

/// On-disk format of a node configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Json,
}

impl ConfigFormat {
    /// Pick the format from a file extension (`.toml` or `.json`)
    pub fn from_path(path: &Path) -> Result<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => Ok(ConfigFormat::Toml),
            Some(ext) if ext.eq_ignore_ascii_case("json") => Ok(ConfigFormat::Json),
            _ => Err(KernelNodeError::Config(format!(
                "Unsupported node file {:?}: expected a .toml or .json extension",
                path
            ))),
        }
    }
}

/// Static configuration of a kernel node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelNodeConfig {
    /// Format version for future migrations
    #[serde(default = "default_config_version")]
    pub version: u32,

    #[serde(default)]
    pub name: String,

    /// Kernel text in the backend's native language, passed through unmodified
    #[serde(default)]
    pub kernel_source: String,

    /// Default kernel function to launch
    #[serde(default)]
    pub entry_point: String,

    #[serde(default)]
    pub binding_script: String,

    #[serde(default)]
    pub inputs: Vec<String>,

    #[serde(default)]
    pub outputs: Vec<String>,

    #[serde(default)]
    pub parameters: Vec<ParameterDecl>,

    #[serde(default)]
    pub limits: ScriptLimits,
}

impl Default for KernelNodeConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            name: "Kernel".to_string(),
            kernel_source: String::new(),
            entry_point: "main".to_string(),
            binding_script: String::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            parameters: Vec::new(),
            limits: ScriptLimits::default(),
        }
    }
}

impl KernelNodeConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Load a configuration file, choosing the parser by extension
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let format = ConfigFormat::from_path(path)?;
        let content = std::fs::read_to_string(path).map_err(|e| {
            KernelNodeError::Config(format!("Failed to read node file {:?}: {}", path, e))
        })?;
        Self::parse(&content, format)
            .with_context(|| format!("Failed to parse node file {:?}", path))
    }

    /// Save to disk in the format implied by the extension
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let format = ConfigFormat::from_path(path)?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let content = self.render(format)?;
        std::fs::write(path, content).map_err(|e| {
            KernelNodeError::Config(format!("Failed to write node file {:?}: {}", path, e))
        })
    }

    pub fn parse(content: &str, format: ConfigFormat) -> Result<Self> {
        let config: Self = match format {
            ConfigFormat::Toml => toml::from_str(content)?,
            ConfigFormat::Json => serde_json::from_str(content)?,
        };
        config.migrate()
    }

    pub fn render(&self, format: ConfigFormat) -> Result<String> {
        Ok(match format {
            ConfigFormat::Toml => toml::to_string_pretty(self)?,
            ConfigFormat::Json => serde_json::to_string_pretty(self)?,
        })
    }

    fn migrate(mut self) -> Result<Self> {
        if self.version > CONFIG_VERSION {
            return Err(KernelNodeError::Config(format!(
                "Node file version {} is newer than supported version {}",
                self.version, CONFIG_VERSION
            )));
        }
        if self.version < CONFIG_VERSION {
            tracing::debug!(from = self.version, to = CONFIG_VERSION, "migrating node config");
            self.version = CONFIG_VERSION;
        }
        Ok(self)
    }

    pub fn with_kernel(mut self, source: impl Into<String>, entry_point: impl Into<String>) -> Self {
        self.kernel_source = source.into();
        self.entry_point = entry_point.into();
        self
    }

    pub fn with_binding_script(mut self, script: impl Into<String>) -> Self {
        self.binding_script = script.into();
        self
    }

    pub fn with_input(mut self, name: impl Into<String>) -> Self {
        self.inputs.push(name.into());
        self
    }

    pub fn with_output(mut self, name: impl Into<String>) -> Self {
        self.outputs.push(name.into());
        self
    }

    pub fn with_parameter(mut self, decl: ParameterDecl) -> Self {
        self.parameters.push(decl);
        self
    }

    /// Every slot and parameter name, tagged with what declares it
    pub fn declared_names(&self) -> impl Iterator<Item = (&str, &'static str)> {
        self.inputs
            .iter()
            .map(|n| (n.as_str(), "input slot"))
            .chain(self.outputs.iter().map(|n| (n.as_str(), "output slot")))
            .chain(self.parameters.iter().map(|p| (p.name.as_str(), "parameter")))
    }

    /// What already uses `name`, if anything
    pub fn owner_of(&self, name: &str) -> Option<&'static str> {
        self.declared_names()
            .find(|(n, _)| *n == name)
            .map(|(_, owner)| owner)
    }

    pub fn parameter_kind(&self, name: &str) -> Option<ParamKind> {
        self.parameters
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.kind)
    }
}

/// Immutable view of a node's configuration, shared by every invocation
/// started while it is current.
#[derive(Debug, Clone)]
pub struct NodeSnapshot {
    pub name: String,
    pub kernel_source: Arc<str>,
    pub entry_point: String,
    pub binding_script: Arc<str>,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub params: ParameterRegistry,
}

impl NodeSnapshot {
    pub fn from_config(config: &KernelNodeConfig) -> Result<Self> {
        Ok(Self {
            name: config.name.clone(),
            kernel_source: Arc::from(config.kernel_source.as_str()),
            entry_point: config.entry_point.clone(),
            binding_script: Arc::from(config.binding_script.as_str()),
            inputs: config.inputs.clone(),
            outputs: config.outputs.clone(),
            params: ParameterRegistry::from_decls(&config.parameters)?,
        })
    }

    /// Fresh, unbound slot catalog for one invocation
    pub fn slot_catalog(&self) -> Result<SlotCatalog> {
        SlotCatalog::from_names(&self.inputs, &self.outputs)
    }
}
