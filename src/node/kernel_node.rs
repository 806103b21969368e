//! The dynamic kernel node.
//!
//! A [`KernelNode`] owns its configuration and re-validates it after every
//! edit. Invocations run against an immutable [`NodeSnapshot`] of the last
//! valid configuration, so a node can be shared between threads and invoked
//! concurrently while edits require `&mut self`.
//!
//! ```ignore
//! let session = BackendSession::new(HostBackend::new());
//! let node = KernelNode::new(KernelNodeConfig::load("copy.toml")?, session);
//!
//! let mut slots = node.slots()?;
//! slots.bind_input("src", image)?;
//! let invocation = node.invoke(slots)?;
//! let dst = invocation.output("dst");
//! ```

use crate::backend::{BackendSession, DeviceBuffer};
use crate::error::{KernelNodeError, Result};
use crate::node::binding::{BindingInputs, BindingScriptEngine};
use crate::node::config::{KernelNodeConfig, NodeSnapshot};
use crate::node::dispatcher::{ExecutionContext, InvocationState, KernelDispatcher, StateTrail};
use crate::node::params::{ParamKind, ParamValue, ParameterDecl};
use crate::node::slots::SlotCatalog;
use crate::node::validator::{ValidationReport, Validator};
use crate::scripting::ScriptLimits;
use crate::types::Extents;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Outcome of a successful invocation
#[derive(Debug, Clone)]
pub struct Invocation {
    /// The caller's catalog with every output published
    pub slots: SlotCatalog,
    pub entry_point: String,
    pub dimensions: Extents,
    pub global_sizes: Extents,
    /// States passed through, starting and ending at `Idle`
    pub states: Vec<InvocationState>,
}

impl Invocation {
    pub fn output(&self, name: &str) -> Option<&DeviceBuffer> {
        self.slots.published(name)
    }
}

/// A node that runs a user-supplied kernel with configurable slots and parameters
pub struct KernelNode {
    config: KernelNodeConfig,
    report: ValidationReport,
    snapshot: Option<Arc<NodeSnapshot>>,
    validator: Validator,
    binding: BindingScriptEngine,
    dispatcher: KernelDispatcher,
}

impl KernelNode {
    /// Create a node. Invalid configurations are accepted and reported.
    pub fn new(config: KernelNodeConfig, session: BackendSession) -> Self {
        let binding = BindingScriptEngine::new(session.clone(), &config.limits);
        let validator = Validator::with_limits(config.limits);
        let mut node = Self {
            config,
            report: ValidationReport::default(),
            snapshot: None,
            validator,
            binding,
            dispatcher: KernelDispatcher::new(session),
        };
        node.revalidate();
        node
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &KernelNodeConfig {
        &self.config
    }

    pub fn session(&self) -> &BackendSession {
        self.dispatcher.session()
    }

    /// Report for the current configuration
    pub fn report(&self) -> &ValidationReport {
        &self.report
    }

    pub fn is_valid(&self) -> bool {
        self.snapshot.is_some()
    }

    fn revalidate(&mut self) {
        self.report = self.validator.validate(&self.config);
        self.snapshot = if self.report.is_valid() {
            match NodeSnapshot::from_config(&self.config) {
                Ok(snapshot) => Some(Arc::new(snapshot)),
                Err(e) => {
                    tracing::warn!(node = %self.config.name, "cannot snapshot configuration: {}", e);
                    None
                }
            }
        } else {
            None
        };
        tracing::debug!(
            node = %self.config.name,
            valid = self.snapshot.is_some(),
            issues = self.report.issues().len(),
            "configuration validated"
        );
    }

    // ==================== Configuration edits ====================

    fn ensure_slot_name_free(&self, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(KernelNodeError::Config(
                "Slot names must not be empty".to_string(),
            ));
        }
        if self.config.inputs.iter().chain(&self.config.outputs).any(|n| n == name) {
            return Err(KernelNodeError::Config(format!(
                "Slot '{}' is already declared",
                name
            )));
        }
        Ok(())
    }

    pub fn declare_input(&mut self, name: &str) -> Result<()> {
        self.ensure_slot_name_free(name)?;
        self.config.inputs.push(name.to_string());
        self.revalidate();
        Ok(())
    }

    pub fn declare_output(&mut self, name: &str) -> Result<()> {
        self.ensure_slot_name_free(name)?;
        self.config.outputs.push(name.to_string());
        self.revalidate();
        Ok(())
    }

    /// Declare a parameter. Rejected when any slot or parameter already uses the name.
    pub fn declare_parameter(&mut self, name: &str, kind: ParamKind) -> Result<()> {
        if name.is_empty() {
            return Err(KernelNodeError::Config(
                "Parameter names must not be empty".to_string(),
            ));
        }
        if let Some(owner) = self.config.owner_of(name) {
            return Err(KernelNodeError::Config(format!(
                "Name '{}' is already taken ({})",
                name, owner
            )));
        }
        self.config.parameters.push(ParameterDecl::new(name, kind));
        self.revalidate();
        Ok(())
    }

    pub fn set_parameter(&mut self, name: &str, value: impl Into<ParamValue>) -> Result<()> {
        let decl = self
            .config
            .parameters
            .iter_mut()
            .find(|p| p.name == name)
            .ok_or_else(|| KernelNodeError::Config(format!("Unknown parameter '{}'", name)))?;
        let value = decl.kind.accept(value.into()).map_err(|rejected| {
            KernelNodeError::Config(format!(
                "Parameter '{}' is declared {} but was given a {} value",
                name,
                decl.kind,
                rejected.kind()
            ))
        })?;
        decl.value = Some(value);
        self.revalidate();
        Ok(())
    }

    pub fn remove_slot(&mut self, name: &str) -> Result<()> {
        let before = self.config.inputs.len() + self.config.outputs.len();
        self.config.inputs.retain(|n| n != name);
        self.config.outputs.retain(|n| n != name);
        if self.config.inputs.len() + self.config.outputs.len() == before {
            return Err(KernelNodeError::Config(format!("Unknown slot '{}'", name)));
        }
        self.revalidate();
        Ok(())
    }

    pub fn remove_parameter(&mut self, name: &str) -> Result<()> {
        let index = self
            .config
            .parameters
            .iter()
            .position(|p| p.name == name)
            .ok_or_else(|| KernelNodeError::Config(format!("Unknown parameter '{}'", name)))?;
        self.config.parameters.remove(index);
        self.revalidate();
        Ok(())
    }

    /// Rename a slot, keeping its direction
    pub fn rename_slot(&mut self, old: &str, new: &str) -> Result<()> {
        if old == new {
            return Ok(());
        }
        self.ensure_slot_name_free(new)?;
        let slot = self
            .config
            .inputs
            .iter_mut()
            .chain(self.config.outputs.iter_mut())
            .find(|n| n.as_str() == old)
            .ok_or_else(|| KernelNodeError::Config(format!("Unknown slot '{}'", old)))?;
        *slot = new.to_string();
        self.revalidate();
        Ok(())
    }

    /// Replace the kernel. The backend's compiled copy of the old source is released.
    pub fn set_kernel(&mut self, source: impl Into<String>, entry_point: impl Into<String>) {
        let source = source.into();
        if source != self.config.kernel_source {
            let old = std::mem::replace(&mut self.config.kernel_source, source);
            let released = self.session().call(|backend| {
                backend.release_kernel(&old);
                Ok(())
            });
            if let Err(e) = released {
                tracing::warn!(node = %self.config.name, "cannot release old kernel: {}", e);
            }
        }
        self.config.entry_point = entry_point.into();
        self.revalidate();
    }

    pub fn set_entry_point(&mut self, entry_point: impl Into<String>) {
        self.config.entry_point = entry_point.into();
        self.revalidate();
    }

    pub fn set_binding_script(&mut self, script: impl Into<String>) {
        let old = std::mem::replace(&mut self.config.binding_script, script.into());
        if old != self.config.binding_script {
            self.binding.forget(&old);
        }
        self.revalidate();
    }

    pub fn set_limits(&mut self, limits: ScriptLimits) {
        self.config.limits = limits;
        self.binding = BindingScriptEngine::new(self.session().clone(), &limits);
        self.validator = Validator::with_limits(limits);
        self.revalidate();
    }

    /// Number of compiled binding scripts held by this node
    pub fn cached_scripts(&self) -> usize {
        self.binding.cached_scripts()
    }

    // ==================== Execution ====================

    fn current_snapshot(&self) -> Result<Arc<NodeSnapshot>> {
        self.snapshot.clone().ok_or_else(|| {
            KernelNodeError::Config(format!(
                "Node '{}' has configuration errors:\n{}",
                self.config.name,
                self.report.error_summary()
            ))
        })
    }

    /// Unbound slot catalog matching the current configuration
    pub fn slots(&self) -> Result<SlotCatalog> {
        self.current_snapshot()?.slot_catalog()
    }

    /// Run the node once with the inputs bound in `slots`.
    ///
    /// On success the returned [`Invocation`] carries `slots` with every
    /// output published. On failure `slots` is dropped and nothing is
    /// published; the node itself is unaffected and may be invoked again.
    pub fn invoke(&self, mut slots: SlotCatalog) -> Result<Invocation> {
        let snapshot = self.current_snapshot()?;
        let span = tracing::debug_span!("invoke", node = %snapshot.name);
        let _enter = span.enter();

        let mut trail = StateTrail::new();
        match self.run(&snapshot, &mut slots, &mut trail) {
            Ok(context) => {
                trail.advance(InvocationState::Idle);
                Ok(Invocation {
                    slots,
                    entry_point: context.entry_point,
                    dimensions: context.dimensions,
                    global_sizes: context.global_sizes,
                    states: trail.states().to_vec(),
                })
            }
            Err(e) => {
                let failed_in = trail.current();
                trail.advance(InvocationState::Failed);
                tracing::warn!(state = %failed_in, "invocation failed: {}", e);
                Err(e)
            }
        }
    }

    /// Bind `inputs` onto a fresh catalog and invoke
    pub fn invoke_with<I, S>(&self, inputs: I) -> Result<Invocation>
    where
        I: IntoIterator<Item = (S, DeviceBuffer)>,
        S: AsRef<str>,
    {
        let mut slots = self.slots()?;
        for (name, buffer) in inputs {
            slots.bind_input(name.as_ref(), buffer)?;
        }
        self.invoke(slots)
    }

    fn run(
        &self,
        snapshot: &NodeSnapshot,
        slots: &mut SlotCatalog,
        trail: &mut StateTrail,
    ) -> Result<ExecutionContext> {
        let mut inputs = BTreeMap::new();
        for name in &snapshot.inputs {
            let buffer = slots.bound_input(name).ok_or_else(|| {
                KernelNodeError::Config(format!("Input slot '{}' has no buffer bound", name))
            })?;
            inputs.insert(name.clone(), buffer.clone());
        }

        trail.advance(InvocationState::ScriptRunning);
        let binding_inputs = BindingInputs {
            inputs,
            params: snapshot.params.snapshot(),
            output_names: snapshot.outputs.clone(),
        };
        let plan = self.binding.run(&snapshot.binding_script, &binding_inputs)?;
        let context = self.dispatcher.build_context(
            &snapshot.params,
            &binding_inputs.inputs,
            plan,
            &snapshot.entry_point,
        )?;

        trail.advance(InvocationState::Dispatching);
        self.dispatcher.dispatch(&snapshot.kernel_source, &context)?;

        trail.advance(InvocationState::Extracting);
        self.dispatcher
            .extract(&context, &snapshot.outputs, slots)?;
        Ok(context)
    }
}

impl std::fmt::Debug for KernelNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KernelNode")
            .field("name", &self.config.name)
            .field("inputs", &self.config.inputs)
            .field("outputs", &self.config.outputs)
            .field("parameters", &self.config.parameters.len())
            .field("valid", &self.snapshot.is_some())
            .finish()
    }
}
