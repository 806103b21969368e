//! Kernel Dispatcher.
//!
//! Merges parameters, bound inputs and script-allocated outputs into one
//! argument map, runs the kernel under an exclusive backend lease, then hands
//! the output buffers back for publication.

use crate::backend::{ArgumentMap, BackendSession, DeviceBuffer, KernelArg, KernelLaunch};
use crate::error::{KernelNodeError, Result};
use crate::node::binding::BindingPlan;
use crate::node::params::ParameterRegistry;
use crate::node::slots::{SlotCatalog, SlotDirection};
use crate::types::Extents;
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Where an invocation currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationState {
    Idle,
    ScriptRunning,
    Dispatching,
    Extracting,
    Failed,
}

impl InvocationState {
    /// Whether `next` may follow `self`
    pub fn can_transition_to(self, next: InvocationState) -> bool {
        use InvocationState::*;
        matches!(
            (self, next),
            (Idle, ScriptRunning)
                | (ScriptRunning, Dispatching)
                | (Dispatching, Extracting)
                | (Extracting, Idle)
                | (Idle, Failed)
                | (ScriptRunning, Failed)
                | (Dispatching, Failed)
                | (Extracting, Failed)
                | (Failed, Idle)
        )
    }
}

impl fmt::Display for InvocationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InvocationState::Idle => "idle",
            InvocationState::ScriptRunning => "script-running",
            InvocationState::Dispatching => "dispatching",
            InvocationState::Extracting => "extracting",
            InvocationState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Records the states one invocation passes through
#[derive(Debug, Clone)]
pub struct StateTrail {
    states: Vec<InvocationState>,
}

impl StateTrail {
    pub fn new() -> Self {
        Self {
            states: vec![InvocationState::Idle],
        }
    }

    pub fn current(&self) -> InvocationState {
        self.states
            .last()
            .copied()
            .unwrap_or(InvocationState::Idle)
    }

    /// Move to `next`; an illegal transition is logged and recorded anyway
    pub fn advance(&mut self, next: InvocationState) {
        let current = self.current();
        if !current.can_transition_to(next) {
            tracing::warn!(from = %current, to = %next, "unexpected invocation transition");
        }
        tracing::debug!(from = %current, to = %next, "invocation state");
        self.states.push(next);
    }

    pub fn states(&self) -> &[InvocationState] {
        &self.states
    }
}

impl Default for StateTrail {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything resolved for one launch
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub arguments: ArgumentMap,
    pub dimensions: Extents,
    pub global_sizes: Extents,
    pub entry_point: String,
}

impl ExecutionContext {
    pub fn argument(&self, name: &str) -> Option<&KernelArg> {
        self.arguments.get(name)
    }
}

#[derive(Debug, Clone, Copy)]
enum ArgSource {
    Parameter,
    Input,
    Output,
}

impl fmt::Display for ArgSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgSource::Parameter => f.write_str("parameter"),
            ArgSource::Input => f.write_str("input slot"),
            ArgSource::Output => f.write_str("output slot"),
        }
    }
}

/// Runs kernels on an injected backend session
#[derive(Debug, Clone)]
pub struct KernelDispatcher {
    session: BackendSession,
}

impl KernelDispatcher {
    pub fn new(session: BackendSession) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &BackendSession {
        &self.session
    }

    /// Merge arguments in priority order: parameters, then inputs, then outputs.
    ///
    /// A later source never overwrites an earlier name; a clash is a
    /// configuration error. Inputs are bound as read-only views.
    pub fn build_context(
        &self,
        params: &ParameterRegistry,
        inputs: &BTreeMap<String, DeviceBuffer>,
        plan: BindingPlan,
        default_entry_point: &str,
    ) -> Result<ExecutionContext> {
        let mut arguments = ArgumentMap::new();
        let mut sources = BTreeMap::new();

        for (name, arg) in params.kernel_args() {
            insert_arg(&mut arguments, &mut sources, name, arg, ArgSource::Parameter)?;
        }
        for (name, buffer) in inputs {
            let arg = KernelArg::Buffer(buffer.read_only());
            insert_arg(&mut arguments, &mut sources, name.clone(), arg, ArgSource::Input)?;
        }
        for (name, buffer) in plan.outputs {
            insert_arg(
                &mut arguments,
                &mut sources,
                name,
                KernelArg::Buffer(buffer),
                ArgSource::Output,
            )?;
        }

        Ok(ExecutionContext {
            arguments,
            dimensions: plan.dimensions,
            global_sizes: plan.global_sizes,
            entry_point: plan
                .entry_point
                .unwrap_or_else(|| default_entry_point.to_string()),
        })
    }

    /// Run the kernel to completion under a backend lease
    pub fn dispatch(&self, kernel_source: &Arc<str>, context: &ExecutionContext) -> Result<()> {
        let launch = KernelLaunch {
            source: Arc::clone(kernel_source),
            entry_point: context.entry_point.clone(),
            dimensions: context.dimensions.clone(),
            global_sizes: context.global_sizes.clone(),
            arguments: context.arguments.clone(),
        };

        self.session.call(|backend| {
            tracing::debug!(
                backend = backend.name(),
                entry = %launch.entry_point,
                dimensions = %launch.dimensions,
                global_sizes = %launch.global_sizes,
                "dispatching kernel"
            );
            backend.execute(&launch)
        })
    }

    /// Publish every declared output into `slots`.
    ///
    /// All outputs are resolved before any is published, so a failure leaves
    /// `slots` untouched.
    pub fn extract(
        &self,
        context: &ExecutionContext,
        output_names: &[String],
        slots: &mut SlotCatalog,
    ) -> Result<()> {
        let mut staged = Vec::with_capacity(output_names.len());
        for name in output_names {
            let buffer = context
                .argument(name)
                .and_then(KernelArg::as_buffer)
                .ok_or_else(|| {
                    KernelNodeError::Config(format!("No buffer for output slot '{}'", name))
                })?;
            if slots.direction(name) != Some(SlotDirection::Output) {
                return Err(KernelNodeError::Config(format!(
                    "Slot catalog has no output slot '{}'",
                    name
                )));
            }
            staged.push((name.as_str(), buffer.clone()));
        }

        for (name, buffer) in staged {
            slots.publish_output(name, buffer)?;
        }
        Ok(())
    }
}

fn insert_arg(
    arguments: &mut ArgumentMap,
    sources: &mut BTreeMap<String, ArgSource>,
    name: String,
    arg: KernelArg,
    source: ArgSource,
) -> Result<()> {
    match arguments.entry(name) {
        Entry::Occupied(entry) => {
            let earlier = sources
                .get(entry.key())
                .copied()
                .unwrap_or(ArgSource::Parameter);
            Err(KernelNodeError::Config(format!(
                "Kernel argument '{}' comes from both {} and {}; slot and parameter names must be unique node-wide",
                entry.key(),
                earlier,
                source
            )))
        }
        Entry::Vacant(entry) => {
            tracing::trace!(arg = %entry.key(), %source, value = %arg, "argument bound");
            sources.insert(entry.key().clone(), source);
            entry.insert(arg);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HostBackend;
    use crate::node::params::ParamKind;
    use crate::types::PixelType;

    fn buffer() -> DeviceBuffer {
        DeviceBuffer::zeroed(Extents::new(vec![2, 2]).unwrap(), PixelType::Float32)
    }

    fn plan(outputs: &[&str], entry: Option<&str>) -> BindingPlan {
        let extents = Extents::new(vec![2, 2]).unwrap();
        BindingPlan {
            outputs: outputs.iter().map(|n| (n.to_string(), buffer())).collect(),
            dimensions: extents.clone(),
            global_sizes: extents,
            entry_point: entry.map(str::to_string),
        }
    }

    fn dispatcher() -> KernelDispatcher {
        KernelDispatcher::new(BackendSession::new(HostBackend::new()))
    }

    #[test]
    fn test_merge_sources() {
        let mut params = ParameterRegistry::new();
        params.declare("flipX", ParamKind::Boolean).unwrap();
        params.set("flipX", true).unwrap();
        let inputs: BTreeMap<_, _> = [("src".to_string(), buffer())].into_iter().collect();

        let ctx = dispatcher()
            .build_context(&params, &inputs, plan(&["dst"], None), "main")
            .unwrap();

        assert_eq!(ctx.argument("flipX").and_then(KernelArg::as_int), Some(1));
        assert!(!ctx.argument("src").unwrap().as_buffer().unwrap().is_writable());
        assert!(ctx.argument("dst").unwrap().as_buffer().unwrap().is_writable());
        assert_eq!(ctx.entry_point, "main");
    }

    #[test]
    fn test_entry_point_override() {
        let params = ParameterRegistry::new();
        let ctx = dispatcher()
            .build_context(&params, &BTreeMap::new(), plan(&[], Some("blur")), "main")
            .unwrap();
        assert_eq!(ctx.entry_point, "blur");
    }

    #[test]
    fn test_collision_rejected() {
        let mut params = ParameterRegistry::new();
        params.declare("dst", ParamKind::Float).unwrap();
        let err = dispatcher()
            .build_context(&params, &BTreeMap::new(), plan(&["dst"], None), "main")
            .unwrap_err();
        assert!(matches!(err, KernelNodeError::Config(_)));
        assert!(err.to_string().contains("both parameter and output slot"));
    }

    #[test]
    fn test_extract_is_all_or_nothing() {
        let d = dispatcher();
        let ctx = d
            .build_context(
                &ParameterRegistry::new(),
                &BTreeMap::new(),
                plan(&["a"], None),
                "main",
            )
            .unwrap();

        let mut slots = SlotCatalog::from_names(Vec::<&str>::new(), ["a", "b"]).unwrap();
        let names = vec!["a".to_string(), "b".to_string()];
        assert!(d.extract(&ctx, &names, &mut slots).is_err());
        assert!(slots.published("a").is_none());

        d.extract(&ctx, &names[..1], &mut slots).unwrap();
        assert!(slots.published("a").is_some());
    }

    #[test]
    fn test_state_transitions() {
        use InvocationState::*;
        assert!(Idle.can_transition_to(ScriptRunning));
        assert!(Dispatching.can_transition_to(Failed));
        assert!(!Idle.can_transition_to(Extracting));
        assert!(!Failed.can_transition_to(Dispatching));

        let mut trail = StateTrail::new();
        for next in [ScriptRunning, Dispatching, Extracting, Idle] {
            trail.advance(next);
        }
        assert_eq!(trail.states().len(), 5);
        assert_eq!(trail.current(), Idle);
    }
}
