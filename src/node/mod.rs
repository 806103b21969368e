//! The dynamic kernel-execution node.
//!
//! Per invocation, data flows through the components in a fixed order:
//!
//! ```text
//! SlotCatalog + ParameterRegistry
//!         │
//!         ▼
//! BindingScriptEngine ── outputs, dimensions, global sizes, entry point
//!         │
//!         ▼
//! KernelDispatcher ───── merged argument map → backend → published outputs
//!         │
//!         ▼
//! SlotCatalog (outputs)
//! ```
//!
//! The [`Validator`] runs independently, after every configuration edit.

pub mod binding;
pub mod config;
pub mod dispatcher;
pub mod kernel_node;
pub mod params;
pub mod slots;
pub mod validator;

pub use binding::{BindingInputs, BindingPlan, BindingScriptEngine};
pub use config::{ConfigFormat, KernelNodeConfig, NodeSnapshot, CONFIG_VERSION};
pub use dispatcher::{ExecutionContext, InvocationState, KernelDispatcher, StateTrail};
pub use kernel_node::{Invocation, KernelNode};
pub use params::{ParamKind, ParamValue, Parameter, ParameterDecl, ParameterRegistry};
pub use slots::{Slot, SlotCatalog, SlotDirection};
pub use validator::{Issue, Severity, ValidationReport, Validator, RESERVED_NAMES};
