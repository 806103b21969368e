//! Static configuration checks.
//!
//! The validator runs after every configuration edit. It never blocks an edit
//! or a save; it produces a [`ValidationReport`] and the node refuses to
//! invoke while that report contains errors.

use crate::node::config::KernelNodeConfig;
use crate::scripting::{configure_engine, is_identifier, ScriptLimits};
use rhai::Engine;
use std::collections::HashMap;
use std::fmt;

/// Variable names the binding script environment defines itself
pub const RESERVED_NAMES: &[&str] = &[
    "inputs",
    "params",
    "output_names",
    "outputs",
    "dimensions",
    "global_sizes",
    "entry_point",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Warning,
    Error,
}

/// A single finding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issue {
    pub severity: Severity,
    /// The slot or parameter name concerned, if any
    pub subject: Option<String>,
    pub message: String,
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(f, "{}: {}", label, self.message)
    }
}

/// Every issue found in one configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    issues: Vec<Issue>,
}

impl ValidationReport {
    fn push(&mut self, severity: Severity, subject: Option<&str>, message: String) {
        self.issues.push(Issue {
            severity,
            subject: subject.map(str::to_string),
            message,
        });
    }

    pub fn issues(&self) -> &[Issue] {
        &self.issues
    }

    pub fn errors(&self) -> impl Iterator<Item = &Issue> {
        self.issues
            .iter()
            .filter(|i| i.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Issue> {
        self.issues
            .iter()
            .filter(|i| i.severity == Severity::Warning)
    }

    pub fn has_errors(&self) -> bool {
        self.errors().next().is_some()
    }

    /// True when there are no errors (warnings allowed)
    pub fn is_valid(&self) -> bool {
        !self.has_errors()
    }

    /// Whether any issue concerns `name`
    pub fn mentions(&self, name: &str) -> bool {
        self.issues
            .iter()
            .any(|i| i.subject.as_deref() == Some(name))
    }

    /// Summary of the errors, one per line
    pub fn error_summary(&self) -> String {
        self.errors()
            .map(|i| i.message.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.issues.is_empty() {
            return f.write_str("no issues");
        }
        for (i, issue) in self.issues.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", issue)?;
        }
        Ok(())
    }
}

/// Configuration validator
pub struct Validator {
    engine: Engine,
    limits: ScriptLimits,
}

fn script_engine(limits: &ScriptLimits) -> Engine {
    let mut engine = Engine::new();
    configure_engine(&mut engine, limits);
    engine
}

impl Validator {
    pub fn new() -> Self {
        Self::with_limits(ScriptLimits::default())
    }

    /// Validator whose script checks use `limits`, as the node's engine does
    pub fn with_limits(limits: ScriptLimits) -> Self {
        Self {
            engine: script_engine(&limits),
            limits,
        }
    }

    pub fn validate(&self, config: &KernelNodeConfig) -> ValidationReport {
        let mut report = ValidationReport::default();
        self.check_names(config, &mut report);
        self.check_values(config, &mut report);
        self.check_kernel(config, &mut report);
        self.check_script(config, &mut report);

        for issue in &report.issues {
            match issue.severity {
                Severity::Error => tracing::warn!(node = %config.name, "{}", issue.message),
                Severity::Warning => tracing::debug!(node = %config.name, "{}", issue.message),
            }
        }
        report
    }

    fn check_names(&self, config: &KernelNodeConfig, report: &mut ValidationReport) {
        let mut owners: HashMap<&str, Vec<&'static str>> = HashMap::new();
        let mut order = Vec::new();
        for (name, owner) in config.declared_names() {
            let entry = owners.entry(name).or_default();
            if entry.is_empty() {
                order.push(name);
            }
            entry.push(owner);
        }

        for name in order {
            let declared_by = &owners[name];
            if name.is_empty() {
                report.push(
                    Severity::Error,
                    Some(name),
                    format!("An empty name is declared by {}", declared_by.join(", ")),
                );
                continue;
            }
            if declared_by.len() > 1 {
                report.push(
                    Severity::Error,
                    Some(name),
                    format!(
                        "Slot and parameter names must be unique node-wide: '{}' is declared by {}",
                        name,
                        declared_by.join(", ")
                    ),
                );
            }
            if RESERVED_NAMES.contains(&name) {
                report.push(
                    Severity::Error,
                    Some(name),
                    format!("'{}' is reserved by the binding script environment", name),
                );
            } else if !is_identifier(name) {
                report.push(
                    Severity::Warning,
                    Some(name),
                    format!(
                        "'{}' is not a script identifier; reach it through the inputs or params map",
                        name
                    ),
                );
            }
        }
    }

    fn check_values(&self, config: &KernelNodeConfig, report: &mut ValidationReport) {
        for decl in &config.parameters {
            if let Some(value) = &decl.value {
                if decl.kind.accept(value.clone()).is_err() {
                    report.push(
                        Severity::Error,
                        Some(&decl.name),
                        format!(
                            "Parameter '{}' is declared {} but holds a {} value",
                            decl.name,
                            decl.kind,
                            value.kind()
                        ),
                    );
                }
            }
        }
    }

    fn check_kernel(&self, config: &KernelNodeConfig, report: &mut ValidationReport) {
        if config.kernel_source.trim().is_empty() {
            report.push(Severity::Error, None, "Kernel source is empty".to_string());
        }
        if config.entry_point.trim().is_empty() {
            report.push(Severity::Error, None, "Entry point is empty".to_string());
        }
    }

    fn check_script(&self, config: &KernelNodeConfig, report: &mut ValidationReport) {
        if config.binding_script.trim().is_empty() {
            report.push(
                Severity::Error,
                None,
                "Binding script is empty; it must at least set `dimensions`".to_string(),
            );
            return;
        }
        // Compile under the limits the node will run the script with.
        let compiled = if config.limits == self.limits {
            self.engine.compile(&config.binding_script)
        } else {
            script_engine(&config.limits).compile(&config.binding_script)
        };
        if let Err(e) = compiled {
            report.push(
                Severity::Error,
                None,
                format!("Binding script does not compile: {}", e),
            );
        }
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::params::{ParamKind, ParameterDecl};
    use proptest::prelude::*;

    fn base() -> KernelNodeConfig {
        KernelNodeConfig::new("test")
            .with_kernel("fn main(x, y, z, args) { }", "main")
            .with_binding_script("dimensions = [1];")
    }

    #[test]
    fn test_clean_config() {
        let config = base()
            .with_input("src")
            .with_output("dst")
            .with_parameter(ParameterDecl::new("flipX", ParamKind::Boolean));
        let report = Validator::new().validate(&config);
        assert!(report.issues().is_empty(), "{}", report);
    }

    #[test]
    fn test_output_and_parameter_share_name() {
        let config = base()
            .with_input("src")
            .with_output("dst")
            .with_parameter(ParameterDecl::new("dst", ParamKind::Float));
        let report = Validator::new().validate(&config);
        assert!(report.has_errors());
        assert!(report.mentions("dst"));
        assert!(report.error_summary().contains("unique node-wide"));
        assert!(report.error_summary().contains("output slot, parameter"));
    }

    #[test]
    fn test_reserved_and_empty_names() {
        let config = base().with_input("outputs").with_output("");
        let report = Validator::new().validate(&config);
        assert_eq!(report.errors().count(), 2);
        assert!(report.mentions("outputs"));
    }

    #[test]
    fn test_non_identifier_is_warning() {
        let config = base().with_input("left image");
        let report = Validator::new().validate(&config);
        assert!(report.is_valid());
        assert_eq!(report.warnings().count(), 1);
    }

    #[test]
    fn test_parameter_value_kind() {
        let config = base()
            .with_parameter(ParameterDecl::new("radius", ParamKind::Integer).with_value(1.5))
            .with_parameter(ParameterDecl::new("sigma", ParamKind::Float).with_value(2i64));
        let report = Validator::new().validate(&config);
        assert_eq!(report.errors().count(), 1);
        assert!(report.mentions("radius"));
    }

    #[test]
    fn test_kernel_and_script_checks() {
        let config = KernelNodeConfig::new("broken")
            .with_kernel("", "")
            .with_binding_script("let = ;");
        let report = Validator::new().validate(&config);
        assert_eq!(report.errors().count(), 3);
        assert!(report.to_string().contains("does not compile"));
    }

    #[test]
    fn test_script_checked_under_config_limits() {
        let nested = format!(
            "dimensions = [{}1{}];",
            "(".repeat(20),
            ")".repeat(20)
        );
        let mut config = base().with_binding_script(nested);
        let validator = Validator::new();
        assert!(validator.validate(&config).is_valid());

        config.limits.max_expr_depth = 8;
        let report = validator.validate(&config);
        assert!(report.has_errors());
        assert!(report.error_summary().contains("does not compile"));

        let matching = Validator::with_limits(config.limits);
        assert!(matching.validate(&config).has_errors());
    }

    fn name_strategy() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9_]{0,7}".prop_filter("reserved or keyword", |n| {
            !RESERVED_NAMES.contains(&n.as_str()) && is_identifier(n)
        })
    }

    proptest! {
        #[test]
        fn distinct_names_validate(names in prop::collection::hash_set(name_strategy(), 1..12)) {
            let names: Vec<String> = names.into_iter().collect();
            let mut config = base();
            for (i, name) in names.iter().enumerate() {
                config = match i % 3 {
                    0 => config.with_input(name.clone()),
                    1 => config.with_output(name.clone()),
                    _ => config.with_parameter(ParameterDecl::new(name.clone(), ParamKind::Integer)),
                };
            }
            prop_assert!(Validator::new().validate(&config).is_valid());
        }

        #[test]
        fn any_duplicate_is_an_error(
            names in prop::collection::hash_set(name_strategy(), 1..8),
            pick in any::<prop::sample::Index>(),
            target in 0usize..3,
        ) {
            let names: Vec<String> = names.into_iter().collect();
            let mut config = base();
            for name in &names {
                config = config.with_input(name.clone());
            }
            let dup = pick.get(&names).clone();
            config = match target {
                0 => config.with_input(dup.clone()),
                1 => config.with_output(dup.clone()),
                _ => config.with_parameter(ParameterDecl::new(dup.clone(), ParamKind::Boolean)),
            };
            let report = Validator::new().validate(&config);
            prop_assert!(report.has_errors());
            prop_assert!(report.mentions(&dup));
        }
    }
}
