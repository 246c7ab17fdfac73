//! Module body evaluation.
//!
//! The registry drives modules but does not know how to run them. A
//! [`ModuleEvaluator`] reports a body's static imports and exports, then
//! executes it against an [`EvalScope`] that hands out binding cells of
//! dependencies and records the module's own exports.

pub mod script;

pub use script::ScriptEvaluator;

use crate::error::codes;
use crate::format::ModuleFormat;
use crate::id::ResourceIdentifier;
use crate::interop::{self, InteropError, Namespace};
use crate::registry::{BindingCell, ModuleHost, ModuleRecord, ModuleRegistry};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// How a dependency is requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportKind {
    /// Declared import or re-export.
    Static,
    /// Synchronous `require`.
    Require,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRequest {
    pub specifier: String,
    pub kind: ImportKind,
    /// 1-indexed source line.
    pub line: usize,
}

/// What a body declares before it runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleAnalysis {
    /// Imports in declared order; a specifier may repeat.
    pub imports: Vec<ImportRequest>,
    /// Statically known export names.
    pub exports: Vec<String>,
}

impl ModuleAnalysis {
    /// Distinct specifiers in first-appearance order.
    #[must_use]
    pub fn specifiers(&self) -> Vec<&str> {
        let mut seen = Vec::new();
        for import in &self.imports {
            if !seen.contains(&import.specifier.as_str()) {
                seen.push(import.specifier.as_str());
            }
        }
        seen
    }
}

/// Executes module bodies.
///
/// Implementations must be `Send + Sync`; one evaluator serves every module
/// of an engine.
pub trait ModuleEvaluator: Send + Sync {
    fn name(&self) -> &'static str;

    fn analyze(
        &self,
        id: &ResourceIdentifier,
        source: &str,
        format: ModuleFormat,
    ) -> Result<ModuleAnalysis, EvaluationError>;

    /// Run the body. Every dependency named by `analyze` has been ensured,
    /// except where a cycle handed back a partial record.
    fn evaluate(
        &self,
        id: &ResourceIdentifier,
        source: &str,
        format: ModuleFormat,
        scope: &mut EvalScope<'_>,
    ) -> Result<(), EvaluationError>;
}

/// Failure raised while analyzing or running a module body.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvaluationError {
    #[error("syntax error on line {line}: {message}")]
    Syntax { line: usize, message: String },

    #[error("uncaught exception: {0}")]
    Thrown(Value),

    #[error("'{name}' was read before it was initialized")]
    UninitializedBinding { name: String },

    #[error("{module} has no export named '{name}'")]
    MissingExport {
        module: ResourceIdentifier,
        name: String,
    },

    #[error("'{name}' is not defined")]
    UndefinedName { name: String },

    #[error("{0}")]
    Failed(String),

    #[error(transparent)]
    Interop(#[from] InteropError),
}

impl EvaluationError {
    pub(crate) fn syntax(line: usize, message: impl Into<String>) -> Self {
        Self::Syntax {
            line,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Syntax { .. } => codes::EVAL_SYNTAX,
            Self::Thrown(_) => codes::EVAL_THROWN,
            Self::UninitializedBinding { .. } => codes::EVAL_UNINITIALIZED_BINDING,
            Self::MissingExport { .. } => codes::EVAL_MISSING_EXPORT,
            Self::UndefinedName { .. } => codes::EVAL_UNDEFINED_NAME,
            Self::Failed(_) => codes::EVAL_FAILED,
            Self::Interop(e) => e.code(),
        }
    }
}

/// The view of the registry a running body gets.
pub struct EvalScope<'a> {
    registry: &'a ModuleRegistry,
    host: &'a dyn ModuleHost,
    module: &'a Arc<ModuleRecord>,
    resolved: &'a BTreeMap<String, ResourceIdentifier>,
}

impl<'a> EvalScope<'a> {
    pub(crate) fn new(
        registry: &'a ModuleRegistry,
        host: &'a dyn ModuleHost,
        module: &'a Arc<ModuleRecord>,
        resolved: &'a BTreeMap<String, ResourceIdentifier>,
    ) -> Self {
        Self {
            registry,
            host,
            module,
            resolved,
        }
    }

    /// The module being evaluated.
    #[must_use]
    pub fn module(&self) -> &ResourceIdentifier {
        self.module.id()
    }

    fn resolved_id(&self, specifier: &str) -> Result<&'a ResourceIdentifier, EvaluationError> {
        self.resolved.get(specifier).ok_or_else(|| {
            EvaluationError::Failed(format!("'{specifier}' was not declared as an import"))
        })
    }

    fn dependency(&self, specifier: &str) -> Result<Arc<ModuleRecord>, EvaluationError> {
        let id = self.resolved_id(specifier)?;
        self.registry
            .get(id)
            .ok_or_else(|| InteropError::Unavailable { id: id.clone() }.into())
    }

    /// Capture one binding of a dependency.
    ///
    /// An eager-sync dependency only has its aggregate `default`.
    pub fn import_binding(&self, specifier: &str, name: &str) -> Result<BindingCell, EvaluationError> {
        let dep = self.dependency(specifier)?;
        if dep.format() == ModuleFormat::EagerSync && name != "default" {
            return Err(InteropError::NoNamedExports {
                id: dep.id().clone(),
                name: name.to_string(),
            }
            .into());
        }
        dep.binding(name).ok_or_else(|| EvaluationError::MissingExport {
            module: dep.id().clone(),
            name: name.to_string(),
        })
    }

    /// Capture a dependency's whole namespace.
    pub fn import_namespace(&self, specifier: &str) -> Result<Namespace, EvaluationError> {
        let dep = self.dependency(specifier)?;
        Ok(Namespace::of(&dep))
    }

    /// Synchronous access to a dependency's current exports.
    pub fn require(&self, specifier: &str) -> Result<Value, EvaluationError> {
        let id = self.resolved_id(specifier)?;
        let namespace = interop::access_from_sync(self.registry, self.host, id)?;
        Ok(namespace.to_value())
    }

    /// This module's export cell for `name`, created on first use.
    #[must_use]
    pub fn export_cell(&self, name: &str) -> BindingCell {
        self.module
            .write()
            .namespace
            .entry(name.to_string())
            .or_default()
            .clone()
    }

    pub fn export_value(&self, name: &str, value: Value) {
        self.export_cell(name).set(value);
    }

    /// Export `name` as a live alias of `target`.
    pub fn export_forward(&self, name: &str, target: &BindingCell) {
        self.export_cell(name).forward_to(target);
    }

    /// Re-export every named export of an async-static dependency that this
    /// module does not export itself.
    pub fn export_all_from(&self, specifier: &str) -> Result<(), EvaluationError> {
        let dep = self.dependency(specifier)?;
        if dep.format() == ModuleFormat::EagerSync {
            tracing::debug!(from = %dep.id(), "export * of an eager-sync module re-exports nothing");
            return Ok(());
        }
        let bindings = dep.bindings();
        let mut state = self.module.write();
        for (name, cell) in bindings {
            if name == "default" || state.namespace.contains_key(&name) {
                continue;
            }
            let forward = BindingCell::new();
            forward.forward_to(&cell);
            state.namespace.insert(name, forward);
        }
        Ok(())
    }

    /// Replace the aggregate exports value.
    pub fn set_module_exports(&self, value: Value) {
        self.module.write().aggregate().set(value);
    }

    /// Assign one member of the aggregate exports value.
    pub fn set_export_member(&self, name: &str, value: Value) -> Result<(), EvaluationError> {
        let aggregate = self.module.write().aggregate();
        let assigned = aggregate.update(|exports| {
            if let Value::Object(map) = exports {
                map.insert(name.to_string(), value);
            }
        });
        let is_object = matches!(aggregate.get().value(), Some(Value::Object(_)));
        if assigned && is_object {
            Ok(())
        } else {
            Err(EvaluationError::Failed(format!(
                "cannot set '{name}': module.exports is not an object"
            )))
        }
    }
}
