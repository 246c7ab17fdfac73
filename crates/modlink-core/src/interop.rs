//! Access across the two module formats.
//!
//! A synchronous context can never wait for an async-static module, so
//! [`access_from_sync`] fails fast with [`InteropError::AsyncOnly`] until
//! that module was evaluated some other way. An asynchronous context can
//! always wait, but an eager-sync module only ever shows it the single
//! aggregate `default` binding: its export surface is only known after the
//! whole body ran.

use crate::error::{codes, ModuleError};
use crate::format::ModuleFormat;
use crate::id::ResourceIdentifier;
use crate::registry::{Binding, BindingCell, ModuleHost, ModuleRecord, ModuleRegistry, ModuleStatus};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InteropError {
    #[error("{id} is an async-static module that has not been evaluated; import it asynchronously first")]
    AsyncOnly { id: ResourceIdentifier },

    #[error("{id} is an eager-sync module and has no named export '{name}'; use its default export")]
    NoNamedExports { id: ResourceIdentifier, name: String },

    #[error("{id} is not available to synchronous code")]
    Unavailable { id: ResourceIdentifier },

    /// The target already failed; carries its recorded error.
    #[error(transparent)]
    Failed(ModuleError),
}

impl InteropError {
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::AsyncOnly { .. } => codes::INTEROP_ASYNC_ONLY,
            Self::NoNamedExports { .. } => codes::INTEROP_NO_NAMED_EXPORTS,
            Self::Unavailable { .. } => codes::INTEROP_UNAVAILABLE,
            Self::Failed(err) => err.code(),
        }
    }
}

/// Bound view of a module's exports.
///
/// Holds the cells, not their values: reading later observes later
/// assignments.
#[derive(Debug, Clone)]
pub struct Namespace {
    id: ResourceIdentifier,
    format: ModuleFormat,
    bindings: BTreeMap<String, BindingCell>,
}

impl Namespace {
    /// The view of `record` an importer may see.
    #[must_use]
    pub fn of(record: &ModuleRecord) -> Self {
        let format = record.format();
        let mut bindings = record.bindings();
        if format == ModuleFormat::EagerSync {
            bindings.retain(|name, _| name == "default");
        }
        Self {
            id: record.id().clone(),
            format,
            bindings,
        }
    }

    #[must_use]
    pub fn id(&self) -> &ResourceIdentifier {
        &self.id
    }

    #[must_use]
    pub fn format(&self) -> ModuleFormat {
        self.format
    }

    /// Current state of one binding, `None` when not exported.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Binding> {
        self.bindings.get(name).map(BindingCell::get)
    }

    #[must_use]
    pub fn cell(&self, name: &str) -> Option<&BindingCell> {
        self.bindings.get(name)
    }

    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.bindings.keys().map(String::as_str).collect()
    }

    /// Plain value: the aggregate for eager-sync modules, otherwise an
    /// object of the named bindings with `null` for uninitialized ones.
    #[must_use]
    pub fn to_value(&self) -> Value {
        if self.format == ModuleFormat::EagerSync {
            return self
                .get("default")
                .and_then(Binding::value)
                .unwrap_or(Value::Null);
        }
        Value::Object(
            self.bindings
                .iter()
                .map(|(name, cell)| (name.clone(), cell.get().value().unwrap_or(Value::Null)))
                .collect(),
        )
    }
}

/// Exports of `id` for synchronous code, without waiting.
///
/// An eager-sync module still being evaluated yields its partial aggregate,
/// as in a `require` cycle.
pub fn access_from_sync(
    registry: &ModuleRegistry,
    host: &dyn ModuleHost,
    id: &ResourceIdentifier,
) -> Result<Namespace, InteropError> {
    let Some(record) = registry.get(id) else {
        return Err(match host.detect_format(id) {
            ModuleFormat::AsyncStatic => InteropError::AsyncOnly { id: id.clone() },
            ModuleFormat::EagerSync => InteropError::Unavailable { id: id.clone() },
        });
    };

    match (record.status(), record.format()) {
        (ModuleStatus::Evaluated, _) => Ok(Namespace::of(&record)),
        (ModuleStatus::Failed, _) => Err(record
            .failure()
            .map_or_else(|| InteropError::Unavailable { id: id.clone() }, InteropError::Failed)),
        (_, ModuleFormat::AsyncStatic) => {
            tracing::debug!(%id, status = %record.status(), "synchronous access to async-static module");
            Err(InteropError::AsyncOnly { id: id.clone() })
        }
        (status, ModuleFormat::EagerSync) if status.is_in_flight() => Ok(Namespace::of(&record)),
        (_, ModuleFormat::EagerSync) => Err(InteropError::Unavailable { id: id.clone() }),
    }
}

/// Exports of `id` for asynchronous code, loading and evaluating it first.
pub async fn access_from_async(
    registry: &ModuleRegistry,
    host: &dyn ModuleHost,
    id: &ResourceIdentifier,
) -> Result<Namespace, ModuleError> {
    let record = registry.ensure_loaded(host, id).await?;
    Ok(Namespace::of(&record))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_eager_sync_namespace_is_aggregate_only() {
        let record = ModuleRecord::new(ResourceIdentifier::builtin("cjs"), ModuleFormat::EagerSync);
        record.write().aggregate().set(json!({"a": 1}));
        record.write().namespace.insert("a".into(), BindingCell::initialized(json!(1)));

        let ns = Namespace::of(&record);
        assert_eq!(ns.names(), vec!["default"]);
        assert_eq!(ns.to_value(), json!({"a": 1}));
        assert!(ns.get("a").is_none());
    }

    #[test]
    fn test_async_static_namespace_is_live() {
        let record = ModuleRecord::new(ResourceIdentifier::builtin("esm"), ModuleFormat::AsyncStatic);
        let cell = BindingCell::new();
        record.write().namespace.insert("x".into(), cell.clone());

        let ns = Namespace::of(&record);
        assert_eq!(ns.get("x"), Some(Binding::Uninitialized));
        assert_eq!(ns.to_value(), json!({"x": null}));

        cell.set(json!(5));
        assert_eq!(ns.get("x").and_then(Binding::value), Some(json!(5)));
    }

    #[test]
    fn test_codes() {
        let id = ResourceIdentifier::builtin("m");
        assert_eq!(InteropError::AsyncOnly { id: id.clone() }.code(), codes::INTEROP_ASYNC_ONLY);
        assert_eq!(
            InteropError::NoNamedExports { id, name: "x".into() }.code(),
            codes::INTEROP_NO_NAMED_EXPORTS
        );
    }
}
