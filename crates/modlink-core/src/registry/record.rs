//! Module records.

use super::binding::BindingCell;
use super::SessionId;
use crate::error::ModuleError;
use crate::format::ModuleFormat;
use crate::id::ResourceIdentifier;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::watch;

/// Lifecycle of a module record.
///
/// `Pending -> Loading -> Evaluating -> Evaluated`, or `Failed` from any
/// in-flight state. Only invalidation moves a record back to `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleStatus {
    Pending,
    Loading,
    Evaluating,
    Evaluated,
    Failed,
}

impl ModuleStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Loading => "loading",
            Self::Evaluating => "evaluating",
            Self::Evaluated => "evaluated",
            Self::Failed => "failed",
        }
    }

    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::Loading | Self::Evaluating)
    }

    #[must_use]
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Evaluated | Self::Failed)
    }
}

impl fmt::Display for ModuleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub(crate) struct RecordState {
    pub(crate) format: ModuleFormat,
    pub(crate) raw_source: Option<Arc<str>>,
    pub(crate) source: Option<Arc<str>>,
    pub(crate) source_hash: Option<String>,
    pub(crate) namespace: BTreeMap<String, BindingCell>,
    pub(crate) dependencies: Vec<ResourceIdentifier>,
    pub(crate) resolved: BTreeMap<String, ResourceIdentifier>,
    pub(crate) dependents: BTreeSet<ResourceIdentifier>,
    pub(crate) failure: Option<ModuleError>,
    pub(crate) owner: Option<SessionId>,
}

impl RecordState {
    /// Forget everything learned by loading; dependents stay linked.
    pub(crate) fn reset(&mut self) {
        self.raw_source = None;
        self.source = None;
        self.source_hash = None;
        self.namespace = BTreeMap::new();
        self.dependencies.clear();
        self.resolved.clear();
        self.failure = None;
        self.owner = None;
    }

    /// The aggregate cell of an eager-sync module, created as `{}`.
    pub(crate) fn aggregate(&mut self) -> BindingCell {
        let cell = self.namespace.entry("default".to_string()).or_default();
        if !cell.is_initialized() {
            cell.set(json!({}));
        }
        cell.clone()
    }
}

/// One module, owned by the registry for its whole lifetime.
///
/// External code reads records; only the registry mutates them.
pub struct ModuleRecord {
    id: ResourceIdentifier,
    status: watch::Sender<ModuleStatus>,
    state: RwLock<RecordState>,
    interest: AtomicUsize,
}

impl ModuleRecord {
    pub(crate) fn new(id: ResourceIdentifier, format: ModuleFormat) -> Self {
        let (status, _) = watch::channel(ModuleStatus::Pending);
        Self {
            id,
            status,
            state: RwLock::new(RecordState {
                format,
                raw_source: None,
                source: None,
                source_hash: None,
                namespace: BTreeMap::new(),
                dependencies: Vec::new(),
                resolved: BTreeMap::new(),
                dependents: BTreeSet::new(),
                failure: None,
                owner: None,
            }),
            interest: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn id(&self) -> &ResourceIdentifier {
        &self.id
    }

    #[must_use]
    pub fn status(&self) -> ModuleStatus {
        *self.status.borrow()
    }

    #[must_use]
    pub fn format(&self) -> ModuleFormat {
        self.read().format
    }

    /// Source as returned by the load stage.
    #[must_use]
    pub fn raw_source(&self) -> Option<Arc<str>> {
        self.read().raw_source.clone()
    }

    /// Source after the transform stage, as evaluated.
    #[must_use]
    pub fn source(&self) -> Option<Arc<str>> {
        self.read().source.clone()
    }

    /// BLAKE3 hash of the raw source.
    #[must_use]
    pub fn source_hash(&self) -> Option<String> {
        self.read().source_hash.clone()
    }

    /// Dependencies in declared import order.
    #[must_use]
    pub fn dependencies(&self) -> Vec<ResourceIdentifier> {
        self.read().dependencies.clone()
    }

    #[must_use]
    pub fn dependents(&self) -> Vec<ResourceIdentifier> {
        self.read().dependents.iter().cloned().collect()
    }

    /// The identifier a specifier of this module resolved to.
    #[must_use]
    pub fn resolved(&self, specifier: &str) -> Option<ResourceIdentifier> {
        self.read().resolved.get(specifier).cloned()
    }

    #[must_use]
    pub fn export_names(&self) -> Vec<String> {
        self.read().namespace.keys().cloned().collect()
    }

    #[must_use]
    pub fn binding(&self, name: &str) -> Option<BindingCell> {
        self.read().namespace.get(name).cloned()
    }

    /// Snapshot of every export cell.
    #[must_use]
    pub fn bindings(&self) -> BTreeMap<String, BindingCell> {
        self.read().namespace.clone()
    }

    #[must_use]
    pub fn failure(&self) -> Option<ModuleError> {
        self.read().failure.clone()
    }

    /// Number of callers currently waiting on or driving this record.
    #[must_use]
    pub fn interest(&self) -> usize {
        self.interest.load(Ordering::SeqCst)
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<ModuleStatus> {
        self.status.subscribe()
    }

    /// Callers change status while holding the state write lock, so a status
    /// read under that lock is stable.
    pub(crate) fn set_status(&self, status: ModuleStatus) {
        let previous = self.status.send_replace(status);
        if previous != status {
            tracing::debug!(id = %self.id, from = %previous, to = %status, "module status");
        }
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, RecordState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, RecordState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn add_interest(&self) {
        self.interest.fetch_add(1, Ordering::SeqCst);
    }

    /// Returns the remaining interest.
    pub(crate) fn release_interest(&self) -> usize {
        self.interest.fetch_sub(1, Ordering::SeqCst).saturating_sub(1)
    }

    /// Plain JSON view of the exports; uninitialized bindings are `null`.
    #[must_use]
    pub fn exports_value(&self) -> Value {
        let state = self.read();
        if state.format == ModuleFormat::EagerSync {
            return state
                .namespace
                .get("default")
                .and_then(|cell| cell.get().value())
                .unwrap_or(Value::Null);
        }
        Value::Object(
            state
                .namespace
                .iter()
                .map(|(name, cell)| (name.clone(), cell.get().value().unwrap_or(Value::Null)))
                .collect(),
        )
    }
}

impl fmt::Debug for ModuleRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleRecord")
            .field("id", &self.id)
            .field("status", &self.status())
            .field("format", &self.format())
            .finish_non_exhaustive()
    }
}
