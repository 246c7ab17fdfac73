//! Module registry.
//!
//! An arena of [`ModuleRecord`]s keyed by [`ResourceIdentifier`]. The
//! registry guarantees:
//!
//! - single flight: concurrent `ensure_loaded` calls for one identifier share
//!   one load/evaluate sequence and receive the same record
//! - cycles: re-entering a module that is still in flight, from the same
//!   task or through a chain of tasks waiting on each other, hands back the
//!   partially evaluated record instead of deadlocking
//! - cached failure: a Failed record returns the same error until invalidated
//! - cancellation: dropping an `ensure_loaded` future releases its interest;
//!   a record it was driving goes back to Pending for remaining waiters

mod binding;
mod record;

pub use binding::{Binding, BindingCell};
pub use record::{ModuleRecord, ModuleStatus};

use crate::error::{ModuleError, ModuleErrorKind, Stage};
use crate::eval::{EvalScope, ModuleEvaluator};
use crate::format::ModuleFormat;
use crate::id::ResourceIdentifier;
use dashmap::DashMap;
use futures::future::BoxFuture;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Identity of one top-level `ensure_loaded` call and everything it drives.
pub type SessionId = u64;

/// A module after the load and transform stages.
#[derive(Debug, Clone)]
pub struct FetchedModule {
    pub raw_source: String,
    pub source: String,
    pub format: ModuleFormat,
}

/// A failure attributed to the stage that produced it.
#[derive(Debug, Clone)]
pub struct StageError {
    pub stage: Stage,
    pub kind: ModuleErrorKind,
}

impl StageError {
    pub fn new(stage: Stage, kind: impl Into<ModuleErrorKind>) -> Self {
        Self {
            stage,
            kind: kind.into(),
        }
    }
}

/// Everything the registry needs from the engine to drive a module.
pub trait ModuleHost: Send + Sync {
    /// Resolve an import of `importer` (whose format is `format`).
    fn resolve(
        &self,
        specifier: &str,
        importer: &ResourceIdentifier,
        format: ModuleFormat,
    ) -> Result<ResourceIdentifier, ModuleErrorKind>;

    /// Format expected before the module is loaded.
    fn detect_format(&self, id: &ResourceIdentifier) -> ModuleFormat;

    /// Run the load and transform stages.
    fn fetch<'a>(&'a self, id: &'a ResourceIdentifier)
        -> BoxFuture<'a, Result<FetchedModule, StageError>>;

    fn evaluator(&self) -> &dyn ModuleEvaluator;
}

enum Claim {
    Done,
    Failed(ModuleError),
    /// The caller's own session is driving this record: a cycle.
    Reentrant,
    Owned,
    InFlight(Option<SessionId>),
}

/// Memoizing, cycle-safe module arena.
#[derive(Debug, Default)]
pub struct ModuleRegistry {
    records: DashMap<ResourceIdentifier, Arc<ModuleRecord>>,
    /// Session -> record it is currently waiting for.
    waits_for: DashMap<SessionId, ResourceIdentifier>,
    sessions: AtomicU64,
}

impl ModuleRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, id: &ResourceIdentifier) -> Option<Arc<ModuleRecord>> {
        self.records.get(id).map(|r| r.value().clone())
    }

    /// Identifiers of every record, sorted.
    #[must_use]
    pub fn ids(&self) -> Vec<ResourceIdentifier> {
        let mut ids: Vec<_> = self.records.iter().map(|r| r.key().clone()).collect();
        ids.sort();
        ids
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Drop every record.
    pub fn clear(&self) {
        self.records.clear();
        self.waits_for.clear();
    }

    /// Existing record, or a new Pending one with the detected format.
    pub fn record(&self, host: &dyn ModuleHost, id: &ResourceIdentifier) -> Arc<ModuleRecord> {
        if let Some(existing) = self.get(id) {
            return existing;
        }
        self.records
            .entry(id.clone())
            .or_insert_with(|| Arc::new(ModuleRecord::new(id.clone(), host.detect_format(id))))
            .clone()
    }

    /// Load and evaluate `id` unless that already happened.
    pub async fn ensure_loaded(
        &self,
        host: &dyn ModuleHost,
        id: &ResourceIdentifier,
    ) -> Result<Arc<ModuleRecord>, ModuleError> {
        let session = self.sessions.fetch_add(1, Ordering::SeqCst) + 1;
        self.ensure_in(host, id, None, session, Vec::new()).await
    }

    fn ensure_in<'a>(
        &'a self,
        host: &'a dyn ModuleHost,
        id: &'a ResourceIdentifier,
        specifier: Option<&'a str>,
        session: SessionId,
        chain: Vec<ResourceIdentifier>,
    ) -> BoxFuture<'a, Result<Arc<ModuleRecord>, ModuleError>> {
        Box::pin(async move {
            loop {
                let record = self.record(host, id);
                let mut interest = Interest::new(self, &record);

                match claim(&record, session) {
                    Claim::Done | Claim::Reentrant => return Ok(record),
                    Claim::Failed(err) => return Err(err),
                    Claim::Owned => {
                        interest.driving = true;
                        let result = self.drive(host, &record, specifier, session, chain).await;
                        interest.settled = true;
                        return result.map(|()| record);
                    }
                    Claim::InFlight(owner) => {
                        let _wait = WaitEdge::new(self, session, id);
                        if self.deadlocked(session, owner) {
                            tracing::debug!(%id, session, "cross-task cycle, using partial record");
                            return Ok(record);
                        }
                        let mut rx = record.subscribe();
                        // An error means the record was dropped; retry.
                        let _ = rx.wait_for(|s| !s.is_in_flight()).await;
                    }
                }
            }
        })
    }

    /// Whether waiting on `owner` would close a waits-for cycle back to
    /// `session`.
    fn deadlocked(&self, session: SessionId, owner: Option<SessionId>) -> bool {
        let mut current = owner;
        for _ in 0..=self.waits_for.len() {
            let Some(owner) = current else {
                return false;
            };
            if owner == session {
                return true;
            }
            let Some(waiting_on) = self.waits_for.get(&owner).map(|r| r.value().clone()) else {
                return false;
            };
            current = self.get(&waiting_on).and_then(|r| r.read().owner);
        }
        false
    }

    async fn drive(
        &self,
        host: &dyn ModuleHost,
        record: &Arc<ModuleRecord>,
        specifier: Option<&str>,
        session: SessionId,
        mut chain: Vec<ResourceIdentifier>,
    ) -> Result<(), ModuleError> {
        let id = record.id().clone();
        chain.push(id.clone());

        let fetched = match host.fetch(&id).await {
            Ok(fetched) => fetched,
            Err(err) => {
                let error = ModuleError::new(err.kind, err.stage, specifier.map(String::from), chain);
                return Err(fail(record, error));
            }
        };
        let format = fetched.format;

        let evaluator = host.evaluator();
        let analysis = match evaluator.analyze(&id, &fetched.source, format) {
            Ok(analysis) => analysis,
            Err(err) => {
                let error = ModuleError::new(err, Stage::Evaluate, specifier.map(String::from), chain);
                return Err(fail(record, error));
            }
        };

        {
            let mut state = record.write();
            state.format = format;
            state.source_hash = Some(modlink_util::hash::content_hash(&fetched.raw_source));
            state.raw_source = Some(Arc::from(fetched.raw_source));
            state.source = Some(Arc::from(fetched.source.as_str()));
            for name in &analysis.exports {
                state.namespace.entry(name.clone()).or_default();
            }
            if format == ModuleFormat::EagerSync {
                state.aggregate();
            }
            record.set_status(ModuleStatus::Evaluating);
        }

        let mut resolved = BTreeMap::new();
        for import in &analysis.imports {
            if resolved.contains_key(&import.specifier) {
                continue;
            }
            let dep_id = match host.resolve(&import.specifier, &id, format) {
                Ok(dep_id) => dep_id,
                Err(kind) => {
                    let error = ModuleError::new(
                        kind,
                        Stage::Resolve,
                        Some(import.specifier.clone()),
                        chain,
                    );
                    return Err(fail(record, error));
                }
            };
            resolved.insert(import.specifier.clone(), dep_id.clone());
            self.link(host, record, &dep_id);

            // A synchronous importer cannot wait on an async-static module;
            // `require` of it is answered by the interop bridge.
            if format == ModuleFormat::EagerSync
                && self.record(host, &dep_id).format() == ModuleFormat::AsyncStatic
            {
                continue;
            }

            if let Err(err) = self
                .ensure_in(host, &dep_id, Some(&import.specifier), session, chain.clone())
                .await
            {
                return Err(fail(record, err));
            }
        }

        record.write().resolved = resolved.clone();

        let mut scope = EvalScope::new(self, host, record, &resolved);
        if let Err(err) = evaluator.evaluate(&id, &fetched.source, format, &mut scope) {
            let error = ModuleError::new(err, Stage::Evaluate, specifier.map(String::from), chain);
            return Err(fail(record, error));
        }

        let mut state = record.write();
        state.owner = None;
        record.set_status(ModuleStatus::Evaluated);
        Ok(())
    }

    /// Record `importer -> dependency` on both sides.
    fn link(&self, host: &dyn ModuleHost, importer: &ModuleRecord, dependency: &ResourceIdentifier) {
        let dep = self.record(host, dependency);
        dep.write().dependents.insert(importer.id().clone());
        let mut state = importer.write();
        if !state.dependencies.contains(dependency) {
            state.dependencies.push(dependency.clone());
        }
    }

    /// Undo the edges of a cancelled drive. Dependencies left with no
    /// interest, no dependents and nothing loaded leave the arena.
    fn unlink_cancelled(&self, importer: &ResourceIdentifier, dependencies: Vec<ResourceIdentifier>) {
        for dep in dependencies {
            let Some(dep_record) = self.get(&dep) else {
                continue;
            };
            dep_record.write().dependents.remove(importer);
            self.remove_if_unused(&dep_record);
        }
    }

    fn remove_if_unused(&self, record: &Arc<ModuleRecord>) {
        self.records.remove_if(record.id(), |_, current| {
            Arc::ptr_eq(current, record)
                && current.interest() == 0
                && current.status() == ModuleStatus::Pending
                && current.read().dependents.is_empty()
        });
    }

    /// Reset `id` and, transitively, every module that imported it.
    ///
    /// Returns the invalidated identifiers, sorted. Records still in flight
    /// are skipped; their drive will finish against the old state.
    pub fn invalidate(&self, id: &ResourceIdentifier) -> Vec<ResourceIdentifier> {
        let mut queue = VecDeque::from([id.clone()]);
        let mut seen = BTreeSet::new();
        let mut invalidated = Vec::new();

        while let Some(current) = queue.pop_front() {
            if !seen.insert(current.clone()) {
                continue;
            }
            let Some(record) = self.get(&current) else {
                continue;
            };

            let dependencies = {
                let mut state = record.write();
                if record.status().is_in_flight() {
                    tracing::warn!(id = %current, "skipping invalidation of in-flight module");
                    continue;
                }
                queue.extend(state.dependents.iter().cloned());
                let dependencies = std::mem::take(&mut state.dependencies);
                state.reset();
                record.set_status(ModuleStatus::Pending);
                dependencies
            };

            for dep in dependencies {
                if let Some(dep_record) = self.get(&dep) {
                    dep_record.write().dependents.remove(&current);
                }
            }
            invalidated.push(current);
        }

        invalidated.sort();
        tracing::debug!(root = %id, count = invalidated.len(), "invalidated modules");
        invalidated
    }
}

fn claim(record: &ModuleRecord, session: SessionId) -> Claim {
    let mut state = record.write();
    match record.status() {
        ModuleStatus::Evaluated => Claim::Done,
        ModuleStatus::Failed => match &state.failure {
            Some(err) => Claim::Failed(err.clone()),
            None => Claim::Done,
        },
        ModuleStatus::Loading | ModuleStatus::Evaluating => {
            if state.owner == Some(session) {
                Claim::Reentrant
            } else {
                Claim::InFlight(state.owner)
            }
        }
        ModuleStatus::Pending => {
            state.owner = Some(session);
            record.set_status(ModuleStatus::Loading);
            Claim::Owned
        }
    }
}

fn fail(record: &ModuleRecord, error: ModuleError) -> ModuleError {
    let mut state = record.write();
    state.failure = Some(error.clone());
    state.owner = None;
    record.set_status(ModuleStatus::Failed);
    tracing::debug!(id = %record.id(), code = error.code(), "module failed");
    error
}

/// Interest held by one `ensure_in` call.
///
/// On drop, an unfinished drive returns the record to Pending so another
/// waiter can take over; a record nobody is interested in any more is
/// removed from the arena.
struct Interest<'a> {
    registry: &'a ModuleRegistry,
    record: Arc<ModuleRecord>,
    driving: bool,
    settled: bool,
}

impl<'a> Interest<'a> {
    fn new(registry: &'a ModuleRegistry, record: &Arc<ModuleRecord>) -> Self {
        record.add_interest();
        Self {
            registry,
            record: record.clone(),
            driving: false,
            settled: false,
        }
    }
}

impl Drop for Interest<'_> {
    fn drop(&mut self) {
        let remaining = self.record.release_interest();
        if !self.driving || self.settled {
            return;
        }

        let linked = {
            let mut state = self.record.write();
            if !self.record.status().is_in_flight() {
                return;
            }
            // Cells survive: importers may already hold them.
            state.owner = None;
            self.record.set_status(ModuleStatus::Pending);
            std::mem::take(&mut state.dependencies)
        };
        tracing::debug!(id = %self.record.id(), remaining, "load cancelled");

        // The next driver links again from scratch.
        self.registry.unlink_cancelled(self.record.id(), linked);
        if remaining == 0 {
            self.registry.remove_if_unused(&self.record);
        }
    }
}

/// Waits-for edge, removed when the wait ends or is cancelled.
struct WaitEdge<'a> {
    registry: &'a ModuleRegistry,
    session: SessionId,
}

impl<'a> WaitEdge<'a> {
    fn new(registry: &'a ModuleRegistry, session: SessionId, id: &ResourceIdentifier) -> Self {
        registry.waits_for.insert(session, id.clone());
        Self { registry, session }
    }
}

impl Drop for WaitEdge<'_> {
    fn drop(&mut self) {
        self.registry.waits_for.remove(&self.session);
    }
}
