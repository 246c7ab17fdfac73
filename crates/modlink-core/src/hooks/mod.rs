//! Resolve/load/transform hook chain.
//!
//! Hooks are registered once, at engine start-up, as [`HookDescriptor`]s.
//! The chain visits them in priority order (registration order breaks ties)
//! and each hook answers with a [`HookOutcome`]:
//!
//! - `Delegate`: pass the input on unchanged
//! - `Rewrite(input)`: pass a modified input on
//! - `ShortCircuit(output)`: final answer, nothing after this hook runs
//!
//! When every resolve or load hook delegates, the builtin resolver or loader
//! runs last. A hook error aborts the chain and names the hook and stage.
//!
//! ## Example
//!
//! ```ignore
//! use modlink_core::hooks::{Hook, HookOutcome, HookResult, Capabilities};
//! use modlink_core::resolver::ResolveRequest;
//! use modlink_core::ResourceIdentifier;
//!
//! struct Env;
//!
//! impl Hook for Env {
//!     fn name(&self) -> &str { "env" }
//!     fn capabilities(&self) -> Capabilities { Capabilities::RESOLVE }
//!
//!     fn resolve(&self, req: &ResolveRequest)
//!         -> HookResult<HookOutcome<ResolveRequest, ResourceIdentifier>>
//!     {
//!         if req.specifier == "env" {
//!             return Ok(HookOutcome::ShortCircuit(ResourceIdentifier::virtual_module("virtual", "env")));
//!         }
//!         Ok(HookOutcome::Delegate)
//!     }
//! }
//! ```

mod builtin;

pub use builtin::{AliasHook, VirtualModulesHook};

use crate::error::{LoadError, ModuleErrorKind, Stage};
use crate::format::ModuleFormat;
use crate::id::ResourceIdentifier;
use crate::resolver::{ResolutionError, ResolveRequest};
use futures::future::BoxFuture;
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::ops::BitOr;
use std::sync::Arc;
use thiserror::Error;

/// Error type hook implementations may return.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result type for hook methods.
pub type HookResult<T> = Result<T, BoxError>;

/// A hook stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookStage {
    Resolve,
    Load,
    Transform,
}

impl HookStage {
    const ALL: [Self; 3] = [Self::Resolve, Self::Load, Self::Transform];

    fn bit(self) -> u8 {
        match self {
            Self::Resolve => 0b001,
            Self::Load => 0b010,
            Self::Transform => 0b100,
        }
    }
}

impl From<HookStage> for Stage {
    fn from(stage: HookStage) -> Self {
        match stage {
            HookStage::Resolve => Self::Resolve,
            HookStage::Load => Self::Load,
            HookStage::Transform => Self::Transform,
        }
    }
}

impl fmt::Display for HookStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&Stage::from(*self), f)
    }
}

/// Set of stages a hook can serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities(u8);

impl Capabilities {
    pub const NONE: Self = Self(0);
    pub const RESOLVE: Self = Self(0b001);
    pub const LOAD: Self = Self(0b010);
    pub const TRANSFORM: Self = Self(0b100);
    pub const ALL: Self = Self(0b111);

    #[must_use]
    pub fn contains(self, stage: HookStage) -> bool {
        self.0 & stage.bit() != 0
    }

    #[must_use]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// The stages in this set, in pipeline order.
    pub fn stages(self) -> impl Iterator<Item = HookStage> {
        HookStage::ALL.into_iter().filter(move |s| self.contains(*s))
    }
}

impl BitOr for Capabilities {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl From<HookStage> for Capabilities {
    fn from(stage: HookStage) -> Self {
        Self(stage.bit())
    }
}

/// Gate deciding whether a hook sees an input at all.
///
/// Resolve hooks are matched against the specifier, load and transform hooks
/// against the identifier string.
#[derive(Clone, Default)]
pub enum HookPredicate {
    #[default]
    Always,
    /// Input ends with one of these extensions (`.yaml` or `yaml`).
    Extension(Vec<String>),
    Prefix(String),
    Custom(Arc<dyn Fn(&str) -> bool + Send + Sync>),
}

impl HookPredicate {
    #[must_use]
    pub fn extensions<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::Extension(
            extensions
                .into_iter()
                .map(|e| {
                    let e = e.as_ref();
                    if e.starts_with('.') {
                        e.to_string()
                    } else {
                        format!(".{e}")
                    }
                })
                .collect(),
        )
    }

    #[must_use]
    pub fn matches(&self, input: &str) -> bool {
        match self {
            Self::Always => true,
            Self::Extension(exts) => exts.iter().any(|ext| input.ends_with(ext.as_str())),
            Self::Prefix(prefix) => input.starts_with(prefix.as_str()),
            Self::Custom(f) => f(input),
        }
    }
}

impl fmt::Debug for HookPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Always => f.write_str("Always"),
            Self::Extension(exts) => f.debug_tuple("Extension").field(exts).finish(),
            Self::Prefix(p) => f.debug_tuple("Prefix").field(p).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// A hook's answer for one input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookOutcome<I, O> {
    Delegate,
    Rewrite(I),
    ShortCircuit(O),
}

/// Source produced by the load stage and consumed by transform/evaluate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedSource {
    pub source: String,
    /// Format override; `None` keeps the detected format.
    pub format: Option<ModuleFormat>,
}

impl LoadedSource {
    #[must_use]
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            format: None,
        }
    }

    #[must_use]
    pub fn with_format(mut self, format: ModuleFormat) -> Self {
        self.format = Some(format);
        self
    }
}

/// A resolve/load/transform hook.
///
/// Every method defaults to `Delegate`, so a hook implements only the stages
/// it declares in [`Hook::capabilities`]. Hooks must be deterministic: the
/// same request must always short-circuit to the same identifier.
pub trait Hook: Send + Sync {
    /// Hook name for error messages and logs.
    fn name(&self) -> &str;

    /// Stages this hook implements.
    fn capabilities(&self) -> Capabilities;

    /// Synchronous; the resolve stage never suspends.
    fn resolve(
        &self,
        _request: &ResolveRequest,
    ) -> HookResult<HookOutcome<ResolveRequest, ResourceIdentifier>> {
        Ok(HookOutcome::Delegate)
    }

    /// `Rewrite` redirects the load to another identifier.
    fn load<'a>(
        &'a self,
        _id: &'a ResourceIdentifier,
    ) -> BoxFuture<'a, HookResult<HookOutcome<ResourceIdentifier, LoadedSource>>> {
        Box::pin(async { Ok(HookOutcome::Delegate) })
    }

    /// `Rewrite` hands modified source to the next transform hook.
    fn transform<'a>(
        &'a self,
        _id: &'a ResourceIdentifier,
        _source: &'a LoadedSource,
    ) -> BoxFuture<'a, HookResult<HookOutcome<LoadedSource, LoadedSource>>> {
        Box::pin(async { Ok(HookOutcome::Delegate) })
    }
}

/// Failure raised by a hook.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("[{hook}] {stage}: {message}")]
pub struct HookError {
    pub hook: String,
    pub stage: Stage,
    pub message: String,
}

/// Invalid hook registration, fatal at start-up.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HookRegistrationError {
    #[error("hook '{hook}' is registered for {stage} but does not implement it")]
    UnsupportedStage { hook: String, stage: HookStage },

    #[error("hook '{hook}' is registered for no stage")]
    NoStages { hook: String },

    #[error("hook name '{hook}' is registered twice")]
    DuplicateName { hook: String },
}

/// Registration of one hook.
#[derive(Clone)]
pub struct HookDescriptor {
    hook: Arc<dyn Hook>,
    stages: Capabilities,
    priority: i32,
    predicate: HookPredicate,
}

impl HookDescriptor {
    /// Register `hook` for every stage it implements, priority 0.
    #[must_use]
    pub fn new(hook: Arc<dyn Hook>) -> Self {
        let stages = hook.capabilities();
        Self {
            hook,
            stages,
            priority: 0,
            predicate: HookPredicate::Always,
        }
    }

    /// Restrict the stages this registration serves.
    #[must_use]
    pub fn stages(mut self, stages: Capabilities) -> Self {
        self.stages = stages;
        self
    }

    /// Lower runs first.
    #[must_use]
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn predicate(mut self, predicate: HookPredicate) -> Self {
        self.predicate = predicate;
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.hook.name()
    }

    fn serves(&self, stage: HookStage, input: &str) -> bool {
        self.stages.contains(stage) && self.predicate.matches(input)
    }

    fn error(&self, stage: HookStage, err: &BoxError) -> HookError {
        HookError {
            hook: self.hook.name().to_string(),
            stage: stage.into(),
            message: err.to_string(),
        }
    }
}

impl fmt::Debug for HookDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookDescriptor")
            .field("hook", &self.hook.name())
            .field("stages", &self.stages)
            .field("priority", &self.priority)
            .field("predicate", &self.predicate)
            .finish()
    }
}

/// Immutable, ordered hook chain.
#[derive(Debug, Clone, Default)]
pub struct HookChain {
    hooks: Vec<HookDescriptor>,
}

impl HookChain {
    /// Validate and order the registrations.
    ///
    /// Ordering is by priority, then registration order.
    pub fn new(descriptors: Vec<HookDescriptor>) -> Result<Self, HookRegistrationError> {
        let mut names = HashSet::new();
        for desc in &descriptors {
            let hook = desc.name().to_string();
            if desc.stages.is_empty() {
                return Err(HookRegistrationError::NoStages { hook });
            }
            let supported = desc.hook.capabilities();
            if let Some(stage) = desc.stages.stages().find(|s| !supported.contains(*s)) {
                return Err(HookRegistrationError::UnsupportedStage { hook, stage });
            }
            if !names.insert(hook.clone()) {
                return Err(HookRegistrationError::DuplicateName { hook });
            }
        }

        let mut hooks = descriptors;
        hooks.sort_by_key(|d| d.priority);
        Ok(Self { hooks })
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    /// Hook names in traversal order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.hooks.iter().map(HookDescriptor::name)
    }

    /// Run the resolve stage; `builtin` runs only if every hook delegates.
    pub fn run_resolve<F>(
        &self,
        request: &ResolveRequest,
        builtin: F,
    ) -> Result<ResourceIdentifier, ModuleErrorKind>
    where
        F: FnOnce(&ResolveRequest) -> Result<ResourceIdentifier, ResolutionError>,
    {
        let mut current: Option<ResolveRequest> = None;

        for desc in &self.hooks {
            let req = current.as_ref().unwrap_or(request);
            if !desc.serves(HookStage::Resolve, &req.specifier) {
                continue;
            }
            match desc
                .hook
                .resolve(req)
                .map_err(|e| desc.error(HookStage::Resolve, &e))?
            {
                HookOutcome::Delegate => {}
                HookOutcome::Rewrite(next) => {
                    tracing::trace!(hook = desc.name(), from = %req.specifier, to = %next.specifier, "resolve rewritten");
                    current = Some(next);
                }
                HookOutcome::ShortCircuit(id) => {
                    tracing::debug!(hook = desc.name(), specifier = %req.specifier, %id, "resolve short-circuited");
                    return Ok(id);
                }
            }
        }

        Ok(builtin(current.as_ref().unwrap_or(request))?)
    }

    /// Run the load stage; `builtin` runs only if every hook delegates.
    pub async fn run_load<F, Fut>(
        &self,
        id: &ResourceIdentifier,
        builtin: F,
    ) -> Result<LoadedSource, ModuleErrorKind>
    where
        F: FnOnce(ResourceIdentifier) -> Fut,
        Fut: Future<Output = Result<LoadedSource, LoadError>>,
    {
        let mut current = id.clone();

        for desc in &self.hooks {
            if !desc.serves(HookStage::Load, current.as_str()) {
                continue;
            }
            match desc
                .hook
                .load(&current)
                .await
                .map_err(|e| desc.error(HookStage::Load, &e))?
            {
                HookOutcome::Delegate => {}
                HookOutcome::Rewrite(next) => {
                    tracing::trace!(hook = desc.name(), from = %current, to = %next, "load redirected");
                    current = next;
                }
                HookOutcome::ShortCircuit(loaded) => {
                    tracing::debug!(hook = desc.name(), id = %current, "load short-circuited");
                    return Ok(loaded);
                }
            }
        }

        Ok(builtin(current).await?)
    }

    /// Run the transform stage. Without any transform hook the source passes
    /// through unchanged.
    pub async fn run_transform(
        &self,
        id: &ResourceIdentifier,
        source: LoadedSource,
    ) -> Result<LoadedSource, ModuleErrorKind> {
        let mut current = source;

        for desc in &self.hooks {
            if !desc.serves(HookStage::Transform, id.as_str()) {
                continue;
            }
            match desc
                .hook
                .transform(id, &current)
                .await
                .map_err(|e| desc.error(HookStage::Transform, &e))?
            {
                HookOutcome::Delegate => {}
                HookOutcome::Rewrite(next) => current = next,
                HookOutcome::ShortCircuit(done) => {
                    tracing::debug!(hook = desc.name(), %id, "transform short-circuited");
                    return Ok(done);
                }
            }
        }

        Ok(current)
    }
}
