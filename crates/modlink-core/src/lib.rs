#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::return_self_not_must_use)]

//! Module resolution and loading engine for multi-package workspaces.
//!
//! - [`manifest`]: package manifests and workspace discovery
//! - [`workspace`]: the package dependency graph, local links, build order
//! - [`resolver`]: specifier to [`ResourceIdentifier`]
//! - [`hooks`]: the resolve/load/transform hook chain
//! - [`registry`]: single-flight, cycle-safe module records
//! - [`interop`]: access across the eager-sync and async-static formats
//! - [`engine`]: all of the above for one workspace

pub mod config;
pub mod engine;
pub mod error;
pub mod eval;
pub mod format;
pub mod hooks;
pub mod id;
pub mod interop;
pub mod manifest;
pub mod registry;
pub mod resolver;
pub mod version;
pub mod workspace;

pub use config::{AmbiguityPolicy, Config, EngineConfig};
pub use engine::{Engine, EngineBuilder, WorkspaceState};
pub use error::{Error, LoadError, ModuleError, ModuleErrorKind, Stage};
pub use eval::{EvaluationError, ModuleEvaluator, ScriptEvaluator};
pub use format::ModuleFormat;
pub use hooks::{Capabilities, Hook, HookChain, HookDescriptor, HookError, HookOutcome, LoadedSource};
pub use id::ResourceIdentifier;
pub use interop::{InteropError, Namespace};
pub use manifest::{ManifestError, ManifestStore, PackageManifest};
pub use registry::{Binding, BindingCell, ModuleRecord, ModuleRegistry, ModuleStatus};
pub use resolver::{ResolutionError, ResolveContext, ResolveRequest};
pub use version::VERSION;
pub use workspace::{CycleError, GraphError, WorkspaceGraph};
