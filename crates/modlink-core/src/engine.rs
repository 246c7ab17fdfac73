//! The engine: one workspace instance.
//!
//! Opening an engine loads the configuration, discovers the workspace
//! manifests and builds the workspace graph; any failure there is fatal.
//! After that, every per-module failure stays scoped to the module.
//!
//! ```ignore
//! let engine = Engine::builder("/path/to/ws")
//!     .hook(HookDescriptor::new(Arc::new(MyYamlHook)))
//!     .builtin_module("env", "export const mode = \"dev\"")
//!     .build()?;
//!
//! let record = engine.import("./src/main.mjs").await?;
//! println!("{}", record.exports_value());
//! ```
//!
//! Several engines can coexist in one process; nothing here is global.

use crate::config::{load_config, EngineConfig};
use crate::error::{Error, LoadError, ModuleError, ModuleErrorKind, Stage};
use crate::eval::{ModuleEvaluator, ScriptEvaluator};
use crate::format::ModuleFormat;
use crate::hooks::{AliasHook, HookChain, HookDescriptor, LoadedSource};
use crate::id::ResourceIdentifier;
use crate::interop::{self, InteropError, Namespace};
use crate::manifest::{ManifestOptions, ManifestStore};
use crate::registry::{FetchedModule, ModuleHost, ModuleRecord, ModuleRegistry, StageError};
use crate::resolver::{
    ManifestCache, ModulesDirLocator, PackageLocator, ResolutionCache, ResolutionKey,
    ResolveContext, ResolveRequest, SpecifierResolver,
};
use crate::workspace::WorkspaceGraph;
use futures::future::BoxFuture;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

/// Manifests plus the graph built from them. Replaced as a whole on reload.
#[derive(Debug)]
pub struct WorkspaceState {
    store: ManifestStore,
    graph: WorkspaceGraph,
}

impl WorkspaceState {
    #[must_use]
    pub fn store(&self) -> &ManifestStore {
        &self.store
    }

    #[must_use]
    pub fn graph(&self) -> &WorkspaceGraph {
        &self.graph
    }
}

/// Builder for [`Engine`].
pub struct EngineBuilder {
    root: PathBuf,
    config: Option<EngineConfig>,
    hooks: Vec<HookDescriptor>,
    evaluator: Option<Box<dyn ModuleEvaluator>>,
    locator: Option<Box<dyn PackageLocator>>,
    builtins: BTreeMap<String, String>,
}

impl EngineBuilder {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            config: None,
            hooks: Vec::new(),
            evaluator: None,
            locator: None,
            builtins: BTreeMap::new(),
        }
    }

    /// Use `config` instead of reading `modlink.json`.
    #[must_use]
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = Some(config);
        self
    }

    #[must_use]
    pub fn hook(mut self, descriptor: HookDescriptor) -> Self {
        self.hooks.push(descriptor);
        self
    }

    #[must_use]
    pub fn hooks(mut self, descriptors: impl IntoIterator<Item = HookDescriptor>) -> Self {
        self.hooks.extend(descriptors);
        self
    }

    #[must_use]
    pub fn evaluator(mut self, evaluator: impl ModuleEvaluator + 'static) -> Self {
        self.evaluator = Some(Box::new(evaluator));
        self
    }

    /// Replace the installed-package lookup.
    #[must_use]
    pub fn locator(mut self, locator: impl PackageLocator + 'static) -> Self {
        self.locator = Some(Box::new(locator));
        self
    }

    /// Serve `source` for `builtin:<name>`.
    #[must_use]
    pub fn builtin_module(mut self, name: impl Into<String>, source: impl Into<String>) -> Self {
        self.builtins.insert(name.into(), source.into());
        self
    }

    pub fn build(self) -> Result<Engine, Error> {
        let root = dunce::canonicalize(&self.root)?;
        let config = match self.config {
            Some(config) => config,
            None => load_config(&root)?,
        };

        let mut store = ManifestStore::new(ManifestOptions::from_config(&config));
        let manifests = store.discover_workspace(&root)?;
        let graph = WorkspaceGraph::build(&manifests)?;

        let mut descriptors = Vec::with_capacity(self.hooks.len() + 1);
        if !config.alias.is_empty() {
            let alias = AliasHook::from_config(&root, &config.alias);
            descriptors.push(HookDescriptor::new(Arc::new(alias)).priority(i32::MIN));
        }
        descriptors.extend(self.hooks);
        let hooks = HookChain::new(descriptors)?;

        tracing::info!(
            root = %root.display(),
            members = manifests.len(),
            hooks = hooks.len(),
            "engine opened"
        );

        let locator = self
            .locator
            .unwrap_or_else(|| Box::new(ModulesDirLocator::new(config.modules_dir.clone())));
        let evaluator = self
            .evaluator
            .unwrap_or_else(|| Box::new(ScriptEvaluator::new()));

        Ok(Engine {
            pipeline: Pipeline {
                root,
                config,
                workspace: RwLock::new(Arc::new(WorkspaceState { store, graph })),
                hooks,
                locator,
                evaluator,
                builtins: self.builtins,
                manifests: ManifestCache::new(),
                resolutions: ResolutionCache::new(),
            },
            registry: ModuleRegistry::new(),
        })
    }
}

/// Resolve, load and transform, as the registry sees them.
struct Pipeline {
    root: PathBuf,
    config: EngineConfig,
    workspace: RwLock<Arc<WorkspaceState>>,
    hooks: HookChain,
    locator: Box<dyn PackageLocator>,
    evaluator: Box<dyn ModuleEvaluator>,
    builtins: BTreeMap<String, String>,
    manifests: ManifestCache,
    resolutions: ResolutionCache,
}

impl Pipeline {
    fn snapshot(&self) -> Arc<WorkspaceState> {
        self.workspace
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn replace(&self, state: WorkspaceState) {
        *self.workspace.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(state);
    }

    fn resolver<'a>(&'a self, state: &'a WorkspaceState) -> SpecifierResolver<'a> {
        SpecifierResolver::new(
            &self.config,
            &state.store,
            &state.graph,
            self.locator.as_ref(),
            &self.manifests,
        )
    }

    fn clear_caches(&self) {
        self.resolutions.clear();
        self.manifests.clear();
    }

    /// Hook chain first, then the memoized builtin resolver.
    fn resolve_request(&self, request: &ResolveRequest) -> Result<ResourceIdentifier, ModuleErrorKind> {
        let state = self.snapshot();
        self.hooks.run_resolve(request, |request| {
            let key = ResolutionKey::from(request);
            if let Some(id) = self.resolutions.get(&key) {
                return Ok(id);
            }
            let id = self
                .resolver(&state)
                .resolve(&request.specifier, &request.context)?;
            Ok(self.resolutions.insert(key, id))
        })
    }

    fn root_context(&self, format: ModuleFormat) -> ResolveContext {
        let state = self.snapshot();
        let package = self.resolver(&state).package_of(&self.root);
        ResolveContext::new(self.root.clone(), format).with_package(package)
    }

    async fn builtin_load(&self, id: ResourceIdentifier) -> Result<LoadedSource, LoadError> {
        if let Some(path) = id.to_file_path() {
            return match tokio::fs::read_to_string(&path).await {
                Ok(source) => Ok(LoadedSource::new(source)),
                Err(e) => Err(LoadError {
                    id,
                    message: e.to_string(),
                }),
            };
        }
        if id.is_builtin() {
            if let Some(source) = self.builtins.get(id.name()) {
                return Ok(LoadedSource::new(source.clone()));
            }
        }
        Err(LoadError {
            message: "no loader handles this identifier".to_string(),
            id,
        })
    }
}

impl ModuleHost for Pipeline {
    fn resolve(
        &self,
        specifier: &str,
        importer: &ResourceIdentifier,
        format: ModuleFormat,
    ) -> Result<ResourceIdentifier, ModuleErrorKind> {
        let context = {
            let state = self.snapshot();
            self.resolver(&state).context_for(importer, format, &self.root)
        };
        self.resolve_request(&ResolveRequest::new(specifier, context))
    }

    fn detect_format(&self, id: &ResourceIdentifier) -> ModuleFormat {
        let state = self.snapshot();
        self.resolver(&state).detect_format(id)
    }

    fn fetch<'a>(
        &'a self,
        id: &'a ResourceIdentifier,
    ) -> BoxFuture<'a, Result<FetchedModule, StageError>> {
        Box::pin(async move {
            let loaded = self
                .hooks
                .run_load(id, |target| self.builtin_load(target))
                .await
                .map_err(|kind| StageError::new(Stage::Load, kind))?;
            let raw_source = loaded.source.clone();
            let loaded_format = loaded.format;

            let transformed = self
                .hooks
                .run_transform(id, loaded)
                .await
                .map_err(|kind| StageError::new(Stage::Transform, kind))?;

            let format = transformed
                .format
                .or(loaded_format)
                .unwrap_or_else(|| self.detect_format(id));
            tracing::trace!(%id, %format, bytes = transformed.source.len(), "module fetched");

            Ok(FetchedModule {
                raw_source,
                source: transformed.source,
                format,
            })
        })
    }

    fn evaluator(&self) -> &dyn ModuleEvaluator {
        self.evaluator.as_ref()
    }
}

/// A workspace instance: manifests, graph, hook chain and module registry.
pub struct Engine {
    pipeline: Pipeline,
    registry: ModuleRegistry,
}

impl Engine {
    /// Open the workspace at `root` with its `modlink.json` and no hooks.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, Error> {
        EngineBuilder::new(root).build()
    }

    #[must_use]
    pub fn builder(root: impl Into<PathBuf>) -> EngineBuilder {
        EngineBuilder::new(root)
    }

    /// Canonical workspace root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.pipeline.root
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.pipeline.config
    }

    #[must_use]
    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    #[must_use]
    pub fn hooks(&self) -> &HookChain {
        &self.pipeline.hooks
    }

    /// Current manifests and graph.
    #[must_use]
    pub fn workspace(&self) -> Arc<WorkspaceState> {
        self.pipeline.snapshot()
    }

    /// Packages in dependency order.
    #[must_use]
    pub fn build_order(&self) -> Vec<String> {
        self.pipeline.snapshot().graph.build_order().to_vec()
    }

    /// Context for a request made from the workspace root.
    #[must_use]
    pub fn root_context(&self, format: ModuleFormat) -> ResolveContext {
        self.pipeline.root_context(format)
    }

    /// Context for specifiers written inside `importer`.
    #[must_use]
    pub fn context_for(&self, importer: &ResourceIdentifier, format: ModuleFormat) -> ResolveContext {
        let state = self.pipeline.snapshot();
        self.pipeline
            .resolver(&state)
            .context_for(importer, format, &self.pipeline.root)
    }

    /// Resolve through the hook chain and the builtin resolver.
    pub fn resolve(
        &self,
        specifier: &str,
        context: &ResolveContext,
    ) -> Result<ResourceIdentifier, ModuleErrorKind> {
        self.pipeline
            .resolve_request(&ResolveRequest::new(specifier, context.clone()))
    }

    /// Format the registry will assume for `id` before loading it.
    #[must_use]
    pub fn detect_format(&self, id: &ResourceIdentifier) -> ModuleFormat {
        self.pipeline.detect_format(id)
    }

    pub async fn ensure_loaded(&self, id: &ResourceIdentifier) -> Result<Arc<ModuleRecord>, ModuleError> {
        self.registry.ensure_loaded(&self.pipeline, id).await
    }

    /// Resolve `specifier` from the workspace root, as an asynchronous
    /// import would, then load and evaluate it.
    pub async fn import(&self, specifier: &str) -> Result<Arc<ModuleRecord>, ModuleError> {
        let context = self.root_context(ModuleFormat::AsyncStatic);
        self.import_from(specifier, &context).await
    }

    pub async fn import_from(
        &self,
        specifier: &str,
        context: &ResolveContext,
    ) -> Result<Arc<ModuleRecord>, ModuleError> {
        let id = self.resolve(specifier, context).map_err(|kind| {
            ModuleError::new(kind, Stage::Resolve, Some(specifier.to_string()), Vec::new())
        })?;
        self.ensure_loaded(&id).await
    }

    /// Exports of `id` without waiting; fails for async-static modules
    /// that were not evaluated yet.
    pub fn access_from_sync(&self, id: &ResourceIdentifier) -> Result<Namespace, InteropError> {
        interop::access_from_sync(&self.registry, &self.pipeline, id)
    }

    /// Exports of `id`, loading and evaluating it first.
    pub async fn access_from_async(&self, id: &ResourceIdentifier) -> Result<Namespace, ModuleError> {
        interop::access_from_async(&self.registry, &self.pipeline, id).await
    }

    /// Reset `id` and its transitive dependents. Returns what was reset.
    pub fn invalidate(&self, id: &ResourceIdentifier) -> Vec<ResourceIdentifier> {
        self.pipeline.clear_caches();
        self.registry.invalidate(id)
    }

    /// Invalidate `id` only when its file no longer matches the source it was
    /// evaluated from.
    pub fn invalidate_if_changed(&self, id: &ResourceIdentifier) -> Vec<ResourceIdentifier> {
        let (Some(record), Some(path)) = (self.registry.get(id), id.to_file_path()) else {
            return Vec::new();
        };
        let Some(previous) = record.source_hash() else {
            return Vec::new();
        };
        match modlink_util::hash::file_hash(&path) {
            Ok(current) if current == previous => {
                tracing::trace!(%id, "unchanged");
                Vec::new()
            }
            Ok(_) => self.invalidate(id),
            Err(e) => {
                tracing::debug!(%id, error = %e, "source unreadable, invalidating");
                self.invalidate(id)
            }
        }
    }

    /// Re-read the manifest at `root`, rebuild the workspace graph and
    /// invalidate every module under that package.
    ///
    /// On error the previous workspace state stays in place.
    pub fn reload_package(&self, root: &Path) -> Result<Vec<ResourceIdentifier>, Error> {
        let current = self.pipeline.snapshot();
        let mut store = current.store.clone();
        let manifest = store.reload(root)?;
        let graph = WorkspaceGraph::build(&store.workspace_manifests())?;
        self.pipeline.replace(WorkspaceState { store, graph });
        self.pipeline.clear_caches();

        let mut invalidated = Vec::new();
        for id in self.registry.ids() {
            let inside = id
                .to_file_path()
                .is_some_and(|path| path.starts_with(&manifest.root));
            if inside && !invalidated.contains(&id) {
                invalidated.extend(self.registry.invalidate(&id));
            }
        }
        invalidated.sort();
        invalidated.dedup();

        tracing::info!(package = %manifest.name, modules = invalidated.len(), "package reloaded");
        Ok(invalidated)
    }

    /// Drop every module record and cache. The workspace stays loaded.
    pub fn teardown(&self) {
        self.registry.clear();
        self.pipeline.clear_caches();
        tracing::debug!(root = %self.pipeline.root.display(), "engine torn down");
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("root", &self.pipeline.root)
            .field("hooks", &self.pipeline.hooks.len())
            .field("modules", &self.registry.len())
            .finish_non_exhaustive()
    }
}
