//! The builtin specifier resolver.

use super::entry::resolve_entry;
use super::{
    add_tried, ManifestCache, PackageLocator, ResolutionError, ResolveContext, ResolveReasonCode,
};
use crate::config::{AmbiguityPolicy, EngineConfig};
use crate::format::ModuleFormat;
use crate::id::{split_scheme, ResourceIdentifier};
use crate::manifest::ManifestStore;
use crate::workspace::WorkspaceGraph;
use modlink_util::fs::find_ancestor_with;
use modlink_util::path::normalize_path;
use serde_json::Value;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use url::Url;

/// Entry-point fields of a package root.
#[derive(Debug, Default)]
struct PackageEntry {
    exports: Option<Value>,
    main: Option<String>,
}

/// Resolves specifiers against one workspace snapshot.
///
/// Borrowing everything keeps a resolver cheap to build per request; the
/// engine holds the owned state.
pub struct SpecifierResolver<'a> {
    config: &'a EngineConfig,
    store: &'a ManifestStore,
    graph: &'a WorkspaceGraph,
    locator: &'a dyn PackageLocator,
    manifests: &'a ManifestCache,
}

impl<'a> SpecifierResolver<'a> {
    #[must_use]
    pub fn new(
        config: &'a EngineConfig,
        store: &'a ManifestStore,
        graph: &'a WorkspaceGraph,
        locator: &'a dyn PackageLocator,
        manifests: &'a ManifestCache,
    ) -> Self {
        Self {
            config,
            store,
            graph,
            locator,
            manifests,
        }
    }

    /// Resolve `specifier` from `ctx` to a canonical identifier.
    pub fn resolve(
        &self,
        specifier: &str,
        ctx: &ResolveContext,
    ) -> Result<ResourceIdentifier, ResolutionError> {
        if specifier.is_empty() {
            return Err(ResolutionError::invalid(specifier, "empty specifier"));
        }
        if specifier.trim() != specifier || specifier.contains('\0') {
            return Err(ResolutionError::invalid(
                specifier,
                "leading/trailing whitespace or NUL byte",
            ));
        }

        let prefix = self.config.builtin_prefix.as_str();
        if let Some(name) = specifier.strip_prefix(prefix).filter(|_| !prefix.is_empty()) {
            if name.is_empty() {
                return Err(ResolutionError::invalid(specifier, "empty built-in name"));
            }
            tracing::trace!(specifier, "built-in specifier");
            return Ok(ResourceIdentifier::builtin(name));
        }

        if specifier.starts_with("file:") {
            let path = Url::parse(specifier)
                .ok()
                .and_then(|url| url.to_file_path().ok())
                .ok_or_else(|| ResolutionError::invalid(specifier, "malformed file URL"))?;
            return self.resolve_path(specifier, &normalize_path(&path), ctx, Vec::new());
        }

        if let Some((scheme, name)) = split_scheme(specifier) {
            return Ok(ResourceIdentifier::virtual_module(scheme, name));
        }

        if is_relative(specifier) || Path::new(specifier).is_absolute() {
            let target = normalize_path(&ctx.base_dir.join(specifier));
            return self.resolve_path(specifier, &target, ctx, Vec::new());
        }

        self.resolve_bare(specifier, ctx)
    }

    /// Format of a resource: `.mjs`/`.cjs` first, then the nearest manifest,
    /// then the configured default.
    #[must_use]
    pub fn detect_format(&self, id: &ResourceIdentifier) -> ModuleFormat {
        if let Some(format) = id.extension().and_then(ModuleFormat::from_extension) {
            return format;
        }
        id.to_file_path()
            .and_then(|path| path.parent().map(|dir| self.scope_format(dir)))
            .unwrap_or(self.config.default_format)
    }

    /// Workspace member whose root contains `path`.
    #[must_use]
    pub fn package_of(&self, path: &Path) -> Option<String> {
        self.store
            .owner_of(path)
            .filter(|m| self.store.is_member(&m.name))
            .map(|m| m.name.clone())
    }

    /// Context for specifiers imported by `importer`.
    ///
    /// Non-file importers resolve relative to `fallback_dir`.
    #[must_use]
    pub fn context_for(
        &self,
        importer: &ResourceIdentifier,
        format: ModuleFormat,
        fallback_dir: &Path,
    ) -> ResolveContext {
        let base_dir = importer
            .to_file_path()
            .and_then(|p| p.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| fallback_dir.to_path_buf());
        let package = self.package_of(&base_dir);
        ResolveContext::new(base_dir, format)
            .with_importer(importer.clone())
            .with_package(package)
    }

    fn scope_format(&self, dir: &Path) -> ModuleFormat {
        let Some(root) = find_ancestor_with(dir, &self.config.manifest_file) else {
            return self.config.default_format;
        };
        if let Some(manifest) = self.store.get_by_root(&root) {
            return manifest.declared_format;
        }
        self.manifests
            .get(&root.join(&self.config.manifest_file))
            .and_then(|doc| {
                doc.get("declaredFormat")
                    .and_then(Value::as_str)
                    .and_then(|s| s.parse().ok())
                    .or_else(|| {
                        doc.get("type")
                            .and_then(Value::as_str)
                            .and_then(ModuleFormat::from_package_type)
                    })
            })
            .unwrap_or(self.config.default_format)
    }

    /// Relative or absolute target, format-sensitive.
    fn resolve_path(
        &self,
        specifier: &str,
        target: &Path,
        ctx: &ResolveContext,
        mut tried: Vec<PathBuf>,
    ) -> Result<ResourceIdentifier, ResolutionError> {
        match ctx.format {
            ModuleFormat::AsyncStatic => {
                add_tried(&mut tried, target);
                if target.is_file() {
                    return to_id(specifier, target);
                }
                let reason = if target.is_dir() {
                    ResolveReasonCode::IsDirectory
                } else if target.extension().is_none() {
                    ResolveReasonCode::ExtensionRequired
                } else {
                    ResolveReasonCode::NotFound
                };
                Err(not_found(specifier, ctx, reason, tried))
            }
            ModuleFormat::EagerSync => {
                if let Some(found) = self.probe_file(specifier, target, &mut tried)? {
                    return to_id(specifier, &found);
                }
                if target.is_dir() {
                    if let Some(found) = self.probe_directory(specifier, target, &mut tried)? {
                        return to_id(specifier, &found);
                    }
                    return Err(not_found(specifier, ctx, ResolveReasonCode::IsDirectory, tried));
                }
                Err(not_found(specifier, ctx, ResolveReasonCode::NotFound, tried))
            }
        }
    }

    /// Exact file, then the probe list appended to the full name.
    fn probe_file(
        &self,
        specifier: &str,
        target: &Path,
        tried: &mut Vec<PathBuf>,
    ) -> Result<Option<PathBuf>, ResolutionError> {
        add_tried(tried, target);
        if target.is_file() {
            return Ok(Some(target.to_path_buf()));
        }
        self.probe_extensions(specifier, target, tried)
    }

    /// Candidates are visited in probe-list order, never directory order.
    fn probe_extensions(
        &self,
        specifier: &str,
        stem: &Path,
        tried: &mut Vec<PathBuf>,
    ) -> Result<Option<PathBuf>, ResolutionError> {
        let mut found = Vec::new();
        for ext in &self.config.extensions {
            let candidate = append_extension(stem, ext);
            add_tried(tried, &candidate);
            if candidate.is_file() {
                tracing::trace!(candidate = %candidate.display(), "probe hit");
                if self.config.ambiguity == AmbiguityPolicy::First {
                    return Ok(Some(candidate));
                }
                found.push(candidate);
            }
        }
        if found.len() > 1 {
            return Err(ResolutionError::AmbiguousExtension {
                specifier: specifier.to_string(),
                candidates: found,
            });
        }
        Ok(found.pop())
    }

    /// Directory fallback: manifest `main`, then the index file.
    fn probe_directory(
        &self,
        specifier: &str,
        dir: &Path,
        tried: &mut Vec<PathBuf>,
    ) -> Result<Option<PathBuf>, ResolutionError> {
        if let Some(main) = self.package_entry(dir).main {
            let main_path = normalize_path(&dir.join(main));
            if let Some(found) = self.probe_file(specifier, &main_path, tried)? {
                return Ok(Some(found));
            }
            if main_path.is_dir() {
                let index = main_path.join(&self.config.index_file);
                if let Some(found) = self.probe_extensions(specifier, &index, tried)? {
                    return Ok(Some(found));
                }
            }
        }
        self.probe_extensions(specifier, &dir.join(&self.config.index_file), tried)
    }

    fn resolve_bare(
        &self,
        specifier: &str,
        ctx: &ResolveContext,
    ) -> Result<ResourceIdentifier, ResolutionError> {
        let Some((name, subpath)) = parse_bare_specifier(specifier) else {
            return Err(ResolutionError::invalid(specifier, "not a valid package name"));
        };
        if subpath.is_some_and(|s| s.split('/').any(|seg| seg == "..")) {
            return Err(ResolutionError::invalid(specifier, "subpath escapes the package"));
        }

        let mut tried = Vec::new();
        let linked = ctx
            .package
            .as_deref()
            .and_then(|from| self.graph.resolve_local(from, name));

        let root = if let Some(root) = linked {
            tracing::debug!(
                from = ctx.package.as_deref().unwrap_or_default(),
                package = name,
                root = %root.display(),
                "workspace link"
            );
            root.to_path_buf()
        } else if let Some(root) = self.locator.locate(name, &ctx.base_dir, &mut tried) {
            root
        } else {
            return Err(not_found(
                specifier,
                ctx,
                ResolveReasonCode::PackageNotFound,
                tried,
            ));
        };

        self.resolve_package(specifier, &root, subpath, ctx, tried)
    }

    /// Pick the concrete entry inside a located package root.
    fn resolve_package(
        &self,
        specifier: &str,
        root: &Path,
        subpath: Option<&str>,
        ctx: &ResolveContext,
        mut tried: Vec<PathBuf>,
    ) -> Result<ResourceIdentifier, ResolutionError> {
        let entry = self.package_entry(root);

        if let Some(exports) = &entry.exports {
            let key = subpath.map(|s| format!("./{s}"));
            let Some(target) = resolve_entry(exports, key.as_deref(), ctx.format.conditions())
            else {
                return Err(not_found(
                    specifier,
                    ctx,
                    ResolveReasonCode::ExportsNotFound,
                    tried,
                ));
            };
            let path = normalize_path(&root.join(target));
            add_tried(&mut tried, &path);
            if path.is_file() {
                return to_id(specifier, &path);
            }
            return Err(not_found(
                specifier,
                ctx,
                ResolveReasonCode::ExportsTargetNotFound,
                tried,
            ));
        }

        if let Some(sub) = subpath {
            return self.resolve_path(specifier, &normalize_path(&root.join(sub)), ctx, tried);
        }

        if let Some(main) = &entry.main {
            let main_path = normalize_path(&root.join(main));
            match ctx.format {
                ModuleFormat::AsyncStatic => {
                    add_tried(&mut tried, &main_path);
                    if main_path.is_file() {
                        return to_id(specifier, &main_path);
                    }
                }
                ModuleFormat::EagerSync => {
                    if let Some(found) = self.probe_file(specifier, &main_path, &mut tried)? {
                        return to_id(specifier, &found);
                    }
                    if main_path.is_dir() {
                        let index = main_path.join(&self.config.index_file);
                        if let Some(found) = self.probe_extensions(specifier, &index, &mut tried)? {
                            return to_id(specifier, &found);
                        }
                    }
                }
            }
        }

        let index = root.join(&self.config.index_file);
        if let Some(found) = self.probe_extensions(specifier, &index, &mut tried)? {
            return to_id(specifier, &found);
        }

        Err(not_found(
            specifier,
            ctx,
            ResolveReasonCode::PackageEntryNotFound,
            tried,
        ))
    }

    /// Workspace manifests come from the store; anything else is read
    /// through the manifest cache.
    fn package_entry(&self, root: &Path) -> PackageEntry {
        if let Some(manifest) = self.store.get_by_root(root) {
            return PackageEntry {
                exports: manifest.exports.clone(),
                main: manifest.main.clone(),
            };
        }
        let Some(doc) = self.manifests.get(&root.join(&self.config.manifest_file)) else {
            return PackageEntry::default();
        };
        PackageEntry {
            exports: doc.get("exports").filter(|v| !v.is_null()).cloned(),
            main: doc.get("main").and_then(Value::as_str).map(String::from),
        }
    }
}

/// Split a bare specifier into package name and subpath.
///
/// `@scope/pkg/sub/x` -> (`@scope/pkg`, `Some("sub/x")`). Returns `None`
/// for names no package can carry.
#[must_use]
pub fn parse_bare_specifier(spec: &str) -> Option<(&str, Option<&str>)> {
    let name_len = if let Some(scoped) = spec.strip_prefix('@') {
        let (scope, rest) = scoped.split_once('/')?;
        let pkg = rest.split('/').next().unwrap_or_default();
        if scope.is_empty() || pkg.is_empty() {
            return None;
        }
        1 + scope.len() + 1 + pkg.len()
    } else {
        spec.find('/').unwrap_or(spec.len())
    };

    let name = &spec[..name_len];
    let subpath = spec[name_len..]
        .strip_prefix('/')
        .filter(|s| !s.is_empty());

    let bare_name = name.rsplit('/').next().unwrap_or(name);
    if bare_name.is_empty()
        || bare_name.starts_with('.')
        || bare_name.starts_with('_')
        || name.chars().any(|c| c.is_whitespace() || c == '\\')
    {
        return None;
    }

    Some((name, subpath))
}

fn is_relative(specifier: &str) -> bool {
    specifier == "."
        || specifier == ".."
        || specifier.starts_with("./")
        || specifier.starts_with("../")
}

/// `dir/file` + `.js` -> `dir/file.js`, keeping any existing extension.
fn append_extension(stem: &Path, ext: &str) -> PathBuf {
    let mut name = OsString::from(stem.as_os_str());
    if !ext.starts_with('.') {
        name.push(".");
    }
    name.push(ext);
    PathBuf::from(name)
}

fn to_id(specifier: &str, path: &Path) -> Result<ResourceIdentifier, ResolutionError> {
    ResourceIdentifier::from_path(path).ok_or_else(|| {
        ResolutionError::invalid(
            specifier,
            format!("resolved path {} is not absolute", path.display()),
        )
    })
}

fn not_found(
    specifier: &str,
    ctx: &ResolveContext,
    reason: ResolveReasonCode,
    tried: Vec<PathBuf>,
) -> ResolutionError {
    let from = ctx
        .importer
        .as_ref()
        .and_then(ResourceIdentifier::to_file_path)
        .unwrap_or_else(|| ctx.base_dir.clone());
    ResolutionError::NotFound {
        specifier: specifier.to_string(),
        from,
        reason,
        tried,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::ManifestOptions;
    use crate::resolver::ModulesDirLocator;
    use std::fs;
    use tempfile::{tempdir, TempDir};

    struct Fixture {
        _dir: TempDir,
        root: PathBuf,
        config: EngineConfig,
        store: ManifestStore,
        graph: WorkspaceGraph,
        locator: ModulesDirLocator,
        manifests: ManifestCache,
    }

    impl Fixture {
        fn new(files: &[(&str, &str)]) -> Self {
            Self::with_config(files, EngineConfig::default())
        }

        fn with_config(files: &[(&str, &str)], config: EngineConfig) -> Self {
            let dir = tempdir().unwrap();
            let root = dunce::canonicalize(dir.path()).unwrap();
            for (path, content) in files {
                let full = root.join(path);
                fs::create_dir_all(full.parent().unwrap()).unwrap();
                fs::write(full, content).unwrap();
            }
            let mut store = ManifestStore::new(ManifestOptions::from_config(&config));
            let members = store.discover_workspace(&root).unwrap();
            let graph = WorkspaceGraph::build(&members).unwrap();
            Self {
                _dir: dir,
                root,
                config,
                store,
                graph,
                locator: ModulesDirLocator::default(),
                manifests: ManifestCache::new(),
            }
        }

        fn resolver(&self) -> SpecifierResolver<'_> {
            SpecifierResolver::new(
                &self.config,
                &self.store,
                &self.graph,
                &self.locator,
                &self.manifests,
            )
        }

        fn ctx(&self, dir: &str, format: ModuleFormat) -> ResolveContext {
            let base = self.root.join(dir);
            let package = self.resolver().package_of(&base);
            ResolveContext::new(base, format).with_package(package)
        }

        fn id(&self, path: &str) -> ResourceIdentifier {
            ResourceIdentifier::from_path(&self.root.join(path)).unwrap()
        }
    }

    fn reason(err: &ResolutionError) -> Option<ResolveReasonCode> {
        match err {
            ResolutionError::NotFound { reason, .. } => Some(*reason),
            _ => None,
        }
    }

    #[test]
    fn test_parse_bare_specifier() {
        assert_eq!(parse_bare_specifier("lodash"), Some(("lodash", None)));
        assert_eq!(parse_bare_specifier("lodash/fp/map"), Some(("lodash", Some("fp/map"))));
        assert_eq!(parse_bare_specifier("@scope/pkg"), Some(("@scope/pkg", None)));
        assert_eq!(parse_bare_specifier("@scope/pkg/sub"), Some(("@scope/pkg", Some("sub"))));
        assert_eq!(parse_bare_specifier("pkg/"), Some(("pkg", None)));
        assert_eq!(parse_bare_specifier("@scope"), None);
        assert_eq!(parse_bare_specifier("@/pkg"), None);
        assert_eq!(parse_bare_specifier("_private"), None);
        assert_eq!(parse_bare_specifier(".hidden"), None);
    }

    #[test]
    fn test_builtin_and_virtual_never_touch_disk() {
        let fx = Fixture::new(&[]);
        let ctx = fx.ctx("", ModuleFormat::EagerSync);
        let r = fx.resolver();

        assert_eq!(r.resolve("builtin:fs", &ctx).unwrap(), ResourceIdentifier::builtin("fs"));
        assert_eq!(r.resolve("Virtual:env", &ctx).unwrap().as_str(), "virtual:env");

        let err = r.resolve("builtin:", &ctx).unwrap_err();
        assert_eq!(err.code(), crate::error::codes::RESOLVE_INVALID_SPECIFIER);
        assert!(r.resolve("", &ctx).is_err());
        assert!(r.resolve(" ./a.js", &ctx).is_err());
    }

    #[test]
    fn test_eager_sync_probes_in_list_order() {
        let fx = Fixture::new(&[("src/util.js", ""), ("src/util.cjs", ""), ("src/a.js", "")]);
        let ctx = fx.ctx("src", ModuleFormat::EagerSync);
        let r = fx.resolver();

        assert_eq!(r.resolve("./util", &ctx).unwrap(), fx.id("src/util.js"));
        assert_eq!(r.resolve("./a.js", &ctx).unwrap(), fx.id("src/a.js"));
        assert_eq!(r.resolve("../src/./a", &ctx).unwrap(), fx.id("src/a.js"));
    }

    #[test]
    fn test_ambiguity_policy_error() {
        let config = EngineConfig::default().with_ambiguity(AmbiguityPolicy::Error);
        let fx = Fixture::with_config(&[("util.js", ""), ("util.cjs", ""), ("one.mjs", "")], config);
        let ctx = fx.ctx("", ModuleFormat::EagerSync);
        let r = fx.resolver();

        match r.resolve("./util", &ctx).unwrap_err() {
            ResolutionError::AmbiguousExtension { candidates, .. } => {
                assert_eq!(candidates, vec![fx.root.join("util.js"), fx.root.join("util.cjs")]);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(r.resolve("./one", &ctx).unwrap(), fx.id("one.mjs"));
    }

    #[test]
    fn test_async_static_requires_extension() {
        let fx = Fixture::new(&[("lib/a.js", ""), ("lib/index.js", "")]);
        let ctx = fx.ctx("", ModuleFormat::AsyncStatic);
        let r = fx.resolver();

        assert_eq!(r.resolve("./lib/a.js", &ctx).unwrap(), fx.id("lib/a.js"));

        let err = r.resolve("./lib/a", &ctx).unwrap_err();
        assert_eq!(reason(&err), Some(ResolveReasonCode::ExtensionRequired));
        let err = r.resolve("./lib", &ctx).unwrap_err();
        assert_eq!(reason(&err), Some(ResolveReasonCode::IsDirectory));
        let err = r.resolve("./lib/b.js", &ctx).unwrap_err();
        assert_eq!(reason(&err), Some(ResolveReasonCode::NotFound));
    }

    #[test]
    fn test_directory_main_then_index() {
        let fx = Fixture::new(&[
            ("withmain/package.json", r#"{"main": "lib/entry"}"#),
            ("withmain/lib/entry.js", ""),
            ("plain/index.cjs", ""),
        ]);
        let ctx = fx.ctx("", ModuleFormat::EagerSync);
        let r = fx.resolver();

        assert_eq!(r.resolve("./withmain", &ctx).unwrap(), fx.id("withmain/lib/entry.js"));
        assert_eq!(r.resolve("./plain/", &ctx).unwrap(), fx.id("plain/index.cjs"));
    }

    #[test]
    fn test_file_url_and_absolute() {
        let fx = Fixture::new(&[("a.js", "")]);
        let ctx = fx.ctx("", ModuleFormat::AsyncStatic);
        let r = fx.resolver();

        let abs = fx.root.join("a.js");
        assert_eq!(r.resolve(abs.to_str().unwrap(), &ctx).unwrap(), fx.id("a.js"));
        let url = Url::from_file_path(&abs).unwrap();
        assert_eq!(r.resolve(url.as_str(), &ctx).unwrap(), fx.id("a.js"));
    }

    #[test]
    fn test_installed_package_conditions() {
        let fx = Fixture::new(&[
            (
                "node_modules/dual/package.json",
                r#"{"name":"dual","exports":{".":{"import":"./esm.mjs","require":"./cjs.cjs"},"./feature":"./feature.js"}}"#,
            ),
            ("node_modules/dual/esm.mjs", ""),
            ("node_modules/dual/cjs.cjs", ""),
            ("node_modules/dual/feature.js", ""),
            ("node_modules/legacy/package.json", r#"{"name":"legacy","main":"main.js"}"#),
            ("node_modules/legacy/main.js", ""),
            ("node_modules/legacy/sub/thing.js", ""),
            ("src/app.js", ""),
        ]);
        let r = fx.resolver();
        let esm = fx.ctx("src", ModuleFormat::AsyncStatic);
        let cjs = fx.ctx("src", ModuleFormat::EagerSync);

        assert_eq!(r.resolve("dual", &esm).unwrap(), fx.id("node_modules/dual/esm.mjs"));
        assert_eq!(r.resolve("dual", &cjs).unwrap(), fx.id("node_modules/dual/cjs.cjs"));
        assert_eq!(
            r.resolve("dual/feature", &esm).unwrap(),
            fx.id("node_modules/dual/feature.js")
        );
        let err = r.resolve("dual/secret", &esm).unwrap_err();
        assert_eq!(reason(&err), Some(ResolveReasonCode::ExportsNotFound));

        assert_eq!(r.resolve("legacy", &esm).unwrap(), fx.id("node_modules/legacy/main.js"));
        assert_eq!(
            r.resolve("legacy/sub/thing", &cjs).unwrap(),
            fx.id("node_modules/legacy/sub/thing.js")
        );

        let err = r.resolve("ghost", &cjs).unwrap_err();
        assert_eq!(reason(&err), Some(ResolveReasonCode::PackageNotFound));
        assert!(!err.tried().is_empty());
    }

    #[test]
    fn test_exports_target_must_exist() {
        let fx = Fixture::new(&[(
            "node_modules/broken/package.json",
            r#"{"name":"broken","exports":"./missing.js"}"#,
        )]);
        let err = fx
            .resolver()
            .resolve("broken", &fx.ctx("", ModuleFormat::EagerSync))
            .unwrap_err();
        assert_eq!(reason(&err), Some(ResolveReasonCode::ExportsTargetNotFound));
    }

    #[test]
    fn test_workspace_link_wins_over_installed() {
        let fx = Fixture::new(&[
            ("package.json", r#"{"private":true,"workspaces":["packages/*"]}"#),
            (
                "packages/shared/package.json",
                r#"{"name":"shared","version":"1.0.0","type":"module","exports":"./index.js"}"#,
            ),
            ("packages/shared/index.js", ""),
            (
                "packages/api/package.json",
                r#"{"name":"api","version":"1.0.0","dependencies":{"shared":"workspace:*"}}"#,
            ),
            ("packages/api/main.js", ""),
            ("packages/other/package.json", r#"{"name":"other","version":"1.0.0"}"#),
            ("node_modules/shared/package.json", r#"{"name":"shared","main":"stale.js"}"#),
            ("node_modules/shared/stale.js", ""),
        ]);
        let r = fx.resolver();

        let from_api = fx.ctx("packages/api", ModuleFormat::EagerSync);
        assert_eq!(from_api.package.as_deref(), Some("api"));
        assert_eq!(r.resolve("shared", &from_api).unwrap(), fx.id("packages/shared/index.js"));

        // No workspace edge from `other`: falls through to the installed copy.
        let from_other = fx.ctx("packages/other", ModuleFormat::EagerSync);
        assert_eq!(r.resolve("shared", &from_other).unwrap(), fx.id("node_modules/shared/stale.js"));

        assert_eq!(
            r.detect_format(&fx.id("packages/shared/index.js")),
            ModuleFormat::AsyncStatic
        );
        assert_eq!(r.detect_format(&fx.id("packages/api/main.js")), ModuleFormat::EagerSync);
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let fx = Fixture::new(&[("a/index.js", ""), ("a/index.mjs", "")]);
        let ctx = fx.ctx("", ModuleFormat::EagerSync);
        let r = fx.resolver();
        let first = r.resolve("./a", &ctx).unwrap();
        for _ in 0..5 {
            assert_eq!(r.resolve("./a", &ctx).unwrap(), first);
        }
        assert_eq!(first, fx.id("a/index.js"));
    }
}
