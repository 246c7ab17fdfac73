//! Manifest indexing and workspace member discovery.

use super::{read_manifest_value, workspace_patterns, ManifestError, ManifestOptions, PackageManifest};
use std::collections::{BTreeMap, HashMap};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

/// Index of loaded package manifests.
///
/// Manifests are indexed by declared name (last load wins) and by canonical
/// root. Workspace members are tracked separately so two members claiming
/// one name is reported instead of silently overwritten.
#[derive(Debug, Clone, Default)]
pub struct ManifestStore {
    options: ManifestOptions,
    by_name: HashMap<String, Arc<PackageManifest>>,
    by_root: BTreeMap<PathBuf, Arc<PackageManifest>>,
    members: BTreeMap<String, PathBuf>,
    workspace_root: Option<PathBuf>,
}

impl ManifestStore {
    #[must_use]
    pub fn new(options: ManifestOptions) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn options(&self) -> &ManifestOptions {
        &self.options
    }

    /// Load the manifest in `root` and index it.
    pub fn load(&mut self, root: &Path) -> Result<Arc<PackageManifest>, ManifestError> {
        let root = canonical(root);
        let manifest = Arc::new(PackageManifest::read(&root, &self.options)?);
        self.forget_root(&root);
        self.index(&manifest);
        Ok(manifest)
    }

    /// Load a workspace member, rejecting a name already claimed by another member.
    pub fn load_workspace_member(
        &mut self,
        root: &Path,
    ) -> Result<Arc<PackageManifest>, ManifestError> {
        let root = canonical(root);
        let manifest = Arc::new(PackageManifest::read(&root, &self.options)?);

        if let Some(first) = self.members.get(&manifest.name) {
            if *first != root {
                return Err(ManifestError::WorkspaceConflict {
                    name: manifest.name.clone(),
                    first: first.clone(),
                    second: root,
                });
            }
        }

        self.forget_root(&root);
        self.members.insert(manifest.name.clone(), root);
        self.index(&manifest);
        Ok(manifest)
    }

    /// Re-read the manifest of an already-known package root.
    pub fn reload(&mut self, root: &Path) -> Result<Arc<PackageManifest>, ManifestError> {
        let root = canonical(root);
        let was_member = self.members.values().any(|r| *r == root);
        if was_member {
            self.load_workspace_member(&root)
        } else {
            self.load(&root)
        }
    }

    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<Arc<PackageManifest>> {
        self.by_name.get(name).cloned()
    }

    #[must_use]
    pub fn get_by_root(&self, root: &Path) -> Option<Arc<PackageManifest>> {
        self.by_root.get(root).cloned()
    }

    /// The nearest loaded manifest whose root contains `path`.
    ///
    /// The search stops at an installed-modules directory: files inside an
    /// installed package are never owned by the package that installed it.
    #[must_use]
    pub fn owner_of(&self, path: &Path) -> Option<Arc<PackageManifest>> {
        let modules_dir = self.options.modules_dir.as_str();
        let mut current = Some(path);
        while let Some(dir) = current {
            if let Some(found) = self.by_root.get(dir) {
                return Some(found.clone());
            }
            if matches!(dir.components().next_back(), Some(Component::Normal(n)) if n == modules_dir)
            {
                return None;
            }
            current = dir.parent();
        }
        None
    }

    #[must_use]
    pub fn is_member(&self, name: &str) -> bool {
        self.members.contains_key(name)
    }

    #[must_use]
    pub fn workspace_root(&self) -> Option<&Path> {
        self.workspace_root.as_deref()
    }

    /// Workspace member manifests, sorted by name.
    #[must_use]
    pub fn workspace_manifests(&self) -> Vec<Arc<PackageManifest>> {
        self.members
            .values()
            .filter_map(|root| self.by_root.get(root).cloned())
            .collect()
    }

    /// Discover and load the workspace rooted at `root`.
    ///
    /// A root manifest with a `workspaces` field has its member patterns
    /// expanded; a root without one is a single-package workspace. A
    /// directory without any manifest is an empty workspace.
    pub fn discover_workspace(
        &mut self,
        root: &Path,
    ) -> Result<Vec<Arc<PackageManifest>>, ManifestError> {
        let root = canonical(root);
        self.workspace_root = Some(root.clone());

        let manifest_path = root.join(&self.options.manifest_file);
        if !manifest_path.is_file() {
            return Ok(Vec::new());
        }

        let doc = read_manifest_value(&manifest_path)?;
        let patterns = workspace_patterns(&doc);

        if patterns.is_empty() {
            self.load_workspace_member(&root)?;
            return Ok(self.workspace_manifests());
        }

        // A private workspace root usually has no version; index it only when
        // it is a complete package in its own right.
        if doc.get("name").is_some() && doc.get("version").is_some() {
            self.load(&root)?;
        }

        let (excludes, includes): (Vec<&String>, Vec<&String>) =
            patterns.iter().partition(|p| p.starts_with('!'));
        let excludes = excludes
            .into_iter()
            .map(|p| glob::Pattern::new(&p[1..]))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| invalid_workspaces(&manifest_path, &e.to_string()))?;

        let mut dirs = Vec::new();
        for pattern in includes {
            let full = root.join(pattern);
            let entries = glob::glob(&full.to_string_lossy())
                .map_err(|e| invalid_workspaces(&manifest_path, &e.to_string()))?;
            for entry in entries.flatten() {
                let relative = entry.strip_prefix(&root).unwrap_or(&entry);
                if excludes.iter().any(|ex| ex.matches_path(relative)) {
                    continue;
                }
                if entry.join(&self.options.manifest_file).is_file() {
                    dirs.push(entry);
                }
            }
        }
        dirs.sort();
        dirs.dedup();

        for dir in dirs {
            self.load_workspace_member(&dir)?;
        }

        Ok(self.workspace_manifests())
    }

    fn index(&mut self, manifest: &Arc<PackageManifest>) {
        self.by_name.insert(manifest.name.clone(), manifest.clone());
        self.by_root.insert(manifest.root.clone(), manifest.clone());
    }

    /// Drop every index entry that points at `root` (its name may have changed).
    fn forget_root(&mut self, root: &Path) {
        if let Some(old) = self.by_root.remove(root) {
            if self
                .by_name
                .get(&old.name)
                .is_some_and(|m| m.root == root)
            {
                self.by_name.remove(&old.name);
            }
            if self.members.get(&old.name).is_some_and(|r| r == root) {
                self.members.remove(&old.name);
            }
        }
    }
}

fn canonical(path: &Path) -> PathBuf {
    dunce::canonicalize(path).unwrap_or_else(|_| modlink_util::path::normalize_path(path))
}

fn invalid_workspaces(path: &Path, reason: &str) -> ManifestError {
    ManifestError::InvalidField {
        path: path.to_path_buf(),
        field: "workspaces",
        reason: reason.to_string(),
    }
}
