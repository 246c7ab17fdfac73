//! Installed-package lookup.
//!
//! Packages that are not linked from the workspace come from an external
//! installer. The resolver only needs to find the installed root; how it got
//! there is the locator's business.

use super::add_tried;
use std::path::{Path, PathBuf};

/// Finds the root directory of an installed package.
pub trait PackageLocator: Send + Sync {
    /// Root of `name` as visible from `from_dir`.
    ///
    /// Candidate paths examined along the way are appended to `tried`.
    fn locate(&self, name: &str, from_dir: &Path, tried: &mut Vec<PathBuf>) -> Option<PathBuf>;
}

/// Walks up from the importer through `<modules_dir>/<name>` folders.
#[derive(Debug, Clone)]
pub struct ModulesDirLocator {
    modules_dir: String,
}

impl ModulesDirLocator {
    #[must_use]
    pub fn new(modules_dir: impl Into<String>) -> Self {
        Self {
            modules_dir: modules_dir.into(),
        }
    }
}

impl Default for ModulesDirLocator {
    fn default() -> Self {
        Self::new("node_modules")
    }
}

impl PackageLocator for ModulesDirLocator {
    fn locate(&self, name: &str, from_dir: &Path, tried: &mut Vec<PathBuf>) -> Option<PathBuf> {
        for dir in from_dir.ancestors() {
            // Never look inside `node_modules/node_modules`.
            if dir.file_name().is_some_and(|n| n == self.modules_dir.as_str()) {
                continue;
            }
            let candidate = dir.join(&self.modules_dir).join(name);
            add_tried(tried, &candidate);
            if candidate.is_dir() {
                tracing::trace!(name, root = %candidate.display(), "located installed package");
                return Some(candidate);
            }
        }
        None
    }
}

/// Locator that never finds anything; every bare specifier must be linked.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLocator;

impl PackageLocator for NoLocator {
    fn locate(&self, _name: &str, _from_dir: &Path, _tried: &mut Vec<PathBuf>) -> Option<PathBuf> {
        None
    }
}
