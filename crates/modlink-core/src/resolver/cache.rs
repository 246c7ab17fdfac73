//! Resolver caches.
//!
//! `ManifestCache` holds parsed manifests of installed packages, stamped with
//! mtime and size so an edited file is re-read. `ResolutionCache` memoizes
//! builtin resolution results per request.

use super::ResolveRequest;
use crate::format::ModuleFormat;
use crate::id::ResourceIdentifier;
use crate::manifest::read_manifest_value;
use dashmap::DashMap;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

/// File stamp for cache invalidation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileStamp {
    /// Modification time in milliseconds since epoch.
    pub mtime_ms: Option<u64>,
    pub size: Option<u64>,
}

impl FileStamp {
    #[must_use]
    pub fn from_path(path: &Path) -> Self {
        let Ok(meta) = path.metadata() else {
            return Self::default();
        };
        let mtime_ms = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as u64);
        Self {
            mtime_ms,
            size: Some(meta.len()),
        }
    }

    /// A missing file never matches, so absent manifests are re-checked.
    #[must_use]
    pub fn matches(&self, path: &Path) -> bool {
        self.size.is_some() && Self::from_path(path) == *self
    }
}

#[derive(Debug, Clone)]
struct CachedManifest {
    value: Option<Arc<Value>>,
    stamp: FileStamp,
}

/// Parsed manifest documents keyed by manifest path.
///
/// Unreadable or malformed manifests cache as `None`: an installed package
/// with a broken manifest still resolves through its index file.
#[derive(Debug, Default)]
pub struct ManifestCache {
    docs: DashMap<PathBuf, CachedManifest>,
}

impl ManifestCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parsed manifest at `path`, reading it when the cached stamp is stale.
    pub fn get(&self, path: &Path) -> Option<Arc<Value>> {
        if let Some(cached) = self.docs.get(path) {
            if cached.stamp.matches(path) {
                return cached.value.clone();
            }
        }

        let stamp = FileStamp::from_path(path);
        let value = match read_manifest_value(path) {
            Ok(value) => Some(Arc::new(value)),
            Err(err) => {
                if stamp.size.is_some() {
                    tracing::debug!(path = %path.display(), error = %err, "ignoring unreadable manifest");
                }
                None
            }
        };
        self.docs.insert(
            path.to_path_buf(),
            CachedManifest {
                value: value.clone(),
                stamp,
            },
        );
        value
    }

    pub fn forget(&self, path: &Path) {
        self.docs.remove(path);
    }

    pub fn clear(&self) {
        self.docs.clear();
    }
}

/// Cache key: every input that can change the builtin resolution result.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResolutionKey {
    pub specifier: String,
    pub base_dir: PathBuf,
    pub format: ModuleFormat,
    pub package: Option<String>,
}

impl From<&ResolveRequest> for ResolutionKey {
    fn from(request: &ResolveRequest) -> Self {
        Self {
            specifier: request.specifier.clone(),
            base_dir: request.context.base_dir.clone(),
            format: request.context.format,
            package: request.context.package.clone(),
        }
    }
}

/// Memoized builtin resolutions. Failures are not cached.
#[derive(Debug, Default)]
pub struct ResolutionCache {
    entries: DashMap<ResolutionKey, ResourceIdentifier>,
}

impl ResolutionCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, key: &ResolutionKey) -> Option<ResourceIdentifier> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    /// Store a result, keeping an existing entry if a racing resolution
    /// already stored one.
    pub fn insert(&self, key: ResolutionKey, id: ResourceIdentifier) -> ResourceIdentifier {
        self.entries.entry(key).or_insert(id).value().clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}
