//! Shared fixtures for engine integration tests.

#![allow(dead_code)]

use modlink_core::hooks::{Capabilities, Hook, HookOutcome, HookResult, LoadedSource};
use modlink_core::ResourceIdentifier;
use futures::future::BoxFuture;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// A temporary workspace built from `(relative path, content)` pairs.
pub fn workspace(files: &[(&str, &str)]) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    for (rel, content) in files {
        write(dir.path(), rel, content);
    }
    dir
}

pub fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

/// Identifier of a file inside the workspace.
pub fn file_id(root: &Path, rel: &str) -> ResourceIdentifier {
    let path: PathBuf = dunce::canonicalize(root.join(rel)).unwrap();
    ResourceIdentifier::from_path(&path).unwrap()
}

/// Load hook that counts invocations per identifier and optionally sleeps,
/// then delegates to the builtin loader.
#[derive(Default)]
pub struct CountingLoader {
    pub delay: Duration,
    pub calls: Arc<dashmap::DashMap<String, usize>>,
    pub total: AtomicUsize,
}

impl CountingLoader {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn calls_for(&self, id: &ResourceIdentifier) -> usize {
        self.calls.get(id.as_str()).map_or(0, |c| *c)
    }

    pub fn total(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }
}

impl Hook for CountingLoader {
    fn name(&self) -> &str {
        "counting-loader"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::LOAD
    }

    fn load<'a>(
        &'a self,
        id: &'a ResourceIdentifier,
    ) -> BoxFuture<'a, HookResult<HookOutcome<ResourceIdentifier, LoadedSource>>> {
        Box::pin(async move {
            *self.calls.entry(id.as_str().to_string()).or_insert(0) += 1;
            self.total.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            Ok(HookOutcome::Delegate)
        })
    }
}
