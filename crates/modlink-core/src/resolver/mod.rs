//! Specifier resolution.
//!
//! Precedence, first match wins:
//! 1. built-in namespace (`builtin:x`) and other `scheme:` specifiers
//! 2. relative and absolute paths, format-sensitive probing
//! 3. bare package specifiers: workspace link first, then installed copy

mod cache;
pub mod entry;
mod locate;
mod specifier;

pub use cache::{FileStamp, ManifestCache, ResolutionCache, ResolutionKey};
pub use locate::{ModulesDirLocator, NoLocator, PackageLocator};
pub use specifier::{parse_bare_specifier, SpecifierResolver};

use crate::error::codes;
use crate::format::ModuleFormat;
use crate::id::ResourceIdentifier;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Maximum number of tried paths kept in a resolution error.
pub const MAX_TRIED_PATHS: usize = 20;

/// Why a `NotFound` resolution failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveReasonCode {
    NotFound,
    IsDirectory,
    /// An async-static importer named a path without an extension.
    ExtensionRequired,
    PackageNotFound,
    PackageEntryNotFound,
    /// The package has an `exports` map with no key for the subpath.
    ExportsNotFound,
    /// An `exports` target was selected but the file does not exist.
    ExportsTargetNotFound,
}

impl ResolveReasonCode {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "NOT_FOUND",
            Self::IsDirectory => "IS_DIRECTORY",
            Self::ExtensionRequired => "EXTENSION_REQUIRED",
            Self::PackageNotFound => "PACKAGE_NOT_FOUND",
            Self::PackageEntryNotFound => "PACKAGE_ENTRY_NOT_FOUND",
            Self::ExportsNotFound => "EXPORTS_NOT_FOUND",
            Self::ExportsTargetNotFound => "EXPORTS_TARGET_NOT_FOUND",
        }
    }
}

impl fmt::Display for ResolveReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolution failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("cannot resolve '{specifier}' from {}: {reason}", from.display())]
    NotFound {
        specifier: String,
        from: PathBuf,
        reason: ResolveReasonCode,
        /// Candidate paths, capped at [`MAX_TRIED_PATHS`].
        tried: Vec<PathBuf>,
    },

    #[error("'{specifier}' matches several files: {}", display_paths(candidates))]
    AmbiguousExtension {
        specifier: String,
        candidates: Vec<PathBuf>,
    },

    #[error("invalid specifier '{specifier}': {reason}")]
    InvalidSpecifier { specifier: String, reason: String },
}

impl ResolutionError {
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => codes::RESOLVE_NOT_FOUND,
            Self::AmbiguousExtension { .. } => codes::RESOLVE_AMBIGUOUS_EXTENSION,
            Self::InvalidSpecifier { .. } => codes::RESOLVE_INVALID_SPECIFIER,
        }
    }

    /// Candidate paths examined before giving up.
    #[must_use]
    pub fn tried(&self) -> &[PathBuf] {
        match self {
            Self::NotFound { tried, .. } => tried,
            Self::AmbiguousExtension { candidates, .. } => candidates,
            Self::InvalidSpecifier { .. } => &[],
        }
    }

    pub(crate) fn invalid(specifier: &str, reason: impl Into<String>) -> Self {
        Self::InvalidSpecifier {
            specifier: specifier.to_string(),
            reason: reason.into(),
        }
    }
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Where a specifier is being resolved from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResolveContext {
    /// The importing module; `None` for top-level requests.
    pub importer: Option<ResourceIdentifier>,
    /// Directory relative specifiers are joined onto. Must be absolute.
    pub base_dir: PathBuf,
    /// The importer's format, which selects probing rules and conditions.
    pub format: ModuleFormat,
    /// Workspace package containing the importer, if any.
    pub package: Option<String>,
}

impl ResolveContext {
    #[must_use]
    pub fn new(base_dir: PathBuf, format: ModuleFormat) -> Self {
        Self {
            importer: None,
            base_dir,
            format,
            package: None,
        }
    }

    #[must_use]
    pub fn with_importer(mut self, importer: ResourceIdentifier) -> Self {
        self.importer = Some(importer);
        self
    }

    #[must_use]
    pub fn with_package(mut self, package: Option<String>) -> Self {
        self.package = package;
        self
    }
}

/// A specifier plus its context: the unit flowing through the resolve stage.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResolveRequest {
    pub specifier: String,
    pub context: ResolveContext,
}

impl ResolveRequest {
    #[must_use]
    pub fn new(specifier: impl Into<String>, context: ResolveContext) -> Self {
        Self {
            specifier: specifier.into(),
            context,
        }
    }

    /// Same context, different specifier.
    #[must_use]
    pub fn with_specifier(&self, specifier: impl Into<String>) -> Self {
        Self {
            specifier: specifier.into(),
            context: self.context.clone(),
        }
    }
}

/// Add a path to the tried list (with cap).
pub(crate) fn add_tried(tried: &mut Vec<PathBuf>, path: &Path) {
    if tried.len() < MAX_TRIED_PATHS {
        tried.push(path.to_path_buf());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_and_display() {
        let err = ResolutionError::NotFound {
            specifier: "./x".into(),
            from: PathBuf::from("/ws/app"),
            reason: ResolveReasonCode::ExtensionRequired,
            tried: vec![PathBuf::from("/ws/app/x")],
        };
        assert_eq!(err.code(), codes::RESOLVE_NOT_FOUND);
        assert_eq!(err.tried().len(), 1);
        let msg = err.to_string();
        assert!(msg.contains("'./x'"));
        assert!(msg.contains("EXTENSION_REQUIRED"));

        let err = ResolutionError::invalid("", "empty specifier");
        assert_eq!(err.code(), codes::RESOLVE_INVALID_SPECIFIER);
    }

    #[test]
    fn test_tried_is_capped() {
        let mut tried = Vec::new();
        for i in 0..30 {
            add_tried(&mut tried, Path::new(&format!("/p{i}")));
        }
        assert_eq!(tried.len(), MAX_TRIED_PATHS);
    }
}
