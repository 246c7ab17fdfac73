use crate::eval::EvaluationError;
use crate::hooks::{HookError, HookRegistrationError};
use crate::id::ResourceIdentifier;
use crate::interop::InteropError;
use crate::manifest::ManifestError;
use crate::resolver::ResolutionError;
use crate::workspace::GraphError;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Stable machine-readable error codes.
pub mod codes {
    pub const CONFIG_READ: &str = "CONFIG_READ";
    pub const CONFIG_PARSE: &str = "CONFIG_PARSE";
    pub const IO: &str = "IO";
    pub const OTHER: &str = "OTHER";

    pub const MANIFEST_READ: &str = "MANIFEST_READ";
    pub const MANIFEST_PARSE: &str = "MANIFEST_PARSE";
    pub const MANIFEST_MISSING_FIELD: &str = "MANIFEST_MISSING_FIELD";
    pub const MANIFEST_INVALID_FIELD: &str = "MANIFEST_INVALID_FIELD";
    pub const MANIFEST_CONFLICTING_FORMAT: &str = "MANIFEST_CONFLICTING_FORMAT";
    pub const MANIFEST_INVALID_CONSTRAINT: &str = "MANIFEST_INVALID_CONSTRAINT";
    pub const MANIFEST_INVALID_VERSION: &str = "MANIFEST_INVALID_VERSION";
    pub const MANIFEST_WORKSPACE_CONFLICT: &str = "MANIFEST_WORKSPACE_CONFLICT";

    pub const WORKSPACE_CYCLE: &str = "WORKSPACE_CYCLE";
    pub const WORKSPACE_UNKNOWN_PACKAGE: &str = "WORKSPACE_UNKNOWN_PACKAGE";
    pub const WORKSPACE_VERSION_MISMATCH: &str = "WORKSPACE_VERSION_MISMATCH";

    pub const RESOLVE_NOT_FOUND: &str = "RESOLVE_NOT_FOUND";
    pub const RESOLVE_AMBIGUOUS_EXTENSION: &str = "RESOLVE_AMBIGUOUS_EXTENSION";
    pub const RESOLVE_INVALID_SPECIFIER: &str = "RESOLVE_INVALID_SPECIFIER";

    pub const HOOK_FAILED: &str = "HOOK_FAILED";
    pub const HOOK_REGISTRATION_INVALID: &str = "HOOK_REGISTRATION_INVALID";

    pub const LOAD_FAILED: &str = "LOAD_FAILED";

    pub const INTEROP_ASYNC_ONLY: &str = "INTEROP_ASYNC_ONLY";
    pub const INTEROP_NO_NAMED_EXPORTS: &str = "INTEROP_NO_NAMED_EXPORTS";
    pub const INTEROP_UNAVAILABLE: &str = "INTEROP_UNAVAILABLE";

    pub const EVAL_SYNTAX: &str = "EVAL_SYNTAX";
    pub const EVAL_THROWN: &str = "EVAL_THROWN";
    pub const EVAL_UNINITIALIZED_BINDING: &str = "EVAL_UNINITIALIZED_BINDING";
    pub const EVAL_MISSING_EXPORT: &str = "EVAL_MISSING_EXPORT";
    pub const EVAL_UNDEFINED_NAME: &str = "EVAL_UNDEFINED_NAME";
    pub const EVAL_FAILED: &str = "EVAL_FAILED";
}

/// Engine start-up error.
///
/// Everything here is fatal to opening a workspace: the engine cannot be
/// used until the underlying configuration or manifests are fixed.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to read config at {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config at {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Hooks(#[from] HookRegistrationError),

    #[error("{0}")]
    Other(String),
}

impl Error {
    #[must_use]
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Stable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Io(_) => codes::IO,
            Self::ConfigRead { .. } => codes::CONFIG_READ,
            Self::ConfigParse { .. } => codes::CONFIG_PARSE,
            Self::Manifest(e) => e.code(),
            Self::Graph(e) => e.code(),
            Self::Hooks(_) => codes::HOOK_REGISTRATION_INVALID,
            Self::Other(_) => codes::OTHER,
        }
    }
}

/// Pipeline stage at which a module failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Resolve,
    Load,
    Transform,
    Evaluate,
}

impl Stage {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Resolve => "resolve",
            Self::Load => "load",
            Self::Transform => "transform",
            Self::Evaluate => "evaluate",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of a loader (builtin or hook-provided) to produce source.
#[derive(Error, Debug, Clone)]
#[error("failed to load {id}: {message}")]
pub struct LoadError {
    pub id: ResourceIdentifier,
    pub message: String,
}

/// What went wrong with a single module.
#[derive(Error, Debug, Clone)]
pub enum ModuleErrorKind {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Hook(#[from] HookError),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Interop(#[from] InteropError),

    #[error(transparent)]
    Evaluation(EvaluationError),
}

impl From<EvaluationError> for ModuleErrorKind {
    fn from(err: EvaluationError) -> Self {
        // Interop failures raised from inside a module body keep their own kind.
        match err {
            EvaluationError::Interop(inner) => Self::Interop(inner),
            other => Self::Evaluation(other),
        }
    }
}

impl ModuleErrorKind {
    /// Stable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Resolution(e) => e.code(),
            Self::Hook(_) => codes::HOOK_FAILED,
            Self::Load(_) => codes::LOAD_FAILED,
            Self::Interop(e) => e.code(),
            Self::Evaluation(e) => e.code(),
        }
    }
}

#[derive(Debug)]
struct ModuleErrorInner {
    kind: ModuleErrorKind,
    stage: Stage,
    specifier: Option<String>,
    chain: Vec<ResourceIdentifier>,
}

/// A per-module failure.
///
/// Cheap to clone: a Failed record hands the same shared value to every
/// later caller.
#[derive(Debug, Clone)]
pub struct ModuleError(Arc<ModuleErrorInner>);

impl ModuleError {
    #[must_use]
    pub fn new(
        kind: impl Into<ModuleErrorKind>,
        stage: Stage,
        specifier: Option<String>,
        chain: Vec<ResourceIdentifier>,
    ) -> Self {
        Self(Arc::new(ModuleErrorInner {
            kind: kind.into(),
            stage,
            specifier,
            chain,
        }))
    }

    #[must_use]
    pub fn kind(&self) -> &ModuleErrorKind {
        &self.0.kind
    }

    #[must_use]
    pub fn stage(&self) -> Stage {
        self.0.stage
    }

    /// The specifier whose handling failed, when there was one.
    #[must_use]
    pub fn specifier(&self) -> Option<&str> {
        self.0.specifier.as_deref()
    }

    /// Import chain from the top-level request down to the failing module.
    #[must_use]
    pub fn chain(&self) -> &[ResourceIdentifier] {
        &self.0.chain
    }

    #[must_use]
    pub fn code(&self) -> &'static str {
        self.0.kind.code()
    }

    /// Whether two handles refer to the same recorded failure.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// Identity: equal when both handles share one recorded failure.
impl PartialEq for ModuleError {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for ModuleError {}

impl fmt::Display for ModuleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}] during {}", self.0.kind, self.code(), self.0.stage)?;
        if let Some(spec) = &self.0.specifier {
            write!(f, " of '{spec}'")?;
        }
        if !self.0.chain.is_empty() {
            f.write_str("\n  import chain: ")?;
            for (i, id) in self.0.chain.iter().enumerate() {
                if i > 0 {
                    f.write_str(" -> ")?;
                }
                write!(f, "{id}")?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for ModuleError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.0.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_error_display_includes_trail() {
        let chain = vec![
            ResourceIdentifier::builtin("entry"),
            ResourceIdentifier::builtin("dep"),
        ];
        let err = ModuleError::new(
            LoadError {
                id: ResourceIdentifier::builtin("dep"),
                message: "no such builtin".to_string(),
            },
            Stage::Load,
            Some("builtin:dep".to_string()),
            chain,
        );

        let text = err.to_string();
        assert!(text.contains("LOAD_FAILED"));
        assert!(text.contains("during load"));
        assert!(text.contains("of 'builtin:dep'"));
        assert!(text.contains("builtin:entry -> builtin:dep"));
    }

    #[test]
    fn test_module_error_clones_share_identity() {
        let err = ModuleError::new(
            LoadError {
                id: ResourceIdentifier::builtin("x"),
                message: "boom".to_string(),
            },
            Stage::Load,
            None,
            Vec::new(),
        );
        let copy = err.clone();
        assert!(err.ptr_eq(&copy));
        assert_eq!(copy.code(), codes::LOAD_FAILED);
    }
}
