//! Package manifests.
//!
//! Parses `package.json`-style manifests into immutable [`PackageManifest`]
//! values and indexes them in the [`ManifestStore`].

mod constraint;
mod store;

pub use constraint::{ConstraintError, VersionConstraint};
pub use store::ManifestStore;

use crate::config::EngineConfig;
use crate::error::codes;
use crate::format::ModuleFormat;
use semver::Version;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Manifest loading failure.
#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("failed to read manifest at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse manifest at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("manifest at {path} is missing required field '{field}'")]
    MissingField { path: PathBuf, field: &'static str },

    #[error("manifest at {path} has an invalid '{field}' field: {reason}")]
    InvalidField {
        path: PathBuf,
        field: &'static str,
        reason: String,
    },

    #[error("manifest at {path} declares conflicting formats: {detail}")]
    ConflictingFormat { path: PathBuf, detail: String },

    #[error("manifest at {path}: dependency '{dependency}' has {source}")]
    InvalidConstraint {
        path: PathBuf,
        dependency: String,
        #[source]
        source: ConstraintError,
    },

    #[error("manifest at {path}: invalid version '{version}': {source}")]
    InvalidVersion {
        path: PathBuf,
        version: String,
        #[source]
        source: semver::Error,
    },

    #[error("workspace package '{name}' is declared by both {first} and {second}")]
    WorkspaceConflict {
        name: String,
        first: PathBuf,
        second: PathBuf,
    },
}

impl ManifestError {
    /// Stable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Read { .. } => codes::MANIFEST_READ,
            Self::Parse { .. } => codes::MANIFEST_PARSE,
            Self::MissingField { .. } => codes::MANIFEST_MISSING_FIELD,
            Self::InvalidField { .. } => codes::MANIFEST_INVALID_FIELD,
            Self::ConflictingFormat { .. } => codes::MANIFEST_CONFLICTING_FORMAT,
            Self::InvalidConstraint { .. } => codes::MANIFEST_INVALID_CONSTRAINT,
            Self::InvalidVersion { .. } => codes::MANIFEST_INVALID_VERSION,
            Self::WorkspaceConflict { .. } => codes::MANIFEST_WORKSPACE_CONFLICT,
        }
    }
}

/// Settings that shape manifest parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestOptions {
    pub manifest_file: String,
    pub workspace_marker: String,
    pub default_format: ModuleFormat,
    pub modules_dir: String,
}

impl Default for ManifestOptions {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

impl ManifestOptions {
    #[must_use]
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            manifest_file: config.manifest_file.clone(),
            workspace_marker: config.workspace_marker.clone(),
            default_format: config.default_format,
            modules_dir: config.modules_dir.clone(),
        }
    }
}

/// Reference to a sibling workspace package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceRef {
    /// The full declared value, marker included.
    pub raw: String,
    /// Range the linked package must satisfy; `None` for `*`, `^`, `~`.
    pub constraint: Option<VersionConstraint>,
}

/// One declared dependency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencySpec {
    /// Version range resolved by the external registry collaborator.
    Registry(VersionConstraint),
    /// Local link to a workspace package.
    Workspace(WorkspaceRef),
    /// Protocol reference or dist-tag handed to the registry collaborator untouched.
    External(String),
}

impl DependencySpec {
    /// Classify a raw dependency value.
    pub fn parse(raw: &str, workspace_marker: &str) -> Result<Self, ConstraintError> {
        let raw = raw.trim();

        if let Some(rest) = raw.strip_prefix(workspace_marker) {
            let constraint = match rest.trim() {
                "" | "*" | "^" | "~" => None,
                range => Some(VersionConstraint::parse(range)?),
            };
            return Ok(Self::Workspace(WorkspaceRef {
                raw: raw.to_string(),
                constraint,
            }));
        }

        if raw.contains(':') || raw.contains('/') || is_dist_tag(raw) {
            return Ok(Self::External(raw.to_string()));
        }

        Ok(Self::Registry(VersionConstraint::parse(raw)?))
    }

    #[must_use]
    pub fn is_workspace(&self) -> bool {
        matches!(self, Self::Workspace(_))
    }
}

fn is_dist_tag(raw: &str) -> bool {
    let mut chars = raw.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if !first.is_ascii_alphabetic() || matches!(raw, "x" | "X") {
        return false;
    }
    if first == 'v' && raw[1..].starts_with(|c: char| c.is_ascii_digit()) {
        return false;
    }
    if raw.starts_with("x.") || raw.starts_with("X.") {
        return false;
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// One declared dependency plus whether it is optional.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub spec: DependencySpec,
    pub optional: bool,
}

/// An immutable, parsed package manifest.
#[derive(Debug, Clone)]
pub struct PackageManifest {
    pub name: String,
    pub version: Version,
    pub declared_format: ModuleFormat,
    /// Legacy directory entry.
    pub main: Option<String>,
    /// Conditional entry points, in manifest order.
    pub exports: Option<Value>,
    pub dependencies: BTreeMap<String, Dependency>,
    /// Workspace member patterns (root manifests only).
    pub workspaces: Vec<String>,
    /// Package root directory.
    pub root: PathBuf,
    pub manifest_path: PathBuf,
}

impl PackageManifest {
    /// Read and parse the manifest in `root`.
    pub fn read(root: &Path, options: &ManifestOptions) -> Result<Self, ManifestError> {
        let manifest_path = root.join(&options.manifest_file);
        let value = read_manifest_value(&manifest_path)?;
        Self::from_value(root, manifest_path, &value, options)
    }

    /// Parse an already-decoded manifest document.
    pub fn from_value(
        root: &Path,
        manifest_path: PathBuf,
        value: &Value,
        options: &ManifestOptions,
    ) -> Result<Self, ManifestError> {
        let path = manifest_path.as_path();
        let Some(doc) = value.as_object() else {
            return Err(ManifestError::InvalidField {
                path: path.to_path_buf(),
                field: "<document>",
                reason: "expected a JSON object".to_string(),
            });
        };

        let name = doc
            .get("name")
            .and_then(Value::as_str)
            .filter(|n| !n.trim().is_empty())
            .ok_or_else(|| ManifestError::MissingField {
                path: path.to_path_buf(),
                field: "name",
            })?
            .to_string();

        let raw_version = doc
            .get("version")
            .and_then(Value::as_str)
            .ok_or_else(|| ManifestError::MissingField {
                path: path.to_path_buf(),
                field: "version",
            })?;
        let version =
            Version::parse(raw_version.trim()).map_err(|source| ManifestError::InvalidVersion {
                path: path.to_path_buf(),
                version: raw_version.to_string(),
                source,
            })?;

        let declared_format = parse_format(doc, path, options.default_format)?;

        let main = optional_string(doc, "main", path)?;

        let exports = doc.get("exports").filter(|v| !v.is_null()).cloned();
        if let Some(exports) = &exports {
            check_condition_formats(exports, path)?;
        }

        let mut dependencies = BTreeMap::new();
        for (field, optional) in [("dependencies", false), ("optionalDependencies", true)] {
            let Some(table) = doc.get(field) else {
                continue;
            };
            let Some(table) = table.as_object() else {
                return Err(ManifestError::InvalidField {
                    path: path.to_path_buf(),
                    field,
                    reason: "expected an object".to_string(),
                });
            };
            for (dep_name, raw) in table {
                let Some(raw) = raw.as_str() else {
                    return Err(ManifestError::InvalidConstraint {
                        path: path.to_path_buf(),
                        dependency: dep_name.clone(),
                        source: ConstraintError {
                            range: raw.to_string(),
                            reason: "expected a string".to_string(),
                        },
                    });
                };
                let spec = DependencySpec::parse(raw, &options.workspace_marker).map_err(
                    |source| ManifestError::InvalidConstraint {
                        path: path.to_path_buf(),
                        dependency: dep_name.clone(),
                        source,
                    },
                )?;
                dependencies.insert(dep_name.clone(), Dependency { spec, optional });
            }
        }

        let workspaces = workspace_patterns(value);

        Ok(Self {
            name,
            version,
            declared_format,
            main,
            exports,
            dependencies,
            workspaces,
            root: root.to_path_buf(),
            manifest_path,
        })
    }

    /// Dependencies that link to workspace packages.
    pub fn workspace_dependencies(&self) -> impl Iterator<Item = (&str, &WorkspaceRef)> {
        self.dependencies
            .iter()
            .filter_map(|(name, dep)| match &dep.spec {
                DependencySpec::Workspace(wref) => Some((name.as_str(), wref)),
                _ => None,
            })
    }
}

/// Read a manifest file into a JSON document.
pub(crate) fn read_manifest_value(path: &Path) -> Result<Value, ManifestError> {
    let content = modlink_util::fs::read_to_string_lossy(path).map_err(|source| {
        ManifestError::Read {
            path: path.to_path_buf(),
            source,
        }
    })?;
    serde_json::from_str(&content).map_err(|source| ManifestError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Member patterns from a `workspaces` field (array or `{ "packages": [...] }`).
pub(crate) fn workspace_patterns(doc: &Value) -> Vec<String> {
    let list = match doc.get("workspaces") {
        Some(Value::Array(arr)) => arr.as_slice(),
        Some(Value::Object(obj)) => obj
            .get("packages")
            .and_then(Value::as_array)
            .map_or(&[][..], Vec::as_slice),
        _ => &[],
    };
    list.iter()
        .filter_map(|v| v.as_str().map(String::from))
        .collect()
}

fn optional_string(
    doc: &serde_json::Map<String, Value>,
    field: &'static str,
    path: &Path,
) -> Result<Option<String>, ManifestError> {
    match doc.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(ManifestError::InvalidField {
            path: path.to_path_buf(),
            field,
            reason: "expected a string".to_string(),
        }),
    }
}

fn parse_format(
    doc: &serde_json::Map<String, Value>,
    path: &Path,
    default: ModuleFormat,
) -> Result<ModuleFormat, ManifestError> {
    let from_type = optional_string(doc, "type", path)?
        .map(|t| {
            ModuleFormat::from_package_type(&t).ok_or_else(|| ManifestError::InvalidField {
                path: path.to_path_buf(),
                field: "type",
                reason: format!("unknown package type '{t}'"),
            })
        })
        .transpose()?;

    let declared = optional_string(doc, "declaredFormat", path)?
        .map(|f| {
            f.parse::<ModuleFormat>()
                .map_err(|reason| ManifestError::InvalidField {
                    path: path.to_path_buf(),
                    field: "declaredFormat",
                    reason,
                })
        })
        .transpose()?;

    match (from_type, declared) {
        (Some(a), Some(b)) if a != b => Err(ManifestError::ConflictingFormat {
            path: path.to_path_buf(),
            detail: format!("type implies {a} but declaredFormat is {b}"),
        }),
        (Some(f), _) | (None, Some(f)) => Ok(f),
        (None, None) => Ok(default),
    }
}

/// Reject `import` conditions that target `.cjs` files and `require`
/// conditions that target `.mjs` files, at any nesting depth.
fn check_condition_formats(value: &Value, path: &Path) -> Result<(), ManifestError> {
    match value {
        Value::Object(map) => {
            for (key, target) in map {
                let wrong_ext = match key.as_str() {
                    "import" => Some(".cjs"),
                    "require" => Some(".mjs"),
                    _ => None,
                };
                if let (Some(ext), Some(s)) = (wrong_ext, target.as_str()) {
                    if s.ends_with(ext) {
                        return Err(ManifestError::ConflictingFormat {
                            path: path.to_path_buf(),
                            detail: format!("'{key}' condition targets {s}"),
                        });
                    }
                }
                check_condition_formats(target, path)?;
            }
            Ok(())
        }
        Value::Array(items) => items
            .iter()
            .try_for_each(|item| check_condition_formats(item, path)),
        _ => Ok(()),
    }
}
