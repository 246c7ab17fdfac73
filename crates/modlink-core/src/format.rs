//! Module execution formats.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The two module execution models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModuleFormat {
    /// Whole-file synchronous execution with a single aggregate export value.
    #[default]
    EagerSync,
    /// Statically declared imports/exports with per-name live bindings.
    AsyncStatic,
}

impl ModuleFormat {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EagerSync => "eager-sync",
            Self::AsyncStatic => "async-static",
        }
    }

    /// Export conditions active for requests made by a module of this format.
    #[must_use]
    pub fn conditions(&self) -> &'static [&'static str] {
        match self {
            Self::EagerSync => &["require", "default"],
            Self::AsyncStatic => &["import", "default"],
        }
    }

    /// Format implied by a file extension alone (`.mjs` / `.cjs`).
    #[must_use]
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.trim_start_matches('.') {
            "mjs" => Some(Self::AsyncStatic),
            "cjs" => Some(Self::EagerSync),
            _ => None,
        }
    }

    /// Format implied by a manifest `type` value.
    #[must_use]
    pub fn from_package_type(value: &str) -> Option<Self> {
        match value {
            "module" => Some(Self::AsyncStatic),
            "commonjs" => Some(Self::EagerSync),
            _ => None,
        }
    }
}

impl fmt::Display for ModuleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModuleFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "eager-sync" => Ok(Self::EagerSync),
            "async-static" => Ok(Self::AsyncStatic),
            other => Err(format!(
                "unknown module format '{other}' (expected eager-sync or async-static)"
            )),
        }
    }
}
