use crate::error::Error;
use crate::format::ModuleFormat;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Name of the optional engine configuration file at the workspace root.
pub const CONFIG_FILE: &str = "modlink.json";

/// Runtime configuration for the modlink CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Current working directory.
    pub cwd: PathBuf,

    /// Whether to emit JSON logs.
    pub json_logs: bool,

    /// Verbosity level (0 = INFO, 1 = DEBUG, 2+ = TRACE).
    pub verbosity: u8,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cwd: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            json_logs: false,
            verbosity: 0,
        }
    }
}

impl Config {
    /// Create a new config with the given working directory.
    #[must_use]
    pub fn new(cwd: PathBuf) -> Self {
        Self {
            cwd,
            ..Default::default()
        }
    }

    /// Set verbosity level.
    #[must_use]
    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    /// Set JSON log output.
    #[must_use]
    pub fn with_json_logs(mut self, json: bool) -> Self {
        self.json_logs = json;
        self
    }
}

/// How ties between equally-eligible probe candidates are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AmbiguityPolicy {
    /// Take the first candidate in probe-list order.
    #[default]
    First,
    /// Fail with `AmbiguousExtension`.
    Error,
}

/// Engine configuration, loaded from `modlink.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Extensions probed for eager-sync requests, in precedence order.
    pub extensions: Vec<String>,
    /// Stem of the directory index file.
    pub index_file: String,
    /// Package manifest file name.
    pub manifest_file: String,
    /// Directory searched for installed packages.
    pub modules_dir: String,
    /// Reserved prefix for built-in modules.
    pub builtin_prefix: String,
    /// Dependency value prefix marking a local workspace link.
    pub workspace_marker: String,
    /// Format for files whose extension and manifest say nothing.
    pub default_format: ModuleFormat,
    pub ambiguity: AmbiguityPolicy,
    /// Specifier prefix rewrites applied before resolution.
    pub alias: BTreeMap<String, String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            extensions: vec![".js".to_string(), ".mjs".to_string(), ".cjs".to_string()],
            index_file: "index".to_string(),
            manifest_file: "package.json".to_string(),
            modules_dir: "node_modules".to_string(),
            builtin_prefix: "builtin:".to_string(),
            workspace_marker: "workspace:".to_string(),
            default_format: ModuleFormat::EagerSync,
            ambiguity: AmbiguityPolicy::First,
            alias: BTreeMap::new(),
        }
    }
}

impl EngineConfig {
    /// Set the probe list.
    #[must_use]
    pub fn with_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extensions = extensions.into_iter().map(Into::into).collect();
        self
    }

    /// Set the ambiguity policy.
    #[must_use]
    pub fn with_ambiguity(mut self, ambiguity: AmbiguityPolicy) -> Self {
        self.ambiguity = ambiguity;
        self
    }

    /// Set the fallback module format.
    #[must_use]
    pub fn with_default_format(mut self, format: ModuleFormat) -> Self {
        self.default_format = format;
        self
    }
}

/// Find the engine config file in the given root directory.
#[must_use]
pub fn find_config_file(root: &Path) -> Option<PathBuf> {
    let path = root.join(CONFIG_FILE);
    path.is_file().then_some(path)
}

/// Load engine configuration for a workspace root.
///
/// A missing config file yields the defaults.
pub fn load_config(root: &Path) -> Result<EngineConfig, Error> {
    let Some(path) = find_config_file(root) else {
        return Ok(EngineConfig::default());
    };

    let content = std::fs::read_to_string(&path).map_err(|source| Error::ConfigRead {
        path: path.clone(),
        source,
    })?;

    serde_json::from_str(&content).map_err(|source| Error::ConfigParse { path, source })
}
