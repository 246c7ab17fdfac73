//! Canonical resource identifiers.
//!
//! Every loadable unit maps to exactly one identifier:
//! - filesystem resources are `file://` URLs of the canonical path
//! - built-in modules are `builtin:<name>`
//! - hook-provided modules are `<scheme>:<name>`

use modlink_util::path::normalize_path;
use serde::{Serialize, Serializer};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use url::Url;

/// Scheme used for filesystem resources.
pub const FILE_SCHEME: &str = "file";

/// Scheme used for built-in modules.
pub const BUILTIN_SCHEME: &str = "builtin";

/// Opaque, canonical, comparable name of one loadable unit.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceIdentifier(Arc<str>);

impl ResourceIdentifier {
    /// Identifier for an absolute filesystem path.
    ///
    /// Existing paths are canonicalized (symlinks resolved, on-disk case on
    /// case-insensitive filesystems); all paths are then lexically normalized
    /// so `.`/`..` segments and trailing separators never leak into the key.
    /// Returns `None` for relative paths.
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        if !path.is_absolute() {
            return None;
        }
        let canonical = dunce::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        let normalized = normalize_path(&canonical);
        let url = Url::from_file_path(&normalized).ok()?;
        Some(Self(Arc::from(lowercase_drive(url.as_str()))))
    }

    /// Identifier for a built-in module.
    #[must_use]
    pub fn builtin(name: &str) -> Self {
        Self(Arc::from(format!("{BUILTIN_SCHEME}:{name}")))
    }

    /// Identifier for a module served by a hook under its own scheme.
    #[must_use]
    pub fn virtual_module(scheme: &str, name: &str) -> Self {
        Self(Arc::from(format!("{}:{name}", scheme.to_ascii_lowercase())))
    }

    /// Parse an identifier from its string form.
    ///
    /// Accepts `file:` URLs, absolute paths and `<scheme>:<name>` forms.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        if value.starts_with("file:") {
            let path = Url::parse(value).ok()?.to_file_path().ok()?;
            return Self::from_path(&path);
        }
        if let Some((scheme, name)) = split_scheme(value) {
            return Some(Self::virtual_module(scheme, name));
        }
        let path = Path::new(value);
        if path.is_absolute() {
            return Self::from_path(path);
        }
        None
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The lower-cased scheme (`file`, `builtin`, `virtual`, ...).
    #[must_use]
    pub fn scheme(&self) -> &str {
        self.0.split_once(':').map_or("", |(scheme, _)| scheme)
    }

    /// Everything after the scheme separator.
    #[must_use]
    pub fn name(&self) -> &str {
        self.0.split_once(':').map_or(&self.0, |(_, name)| name)
    }

    #[must_use]
    pub fn is_file(&self) -> bool {
        self.scheme() == FILE_SCHEME
    }

    #[must_use]
    pub fn is_builtin(&self) -> bool {
        self.scheme() == BUILTIN_SCHEME
    }

    /// Filesystem path of a `file:` identifier.
    #[must_use]
    pub fn to_file_path(&self) -> Option<PathBuf> {
        if !self.is_file() {
            return None;
        }
        Url::parse(&self.0).ok()?.to_file_path().ok()
    }

    /// Extension of the last path segment, without the dot.
    #[must_use]
    pub fn extension(&self) -> Option<&str> {
        let last = self.name().rsplit('/').next()?;
        let (stem, ext) = last.rsplit_once('.')?;
        if stem.is_empty() || ext.is_empty() {
            return None;
        }
        Some(ext)
    }
}

impl fmt::Display for ResourceIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ResourceIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ResourceIdentifier").field(&&*self.0).finish()
    }
}

impl Serialize for ResourceIdentifier {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

/// Split `scheme:rest` when `scheme` looks like a URL scheme.
///
/// Single-letter schemes are rejected so `C:\x` is never mistaken for one.
pub(crate) fn split_scheme(value: &str) -> Option<(&str, &str)> {
    let (scheme, rest) = value.split_once(':')?;
    let mut chars = scheme.chars();
    let first = chars.next()?;
    if scheme.len() < 2 || !first.is_ascii_alphabetic() {
        return None;
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.')) {
        return None;
    }
    if rest.is_empty() {
        return None;
    }
    Some((scheme, rest))
}

/// `file:///C:/x` -> `file:///c:/x`
fn lowercase_drive(url: &str) -> String {
    let prefix = "file:///";
    let bytes = url.as_bytes();
    if url.starts_with(prefix)
        && bytes.len() > prefix.len() + 1
        && bytes[prefix.len()].is_ascii_alphabetic()
        && bytes[prefix.len() + 1] == b':'
    {
        let mut out = String::with_capacity(url.len());
        out.push_str(prefix);
        out.push(char::from(bytes[prefix.len()].to_ascii_lowercase()));
        out.push_str(&url[prefix.len() + 1..]);
        return out;
    }
    url.to_string()
}
