//! Hooks shipped with the engine.

use super::{Capabilities, Hook, HookOutcome, HookResult, LoadedSource};
use crate::format::ModuleFormat;
use crate::id::ResourceIdentifier;
use crate::resolver::ResolveRequest;
use futures::future::BoxFuture;
use std::collections::BTreeMap;
use std::path::Path;

/// Rewrites specifier prefixes before delegating.
///
/// Maps `@/components/x` to `<root>/src/components/x` for an alias
/// `@ -> ./src`. Relative replacements are anchored at the workspace root.
/// The longest matching alias wins.
#[derive(Debug, Clone, Default)]
pub struct AliasHook {
    aliases: Vec<(String, String)>,
}

impl AliasHook {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a configured alias table.
    #[must_use]
    pub fn from_config(root: &Path, table: &BTreeMap<String, String>) -> Self {
        table
            .iter()
            .fold(Self::new(), |hook, (from, to)| hook.alias(from, anchor(root, to)))
    }

    #[must_use]
    pub fn alias(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.aliases.push((from.into(), to.into()));
        self.aliases.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }

    fn rewrite(&self, specifier: &str) -> Option<String> {
        self.aliases.iter().find_map(|(from, to)| {
            if specifier == from {
                return Some(to.clone());
            }
            let rest = specifier.strip_prefix(from.as_str())?;
            rest.starts_with('/').then(|| format!("{to}{rest}"))
        })
    }
}

fn anchor(root: &Path, replacement: &str) -> String {
    if replacement.starts_with("./") || replacement.starts_with("../") || replacement == "." {
        modlink_util::path::normalize_path(&root.join(replacement))
            .to_string_lossy()
            .into_owned()
    } else {
        replacement.to_string()
    }
}

impl Hook for AliasHook {
    fn name(&self) -> &str {
        "alias"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::RESOLVE
    }

    fn resolve(
        &self,
        request: &ResolveRequest,
    ) -> HookResult<HookOutcome<ResolveRequest, ResourceIdentifier>> {
        Ok(match self.rewrite(&request.specifier) {
            Some(specifier) => HookOutcome::Rewrite(request.with_specifier(specifier)),
            None => HookOutcome::Delegate,
        })
    }
}

/// Serves in-memory modules under one scheme (`virtual:name`).
#[derive(Debug, Clone)]
pub struct VirtualModulesHook {
    scheme: String,
    modules: BTreeMap<String, LoadedSource>,
}

impl VirtualModulesHook {
    #[must_use]
    pub fn new(scheme: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into().to_ascii_lowercase(),
            modules: BTreeMap::new(),
        }
    }

    /// Add a module with an explicit format.
    #[must_use]
    pub fn module(
        mut self,
        name: impl Into<String>,
        source: impl Into<String>,
        format: ModuleFormat,
    ) -> Self {
        self.modules
            .insert(name.into(), LoadedSource::new(source).with_format(format));
        self
    }

    fn lookup(&self, id: &ResourceIdentifier) -> Option<&LoadedSource> {
        if id.scheme() != self.scheme {
            return None;
        }
        self.modules.get(id.name())
    }
}

impl Hook for VirtualModulesHook {
    fn name(&self) -> &str {
        "virtual-modules"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::RESOLVE | Capabilities::LOAD
    }

    fn resolve(
        &self,
        request: &ResolveRequest,
    ) -> HookResult<HookOutcome<ResolveRequest, ResourceIdentifier>> {
        let Some((scheme, name)) = request.specifier.split_once(':') else {
            return Ok(HookOutcome::Delegate);
        };
        if scheme.eq_ignore_ascii_case(&self.scheme) && self.modules.contains_key(name) {
            return Ok(HookOutcome::ShortCircuit(ResourceIdentifier::virtual_module(
                &self.scheme,
                name,
            )));
        }
        Ok(HookOutcome::Delegate)
    }

    fn load<'a>(
        &'a self,
        id: &'a ResourceIdentifier,
    ) -> BoxFuture<'a, HookResult<HookOutcome<ResourceIdentifier, LoadedSource>>> {
        Box::pin(async move {
            Ok(match self.lookup(id) {
                Some(source) => HookOutcome::ShortCircuit(source.clone()),
                None => HookOutcome::Delegate,
            })
        })
    }
}
