//! Conditional entry-point evaluation (`exports` field).
//!
//! Supported shapes:
//! - `"./index.js"` string shorthand
//! - `{ "import": ..., "require": ..., "default": ... }` root conditions
//! - `{ ".": ..., "./feature": ..., "./utils/*": ... }` subpath maps
//! - nested condition objects and fallback arrays at any depth
//!
//! Conditions are matched in manifest order: the first key that is active
//! for the requesting format and yields a valid target wins.

use serde_json::{Map, Value};

/// Pick the entry target for `subpath` (`None` for the package root).
///
/// Returns the `./`-relative target, or `None` when nothing matches.
#[must_use]
pub fn resolve_entry(exports: &Value, subpath: Option<&str>, conditions: &[&str]) -> Option<String> {
    let key = subpath.unwrap_or(".");

    let Some(map) = exports.as_object() else {
        // String or array shorthand only describes the root.
        return (key == ".").then(|| resolve_target(exports, conditions)).flatten();
    };

    if !is_subpath_map(map) {
        return (key == ".").then(|| resolve_target(exports, conditions)).flatten();
    }

    if let Some(target) = map.get(key) {
        return resolve_target(target, conditions);
    }

    resolve_pattern(map, key, conditions)
}

/// Whether an exports object is keyed by subpaths rather than conditions.
fn is_subpath_map(map: &Map<String, Value>) -> bool {
    map.keys().any(|k| k == "." || k.starts_with("./"))
}

/// Most specific single-`*` key wins: longest key, then lexicographic.
fn resolve_pattern(map: &Map<String, Value>, key: &str, conditions: &[&str]) -> Option<String> {
    let mut best: Option<(&str, &Value, &str)> = None;

    for (pattern, target) in map {
        if pattern.matches('*').count() != 1 {
            continue;
        }
        let Some(star) = match_pattern(pattern, key) else {
            continue;
        };
        let better = match best {
            None => true,
            Some((current, _, _)) => {
                pattern.len() > current.len()
                    || (pattern.len() == current.len() && pattern.as_str() < current)
            }
        };
        if better {
            best = Some((pattern.as_str(), target, star));
        }
    }

    let (_, target, star) = best?;
    let resolved = resolve_target(target, conditions)?;
    substitute_star(&resolved, star)
}

/// Match `./utils/*.js` against `./utils/math.js`, yielding `math`.
fn match_pattern<'k>(pattern: &str, key: &'k str) -> Option<&'k str> {
    let (prefix, suffix) = pattern.split_once('*')?;
    if key.len() < prefix.len() + suffix.len() {
        return None;
    }
    let star = key.strip_prefix(prefix)?.strip_suffix(suffix)?;
    (!star.is_empty()).then_some(star)
}

fn substitute_star(target: &str, star: &str) -> Option<String> {
    if target.matches('*').count() != 1 {
        return None;
    }
    let substituted = target.replacen('*', star, 1);
    valid_target(&substituted).then_some(substituted)
}

/// Evaluate a target: a path string, a condition object or a fallback array.
fn resolve_target(target: &Value, conditions: &[&str]) -> Option<String> {
    match target {
        Value::String(s) => {
            if s.contains('*') {
                // Pattern targets are substituted by the caller.
                return s.starts_with("./").then(|| s.clone());
            }
            valid_target(s).then(|| s.clone())
        }
        Value::Array(items) => items.iter().find_map(|item| resolve_target(item, conditions)),
        Value::Object(map) => map
            .iter()
            .filter(|(k, _)| conditions.contains(&k.as_str()))
            .find_map(|(_, nested)| resolve_target(nested, conditions)),
        _ => None,
    }
}

/// Targets must stay inside the package: `./`-relative, no `..` segments.
fn valid_target(path: &str) -> bool {
    path.starts_with("./") && !path.split('/').any(|segment| segment == "..")
}
