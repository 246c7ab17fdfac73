//! Workspace dependency graph.
//!
//! Nodes are workspace packages; edges are dependencies declared with the
//! workspace marker. Registry-range dependencies are not edges, they are left
//! to the registry collaborator.

use crate::error::codes;
use crate::manifest::PackageManifest;
use semver::Version;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// A dependency cycle among workspace packages.
///
/// `path` starts and ends with the same package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleError {
    pub path: Vec<String>,
}

impl fmt::Display for CycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "workspace dependency cycle: {}", self.path.join(" -> "))
    }
}

impl std::error::Error for CycleError {}

/// Workspace graph construction failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error(transparent)]
    Cycle(#[from] CycleError),

    #[error("'{from}' links '{dependency}' but no workspace package has that name")]
    UnknownWorkspacePackage { from: String, dependency: String },

    #[error("'{from}' requires {dependency}@{constraint} but the workspace has {found}")]
    VersionMismatch {
        from: String,
        dependency: String,
        constraint: String,
        found: Version,
    },
}

impl GraphError {
    /// Stable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Cycle(_) => codes::WORKSPACE_CYCLE,
            Self::UnknownWorkspacePackage { .. } => codes::WORKSPACE_UNKNOWN_PACKAGE,
            Self::VersionMismatch { .. } => codes::WORKSPACE_VERSION_MISMATCH,
        }
    }
}

/// One workspace package and its local links.
#[derive(Debug, Clone)]
pub struct WorkspaceNode {
    pub manifest: Arc<PackageManifest>,
    /// Names of linked workspace packages, sorted.
    pub links: BTreeSet<String>,
}

impl WorkspaceNode {
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.manifest.root
    }
}

/// Acyclic graph of workspace packages with a precomputed build order.
#[derive(Debug, Clone, Default)]
pub struct WorkspaceGraph {
    nodes: BTreeMap<String, WorkspaceNode>,
    order: Vec<String>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

impl WorkspaceGraph {
    /// Build the graph and its build order.
    pub fn build(manifests: &[Arc<PackageManifest>]) -> Result<Self, GraphError> {
        let by_name: BTreeMap<&str, &Arc<PackageManifest>> =
            manifests.iter().map(|m| (m.name.as_str(), m)).collect();

        let mut nodes = BTreeMap::new();
        for manifest in manifests {
            let mut links = BTreeSet::new();
            for (dep, wref) in manifest.workspace_dependencies() {
                let Some(target) = by_name.get(dep) else {
                    return Err(GraphError::UnknownWorkspacePackage {
                        from: manifest.name.clone(),
                        dependency: dep.to_string(),
                    });
                };
                if let Some(constraint) = &wref.constraint {
                    if !constraint.matches(&target.version) {
                        return Err(GraphError::VersionMismatch {
                            from: manifest.name.clone(),
                            dependency: dep.to_string(),
                            constraint: constraint.to_string(),
                            found: target.version.clone(),
                        });
                    }
                }
                links.insert(dep.to_string());
            }
            nodes.insert(
                manifest.name.clone(),
                WorkspaceNode {
                    manifest: manifest.clone(),
                    links,
                },
            );
        }

        let order = topological_order(&nodes)?;
        tracing::debug!(packages = nodes.len(), order = ?order, "workspace graph built");
        Ok(Self { nodes, order })
    }

    /// Linked root of `dependency` as seen from `from`, only when `from`
    /// declares a workspace link to it.
    #[must_use]
    pub fn resolve_local(&self, from: &str, dependency: &str) -> Option<&Path> {
        let node = self.nodes.get(from)?;
        if !node.links.contains(dependency) {
            return None;
        }
        self.nodes.get(dependency).map(WorkspaceNode::root)
    }

    /// Package names, dependencies before dependents.
    #[must_use]
    pub fn build_order(&self) -> &[String] {
        &self.order
    }

    pub fn members(&self) -> impl Iterator<Item = &WorkspaceNode> {
        self.nodes.values()
    }

    #[must_use]
    pub fn node(&self, name: &str) -> Option<&WorkspaceNode> {
        self.nodes.get(name)
    }

    /// Packages that link `name` directly, sorted.
    #[must_use]
    pub fn dependents_of(&self, name: &str) -> Vec<&str> {
        self.nodes
            .iter()
            .filter(|(_, node)| node.links.contains(name))
            .map(|(n, _)| n.as_str())
            .collect()
    }

    /// Name of the member whose root is exactly `root`.
    #[must_use]
    pub fn member_at(&self, root: &Path) -> Option<&str> {
        self.nodes
            .iter()
            .find(|(_, node)| node.root() == root)
            .map(|(n, _)| n.as_str())
    }

    /// Roots of every member, keyed by name.
    #[must_use]
    pub fn roots(&self) -> BTreeMap<&str, PathBuf> {
        self.nodes
            .iter()
            .map(|(n, node)| (n.as_str(), node.root().to_path_buf()))
            .collect()
    }
}

/// Iterative three-color DFS; post-order yields dependencies first.
fn topological_order(nodes: &BTreeMap<String, WorkspaceNode>) -> Result<Vec<String>, CycleError> {
    let mut color: BTreeMap<&str, Color> = nodes.keys().map(|k| (k.as_str(), Color::White)).collect();
    let mut order = Vec::with_capacity(nodes.len());

    for start in nodes.keys() {
        if color[start.as_str()] != Color::White {
            continue;
        }

        // (node, iterator position into its sorted links)
        let mut stack: Vec<(&str, usize)> = vec![(start.as_str(), 0)];
        color.insert(start.as_str(), Color::Gray);

        while let Some(&(name, pos)) = stack.last() {
            let links = &nodes[name].links;
            if let Some(next) = links.iter().nth(pos) {
                if let Some(top) = stack.last_mut() {
                    top.1 += 1;
                }
                match color[next.as_str()] {
                    Color::White => {
                        color.insert(next.as_str(), Color::Gray);
                        stack.push((next.as_str(), 0));
                    }
                    Color::Gray => {
                        let begin = stack
                            .iter()
                            .position(|(n, _)| *n == next.as_str())
                            .unwrap_or(0);
                        let mut path: Vec<String> =
                            stack[begin..].iter().map(|(n, _)| (*n).to_string()).collect();
                        path.push(next.clone());
                        return Err(CycleError { path });
                    }
                    Color::Black => {}
                }
            } else {
                color.insert(name, Color::Black);
                order.push(name.to_string());
                stack.pop();
            }
        }
    }

    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::ManifestOptions;
    use serde_json::json;

    fn manifest(name: &str, version: &str, deps: &[(&str, &str)]) -> Arc<PackageManifest> {
        let deps: serde_json::Map<String, serde_json::Value> = deps
            .iter()
            .map(|(n, v)| ((*n).to_string(), json!(v)))
            .collect();
        let root = PathBuf::from(format!("/ws/{name}"));
        Arc::new(
            PackageManifest::from_value(
                &root,
                root.join("package.json"),
                &json!({ "name": name, "version": version, "dependencies": deps }),
                &ManifestOptions::default(),
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_build_order_dependencies_first() {
        let graph = WorkspaceGraph::build(&[
            manifest("api", "1.0.0", &[("shared", "workspace:*"), ("lodash", "^4.0.0")]),
            manifest("shared", "1.0.0", &[]),
            manifest("web", "1.0.0", &[("api", "workspace:*")]),
        ])
        .unwrap();

        assert_eq!(graph.build_order(), &["shared", "api", "web"]);
        assert_eq!(graph.dependents_of("shared"), vec!["api"]);
    }

    #[test]
    fn test_resolve_local_requires_edge() {
        let graph = WorkspaceGraph::build(&[
            manifest("api", "1.0.0", &[("shared", "workspace:*")]),
            manifest("shared", "1.0.0", &[]),
            manifest("other", "1.0.0", &[]),
        ])
        .unwrap();

        assert_eq!(graph.resolve_local("api", "shared"), Some(Path::new("/ws/shared")));
        assert_eq!(graph.resolve_local("other", "shared"), None);
        assert_eq!(graph.resolve_local("api", "lodash"), None);
    }

    #[test]
    fn test_two_package_cycle_names_both() {
        let err = WorkspaceGraph::build(&[
            manifest("a", "1.0.0", &[("b", "workspace:*")]),
            manifest("b", "1.0.0", &[("a", "workspace:*")]),
        ])
        .unwrap_err();

        match err {
            GraphError::Cycle(cycle) => {
                assert_eq!(cycle.path, vec!["a", "b", "a"]);
                assert!(cycle.to_string().contains("a -> b -> a"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_longer_cycle_path() {
        let err = WorkspaceGraph::build(&[
            manifest("root", "1.0.0", &[("x", "workspace:*")]),
            manifest("x", "1.0.0", &[("y", "workspace:*")]),
            manifest("y", "1.0.0", &[("z", "workspace:*")]),
            manifest("z", "1.0.0", &[("x", "workspace:*")]),
        ])
        .unwrap_err();

        assert_eq!(err.code(), codes::WORKSPACE_CYCLE);
        match err {
            GraphError::Cycle(cycle) => assert_eq!(cycle.path, vec!["x", "y", "z", "x"]),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_unknown_workspace_package() {
        let err =
            WorkspaceGraph::build(&[manifest("api", "1.0.0", &[("ghost", "workspace:*")])])
                .unwrap_err();
        assert!(matches!(err, GraphError::UnknownWorkspacePackage { .. }));
    }

    #[test]
    fn test_workspace_range_must_match() {
        let err = WorkspaceGraph::build(&[
            manifest("api", "1.0.0", &[("shared", "workspace:^2.0.0")]),
            manifest("shared", "1.4.0", &[]),
        ])
        .unwrap_err();
        assert_eq!(err.code(), codes::WORKSPACE_VERSION_MISMATCH);

        WorkspaceGraph::build(&[
            manifest("api", "1.0.0", &[("shared", "workspace:^1.0.0")]),
            manifest("shared", "1.4.0", &[]),
        ])
        .unwrap();
    }
}
