//! `modlink graph`: workspace members, local links and build order.

use super::{open_engine, print_json, CommandResult};
use modlink_core::version::OUTPUT_SCHEMA_VERSION;
use serde_json::json;
use std::path::Path;

pub fn run(cwd: &Path, json: bool) -> CommandResult {
    let engine = open_engine(cwd)?;
    let state = engine.workspace();
    let graph = state.graph();

    if json {
        let members: Vec<_> = graph
            .members()
            .map(|node| {
                json!({
                    "name": node.manifest.name,
                    "version": node.manifest.version.to_string(),
                    "format": node.manifest.declared_format,
                    "root": node.root().to_string_lossy(),
                    "links": node.links,
                    "dependents": graph.dependents_of(&node.manifest.name),
                })
            })
            .collect();

        return print_json(&json!({
            "ok": true,
            "schema_version": OUTPUT_SCHEMA_VERSION,
            "root": engine.root().to_string_lossy(),
            "workspace": state.store().workspace_root().is_some(),
            "members": members,
            "build_order": graph.build_order(),
        }));
    }

    if state.store().workspace_root().is_none() {
        println!("No workspaces configured.");
        println!("hint: Add a \"workspaces\" field to {}", engine.config().manifest_file);
        return Ok(());
    }

    println!("Workspace root: {}", engine.root().display());
    println!();
    println!("Packages ({}):", graph.members().count());
    for node in graph.members() {
        println!("  {} @ {} ({})", node.manifest.name, node.manifest.version, node.manifest.declared_format);
        println!("    {}", node.root().display());
        for link in &node.links {
            println!("    -> {link}");
        }
    }
    println!();
    println!("Build order: {}", graph.build_order().join(", "));

    Ok(())
}
