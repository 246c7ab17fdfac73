//! `modlink run`: load and evaluate an entry module and its graph.

use super::{open_engine, print_json, CommandResult, Failure, INVALID_ARGUMENT};
use modlink_core::version::OUTPUT_SCHEMA_VERSION;
use modlink_core::ResourceIdentifier;
use serde_json::json;
use std::path::Path;
use std::time::Instant;

/// `entry` is a file under the workspace root when one exists there,
/// otherwise a specifier resolved from the root.
pub async fn run(cwd: &Path, entry: &str, json: bool) -> CommandResult {
    let engine = open_engine(cwd)?;
    let started = Instant::now();

    let path = engine.root().join(entry);
    let record = if path.is_file() {
        let id = ResourceIdentifier::from_path(&path).ok_or_else(|| {
            Failure::new(INVALID_ARGUMENT, format!("cannot identify {}", path.display()))
        })?;
        engine.ensure_loaded(&id).await?
    } else {
        engine.import(entry).await?
    };

    let elapsed = started.elapsed();
    tracing::debug!(id = %record.id(), modules = engine.registry().len(), ?elapsed, "entry evaluated");

    if json {
        return print_json(&json!({
            "ok": true,
            "schema_version": OUTPUT_SCHEMA_VERSION,
            "id": record.id(),
            "format": record.format(),
            "status": record.status(),
            "exports": record.exports_value(),
            "modules": engine.registry().ids(),
        }));
    }

    let exports = serde_json::to_string_pretty(&record.exports_value())
        .map_err(|e| Failure::new(modlink_core::error::codes::OTHER, e.to_string()))?;
    println!("{} ({})", record.id(), record.format());
    println!("{exports}");
    Ok(())
}
