//! `modlink resolve`: one specifier through the hook chain and resolver.

use super::{open_engine, print_json, CommandResult, Failure, INVALID_ARGUMENT};
use modlink_core::version::OUTPUT_SCHEMA_VERSION;
use modlink_core::{ModuleFormat, ResourceIdentifier};
use serde_json::json;
use std::path::Path;

pub fn run(
    cwd: &Path,
    specifier: &str,
    from: Option<&Path>,
    format: Option<&str>,
    json: bool,
) -> CommandResult {
    let engine = open_engine(cwd)?;
    let format = format
        .map(str::parse::<ModuleFormat>)
        .transpose()
        .map_err(|e| Failure::new(INVALID_ARGUMENT, e))?;

    let context = match from {
        Some(file) => {
            let path = engine.root().join(file);
            if !path.is_file() {
                return Err(Failure::new(
                    INVALID_ARGUMENT,
                    format!("--from {} is not a file", path.display()),
                ));
            }
            let importer = ResourceIdentifier::from_path(&path).ok_or_else(|| {
                Failure::new(INVALID_ARGUMENT, format!("cannot identify {}", path.display()))
            })?;
            let format = format.unwrap_or_else(|| engine.detect_format(&importer));
            engine.context_for(&importer, format)
        }
        None => engine.root_context(format.unwrap_or(engine.config().default_format)),
    };

    tracing::debug!(specifier, format = %context.format, "resolving");
    let id = engine.resolve(specifier, &context)?;
    let target_format = engine.detect_format(&id);

    if json {
        return print_json(&json!({
            "ok": true,
            "schema_version": OUTPUT_SCHEMA_VERSION,
            "specifier": specifier,
            "importer": context.importer,
            "request_format": context.format,
            "id": id,
            "format": target_format,
            "path": id.to_file_path().map(|p| p.to_string_lossy().into_owned()),
        }));
    }

    println!("{id}");
    if let Some(path) = id.to_file_path() {
        println!("  path:   {}", path.display());
    }
    println!("  format: {target_format}");
    Ok(())
}
