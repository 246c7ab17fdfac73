use super::{print_json, CommandResult};
use modlink_core::version::{version_string, OUTPUT_SCHEMA_VERSION};
use modlink_core::VERSION;
use serde_json::json;

pub fn run(json: bool) -> CommandResult {
    if json {
        return print_json(&json!({
            "ok": true,
            "schema_version": OUTPUT_SCHEMA_VERSION,
            "version": VERSION,
        }));
    }
    println!("{}", version_string());
    Ok(())
}
