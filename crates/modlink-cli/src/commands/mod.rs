pub mod graph;
pub mod resolve;
pub mod run;
pub mod version;

use modlink_core::{Engine, Error, ModuleError, ModuleErrorKind};
use serde_json::{json, Value};
use std::path::Path;

/// Code for command-line arguments the engine never saw.
pub const INVALID_ARGUMENT: &str = "CLI_INVALID_ARGUMENT";

/// A command failure: stable code plus a human message.
#[derive(Debug)]
pub struct Failure {
    pub code: &'static str,
    pub message: String,
}

impl Failure {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> Value {
        json!({
            "ok": false,
            "error": {
                "code": self.code,
                "message": self.message,
            }
        })
    }
}

impl From<Error> for Failure {
    fn from(err: Error) -> Self {
        Self::new(err.code(), err.to_string())
    }
}

impl From<ModuleError> for Failure {
    fn from(err: ModuleError) -> Self {
        Self::new(err.code(), err.to_string())
    }
}

impl From<ModuleErrorKind> for Failure {
    fn from(err: ModuleErrorKind) -> Self {
        Self::new(err.code(), err.to_string())
    }
}

pub type CommandResult = Result<(), Failure>;

pub fn open_engine(cwd: &Path) -> Result<Engine, Failure> {
    Ok(Engine::open(cwd)?)
}

pub fn print_json(value: &Value) -> CommandResult {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| Failure::new(modlink_core::error::codes::OTHER, e.to_string()))?;
    println!("{text}");
    Ok(())
}
