//! Integration tests for the `modlink` binary.
//!
//! Each test writes a small workspace into a temp dir and checks the
//! `--json` contract: exactly one JSON object on stdout.

use serde_json::Value;
use std::fs;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

fn modlink(cwd: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_modlink"))
        .arg("--cwd")
        .arg(cwd)
        .arg("--json")
        .args(args)
        .output()
        .expect("failed to run modlink")
}

fn stdout_json(output: &Output) -> Value {
    let stdout = String::from_utf8_lossy(&output.stdout);
    serde_json::from_str(&stdout).unwrap_or_else(|e| panic!("invalid JSON ({e}): {stdout}"))
}

fn fixture(files: &[(&str, &str)]) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    for (rel, content) in files {
        let path = dir.path().join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }
    dir
}

fn linked_workspace() -> TempDir {
    fixture(&[
        ("package.json", r#"{"name": "root", "private": true, "workspaces": ["packages/*"]}"#),
        (
            "packages/shared/package.json",
            r#"{"name": "shared", "version": "1.0.0", "type": "module", "exports": "./index.js"}"#,
        ),
        ("packages/shared/index.js", "export const greeting = \"hello\""),
        (
            "packages/app/package.json",
            r#"{"name": "app", "version": "1.0.0", "type": "module", "dependencies": {"shared": "workspace:*"}}"#,
        ),
        (
            "packages/app/main.js",
            "import { greeting } from \"shared\"\nexport const message = greeting",
        ),
    ])
}

#[test]
fn test_version_json() {
    let dir = tempfile::tempdir().unwrap();
    let output = modlink(dir.path(), &["version"]);
    assert!(output.status.success());

    let json = stdout_json(&output);
    assert_eq!(json["ok"], true);
    assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
}

#[test]
fn test_graph_json() {
    let dir = linked_workspace();
    let output = modlink(dir.path(), &["graph"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let json = stdout_json(&output);
    assert_eq!(json["ok"], true);
    assert_eq!(json["build_order"], serde_json::json!(["shared", "app"]));

    let members = json["members"].as_array().unwrap();
    assert_eq!(members.len(), 2);
    let app = members.iter().find(|m| m["name"] == "app").unwrap();
    assert_eq!(app["links"], serde_json::json!(["shared"]));
    assert_eq!(app["format"], "async-static");
}

#[test]
fn test_resolve_json_follows_workspace_link() {
    let dir = linked_workspace();
    let output = modlink(
        dir.path(),
        &["resolve", "shared", "--from", "packages/app/main.js"],
    );
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let json = stdout_json(&output);
    let id = json["id"].as_str().unwrap();
    assert!(id.starts_with("file://"), "{id}");
    assert!(id.ends_with("/packages/shared/index.js"), "{id}");
    assert_eq!(json["request_format"], "async-static");
}

#[test]
fn test_resolve_failure_json() {
    let dir = linked_workspace();
    let output = modlink(dir.path(), &["resolve", "./nowhere.js"]);
    assert!(!output.status.success());

    let json = stdout_json(&output);
    assert_eq!(json["ok"], false);
    assert_eq!(json["error"]["code"], "RESOLVE_NOT_FOUND");
    assert!(json["error"]["message"].as_str().unwrap().contains("./nowhere.js"));
}

#[test]
fn test_run_json() {
    let dir = linked_workspace();
    let output = modlink(dir.path(), &["run", "packages/app/main.js"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let json = stdout_json(&output);
    assert_eq!(json["status"], "evaluated");
    assert_eq!(json["exports"], serde_json::json!({"message": "hello"}));
    assert_eq!(json["modules"].as_array().unwrap().len(), 2);
}

#[test]
fn test_run_failure_json() {
    let dir = fixture(&[("boom.cjs", "throw \"nope\"")]);
    let output = modlink(dir.path(), &["run", "boom.cjs"]);
    assert_eq!(output.status.code(), Some(1));

    let json = stdout_json(&output);
    assert_eq!(json["ok"], false);
    assert_eq!(json["error"]["code"], "EVAL_THROWN");
}

#[test]
fn test_workspace_cycle_is_reported() {
    let dir = fixture(&[
        ("package.json", r#"{"name": "root", "private": true, "workspaces": ["pkgs/*"]}"#),
        ("pkgs/a/package.json", r#"{"name": "a", "version": "1.0.0", "dependencies": {"b": "workspace:*"}}"#),
        ("pkgs/b/package.json", r#"{"name": "b", "version": "1.0.0", "dependencies": {"a": "workspace:*"}}"#),
    ]);
    let output = modlink(dir.path(), &["graph"]);
    assert!(!output.status.success());

    let json = stdout_json(&output);
    assert_eq!(json["error"]["code"], "WORKSPACE_CYCLE");
}
