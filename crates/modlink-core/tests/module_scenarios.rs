//! Module loading, cycles, interop and hooks through the engine.

mod common;

use common::{file_id, workspace, CountingLoader};
use futures::future::BoxFuture;
use modlink_core::error::codes;
use modlink_core::hooks::{
    Capabilities, Hook, HookDescriptor, HookOutcome, HookPredicate, HookResult, LoadedSource,
};
use modlink_core::resolver::ResolveRequest;
use modlink_core::{
    Binding, Engine, ModuleErrorKind, ModuleFormat, ModuleStatus, ResourceIdentifier, Stage,
};
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_imports_share_one_load() {
    let dir = workspace(&[
        ("main.mjs", "import { v } from \"./dep.mjs\"\nexport const out = v"),
        ("dep.mjs", "export const v = 7"),
    ]);
    let loader = Arc::new(CountingLoader::new(Duration::from_millis(40)));
    let engine = Arc::new(
        Engine::builder(dir.path())
            .hook(HookDescriptor::new(loader.clone()))
            .build()
            .unwrap(),
    );

    let mut tasks = Vec::new();
    for _ in 0..10 {
        let engine = engine.clone();
        tasks.push(tokio::spawn(async move { engine.import("./main.mjs").await }));
    }
    let mut records = Vec::new();
    for task in tasks {
        records.push(task.await.unwrap().unwrap());
    }

    assert!(records.iter().all(|r| Arc::ptr_eq(r, &records[0])));
    assert_eq!(loader.calls_for(&file_id(dir.path(), "main.mjs")), 1);
    assert_eq!(loader.calls_for(&file_id(dir.path(), "dep.mjs")), 1);
    assert_eq!(records[0].exports_value(), json!({"out": 7}));
}

#[tokio::test]
async fn test_module_cycle_reaches_evaluated() {
    let dir = workspace(&[
        (
            "a.mjs",
            "import { b } from \"./b.mjs\"\nexport const a = \"A\"\nexport { b as fromB }",
        ),
        (
            "b.mjs",
            "import { a } from \"./a.mjs\"\nexport const b = \"B\"\nexport { a as fromA }",
        ),
    ]);
    let engine = Engine::open(dir.path()).unwrap();

    let a = engine.import("./a.mjs").await.unwrap();
    let b = engine.registry().get(&file_id(dir.path(), "b.mjs")).unwrap();

    assert_eq!(a.status(), ModuleStatus::Evaluated);
    assert_eq!(b.status(), ModuleStatus::Evaluated);
    assert_eq!(a.exports_value(), json!({"a": "A", "fromB": "B"}));
    assert_eq!(b.exports_value(), json!({"b": "B", "fromA": "A"}));
}

#[tokio::test]
async fn test_read_during_cycle_is_uninitialized() {
    let dir = workspace(&[
        ("a.mjs", "import { early } from \"./b.mjs\"\nexport const a = 1"),
        ("b.mjs", "import { a } from \"./a.mjs\"\nexport const early = a"),
    ]);
    let engine = Engine::open(dir.path()).unwrap();

    let err = engine.import("./a.mjs").await.unwrap_err();
    assert_eq!(err.code(), codes::EVAL_UNINITIALIZED_BINDING);
    assert_eq!(err.stage(), Stage::Evaluate);
    assert_eq!(
        err.chain(),
        &[file_id(dir.path(), "a.mjs"), file_id(dir.path(), "b.mjs")]
    );
    assert!(err.to_string().contains("'a' was read before it was initialized"));
}

#[tokio::test]
async fn test_sync_access_requires_prior_async_evaluation() {
    let dir = workspace(&[
        ("main.cjs", "const lib = require(\"./lib.mjs\")\nmodule.exports = { \"lib\": 0 }\nexports.lib = lib.value"),
        ("lib.mjs", "export const value = \"esm\""),
    ]);
    let engine = Engine::open(dir.path()).unwrap();
    let lib = file_id(dir.path(), "lib.mjs");
    let main = file_id(dir.path(), "main.cjs");

    let err = engine.import("./main.cjs").await.unwrap_err();
    assert_eq!(err.code(), codes::INTEROP_ASYNC_ONLY);
    assert!(matches!(err.kind(), ModuleErrorKind::Interop(_)));

    let sync_err = engine.access_from_sync(&lib).unwrap_err();
    assert_eq!(sync_err.code(), codes::INTEROP_ASYNC_ONLY);

    let ns = engine.access_from_async(&lib).await.unwrap();
    assert_eq!(ns.get("value"), Some(Binding::Initialized(json!("esm"))));

    let ns = engine.access_from_sync(&lib).unwrap();
    assert_eq!(ns.to_value(), json!({"value": "esm"}));

    engine.invalidate(&main);
    let record = engine.ensure_loaded(&main).await.unwrap();
    assert_eq!(record.exports_value(), json!({"lib": "esm"}));
}

#[tokio::test]
async fn test_eager_sync_exposes_only_aggregate() {
    let dir = workspace(&[
        ("legacy.cjs", "module.exports = { \"answer\": 42 }"),
        ("named.mjs", "import { answer } from \"./legacy.cjs\""),
        ("whole.mjs", "import legacy from \"./legacy.cjs\"\nexport const answer = legacy.answer"),
    ]);
    let engine = Engine::open(dir.path()).unwrap();

    let err = engine.import("./named.mjs").await.unwrap_err();
    assert_eq!(err.code(), codes::INTEROP_NO_NAMED_EXPORTS);

    let whole = engine.import("./whole.mjs").await.unwrap();
    assert_eq!(whole.exports_value(), json!({"answer": 42}));

    let ns = engine
        .access_from_async(&file_id(dir.path(), "legacy.cjs"))
        .await
        .unwrap();
    assert_eq!(ns.names(), vec!["default"]);
}

#[tokio::test]
async fn test_failure_is_cached_and_scoped() {
    let dir = workspace(&[
        ("bad.mjs", "throw { \"reason\": \"boom\" }"),
        ("good.mjs", "export const ok = true"),
        ("user.mjs", "import \"./good.mjs\"\nimport \"./bad.mjs\""),
    ]);
    let loader = Arc::new(CountingLoader::new(Duration::ZERO));
    let engine = Engine::builder(dir.path())
        .hook(HookDescriptor::new(loader.clone()))
        .build()
        .unwrap();

    let first = engine.import("./user.mjs").await.unwrap_err();
    let second = engine.import("./user.mjs").await.unwrap_err();
    assert!(first.ptr_eq(&second));
    assert_eq!(first.code(), codes::EVAL_THROWN);
    assert_eq!(first.specifier(), Some("./bad.mjs"));
    assert_eq!(loader.calls_for(&file_id(dir.path(), "bad.mjs")), 1);

    let good = engine.registry().get(&file_id(dir.path(), "good.mjs")).unwrap();
    assert_eq!(good.status(), ModuleStatus::Evaluated);
}

#[tokio::test]
async fn test_invalidate_is_transitive() {
    let dir = workspace(&[
        ("top.mjs", "import { v } from \"./mid.mjs\"\nexport { v }"),
        ("mid.mjs", "import { v } from \"./leaf.mjs\"\nexport { v }"),
        ("leaf.mjs", "export const v = 1"),
        ("other.mjs", "export const o = 1"),
    ]);
    let engine = Engine::open(dir.path()).unwrap();
    engine.import("./top.mjs").await.unwrap();
    engine.import("./other.mjs").await.unwrap();

    common::write(dir.path(), "leaf.mjs", "export const v = 2");
    let mut expected = vec![
        file_id(dir.path(), "leaf.mjs"),
        file_id(dir.path(), "mid.mjs"),
        file_id(dir.path(), "top.mjs"),
    ];
    expected.sort();
    assert_eq!(engine.invalidate(&file_id(dir.path(), "leaf.mjs")), expected);

    let other = engine.registry().get(&file_id(dir.path(), "other.mjs")).unwrap();
    assert_eq!(other.status(), ModuleStatus::Evaluated);

    let top = engine.import("./top.mjs").await.unwrap();
    assert_eq!(top.exports_value(), json!({"v": 2}));
}

#[tokio::test]
async fn test_cancelled_import_leaves_no_record() {
    let dir = workspace(&[("slow.mjs", "export const done = true")]);
    let loader = Arc::new(CountingLoader::new(Duration::from_millis(300)));
    let engine = Engine::builder(dir.path())
        .hook(HookDescriptor::new(loader.clone()))
        .build()
        .unwrap();

    let attempt = tokio::time::timeout(Duration::from_millis(30), engine.import("./slow.mjs")).await;
    assert!(attempt.is_err());
    assert!(engine.registry().get(&file_id(dir.path(), "slow.mjs")).is_none());
    assert_eq!(loader.total(), 1);
}

/// Priority-1 hook answering every `env:` specifier.
struct EnvHook;

impl Hook for EnvHook {
    fn name(&self) -> &str {
        "env"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::RESOLVE
    }

    fn resolve(
        &self,
        _request: &ResolveRequest,
    ) -> HookResult<HookOutcome<ResolveRequest, ResourceIdentifier>> {
        Ok(HookOutcome::ShortCircuit(ResourceIdentifier::builtin("env")))
    }
}

/// Records that it was asked to resolve.
#[derive(Default)]
struct Witness(AtomicUsize);

impl Hook for Witness {
    fn name(&self) -> &str {
        "witness"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::RESOLVE
    }

    fn resolve(
        &self,
        _request: &ResolveRequest,
    ) -> HookResult<HookOutcome<ResolveRequest, ResourceIdentifier>> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(HookOutcome::Delegate)
    }
}

#[tokio::test]
async fn test_short_circuit_skips_later_hooks_and_builtin() {
    let dir = workspace(&[]);
    let witness = Arc::new(Witness::default());
    let engine = Engine::builder(dir.path())
        .hook(HookDescriptor::new(witness.clone()).priority(2))
        .hook(
            HookDescriptor::new(Arc::new(EnvHook))
                .priority(1)
                .predicate(HookPredicate::Prefix("env:".into())),
        )
        .builtin_module("env", "module.exports = { \"mode\": \"test\" }")
        .build()
        .unwrap();

    // The builtin resolver would reject this outright.
    let record = engine.import("env:./does/not/exist").await.unwrap();
    assert_eq!(record.id().as_str(), "builtin:env");
    assert_eq!(record.exports_value(), json!({"mode": "test"}));
    assert_eq!(witness.0.load(Ordering::SeqCst), 0);

    engine.import("./missing.mjs").await.unwrap_err();
    assert_eq!(witness.0.load(Ordering::SeqCst), 1);
}

/// Turns flat `key: value` YAML documents into a module with one default
/// export.
struct YamlHook {
    loads: AtomicUsize,
}

impl YamlHook {
    fn parse(text: &str) -> Value {
        let mut doc = Map::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, raw)) = line.split_once(':') else {
                continue;
            };
            let raw = raw.trim();
            let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
            doc.insert(key.trim().to_string(), value);
        }
        Value::Object(doc)
    }
}

impl Hook for YamlHook {
    fn name(&self) -> &str {
        "yaml"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::RESOLVE | Capabilities::LOAD | Capabilities::TRANSFORM
    }

    fn resolve(
        &self,
        request: &ResolveRequest,
    ) -> HookResult<HookOutcome<ResolveRequest, ResourceIdentifier>> {
        let path = request.context.base_dir.join(&request.specifier);
        let id = ResourceIdentifier::from_path(&path).ok_or("not an absolute path")?;
        Ok(HookOutcome::ShortCircuit(id))
    }

    fn load<'a>(
        &'a self,
        id: &'a ResourceIdentifier,
    ) -> BoxFuture<'a, HookResult<HookOutcome<ResourceIdentifier, LoadedSource>>> {
        Box::pin(async move {
            self.loads.fetch_add(1, Ordering::SeqCst);
            let path = id.to_file_path().ok_or("not a file")?;
            let text = tokio::fs::read_to_string(path).await?;
            Ok(HookOutcome::ShortCircuit(LoadedSource::new(text)))
        })
    }

    fn transform<'a>(
        &'a self,
        _id: &'a ResourceIdentifier,
        source: &'a LoadedSource,
    ) -> BoxFuture<'a, HookResult<HookOutcome<LoadedSource, LoadedSource>>> {
        Box::pin(async move {
            let doc = Self::parse(&source.source);
            let module = format!("export default {doc}");
            Ok(HookOutcome::Rewrite(
                LoadedSource::new(module).with_format(ModuleFormat::AsyncStatic),
            ))
        })
    }
}

#[tokio::test]
async fn test_yaml_hook_produces_default_export() {
    let yaml = "# settings\nname: demo\nport: 8080\ndebug: true\n";
    let dir = workspace(&[("config.yaml", yaml)]);
    let hook = Arc::new(YamlHook {
        loads: AtomicUsize::new(0),
    });
    let engine = Engine::builder(dir.path())
        .hook(HookDescriptor::new(hook.clone()).predicate(HookPredicate::extensions(["yaml"])))
        .build()
        .unwrap();

    let ctx = engine.root_context(ModuleFormat::AsyncStatic);
    let id = engine.resolve("config.yaml", &ctx).unwrap();
    assert_eq!(id, file_id(dir.path(), "config.yaml"));

    let record = engine.ensure_loaded(&id).await.unwrap();
    assert_eq!(record.format(), ModuleFormat::AsyncStatic);
    assert_eq!(record.export_names(), vec!["default"]);
    assert_eq!(
        record.binding("default").unwrap().get().value(),
        Some(json!({"name": "demo", "port": 8080, "debug": true}))
    );
    assert_eq!(record.raw_source().as_deref(), Some(yaml));
    assert_eq!(hook.loads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_hook_failure_names_hook_and_stage() {
    struct Broken;

    impl Hook for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn capabilities(&self) -> Capabilities {
            Capabilities::LOAD
        }

        fn load<'a>(
            &'a self,
            _id: &'a ResourceIdentifier,
        ) -> BoxFuture<'a, HookResult<HookOutcome<ResourceIdentifier, LoadedSource>>> {
            Box::pin(async { Err("disk on fire".into()) })
        }
    }

    let dir = workspace(&[("a.mjs", "export const a = 1")]);
    let engine = Engine::builder(dir.path())
        .hook(HookDescriptor::new(Arc::new(Broken)))
        .build()
        .unwrap();

    let err = engine.import("./a.mjs").await.unwrap_err();
    assert_eq!(err.code(), codes::HOOK_FAILED);
    assert_eq!(err.stage(), Stage::Load);
    assert!(err.to_string().contains("[broken] load: disk on fire"), "{err}");
}
