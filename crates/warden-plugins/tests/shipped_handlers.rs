//! The handler scripts shipped in the repository load and run.

use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use warden_kernel::config::ScriptLimits;
use warden_kernel::{EventHub, HandlerKind, HostContext};
use warden_plugins::{ExtensionRegistry, ScriptLoader, SourceLayout};

fn handlers_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../handlers")
}

#[tokio::test]
async fn test_shipped_handlers_load() {
    let root = handlers_root();
    let layout = SourceLayout::new(root.join("commands"), root.join("events"), "rhai");
    let hub = Arc::new(EventHub::new());
    let ctx = HostContext::new(hub.clone());
    let loader = Arc::new(ScriptLoader::new(&ScriptLimits::default()));
    let registry = ExtensionRegistry::new(ctx.clone(), loader);

    let loaded = registry.load_all(layout.discover()).await;
    assert_eq!(loaded, 3);

    let ping = registry.resolve("latency", HandlerKind::Command).unwrap();
    assert_eq!(ping.name(), "ping");
    assert_eq!(ping.category(), Some("utils"));
    let reply = ping.execute(&ctx, &[]).unwrap();
    assert_eq!(reply["reply"], "pong");

    let echo = registry.resolve("say", HandlerKind::Command).unwrap();
    assert_eq!(echo.execute(&ctx, &[json!("hi"), json!(2)]).unwrap(), json!(["hi", 2]));

    let failures = Arc::new(AtomicUsize::new(0));
    let mut rx = hub.subscribe_failures();
    assert_eq!(hub.emit("ready", &[]), 1);
    assert_eq!(hub.emit("ready", &[]), 0);
    while rx.try_recv().is_ok() {
        failures.fetch_add(1, Ordering::SeqCst);
    }
    assert_eq!(failures.load(Ordering::SeqCst), 0);
}
