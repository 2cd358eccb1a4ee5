//! Engine construction shared by every handler script.

use rhai::Engine;
use tracing::{debug, error, info, warn};
use warden_kernel::config::ScriptLimits;

/// Build a sandboxed engine with `limits` applied and the logging builtins
/// registered.
pub fn build_engine(limits: &ScriptLimits) -> Engine {
    let mut engine = Engine::new();
    apply_limits(&mut engine, limits);
    register_builtins(&mut engine);
    engine
}

fn apply_limits(engine: &mut Engine, limits: &ScriptLimits) {
    engine.set_max_operations(limits.max_operations);
    engine.set_max_call_levels(limits.max_call_levels);
    engine.set_max_string_size(limits.max_string_size);
    engine.set_max_array_size(limits.max_array_size);
}

fn register_builtins(engine: &mut Engine) {
    engine.register_fn("log", |msg: &str| info!(target: "warden::script", "{msg}"));
    engine.register_fn("warn", |msg: &str| warn!(target: "warden::script", "{msg}"));
    engine.register_fn("error", |msg: &str| error!(target: "warden::script", "{msg}"));

    engine.on_print(|msg| debug!(target: "warden::script", "print: {msg}"));
    // `debug` is a language builtin; its output only surfaces through this hook.
    engine.on_debug(|msg, _source, _pos| debug!(target: "warden::script", "{msg}"));

    engine.register_fn("to_json", |value: rhai::Dynamic| -> String {
        serde_json::to_string(&value).unwrap_or_else(|_| "null".to_string())
    });
}
