use rhai::{AST, Array, CallFnOptions, Dynamic, Engine, Scope};
use serde_json::Value;
use std::sync::Arc;
use warden_kernel::{Execute, ExecuteError, HostContext};

/// Entry point every handler script must define.
pub const ENTRY_POINT: &str = "execute";

/// Executable body backed by a compiled script.
///
/// Each call runs `execute(ctx, args)` in a fresh scope without
/// re-evaluating the script's top-level statements.
pub struct ScriptHandler {
    engine: Arc<Engine>,
    ast: AST,
}

impl ScriptHandler {
    pub fn new(engine: Arc<Engine>, ast: AST) -> Self {
        Self { engine, ast }
    }
}

impl Execute for ScriptHandler {
    fn execute(&self, ctx: &HostContext, args: &[Value]) -> Result<Value, ExecuteError> {
        let ctx = rhai::serde::to_dynamic(ctx.snapshot())
            .map_err(|e| ExecuteError::Conversion(e.to_string()))?;
        let args = args
            .iter()
            .map(rhai::serde::to_dynamic)
            .collect::<Result<Array, _>>()
            .map_err(|e| ExecuteError::Conversion(e.to_string()))?;

        let mut scope = Scope::new();
        let options = CallFnOptions::new().eval_ast(false).rewind_scope(true);
        let result = self
            .engine
            .call_fn_with_options::<Dynamic>(
                options,
                &mut scope,
                &self.ast,
                ENTRY_POINT,
                (ctx, Dynamic::from_array(args)),
            )
            .map_err(|e| ExecuteError::Raised(e.to_string()))?;

        if result.is_unit() {
            return Ok(Value::Null);
        }
        rhai::serde::from_dynamic::<Value>(&result)
            .map_err(|e| ExecuteError::Conversion(e.to_string()))
    }
}
