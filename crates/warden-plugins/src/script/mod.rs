//! Rhai-backed handler units
//!
//! A handler source is a Rhai script that declares its metadata as top-level
//! variables and defines `fn execute(ctx, args)`:
//!
//! ```rhai
//! let name = "ping";
//! let description = "Reports latency";
//! let aliases = ["latency"];
//!
//! fn execute(ctx, args) {
//!     `pong after ${ctx.now_ms - ctx.started_at_ms}ms`
//! }
//! ```
//!
//! Every load compiles the file again and produces a fresh, immutable
//! [`HandlerUnit`]; nothing is cached between loads.

mod engine;
mod handler;

pub use engine::build_engine;
pub use handler::{ENTRY_POINT, ScriptHandler};

use async_trait::async_trait;
use rhai::{AST, Dynamic, Engine, Scope};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;
use warden_kernel::config::ScriptLimits;
use warden_kernel::{HandlerManifest, HandlerUnit, SourceLocator, ValidationError};

/// Failure to turn a source location into a handler unit.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to compile {path}: {message}")]
    Compile { path: PathBuf, message: String },

    #[error("failed to evaluate {path}: {message}")]
    Evaluate { path: PathBuf, message: String },

    #[error("invalid handler {path}: {source}")]
    Invalid {
        path: PathBuf,
        #[source]
        source: ValidationError,
    },
}

pub type LoadResult<T> = Result<T, LoadError>;

/// Turns a source location into a validated [`HandlerUnit`].
#[async_trait]
pub trait UnitLoader: Send + Sync {
    async fn load(&self, source: &SourceLocator) -> LoadResult<HandlerUnit>;
}

/// Loads `.rhai` handler sources.
pub struct ScriptLoader {
    engine: Arc<Engine>,
}

impl ScriptLoader {
    pub fn new(limits: &ScriptLimits) -> Self {
        Self {
            engine: Arc::new(build_engine(limits)),
        }
    }

    /// Compile `script` as if it had been read from `source`.
    pub fn load_str(&self, script: &str, source: SourceLocator) -> LoadResult<HandlerUnit> {
        let path = source.path().to_path_buf();

        let ast = self.engine.compile(script).map_err(|e| LoadError::Compile {
            path: path.clone(),
            message: e.to_string(),
        })?;

        let mut scope = Scope::new();
        self.engine
            .run_ast_with_scope(&mut scope, &ast)
            .map_err(|e| LoadError::Evaluate {
                path: path.clone(),
                message: e.to_string(),
            })?;

        let manifest = extract_manifest(&scope, &ast)
            .map_err(|source| LoadError::Invalid { path: path.clone(), source })?;

        let executor = Arc::new(ScriptHandler::new(self.engine.clone(), ast));
        let unit = HandlerUnit::from_manifest(manifest, source, executor)
            .map_err(|source| LoadError::Invalid { path, source })?;

        debug!(name = %unit.name(), kind = %unit.kind(), "script compiled");
        Ok(unit)
    }
}

#[async_trait]
impl UnitLoader for ScriptLoader {
    async fn load(&self, source: &SourceLocator) -> LoadResult<HandlerUnit> {
        let script = tokio::fs::read_to_string(source.path())
            .await
            .map_err(|e| LoadError::Io {
                path: source.path().to_path_buf(),
                source: e,
            })?;
        self.load_str(&script, source.clone())
    }
}

fn extract_manifest(scope: &Scope, ast: &AST) -> Result<HandlerManifest, ValidationError> {
    let mut manifest = HandlerManifest {
        name: string_var(scope, "name")?,
        description: string_var(scope, "description")?,
        ..Default::default()
    };

    if let Some(value) = scope.get_value::<Dynamic>("aliases") {
        let items = value.into_array().map_err(|ty| invalid("aliases", ty))?;
        for item in items {
            manifest
                .aliases
                .push(item.into_string().map_err(|ty| invalid("aliases", ty))?);
        }
    }

    if let Some(value) = scope.get_value::<Dynamic>("once") {
        manifest.once = value.as_bool().map_err(|ty| invalid("once", ty))?;
    }

    let entry = ast.iter_functions().find(|f| f.name == ENTRY_POINT);
    if let Some(entry) = entry {
        if entry.params.len() != 2 {
            return Err(ValidationError::InvalidField {
                field: "execute",
                reason: format!("expected 2 parameters (ctx, args), found {}", entry.params.len()),
            });
        }
        manifest.has_execute = true;
    }

    Ok(manifest)
}

fn string_var(scope: &Scope, field: &'static str) -> Result<Option<String>, ValidationError> {
    scope
        .get_value::<Dynamic>(field)
        .map(|value| value.into_string().map_err(|ty| invalid(field, ty)))
        .transpose()
}

fn invalid(field: &'static str, found: &str) -> ValidationError {
    ValidationError::InvalidField {
        field,
        reason: format!("unexpected type `{found}`"),
    }
}
