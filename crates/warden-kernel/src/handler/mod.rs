//! Handler units
//!
//! A [`HandlerUnit`] is one loadable capability: a command resolved by name or
//! alias, or an event listener bound to a named event on the host hub. Units
//! are immutable; a reload produces a fresh unit that replaces the old one.

mod error;
mod manifest;

pub use error::{ExecuteError, ValidationError};
pub use manifest::HandlerManifest;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::context::HostContext;

/// Handler kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandlerKind {
    /// Invoked explicitly by name or alias
    Command,
    /// Bound as a listener for the event of the same name
    Event,
}

impl fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerKind::Command => write!(f, "command"),
            HandlerKind::Event => write!(f, "event"),
        }
    }
}

/// Where a unit was loaded from.
///
/// Used to correlate filesystem notifications back to the unit they affect.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceLocator {
    path: PathBuf,
    kind: HandlerKind,
    category: Option<String>,
}

impl SourceLocator {
    /// A command source inside `category`.
    pub fn command(path: impl Into<PathBuf>, category: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: HandlerKind::Command,
            category: Some(category.into()),
        }
    }

    /// An event source.
    pub fn event(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            kind: HandlerKind::Event,
            category: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> HandlerKind {
        self.kind
    }

    pub fn category(&self) -> Option<&str> {
        self.category.as_deref()
    }

    /// File name component, for log lines.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

impl fmt::Display for SourceLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

/// Executable body of a handler unit.
///
/// Implementations receive the host runtime context first, followed by the
/// kind-specific arguments (command arguments, or the payload of an event).
pub trait Execute: Send + Sync {
    fn execute(&self, ctx: &HostContext, args: &[Value]) -> Result<Value, ExecuteError>;
}

impl<F> Execute for F
where
    F: Fn(&HostContext, &[Value]) -> Result<Value, ExecuteError> + Send + Sync,
{
    fn execute(&self, ctx: &HostContext, args: &[Value]) -> Result<Value, ExecuteError> {
        self(ctx, args)
    }
}

/// One validated, loaded capability.
#[derive(Clone)]
pub struct HandlerUnit {
    name: String,
    description: Option<String>,
    aliases: Vec<String>,
    once: bool,
    source: SourceLocator,
    executor: Arc<dyn Execute>,
}

impl HandlerUnit {
    /// Validate `manifest` and build a unit for `source`.
    ///
    /// Aliases are trimmed, de-duplicated and stripped of the unit's own name;
    /// they only apply to commands. `once` only applies to events.
    pub fn from_manifest(
        manifest: HandlerManifest,
        source: SourceLocator,
        executor: Arc<dyn Execute>,
    ) -> Result<Self, ValidationError> {
        manifest.validate(source.kind())?;

        let name = manifest.name.unwrap_or_default();
        let kind = source.kind();

        let mut aliases: Vec<String> = Vec::new();
        if kind == HandlerKind::Command {
            for alias in manifest.aliases {
                let alias = alias.trim().to_string();
                if alias.is_empty() || alias == name || aliases.contains(&alias) {
                    continue;
                }
                aliases.push(alias);
            }
        }

        Ok(Self {
            name,
            description: manifest.description.filter(|d| !d.trim().is_empty()),
            aliases,
            once: kind == HandlerKind::Event && manifest.once,
            source,
            executor,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn aliases(&self) -> &[String] {
        &self.aliases
    }

    pub fn kind(&self) -> HandlerKind {
        self.source.kind()
    }

    /// Event listeners only: fire at most once, then detach.
    pub fn once(&self) -> bool {
        self.once
    }

    pub fn source(&self) -> &SourceLocator {
        &self.source
    }

    pub fn category(&self) -> Option<&str> {
        self.source.category()
    }

    /// Run the unit's body.
    pub fn execute(&self, ctx: &HostContext, args: &[Value]) -> Result<Value, ExecuteError> {
        self.executor.execute(ctx, args)
    }
}

impl fmt::Debug for HandlerUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerUnit")
            .field("name", &self.name)
            .field("kind", &self.kind())
            .field("aliases", &self.aliases)
            .field("once", &self.once)
            .field("source", &self.source.path())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> Arc<dyn Execute> {
        Arc::new(|_: &HostContext, _: &[Value]| Ok::<_, ExecuteError>(Value::Null))
    }

    #[test]
    fn test_aliases_are_normalised() {
        let manifest = HandlerManifest {
            name: Some("ping".into()),
            description: Some("latency".into()),
            aliases: vec![" latency ".into(), "ping".into(), "latency".into(), "".into(), "p".into()],
            has_execute: true,
            ..Default::default()
        };
        let unit = HandlerUnit::from_manifest(
            manifest,
            SourceLocator::command("/cmds/utils/ping.rhai", "utils"),
            noop(),
        )
        .unwrap();

        assert_eq!(unit.aliases(), ["latency".to_string(), "p".to_string()]);
        assert_eq!(unit.category(), Some("utils"));
        assert!(!unit.once());
    }

    #[test]
    fn test_event_units_ignore_aliases_and_keep_once() {
        let manifest = HandlerManifest {
            name: Some("ready".into()),
            aliases: vec!["start".into()],
            once: true,
            has_execute: true,
            ..Default::default()
        };
        let unit = HandlerUnit::from_manifest(manifest, SourceLocator::event("/events/ready.rhai"), noop())
            .unwrap();

        assert!(unit.aliases().is_empty());
        assert!(unit.once());
        assert_eq!(unit.kind(), HandlerKind::Event);
    }

    #[test]
    fn test_locator_file_name() {
        let loc = SourceLocator::event("/srv/events/messageCreate.rhai");
        assert_eq!(loc.file_name(), "messageCreate.rhai");
        assert_eq!(loc.category(), None);
    }
}
