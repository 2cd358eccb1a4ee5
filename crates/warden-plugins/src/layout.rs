//! Mapping between directory roots and handler source locations.
//!
//! Commands live one category deep (`<commands>/<category>/<file>.rhai`),
//! events sit flat under their root (`<events>/<file>.rhai`). Hidden files
//! and other extensions are never handler sources.

use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;
use warden_kernel::SourceLocator;
use warden_kernel::config::ExtensionsConfig;

/// The directory roots handler sources are discovered under.
#[derive(Debug, Clone)]
pub struct SourceLayout {
    commands_dir: PathBuf,
    events_dir: PathBuf,
    extension: String,
}

impl SourceLayout {
    pub fn new(
        commands_dir: impl AsRef<Path>,
        events_dir: impl AsRef<Path>,
        extension: impl Into<String>,
    ) -> Self {
        Self {
            commands_dir: normalize(commands_dir.as_ref()),
            events_dir: normalize(events_dir.as_ref()),
            extension: extension.into().trim_start_matches('.').to_string(),
        }
    }

    pub fn from_config(config: &ExtensionsConfig) -> Self {
        Self::new(&config.commands_dir, &config.events_dir, config.extension.clone())
    }

    pub fn commands_dir(&self) -> &Path {
        &self.commands_dir
    }

    pub fn events_dir(&self) -> &Path {
        &self.events_dir
    }

    /// Roots to observe for changes.
    pub fn roots(&self) -> [&Path; 2] {
        [&self.commands_dir, &self.events_dir]
    }

    /// Derive the source locator for `path`, or `None` if the path is not a
    /// handler source under either root.
    pub fn classify(&self, path: &Path) -> Option<SourceLocator> {
        if !self.is_source_file(path) {
            return None;
        }

        if let Some(parts) = relative_parts(&self.commands_dir, path) {
            return match parts.as_slice() {
                [category, _file] => Some(SourceLocator::command(path, category.clone())),
                [_file] => {
                    debug!(path = %path.display(), "command outside a category directory ignored");
                    None
                }
                _ => None,
            };
        }

        if let Some(parts) = relative_parts(&self.events_dir, path) {
            if parts.len() == 1 {
                return Some(SourceLocator::event(path));
            }
        }

        None
    }

    /// Every handler source currently on disk, commands first, each group
    /// sorted by path.
    pub fn discover(&self) -> Vec<SourceLocator> {
        let mut commands = self.scan(&self.commands_dir, 2);
        let mut events = self.scan(&self.events_dir, 1);
        commands.sort_by(|a, b| a.path().cmp(b.path()));
        events.sort_by(|a, b| a.path().cmp(b.path()));
        commands.extend(events);
        commands
    }

    fn scan(&self, root: &Path, depth: usize) -> Vec<SourceLocator> {
        if !root.is_dir() {
            warn!(root = %root.display(), "handler directory does not exist");
            return Vec::new();
        }

        WalkDir::new(root)
            .max_depth(depth)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(root = %root.display(), error = %e, "skipping unreadable entry");
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .filter_map(|entry| self.classify(entry.path()))
            .collect()
    }

    fn is_source_file(&self, path: &Path) -> bool {
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        if file_name.starts_with('.') {
            return false;
        }
        path.extension().and_then(|e| e.to_str()) == Some(self.extension.as_str())
    }
}

fn normalize(path: &Path) -> PathBuf {
    std::fs::canonicalize(path)
        .or_else(|_| std::path::absolute(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

fn relative_parts(root: &Path, path: &Path) -> Option<Vec<String>> {
    let rel = path.strip_prefix(root).ok()?;
    rel.components()
        .map(|c| match c {
            Component::Normal(part) => part.to_str().map(str::to_string),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_kernel::HandlerKind;

    fn layout(root: &Path) -> SourceLayout {
        SourceLayout::new(root.join("commands"), root.join("events"), "rhai")
    }

    #[test]
    fn test_classify_command_and_event() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout(dir.path());

        let cmd = layout
            .classify(&layout.commands_dir().join("utils").join("ping.rhai"))
            .unwrap();
        assert_eq!(cmd.kind(), HandlerKind::Command);
        assert_eq!(cmd.category(), Some("utils"));

        let evt = layout.classify(&layout.events_dir().join("ready.rhai")).unwrap();
        assert_eq!(evt.kind(), HandlerKind::Event);
    }

    #[test]
    fn test_classify_rejects_non_sources() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout(dir.path());
        let commands = layout.commands_dir().to_path_buf();

        assert!(layout.classify(&commands.join("ping.rhai")).is_none());
        assert!(layout.classify(&commands.join("utils").join(".ping.rhai")).is_none());
        assert!(layout.classify(&commands.join("utils").join("ping.rhai.swp")).is_none());
        assert!(layout.classify(&commands.join("a").join("b").join("ping.rhai")).is_none());
        assert!(layout.classify(&layout.events_dir().join("nested").join("x.rhai")).is_none());
        assert!(layout.classify(Path::new("/elsewhere/ping.rhai")).is_none());
    }

    #[test]
    fn test_discover_lists_commands_before_events() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("commands/utils")).unwrap();
        std::fs::create_dir_all(dir.path().join("events")).unwrap();
        std::fs::write(dir.path().join("commands/utils/ping.rhai"), "").unwrap();
        std::fs::write(dir.path().join("commands/utils/notes.txt"), "").unwrap();
        std::fs::write(dir.path().join("events/ready.rhai"), "").unwrap();

        let found = layout(dir.path()).discover();
        let names: Vec<String> = found.iter().map(SourceLocator::file_name).collect();
        assert_eq!(names, ["ping.rhai", "ready.rhai"]);
        assert_eq!(found[0].kind(), HandlerKind::Command);
    }

    #[test]
    fn test_missing_roots_discover_nothing() {
        let dir = tempfile::tempdir().unwrap();
        assert!(layout(&dir.path().join("absent")).discover().is_empty());
    }
}
