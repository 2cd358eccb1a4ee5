//! Extension registry
//!
//! Owns the live `name -> unit` and `alias -> name` tables for commands and
//! events and the `location -> unit` index used to correlate filesystem
//! changes. Every mutation happens under a single write lock, so readers
//! observe either the state before a mutation or the state after it.

use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};
use warden_kernel::{
    HandlerFailure, HandlerKind, HandlerUnit, HostContext, Listener, ListenerId, SourceLocator,
};

use crate::script::{LoadResult, UnitLoader};

/// Registry sizes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryCounts {
    pub commands: usize,
    pub events: usize,
    pub categories: usize,
}

struct Entry {
    unit: HandlerUnit,
    listener: Option<ListenerId>,
}

#[derive(Default)]
struct Table {
    units: HashMap<String, Entry>,
    aliases: HashMap<String, String>,
}

impl Table {
    fn resolve(&self, key: &str) -> Option<&HandlerUnit> {
        if let Some(entry) = self.units.get(key) {
            return Some(&entry.unit);
        }
        let name = self.aliases.get(key)?;
        self.units.get(name).map(|e| &e.unit)
    }
}

#[derive(Default)]
struct RegistryState {
    commands: Table,
    events: Table,
    locations: HashMap<PathBuf, (HandlerKind, String)>,
}

impl RegistryState {
    fn table(&self, kind: HandlerKind) -> &Table {
        match kind {
            HandlerKind::Command => &self.commands,
            HandlerKind::Event => &self.events,
        }
    }

    fn table_mut(&mut self, kind: HandlerKind) -> &mut Table {
        match kind {
            HandlerKind::Command => &mut self.commands,
            HandlerKind::Event => &mut self.events,
        }
    }
}

/// Live registry of handler units.
pub struct ExtensionRegistry {
    ctx: Arc<HostContext>,
    loader: Arc<dyn UnitLoader>,
    state: RwLock<RegistryState>,
}

impl ExtensionRegistry {
    pub fn new(ctx: Arc<HostContext>, loader: Arc<dyn UnitLoader>) -> Self {
        Self {
            ctx,
            loader,
            state: RwLock::new(RegistryState::default()),
        }
    }

    /// Runtime context handed to every unit.
    pub fn context(&self) -> &Arc<HostContext> {
        &self.ctx
    }

    /// Clear the registry and rebuild it from `locations`.
    ///
    /// Every location is parsed before the registry is touched; the swap
    /// itself is a single mutation. Locations that fail to load are skipped
    /// with a warning. Returns how many units were registered.
    pub async fn load_all(&self, locations: Vec<SourceLocator>) -> usize {
        let (mut commands, mut events): (Vec<_>, Vec<_>) = locations
            .into_iter()
            .partition(|loc| loc.kind() == HandlerKind::Command);
        commands.append(&mut events);

        let mut units = Vec::with_capacity(commands.len());
        for location in &commands {
            match self.loader.load(location).await {
                Ok(unit) => units.push(unit),
                Err(e) => warn!(path = %location, error = %e, "skipping handler"),
            }
        }

        {
            let mut state = self.state.write();
            self.detach_all(&mut state);
            for unit in units {
                self.install(&mut state, unit);
            }
        }

        let counts = self.publish_counts();
        info!(
            commands = counts.commands,
            events = counts.events,
            categories = counts.categories,
            "handlers loaded"
        );
        self.log_distribution();
        counts.commands + counts.events
    }

    /// Parse `location` and register the unit it describes.
    ///
    /// A unit previously loaded from the same location is replaced. On
    /// failure the registry is left unchanged.
    pub async fn load(&self, location: &SourceLocator) -> LoadResult<HandlerUnit> {
        match self.loader.load(location).await {
            Ok(unit) => {
                self.state_changed(|this, state| {
                    this.install(state, unit.clone());
                });
                info!(name = %unit.name(), kind = %unit.kind(), path = %location, "handler loaded");
                if unit.kind() == HandlerKind::Event {
                    self.log_distribution();
                }
                Ok(unit)
            }
            Err(e) => {
                warn!(path = %location, error = %e, "failed to load handler");
                Err(e)
            }
        }
    }

    /// Re-parse `location` and swap the result in for the unit previously
    /// loaded from it.
    ///
    /// The old unit is detached and the new one installed in one mutation.
    /// If the source no longer parses the old unit is still removed.
    pub async fn update(&self, location: &SourceLocator) -> LoadResult<HandlerUnit> {
        let result = self.loader.load(location).await;

        let previous = self.state_changed(|this, state| {
            let previous = this.detach_location(state, location.path());
            if let Ok(unit) = &result {
                this.install(state, unit.clone());
            }
            previous
        });

        match &result {
            Ok(unit) => info!(name = %unit.name(), kind = %unit.kind(), path = %location, "handler reloaded"),
            Err(e) => warn!(
                path = %location,
                previous = previous.as_ref().map(HandlerUnit::name),
                error = %e,
                "failed to reload handler, previous version unregistered"
            ),
        }
        if location.kind() == HandlerKind::Event {
            self.log_distribution();
        }
        result
    }

    /// Unregister the unit loaded from `location`. No-op for unknown
    /// locations.
    pub fn remove(&self, location: &SourceLocator) -> Option<HandlerUnit> {
        let removed = self.state_changed(|this, state| this.detach_location(state, location.path()));

        match &removed {
            Some(unit) => {
                info!(name = %unit.name(), kind = %unit.kind(), path = %location, "handler removed");
                if unit.kind() == HandlerKind::Event {
                    self.log_distribution();
                }
            }
            None => debug!(path = %location, "remove for untracked location ignored"),
        }
        removed
    }

    /// Look up a unit by name, or by alias with one hop of indirection.
    pub fn resolve(&self, name_or_alias: &str, kind: HandlerKind) -> Option<HandlerUnit> {
        self.state.read().table(kind).resolve(name_or_alias).cloned()
    }

    /// Whether a live unit was loaded from `path`.
    pub fn is_tracked(&self, path: &Path) -> bool {
        self.state.read().locations.contains_key(path)
    }

    /// Every location a live unit was loaded from.
    pub fn tracked_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.state.read().locations.keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Live units of `kind`, sorted by name.
    pub fn units(&self, kind: HandlerKind) -> Vec<HandlerUnit> {
        let state = self.state.read();
        let mut units: Vec<HandlerUnit> = state
            .table(kind)
            .units
            .values()
            .map(|e| e.unit.clone())
            .collect();
        units.sort_by(|a, b| a.name().cmp(b.name()));
        units
    }

    pub fn counts(&self) -> RegistryCounts {
        let state = self.state.read();
        let categories: BTreeSet<&str> = state
            .commands
            .units
            .values()
            .filter_map(|e| e.unit.category())
            .collect();
        RegistryCounts {
            commands: state.commands.units.len(),
            events: state.events.units.len(),
            categories: categories.len(),
        }
    }

    /// Listener count on the hub for every registered event name.
    pub fn distribution(&self) -> BTreeMap<String, usize> {
        let names: Vec<String> = self.state.read().events.units.keys().cloned().collect();
        let hub = self.ctx.hub();
        names
            .into_iter()
            .map(|name| {
                let count = hub.listener_count(&name);
                (name, count)
            })
            .collect()
    }

    /// Detach every listener and drop every unit.
    pub fn shutdown(&self) {
        let mut state = self.state.write();
        let detached = state.events.units.len();
        self.detach_all(&mut state);
        drop(state);
        self.ctx.set_counts(0, 0);
        info!(detached, "registry shut down");
    }

    fn state_changed<T>(&self, f: impl FnOnce(&Self, &mut RegistryState) -> T) -> T {
        let out = {
            let mut state = self.state.write();
            f(self, &mut state)
        };
        self.publish_counts();
        out
    }

    fn publish_counts(&self) -> RegistryCounts {
        let counts = self.counts();
        self.ctx.set_counts(counts.commands, counts.events);
        counts
    }

    fn log_distribution(&self) {
        let distribution = self.distribution();
        debug!(?distribution, "event listener distribution");
    }

    /// Register `unit`, replacing whatever occupied its location or name.
    fn install(&self, state: &mut RegistryState, unit: HandlerUnit) {
        let kind = unit.kind();
        let name = unit.name().to_string();
        let path = unit.source().path().to_path_buf();

        self.detach_location(state, &path);

        let displaced = state.table(kind).units.get(&name).map(|e| e.unit.source().path().to_path_buf());
        if let Some(old_path) = displaced {
            warn!(
                %name,
                %kind,
                old = %old_path.display(),
                new = %path.display(),
                "name already registered from another location, replacing"
            );
            self.detach_location(state, &old_path);
        }

        let table = state.table_mut(kind);

        if let Some(target) = table.aliases.remove(&name) {
            warn!(%name, %kind, alias_of = %target, "name shadows an existing alias, alias dropped");
        }

        for alias in unit.aliases() {
            if let Some(owner) = table.aliases.get(alias) {
                warn!(%name, %alias, owner = %owner, "alias already bound, keeping existing binding");
                continue;
            }
            if table.units.contains_key(alias) {
                warn!(%name, %alias, "alias collides with a registered name, skipped");
                continue;
            }
            table.aliases.insert(alias.clone(), name.clone());
        }

        let listener = (kind == HandlerKind::Event).then(|| self.bind_listener(&unit));
        table.units.insert(name.clone(), Entry { unit, listener });
        state.locations.insert(path, (kind, name));
    }

    /// Remove the unit bound to `path` together with its aliases and
    /// listener.
    fn detach_location(&self, state: &mut RegistryState, path: &Path) -> Option<HandlerUnit> {
        let (kind, name) = state.locations.remove(path)?;
        let table = state.table_mut(kind);
        let entry = table.units.remove(&name)?;
        table.aliases.retain(|_, target| *target != name);
        if let Some(id) = entry.listener {
            self.ctx.hub().off(&name, id);
        }
        Some(entry.unit)
    }

    fn detach_all(&self, state: &mut RegistryState) {
        let hub = self.ctx.hub();
        for (name, entry) in state.events.units.drain() {
            if let Some(id) = entry.listener {
                hub.off(&name, id);
            }
        }
        *state = RegistryState::default();
    }

    fn bind_listener(&self, unit: &HandlerUnit) -> ListenerId {
        let ctx: Weak<HostContext> = Arc::downgrade(&self.ctx);
        let bound = unit.clone();
        let listener: Listener = Arc::new(move |args: &[Value]| {
            let Some(ctx) = ctx.upgrade() else {
                return;
            };
            if let Err(e) = bound.execute(&ctx, args) {
                warn!(event = %bound.name(), error = %e, "event handler failed");
                ctx.hub().report_failure(HandlerFailure {
                    handler: bound.name().to_string(),
                    error: e.to_string(),
                });
            }
        });

        let hub = self.ctx.hub();
        if unit.once() {
            hub.once(unit.name(), listener)
        } else {
            hub.on(unit.name(), listener)
        }
    }
}
