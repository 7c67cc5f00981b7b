mod aoi;
mod callback;
mod controllers;
mod dispatch;
mod entities;
mod ghosting;
mod host;
mod persistence;
mod teleport;

use std::collections::VecDeque;
use std::sync::Arc;

use crate::config::CellConfig;
use crate::entity::{EntityArena, EntityDefs, PropertyValue};
use crate::ghost::GhostRouter;
use crate::migration::MigrationCoordinator;
use crate::net::{CellMessage, Directory, Envelope};
use crate::script::{Hook, NullRuntime, ScriptEffects, ScriptRuntime};
use crate::space::Spaces;
use crate::types::{CallId, EntityId, ProcessId, SpaceId};
use crate::witness::{NullSink, WitnessSink};

pub use callback::{CallbackQueue, CallbackSender, CellCallback};
pub use dispatch::CallOutcome;
pub use persistence::{MemoryPersistence, NullPersistence, Persistence, StoredData};

#[derive(Debug, Clone, PartialEq)]
pub enum CellEvent {
    EntityCreated {
        entity: EntityId,
    },
    EntityDestroyed {
        entity: EntityId,
    },
    GhostCreated {
        entity: EntityId,
        owner: ProcessId,
    },
    GhostDestroyed {
        entity: EntityId,
    },
    MigrationStarted {
        entity: EntityId,
        target: ProcessId,
    },
    MigratedOut {
        entity: EntityId,
        target: ProcessId,
    },
    MigratedIn {
        entity: EntityId,
        source: ProcessId,
    },
    TeleportFailed {
        entity: EntityId,
        reason: String,
    },
    CallReply {
        call: CallId,
        result: Result<Vec<PropertyValue>, String>,
    },
    SpaceDestroyed {
        space: SpaceId,
    },
    BackupWritten {
        entity: EntityId,
    },
}

#[derive(Debug, Clone, Default)]
pub struct CellStats {
    pub ticks: u64,
    pub messages_in: u64,
    pub messages_out: u64,
    pub hooks_invoked: u64,
    pub aoi_packets: u64,
    pub migrations_committed: u64,
    pub migrations_rolled_back: u64,
}

/// Point-in-time counts for dashboards.
#[derive(Debug, Clone, Default)]
pub struct CellSummary {
    pub process: ProcessId,
    pub tick: u64,
    pub spaces: usize,
    pub reals: usize,
    pub ghosts: usize,
    pub migrating: usize,
    pub staged: usize,
    pub routes: usize,
    pub observers: usize,
}

/// One cell process: every entity it holds, the spaces it hosts and the protocols that keep
/// it consistent with the rest of the cluster.
pub struct CellApp {
    id: ProcessId,
    config: CellConfig,
    defs: Arc<EntityDefs>,
    tick: u64,
    arena: EntityArena,
    spaces: Spaces,
    router: GhostRouter,
    migration: MigrationCoordinator,
    directory: Arc<dyn Directory>,
    script: Box<dyn ScriptRuntime>,
    sink: Box<dyn WitnessSink>,
    persistence: Box<dyn Persistence>,
    callbacks: CallbackQueue,
    inbox: VecDeque<Envelope>,
    outbox: Vec<Envelope>,
    events: Vec<CellEvent>,
    next_call: CallId,
    shutting_down: bool,
    stats: CellStats,
}

impl CellApp {
    pub fn new(
        id: ProcessId,
        config: CellConfig,
        defs: Arc<EntityDefs>,
        directory: Arc<dyn Directory>,
    ) -> Self {
        Self {
            id,
            router: GhostRouter::new(config.ghost.migrated_route_ttl_ticks),
            migration: MigrationCoordinator::new(config.migration.ack_timeout_ticks),
            config,
            defs,
            tick: 0,
            arena: EntityArena::new(),
            spaces: Spaces::new(),
            directory,
            script: Box::new(NullRuntime),
            sink: Box::new(NullSink),
            persistence: Box::new(NullPersistence),
            callbacks: CallbackQueue::new(),
            inbox: VecDeque::new(),
            outbox: Vec::new(),
            events: Vec::new(),
            next_call: 1,
            shutting_down: false,
            stats: CellStats::default(),
        }
    }

    pub fn with_script(mut self, script: Box<dyn ScriptRuntime>) -> Self {
        self.script = script;
        self
    }

    pub fn with_sink(mut self, sink: Box<dyn WitnessSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_persistence(mut self, persistence: Box<dyn Persistence>) -> Self {
        self.persistence = persistence;
        self
    }

    pub fn id(&self) -> ProcessId {
        self.id
    }

    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    pub fn config(&self) -> &CellConfig {
        &self.config
    }

    pub fn defs(&self) -> &EntityDefs {
        &self.defs
    }

    pub fn arena(&self) -> &EntityArena {
        &self.arena
    }

    pub fn spaces(&self) -> &Spaces {
        &self.spaces
    }

    pub fn router(&self) -> &GhostRouter {
        &self.router
    }

    pub fn migration(&self) -> &MigrationCoordinator {
        &self.migration
    }

    pub fn stats(&self) -> &CellStats {
        &self.stats
    }

    pub fn callback_sender(&self) -> CallbackSender {
        self.callbacks.sender()
    }

    /// Rejects incoming migrations from now on.
    pub fn begin_shutdown(&mut self) {
        self.shutting_down = true;
    }

    pub fn summary(&self) -> CellSummary {
        CellSummary {
            process: self.id,
            tick: self.tick,
            spaces: self.spaces.len(),
            reals: self.arena.real_count(),
            ghosts: self.arena.ghost_count(),
            migrating: self.migration.outgoing_count(),
            staged: self.migration.staged_count(),
            routes: self.router.len(),
            observers: self.arena.entities().filter(|e| e.has_witness()).count(),
        }
    }

    pub fn enqueue(&mut self, envelope: Envelope) {
        self.inbox.push_back(envelope);
    }

    pub fn drain_outbox(&mut self) -> Vec<Envelope> {
        std::mem::take(&mut self.outbox)
    }

    pub fn drain_events(&mut self) -> Vec<CellEvent> {
        std::mem::take(&mut self.events)
    }

    pub(crate) fn send(&mut self, to: ProcessId, message: CellMessage) {
        self.stats.messages_out += 1;
        self.outbox.push(Envelope::new(self.id, to, message));
    }

    pub(crate) fn emit(&mut self, event: CellEvent) {
        self.events.push(event);
    }

    fn allocate_call(&mut self) -> CallId {
        let call = self.next_call;
        self.next_call += 1;
        call
    }

    /// Runs a hook on a real entity if its type implements it, then applies what the hook
    /// asked for.
    pub(crate) fn invoke_hook(&mut self, entity: EntityId, hook: Hook) {
        let Some(target) = self.arena.get(entity) else {
            return;
        };
        if !target.is_real() {
            return;
        }
        let implemented = self
            .defs
            .get(target.type_id)
            .is_some_and(|def| def.implements(hook.kind()));
        if !implemented {
            return;
        }
        self.stats.hooks_invoked += 1;
        let effects = self.script.invoke(target, &hook);
        self.apply_effects(entity, effects);
    }

    pub(crate) fn apply_effects(
        &mut self,
        entity: EntityId,
        effects: ScriptEffects,
    ) -> Option<Vec<PropertyValue>> {
        for (property, value) in effects.writes {
            if let Err(err) = self.set_property(entity, property, value) {
                log::warn!("script write on entity {} failed: {}", entity, err);
            }
        }
        for controller in effects.cancel_controllers {
            if let Err(err) = self.cancel_controller(entity, controller) {
                log::warn!("script cancel on entity {} failed: {}", entity, err);
            }
        }
        if effects.cancel_migration && !self.cancel_migration(entity) {
            log::debug!("entity {} had no migration to cancel", entity);
        }
        if let Some(request) = effects.teleport {
            if let Err(err) = self.teleport(
                entity,
                request.process,
                request.space,
                request.position,
                request.direction,
            ) {
                log::warn!("script teleport of entity {} failed: {}", entity, err);
            }
        }
        if effects.destroy {
            if let Err(err) = self.destroy_entity(entity) {
                log::warn!("script destroy of entity {} failed: {}", entity, err);
            }
        }
        effects.result
    }

    /// Runs one simulation step.
    pub fn tick(&mut self) {
        self.process_inbox();
        self.advance_timers();
        self.advance_controllers();
        self.evaluate_proximity();
        if self.tick % self.config.ghost.check_interval_ticks.max(1) as u64 == 0 {
            self.update_boundary_ghosts();
        }
        self.update_witnesses();
        self.send_ghost_deltas();
        self.check_migration_timeouts();
        self.collect_routes();
        self.run_callbacks();
        self.run_backup_cycle();
        self.end_tick();
    }

    fn process_inbox(&mut self) {
        while let Some(envelope) = self.inbox.pop_front() {
            self.receive(envelope);
        }
    }

    fn run_callbacks(&mut self) {
        for callback in self.callbacks.drain(self.config.max_callbacks_per_tick) {
            callback(self);
        }
    }

    fn advance_timers(&mut self) {
        for id in self.arena.real_ids() {
            let fired = match self.arena.get_mut(id) {
                Some(entity) if !entity.is_migrating() && !entity.timers.is_empty() => {
                    entity.timers.advance()
                }
                _ => continue,
            };
            for (timer, user_arg) in fired {
                self.invoke_hook(id, Hook::OnTimer { timer, user_arg });
            }
        }
    }

    fn check_migration_timeouts(&mut self) {
        for entity in self.migration.timed_out(self.tick) {
            self.rollback_timed_out(entity);
        }
        for entity in self.migration.expire_staged(self.tick) {
            log::warn!("staged copy of entity {} expired without commit", entity);
        }
    }

    fn collect_routes(&mut self) {
        for entity in self.router.expire(self.tick) {
            log::debug!("migrated route for entity {} expired", entity);
        }
        let dead = self.router.collect_garbage(self.directory.as_ref());
        for entity in dead {
            if self.arena.get(entity).is_some_and(|e| e.is_ghost()) {
                log::info!("dropping ghost {} whose owner is gone", entity);
                self.remove_ghost(entity);
            }
        }
        for id in self.arena.real_ids() {
            let directory = Arc::clone(&self.directory);
            if let Some(ghosts) = self.arena.get_mut(id).and_then(|e| e.ghosts_mut()) {
                ghosts.retain(|process| directory.is_alive(*process));
            }
        }
    }

    fn run_backup_cycle(&mut self) {
        let period = self.config.backup_period_ticks as u64;
        if period == 0 || self.tick % period != 0 {
            return;
        }
        for id in self.arena.real_ids() {
            let data = match self.arena.get(id) {
                Some(entity) if entity.dirty && entity.auto_backup && !entity.is_migrating() => {
                    crate::migration::EntitySnapshot::capture(entity).to_bytes()
                }
                _ => continue,
            };
            match data {
                Ok(data) => {
                    self.persistence.write_backup_data(id, data);
                    if let Some(entity) = self.arena.get_mut(id) {
                        entity.dirty = false;
                    }
                    self.emit(CellEvent::BackupWritten { entity: id });
                }
                Err(err) => log::error!("backup of entity {} failed: {}", id, err),
            }
        }
    }

    fn end_tick(&mut self) {
        for entity in self.arena.entities_mut() {
            entity.controllers.end_tick();
        }
        self.arena.end_tick();
        self.stats.ticks += 1;
        self.tick += 1;
    }
}
