use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use anyhow::{Context, Result};
use glam::Vec3;
use tokio::runtime::Handle;

use cellmesh::net::{BusStats, XorShift};
use cellmesh::{
    CallOutcome, Caller, CellSummary, Cluster, ClusterLoop, Direction3D, EntityId, NeighborCell,
    ProcessId, PropertyValue, SpaceId,
};

use crate::config::ServerConfig;
use crate::events::ServerEvent;
use crate::persistence::{FilePersistence, WriteStats};
use crate::simulation::{
    Ack, AckingSink, IdleQueue, METHOD_GREET, NPC_TRAP_RANGE, NPC_TYPE, OBSERVER_TYPE,
    PROP_HOME, PROP_NAME, SinkState, WandererScript, entity_defs,
};

pub const WORLD_SPACE: SpaceId = 1;

#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub uptime_secs: u64,
    pub tick: u64,
    pub tick_rate: u32,
    pub cells: Vec<CellSummary>,
    pub bus: BusStats,
    pub in_flight: usize,
    pub aoi_packets: u64,
    pub aoi_bytes: u64,
    pub migrations_committed: u64,
    pub migrations_rolled_back: u64,
    pub backups_stored: u64,
    pub backups_failed: u64,
}

/// Runs the demo world: one cell per strip of a shared space, wanderers crossing between
/// them and a few observers watching.
pub struct DemoServer {
    driver: ClusterLoop,
    config: ServerConfig,
    idle: IdleQueue,
    sinks: BTreeMap<ProcessId, Arc<Mutex<SinkState>>>,
    write_stats: Arc<WriteStats>,
    rng: XorShift,
    last_tick_time: Instant,
    running: Arc<AtomicBool>,
    start_time: Instant,
    pending_events: VecDeque<ServerEvent>,
}

impl DemoServer {
    pub fn new(config: ServerConfig, runtime: Handle) -> Result<Self> {
        std::fs::create_dir_all(&config.backup_dir).with_context(|| {
            format!("creating backup directory {}", config.backup_dir.display())
        })?;

        let idle = IdleQueue::default();
        let write_stats = Arc::new(WriteStats::default());
        let mut sinks = BTreeMap::new();
        let mut cluster = Cluster::new(config.cell.clone(), entity_defs()).with_seed(config.seed);

        for process in 1..=config.cells {
            let script = WandererScript::new(process, config.clone(), Arc::clone(&idle));
            let sink = AckingSink::new();
            sinks.insert(process, sink.state());
            let persistence = FilePersistence::new(
                runtime.clone(),
                &config.backup_dir,
                config.max_pending_writes,
                Arc::clone(&write_stats),
            );
            let link = persistence.cell_link();
            let cell = cluster.add_cell_with(
                process,
                Box::new(script),
                Box::new(sink),
                Box::new(persistence),
            );
            cell.create_space(WORLD_SPACE, "strips");
            if !link.attach(process, cell.callback_sender()) {
                anyhow::bail!("persistence for process {} was linked twice", process);
            }
            for other in (1..=config.cells).filter(|other| *other != process) {
                let (min, max) = config.strip_bounds(other);
                cell.add_neighbor(WORLD_SPACE, NeighborCell::new(other, min, max))?;
            }
        }
        for a in 1..=config.cells {
            for b in (1..=config.cells).filter(|b| *b != a) {
                cluster.set_link(a, b, config.link.clone());
            }
        }

        let mut server = Self {
            driver: ClusterLoop::new(cluster),
            rng: XorShift::new(config.seed),
            config,
            idle,
            sinks,
            write_stats,
            last_tick_time: Instant::now(),
            running: Arc::new(AtomicBool::new(true)),
            start_time: Instant::now(),
            pending_events: VecDeque::new(),
        };
        server.populate()?;
        Ok(server)
    }

    fn populate(&mut self) -> Result<()> {
        for process in 1..=self.config.cells {
            for n in 0..self.config.npcs_per_cell {
                let position = self.random_point_in(process);
                let direction = Direction3D::from_yaw(self.random_unit() * std::f32::consts::TAU);
                let properties = vec![
                    (PROP_NAME, PropertyValue::Str(format!("wanderer-{}-{}", process, n))),
                    (PROP_HOME, PropertyValue::Int(process as i64)),
                ];
                let cluster = self.driver.cluster_mut();
                let id = cluster.create_entity(
                    process,
                    NPC_TYPE,
                    WORLD_SPACE,
                    position,
                    direction,
                    properties,
                )?;
                if let Some(cell) = cluster.cell_mut(process) {
                    cell.add_proximity(id, NPC_TRAP_RANGE, NPC_TRAP_RANGE, 0)?;
                }
            }
            for n in 0..self.config.observers_per_cell {
                let position = self.random_point_in(process);
                let properties = vec![(
                    PROP_NAME,
                    PropertyValue::Str(format!("observer-{}-{}", process, n)),
                )];
                let cluster = self.driver.cluster_mut();
                let id = cluster.create_entity(
                    process,
                    OBSERVER_TYPE,
                    WORLD_SPACE,
                    position,
                    Direction3D::default(),
                    properties,
                )?;
                if let Some(cell) = cluster.cell_mut(process) {
                    cell.attach_witness(id)?;
                    cell.set_controlled_by(id, None)?;
                }
            }
        }
        log::info!(
            "populated {} cells with {} wanderers and {} observers each",
            self.config.cells,
            self.config.npcs_per_cell,
            self.config.observers_per_cell
        );
        Ok(())
    }

    pub fn running(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = ServerEvent> + '_ {
        self.pending_events.drain(..)
    }

    /// Forgets the time spent paused so the clock does not try to catch up on it.
    pub fn skip_elapsed(&mut self) {
        self.last_tick_time = Instant::now();
    }

    pub fn tick_once(&mut self) {
        let now = Instant::now();
        let delta = now - self.last_tick_time;
        self.last_tick_time = now;

        let before = self.driver.cluster().tick_count();
        if self.driver.update(delta.as_secs_f32()) == 0 {
            return;
        }
        let after = self.driver.cluster().tick_count();

        self.collect_events();
        self.deliver_acks();
        self.assign_destinations();

        let interval = self.config.teleport_interval_ticks as u64;
        if interval > 0 && (before..after).any(|tick| tick > 0 && tick % interval == 0) {
            self.teleport_random_wanderer();
            self.greet_from_random_observer();
        }
    }

    fn collect_events(&mut self) {
        for process in self.driver.cluster().process_ids() {
            let Some(cell) = self.driver.cluster_mut().cell_mut(process) else {
                continue;
            };
            for event in cell.drain_events() {
                if let Some(event) = ServerEvent::from_cell(process, &event) {
                    self.pending_events.push_back(event);
                }
            }
        }
    }

    fn deliver_acks(&mut self) {
        for (process, state) in &self.sinks {
            let acks = match state.lock() {
                Ok(mut state) => std::mem::take(&mut state.acks),
                Err(_) => continue,
            };
            let Some(cell) = self.driver.cluster_mut().cell_mut(*process) else {
                continue;
            };
            for ack in acks {
                let result = match ack {
                    Ack::Enter { observer, entity } => cell.ack_enter(observer, entity).map(|_| ()),
                    Ack::Leave { observer, entity } => cell.ack_leave(observer, entity),
                };
                if let Err(err) = result {
                    log::debug!("ack on process {} not applied: {}", process, err);
                }
            }
        }
    }

    fn assign_destinations(&mut self) {
        let idle = match self.idle.lock() {
            Ok(mut idle) => std::mem::take(&mut *idle),
            Err(_) => return,
        };
        for (process, entity) in idle {
            let Some(type_id) = self
                .driver
                .cluster()
                .cell(process)
                .and_then(|cell| cell.arena().get_real(entity))
                .map(|e| e.type_id)
            else {
                continue;
            };
            let destination = if type_id == NPC_TYPE {
                self.random_point_anywhere()
            } else {
                self.random_point_in(process)
            };
            let speed = self.config.npc_speed;
            let Some(cell) = self.driver.cluster_mut().cell_mut(process) else {
                continue;
            };
            if let Err(err) = cell.move_to_point(entity, destination, speed, 0.5, true, false, 0) {
                log::debug!("entity {} not sent on: {}", entity, err);
            }
        }
    }

    fn teleport_random_wanderer(&mut self) {
        if self.config.cells < 2 {
            return;
        }
        let source = 1 + self.rng.below(self.config.cells);
        let Some(entity) = self.pick_wanderer(source) else {
            return;
        };
        let mut target = 1 + self.rng.below(self.config.cells - 1);
        if target >= source {
            target += 1;
        }
        let position = self.random_point_in(target);
        let direction = Direction3D::from_yaw(self.random_unit() * std::f32::consts::TAU);
        let Some(cell) = self.driver.cluster_mut().cell_mut(source) else {
            return;
        };
        match cell.teleport(entity, target, WORLD_SPACE, position, direction) {
            Ok(()) => log::debug!("teleporting entity {} from {} to {}", entity, source, target),
            Err(err) => self.pending_events.push_back(ServerEvent::Error {
                message: format!("teleport of entity {} refused: {}", entity, err),
            }),
        }
    }

    /// Calls the exposed greet method on something an observer can see, which may be a ghost
    /// whose real lives on another cell.
    fn greet_from_random_observer(&mut self) {
        let process = 1 + self.rng.below(self.config.cells.max(1));
        let Some(cell) = self.driver.cluster().cell(process) else {
            return;
        };
        let observers: Vec<EntityId> = cell
            .arena()
            .entities()
            .filter(|e| e.is_real() && e.has_witness())
            .map(|e| e.id)
            .collect();
        if observers.is_empty() {
            return;
        }
        let observer = observers[self.rng.below(observers.len() as u32) as usize];
        let visible = cell.entities_in_aoi(observer).unwrap_or_default();
        let targets: Vec<EntityId> = visible
            .into_iter()
            .filter(|id| cell.arena().get(*id).is_some_and(|e| e.type_id == NPC_TYPE))
            .collect();
        if targets.is_empty() {
            return;
        }
        let target = targets[self.rng.below(targets.len() as u32) as usize];
        let Some(cell) = self.driver.cluster_mut().cell_mut(process) else {
            return;
        };
        match cell.call_method(target, METHOD_GREET, Caller::client(observer), Vec::new()) {
            Ok(CallOutcome::Completed(result)) => {
                log::debug!("observer {} greeted {}: {:?}", observer, target, result)
            }
            Ok(CallOutcome::Forwarded(call)) => {
                log::debug!("greeting {} forwarded as call {}", target, call)
            }
            Err(err) => log::warn!("greeting {} failed: {}", target, err),
        }
    }

    fn pick_wanderer(&mut self, process: ProcessId) -> Option<EntityId> {
        let candidates: Vec<EntityId> = self
            .driver
            .cluster()
            .cell(process)?
            .arena()
            .entities()
            .filter(|e| e.is_real() && !e.is_migrating() && e.type_id == NPC_TYPE)
            .map(|e| e.id)
            .collect();
        if candidates.is_empty() {
            return None;
        }
        Some(candidates[self.rng.below(candidates.len() as u32) as usize])
    }

    fn random_unit(&mut self) -> f32 {
        self.rng.percent() / 100.0
    }

    fn random_point_in(&mut self, process: ProcessId) -> Vec3 {
        let (min, max) = self.config.strip_bounds(process);
        let x = min[0] + self.random_unit() * (max[0] - min[0]);
        let z = min[1] + self.random_unit() * (max[1] - min[1]);
        Vec3::new(x, 0.0, z)
    }

    fn random_point_anywhere(&mut self) -> Vec3 {
        let width = self.config.strip_width * self.config.cells as f32;
        let x = self.random_unit() * width;
        let z = self.random_unit() * self.config.depth;
        Vec3::new(x, 0.0, z)
    }

    pub fn shutdown(&mut self) {
        let cluster = self.driver.cluster_mut();
        for process in cluster.process_ids() {
            if let Some(cell) = cluster.cell_mut(process) {
                cell.begin_shutdown();
            }
        }
        log::info!(
            "stopped after {} ticks",
            self.driver.cluster().tick_count()
        );
    }

    pub fn stats(&self) -> ServerStats {
        let cluster = self.driver.cluster();
        let mut stats = ServerStats {
            uptime_secs: self.start_time.elapsed().as_secs(),
            tick: cluster.tick_count(),
            tick_rate: self.driver.clock().tick_rate(),
            bus: cluster.bus_stats().clone(),
            in_flight: cluster.in_flight(),
            backups_stored: self.write_stats.stored.load(Ordering::Relaxed),
            backups_failed: self.write_stats.failed.load(Ordering::Relaxed),
            ..ServerStats::default()
        };
        for cell in cluster.cells() {
            stats.cells.push(cell.summary());
            stats.migrations_committed += cell.stats().migrations_committed;
            stats.migrations_rolled_back += cell.stats().migrations_rolled_back;
        }
        for state in self.sinks.values() {
            if let Ok(state) = state.lock() {
                stats.aoi_packets += state.packets;
                stats.aoi_bytes += state.bytes;
            }
        }
        stats
    }
}
