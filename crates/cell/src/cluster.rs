use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::sync::Arc;

use glam::Vec3;

use crate::cell::{CellApp, Persistence};
use crate::config::CellConfig;
use crate::entity::{EntityDefs, PropertyValue};
use crate::error::CellError;
use crate::net::{BusStats, ClusterDirectory, Directory, LinkConditions, LocalBus};
use crate::script::ScriptRuntime;
use crate::types::{Direction3D, EntityId, EntityTypeId, ProcessId, PropertyId, SpaceId};
use crate::witness::WitnessSink;

/// Several cell processes stepped in lockstep on one thread, joined by a [`LocalBus`].
///
/// Envelopes a cell sends during tick `n` are delivered to the receiving cell's inbox at the
/// start of tick `n + 1` or later, depending on the link.
pub struct Cluster {
    config: CellConfig,
    defs: Arc<EntityDefs>,
    directory: Arc<ClusterDirectory>,
    cells: BTreeMap<ProcessId, CellApp>,
    bus: LocalBus,
    tick: u64,
    next_entity_id: EntityId,
}

impl Cluster {
    pub fn new(config: CellConfig, defs: EntityDefs) -> Self {
        Self {
            config,
            defs: Arc::new(defs),
            directory: Arc::new(ClusterDirectory::new()),
            cells: BTreeMap::new(),
            bus: LocalBus::new(),
            tick: 0,
            next_entity_id: 1,
        }
    }

    /// Replaces the bus with one whose link randomness starts from `seed`.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.bus = LocalBus::with_seed(seed);
        self
    }

    pub fn config(&self) -> &CellConfig {
        &self.config
    }

    pub fn defs(&self) -> &EntityDefs {
        &self.defs
    }

    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    pub fn directory(&self) -> Arc<ClusterDirectory> {
        Arc::clone(&self.directory)
    }

    pub fn add_cell(&mut self, id: ProcessId) -> &mut CellApp {
        let cell = self.build_cell(id);
        self.insert_cell(cell)
    }

    pub fn add_cell_with(
        &mut self,
        id: ProcessId,
        script: Box<dyn ScriptRuntime>,
        sink: Box<dyn WitnessSink>,
        persistence: Box<dyn Persistence>,
    ) -> &mut CellApp {
        let cell = self
            .build_cell(id)
            .with_script(script)
            .with_sink(sink)
            .with_persistence(persistence);
        self.insert_cell(cell)
    }

    fn build_cell(&self, id: ProcessId) -> CellApp {
        let directory: Arc<dyn Directory> = self.directory.clone();
        CellApp::new(id, self.config.clone(), Arc::clone(&self.defs), directory)
    }

    fn insert_cell(&mut self, cell: CellApp) -> &mut CellApp {
        let id = cell.id();
        self.directory.register(id);
        log::info!("process {} joined the cluster", id);
        match self.cells.entry(id) {
            Entry::Occupied(mut slot) => {
                log::warn!("process {} replaced", id);
                slot.insert(cell);
                slot.into_mut()
            }
            Entry::Vacant(slot) => slot.insert(cell),
        }
    }

    /// Takes a process out of the cluster. Its entities vanish with it; peers notice through
    /// the directory.
    pub fn remove_cell(&mut self, id: ProcessId) -> Option<CellApp> {
        self.directory.deregister(id);
        let cell = self.cells.remove(&id);
        if cell.is_some() {
            log::info!("process {} left the cluster", id);
        }
        cell
    }

    pub fn cell(&self, id: ProcessId) -> Option<&CellApp> {
        self.cells.get(&id)
    }

    pub fn cell_mut(&mut self, id: ProcessId) -> Option<&mut CellApp> {
        self.cells.get_mut(&id)
    }

    pub fn cells(&self) -> impl Iterator<Item = &CellApp> {
        self.cells.values()
    }

    pub fn process_ids(&self) -> Vec<ProcessId> {
        self.cells.keys().copied().collect()
    }

    pub fn allocate_entity_id(&mut self) -> EntityId {
        let id = self.next_entity_id;
        self.next_entity_id += 1;
        id
    }

    /// Creates a real entity on `process` under a freshly allocated id.
    pub fn create_entity(
        &mut self,
        process: ProcessId,
        type_id: EntityTypeId,
        space: SpaceId,
        position: Vec3,
        direction: Direction3D,
        properties: Vec<(PropertyId, PropertyValue)>,
    ) -> Result<EntityId, CellError> {
        let id = self.allocate_entity_id();
        self.cells
            .get_mut(&process)
            .ok_or(CellError::ProcessGone { process })?
            .create_entity(id, type_id, space, position, direction, properties)
    }

    pub fn set_link(&mut self, from: ProcessId, to: ProcessId, conditions: LinkConditions) {
        self.bus.set_link(from, to, conditions);
    }

    /// Applies the same conditions in both directions.
    pub fn set_link_both(&mut self, a: ProcessId, b: ProcessId, conditions: LinkConditions) {
        self.bus.set_link(a, b, conditions.clone());
        self.bus.set_link(b, a, conditions);
    }

    /// Delivers due envelopes, steps every cell once and puts their output on the bus.
    pub fn tick(&mut self) {
        for envelope in self.bus.take_due(self.tick) {
            match self.cells.get_mut(&envelope.to) {
                Some(cell) => cell.enqueue(envelope),
                None => log::debug!(
                    "dropping {} for departed process {}",
                    envelope.message.name(),
                    envelope.to
                ),
            }
        }
        for cell in self.cells.values_mut() {
            cell.tick();
        }
        for cell in self.cells.values_mut() {
            for envelope in cell.drain_outbox() {
                if let Err(err) = self.bus.send(envelope, self.tick) {
                    log::error!("envelope from process {} lost: {}", cell.id(), err);
                }
            }
        }
        self.tick += 1;
    }

    pub fn run(&mut self, ticks: u32) {
        for _ in 0..ticks {
            self.tick();
        }
    }

    /// Ticks until `done` holds or `limit` ticks have passed. Returns whether it held.
    pub fn run_until(&mut self, limit: u32, mut done: impl FnMut(&Cluster) -> bool) -> bool {
        for _ in 0..limit {
            if done(self) {
                return true;
            }
            self.tick();
        }
        done(self)
    }

    /// Every process currently holding a real copy of `entity`.
    pub fn real_holders(&self, entity: EntityId) -> Vec<ProcessId> {
        self.cells
            .values()
            .filter(|cell| cell.arena().is_real(entity))
            .map(CellApp::id)
            .collect()
    }

    pub fn in_flight(&self) -> usize {
        self.bus.pending()
    }

    pub fn bus_stats(&self) -> &BusStats {
        self.bus.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityDef;

    fn cluster() -> Cluster {
        let defs = EntityDefs::new().with(EntityDef::new(1, "Avatar"));
        let mut cluster = Cluster::new(CellConfig::default(), defs);
        cluster.add_cell(1).create_space(1, "plane");
        cluster.add_cell(2).create_space(1, "plane");
        cluster
    }

    #[test]
    fn entity_ids_are_unique_across_processes() {
        let mut cluster = cluster();
        let a = cluster
            .create_entity(1, 1, 1, Vec3::ZERO, Direction3D::default(), Vec::new())
            .unwrap();
        let b = cluster
            .create_entity(2, 1, 1, Vec3::ZERO, Direction3D::default(), Vec::new())
            .unwrap();
        assert_ne!(a, b);
        assert_eq!(cluster.real_holders(a), vec![1]);
        assert_eq!(cluster.real_holders(b), vec![2]);
    }

    #[test]
    fn unknown_process_is_reported() {
        let mut cluster = cluster();
        let err = cluster
            .create_entity(9, 1, 1, Vec3::ZERO, Direction3D::default(), Vec::new())
            .unwrap_err();
        assert!(matches!(err, CellError::ProcessGone { process: 9 }));
    }

    #[test]
    fn removed_process_is_dead_in_the_directory() {
        let mut cluster = cluster();
        assert!(cluster.directory().is_alive(2));
        assert!(cluster.remove_cell(2).is_some());
        assert!(!cluster.directory().is_alive(2));
        cluster.run(3);
        assert_eq!(cluster.tick_count(), 3);
        assert_eq!(cluster.cell(1).unwrap().tick_count(), 3);
    }
}
