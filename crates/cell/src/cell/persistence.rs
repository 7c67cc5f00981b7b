use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::types::EntityId;

/// Storage for entity state. Writes must not block the tick; slow backends hand the work to
/// a pool and report back through the cell's callback queue.
pub trait Persistence {
    fn write_backup_data(&mut self, entity: EntityId, data: Vec<u8>);
    fn write_archive_data(&mut self, entity: EntityId, data: Vec<u8>);
}

#[derive(Debug, Default)]
pub struct NullPersistence;

impl Persistence for NullPersistence {
    fn write_backup_data(&mut self, _entity: EntityId, _data: Vec<u8>) {}
    fn write_archive_data(&mut self, _entity: EntityId, _data: Vec<u8>) {}
}

#[derive(Debug, Default)]
pub struct StoredData {
    pub backups: HashMap<EntityId, Vec<u8>>,
    pub archives: HashMap<EntityId, Vec<u8>>,
}

/// Keeps the latest backup and archive per entity in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryPersistence {
    data: Arc<Mutex<StoredData>>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn data(&self) -> Arc<Mutex<StoredData>> {
        Arc::clone(&self.data)
    }
}

impl Persistence for MemoryPersistence {
    fn write_backup_data(&mut self, entity: EntityId, data: Vec<u8>) {
        if let Ok(mut stored) = self.data.lock() {
            stored.backups.insert(entity, data);
        }
    }

    fn write_archive_data(&mut self, entity: EntityId, data: Vec<u8>) {
        if let Ok(mut stored) = self.data.lock() {
            stored.backups.remove(&entity);
            stored.archives.insert(entity, data);
        }
    }
}
