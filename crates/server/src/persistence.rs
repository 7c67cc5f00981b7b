use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use tokio::runtime::Handle;
use tokio::sync::Semaphore;

use cellmesh::{CallbackSender, CellApp, EntityId, Persistence, ProcessId};

/// Route from the write tasks back to the cell that owns the backend. Set once, after the
/// cell has been built.
#[derive(Clone, Default)]
pub struct CellLink(Arc<OnceLock<CallbackSender>>);

impl CellLink {
    /// Returns false, leaving the first link in place, when a cell was already attached.
    pub fn attach(&self, process: ProcessId, sender: CallbackSender) -> bool {
        if self.0.set(sender).is_err() {
            log::warn!("persistence for process {} is already linked to a cell", process);
            return false;
        }
        true
    }

    fn sender(&self) -> Option<&CallbackSender> {
        self.0.get()
    }
}

#[derive(Debug, Default)]
pub struct WriteStats {
    pub stored: AtomicU64,
    pub failed: AtomicU64,
}

/// Writes entity data to one file per entity on tokio's blocking pool. At most
/// `max_pending` writes run at once; each result is handed back to the owning cell.
pub struct FilePersistence {
    runtime: Handle,
    permits: Arc<Semaphore>,
    dir: PathBuf,
    cell: CellLink,
    stats: Arc<WriteStats>,
}

impl FilePersistence {
    pub fn new(runtime: Handle, dir: &Path, max_pending: usize, stats: Arc<WriteStats>) -> Self {
        Self {
            runtime,
            permits: Arc::new(Semaphore::new(max_pending.max(1))),
            dir: dir.to_path_buf(),
            cell: CellLink::default(),
            stats,
        }
    }

    /// Filled in once the cell that owns this backend exists.
    pub fn cell_link(&self) -> CellLink {
        self.cell.clone()
    }

    fn write(&self, entity: EntityId, path: PathBuf, data: Vec<u8>, retry_on_failure: bool) {
        let permits = Arc::clone(&self.permits);
        let cell = self.cell.clone();
        let stats = Arc::clone(&self.stats);
        self.runtime.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            let result = tokio::task::spawn_blocking(move || std::fs::write(&path, data)).await;
            let outcome = match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(err)) => Err(err.to_string()),
                Err(err) => Err(err.to_string()),
            };
            match &outcome {
                Ok(()) => stats.stored.fetch_add(1, Ordering::Relaxed),
                Err(_) => stats.failed.fetch_add(1, Ordering::Relaxed),
            };
            let Some(sender) = cell.sender() else {
                return;
            };
            sender.post(move |cell: &mut CellApp| match outcome {
                Ok(()) => log::trace!("entity {} stored by process {}", entity, cell.id()),
                Err(reason) => {
                    log::warn!("storing entity {} failed: {}", entity, reason);
                    if retry_on_failure && cell.mark_dirty(entity) {
                        log::debug!("entity {} queued for the next backup", entity);
                    }
                }
            });
        });
    }
}

impl Persistence for FilePersistence {
    fn write_backup_data(&mut self, entity: EntityId, data: Vec<u8>) {
        let path = self.dir.join(format!("{}.backup", entity));
        self.write(entity, path, data, true);
    }

    fn write_archive_data(&mut self, entity: EntityId, data: Vec<u8>) {
        let path = self.dir.join(format!("{}.archive", entity));
        self.write(entity, path, data, false);
    }
}
