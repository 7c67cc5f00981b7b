use std::collections::BTreeSet;
use std::sync::RwLock;

use crate::types::ProcessId;

/// Cluster membership as seen by one process.
pub trait Directory: Send + Sync {
    fn is_alive(&self, process: ProcessId) -> bool;
}

/// In-process directory shared by every cell of a harness.
#[derive(Debug, Default)]
pub struct ClusterDirectory {
    alive: RwLock<BTreeSet<ProcessId>>,
}

impl ClusterDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, process: ProcessId) {
        if let Ok(mut alive) = self.alive.write() {
            alive.insert(process);
        }
    }

    pub fn deregister(&self, process: ProcessId) {
        if let Ok(mut alive) = self.alive.write() {
            alive.remove(&process);
        }
    }

    pub fn processes(&self) -> Vec<ProcessId> {
        self.alive
            .read()
            .map(|alive| alive.iter().copied().collect())
            .unwrap_or_default()
    }
}

impl Directory for ClusterDirectory {
    fn is_alive(&self, process: ProcessId) -> bool {
        self.alive
            .read()
            .map(|alive| alive.contains(&process))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_controls_liveness() {
        let directory = ClusterDirectory::new();
        assert!(!directory.is_alive(1));
        directory.register(1);
        directory.register(2);
        assert!(directory.is_alive(1));
        directory.deregister(1);
        assert_eq!(directory.processes(), vec![2]);
    }
}
