use std::path::PathBuf;

use cellmesh::{CellConfig, LinkConditions};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub cell: CellConfig,
    pub cells: u32,
    /// Width along x of the strip each cell owns.
    pub strip_width: f32,
    /// Depth along z shared by every strip.
    pub depth: f32,
    pub npcs_per_cell: u32,
    pub observers_per_cell: u32,
    pub npc_speed: f32,
    /// A random NPC is teleported to another cell every this many ticks; 0 disables.
    pub teleport_interval_ticks: u32,
    pub link: LinkConditions,
    pub backup_dir: PathBuf,
    pub max_pending_writes: usize,
    pub seed: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            cell: CellConfig::default(),
            cells: 3,
            strip_width: 400.0,
            depth: 400.0,
            npcs_per_cell: 40,
            observers_per_cell: 2,
            npc_speed: 6.0,
            teleport_interval_ticks: 50,
            link: LinkConditions::default(),
            backup_dir: std::env::temp_dir().join("cellmesh-backups"),
            max_pending_writes: 8,
            seed: 0x5eed,
        }
    }
}

impl ServerConfig {
    pub fn strip_of(&self, x: f32) -> u32 {
        let strip = (x / self.strip_width).floor().max(0.0) as u32;
        strip.min(self.cells.saturating_sub(1))
    }

    /// Process ids are strip indices plus one.
    pub fn owner_of(&self, x: f32) -> u32 {
        self.strip_of(x) + 1
    }

    pub fn strip_bounds(&self, process: u32) -> ([f32; 2], [f32; 2]) {
        let min_x = (process.saturating_sub(1)) as f32 * self.strip_width;
        ([min_x, 0.0], [min_x + self.strip_width, self.depth])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_cover_the_world() {
        let config = ServerConfig::default();
        assert_eq!(config.owner_of(-5.0), 1);
        assert_eq!(config.owner_of(399.0), 1);
        assert_eq!(config.owner_of(400.0), 2);
        assert_eq!(config.owner_of(10_000.0), config.cells);
        assert_eq!(config.strip_bounds(2), ([400.0, 0.0], [800.0, 400.0]));
    }
}
