use serde::{Deserialize, Serialize};

pub const DEFAULT_TICK_RATE: u32 = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AoiConfig {
    pub default_radius: f32,
    pub default_hysteresis: f32,
    /// Use 1-byte entity aliases while an observer sees at most 255 entities.
    pub alias_entity_ids: bool,
    /// Use 1-byte property aliases for types with at most 255 client properties.
    pub alias_property_ids: bool,
}

impl Default for AoiConfig {
    fn default() -> Self {
        Self {
            default_radius: 80.0,
            default_hysteresis: 5.0,
            alias_entity_ids: true,
            alias_property_ids: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GhostConfig {
    pub ghost_distance: f32,
    pub ghost_hysteresis: f32,
    /// Boundary ghosting is re-evaluated every this many ticks.
    pub check_interval_ticks: u32,
    pub migrated_route_ttl_ticks: u32,
}

impl Default for GhostConfig {
    fn default() -> Self {
        Self {
            ghost_distance: 500.0,
            ghost_hysteresis: 20.0,
            check_interval_ticks: 5,
            migrated_route_ttl_ticks: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    pub ack_timeout_ticks: u32,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            ack_timeout_ticks: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinateConfig {
    pub cell_size: f32,
    pub has_y: bool,
}

impl Default for CoordinateConfig {
    fn default() -> Self {
        Self {
            cell_size: 50.0,
            has_y: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CellConfig {
    pub tick_rate: u32,
    pub aoi: AoiConfig,
    pub ghost: GhostConfig,
    pub migration: MigrationConfig,
    pub coordinate: CoordinateConfig,
    /// Dirty entities are written to persistence every this many ticks; 0 disables the cycle.
    pub backup_period_ticks: u32,
    pub max_callbacks_per_tick: usize,
}

impl Default for CellConfig {
    fn default() -> Self {
        Self {
            tick_rate: DEFAULT_TICK_RATE,
            aoi: AoiConfig::default(),
            ghost: GhostConfig::default(),
            migration: MigrationConfig::default(),
            coordinate: CoordinateConfig::default(),
            backup_period_ticks: 100,
            max_callbacks_per_tick: 256,
        }
    }
}

impl CellConfig {
    pub fn tick_dt(&self) -> f32 {
        1.0 / self.tick_rate.max(1) as f32
    }

    /// Converts a per-second rate into the amount applied each tick.
    pub fn per_tick(&self, per_second: f32) -> f32 {
        per_second / self.tick_rate.max(1) as f32
    }
}
