pub mod cell;
pub mod cluster;
pub mod config;
pub mod controller;
pub mod coordinate;
pub mod entity;
pub mod error;
pub mod ghost;
pub mod migration;
pub mod net;
pub mod script;
pub mod simulation;
pub mod space;
pub mod types;
pub mod witness;

pub use cell::{
    CallOutcome, CallbackSender, CellApp, CellEvent, CellStats, CellSummary, MemoryPersistence,
    NullPersistence, Persistence, StoredData,
};
pub use cluster::Cluster;
pub use config::{AoiConfig, CellConfig, CoordinateConfig, GhostConfig, MigrationConfig};
pub use controller::{ControllerRegistry, MotionKind};
pub use coordinate::CoordinateIndex;
pub use entity::{Entity, EntityArena, EntityDef, EntityDefs, PropertyFlags, PropertyValue};
pub use error::{CellError, CodecError};
pub use ghost::GhostRouter;
pub use migration::{EntitySnapshot, MigrationCoordinator, RejectReason};
pub use net::{CellMessage, ClusterDirectory, Directory, Envelope, LinkConditions, LocalBus};
pub use script::{Caller, Hook, HookKind, RecordingRuntime, ScriptEffects, ScriptRuntime};
pub use simulation::{ClusterLoop, TickClock};
pub use space::{NeighborCell, Space};
pub use types::{Direction3D, EntityId, ProcessId, SpaceId};
pub use witness::{AoiEvent, AoiPacket, RecordingSink, Witness, WitnessSink};
