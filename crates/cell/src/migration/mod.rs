mod coordinator;
mod snapshot;

pub use coordinator::{MigrationCoordinator, OutgoingMigration, RejectReason, StagedEntity};
pub use snapshot::EntitySnapshot;
