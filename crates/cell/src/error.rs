use rkyv::rancor;

use crate::migration::RejectReason;
use crate::types::{ControllerId, EntityId, EntityTypeId, MethodId, ProcessId, PropertyId, SpaceId};

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("serialization failed: {0}")]
    Serialize(rancor::Error),
    #[error("deserialization failed: {0}")]
    Deserialize(rancor::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum CellError {
    #[error("no route to the owner of entity {entity}")]
    RouteNotFound { entity: EntityId },
    #[error("process {process} is not reachable")]
    ProcessGone { process: ProcessId },
    #[error("migration of entity {entity} timed out waiting for process {target}")]
    MigrationTimeout { entity: EntityId, target: ProcessId },
    #[error("process {target} rejected migration of entity {entity}: {reason}")]
    MigrationTargetRejected {
        entity: EntityId,
        target: ProcessId,
        reason: RejectReason,
    },
    #[error("entity {entity} is already migrating")]
    MigrationInProgress { entity: EntityId },
    #[error("entity {entity} has no controller {controller}")]
    ControllerNotFound {
        entity: EntityId,
        controller: ControllerId,
    },
    #[error("observer {observer} acknowledged leave of {entity} which is still in its AOI")]
    AoiDesync { observer: EntityId, entity: EntityId },
    #[error("entity {0} not found")]
    EntityNotFound(EntityId),
    #[error("entity {0} is not real on this process")]
    NotReal(EntityId),
    #[error("space {0} not found")]
    SpaceNotFound(SpaceId),
    #[error("entity type {0} is not defined")]
    UnknownEntityType(EntityTypeId),
    #[error("method {method} of entity {entity} is not exposed")]
    MethodNotExposed { entity: EntityId, method: MethodId },
    #[error("entity {entity} has no method {method}")]
    UnknownMethod { entity: EntityId, method: MethodId },
    #[error("entity {entity} has no property {property}")]
    UnknownProperty {
        entity: EntityId,
        property: PropertyId,
    },
    #[error("invalid range xz={range_xz} y={range_y}")]
    InvalidRange { range_xz: f32, range_y: f32 },
    #[error("entity {0} has no witness")]
    NoWitness(EntityId),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Reports state that can only arise from corrupted replication bookkeeping.
///
/// Continuing would let two processes diverge silently, so this never returns. Release builds
/// are compiled with `panic = "abort"`.
#[track_caller]
pub fn consistency_violation(message: impl std::fmt::Display) -> ! {
    log::error!("consistency violation: {}", message);
    panic!("consistency violation: {}", message);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_render_readable_messages() {
        let err = CellError::ControllerNotFound {
            entity: 7,
            controller: 3,
        };
        assert_eq!(err.to_string(), "entity 7 has no controller 3");

        let err = CellError::MigrationTargetRejected {
            entity: 1,
            target: 2,
            reason: RejectReason::SpaceGone,
        };
        assert!(err.to_string().contains("space"));
    }

    #[test]
    #[should_panic(expected = "consistency violation")]
    fn violation_panics() {
        consistency_violation("two reals for entity 1");
    }
}
