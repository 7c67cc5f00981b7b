use cellmesh::{CellEvent, EntityId, ProcessId};

#[derive(Debug, Clone)]
pub enum ServerEvent {
    Spawned {
        process: ProcessId,
        entity: EntityId,
    },
    Migrated {
        entity: EntityId,
        from: ProcessId,
        to: ProcessId,
    },
    TeleportFailed {
        process: ProcessId,
        entity: EntityId,
        reason: String,
    },
    SpaceDestroyed {
        process: ProcessId,
    },
    Error {
        message: String,
    },
}

impl ServerEvent {
    /// Cell events worth surfacing to the operator; the rest only feed counters.
    pub fn from_cell(process: ProcessId, event: &CellEvent) -> Option<Self> {
        match event {
            CellEvent::EntityCreated { entity } => Some(ServerEvent::Spawned {
                process,
                entity: *entity,
            }),
            CellEvent::MigratedIn { entity, source } => Some(ServerEvent::Migrated {
                entity: *entity,
                from: *source,
                to: process,
            }),
            CellEvent::TeleportFailed { entity, reason } => Some(ServerEvent::TeleportFailed {
                process,
                entity: *entity,
                reason: reason.clone(),
            }),
            CellEvent::SpaceDestroyed { .. } => Some(ServerEvent::SpaceDestroyed { process }),
            CellEvent::CallReply {
                call,
                result: Err(reason),
            } => Some(ServerEvent::Error {
                message: format!("call {} on process {} failed: {}", call, process, reason),
            }),
            _ => None,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            ServerEvent::Spawned { process, entity } => {
                format!("entity {} created on process {}", entity, process)
            }
            ServerEvent::Migrated { entity, from, to } => {
                format!("entity {} migrated {} -> {}", entity, from, to)
            }
            ServerEvent::TeleportFailed {
                process,
                entity,
                reason,
            } => format!(
                "teleport of entity {} on process {} failed: {}",
                entity, process, reason
            ),
            ServerEvent::SpaceDestroyed { process } => {
                format!("space destroyed on process {}", process)
            }
            ServerEvent::Error { message } => message.clone(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(
            self,
            ServerEvent::TeleportFailed { .. } | ServerEvent::Error { .. }
        )
    }
}
