use rkyv::{rancor, Archive, Deserialize, Serialize};

use crate::error::CodecError;
use crate::migration::{EntitySnapshot, RejectReason};
use crate::script::Caller;
use crate::types::{CallId, EntityId, MethodId, ProcessId, PropertyId, SpaceId};

/// Where the answer to a forwarded call has to go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct ReplyHandle {
    pub process: ProcessId,
    pub call: CallId,
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub enum CallResult {
    /// Encoded value stream.
    Returned(Vec<u8>),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub enum CellMessage {
    RemoteMethodCall {
        entity: EntityId,
        method: MethodId,
        caller: Caller,
        args: Vec<u8>,
        reply: Option<ReplyHandle>,
    },
    RemoteCallReply {
        call: CallId,
        result: CallResult,
    },
    GhostPropertyUpdate {
        entity: EntityId,
        property: PropertyId,
        value: Vec<u8>,
    },
    GhostVolatileUpdate {
        entity: EntityId,
        position: [f32; 3],
        direction: [f32; 3],
        on_ground: bool,
    },
    CreateGhost {
        snapshot: EntitySnapshot,
    },
    DestroyGhost {
        entity: EntityId,
    },
    GhostOwnerChanged {
        entity: EntityId,
        owner: ProcessId,
    },
    TeleportRequest {
        /// Space the entity leaves; the snapshot already names the destination space.
        source_space: SpaceId,
        snapshot: EntitySnapshot,
    },
    TeleportAck {
        entity: EntityId,
    },
    TeleportReject {
        entity: EntityId,
        reason: RejectReason,
    },
    /// Carries the transferred state again so the target can install the real even after
    /// its staged copy expired.
    TeleportCommit {
        source_space: SpaceId,
        snapshot: EntitySnapshot,
    },
    TeleportAbort {
        entity: EntityId,
    },
    ClientUpdate {
        entity: EntityId,
        from: EntityId,
        position: [f32; 3],
        direction: [f32; 3],
        on_ground: bool,
    },
}

impl CellMessage {
    /// Messages addressed to an entity that must wait while it is frozen for migration.
    pub fn bufferable_target(&self) -> Option<EntityId> {
        match self {
            Self::RemoteMethodCall { entity, .. } | Self::ClientUpdate { entity, .. } => Some(*entity),
            _ => None,
        }
    }

    /// Position streams that the next update supersedes. Everything else must arrive.
    pub fn is_droppable(&self) -> bool {
        matches!(
            self,
            Self::GhostVolatileUpdate { .. } | Self::ClientUpdate { .. }
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::RemoteMethodCall { .. } => "RemoteMethodCall",
            Self::RemoteCallReply { .. } => "RemoteCallReply",
            Self::GhostPropertyUpdate { .. } => "GhostPropertyUpdate",
            Self::GhostVolatileUpdate { .. } => "GhostVolatileUpdate",
            Self::CreateGhost { .. } => "CreateGhost",
            Self::DestroyGhost { .. } => "DestroyGhost",
            Self::GhostOwnerChanged { .. } => "GhostOwnerChanged",
            Self::TeleportRequest { .. } => "TeleportRequest",
            Self::TeleportAck { .. } => "TeleportAck",
            Self::TeleportReject { .. } => "TeleportReject",
            Self::TeleportCommit { .. } => "TeleportCommit",
            Self::TeleportAbort { .. } => "TeleportAbort",
            Self::ClientUpdate { .. } => "ClientUpdate",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct Envelope {
    pub from: ProcessId,
    pub to: ProcessId,
    pub message: CellMessage,
}

impl Envelope {
    pub fn new(from: ProcessId, to: ProcessId, message: CellMessage) -> Self {
        Self { from, to, message }
    }

    pub fn serialize(&self) -> Result<Vec<u8>, CodecError> {
        rkyv::to_bytes::<rancor::Error>(self)
            .map(|aligned| aligned.into_vec())
            .map_err(CodecError::Serialize)
    }

    pub fn deserialize(data: &[u8]) -> Result<Self, CodecError> {
        rkyv::from_bytes::<Self, rancor::Error>(data).map_err(CodecError::Deserialize)
    }
}
