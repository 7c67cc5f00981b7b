use std::sync::{Arc, Mutex};

use glam::Vec3;
use rkyv::{Archive, Deserialize, Serialize};

use crate::entity::{Entity, MethodDef, PropertyValue};
use crate::types::{ControllerId, Direction3D, EntityId, PropertyId, SpaceId, TimerId};

/// Behavior hooks the runtime may implement for an entity type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HookKind {
    OnMove,
    OnMoveOver,
    OnMoveFailure,
    OnTurn,
    OnEnterTrap,
    OnLeaveTrap,
    OnWitnessed,
    OnTeleportSuccess,
    OnTeleportFailure,
    OnEnterSpace,
    OnLeaveSpace,
    OnSpaceGone,
    OnTimer,
    OnDestroy,
    OnLoseControlledBy,
}

impl HookKind {
    pub const ALL: [HookKind; 15] = [
        HookKind::OnMove,
        HookKind::OnMoveOver,
        HookKind::OnMoveFailure,
        HookKind::OnTurn,
        HookKind::OnEnterTrap,
        HookKind::OnLeaveTrap,
        HookKind::OnWitnessed,
        HookKind::OnTeleportSuccess,
        HookKind::OnTeleportFailure,
        HookKind::OnEnterSpace,
        HookKind::OnLeaveSpace,
        HookKind::OnSpaceGone,
        HookKind::OnTimer,
        HookKind::OnDestroy,
        HookKind::OnLoseControlledBy,
    ];
}

#[derive(Debug, Clone, PartialEq)]
pub enum Hook {
    OnMove {
        controller: ControllerId,
        user_arg: i32,
    },
    OnMoveOver {
        controller: ControllerId,
        user_arg: i32,
    },
    OnMoveFailure {
        controller: ControllerId,
        user_arg: i32,
    },
    OnTurn {
        controller: ControllerId,
        user_arg: i32,
    },
    OnEnterTrap {
        other: EntityId,
        range_xz: f32,
        range_y: f32,
        controller: ControllerId,
        user_arg: i32,
    },
    OnLeaveTrap {
        other: EntityId,
        range_xz: f32,
        range_y: f32,
        controller: ControllerId,
        user_arg: i32,
    },
    OnWitnessed {
        witnessed: bool,
    },
    OnTeleportSuccess,
    OnTeleportFailure {
        reason: String,
    },
    OnEnterSpace {
        space: SpaceId,
    },
    OnLeaveSpace {
        space: SpaceId,
    },
    OnSpaceGone {
        space: SpaceId,
    },
    OnTimer {
        timer: TimerId,
        user_arg: i32,
    },
    OnDestroy,
    OnLoseControlledBy {
        controller: EntityId,
    },
}

impl Hook {
    pub fn kind(&self) -> HookKind {
        match self {
            Hook::OnMove { .. } => HookKind::OnMove,
            Hook::OnMoveOver { .. } => HookKind::OnMoveOver,
            Hook::OnMoveFailure { .. } => HookKind::OnMoveFailure,
            Hook::OnTurn { .. } => HookKind::OnTurn,
            Hook::OnEnterTrap { .. } => HookKind::OnEnterTrap,
            Hook::OnLeaveTrap { .. } => HookKind::OnLeaveTrap,
            Hook::OnWitnessed { .. } => HookKind::OnWitnessed,
            Hook::OnTeleportSuccess => HookKind::OnTeleportSuccess,
            Hook::OnTeleportFailure { .. } => HookKind::OnTeleportFailure,
            Hook::OnEnterSpace { .. } => HookKind::OnEnterSpace,
            Hook::OnLeaveSpace { .. } => HookKind::OnLeaveSpace,
            Hook::OnSpaceGone { .. } => HookKind::OnSpaceGone,
            Hook::OnTimer { .. } => HookKind::OnTimer,
            Hook::OnDestroy => HookKind::OnDestroy,
            Hook::OnLoseControlledBy { .. } => HookKind::OnLoseControlledBy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub enum CallOrigin {
    Server,
    Client,
}

/// Identity of whoever issued a method call. Always travels with the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct Caller {
    pub entity: EntityId,
    pub origin: CallOrigin,
}

impl Caller {
    pub fn server(entity: EntityId) -> Self {
        Self {
            entity,
            origin: CallOrigin::Server,
        }
    }

    pub fn client(entity: EntityId) -> Self {
        Self {
            entity,
            origin: CallOrigin::Client,
        }
    }

    pub fn is_client(&self) -> bool {
        self.origin == CallOrigin::Client
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TeleportRequest {
    pub process: crate::types::ProcessId,
    pub space: SpaceId,
    pub position: Vec3,
    pub direction: Direction3D,
}

/// What a hook or method asked the engine to do. Applied by the cell after the call returns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScriptEffects {
    pub writes: Vec<(PropertyId, PropertyValue)>,
    pub cancel_controllers: Vec<ControllerId>,
    pub destroy: bool,
    /// Rolls back the entity's outgoing migration, if one is in flight.
    pub cancel_migration: bool,
    pub teleport: Option<TeleportRequest>,
    pub result: Option<Vec<PropertyValue>>,
}

impl ScriptEffects {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_result(result: Vec<PropertyValue>) -> Self {
        Self {
            result: Some(result),
            ..Self::default()
        }
    }

    pub fn write(mut self, property: PropertyId, value: PropertyValue) -> Self {
        self.writes.push((property, value));
        self
    }
}

pub trait ScriptRuntime {
    fn invoke(&mut self, entity: &Entity, hook: &Hook) -> ScriptEffects;

    fn call_method(
        &mut self,
        entity: &Entity,
        method: &MethodDef,
        caller: Caller,
        args: &[PropertyValue],
    ) -> ScriptEffects;
}

#[derive(Debug, Default)]
pub struct NullRuntime;

impl ScriptRuntime for NullRuntime {
    fn invoke(&mut self, _entity: &Entity, _hook: &Hook) -> ScriptEffects {
        ScriptEffects::none()
    }

    fn call_method(
        &mut self,
        _entity: &Entity,
        _method: &MethodDef,
        _caller: Caller,
        _args: &[PropertyValue],
    ) -> ScriptEffects {
        ScriptEffects::none()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScriptRecord {
    Hook {
        entity: EntityId,
        hook: Hook,
    },
    Call {
        entity: EntityId,
        method: String,
        caller: Caller,
        args: Vec<PropertyValue>,
    },
}

pub type ScriptLog = Arc<Mutex<Vec<ScriptRecord>>>;

/// Records every hook and call, and answers method calls by echoing their arguments.
#[derive(Debug, Clone, Default)]
pub struct RecordingRuntime {
    log: ScriptLog,
}

impl RecordingRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&self) -> ScriptLog {
        Arc::clone(&self.log)
    }

    fn push(&self, record: ScriptRecord) {
        if let Ok(mut log) = self.log.lock() {
            log.push(record);
        }
    }
}

impl ScriptRuntime for RecordingRuntime {
    fn invoke(&mut self, entity: &Entity, hook: &Hook) -> ScriptEffects {
        self.push(ScriptRecord::Hook {
            entity: entity.id,
            hook: hook.clone(),
        });
        ScriptEffects::none()
    }

    fn call_method(
        &mut self,
        entity: &Entity,
        method: &MethodDef,
        caller: Caller,
        args: &[PropertyValue],
    ) -> ScriptEffects {
        self.push(ScriptRecord::Call {
            entity: entity.id,
            method: method.name.clone(),
            caller,
            args: args.to_vec(),
        });
        ScriptEffects::with_result(args.to_vec())
    }
}

/// Hooks recorded for one entity, in invocation order.
pub fn hooks_for(log: &ScriptLog, entity: EntityId) -> Vec<Hook> {
    log.lock()
        .map(|log| {
            log.iter()
                .filter_map(|record| match record {
                    ScriptRecord::Hook { entity: id, hook } if *id == entity => Some(hook.clone()),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default()
}
