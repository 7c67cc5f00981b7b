use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use cellmesh::entity::MethodDef;
use cellmesh::script::TeleportRequest;
use cellmesh::witness::EntityKey;
use cellmesh::{
    AoiEvent, AoiPacket, Caller, Entity, EntityDef, EntityDefs, EntityId, Hook, HookKind,
    ProcessId, PropertyFlags, PropertyValue, ScriptEffects, ScriptRuntime, WitnessSink,
};

use crate::config::ServerConfig;

pub const NPC_TYPE: u16 = 1;
pub const OBSERVER_TYPE: u16 = 2;

pub const PROP_NAME: u16 = 1;
pub const PROP_ENCOUNTERS: u16 = 2;
pub const PROP_HOME: u16 = 3;

pub const METHOD_GREET: u16 = 1;

pub const NPC_TRAP_RANGE: f32 = 4.0;

pub fn entity_defs() -> EntityDefs {
    let npc = EntityDef::new(NPC_TYPE, "Wanderer")
        .with_property(
            PROP_NAME,
            "name",
            PropertyFlags::OTHER_CLIENTS,
            PropertyValue::Str(String::new()),
        )
        .with_property(
            PROP_ENCOUNTERS,
            "encounters",
            PropertyFlags::CELL_PUBLIC | PropertyFlags::PERSISTENT,
            PropertyValue::Int(0),
        )
        .with_property(
            PROP_HOME,
            "home",
            PropertyFlags::CELL_PRIVATE | PropertyFlags::PERSISTENT,
            PropertyValue::Int(0),
        )
        .with_method(METHOD_GREET, "greet", true)
        .with_all_hooks();
    let observer = EntityDef::new(OBSERVER_TYPE, "Observer")
        .with_property(
            PROP_NAME,
            "name",
            PropertyFlags::OTHER_CLIENTS | PropertyFlags::OWN_CLIENT,
            PropertyValue::Str(String::new()),
        )
        .with_hook(HookKind::OnEnterSpace)
        .with_hook(HookKind::OnMoveOver)
        .with_hook(HookKind::OnMoveFailure);
    EntityDefs::new().with(npc).with(observer)
}

/// Entities that finished whatever they were doing and want a new destination.
pub type IdleQueue = Arc<Mutex<Vec<(ProcessId, EntityId)>>>;

/// Gameplay for the demo: wanderers walk between random points, cross into whichever cell
/// owns the ground under them and count the other wanderers they bump into.
pub struct WandererScript {
    process: ProcessId,
    config: ServerConfig,
    idle: IdleQueue,
}

impl WandererScript {
    pub fn new(process: ProcessId, config: ServerConfig, idle: IdleQueue) -> Self {
        Self {
            process,
            config,
            idle,
        }
    }

    fn mark_idle(&self, entity: EntityId) {
        if let Ok(mut idle) = self.idle.lock() {
            idle.push((self.process, entity));
        }
    }
}

impl ScriptRuntime for WandererScript {
    fn invoke(&mut self, entity: &Entity, hook: &Hook) -> ScriptEffects {
        match hook {
            Hook::OnEnterSpace { .. }
            | Hook::OnMoveOver { .. }
            | Hook::OnMoveFailure { .. }
            | Hook::OnTeleportSuccess => {
                self.mark_idle(entity.id);
                ScriptEffects::none()
            }
            Hook::OnTeleportFailure { reason } => {
                log::debug!("wanderer {} stays on {}: {}", entity.id, self.process, reason);
                self.mark_idle(entity.id);
                ScriptEffects::none()
            }
            Hook::OnMove { .. } if entity.type_id == NPC_TYPE => {
                let owner = self.config.owner_of(entity.position.x);
                if owner == self.process {
                    return ScriptEffects::none();
                }
                ScriptEffects {
                    teleport: Some(TeleportRequest {
                        process: owner,
                        space: entity.space_id,
                        position: entity.position,
                        direction: entity.direction,
                    }),
                    ..ScriptEffects::default()
                }
            }
            Hook::OnEnterTrap { other, .. } if *other != entity.id => {
                let seen = entity
                    .properties
                    .get(PROP_ENCOUNTERS)
                    .and_then(PropertyValue::as_int)
                    .unwrap_or(0);
                ScriptEffects::none().write(PROP_ENCOUNTERS, PropertyValue::Int(seen + 1))
            }
            _ => ScriptEffects::none(),
        }
    }

    fn call_method(
        &mut self,
        entity: &Entity,
        method: &MethodDef,
        caller: Caller,
        _args: &[PropertyValue],
    ) -> ScriptEffects {
        match method.id {
            METHOD_GREET => {
                let name = entity
                    .properties
                    .get(PROP_NAME)
                    .and_then(PropertyValue::as_str)
                    .unwrap_or("someone")
                    .to_string();
                log::debug!("{} greeted by {}", name, caller.entity);
                ScriptEffects::with_result(vec![PropertyValue::Str(name)])
            }
            _ => ScriptEffects::none(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ack {
    Enter { observer: EntityId, entity: EntityId },
    Leave { observer: EntityId, entity: EntityId },
}

#[derive(Debug, Default)]
pub struct SinkState {
    pub packets: u64,
    pub bytes: u64,
    pub acks: Vec<Ack>,
    keys: HashMap<EntityId, HashMap<EntityKey, EntityId>>,
}

/// Stands in for the observers' clients: counts the traffic and acknowledges every enter and
/// leave on the next tick.
#[derive(Debug, Clone, Default)]
pub struct AckingSink {
    state: Arc<Mutex<SinkState>>,
}

impl AckingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> Arc<Mutex<SinkState>> {
        Arc::clone(&self.state)
    }
}

impl WitnessSink for AckingSink {
    fn deliver(&mut self, observer: EntityId, packet: AoiPacket) {
        let size = match packet.serialize() {
            Ok(bytes) => bytes.len() as u64,
            Err(err) => {
                log::warn!("AOI packet for {} not encodable: {}", observer, err);
                0
            }
        };
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        state.packets += 1;
        state.bytes += size;
        for event in packet.events {
            match event {
                AoiEvent::Enter { key, entity, .. } => {
                    state.keys.entry(observer).or_default().insert(key, entity);
                    state.acks.push(Ack::Enter { observer, entity });
                }
                AoiEvent::Leave { key } => {
                    let entity = state
                        .keys
                        .get_mut(&observer)
                        .and_then(|keys| keys.remove(&key));
                    if let Some(entity) = entity {
                        state.acks.push(Ack::Leave { observer, entity });
                    }
                }
                AoiEvent::Reset => {
                    state.keys.remove(&observer);
                }
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sink_resolves_aliases_on_leave() {
        let mut sink = AckingSink::new();
        let state = sink.state();
        sink.deliver(
            7,
            AoiPacket {
                observer: 7,
                tick: 1,
                events: vec![AoiEvent::Enter {
                    key: EntityKey::Alias(0),
                    entity: 42,
                    type_id: NPC_TYPE,
                    position: [0.0; 3],
                    direction: [0.0; 3],
                    properties: Vec::new(),
                }],
            },
        );
        sink.deliver(
            7,
            AoiPacket {
                observer: 7,
                tick: 2,
                events: vec![AoiEvent::Leave {
                    key: EntityKey::Alias(0),
                }],
            },
        );
        let state = state.lock().unwrap();
        assert_eq!(state.packets, 2);
        assert_eq!(
            state.acks,
            vec![
                Ack::Enter {
                    observer: 7,
                    entity: 42
                },
                Ack::Leave {
                    observer: 7,
                    entity: 42
                },
            ]
        );
    }

    #[test]
    fn defs_expose_greet_on_wanderers() {
        let defs = entity_defs();
        let npc = defs.get(NPC_TYPE).unwrap();
        assert!(npc.method(METHOD_GREET).unwrap().exposed);
        assert!(npc.implements(HookKind::OnEnterTrap));
        assert!(!defs.get(OBSERVER_TYPE).unwrap().implements(HookKind::OnEnterTrap));
    }
}
