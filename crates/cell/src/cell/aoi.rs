use crate::config::AoiConfig;
use crate::entity::{Entity, EntityDefs, PropertyValue};
use crate::error::CellError;
use crate::script::Hook;
use crate::types::{EntityId, PropertyId};
use crate::witness::{AoiEvent, AoiPacket, PropertyKey, Witness};

use super::CellApp;

/// Which client-visible properties of `entity` go on the wire, keyed the way the observer
/// expects them.
fn client_properties(
    defs: &EntityDefs,
    config: &AoiConfig,
    entity: &Entity,
    changed_only: bool,
    own_client: bool,
) -> Vec<(PropertyKey, PropertyValue)> {
    let Some(def) = defs.get(entity.type_id) else {
        return Vec::new();
    };
    let source: Vec<(PropertyId, &PropertyValue)> = if changed_only {
        entity.properties.changed().collect()
    } else {
        entity.properties.iter().collect()
    };
    source
        .into_iter()
        .filter(|(id, _)| {
            def.property(*id).is_some_and(|p| {
                if own_client {
                    p.is_client_visible()
                } else {
                    p.is_other_clients()
                }
            })
        })
        .map(|(id, value)| {
            let key = match def.property_alias(id) {
                Some(alias) if config.alias_property_ids => PropertyKey::Alias(alias),
                _ => PropertyKey::Id(id),
            };
            (key, value.clone())
        })
        .collect()
}

impl CellApp {
    /// Gives a real entity an observer endpoint. It becomes its own controller if nobody
    /// else drives it.
    pub fn attach_witness(&mut self, id: EntityId) -> Result<(), CellError> {
        let radius = self.config.aoi.default_radius;
        let hysteresis = self.config.aoi.default_hysteresis;
        let alias = self.config.aoi.alias_entity_ids;
        let entity = self.live_real_mut(id)?;
        if entity.witness.is_some() {
            return Ok(());
        }
        entity.witness = Some(Witness::new(id, radius, hysteresis, alias));
        if entity.controlled_by.is_none() {
            entity.controlled_by = Some(id);
        }
        log::debug!("witness attached to entity {}", id);
        Ok(())
    }

    pub fn detach_witness(&mut self, id: EntityId) -> Result<(), CellError> {
        if self.real_mut(id)?.witness.is_none() {
            return Ok(());
        }
        self.release_members(id);
        if let Some(entity) = self.arena.get_mut(id) {
            entity.witness = None;
        }
        self.revert_controlled_by(id);
        log::debug!("witness detached from entity {}", id);
        Ok(())
    }

    /// Whether any observer on this process has the entity in its AOI.
    pub fn is_witnessed(&self, id: EntityId) -> Result<bool, CellError> {
        self.arena
            .get(id)
            .map(|entity| !entity.witnesses.is_empty())
            .ok_or(CellError::EntityNotFound(id))
    }

    pub fn set_aoi_radius(
        &mut self,
        id: EntityId,
        radius: f32,
        hysteresis: f32,
    ) -> Result<(), CellError> {
        if !radius.is_finite() || !hysteresis.is_finite() {
            return Err(CellError::InvalidRange {
                range_xz: radius,
                range_y: hysteresis,
            });
        }
        self.real_mut(id)?
            .witness
            .as_mut()
            .ok_or(CellError::NoWitness(id))?
            .set_radius(radius, hysteresis);
        Ok(())
    }

    /// Returns false when `entity` was not waiting for an acknowledgment.
    pub fn ack_enter(&mut self, observer: EntityId, entity: EntityId) -> Result<bool, CellError> {
        Ok(self
            .real_mut(observer)?
            .witness
            .as_mut()
            .ok_or(CellError::NoWitness(observer))?
            .ack_enter(entity))
    }

    /// A desync resends the whole membership and is reported to the caller.
    pub fn ack_leave(&mut self, observer: EntityId, entity: EntityId) -> Result<(), CellError> {
        let result = self
            .real_mut(observer)?
            .witness
            .as_mut()
            .ok_or(CellError::NoWitness(observer))?
            .ack_leave(entity);
        if let Err(err) = &result {
            log::warn!("{}, resending full AOI", err);
            self.resync_observer(observer);
        }
        result
    }

    pub fn entities_in_aoi(&self, observer: EntityId) -> Result<Vec<EntityId>, CellError> {
        let entity = self
            .arena
            .get_real(observer)
            .ok_or(CellError::EntityNotFound(observer))?;
        Ok(entity
            .witness
            .as_ref()
            .ok_or(CellError::NoWitness(observer))?
            .member_ids())
    }

    /// Hands movement authority of `id` to the client behind `controller`, or takes it back
    /// with None. The controller must be a local entity with a witness.
    pub fn set_controlled_by(
        &mut self,
        id: EntityId,
        controller: Option<EntityId>,
    ) -> Result<(), CellError> {
        if let Some(controller) = controller {
            if !self.arena.get_real(controller).is_some_and(Entity::has_witness) {
                return Err(CellError::NoWitness(controller));
            }
        }
        let entity = self.live_real_mut(id)?;
        let previous = entity.controlled_by;
        if previous == controller {
            return Ok(());
        }
        entity.controlled_by = controller;
        if previous.is_none() {
            entity.controllers.stop_move();
        }
        if let Some(previous) = previous.filter(|p| *p != id) {
            self.invoke_hook(
                id,
                Hook::OnLoseControlledBy {
                    controller: previous,
                },
            );
        }
        Ok(())
    }

    fn resync_observer(&mut self, observer: EntityId) {
        let members = match self.arena.get_mut(observer).and_then(|e| e.witness.as_mut()) {
            Some(witness) => witness.reset(),
            None => return,
        };
        let enters: Vec<AoiEvent> = members
            .into_iter()
            .filter_map(|member| self.enter_event(observer, member))
            .collect();
        if let Some(witness) = self.arena.get_mut(observer).and_then(|e| e.witness.as_mut()) {
            witness.queue(AoiEvent::Reset);
            for enter in enters {
                witness.queue(enter);
            }
        }
    }

    /// Empties the observer's membership, queueing a leave per member and unregistering it
    /// from each member's witness list.
    pub(crate) fn release_members(&mut self, observer: EntityId) {
        let members = match self.arena.get_mut(observer).and_then(|e| e.witness.as_mut()) {
            Some(witness) => {
                let ids = witness.member_ids();
                for id in &ids {
                    if let Some(member) = witness.remove_member(*id) {
                        witness.queue(AoiEvent::Leave { key: member.key() });
                    }
                }
                ids
            }
            None => return,
        };
        for member in members {
            let unwatched = self
                .arena
                .get_mut(member)
                .is_some_and(|e| e.remove_witness(observer));
            if unwatched {
                self.invoke_hook(member, Hook::OnWitnessed { witnessed: false });
            }
        }
    }

    /// Corrects the observer's view of `entity` without waiting for a regular update.
    pub(crate) fn force_position(&mut self, observer: EntityId, entity: EntityId) {
        let Some(target) = self.arena.get(entity) else {
            return;
        };
        let event = AoiEvent::ForcePosition {
            entity,
            position: target.position.to_array(),
            direction: target.direction.to_array(),
        };
        if let Some(witness) = self.arena.get_mut(observer).and_then(|e| e.witness.as_mut()) {
            witness.queue(event);
        }
    }

    fn enter_event(&self, observer: EntityId, entered: EntityId) -> Option<AoiEvent> {
        let key = self.arena.get(observer)?.witness.as_ref()?.key_for(entered);
        let entity = self.arena.get(entered)?;
        Some(AoiEvent::Enter {
            key,
            entity: entered,
            type_id: entity.type_id,
            position: entity.position.to_array(),
            direction: entity.direction.to_array(),
            properties: client_properties(&self.defs, &self.config.aoi, entity, false, false),
        })
    }

    fn member_update(&self, observer: EntityId, member: EntityId, catch_up: bool) -> Option<AoiEvent> {
        let key = self.arena.get(observer)?.witness.as_ref()?.key_for(member);
        let entity = self.arena.get(member)?;
        if catch_up {
            return Some(AoiEvent::Update {
                key,
                position: Some(entity.position.to_array()),
                direction: Some(entity.direction.to_array()),
                properties: client_properties(&self.defs, &self.config.aoi, entity, false, false),
            });
        }
        let properties = client_properties(&self.defs, &self.config.aoi, entity, true, false);
        let position = entity.moved.then(|| entity.position.to_array());
        let direction = entity.turned.then(|| entity.direction.to_array());
        if properties.is_empty() && position.is_none() && direction.is_none() {
            return None;
        }
        Some(AoiEvent::Update {
            key,
            position,
            direction,
            properties,
        })
    }

    /// The owner's own changes. Position is left out while its client drives the movement.
    fn self_update(&self, observer: EntityId) -> Option<AoiEvent> {
        let entity = self.arena.get(observer)?;
        let properties = client_properties(&self.defs, &self.config.aoi, entity, true, true);
        let client_driven = entity.controlled_by == Some(observer);
        let position = (entity.moved && !client_driven).then(|| entity.position.to_array());
        let direction = (entity.turned && !client_driven).then(|| entity.direction.to_array());
        if properties.is_empty() && position.is_none() && direction.is_none() {
            return None;
        }
        Some(AoiEvent::SelfUpdate {
            position,
            direction,
            properties,
        })
    }

    pub(super) fn update_witnesses(&mut self) {
        let observers: Vec<EntityId> = self
            .arena
            .entities()
            .filter(|e| e.is_real() && e.has_witness() && !e.is_migrating())
            .map(|e| e.id)
            .collect();
        for observer in observers {
            self.update_witness(observer);
        }
    }

    fn update_witness(&mut self, observer: EntityId) {
        let Some(entity) = self.arena.get(observer) else {
            return;
        };
        let Some(witness) = entity.witness.as_ref() else {
            return;
        };
        let candidates = self
            .spaces
            .get(entity.space_id)
            .map(|space| {
                space
                    .index()
                    .query_radius_with_distance(entity.position, witness.query_radius())
            })
            .unwrap_or_default();

        let Some(witness) = self.arena.get_mut(observer).and_then(|e| e.witness.as_mut()) else {
            return;
        };
        let delta = witness.update(&candidates);
        let mut events = witness.take_queued();
        let acknowledged: Vec<EntityId> = witness
            .members()
            .filter(|m| !m.pending_enter)
            .map(|m| m.entity)
            .collect();
        let mut witnessed = Vec::new();

        for (left, key) in delta.left {
            events.push(AoiEvent::Leave { key });
            if self
                .arena
                .get_mut(left)
                .is_some_and(|e| e.remove_witness(observer))
            {
                witnessed.push((left, false));
            }
        }
        for entered in delta.entered {
            if let Some(event) = self.enter_event(observer, entered) {
                events.push(event);
            }
            if self
                .arena
                .get_mut(entered)
                .is_some_and(|e| e.add_witness(observer))
            {
                witnessed.push((entered, true));
            }
        }
        for member in acknowledged {
            let catch_up = self
                .arena
                .get_mut(observer)
                .and_then(|e| e.witness.as_mut())
                .is_some_and(|w| w.take_catch_up(member));
            if let Some(event) = self.member_update(observer, member, catch_up) {
                events.push(event);
            }
        }
        if let Some(event) = self.self_update(observer) {
            events.push(event);
        }

        if !events.is_empty() {
            self.stats.aoi_packets += 1;
            let packet = AoiPacket {
                observer,
                tick: self.tick,
                events,
            };
            self.sink.deliver(observer, packet);
        }
        for (entity, witnessed) in witnessed {
            self.invoke_hook(entity, Hook::OnWitnessed { witnessed });
        }
    }
}
