use crate::entity::{encode_value, Entity, EntityDef};
use crate::error::CodecError;
use crate::net::CellMessage;

/// Messages bringing every ghost of `entity` up to date with this tick's changes.
pub fn ghost_deltas(entity: &Entity, def: Option<&EntityDef>) -> Result<Vec<CellMessage>, CodecError> {
    let mut messages = Vec::new();
    for (property, value) in entity.properties.changed() {
        let ghosted = def
            .and_then(|def| def.property(property))
            .is_some_and(|p| p.is_ghosted());
        if !ghosted {
            continue;
        }
        messages.push(CellMessage::GhostPropertyUpdate {
            entity: entity.id,
            property,
            value: encode_value(value)?,
        });
    }
    if entity.has_volatile_changes() {
        messages.push(CellMessage::GhostVolatileUpdate {
            entity: entity.id,
            position: entity.position.to_array(),
            direction: entity.direction.to_array(),
            on_ground: entity.on_ground,
        });
    }
    Ok(messages)
}

#[cfg(test)]
mod tests {
    use glam::Vec3;

    use super::*;
    use crate::entity::{PropertyFlags, PropertyTable, PropertyValue};
    use crate::types::Direction3D;

    #[test]
    fn only_ghosted_changes_are_sent() {
        let def = EntityDef::new(1, "Npc")
            .with_property(1, "hp", PropertyFlags::CELL_PUBLIC, PropertyValue::Int(0))
            .with_property(2, "plan", PropertyFlags::CELL_PRIVATE, PropertyValue::Int(0));
        let mut entity = Entity::new_real(5, 1, 1, Vec3::ZERO, Direction3D::default(), PropertyTable::new());
        assert!(ghost_deltas(&entity, Some(&def)).unwrap().is_empty());

        entity.properties.set(1, PropertyValue::Int(4));
        entity.properties.set(2, PropertyValue::Int(9));
        entity.set_position(Vec3::X);
        let messages = ghost_deltas(&entity, Some(&def)).unwrap();
        assert_eq!(messages.len(), 2);
        assert!(matches!(messages[0], CellMessage::GhostPropertyUpdate { property: 1, .. }));
        assert!(matches!(messages[1], CellMessage::GhostVolatileUpdate { entity: 5, .. }));
    }
}
