use std::collections::{BTreeSet, HashMap};

use bitflags::bitflags;

use crate::script::HookKind;
use crate::types::{EntityTypeId, MethodId, PropertyId};

use super::property::PropertyValue;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PropertyFlags: u8 {
        /// Visible to ghosts on other cells.
        const CELL_PUBLIC = 1 << 0;
        const CELL_PRIVATE = 1 << 1;
        const OWN_CLIENT = 1 << 2;
        /// Visible to other observers; implies ghosting.
        const OTHER_CLIENTS = 1 << 3;
        const PERSISTENT = 1 << 4;
    }
}

#[derive(Debug, Clone)]
pub struct PropertyDef {
    pub id: PropertyId,
    pub name: String,
    pub flags: PropertyFlags,
    pub default: PropertyValue,
}

impl PropertyDef {
    pub fn is_ghosted(&self) -> bool {
        self.flags
            .intersects(PropertyFlags::CELL_PUBLIC | PropertyFlags::OTHER_CLIENTS)
    }

    pub fn is_client_visible(&self) -> bool {
        self.flags
            .intersects(PropertyFlags::OWN_CLIENT | PropertyFlags::OTHER_CLIENTS)
    }

    pub fn is_other_clients(&self) -> bool {
        self.flags.contains(PropertyFlags::OTHER_CLIENTS)
    }

    pub fn is_persistent(&self) -> bool {
        self.flags.contains(PropertyFlags::PERSISTENT)
    }
}

#[derive(Debug, Clone)]
pub struct MethodDef {
    pub id: MethodId,
    pub name: String,
    /// Callable from clients and forwardable from ghosts.
    pub exposed: bool,
}

/// Capability table for one entity type, built once at load time.
#[derive(Debug, Clone)]
pub struct EntityDef {
    pub type_id: EntityTypeId,
    pub name: String,
    properties: Vec<PropertyDef>,
    methods: Vec<MethodDef>,
    hooks: BTreeSet<HookKind>,
    property_aliases: HashMap<PropertyId, u8>,
}

impl EntityDef {
    pub fn new(type_id: EntityTypeId, name: impl Into<String>) -> Self {
        Self {
            type_id,
            name: name.into(),
            properties: Vec::new(),
            methods: Vec::new(),
            hooks: BTreeSet::new(),
            property_aliases: HashMap::new(),
        }
    }

    pub fn with_property(
        mut self,
        id: PropertyId,
        name: impl Into<String>,
        flags: PropertyFlags,
        default: PropertyValue,
    ) -> Self {
        self.properties.push(PropertyDef {
            id,
            name: name.into(),
            flags,
            default,
        });
        self.rebuild_aliases();
        self
    }

    pub fn with_method(mut self, id: MethodId, name: impl Into<String>, exposed: bool) -> Self {
        self.methods.push(MethodDef {
            id,
            name: name.into(),
            exposed,
        });
        self
    }

    pub fn with_hook(mut self, hook: HookKind) -> Self {
        self.hooks.insert(hook);
        self
    }

    pub fn with_all_hooks(mut self) -> Self {
        self.hooks.extend(HookKind::ALL);
        self
    }

    pub fn property(&self, id: PropertyId) -> Option<&PropertyDef> {
        self.properties.iter().find(|p| p.id == id)
    }

    pub fn properties(&self) -> &[PropertyDef] {
        &self.properties
    }

    pub fn method(&self, id: MethodId) -> Option<&MethodDef> {
        self.methods.iter().find(|m| m.id == id)
    }

    pub fn implements(&self, hook: HookKind) -> bool {
        self.hooks.contains(&hook)
    }

    /// One-byte alias for a client-visible property, present while the type has at most
    /// 255 of them.
    pub fn property_alias(&self, id: PropertyId) -> Option<u8> {
        self.property_aliases.get(&id).copied()
    }

    fn rebuild_aliases(&mut self) {
        self.property_aliases.clear();
        let visible: Vec<PropertyId> = self
            .properties
            .iter()
            .filter(|p| p.is_client_visible())
            .map(|p| p.id)
            .collect();
        if visible.len() > 255 {
            return;
        }
        for (alias, id) in visible.into_iter().enumerate() {
            self.property_aliases.insert(id, alias as u8);
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EntityDefs {
    types: HashMap<EntityTypeId, EntityDef>,
}

impl EntityDefs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, def: EntityDef) {
        self.types.insert(def.type_id, def);
    }

    pub fn with(mut self, def: EntityDef) -> Self {
        self.register(def);
        self
    }

    pub fn get(&self, type_id: EntityTypeId) -> Option<&EntityDef> {
        self.types.get(&type_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn avatar() -> EntityDef {
        EntityDef::new(1, "Avatar")
            .with_property(1, "hp", PropertyFlags::OTHER_CLIENTS, PropertyValue::Int(100))
            .with_property(2, "gold", PropertyFlags::OWN_CLIENT | PropertyFlags::PERSISTENT, PropertyValue::Int(0))
            .with_property(3, "ai_state", PropertyFlags::CELL_PRIVATE, PropertyValue::Int(0))
            .with_method(1, "say", true)
            .with_method(2, "grant", false)
            .with_hook(HookKind::OnMoveOver)
    }

    #[test]
    fn property_visibility_flags() {
        let def = avatar();
        assert!(def.property(1).unwrap().is_ghosted());
        assert!(!def.property(2).unwrap().is_ghosted());
        assert!(def.property(2).unwrap().is_client_visible());
        assert!(!def.property(3).unwrap().is_client_visible());
    }

    #[test]
    fn aliases_cover_client_visible_properties_only() {
        let def = avatar();
        assert_eq!(def.property_alias(1), Some(0));
        assert_eq!(def.property_alias(2), Some(1));
        assert_eq!(def.property_alias(3), None);
    }

    #[test]
    fn too_many_client_properties_disable_aliases() {
        let mut def = EntityDef::new(2, "Crowd");
        for id in 0..300u16 {
            def = def.with_property(id, format!("p{id}"), PropertyFlags::OTHER_CLIENTS, PropertyValue::Bool(false));
        }
        assert_eq!(def.property_alias(0), None);
    }

    #[test]
    fn capability_lookup() {
        let def = avatar();
        assert!(def.implements(HookKind::OnMoveOver));
        assert!(!def.implements(HookKind::OnTurn));
        assert!(def.method(1).unwrap().exposed);
        assert!(!def.method(2).unwrap().exposed);
        assert!(def.method(9).is_none());
    }
}
