mod arena;
mod def;
#[allow(clippy::module_inception)]
mod entity;
mod property;
mod timer;

pub use arena::EntityArena;
pub use def::{EntityDef, EntityDefs, MethodDef, PropertyDef, PropertyFlags};
pub use entity::{Entity, EntityFlags, EntityMode};
pub use property::{decode_value, decode_values, encode_value, encode_values, PropertyTable, PropertyValue};
pub use timer::{ScriptTimer, TimerSet};
