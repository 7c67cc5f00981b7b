mod alias;
mod packet;
#[allow(clippy::module_inception)]
mod witness;

pub use alias::{AliasTable, MAX_ALIASES};
pub use packet::{
    take_events, AoiEvent, AoiPacket, EntityKey, NullSink, PacketLog, PropertyKey, RecordingSink,
    WitnessSink,
};
pub use witness::{AoiMember, MembershipDelta, Witness, WitnessSnapshot};
