use std::sync::{Arc, Mutex};

use rkyv::{rancor, Archive, Deserialize, Serialize};

use crate::entity::PropertyValue;
use crate::error::CodecError;
use crate::types::{EntityId, EntityTypeId, PropertyId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub enum EntityKey {
    Alias(u8),
    Id(EntityId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub enum PropertyKey {
    Alias(u8),
    Id(PropertyId),
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub enum AoiEvent {
    /// Always carries the full id so the observer can bind the alias.
    Enter {
        key: EntityKey,
        entity: EntityId,
        type_id: EntityTypeId,
        position: [f32; 3],
        direction: [f32; 3],
        properties: Vec<(PropertyKey, PropertyValue)>,
    },
    Update {
        key: EntityKey,
        position: Option<[f32; 3]>,
        direction: Option<[f32; 3]>,
        properties: Vec<(PropertyKey, PropertyValue)>,
    },
    Leave {
        key: EntityKey,
    },
    SelfUpdate {
        position: Option<[f32; 3]>,
        direction: Option<[f32; 3]>,
        properties: Vec<(PropertyKey, PropertyValue)>,
    },
    ForcePosition {
        entity: EntityId,
        position: [f32; 3],
        direction: [f32; 3],
    },
    /// The observer must drop everything it holds; enters for the whole membership follow.
    Reset,
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct AoiPacket {
    pub observer: EntityId,
    pub tick: u64,
    pub events: Vec<AoiEvent>,
}

impl AoiPacket {
    pub fn serialize(&self) -> Result<Vec<u8>, CodecError> {
        rkyv::to_bytes::<rancor::Error>(self)
            .map(|aligned| aligned.into_vec())
            .map_err(CodecError::Serialize)
    }

    pub fn deserialize(data: &[u8]) -> Result<Self, CodecError> {
        rkyv::from_bytes::<Self, rancor::Error>(data).map_err(CodecError::Deserialize)
    }
}

/// Output hook for AOI traffic of observers hosted on this process.
pub trait WitnessSink {
    fn deliver(&mut self, observer: EntityId, packet: AoiPacket);
}

#[derive(Debug, Default)]
pub struct NullSink;

impl WitnessSink for NullSink {
    fn deliver(&mut self, _observer: EntityId, _packet: AoiPacket) {}
}

pub type PacketLog = Arc<Mutex<Vec<AoiPacket>>>;

/// Keeps every delivered packet; the log handle can be shared with whoever inspects it.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    packets: PacketLog,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&self) -> PacketLog {
        Arc::clone(&self.packets)
    }
}

impl WitnessSink for RecordingSink {
    fn deliver(&mut self, _observer: EntityId, packet: AoiPacket) {
        if let Ok(mut packets) = self.packets.lock() {
            packets.push(packet);
        }
    }
}

/// Drains the events a log holds for one observer, in delivery order.
pub fn take_events(log: &PacketLog, observer: EntityId) -> Vec<AoiEvent> {
    let Ok(mut packets) = log.lock() else {
        return Vec::new();
    };
    let mut events = Vec::new();
    packets.retain(|packet| {
        if packet.observer == observer {
            events.extend(packet.events.iter().cloned());
            false
        } else {
            true
        }
    });
    events
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packet_survives_encoding() {
        let packet = AoiPacket {
            observer: 4,
            tick: 12,
            events: vec![
                AoiEvent::Enter {
                    key: EntityKey::Alias(0),
                    entity: 9,
                    type_id: 1,
                    position: [1.0, 0.0, 2.0],
                    direction: [0.0, 0.0, 0.5],
                    properties: vec![(PropertyKey::Alias(0), PropertyValue::Int(100))],
                },
                AoiEvent::Leave {
                    key: EntityKey::Id(70000),
                },
            ],
        };
        let bytes = packet.serialize().unwrap();
        assert_eq!(AoiPacket::deserialize(&bytes).unwrap(), packet);
    }

    #[test]
    fn recording_sink_splits_by_observer() {
        let mut sink = RecordingSink::new();
        let log = sink.log();
        sink.deliver(1, AoiPacket { observer: 1, tick: 0, events: vec![AoiEvent::Reset] });
        sink.deliver(2, AoiPacket { observer: 2, tick: 0, events: vec![AoiEvent::Reset] });
        assert_eq!(take_events(&log, 1), vec![AoiEvent::Reset]);
        assert!(take_events(&log, 1).is_empty());
        assert_eq!(take_events(&log, 2).len(), 1);
    }
}
