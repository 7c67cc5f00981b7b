use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use crate::error::CodecError;
use crate::types::ProcessId;

use super::message::Envelope;
use super::stats::{BusStats, LinkConditions, XorShift};

#[derive(Debug)]
struct InFlight {
    release_tick: u64,
    seq: u64,
    bytes: Vec<u8>,
}

impl PartialEq for InFlight {
    fn eq(&self, other: &Self) -> bool {
        self.release_tick == other.release_tick && self.seq == other.seq
    }
}

impl Eq for InFlight {}

impl PartialOrd for InFlight {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for InFlight {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse order for min-heap
        (other.release_tick, other.seq).cmp(&(self.release_tick, self.seq))
    }
}

/// Carries encoded envelopes between the cells of one harness. Delivery is FIFO per ordered
/// pair of processes even when links add delay or jitter. Link loss only applies to
/// droppable position streams.
#[derive(Debug)]
pub struct LocalBus {
    links: HashMap<(ProcessId, ProcessId), LinkConditions>,
    last_release: HashMap<(ProcessId, ProcessId), u64>,
    queue: BinaryHeap<InFlight>,
    next_seq: u64,
    rng: XorShift,
    stats: BusStats,
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalBus {
    pub fn new() -> Self {
        Self::with_seed(0x5eed)
    }

    pub fn with_seed(seed: u64) -> Self {
        Self {
            links: HashMap::new(),
            last_release: HashMap::new(),
            queue: BinaryHeap::new(),
            next_seq: 0,
            rng: XorShift::new(seed),
            stats: BusStats::default(),
        }
    }

    pub fn set_link(&mut self, from: ProcessId, to: ProcessId, conditions: LinkConditions) {
        if conditions.is_perfect() {
            self.links.remove(&(from, to));
        } else {
            self.links.insert((from, to), conditions);
        }
    }

    /// Queues an envelope sent during tick `now`; it becomes due at `now + 1` at the earliest.
    pub fn send(&mut self, envelope: Envelope, now: u64) -> Result<(), CodecError> {
        let bytes = envelope.serialize()?;
        let pair = (envelope.from, envelope.to);
        self.stats.record_send(envelope.message.name(), bytes.len());

        let mut release_tick = now + 1;
        if let Some(link) = self.links.get(&pair) {
            if envelope.message.is_droppable()
                && link.loss_percent > 0.0
                && self.rng.percent() < link.loss_percent
            {
                log::debug!(
                    "dropping {} from {} to {}",
                    envelope.message.name(),
                    envelope.from,
                    envelope.to
                );
                self.stats.dropped += 1;
                return Ok(());
            }
            release_tick += link.delay_ticks as u64 + self.rng.below(link.jitter_ticks + 1) as u64;
        }
        let last = self.last_release.entry(pair).or_insert(0);
        release_tick = release_tick.max(*last);
        *last = release_tick;

        self.queue.push(InFlight {
            release_tick,
            seq: self.next_seq,
            bytes,
        });
        self.next_seq += 1;
        Ok(())
    }

    /// Pops the next envelope due at or before `now`.
    pub fn pop_due(&mut self, now: u64) -> Option<Envelope> {
        loop {
            if self.queue.peek()?.release_tick > now {
                return None;
            }
            let in_flight = self.queue.pop()?;
            match Envelope::deserialize(&in_flight.bytes) {
                Ok(envelope) => {
                    self.stats.delivered += 1;
                    return Some(envelope);
                }
                Err(err) => {
                    log::warn!("discarding undecodable envelope: {}", err);
                    self.stats.dropped += 1;
                }
            }
        }
    }

    pub fn take_due(&mut self, now: u64) -> Vec<Envelope> {
        let mut due = Vec::new();
        while let Some(envelope) = self.pop_due(now) {
            due.push(envelope);
        }
        due
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn stats(&self) -> &BusStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::CellMessage;

    fn envelope(from: ProcessId, to: ProcessId, entity: u32) -> Envelope {
        Envelope::new(from, to, CellMessage::DestroyGhost { entity })
    }

    fn entity_of(envelope: &Envelope) -> u32 {
        match envelope.message {
            CellMessage::DestroyGhost { entity } => entity,
            _ => 0,
        }
    }

    #[test]
    fn delivers_next_tick_in_send_order() {
        let mut bus = LocalBus::new();
        bus.send(envelope(1, 2, 1), 0).unwrap();
        bus.send(envelope(1, 2, 2), 0).unwrap();
        assert!(bus.take_due(0).is_empty());
        let due: Vec<u32> = bus.take_due(1).iter().map(entity_of).collect();
        assert_eq!(due, vec![1, 2]);
        assert_eq!(bus.stats().delivered, 2);
    }

    #[test]
    fn jitter_never_reorders_a_pair() {
        let mut bus = LocalBus::with_seed(3);
        bus.set_link(
            1,
            2,
            LinkConditions {
                delay_ticks: 2,
                jitter_ticks: 5,
                loss_percent: 0.0,
            },
        );
        for (tick, entity) in (1..=20).enumerate() {
            bus.send(envelope(1, 2, entity), tick as u64).unwrap();
        }
        let order: Vec<u32> = bus.take_due(1000).iter().map(entity_of).collect();
        assert_eq!(order, (1..=20).collect::<Vec<_>>());
    }

    #[test]
    fn full_loss_only_drops_position_streams() {
        let mut bus = LocalBus::new();
        bus.set_link(
            1,
            2,
            LinkConditions {
                loss_percent: 100.0,
                ..LinkConditions::default()
            },
        );
        let volatile = CellMessage::GhostVolatileUpdate {
            entity: 5,
            position: [0.0; 3],
            direction: [0.0; 3],
            on_ground: true,
        };
        bus.send(Envelope::new(1, 2, volatile), 0).unwrap();
        bus.send(envelope(1, 2, 1), 0).unwrap();
        bus.send(envelope(2, 1, 2), 0).unwrap();
        let due: Vec<u32> = bus.take_due(10).iter().map(entity_of).collect();
        assert_eq!(due, vec![1, 2]);
        assert_eq!(bus.stats().dropped, 1);
    }
}
