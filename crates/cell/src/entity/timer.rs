use std::collections::BTreeMap;

use rkyv::{Archive, Deserialize, Serialize};

use crate::types::TimerId;

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct ScriptTimer {
    pub id: TimerId,
    pub remaining_ticks: u32,
    /// Zero for one-shot timers.
    pub interval_ticks: u32,
    pub user_arg: i32,
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct TimerSet {
    next_id: TimerId,
    timers: BTreeMap<TimerId, ScriptTimer>,
}

impl Default for TimerSet {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerSet {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            timers: BTreeMap::new(),
        }
    }

    pub fn add(&mut self, initial_ticks: u32, interval_ticks: u32, user_arg: i32) -> TimerId {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1).max(1);
        self.timers.insert(
            id,
            ScriptTimer {
                id,
                remaining_ticks: initial_ticks.max(1),
                interval_ticks,
                user_arg,
            },
        );
        id
    }

    pub fn cancel(&mut self, id: TimerId) -> bool {
        self.timers.remove(&id).is_some()
    }

    /// Counts every timer down by one tick and returns the ones that fired.
    pub fn advance(&mut self) -> Vec<(TimerId, i32)> {
        let mut fired = Vec::new();
        let mut finished = Vec::new();
        for timer in self.timers.values_mut() {
            timer.remaining_ticks = timer.remaining_ticks.saturating_sub(1);
            if timer.remaining_ticks > 0 {
                continue;
            }
            fired.push((timer.id, timer.user_arg));
            if timer.interval_ticks > 0 {
                timer.remaining_ticks = timer.interval_ticks;
            } else {
                finished.push(timer.id);
            }
        }
        for id in finished {
            self.timers.remove(&id);
        }
        fired
    }

    pub fn get(&self, id: TimerId) -> Option<&ScriptTimer> {
        self.timers.get(&id)
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_shot_fires_once() {
        let mut timers = TimerSet::new();
        let id = timers.add(2, 0, 7);
        assert!(timers.advance().is_empty());
        assert_eq!(timers.advance(), vec![(id, 7)]);
        assert!(timers.is_empty());
    }

    #[test]
    fn repeating_timer_rearms() {
        let mut timers = TimerSet::new();
        let id = timers.add(1, 2, 0);
        assert_eq!(timers.advance().len(), 1);
        assert!(timers.advance().is_empty());
        assert_eq!(timers.advance(), vec![(id, 0)]);
        assert!(timers.cancel(id));
        assert!(!timers.cancel(id));
    }
}
