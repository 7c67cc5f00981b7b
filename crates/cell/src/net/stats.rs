use std::collections::BTreeMap;

#[derive(Debug, Clone, Default)]
pub struct LinkConditions {
    pub delay_ticks: u32,
    pub jitter_ticks: u32,
    pub loss_percent: f32,
}

impl LinkConditions {
    pub fn is_perfect(&self) -> bool {
        self.delay_ticks == 0 && self.jitter_ticks == 0 && self.loss_percent <= 0.0
    }
}

#[derive(Debug, Clone, Default)]
pub struct BusStats {
    pub sent: u64,
    pub delivered: u64,
    pub dropped: u64,
    pub bytes_sent: u64,
    pub by_message: BTreeMap<&'static str, u64>,
}

impl BusStats {
    pub fn record_send(&mut self, name: &'static str, bytes: usize) {
        self.sent += 1;
        self.bytes_sent += bytes as u64;
        *self.by_message.entry(name).or_default() += 1;
    }
}

/// Small deterministic generator for link simulation.
#[derive(Debug, Clone)]
pub struct XorShift {
    state: u64,
}

impl XorShift {
    pub fn new(seed: u64) -> Self {
        Self {
            state: seed.max(1),
        }
    }

    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    /// Uniform in [0, 100).
    pub fn percent(&mut self) -> f32 {
        (self.next_u64() % 10_000) as f32 / 100.0
    }

    pub fn below(&mut self, bound: u32) -> u32 {
        if bound == 0 {
            0
        } else {
            (self.next_u64() % bound as u64) as u32
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generator_stays_in_range() {
        let mut rng = XorShift::new(7);
        for _ in 0..1000 {
            let p = rng.percent();
            assert!((0.0..100.0).contains(&p));
            assert!(rng.below(3) < 3);
        }
        assert_eq!(rng.below(0), 0);
    }
}
