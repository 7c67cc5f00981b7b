use crate::cluster::Cluster;

/// Fixed-rate tick clock fed with wall-clock deltas.
#[derive(Debug, Clone)]
pub struct TickClock {
    tick_rate: u32,
    dt: f32,
    accumulator: f32,
    max_catch_up: u32,
}

impl TickClock {
    pub fn new(tick_rate: u32) -> Self {
        let tick_rate = tick_rate.max(1);
        Self {
            tick_rate,
            dt: 1.0 / tick_rate as f32,
            accumulator: 0.0,
            max_catch_up: 5,
        }
    }

    /// Caps how many ticks a single update may run after a stall.
    pub fn with_max_catch_up(mut self, ticks: u32) -> Self {
        self.max_catch_up = ticks.max(1);
        self
    }

    pub fn tick_rate(&self) -> u32 {
        self.tick_rate
    }

    pub fn dt(&self) -> f32 {
        self.dt
    }

    pub fn accumulate(&mut self, delta: f32) {
        let limit = self.dt * self.max_catch_up as f32;
        self.accumulator = (self.accumulator + delta.max(0.0)).min(limit);
    }

    pub fn should_tick(&self) -> bool {
        self.accumulator >= self.dt
    }

    pub fn consume_tick(&mut self) -> bool {
        if self.accumulator >= self.dt {
            self.accumulator -= self.dt;
            true
        } else {
            false
        }
    }

    pub fn reset(&mut self) {
        self.accumulator = 0.0;
    }
}

/// Runs a cluster at its configured rate from real elapsed time.
pub struct ClusterLoop {
    cluster: Cluster,
    clock: TickClock,
}

impl ClusterLoop {
    pub fn new(cluster: Cluster) -> Self {
        let clock = TickClock::new(cluster.config().tick_rate);
        Self { cluster, clock }
    }

    pub fn cluster(&self) -> &Cluster {
        &self.cluster
    }

    pub fn cluster_mut(&mut self) -> &mut Cluster {
        &mut self.cluster
    }

    pub fn clock(&self) -> &TickClock {
        &self.clock
    }

    /// Returns how many ticks ran.
    pub fn update(&mut self, delta: f32) -> u32 {
        self.clock.accumulate(delta);
        let mut ticks_run = 0;
        while self.clock.consume_tick() {
            self.cluster.tick();
            ticks_run += 1;
        }
        ticks_run
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_accumulation() {
        let mut clock = TickClock::new(10);
        clock.accumulate(0.25);
        assert!(clock.should_tick());
        assert!(clock.consume_tick());
        assert!(clock.consume_tick());
        assert!(!clock.consume_tick());
    }

    #[test]
    fn catch_up_is_bounded() {
        let mut clock = TickClock::new(10).with_max_catch_up(3);
        clock.accumulate(60.0);
        let mut ticks = 0;
        while clock.consume_tick() {
            ticks += 1;
        }
        assert_eq!(ticks, 3);
    }

    #[test]
    fn loop_ticks_the_cluster() {
        let mut driver = ClusterLoop::new(Cluster::new(
            crate::config::CellConfig::default(),
            crate::entity::EntityDefs::new(),
        ));
        assert_eq!(driver.update(0.21), 2);
        assert_eq!(driver.cluster().tick_count(), 2);
    }
}
