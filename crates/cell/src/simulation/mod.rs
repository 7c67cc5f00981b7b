mod tick;

pub use tick::{ClusterLoop, TickClock};
