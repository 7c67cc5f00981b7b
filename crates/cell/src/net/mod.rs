mod bus;
mod directory;
mod message;
mod stats;

pub use bus::LocalBus;
pub use directory::{ClusterDirectory, Directory};
pub use message::{CallResult, CellMessage, Envelope, ReplyHandle};
pub use stats::{BusStats, LinkConditions, XorShift};
