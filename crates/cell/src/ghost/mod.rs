mod delta;
mod router;

pub use delta::ghost_deltas;
pub use router::{GhostRouter, Route, RouteKind};
