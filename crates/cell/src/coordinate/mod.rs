mod index;

pub use index::CoordinateIndex;
