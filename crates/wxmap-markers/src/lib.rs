//! wxmap-markers: bounded, insertion-ordered marker collection.
//! Derives one marker per message, attaches it to a display surface and
//! evicts the oldest marker once the capacity is exceeded.

pub mod store;
pub mod surface;

pub use store::{Insertion, MAX_MARKERS, MarkerStore};
pub use surface::{DisplaySurface, RecordingSurface, SurfaceEvent};
