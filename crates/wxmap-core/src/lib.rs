//! wxmap-core: pure domain types for the weather telemetry pipeline.
//! Topic/partition identifiers, the message schema at the ingestion
//! boundary, and the marker derivation used by the display layer.
//! No IO, no async.

pub mod marker;
pub mod types;

pub use marker::{LngLat, Marker, MarkerId, MarkerLabel, celsius_to_fahrenheit};
pub use types::{CoreError, DEFAULT_TOPIC, Envelope, Message, PartitionId, Topic};
