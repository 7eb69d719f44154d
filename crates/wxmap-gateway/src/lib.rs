//! wxmap-gateway: stream ingestion for one pub/sub topic.
//! Generates an ephemeral client identity, discovers every partition of the
//! topic, opens one subscription per partition and fans all deliveries in to
//! a single consumer handler. Failures surface through an [`ErrorSink`].

pub mod error;
pub mod gateway;
pub mod identity;
pub mod memory;
pub mod sink;
pub mod transport;
pub mod ws;

pub use error::{GatewayError, TransportError};
pub use gateway::{Gateway, GatewayHandle, GatewayState, GatewayStatus, Subscription};
pub use identity::ClientIdentity;
pub use memory::MemoryNetwork;
pub use sink::{ErrorSink, TracingSink};
pub use transport::{PartitionStream, Transport};
pub use ws::{WsConfig, WsTransport};

pub use wxmap_core::types;
