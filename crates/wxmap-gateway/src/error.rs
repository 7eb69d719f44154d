//! Error types for the ingestion gateway and its transports.

use thiserror::Error;
use wxmap_core::{CoreError, PartitionId, Topic};

/// Failure raised by a network backend.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("partition discovery failed: {0}")]
    Discovery(String),

    #[error("subscribe failed: {0}")]
    Subscribe(String),

    #[error("undecodable frame: {0}")]
    Decode(#[from] CoreError),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Failure surfaced by the gateway, either from `start` or via the error sink.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("client identity generation failed: {0}")]
    Identity(String),

    #[error("client connection failed: {0}")]
    Connect(#[source] TransportError),

    #[error("partition discovery for {topic} failed: {source}")]
    Discovery {
        topic: Topic,
        #[source]
        source: TransportError,
    },

    #[error("subscription to partition {partition} failed: {source}")]
    Subscribe {
        partition: PartitionId,
        #[source]
        source: TransportError,
    },

    #[error("delivery on partition {partition} failed: {source}")]
    Delivery {
        partition: PartitionId,
        #[source]
        source: TransportError,
    },
}

impl GatewayError {
    /// Partition the failure is scoped to, if any.
    pub fn partition(&self) -> Option<PartitionId> {
        match self {
            Self::Subscribe { partition, .. } | Self::Delivery { partition, .. } => {
                Some(*partition)
            }
            _ => None,
        }
    }

    /// Whether the failure prevents the gateway from ever delivering data.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Identity(_) | Self::Connect(_) | Self::Discovery { .. }
        )
    }
}
