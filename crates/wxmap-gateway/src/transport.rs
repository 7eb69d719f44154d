//! Transport trait: the network boundary of the gateway.
//! Enables in-process backends for testing and the demo mode.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use wxmap_core::{Envelope, PartitionId, Topic};

use crate::error::TransportError;
use crate::identity::ClientIdentity;

/// Live per-partition delivery stream, in publish order.
///
/// An `Err` item is a recoverable delivery failure; the stream ending means
/// the partition will deliver nothing further.
pub type PartitionStream = BoxStream<'static, Result<Envelope, TransportError>>;

/// A pub/sub network backend.
///
/// Every method except `disconnect` is a suspension point with no timeout.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Authenticate with the network using `identity`.
    async fn connect(&self, identity: &ClientIdentity) -> Result<(), TransportError>;

    /// Resolve the current partition set of `topic`. May be empty.
    async fn partitions(&self, topic: &Topic) -> Result<Vec<PartitionId>, TransportError>;

    /// Open a live subscription to a single partition.
    async fn subscribe(
        &self,
        topic: &Topic,
        partition: PartitionId,
    ) -> Result<PartitionStream, TransportError>;

    /// Release client-level resources. Open streams are dropped separately.
    async fn disconnect(&self) {}
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn connect(&self, identity: &ClientIdentity) -> Result<(), TransportError> {
        (**self).connect(identity).await
    }

    async fn partitions(&self, topic: &Topic) -> Result<Vec<PartitionId>, TransportError> {
        (**self).partitions(topic).await
    }

    async fn subscribe(
        &self,
        topic: &Topic,
        partition: PartitionId,
    ) -> Result<PartitionStream, TransportError> {
        (**self).subscribe(topic, partition).await
    }

    async fn disconnect(&self) {
        (**self).disconnect().await
    }
}
