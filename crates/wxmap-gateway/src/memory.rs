//! In-process pub/sub broker.
//!
//! Topics hold a fixed number of partitions; each partition fans published
//! frames out to every live subscriber through unbounded channels, so publish
//! order is preserved per subscriber and nothing is dropped. Connection and
//! per-partition subscribe failures can be injected.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::mpsc;

use wxmap_core::{Envelope, Message, PartitionId, Topic};

use crate::error::TransportError;
use crate::identity::ClientIdentity;
use crate::transport::{PartitionStream, Transport};

#[derive(Debug, Default)]
struct TopicState {
    /// Subscriber senders per partition, indexed by partition number.
    partitions: Vec<Vec<mpsc::UnboundedSender<String>>>,
}

#[derive(Debug, Default)]
struct Inner {
    topics: HashMap<Topic, TopicState>,
    failing_partitions: HashSet<PartitionId>,
    connect_failure: Option<String>,
    discovery_failure: Option<String>,
    connected: Vec<String>,
}

/// Cloneable handle to a shared in-memory broker.
#[derive(Debug, Clone, Default)]
pub struct MemoryNetwork {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panicking test thread must not wedge every other subscriber.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ── Setup ─────────────────────────────────────────────────────────

    /// Create (or replace) `topic` with `partitions` partitions.
    pub fn create_topic(&self, topic: &Topic, partitions: u32) {
        let state = TopicState {
            partitions: (0..partitions).map(|_| Vec::new()).collect(),
        };
        self.lock().topics.insert(topic.clone(), state);
    }

    /// Make every future subscribe to `partition` fail.
    pub fn fail_partition(&self, partition: PartitionId) {
        self.lock().failing_partitions.insert(partition);
    }

    /// Make every future connect fail with `reason`.
    pub fn fail_connect(&self, reason: impl Into<String>) {
        self.lock().connect_failure = Some(reason.into());
    }

    /// Make every future partition lookup fail with `reason`.
    pub fn fail_discovery(&self, reason: impl Into<String>) {
        self.lock().discovery_failure = Some(reason.into());
    }

    // ── Publishing ────────────────────────────────────────────────────

    /// Publish a reading. Returns the number of subscribers reached.
    pub fn publish(&self, topic: &Topic, partition: PartitionId, msg: Message) -> usize {
        match Envelope::new(msg).encode() {
            Ok(frame) => self.publish_raw(topic, partition, frame),
            Err(_) => 0,
        }
    }

    /// Publish a raw text frame, exactly as it would arrive off the wire.
    pub fn publish_raw(
        &self,
        topic: &Topic,
        partition: PartitionId,
        frame: impl Into<String>,
    ) -> usize {
        let frame = frame.into();
        let mut inner = self.lock();
        let Some(subscribers) = inner
            .topics
            .get_mut(topic)
            .and_then(|t| t.partitions.get_mut(partition.index() as usize))
        else {
            return 0;
        };
        subscribers.retain(|tx| tx.send(frame.clone()).is_ok());
        subscribers.len()
    }

    /// Close every open stream on `partition`, as a broker restart would.
    pub fn end_partition(&self, topic: &Topic, partition: PartitionId) {
        if let Some(subscribers) = self
            .lock()
            .topics
            .get_mut(topic)
            .and_then(|t| t.partitions.get_mut(partition.index() as usize))
        {
            subscribers.clear();
        }
    }

    // ── Inspection ────────────────────────────────────────────────────

    /// Live subscribers on `partition` (closed receivers excluded).
    pub fn subscriber_count(&self, topic: &Topic, partition: PartitionId) -> usize {
        self.lock()
            .topics
            .get(topic)
            .and_then(|t| t.partitions.get(partition.index() as usize))
            .map_or(0, |subs| subs.iter().filter(|tx| !tx.is_closed()).count())
    }

    /// Fingerprints of currently connected clients.
    pub fn connected_clients(&self) -> Vec<String> {
        self.lock().connected.clone()
    }
}

#[async_trait]
impl Transport for MemoryNetwork {
    async fn connect(&self, identity: &ClientIdentity) -> Result<(), TransportError> {
        let mut inner = self.lock();
        if let Some(reason) = &inner.connect_failure {
            return Err(TransportError::Connect(reason.clone()));
        }
        inner.connected.push(identity.fingerprint().to_owned());
        Ok(())
    }

    async fn partitions(&self, topic: &Topic) -> Result<Vec<PartitionId>, TransportError> {
        let inner = self.lock();
        if let Some(reason) = &inner.discovery_failure {
            return Err(TransportError::Discovery(reason.clone()));
        }
        let state = inner
            .topics
            .get(topic)
            .ok_or_else(|| TransportError::Discovery(format!("unknown topic {topic}")))?;
        Ok((0..state.partitions.len() as u32)
            .map(PartitionId::new)
            .collect())
    }

    async fn subscribe(
        &self,
        topic: &Topic,
        partition: PartitionId,
    ) -> Result<PartitionStream, TransportError> {
        let mut inner = self.lock();
        if inner.failing_partitions.contains(&partition) {
            return Err(TransportError::Subscribe(format!(
                "partition {partition} refused subscription"
            )));
        }
        let subscribers = inner
            .topics
            .get_mut(topic)
            .and_then(|t| t.partitions.get_mut(partition.index() as usize))
            .ok_or_else(|| {
                TransportError::Subscribe(format!("no partition {partition} on {topic}"))
            })?;

        let (tx, rx) = mpsc::unbounded_channel();
        subscribers.push(tx);

        let stream = futures_util::stream::unfold(rx, |mut rx| async move {
            let frame = rx.recv().await?;
            Some((Envelope::decode(&frame).map_err(TransportError::from), rx))
        });
        Ok(stream.boxed())
    }

    async fn disconnect(&self) {
        self.lock().connected.clear();
    }
}
