//! Gateway: authenticates one client, resolves every partition of the topic,
//! opens one subscription per partition and fans all deliveries in to a
//! single handler.
//!
//! Each partition is drained by its own delivery task, so messages of one
//! partition reach the handler strictly in arrival order while different
//! partitions may interleave (or run concurrently on a multi-thread
//! runtime). Subscription failures are isolated per partition and reported
//! through the [`ErrorSink`]; nothing is retried.

use std::sync::Arc;

use futures_util::StreamExt;
use futures_util::future::join_all;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use wxmap_core::{Message, PartitionId, Topic};

use crate::error::GatewayError;
use crate::identity::ClientIdentity;
use crate::sink::{ErrorSink, TracingSink};
use crate::transport::{PartitionStream, Transport};

/// Consumer callback shared by every delivery task.
type MessageHandler = Arc<dyn Fn(Message) + Send + Sync>;

// ─── Status ──────────────────────────────────────────────────────────

/// Lifecycle position of the gateway.
///
/// Errors do not move the state: they bump [`GatewayStatus::errors`] and
/// leave already-open partitions delivering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum GatewayState {
    Uninitialized,
    Authenticating,
    Resolved { partitions: usize },
    Subscribed { partitions: usize, open: usize },
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GatewayStatus {
    pub state: GatewayState,
    pub topic: String,
    /// Fingerprint of the current client identity.
    pub client: Option<String>,
    /// Failures reported through the error sink since construction.
    pub errors: u64,
    pub last_error: Option<String>,
}

impl GatewayStatus {
    pub fn is_errored(&self) -> bool {
        self.errors > 0
    }
}

/// Error sink wrapper that also records failures in the status channel.
#[derive(Clone)]
struct Reporter {
    sink: Arc<dyn ErrorSink>,
    status: Arc<watch::Sender<GatewayStatus>>,
}

impl Reporter {
    fn report(&self, error: &GatewayError) {
        self.status.send_modify(|s| {
            s.errors += 1;
            s.last_error = Some(error.to_string());
        });
        self.sink.report(error);
    }

    fn set_state(&self, state: GatewayState) {
        self.status.send_modify(|s| s.state = state);
    }

    fn partition_closed(&self) {
        self.status.send_modify(|s| {
            if let GatewayState::Subscribed { open, .. } = &mut s.state {
                *open = open.saturating_sub(1);
            }
        });
    }
}

// ─── Gateway ─────────────────────────────────────────────────────────

/// Not yet started gateway for one topic.
///
/// [`Gateway::start`] consumes it; the returned [`GatewayHandle`] owns every
/// resource the gateway opened.
pub struct Gateway {
    topic: Topic,
    transport: Arc<dyn Transport>,
    reporter: Reporter,
}

impl Gateway {
    /// Create a gateway that logs failures through [`TracingSink`].
    pub fn new(topic: Topic, transport: Arc<dyn Transport>) -> Self {
        let (status, _) = watch::channel(GatewayStatus {
            state: GatewayState::Uninitialized,
            topic: topic.to_string(),
            client: None,
            errors: 0,
            last_error: None,
        });
        Self {
            topic,
            transport,
            reporter: Reporter {
                sink: Arc::new(TracingSink),
                status: Arc::new(status),
            },
        }
    }

    /// Replace the error sink.
    #[must_use]
    pub fn with_error_sink(mut self, sink: impl ErrorSink + 'static) -> Self {
        self.reporter.sink = Arc::new(sink);
        self
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Observe lifecycle and error counters, including while `start` is
    /// still suspended.
    pub fn status(&self) -> watch::Receiver<GatewayStatus> {
        self.reporter.status.subscribe()
    }

    /// Generate a fresh identity, connect, resolve partitions and subscribe
    /// to all of them.
    ///
    /// Fails only if identity generation, connection or partition discovery
    /// fails; those failures are also reported to the sink. Each failed
    /// partition subscription produces exactly one sink notification and is
    /// left out of the handle.
    pub async fn start<H>(self, handler: H) -> Result<GatewayHandle, GatewayError>
    where
        H: Fn(Message) + Send + Sync + 'static,
    {
        let handler: MessageHandler = Arc::new(handler);
        self.reporter.set_state(GatewayState::Authenticating);

        let identity = ClientIdentity::generate().map_err(|e| self.fatal(e))?;
        self.reporter
            .status
            .send_modify(|s| s.client = Some(identity.fingerprint().to_owned()));

        self.transport
            .connect(&identity)
            .await
            .map_err(|e| self.fatal(GatewayError::Connect(e)))?;
        tracing::info!(
            topic = %self.topic,
            client = identity.fingerprint(),
            "pub/sub client connected"
        );

        let partitions = self.transport.partitions(&self.topic).await.map_err(|source| {
            self.fatal(GatewayError::Discovery {
                topic: self.topic.clone(),
                source,
            })
        })?;
        self.reporter.set_state(GatewayState::Resolved {
            partitions: partitions.len(),
        });
        tracing::info!(topic = %self.topic, partitions = partitions.len(), "partitions resolved");

        let attempts = partitions.iter().map(|&partition| {
            let transport = &self.transport;
            let topic = &self.topic;
            async move { (partition, transport.subscribe(topic, partition).await) }
        });

        let mut opened = Vec::with_capacity(partitions.len());
        for (partition, result) in join_all(attempts).await {
            match result {
                Ok(stream) => {
                    tracing::debug!(%partition, "subscribed");
                    opened.push((partition, stream));
                }
                Err(source) => {
                    self.reporter
                        .report(&GatewayError::Subscribe { partition, source });
                }
            }
        }

        // Publish the open count before any delivery task can decrement it.
        self.reporter.set_state(GatewayState::Subscribed {
            partitions: partitions.len(),
            open: opened.len(),
        });
        let subscriptions: Vec<Subscription> = opened
            .into_iter()
            .map(|(partition, stream)| {
                Subscription::spawn(
                    partition,
                    stream,
                    Arc::clone(&handler),
                    self.reporter.clone(),
                )
            })
            .collect();
        tracing::info!(
            topic = %self.topic,
            open = subscriptions.len(),
            partitions = partitions.len(),
            "gateway ready"
        );

        Ok(GatewayHandle {
            topic: self.topic,
            identity,
            subscriptions,
            transport: self.transport,
            reporter: self.reporter,
            stopped: false,
        })
    }

    fn fatal(&self, error: GatewayError) -> GatewayError {
        self.reporter.report(&error);
        error
    }
}

// ─── Handle ──────────────────────────────────────────────────────────

/// Started gateway: the client identity plus every open subscription.
pub struct GatewayHandle {
    topic: Topic,
    identity: ClientIdentity,
    subscriptions: Vec<Subscription>,
    transport: Arc<dyn Transport>,
    reporter: Reporter,
    stopped: bool,
}

impl GatewayHandle {
    pub fn identity(&self) -> &ClientIdentity {
        &self.identity
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    pub fn subscriptions(&self) -> &[Subscription] {
        &self.subscriptions
    }

    /// Mutable access for closing individual subscriptions.
    pub fn subscriptions_mut(&mut self) -> &mut [Subscription] {
        &mut self.subscriptions
    }

    pub fn status(&self) -> watch::Receiver<GatewayStatus> {
        self.reporter.status.subscribe()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Close every subscription and disconnect the client. Idempotent.
    pub async fn stop(&mut self) {
        if self.stopped {
            return;
        }
        for subscription in &mut self.subscriptions {
            subscription.close().await;
        }
        self.transport.disconnect().await;
        self.stopped = true;
        self.reporter.set_state(GatewayState::Stopped);
        tracing::info!(topic = %self.topic, "gateway stopped");
    }
}

// ─── Subscription ────────────────────────────────────────────────────

/// Live binding to one partition, drained by a dedicated delivery task.
///
/// Dropping without [`Subscription::close`] cancels the task without
/// waiting for it.
pub struct Subscription {
    partition: PartitionId,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    fn spawn(
        partition: PartitionId,
        stream: PartitionStream,
        handler: MessageHandler,
        reporter: Reporter,
    ) -> Self {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(deliver(
            partition,
            stream,
            handler,
            reporter,
            cancel.clone(),
        ));
        Self {
            partition,
            cancel,
            task: Some(task),
        }
    }

    pub fn partition(&self) -> PartitionId {
        self.partition
    }

    /// Whether the delivery task is still running.
    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop delivery for this partition. Once this returns the handler is
    /// never invoked again for it. Idempotent.
    ///
    /// Must not be awaited from inside the message handler.
    pub async fn close(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!(partition = %self.partition, "delivery task ended abnormally: {e}");
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("partition", &self.partition)
            .field("active", &self.is_active())
            .finish()
    }
}

async fn deliver(
    partition: PartitionId,
    mut stream: PartitionStream,
    handler: MessageHandler,
    reporter: Reporter,
    cancel: CancellationToken,
) {
    loop {
        // Cancellation wins over a ready frame so close() is final.
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            next = stream.next() => next,
        };
        match next {
            Some(Ok(envelope)) => handler(envelope.into_message()),
            Some(Err(source)) => reporter.report(&GatewayError::Delivery { partition, source }),
            None => {
                tracing::info!(%partition, "partition stream ended");
                break;
            }
        }
    }
    reporter.partition_closed();
}

// ─── Tests ───────────────────────────────────────────────────────────
