//! Simulated vehicle fleet publishing readings to an in-process broker.

use std::time::Duration;

use rand::Rng;
use tokio::task::JoinHandle;
use tokio::time::interval;

use wxmap_core::{Message, PartitionId, Topic};
use wxmap_gateway::MemoryNetwork;

/// Publish one random reading per tick to a random partition of `topic`.
pub fn spawn_publisher(
    net: MemoryNetwork,
    topic: Topic,
    partitions: u32,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if partitions == 0 {
            tracing::warn!("demo topic has no partitions, publishing nothing");
            return;
        }
        let mut ticker = interval(every.max(Duration::from_millis(1)));
        loop {
            ticker.tick().await;
            let (partition, msg) = {
                let mut rng = rand::rng();
                (
                    PartitionId::new(rng.random_range(0..partitions)),
                    random_reading(&mut rng),
                )
            };
            let reached = net.publish(&topic, partition, msg);
            tracing::trace!(%partition, reached, "demo reading published");
        }
    })
}

/// A plausible surface reading somewhere between the polar circles.
pub fn random_reading<R: Rng + ?Sized>(rng: &mut R) -> Message {
    let ambient_temp = round1(rng.random_range(-25.0..45.0));
    let latitude = round4(rng.random_range(-60.0..66.0));
    let longitude = round4(rng.random_range(-180.0..180.0));
    Message::new(ambient_temp, latitude, longitude)
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

fn round4(v: f64) -> f64 {
    (v * 10_000.0).round() / 10_000.0
}
