//! Fan-out of signal packets to live subscribers.
//!
//! Subscribers only see packets published while they are registered; there
//! is no replay buffer here (the status board keeps the recent history).

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::error::EngineError;
use crate::logging::{log, log_transport_failure, obj, v_num, Domain, Level};
use crate::model::{SignalPacket, WirePacket};
use crate::shutdown::Shutdown;

#[derive(Default)]
struct Registry {
    next_id: u64,
    subscribers: BTreeMap<u64, mpsc::Sender<WirePacket>>,
}

fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone)]
pub struct SignalBroadcaster {
    registry: Arc<Mutex<Registry>>,
    buffer: usize,
}

/// Receiving end for one consumer. Dropping it unregisters the consumer.
pub struct Subscription {
    id: u64,
    rx: mpsc::Receiver<WirePacket>,
    registry: Weak<Mutex<Registry>>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next packet, or `None` once the broadcaster is gone.
    pub async fn recv(&mut self) -> Option<WirePacket> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<WirePacket> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            lock(&registry).subscribers.remove(&self.id);
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct PublishReport {
    pub delivered: usize,
    /// Slow consumers whose queue was full; they miss this packet only.
    pub dropped: usize,
    /// Consumers removed because their queue was closed.
    pub failures: Vec<EngineError>,
}

impl PublishReport {
    pub fn disconnected(&self) -> usize {
        self.failures.len()
    }

    fn absorb(&mut self, other: PublishReport) {
        self.delivered += other.delivered;
        self.dropped += other.dropped;
        self.failures.extend(other.failures);
    }
}

/// Result of a paced burst.
#[derive(Debug, Default, Clone)]
pub struct PacedPublish {
    /// Packets actually published, stamped with their emission time.
    pub sent: Vec<SignalPacket>,
    pub report: PublishReport,
    /// Shutdown arrived at a pacing point before every packet went out.
    pub cancelled: bool,
}

impl SignalBroadcaster {
    /// `buffer` is the per-subscriber queue depth.
    pub fn new(buffer: usize) -> Self {
        Self { registry: Arc::new(Mutex::new(Registry::default())), buffer: buffer.max(1) }
    }

    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(self.buffer);
        let id = {
            let mut reg = lock(&self.registry);
            reg.next_id += 1;
            let id = reg.next_id;
            reg.subscribers.insert(id, tx);
            id
        };
        log(Level::Debug, Domain::Broadcast, "subscribed", obj(&[("subscriber", v_num(id as f64))]));
        Subscription { id, rx, registry: Arc::downgrade(&self.registry) }
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.registry).subscribers.len()
    }

    /// Deliver to everyone currently subscribed. Never blocks.
    pub fn publish(&self, packet: &SignalPacket) -> PublishReport {
        let wire = packet.to_wire();
        let mut report = PublishReport::default();
        let mut reg = lock(&self.registry);
        reg.subscribers.retain(|&id, tx| match tx.try_send(wire.clone()) {
            Ok(()) => {
                report.delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                report.dropped += 1;
                true
            }
            Err(TrySendError::Closed(_)) => {
                let reason = "subscriber queue closed".to_string();
                log_transport_failure(id, &reason);
                report.failures.push(EngineError::TransportFailure { subscriber: id, reason });
                false
            }
        });
        report
    }

    /// Publish `packets` in order with at least `pacing` between consecutive
    /// packets. Each pacing wait is a cancellation point.
    pub async fn publish_paced(
        &self,
        packets: Vec<SignalPacket>,
        pacing: Duration,
        shutdown: &mut Shutdown,
    ) -> PacedPublish {
        let mut out = PacedPublish::default();
        for (i, mut packet) in packets.into_iter().enumerate() {
            if i > 0 && !shutdown.sleep(pacing).await {
                out.cancelled = true;
                break;
            }
            packet.emitted_at = Utc::now();
            out.report.absorb(self.publish(&packet));
            out.sent.push(packet);
        }
        if out.report.dropped > 0 {
            log(
                Level::Warn,
                Domain::Broadcast,
                "slow_subscribers",
                obj(&[("dropped", v_num(out.report.dropped as f64))]),
            );
        }
        out
    }
}
