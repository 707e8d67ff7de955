//! In-memory message broker.
//!
//! Each subscription owns an unbounded FIFO queue drained by its own
//! dispatcher task, so publish order is preserved per subscription and a
//! slow or failing handler never blocks other subscribers.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use tokio::sync::{Notify, mpsc};
use tracing::{debug, error, warn};

use agentweave_protocols::{
    Message, MessageBroker, MessageError, MessageTransform, MessageType, Subscription,
    SubscriptionId, generate_id,
};

/// Broker tuning.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Queue depth above which a subscription's backlog is logged.
    pub queue_warn_threshold: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            queue_warn_threshold: 1000,
        }
    }
}

/// Snapshot of broker counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BrokerStats {
    pub published: u64,
    pub delivered: u64,
    pub failed: u64,
    pub undeliverable: u64,
    pub expired: u64,
    pub subscriptions: usize,
    pub in_flight: usize,
}

struct SubscriptionEntry {
    subscription: Subscription,
    sender: mpsc::UnboundedSender<Message>,
    queued: Arc<AtomicUsize>,
    /// Creation sequence, used for deterministic fan-out order.
    seq: u64,
}

#[derive(Default)]
struct Counters {
    published: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    undeliverable: AtomicU64,
    expired: AtomicU64,
}

struct BrokerInner {
    config: BrokerConfig,
    subscriptions: DashMap<SubscriptionId, SubscriptionEntry>,
    transforms: RwLock<Vec<Arc<dyn MessageTransform>>>,
    closed: AtomicBool,
    next_seq: AtomicU64,
    in_flight: AtomicUsize,
    idle: Notify,
    counters: Counters,
}

impl BrokerInner {
    fn transforms(&self) -> Vec<Arc<dyn MessageTransform>> {
        self.transforms.read().clone()
    }

    fn finish_delivery(&self) {
        if self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}

/// Addressable pub/sub broker living entirely in process memory.
#[derive(Clone)]
pub struct InMemoryBroker {
    inner: Arc<BrokerInner>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::with_config(BrokerConfig::default())
    }

    pub fn with_config(config: BrokerConfig) -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                config,
                subscriptions: DashMap::new(),
                transforms: RwLock::new(Vec::new()),
                closed: AtomicBool::new(false),
                next_seq: AtomicU64::new(0),
                in_flight: AtomicUsize::new(0),
                idle: Notify::new(),
                counters: Counters::default(),
            }),
        }
    }

    /// Append a transform. Outbound hooks run in insertion order on publish,
    /// inbound hooks run in insertion order before each handler call.
    pub fn add_transform(&self, transform: Arc<dyn MessageTransform>) {
        debug!("Broker transform added: {}", transform.name());
        self.inner.transforms.write().push(transform);
    }

    pub fn stats(&self) -> BrokerStats {
        let c = &self.inner.counters;
        BrokerStats {
            published: c.published.load(Ordering::Relaxed),
            delivered: c.delivered.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            undeliverable: c.undeliverable.load(Ordering::Relaxed),
            expired: c.expired.load(Ordering::Relaxed),
            subscriptions: self.inner.subscriptions.len(),
            in_flight: self.inner.in_flight.load(Ordering::SeqCst),
        }
    }

    pub fn subscription_count(&self) -> usize {
        self.inner.subscriptions.len()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Wait until every queued delivery has been handled.
    ///
    /// Messages published by handlers while flushing are waited for too.
    pub async fn flush(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.inner.in_flight.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    fn spawn_dispatcher(
        &self,
        id: SubscriptionId,
        subscription: Subscription,
        mut receiver: mpsc::UnboundedReceiver<Message>,
        queued: Arc<AtomicUsize>,
    ) {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            while let Some(message) = receiver.recv().await {
                queued.fetch_sub(1, Ordering::SeqCst);
                let message_id = message.id.clone();
                match apply_inbound(&inner.transforms(), message).await {
                    Ok(message) => match subscription.handler.handle(&message).await {
                        Ok(()) => {
                            inner.counters.delivered.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => {
                            inner.counters.failed.fetch_add(1, Ordering::Relaxed);
                            error!(
                                "Handler for {} on subscription {} failed: {}",
                                subscription.message_type, id, e
                            );
                        }
                    },
                    Err(e) => {
                        inner.counters.failed.fetch_add(1, Ordering::Relaxed);
                        error!("Inbound transform rejected {}: {}", message_id, e);
                    }
                }
                inner.finish_delivery();
            }
            debug!("Dispatcher for subscription {} stopped", id);
        });
    }
}

async fn apply_inbound(
    transforms: &[Arc<dyn MessageTransform>],
    mut message: Message,
) -> Result<Message, MessageError> {
    for transform in transforms {
        message = transform.inbound(message).await?;
    }
    Ok(message)
}

#[async_trait]
impl MessageBroker for InMemoryBroker {
    async fn publish(&self, message: Message) -> Result<(), MessageError> {
        if self.is_closed() {
            return Err(MessageError::BrokerClosed);
        }
        message.validate()?;

        if message.is_expired() {
            self.inner.counters.expired.fetch_add(1, Ordering::Relaxed);
            debug!("Dropping expired message {}", message.id);
            return Ok(());
        }

        let mut message = message;
        for transform in self.inner.transforms() {
            message = transform
                .outbound(message)
                .await
                .map_err(|e| MessageError::Transform(format!("{}: {}", transform.name(), e)))?;
        }

        let mut targets: Vec<(u64, SubscriptionId, mpsc::UnboundedSender<Message>, Arc<AtomicUsize>)> =
            self.inner
                .subscriptions
                .iter()
                .filter(|entry| entry.subscription.accepts(&message))
                .map(|entry| {
                    (
                        entry.seq,
                        entry.key().clone(),
                        entry.sender.clone(),
                        entry.queued.clone(),
                    )
                })
                .collect();
        targets.sort_by_key(|(seq, ..)| *seq);

        self.inner.counters.published.fetch_add(1, Ordering::Relaxed);

        if targets.is_empty() {
            if let Some(recipient) = &message.recipient {
                self.inner
                    .counters
                    .undeliverable
                    .fetch_add(1, Ordering::Relaxed);
                warn!(
                    "No subscriber {} for {} message {}",
                    recipient, message.message_type, message.id
                );
                return Err(MessageError::Undeliverable {
                    recipient: recipient.clone(),
                    message_type: message.message_type.clone(),
                });
            }
            debug!("Broadcast {} {} had no subscribers", message.message_type, message.id);
            return Ok(());
        }

        debug!(
            "Publishing {} {} from {} to {} subscription(s)",
            message.message_type,
            message.id,
            message.sender,
            targets.len()
        );

        for (_, id, sender, queued) in targets {
            self.inner.in_flight.fetch_add(1, Ordering::SeqCst);
            let depth = queued.fetch_add(1, Ordering::SeqCst) + 1;
            if depth > self.inner.config.queue_warn_threshold {
                warn!("Subscription {} backlog at {} messages", id, depth);
            }
            if sender.send(message.clone()).is_err() {
                // Subscription removed between snapshot and send.
                queued.fetch_sub(1, Ordering::SeqCst);
                self.inner.finish_delivery();
            }
        }
        Ok(())
    }

    async fn subscribe(&self, subscription: Subscription) -> Result<SubscriptionId, MessageError> {
        if self.is_closed() {
            return Err(MessageError::BrokerClosed);
        }
        let id = generate_id();
        let (sender, receiver) = mpsc::unbounded_channel();
        let queued = Arc::new(AtomicUsize::new(0));
        debug!(
            "Subscription {} for {} on {}",
            id, subscription.subscriber_id, subscription.message_type
        );
        self.spawn_dispatcher(id.clone(), subscription.clone(), receiver, queued.clone());
        self.inner.subscriptions.insert(
            id.clone(),
            SubscriptionEntry {
                subscription,
                sender,
                queued,
                seq: self.inner.next_seq.fetch_add(1, Ordering::Relaxed),
            },
        );
        Ok(id)
    }

    async fn unsubscribe(&self, id: &str) -> Result<(), MessageError> {
        // Dropping the sender lets the dispatcher drain what is queued.
        self.inner
            .subscriptions
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| MessageError::SubscriptionNotFound(id.to_string()))
    }

    async fn unsubscribe_type(
        &self,
        subscriber_id: &str,
        message_type: &MessageType,
    ) -> Result<usize, MessageError> {
        let mut removed = 0;
        self.inner.subscriptions.retain(|_, entry| {
            let matches = entry.subscription.subscriber_id == subscriber_id
                && &entry.subscription.message_type == message_type;
            if matches {
                removed += 1;
            }
            !matches
        });
        Ok(removed)
    }

    async fn close(&self) -> Result<(), MessageError> {
        if !self.inner.closed.swap(true, Ordering::SeqCst) {
            self.inner.subscriptions.clear();
            debug!("Broker closed");
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "broker_tests.rs"]
mod tests;
