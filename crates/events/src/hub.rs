//! In-process publish/subscribe hub with slow-consumer eviction.
//!
//! [`EventHub`] is a cheap, cloneable handle onto one coordinating task.
//! That task is the only code that touches the subscriber set: registration,
//! removal and fan-out are all messages to it, so a send to a subscriber can
//! never race that subscriber's removal.
//!
//! Delivery is best-effort and at-most-once:
//!
//! - the hub's inbound publish buffer is bounded; a publish into a full
//!   buffer is dropped and counted,
//! - each subscriber has a bounded outbound buffer; a subscriber whose buffer
//!   is full when an event arrives is evicted on the spot instead of slowing
//!   the publisher or its peers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use artifex_core::config::{DEFAULT_PUBLISH_BUFFER, DEFAULT_SUBSCRIBER_BUFFER};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::event::Event;

/// Identifier of one registered subscriber.
pub type SubscriberId = u64;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Buffer sizes for the hub.
#[derive(Debug, Clone, Copy)]
pub struct HubConfig {
    /// Capacity of each subscriber's outbound buffer.
    pub subscriber_buffer: usize,
    /// Capacity of the hub's inbound publish buffer.
    pub publish_buffer: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            subscriber_buffer: DEFAULT_SUBSCRIBER_BUFFER,
            publish_buffer: DEFAULT_PUBLISH_BUFFER,
        }
    }
}

/// A message delivered to a subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubMessage {
    /// One serialized [`Event`]. The same allocation is shared by every
    /// subscriber that received it.
    Event(Arc<str>),
    /// Keep-alive request for the underlying transport.
    Ping,
}

/// Why a subscriber stopped receiving messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The subscriber unregistered (its connection closed).
    ClientClosed,
    /// The subscriber's buffer was full when a message arrived.
    Evicted,
    /// The hub shut down.
    HubShutdown,
}

/// Result of handing an event to the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Accepted into the publish buffer.
    Queued,
    /// Dropped: the publish buffer was full or the hub has shut down.
    Dropped,
}

/// Snapshot of hub counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct HubStats {
    pub subscribers: usize,
    pub published: u64,
    pub delivered: u64,
    pub dropped: u64,
    pub evicted: u64,
}

/// The receiving end of one registration.
///
/// Dropping a subscription unregisters it.
pub struct Subscription {
    id: SubscriberId,
    receiver: mpsc::Receiver<HubMessage>,
    reason: Arc<OnceLock<DisconnectReason>>,
    dropped: CancellationToken,
    control: mpsc::UnboundedSender<Control>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Receive the next message. Returns `None` once the hub has dropped this
    /// subscriber and every buffered message has been read.
    pub async fn recv(&mut self) -> Option<HubMessage> {
        self.receiver.recv().await
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Result<HubMessage, mpsc::error::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Why the hub dropped this subscriber, if it has.
    pub fn disconnect_reason(&self) -> Option<DisconnectReason> {
        self.reason.get().copied()
    }

    /// Token cancelled the moment the hub drops this subscriber.
    ///
    /// Unlike [`recv`](Self::recv) it fires even while messages are still
    /// buffered, so a transport stuck writing to a peer can still be torn
    /// down.
    pub fn dropped_token(&self) -> CancellationToken {
        self.dropped.clone()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let _ = self.control.send(Control::Unregister(self.id));
    }
}

// ---------------------------------------------------------------------------
// Internals
// ---------------------------------------------------------------------------

enum Control {
    Register(Subscriber),
    Unregister(SubscriberId),
    Ping,
    Shutdown(oneshot::Sender<()>),
}

struct Subscriber {
    id: SubscriberId,
    sender: mpsc::Sender<HubMessage>,
    reason: Arc<OnceLock<DisconnectReason>>,
    dropped: CancellationToken,
}

impl Subscriber {
    /// Mark the subscriber disconnected and release its buffer. Dropping the
    /// sender closes the channel once the reader drains it.
    fn close(self, reason: DisconnectReason) {
        let _ = self.reason.set(reason);
        self.dropped.cancel();
    }
}

/// Outcome of one delivery attempt.
enum Delivery {
    Delivered,
    BufferFull,
    Closed,
}

fn deliver(subscriber: &Subscriber, message: HubMessage) -> Delivery {
    match subscriber.sender.try_send(message) {
        Ok(()) => Delivery::Delivered,
        Err(mpsc::error::TrySendError::Full(_)) => Delivery::BufferFull,
        Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Closed,
    }
}

#[derive(Default)]
struct Counters {
    subscribers: AtomicUsize,
    published: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
    evicted: AtomicU64,
}

// ---------------------------------------------------------------------------
// EventHub
// ---------------------------------------------------------------------------

/// Handle onto the hub's coordinating task.
#[derive(Clone)]
pub struct EventHub {
    publish_tx: mpsc::Sender<Event>,
    control_tx: mpsc::UnboundedSender<Control>,
    next_id: Arc<AtomicU64>,
    counters: Arc<Counters>,
    config: HubConfig,
}

impl EventHub {
    /// Spawn the coordinating task and return a handle to it.
    ///
    /// Must be called from within a Tokio runtime. The task exits when
    /// [`shutdown`](Self::shutdown) is called or every handle is dropped.
    pub fn start(config: HubConfig) -> Self {
        let config = HubConfig {
            subscriber_buffer: config.subscriber_buffer.max(1),
            publish_buffer: config.publish_buffer.max(1),
        };
        let (publish_tx, publish_rx) = mpsc::channel(config.publish_buffer);
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let counters = Arc::new(Counters::default());

        tokio::spawn(run(publish_rx, control_rx, Arc::clone(&counters)));
        tracing::debug!(
            subscriber_buffer = config.subscriber_buffer,
            publish_buffer = config.publish_buffer,
            "Event hub started"
        );

        Self {
            publish_tx,
            control_tx,
            next_id: Arc::new(AtomicU64::new(1)),
            counters,
            config,
        }
    }

    /// Register a new subscriber. Never blocks.
    ///
    /// If the hub has already shut down the returned subscription is closed
    /// immediately with [`DisconnectReason::HubShutdown`].
    pub fn register(&self) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel(self.config.subscriber_buffer);
        let reason = Arc::new(OnceLock::new());
        let dropped = CancellationToken::new();

        let subscriber = Subscriber {
            id,
            sender,
            reason: Arc::clone(&reason),
            dropped: dropped.clone(),
        };
        if let Err(mpsc::error::SendError(Control::Register(subscriber))) =
            self.control_tx.send(Control::Register(subscriber))
        {
            subscriber.close(DisconnectReason::HubShutdown);
        }

        Subscription {
            id,
            receiver,
            reason,
            dropped,
            control: self.control_tx.clone(),
        }
    }

    /// Remove a subscriber. Calling this for an unknown or already-removed id
    /// is a no-op.
    pub fn unregister(&self, id: SubscriberId) {
        let _ = self.control_tx.send(Control::Unregister(id));
    }

    /// Hand an event to the hub for fan-out. Never blocks.
    pub fn publish(&self, event: Event) -> PublishOutcome {
        match self.publish_tx.try_send(event) {
            Ok(()) => PublishOutcome::Queued,
            Err(mpsc::error::TrySendError::Full(event)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    event_type = %event.event_type,
                    path = event.path.as_deref().unwrap_or(""),
                    capacity = self.config.publish_buffer,
                    "Event hub publish buffer full, event dropped"
                );
                PublishOutcome::Dropped
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    event_type = %event.event_type,
                    "Event hub stopped, event dropped"
                );
                PublishOutcome::Dropped
            }
        }
    }

    /// Ask every subscriber's transport to send a keep-alive.
    ///
    /// Pings go through the same bounded buffers as events, so a subscriber
    /// that is not draining its buffer is evicted here too.
    pub fn ping_all(&self) {
        let _ = self.control_tx.send(Control::Ping);
    }

    /// Current number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.counters.subscribers.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> HubStats {
        HubStats {
            subscribers: self.counters.subscribers.load(Ordering::Relaxed),
            published: self.counters.published.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            evicted: self.counters.evicted.load(Ordering::Relaxed),
        }
    }

    /// Disconnect every subscriber and stop the coordinating task.
    ///
    /// Resolves once the task has released all subscribers. Safe to call
    /// more than once.
    pub async fn shutdown(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.control_tx.send(Control::Shutdown(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
    }
}

// ---------------------------------------------------------------------------
// Coordinating loop
// ---------------------------------------------------------------------------

async fn run(
    mut publish_rx: mpsc::Receiver<Event>,
    mut control_rx: mpsc::UnboundedReceiver<Control>,
    counters: Arc<Counters>,
) {
    let mut subscribers: HashMap<SubscriberId, Subscriber> = HashMap::new();

    loop {
        tokio::select! {
            // Membership changes first, so a register issued before a
            // publish is always in place when that publish is fanned out.
            biased;

            control = control_rx.recv() => match control {
                Some(Control::Register(subscriber)) => {
                    tracing::debug!(subscriber_id = subscriber.id, "Subscriber registered");
                    subscribers.insert(subscriber.id, subscriber);
                }
                Some(Control::Unregister(id)) => {
                    if let Some(subscriber) = subscribers.remove(&id) {
                        tracing::debug!(subscriber_id = id, "Subscriber unregistered");
                        subscriber.close(DisconnectReason::ClientClosed);
                    }
                }
                Some(Control::Ping) => {
                    fan_out(&mut subscribers, &HubMessage::Ping, &counters);
                }
                Some(Control::Shutdown(ack)) => {
                    close_all(&mut subscribers);
                    counters.subscribers.store(0, Ordering::Relaxed);
                    let _ = ack.send(());
                    break;
                }
                None => {
                    close_all(&mut subscribers);
                    break;
                }
            },

            event = publish_rx.recv() => match event {
                Some(event) => {
                    // Serialize once; every subscriber shares the same bytes.
                    match serde_json::to_string(&event) {
                        Ok(text) => {
                            counters.published.fetch_add(1, Ordering::Relaxed);
                            let message = HubMessage::Event(Arc::from(text));
                            fan_out(&mut subscribers, &message, &counters);
                        }
                        Err(e) => {
                            tracing::error!(
                                error = %e,
                                event_type = %event.event_type,
                                "Failed to serialize event"
                            );
                        }
                    }
                }
                None => {
                    close_all(&mut subscribers);
                    break;
                }
            },
        }

        counters
            .subscribers
            .store(subscribers.len(), Ordering::Relaxed);
    }

    counters.subscribers.store(0, Ordering::Relaxed);
    tracing::info!("Event hub stopped");
}

/// Deliver `message` to every subscriber, removing those that are full or
/// gone.
fn fan_out(
    subscribers: &mut HashMap<SubscriberId, Subscriber>,
    message: &HubMessage,
    counters: &Counters,
) {
    let mut departed = Vec::new();

    for subscriber in subscribers.values() {
        match deliver(subscriber, message.clone()) {
            Delivery::Delivered => {
                counters.delivered.fetch_add(1, Ordering::Relaxed);
            }
            Delivery::BufferFull => departed.push((subscriber.id, DisconnectReason::Evicted)),
            Delivery::Closed => departed.push((subscriber.id, DisconnectReason::ClientClosed)),
        }
    }

    for (id, reason) in departed {
        if let Some(subscriber) = subscribers.remove(&id) {
            if reason == DisconnectReason::Evicted {
                counters.evicted.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(subscriber_id = id, "Slow subscriber evicted");
            }
            subscriber.close(reason);
        }
    }
}

fn close_all(subscribers: &mut HashMap<SubscriberId, Subscriber>) {
    let count = subscribers.len();
    for (_, subscriber) in subscribers.drain() {
        subscriber.close(DisconnectReason::HubShutdown);
    }
    if count > 0 {
        tracing::info!(count, "Closed all subscribers");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
