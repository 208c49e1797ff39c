//! Push-event plumbing between a backend and the console.
//!
//! A backend exposes its event channels through [`EventSource`]. The console
//! never talks to listeners directly: [`EventBridge::activate`] registers one
//! listener per channel and hands back a bridge that owns both the
//! [`Subscription`] handles and the receiving end of the event queue. Once the
//! bridge is deactivated (or dropped) the backend holds no sink and nothing
//! is delivered any more.

use crate::telemetry::TelemetrySample;
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventChannel {
    ConnectCountChange,
    UpdateTransferStatistic,
}

impl EventChannel {
    pub const ALL: [EventChannel; 2] = [
        EventChannel::ConnectCountChange,
        EventChannel::UpdateTransferStatistic,
    ];

    /// Name used on the backend wire.
    pub fn name(self) -> &'static str {
        match self {
            EventChannel::ConnectCountChange => "connect-count-change",
            EventChannel::UpdateTransferStatistic => "update-transfer-statistic",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        EventChannel::ALL.into_iter().find(|c| c.name() == name)
    }
}

impl fmt::Display for EventChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendEvent {
    ConnectCountChange(u32),
    TransferStatistic(TelemetrySample),
}

impl BackendEvent {
    pub fn channel(&self) -> EventChannel {
        match self {
            BackendEvent::ConnectCountChange(_) => EventChannel::ConnectCountChange,
            BackendEvent::TransferStatistic(_) => EventChannel::UpdateTransferStatistic,
        }
    }

    /// Decodes a named wire event. Unknown names yield `Ok(None)`.
    pub fn from_wire(name: &str, payload: Value) -> Result<Option<Self>, serde_json::Error> {
        let Some(channel) = EventChannel::from_name(name) else {
            return Ok(None);
        };
        let event = match channel {
            EventChannel::ConnectCountChange => {
                BackendEvent::ConnectCountChange(serde_json::from_value(payload)?)
            }
            EventChannel::UpdateTransferStatistic => {
                BackendEvent::TransferStatistic(serde_json::from_value(payload)?)
            }
        };
        Ok(Some(event))
    }
}

pub type ListenerId = u64;
pub type EventSink = mpsc::UnboundedSender<BackendEvent>;

/// Backend side of the event surface.
pub trait EventSource: Send + Sync {
    fn listen(&self, channel: EventChannel, sink: EventSink) -> ListenerId;
    fn unlisten(&self, id: ListenerId);
}

/// Listener table shared by backend implementations.
#[derive(Default)]
pub struct ListenerRegistry {
    next_id: AtomicU64,
    closed: AtomicBool,
    listeners: Mutex<Vec<(ListenerId, EventChannel, EventSink)>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// After [`ListenerRegistry::close`] the sink is dropped right away, so
    /// its receiver sees the end of the stream.
    pub fn listen(&self, channel: EventChannel, sink: EventSink) -> ListenerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let mut listeners = self.lock();
        if self.closed.load(Ordering::SeqCst) {
            debug!(id, %channel, "listener refused, source closed");
            return id;
        }
        listeners.push((id, channel, sink));
        drop(listeners);
        debug!(id, %channel, "listener registered");
        id
    }

    pub fn unlisten(&self, id: ListenerId) {
        let mut listeners = self.lock();
        let before = listeners.len();
        listeners.retain(|(lid, _, _)| *lid != id);
        if listeners.len() != before {
            debug!(id, "listener removed");
        }
    }

    /// Delivers `event` to every listener of its channel, in registration
    /// order. Listeners whose receiver is gone are pruned. Returns the number
    /// of deliveries.
    pub fn emit(&self, event: BackendEvent) -> usize {
        let channel = event.channel();
        let mut delivered = 0;
        self.lock().retain(|(_, ch, sink)| {
            if *ch != channel {
                return !sink.is_closed();
            }
            match sink.send(event) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(_) => false,
            }
        });
        trace!(%channel, delivered, "event emitted");
        delivered
    }

    /// Drops every sink for good. Receivers observe the end of the stream
    /// once queued events are drained.
    pub fn close(&self) {
        let mut listeners = self.lock();
        self.closed.store(true, Ordering::SeqCst);
        let dropped = listeners.len();
        listeners.clear();
        debug!(dropped, "listener registry closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn listener_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(ListenerId, EventChannel, EventSink)>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One registered listener. Released exactly once: either through
/// [`Subscription::dispose`] or when the handle is dropped.
pub struct Subscription {
    id: ListenerId,
    channel: EventChannel,
    source: Arc<dyn EventSource>,
    released: bool,
}

impl Subscription {
    pub fn open(source: Arc<dyn EventSource>, channel: EventChannel, sink: EventSink) -> Self {
        let id = source.listen(channel, sink);
        Subscription {
            id,
            channel,
            source,
            released: false,
        }
    }

    pub fn channel(&self) -> EventChannel {
        self.channel
    }

    pub fn dispose(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.source.unlisten(self.id);
        debug!(id = self.id, channel = %self.channel, "subscription released");
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

/// Both console subscriptions plus the queue they feed.
pub struct EventBridge {
    subscriptions: Vec<Subscription>,
    events: mpsc::UnboundedReceiver<BackendEvent>,
}

impl EventBridge {
    pub fn activate(source: Arc<dyn EventSource>) -> Self {
        let (sink, events) = mpsc::unbounded_channel();
        let subscriptions = EventChannel::ALL
            .into_iter()
            .map(|channel| Subscription::open(source.clone(), channel, sink.clone()))
            .collect();
        debug!("event bridge activated");
        EventBridge {
            subscriptions,
            events,
        }
    }

    /// Next backend event in emission order. `None` once the backend has
    /// dropped every sink, which means the backend itself is gone.
    pub async fn recv(&mut self) -> Option<BackendEvent> {
        self.events.recv().await
    }

    pub fn try_recv(&mut self) -> Option<BackendEvent> {
        self.events.try_recv().ok()
    }

    pub fn deactivate(mut self) {
        for subscription in self.subscriptions.drain(..) {
            subscription.dispose();
        }
        self.events.close();
        debug!("event bridge deactivated");
    }
}
