//! Event bus used to broadcast job notifications and timed-job firings.

use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::error::{JobError, Result};

const BUS_CAPACITY: usize = 1024;

/// An event posted on the bus.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub topic: String,
    pub properties: Map<String, Value>,
}

impl Event {
    pub fn new(topic: impl Into<String>, properties: Map<String, Value>) -> Self {
        Self {
            topic: topic.into(),
            properties,
        }
    }
}

/// Cluster-facing event bus.
pub trait EventBus: Send + Sync {
    /// Post an event asynchronously. Delivery is best effort.
    fn publish(&self, event: Event);

    /// Receive events whose topic matches a glob pattern.
    fn subscribe(&self, topic_pattern: &str) -> Result<EventSubscription>;
}

/// Receiving side of an [`EventBus`] subscription.
pub struct EventSubscription {
    receiver: broadcast::Receiver<Event>,
    pattern: glob::Pattern,
}

impl EventSubscription {
    pub fn new(receiver: broadcast::Receiver<Event>, pattern: glob::Pattern) -> Self {
        Self { receiver, pattern }
    }

    /// Next matching event, or `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if self.pattern.matches(&event.topic) => return Some(event),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Event subscription {} lagged by {} events", self.pattern, n);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Matching event already waiting, without blocking.
    pub fn try_recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) if self.pattern.matches(&event.topic) => return Some(event),
                Ok(_) => {}
                Err(broadcast::error::TryRecvError::Lagged(_)) => {}
                Err(_) => return None,
            }
        }
    }
}

/// In-process event bus.
pub struct LocalEventBus {
    sender: broadcast::Sender<Event>,
}

impl LocalEventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BUS_CAPACITY);
        Self { sender }
    }
}

impl Default for LocalEventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus for LocalEventBus {
    fn publish(&self, event: Event) {
        debug!("Publishing event on {}", event.topic);
        // nobody listening is not an error
        let _ = self.sender.send(event);
    }

    fn subscribe(&self, topic_pattern: &str) -> Result<EventSubscription> {
        let pattern = glob::Pattern::new(topic_pattern)
            .map_err(|e| JobError::InvalidTopic(format!("{}: {}", topic_pattern, e)))?;
        Ok(EventSubscription::new(self.sender.subscribe(), pattern))
    }
}
