use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Closed set of server-push event kinds, tagged for wire serialization.
/// Replaces ad hoc emitters scattered through each component with a
/// single typed bus every subscriber reads from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    WindowAcquired { host_id: String },
    WindowRecycled { host_id: String },
    RateLimitDelay { domain: String, delay_ms: u64 },
    ThresholdExceeded { resource: ResourceKind, current: f64, limit: f64 },
    ProxyAdded { proxy_id: String },
    ProxyRemoved { proxy_id: String },
    ProxySuccess { proxy_id: String, response_ms: u64 },
    ProxyFailure { proxy_id: String, reason: String },
    ProxyBlacklisted { proxy_id: String, until_ms: u64 },
    ProxyWhitelisted { proxy_id: String },
    StrategyChanged { strategy: String },
    PoolCleared,
    JarSwitched { from: String, to: String },
    EvidenceCollected { item_id: String },
    VerificationFailed { item_id: String },
    MaxEventsReached { recording_id: String },
    Status { message: String, client_id: String },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Memory,
    Cpu,
}

/// Broadcast bus shared by every component that needs to notify
/// dispatcher-connected clients of a side-channel event.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Publishes an event to every live subscriber. Returns the number of
    /// receivers the event was delivered to; a bus with no subscribers
    /// yet is not an error.
    pub fn publish(&self, event: Event) -> usize {
        self.sender.send(event).unwrap_or(0)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_reaches_subscriber() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        bus.publish(Event::PoolCleared);
        let event = rx.try_recv().unwrap();
        matches!(event, Event::PoolCleared);
    }

    #[test]
    fn publish_without_subscribers_does_not_error() {
        let bus = EventBus::new(16);
        assert_eq!(bus.publish(Event::PoolCleared), 0);
    }
}
