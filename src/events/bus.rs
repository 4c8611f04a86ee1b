//! Change event bus.
//!
//! [`ChangeEventBus`] wraps [`tokio::sync::broadcast`]. Publishers never
//! block; each subscriber gets its own receiver and sees events in publish
//! order. Filtering happens on the subscriber side.
//!
//! ```text
//! PollingFileWatcher ──┐
//! operator / tests   ──┼──► ChangeEventBus ──► Subscription(filter) ──► FileMonitor
//!                      └──  (broadcast)    ──► Subscription(filter) ──► ...
//! ```
//!
//! Slow subscribers skip the oldest events and log a warning.

use super::event::ScriptEvent;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

type Filter = Box<dyn Fn(&ScriptEvent) -> bool + Send + Sync>;

/// Broadcast channel for [`ScriptEvent`]s.
#[derive(Clone, Debug)]
pub struct ChangeEventBus {
    tx: broadcast::Sender<ScriptEvent>,
}

impl ChangeEventBus {
    /// Create a bus with the given capacity (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event to all current subscribers.
    pub fn publish(&self, event: impl Into<ScriptEvent>) {
        let _ = self.tx.send(event.into());
    }

    /// Subscribe to every event published from now on.
    pub fn subscribe(&self) -> Subscription {
        self.subscribe_filtered(|_| true)
    }

    /// Subscribe to the events matching `filter`.
    pub fn subscribe_filtered<F>(&self, filter: F) -> Subscription
    where
        F: Fn(&ScriptEvent) -> bool + Send + Sync + 'static,
    {
        Subscription {
            rx: self.tx.subscribe(),
            filter: Box::new(filter),
        }
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// A filtered view of the bus.
pub struct Subscription {
    rx: broadcast::Receiver<ScriptEvent>,
    filter: Filter,
}

impl Subscription {
    /// Wait for the next matching event. Returns `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<ScriptEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if (self.filter)(&event) => return Some(event),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Change subscription lagged; skipped {} events", skipped);
                    continue;
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::event::FileEvent;

    #[tokio::test]
    async fn test_filtered_subscription_in_order() {
        let bus = ChangeEventBus::new(16);
        let mut files = bus.subscribe_filtered(|e| matches!(e, ScriptEvent::File(_)));
        let mut all = bus.subscribe();

        bus.publish(ScriptEvent::restart("test"));
        bus.publish(FileEvent::changed("/app/host.json"));
        bus.publish(FileEvent::deleted("/app/fn1"));

        match files.recv().await {
            Some(ScriptEvent::File(e)) => assert_eq!(e.name, "host.json"),
            other => panic!("unexpected {:?}", other),
        }
        match files.recv().await {
            Some(ScriptEvent::File(e)) => assert_eq!(e.name, "fn1"),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(all.recv().await.map(|e| e.as_label()), Some("host_restart"));
    }

    #[tokio::test]
    async fn test_closed_bus() {
        let bus = ChangeEventBus::new(0);
        let mut sub = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);
        drop(bus);
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_lagged_subscriber_skips_oldest() {
        let bus = ChangeEventBus::new(2);
        let mut sub = bus.subscribe();
        for i in 0..4 {
            bus.publish(ScriptEvent::restart(format!("r{}", i)));
        }
        match sub.recv().await {
            Some(ScriptEvent::HostRestart(e)) => assert_eq!(e.source, "r2"),
            other => panic!("unexpected {:?}", other),
        }
    }
}
