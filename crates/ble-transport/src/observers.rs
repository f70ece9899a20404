//! Connection state fan-out
//!
//! Every subscriber sees the current state on subscription and then each
//! change exactly once, in the order the changes were made.

use obd_protocol::ConnectionState;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

struct ObserverSet {
    current: ConnectionState,
    senders: Vec<mpsc::UnboundedSender<ConnectionState>>,
}

/// Registry of state subscribers
pub struct StateObservers {
    inner: Mutex<ObserverSet>,
}

impl StateObservers {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(ObserverSet {
                current: ConnectionState::Disconnected,
                senders: Vec::new(),
            }),
        }
    }

    pub fn current(&self) -> ConnectionState {
        self.inner.lock().current
    }

    /// Register a subscriber; the current state is delivered first
    pub fn subscribe(&self) -> StateSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock();
        // Cannot fail, the receiver is still in hand
        let _ = tx.send(inner.current);
        inner.senders.push(tx);
        StateSubscription { rx }
    }

    /// Record a new state, returns false when nothing changed
    pub fn set(&self, state: ConnectionState) -> bool {
        let mut inner = self.inner.lock();
        if inner.current == state {
            return false;
        }
        debug!("Connection state {} -> {}", inner.current, state);
        inner.current = state;
        inner.senders.retain(|tx| tx.send(state).is_ok());
        true
    }

    /// Move to `to` only when the current state is one of `from`
    pub fn transition(&self, from: &[ConnectionState], to: ConnectionState) -> bool {
        let mut inner = self.inner.lock();
        if !from.contains(&inner.current) || inner.current == to {
            return false;
        }
        debug!("Connection state {} -> {}", inner.current, to);
        inner.current = to;
        inner.senders.retain(|tx| tx.send(to).is_ok());
        true
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().senders.len()
    }
}

impl Default for StateObservers {
    fn default() -> Self {
        Self::new()
    }
}

/// Stream of connection states; dropping it unsubscribes
pub struct StateSubscription {
    rx: mpsc::UnboundedReceiver<ConnectionState>,
}

impl StateSubscription {
    /// Wait for the next state, `None` once the transport is gone
    pub async fn recv(&mut self) -> Option<ConnectionState> {
        self.rx.recv().await
    }

    /// Next queued state without waiting
    pub fn try_recv(&mut self) -> Option<ConnectionState> {
        self.rx.try_recv().ok()
    }

    /// Drain everything queued so far
    pub fn drain(&mut self) -> Vec<ConnectionState> {
        let mut states = Vec::new();
        while let Some(state) = self.try_recv() {
            states.push(state);
        }
        states
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscriber_gets_current_state_first() {
        let observers = StateObservers::new();
        observers.set(ConnectionState::Scanning);
        let mut sub = observers.subscribe();
        assert_eq!(sub.try_recv(), Some(ConnectionState::Scanning));
        assert_eq!(sub.try_recv(), None);
    }

    #[test]
    fn test_changes_delivered_in_order_once() {
        let observers = StateObservers::new();
        let mut sub = observers.subscribe();
        observers.set(ConnectionState::Connecting);
        observers.set(ConnectionState::Connecting);
        observers.set(ConnectionState::Connected);
        observers.set(ConnectionState::Disconnected);
        assert_eq!(
            sub.drain(),
            vec![
                ConnectionState::Disconnected,
                ConnectionState::Connecting,
                ConnectionState::Connected,
                ConnectionState::Disconnected,
            ]
        );
    }

    #[test]
    fn test_dropped_subscriber_is_pruned() {
        let observers = StateObservers::new();
        let sub = observers.subscribe();
        let _kept = observers.subscribe();
        drop(sub);
        observers.set(ConnectionState::Scanning);
        assert_eq!(observers.subscriber_count(), 1);
    }

    #[test]
    fn test_transition_guarded_by_source_state() {
        let observers = StateObservers::new();
        assert!(!observers.transition(&[ConnectionState::Scanning], ConnectionState::Disconnected));
        assert!(observers.transition(
            &[ConnectionState::Disconnected, ConnectionState::Error],
            ConnectionState::Scanning
        ));
        assert_eq!(observers.current(), ConnectionState::Scanning);
    }
}
