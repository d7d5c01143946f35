//! Observes network state and signals reachable/unreachable transitions
//! (spec.md §4.5).

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use futures_channel::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReachabilityEvent {
    Reachable,
    Unreachable,
}

/// A small observer with a synchronous probe and a stream of transitions.
/// When a reconnect waits on reachability, the stream wakes the state
/// machine to attempt `connect()` (spec.md §4.5).
pub trait ReachabilityMonitor: Send + Sync {
    fn is_reachable(&self) -> bool;

    /// A fresh subscription to reachability transitions; the connection
    /// manager holds exactly one of these at a time.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<ReachabilityEvent>;
}

/// Default monitor: always reports reachable, since there is no portable,
/// dependency-free OS reachability API (see DESIGN.md). Suitable for
/// environments where connectivity loss only ever manifests as a socket
/// close, which is handled by the ordinary reconnect path regardless.
pub struct SystemReachability;

impl ReachabilityMonitor for SystemReachability {
    fn is_reachable(&self) -> bool {
        true
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<ReachabilityEvent> {
        // No transitions are ever produced; callers relying on reachability
        // transitions to escape `ReconnectingWhenNetworkBecomesReachable`
        // should supply a real monitor via `Options`/`Client::with_reachability`.
        let (_tx, rx) = mpsc::unbounded();
        rx
    }
}

/// A reachability double a caller (or a test) drives directly.
pub struct ManualReachability {
    reachable: Arc<AtomicBool>,
    senders: std::sync::Mutex<Vec<mpsc::UnboundedSender<ReachabilityEvent>>>,
}

impl ManualReachability {
    pub fn new(initially_reachable: bool) -> Self {
        Self {
            reachable: Arc::new(AtomicBool::new(initially_reachable)),
            senders: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
        let event =
            if reachable { ReachabilityEvent::Reachable } else { ReachabilityEvent::Unreachable };
        let mut senders = self.senders.lock().unwrap();
        senders.retain(|tx| tx.unbounded_send(event).is_ok());
    }
}

impl ReachabilityMonitor for ManualReachability {
    fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<ReachabilityEvent> {
        let (tx, rx) = mpsc::unbounded();
        self.senders.lock().unwrap().push(tx);
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn manual_reachability_notifies_subscribers() {
        let monitor = ManualReachability::new(false);
        assert!(!monitor.is_reachable());

        let mut rx = monitor.subscribe();
        monitor.set_reachable(true);

        assert_eq!(rx.next().await, Some(ReachabilityEvent::Reachable));
        assert!(monitor.is_reachable());
    }
}
