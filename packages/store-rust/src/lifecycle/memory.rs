//! Low-memory notification fan-out.
//!
//! The host forwards its platform's memory-pressure events to
//! [`MemoryPressureMonitor::signal`]; maintenance tasks subscribe and flush
//! their buffered writes when one arrives.

use tokio::sync::broadcast;
use tracing::debug;

/// Severity reported with a memory-pressure event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryPressure {
    /// Memory is getting low; buffered data should be flushed.
    Low,
    /// Memory is nearly exhausted.
    Critical,
}

/// Broadcasts memory-pressure events to every subscriber.
#[derive(Debug, Clone)]
pub struct MemoryPressureMonitor {
    sender: broadcast::Sender<MemoryPressure>,
}

impl MemoryPressureMonitor {
    /// Creates a monitor buffering up to 16 undelivered events per subscriber.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(16);
        Self { sender }
    }

    /// Subscribes to future events. Dropping the receiver unsubscribes.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<MemoryPressure> {
        self.sender.subscribe()
    }

    /// Delivers `level` to every subscriber; returns how many received it.
    pub fn signal(&self, level: MemoryPressure) -> usize {
        // Sending with no subscribers is not an error for this monitor.
        let delivered = self.sender.send(level).unwrap_or(0);
        debug!(?level, delivered, "memory pressure signalled");
        delivered
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for MemoryPressureMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_without_subscribers_delivers_nothing() {
        let monitor = MemoryPressureMonitor::new();
        assert_eq!(monitor.signal(MemoryPressure::Low), 0);
    }

    #[tokio::test]
    async fn subscribers_receive_signals() {
        let monitor = MemoryPressureMonitor::new();
        let mut first = monitor.subscribe();
        let mut second = monitor.subscribe();
        assert_eq!(monitor.subscriber_count(), 2);

        assert_eq!(monitor.signal(MemoryPressure::Critical), 2);
        assert_eq!(first.recv().await.unwrap(), MemoryPressure::Critical);
        assert_eq!(second.recv().await.unwrap(), MemoryPressure::Critical);
    }

    #[test]
    fn dropping_receiver_unsubscribes() {
        let monitor = MemoryPressureMonitor::new();
        let rx = monitor.subscribe();
        assert_eq!(monitor.subscriber_count(), 1);
        drop(rx);
        assert_eq!(monitor.subscriber_count(), 0);
    }
}
