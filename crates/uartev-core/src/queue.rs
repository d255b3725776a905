//! Bounded event queue between the driver and the dispatch loop.
//!
//! Posting never blocks: when the queue is full the new event is dropped and
//! counted. Receiving blocks until an event arrives or every sender is gone.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::event::UartEvent;

pub fn event_queue(capacity: usize) -> (EventSender, EventReceiver) {
    let (tx, rx) = bounded(capacity);
    let dropped = Arc::new(AtomicU64::new(0));
    (
        EventSender { tx, dropped: dropped.clone() },
        EventReceiver { rx, capacity, dropped },
    )
}

#[derive(Debug, Clone)]
pub struct EventSender {
    tx: Sender<UartEvent>,
    dropped: Arc<AtomicU64>,
}

impl EventSender {
    /// Queues `event` without blocking. Returns false if it was dropped.
    pub fn post(&self, event: UartEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(ev)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                log::warn!("event queue full, dropping {ev}");
                false
            }
            Err(TrySendError::Disconnected(ev)) => {
                log::debug!("no dispatcher listening, dropping {ev}");
                false
            }
        }
    }
}

#[derive(Debug)]
pub struct EventReceiver {
    rx: Receiver<UartEvent>,
    capacity: usize,
    dropped: Arc<AtomicU64>,
}

impl EventReceiver {
    /// Waits for the next event. `None` once all senders are dropped.
    pub fn recv(&self) -> Option<UartEvent> {
        self.rx.recv().ok()
    }

    pub fn try_recv(&self) -> Option<UartEvent> {
        self.rx.try_recv().ok()
    }

    /// Discards every queued event and returns how many there were.
    pub fn reset(&self) -> usize {
        self.rx.try_iter().count()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Events dropped so far because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub(crate) fn channel(&self) -> &Receiver<UartEvent> {
        &self.rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let (tx, rx) = event_queue(4);
        assert!(tx.post(UartEvent::Break));
        assert!(tx.post(UartEvent::Data { size: 3 }));
        assert_eq!(rx.recv(), Some(UartEvent::Break));
        assert_eq!(rx.recv(), Some(UartEvent::Data { size: 3 }));
    }

    #[test]
    fn test_full_queue_drops_newest_without_blocking() {
        let (tx, rx) = event_queue(2);
        assert!(tx.post(UartEvent::Break));
        assert!(tx.post(UartEvent::FrameError));
        assert!(!tx.post(UartEvent::ParityError));
        assert_eq!(rx.dropped(), 1);
        assert_eq!(rx.len(), 2);
        assert_eq!(rx.recv(), Some(UartEvent::Break));
        assert_eq!(rx.recv(), Some(UartEvent::FrameError));
    }

    #[test]
    fn test_reset_drains_everything() {
        let (tx, rx) = event_queue(8);
        for _ in 0..5 {
            tx.post(UartEvent::Data { size: 1 });
        }
        assert_eq!(rx.reset(), 5);
        assert!(rx.is_empty());
        assert_eq!(rx.capacity(), 8);
    }

    #[test]
    fn test_recv_ends_when_senders_dropped() {
        let (tx, rx) = event_queue(2);
        tx.post(UartEvent::Break);
        drop(tx);
        assert_eq!(rx.recv(), Some(UartEvent::Break));
        assert_eq!(rx.recv(), None);
    }
}
