//! Zero-capacity rendezvous queue.
//!
//! [`Handoff::put`] completes only once a [`Handoff::take`] has claimed the
//! item, so a producer can never run ahead of its consumer. Dropping a
//! pending `put` withdraws the item: a taker that later reaches it skips
//! it instead of delivering it.
//!
//! Internally an item travels through a one-slot `mpsc` channel paired with
//! a `oneshot` claim signal. The taker fires the claim in the same poll that
//! dequeues the item, so the handoff is decided atomically from the
//! producer's point of view.

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// The queue was closed before the item changed hands.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("handoff queue closed")]
pub struct HandoffClosed;

struct Slot<T> {
    item: T,
    claimed: oneshot::Sender<()>,
}

/// Synchronous handoff between one side that puts and one side that takes.
pub struct Handoff<T> {
    tx: Mutex<Option<mpsc::Sender<Slot<T>>>>,
    rx: tokio::sync::Mutex<mpsc::Receiver<Slot<T>>>,
}

impl<T: Send> Handoff<T> {
    /// Create an open queue.
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(1);
        Self {
            tx: Mutex::new(Some(tx)),
            rx: tokio::sync::Mutex::new(rx),
        }
    }

    /// Offer `item` and wait until a taker claims it.
    ///
    /// Cancel-safe: if this future is dropped before the claim, the item
    /// is withdrawn and never delivered.
    pub async fn put(&self, item: T) -> Result<(), HandoffClosed> {
        let tx = self.tx.lock().clone().ok_or(HandoffClosed)?;
        let (claimed, on_claim) = oneshot::channel();
        tx.send(Slot { item, claimed })
            .await
            .map_err(|_| HandoffClosed)?;
        drop(tx);
        on_claim.await.map_err(|_| HandoffClosed)
    }

    /// Wait for the next item. Returns `None` once the queue is closed and
    /// drained.
    ///
    /// Cancel-safe: an item is only claimed when this future completes.
    pub async fn take(&self) -> Option<T> {
        let mut rx = self.rx.lock().await;
        loop {
            let slot = rx.recv().await?;
            if slot.claimed.send(()).is_ok() {
                return Some(slot.item);
            }
        }
    }

    /// Claim an item only if a producer is already waiting.
    pub fn try_take(&self) -> Option<T> {
        let mut rx = self.rx.try_lock().ok()?;
        while let Ok(slot) = rx.try_recv() {
            if slot.claimed.send(()).is_ok() {
                return Some(slot.item);
            }
        }
        None
    }

    /// Close the queue. Waiting and future `put`s fail with
    /// [`HandoffClosed`]; idempotent.
    pub fn close(&self) {
        drop(self.tx.lock().take());
        // Release producers parked on an unclaimed slot. A taker holding the
        // receiver drains the rest on its own.
        if let Ok(mut rx) = self.rx.try_lock() {
            rx.close();
            while rx.try_recv().is_ok() {}
        }
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.tx.lock().is_none()
    }
}

impl<T: Send> Default for Handoff<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn put_waits_for_take() {
        let q = Arc::new(Handoff::new());
        let q2 = q.clone();
        let put = tokio::spawn(async move { q2.put(1).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!put.is_finished());

        assert_eq!(q.take().await, Some(1));
        assert_eq!(put.await.unwrap(), Ok(()));
    }

    #[tokio::test]
    async fn items_arrive_in_put_order() {
        let q = Arc::new(Handoff::new());
        let q2 = q.clone();
        let producer = tokio::spawn(async move {
            for i in 0..5 {
                q2.put(i).await.unwrap();
            }
        });
        for i in 0..5 {
            assert_eq!(q.take().await, Some(i));
        }
        producer.await.unwrap();
    }

    #[tokio::test]
    async fn withdrawn_put_is_skipped() {
        let q = Arc::new(Handoff::new());
        let withdrawn = tokio::time::timeout(Duration::from_millis(10), q.put("stale")).await;
        assert!(withdrawn.is_err());

        let q2 = q.clone();
        let put = tokio::spawn(async move { q2.put("fresh").await });
        assert_eq!(q.take().await, Some("fresh"));
        put.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn try_take_without_producer_is_none() {
        let q: Handoff<u8> = Handoff::new();
        assert_eq!(q.try_take(), None);
    }

    #[tokio::test]
    async fn try_take_claims_waiting_item() {
        let q = Arc::new(Handoff::new());
        let q2 = q.clone();
        let put = tokio::spawn(async move { q2.put(7).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(q.try_take(), Some(7));
        assert_eq!(put.await.unwrap(), Ok(()));
    }

    #[tokio::test]
    async fn close_fails_new_puts() {
        let q: Handoff<u8> = Handoff::new();
        q.close();
        q.close();
        assert!(q.is_closed());
        assert_eq!(q.put(1).await, Err(HandoffClosed));
    }

    #[tokio::test]
    async fn close_releases_parked_producer() {
        let q = Arc::new(Handoff::new());
        let q2 = q.clone();
        let put = tokio::spawn(async move { q2.put(1).await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        q.close();
        assert_eq!(put.await.unwrap(), Err(HandoffClosed));
    }

    #[tokio::test]
    async fn take_after_close_is_none() {
        let q: Handoff<u8> = Handoff::new();
        q.close();
        assert_eq!(q.take().await, None);
    }
}
