//! Bounded, order-preserving prefetch stage.
//!
//! Each incoming item reserves a slot in arrival order and then has its
//! side effect (media download) run in the background. The consumer awaits
//! slots strictly in order, so a slow item holds back the ones behind it
//! but never reorders them.

use std::future::Future;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use wairc_core::{error::WaircError, Signal};

/// An item together with the outcome of its background work.
#[derive(Debug)]
pub struct Prefetched<T> {
    pub item: T,
    pub result: Result<(), WaircError>,
}

/// A reserved position in the queue. Resolves once the item's work is done.
pub type Slot<T> = oneshot::Receiver<Prefetched<T>>;

/// Start the prefetch stage between `input` and the returned slot stream.
///
/// At most `capacity` slots are outstanding; beyond that the stage stops
/// pulling from `input`. When `stop` fires, the stage closes and in-flight
/// work is aborted.
pub fn prefetch_queue<T, F, Fut>(
    mut input: mpsc::Receiver<T>,
    capacity: usize,
    stop: Signal,
    work: F,
) -> mpsc::Receiver<Slot<T>>
where
    T: Send + 'static,
    F: Fn(T) -> Fut + Send + 'static,
    Fut: Future<Output = Prefetched<T>> + Send + 'static,
{
    let (slots_tx, slots_rx) = mpsc::channel(capacity.max(1));

    tokio::spawn(async move {
        let mut workers = JoinSet::new();

        loop {
            let item = tokio::select! {
                _ = stop.fired() => return,
                Some(_) = workers.join_next(), if !workers.is_empty() => continue,
                item = input.recv() => item,
            };
            let Some(item) = item else { break };

            let (done_tx, done_rx) = oneshot::channel();
            tokio::select! {
                _ = stop.fired() => return,
                sent = slots_tx.send(done_rx) => {
                    if sent.is_err() {
                        return;
                    }
                }
            }

            let fut = work(item);
            workers.spawn(async move {
                let _ = done_tx.send(fut.await);
            });
        }

        // Input is exhausted; let outstanding work finish unless stopped.
        loop {
            tokio::select! {
                _ = stop.fired() => return,
                next = workers.join_next() => {
                    if next.is_none() {
                        return;
                    }
                }
            }
        }
    });

    slots_rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_consumer_sees_arrival_order() {
        let (tx, rx) = mpsc::channel(32);
        let mut slots = prefetch_queue(rx, 4, Signal::new(), |n: u64| async move {
            // Earlier items take longer, so completion order is reversed.
            tokio::time::sleep(Duration::from_millis(40 - n * 4)).await;
            Prefetched {
                item: n,
                result: Ok(()),
            }
        });

        for n in 0..10 {
            tx.send(n).await.unwrap();
        }
        drop(tx);

        let mut seen = Vec::new();
        while let Some(slot) = slots.recv().await {
            seen.push(slot.await.unwrap().item);
        }
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_errors_travel_with_their_item() {
        let (tx, rx) = mpsc::channel(4);
        let mut slots = prefetch_queue(rx, 2, Signal::new(), |n: u32| async move {
            let result = if n == 1 {
                Err(WaircError::Bridge("download failed".into()))
            } else {
                Ok(())
            };
            Prefetched { item: n, result }
        });
        for n in 0..3 {
            tx.send(n).await.unwrap();
        }
        drop(tx);

        let mut outcomes = Vec::new();
        while let Some(slot) = slots.recv().await {
            let done = slot.await.unwrap();
            outcomes.push((done.item, done.result.is_ok()));
        }
        assert_eq!(outcomes, vec![(0, true), (1, false), (2, true)]);
    }

    #[tokio::test]
    async fn test_stop_closes_queue() {
        let (tx, rx) = mpsc::channel(4);
        let stop = Signal::new();
        let mut slots = prefetch_queue(rx, 2, stop.clone(), |n: u32| async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Prefetched {
                item: n,
                result: Ok(()),
            }
        });
        tx.send(1).await.unwrap();
        let slot = slots.recv().await.unwrap();

        stop.fire();
        let closed = tokio::time::timeout(Duration::from_secs(1), slots.recv())
            .await
            .expect("queue must close promptly");
        assert!(closed.is_none());
        assert!(
            tokio::time::timeout(Duration::from_secs(1), slot)
                .await
                .expect("abandoned work must not hang the consumer")
                .is_err(),
            "abandoned work yields no result"
        );
    }
}
