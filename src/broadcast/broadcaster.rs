use super::errors::{BoxError, BroadcastError};
use crate::prelude::{debug, warn};
use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

/// Queueing policy for a [`Broadcaster`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BroadcastConfig {
    /// Events buffered per subscriber before the publisher has to wait.
    pub queue_capacity: usize,
    /// Longest a publisher waits on one full subscriber queue before evicting that subscriber.
    ///
    /// Full queues are waited on one after another, so a publish that meets `n` stuck
    /// subscribers takes up to `n * publish_timeout`. Each of them is evicted in the process.
    pub publish_timeout: Duration,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            publish_timeout: Duration::from_secs(5),
        }
    }
}

/// Fan-out of events from one producer to any number of subscribers.
///
/// Cloning yields another handle to the same broadcaster.
pub struct Broadcaster<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Broadcaster<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Debug for Broadcaster<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broadcaster")
            .field("config", &self.inner.config)
            .field("subscribers", &self.inner.slots().len())
            .field("closed", &self.inner.closed.is_cancelled())
            .finish()
    }
}

struct Inner<T> {
    slots: Mutex<HashMap<u64, Slot<T>>>,
    next_id: AtomicU64,

    // Serializes publishers so every subscriber sees one global order.
    publish_lock: tokio::sync::Mutex<()>,

    closed: CancellationToken,
    config: BroadcastConfig,
}

struct Slot<T> {
    tx: mpsc::Sender<T>,
    lagged: Arc<AtomicBool>,
}

impl<T> Inner<T> {
    fn slots(&self) -> MutexGuard<'_, HashMap<u64, Slot<T>>> {
        // Slot bookkeeping cannot be left half-updated; recover from poisoning.
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn remove(&self, id: u64) {
        self.slots().remove(&id);
    }
}

/// A registered subscriber; receives events published after it was created.
///
/// Dropping the subscription unregisters it.
pub struct Subscription<T> {
    id: u64,
    rx: mpsc::Receiver<T>,
    lagged: Arc<AtomicBool>,
    inner: Arc<Inner<T>>,
}

impl<T> Debug for Subscription<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("lagged", &self.lagged.load(Ordering::Acquire))
            .finish()
    }
}

impl<T> Subscription<T> {
    /// Waits for the next event.
    ///
    /// Events queued before the broadcaster closed or evicted this subscriber are still
    /// returned first.
    ///
    /// # Errors
    ///
    /// Returns [`BroadcastError::Lagged`] once drained after an eviction, or
    /// [`BroadcastError::Closed`] once drained after the broadcaster closed.
    pub async fn recv(&mut self) -> Result<T, BroadcastError> {
        match self.rx.recv().await {
            Some(event) => Ok(event),
            None if self.lagged.load(Ordering::Acquire) => Err(BroadcastError::Lagged),
            None => Err(BroadcastError::Closed),
        }
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.inner.remove(self.id);
    }
}

impl<T: Clone + Send + 'static> Default for Broadcaster<T> {
    fn default() -> Self {
        Self::new(BroadcastConfig::default())
    }
}

impl<T: Clone + Send + 'static> Broadcaster<T> {
    /// Creates an open broadcaster with no subscribers.
    pub fn new(config: BroadcastConfig) -> Self {
        let config = BroadcastConfig {
            queue_capacity: config.queue_capacity.max(1),
            ..config
        };
        Self {
            inner: Arc::new(Inner {
                slots: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
                publish_lock: tokio::sync::Mutex::new(()),
                closed: CancellationToken::new(),
                config,
            }),
        }
    }

    /// Registers a new subscriber.
    ///
    /// Registration is immediate: every event published after this call returns is delivered
    /// to the subscription. On a closed broadcaster the subscription reports
    /// [`BroadcastError::Closed`] right away.
    pub fn subscription(&self) -> Subscription<T> {
        let (tx, rx) = mpsc::channel(self.inner.config.queue_capacity);
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let lagged = Arc::new(AtomicBool::new(false));

        {
            let mut slots = self.inner.slots();
            // Checked under the lock so `close` cannot miss a slot registered concurrently.
            if !self.inner.closed.is_cancelled() {
                slots.insert(
                    id,
                    Slot {
                        tx,
                        lagged: Arc::clone(&lagged),
                    },
                );
            }
        }

        Subscription {
            id,
            rx,
            lagged,
            inner: Arc::clone(&self.inner),
        }
    }

    /// Runs `handler` for each event published after registration, one at a time and in
    /// publish order, until `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns [`BroadcastError::Handler`] with the first handler error, or the error that
    /// ended the subscription ([`BroadcastError::Closed`], [`BroadcastError::Lagged`]).
    pub async fn subscribe<F, Fut, E>(
        &self,
        cancel: &CancellationToken,
        mut handler: F,
    ) -> Result<(), BroadcastError>
    where
        F: FnMut(T) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: Into<BoxError>,
    {
        let mut subscription = self.subscription();
        loop {
            let event = tokio::select! {
                biased;
                () = cancel.cancelled() => return Ok(()),
                event = subscription.recv() => event?,
            };
            handler(event)
                .await
                .map_err(|e| BroadcastError::Handler(e.into()))?;
        }
    }

    /// Delivers `event` to every currently registered subscriber.
    ///
    /// Concurrent publishers are serialized. A subscriber whose queue stays full for longer
    /// than the publish timeout is evicted; the publish itself still succeeds. Subscribers are
    /// served in turn, so the wait is bounded by the publish timeout once per full queue.
    ///
    /// # Errors
    ///
    /// Returns [`BroadcastError::Closed`] if the broadcaster has been closed.
    pub async fn publish(&self, event: T) -> Result<(), BroadcastError> {
        let _order = self.inner.publish_lock.lock().await;
        if self.inner.closed.is_cancelled() {
            return Err(BroadcastError::Closed);
        }

        let targets: Vec<(u64, mpsc::Sender<T>, Arc<AtomicBool>)> = self
            .inner
            .slots()
            .iter()
            .map(|(id, slot)| (*id, slot.tx.clone(), Arc::clone(&slot.lagged)))
            .collect();

        for (id, tx, lagged) in targets {
            match timeout(self.inner.config.publish_timeout, tx.send(event.clone())).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => {
                    debug!("Subscriber went away during publish: id={}", id);
                    self.inner.remove(id);
                }
                Err(_) => {
                    warn!(
                        "Evicting subscriber that fell behind: id={}, timeout_ms={}",
                        id,
                        self.inner.config.publish_timeout.as_millis()
                    );
                    lagged.store(true, Ordering::Release);
                    self.inner.remove(id);
                }
            }
        }

        Ok(())
    }

    /// Closes the broadcaster; subscribers drain what is queued and then end with
    /// [`BroadcastError::Closed`]. Idempotent.
    pub fn close(&self) {
        let drained: Vec<Slot<T>> = {
            let mut slots = self.inner.slots();
            self.inner.closed.cancel();
            slots.drain().map(|(_, slot)| slot).collect()
        };
        drop(drained);
    }

    /// Returns `true` once [`Broadcaster::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_cancelled()
    }

    /// Number of currently registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.slots().len()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    fn small(queue_capacity: usize, publish_timeout: Duration) -> Broadcaster<u32> {
        Broadcaster::new(BroadcastConfig {
            queue_capacity,
            publish_timeout,
        })
    }

    #[tokio::test]
    async fn every_subscriber_sees_every_event_in_order() {
        let broadcaster = small(4, Duration::from_secs(5));
        let mut subs: Vec<_> = (0..3).map(|_| broadcaster.subscription()).collect();

        let consumers: Vec<_> = subs
            .drain(..)
            .map(|mut sub| {
                tokio::spawn(async move {
                    let mut seen = Vec::new();
                    while let Ok(v) = sub.recv().await {
                        seen.push(v);
                    }
                    seen
                })
            })
            .collect();

        for i in 0..100 {
            broadcaster.publish(i).await.unwrap();
        }
        broadcaster.close();

        let expected: Vec<u32> = (0..100).collect();
        for consumer in consumers {
            assert_eq!(consumer.await.unwrap(), expected);
        }
    }

    #[tokio::test]
    async fn late_subscriber_only_sees_later_events() {
        let broadcaster = small(8, Duration::from_secs(5));
        let mut early = broadcaster.subscription();

        broadcaster.publish(1).await.unwrap();
        let mut late = broadcaster.subscription();
        broadcaster.publish(2).await.unwrap();

        assert_eq!(early.recv().await.unwrap(), 1);
        assert_eq!(early.recv().await.unwrap(), 2);
        assert_eq!(late.recv().await.unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_subscriber_is_evicted_without_stalling_others() {
        let broadcaster = small(1, Duration::from_millis(100));
        let mut stuck = broadcaster.subscription();
        let mut healthy = broadcaster.subscription();

        let reader = tokio::spawn(async move {
            let mut seen = Vec::new();
            for _ in 0..3 {
                seen.push(healthy.recv().await.unwrap());
            }
            seen
        });

        for i in 0..3 {
            tokio::time::timeout(Duration::from_secs(1), broadcaster.publish(i))
                .await
                .expect("publish must not stall on a stuck subscriber")
                .unwrap();
        }

        assert_eq!(reader.await.unwrap(), vec![0, 1, 2]);
        assert_eq!(broadcaster.subscriber_count(), 1);

        // The stuck subscriber keeps what it had queued, then learns it was evicted.
        assert_eq!(stuck.recv().await.unwrap(), 0);
        assert!(matches!(stuck.recv().await, Err(BroadcastError::Lagged)));
    }

    #[tokio::test(start_paused = true)]
    async fn publish_waits_once_per_stuck_subscriber() {
        let timeout = Duration::from_millis(100);
        let broadcaster = small(1, timeout);
        let mut first = broadcaster.subscription();
        let mut second = broadcaster.subscription();
        broadcaster.publish(0).await.unwrap();

        let started = tokio::time::Instant::now();
        broadcaster.publish(1).await.unwrap();
        let elapsed = started.elapsed();

        assert!(elapsed >= timeout * 2, "elapsed {elapsed:?}");
        assert!(elapsed < timeout * 3, "elapsed {elapsed:?}");
        assert_eq!(broadcaster.subscriber_count(), 0);

        for sub in [&mut first, &mut second] {
            assert_eq!(sub.recv().await.unwrap(), 0);
            assert!(matches!(sub.recv().await, Err(BroadcastError::Lagged)));
        }
    }

    #[tokio::test]
    async fn subscribe_runs_handler_until_cancelled() {
        let broadcaster = small(8, Duration::from_secs(5));
        let cancel = CancellationToken::new();
        let seen = Arc::new(StdMutex::new(Vec::new()));

        let task = {
            let broadcaster = broadcaster.clone();
            let cancel = cancel.clone();
            let seen = Arc::clone(&seen);
            tokio::spawn(async move {
                broadcaster
                    .subscribe(&cancel, |v| {
                        let seen = Arc::clone(&seen);
                        async move {
                            seen.lock().unwrap().push(v);
                            Ok::<_, BoxError>(())
                        }
                    })
                    .await
            })
        };

        while broadcaster.subscriber_count() == 0 {
            tokio::task::yield_now().await;
        }
        broadcaster.publish(7).await.unwrap();
        broadcaster.publish(8).await.unwrap();

        while seen.lock().unwrap().len() < 2 {
            tokio::task::yield_now().await;
        }
        cancel.cancel();

        task.await.unwrap().unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![7, 8]);
        assert_eq!(broadcaster.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn handler_error_ends_subscription() {
        let broadcaster = small(8, Duration::from_secs(5));
        let cancel = CancellationToken::new();

        let task = {
            let broadcaster = broadcaster.clone();
            tokio::spawn(async move {
                broadcaster
                    .subscribe(&cancel, |v| async move {
                        if v == 2 {
                            Err(BoxError::from("boom"))
                        } else {
                            Ok(())
                        }
                    })
                    .await
            })
        };

        while broadcaster.subscriber_count() == 0 {
            tokio::task::yield_now().await;
        }
        for i in 1..=3 {
            broadcaster.publish(i).await.unwrap();
        }

        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, BroadcastError::Handler(ref e) if e.to_string() == "boom"));
    }

    #[tokio::test]
    async fn close_drains_then_reports_closed() {
        let broadcaster = small(8, Duration::from_secs(5));
        let mut sub = broadcaster.subscription();

        broadcaster.publish(1).await.unwrap();
        broadcaster.close();
        broadcaster.close();

        assert!(broadcaster.is_closed());
        assert_eq!(sub.recv().await.unwrap(), 1);
        assert!(matches!(sub.recv().await, Err(BroadcastError::Closed)));
        assert!(matches!(
            broadcaster.publish(2).await,
            Err(BroadcastError::Closed)
        ));
        assert!(matches!(
            broadcaster.subscription().recv().await,
            Err(BroadcastError::Closed)
        ));
    }

    #[tokio::test]
    async fn dropping_subscription_unregisters() {
        let broadcaster = small(8, Duration::from_secs(5));
        let sub = broadcaster.subscription();
        assert_eq!(broadcaster.subscriber_count(), 1);
        drop(sub);
        assert_eq!(broadcaster.subscriber_count(), 0);
        broadcaster.publish(1).await.unwrap();
    }
}
