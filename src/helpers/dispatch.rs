// Copyright 2024-2026 The wirenet developers
// This file is part of the wirenet library.

// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at:

// http://www.apache.org/licenses/LICENSE-2.0

// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::Packet;

use futures_util::future::BoxFuture;
use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering::SeqCst},
    Arc,
};
use std::time::Duration;
use tokio::{
    sync::{mpsc, watch, Mutex},
    time::timeout,
};

/// How long a processor waits on an empty queue before retiring.
pub(crate) const PROCESSOR_DRAIN_WAIT: Duration = Duration::from_secs(5);

type Deliver = Arc<dyn Fn(Packet) -> BoxFuture<'static, ()> + Send + Sync>;

/// The per-socket processor pool: a packet FIFO plus a bounded set of
/// workers that drain it into the delivery closure.
///
/// Enqueueing spawns a worker only when no worker is idle on the queue and
/// the cap (0 = unbounded) permits another. The dispatch lock is taken
/// before the queue is released and held across the delivery alone, so
/// packets reach the callback in enqueue order at every cap value; caps
/// above one only buy head-of-line insurance. A worker that finds the queue
/// empty for longer than the drain wait retires, and is respawned if a
/// packet raced in while it was retiring. Closing the pool wakes parked
/// workers immediately.
#[derive(Clone)]
pub(crate) struct ProcessorPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    deliver: Deliver,
    max_processors: usize,
    drain_wait: Duration,
    queue_tx: mpsc::UnboundedSender<Packet>,
    queue_rx: Mutex<mpsc::UnboundedReceiver<Packet>>,
    queued: AtomicUsize,
    processors: AtomicUsize,
    idle: AtomicUsize,
    dispatch_lock: Mutex<()>,
    closed: AtomicBool,
    shutdown: watch::Sender<bool>,
}

impl ProcessorPool {
    pub fn new(max_processors: usize, drain_wait: Duration, deliver: Deliver) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(PoolInner {
                deliver,
                max_processors,
                drain_wait,
                queue_tx,
                queue_rx: Mutex::new(queue_rx),
                queued: AtomicUsize::new(0),
                processors: AtomicUsize::new(0),
                idle: AtomicUsize::new(0),
                dispatch_lock: Mutex::new(()),
                closed: AtomicBool::new(false),
                shutdown,
            }),
        }
    }

    /// Queues a packet for delivery, spawning a processor if none is free.
    pub fn enqueue(&self, packet: Packet) {
        if self.inner.closed.load(SeqCst) || self.inner.queue_tx.send(packet).is_err() {
            // The pool was closed; the socket is tearing down.
            return;
        }
        self.inner.queued.fetch_add(1, SeqCst);
        self.maybe_spawn();
    }

    /// Closes the pool: parked processors wake and retire at once, and
    /// anything not yet delivered is dropped.
    pub fn close(&self) {
        self.inner.closed.store(true, SeqCst);
        self.inner.shutdown.send_replace(true);
    }

    /// Waits (boundedly) for an in-flight delivery to finish. Parked
    /// processors do not hold the dispatch lock, so this only ever contends
    /// with an actual callback.
    pub async fn quiesce(&self, wait: Duration) {
        let _ = timeout(wait, self.inner.dispatch_lock.lock()).await;
    }

    fn maybe_spawn(&self) {
        let inner = &self.inner;
        if inner.idle.load(SeqCst) > 0 {
            return;
        }
        loop {
            let count = inner.processors.load(SeqCst);
            if inner.max_processors != 0 && count >= inner.max_processors {
                return;
            }
            if inner.processors.compare_exchange(count, count + 1, SeqCst, SeqCst).is_ok() {
                break;
            }
        }
        let pool = self.clone();
        tokio::spawn(async move { pool.run_processor().await });
    }

    async fn run_processor(self) {
        let inner = &self.inner;
        let mut shutdown = inner.shutdown.subscribe();

        enum Step {
            Packet(Packet),
            Idle,
            Closing,
        }

        loop {
            if inner.closed.load(SeqCst) {
                break;
            }
            // Park on the queue without the dispatch lock, waking on close.
            let mut queue = inner.queue_rx.lock().await;
            inner.idle.fetch_add(1, SeqCst);
            let step = tokio::select! {
                _ = shutdown.changed() => Step::Closing,
                next = timeout(inner.drain_wait, queue.recv()) => match next {
                    Ok(Some(packet)) => Step::Packet(packet),
                    Ok(None) => Step::Closing,
                    // Nothing to do for a whole drain interval.
                    Err(_) => Step::Idle,
                },
            };
            inner.idle.fetch_sub(1, SeqCst);
            match step {
                Step::Packet(packet) => {
                    inner.queued.fetch_sub(1, SeqCst);
                    // Taken before the queue is released, so another
                    // processor cannot overtake this packet; held across the
                    // delivery alone.
                    let _dispatch = inner.dispatch_lock.lock().await;
                    drop(queue);
                    (inner.deliver)(packet).await;
                }
                Step::Idle | Step::Closing => break,
            }
        }
        inner.processors.fetch_sub(1, SeqCst);
        if !inner.closed.load(SeqCst) && inner.queued.load(SeqCst) > 0 {
            self.maybe_spawn();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use deadline::deadline;
    use parking_lot::Mutex as SyncMutex;

    fn recording_pool(
        max_processors: usize,
        drain_wait: Duration,
    ) -> (ProcessorPool, Arc<SyncMutex<Vec<u8>>>) {
        let seen = Arc::new(SyncMutex::new(Vec::new()));
        let seen_ = seen.clone();
        let pool = ProcessorPool::new(
            max_processors,
            drain_wait,
            Arc::new(move |packet: Packet| {
                let seen = seen_.clone();
                Box::pin(async move {
                    seen.lock().extend_from_slice(packet.as_bytes());
                })
            }),
        );
        (pool, seen)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn packets_are_delivered_in_enqueue_order() {
        // A cap above one must not reorder delivery.
        let (pool, seen) = recording_pool(4, Duration::from_secs(1));
        for byte in 0..=99u8 {
            pool.enqueue(Packet::copy_from_slice(&[byte]));
        }
        let seen_ = seen.clone();
        deadline!(Duration::from_secs(5), move || seen_.lock().len() == 100);
        assert_eq!(*seen.lock(), (0..=99).collect::<Vec<u8>>());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn a_retired_processor_is_replaced_on_the_next_packet() {
        let (pool, seen) = recording_pool(1, Duration::from_millis(20));
        pool.enqueue(Packet::copy_from_slice(b"a"));
        let seen_ = seen.clone();
        deadline!(Duration::from_secs(5), move || seen_.lock().len() == 1);

        // Let the sole processor idle out past the drain wait.
        tokio::time::sleep(Duration::from_millis(100)).await;

        pool.enqueue(Packet::copy_from_slice(b"b"));
        let seen_ = seen.clone();
        deadline!(Duration::from_secs(5), move || seen_.lock().len() == 2);
        assert_eq!(*seen.lock(), b"ab");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn a_closed_pool_drops_new_packets() {
        let (pool, seen) = recording_pool(1, Duration::from_secs(1));
        pool.close();
        pool.enqueue(Packet::copy_from_slice(b"x"));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(seen.lock().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn closing_wakes_a_parked_processor_at_once() {
        // The drain wait is far longer than the test; close must not wait
        // for it.
        let (pool, seen) = recording_pool(1, Duration::from_secs(60));
        pool.enqueue(Packet::copy_from_slice(b"a"));
        let seen_ = seen.clone();
        deadline!(Duration::from_secs(5), move || seen_.lock().len() == 1);

        let started = std::time::Instant::now();
        pool.close();
        pool.quiesce(Duration::from_millis(500)).await;
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
