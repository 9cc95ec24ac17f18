// Bounded durable event buffer with periodic flush.
//
// Events enter via enqueue, persist to the local store after every
// mutation, and leave in batches through an EventSink (the transport).
// A failed delivery puts the batch back at the head of the queue so
// ordering survives retries; overflow evicts the oldest event, which is
// the only way an event can be lost before delivery.
//
// # Architecture
//
// ```text
// EventTracker
//     │ enqueue()            ┌─ periodic task (flush_interval_ms) ─┐
//     ▼                      ▼                                     │
// ┌─────────────────────────────────┐     deliver()          ┌─────┴─────┐
// │ VecDeque<Event>  (≤ capacity)   ├────────────────────────► EventSink │
// │ snapshot → store["event_queue"] │  ◄─ requeue on failure └───────────┘
// └─────────────────────────────────┘
// ```

use crate::error::TransportError;
use crate::events::Event;
use crate::storage::KeyValueStore;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tokio::time::MissedTickBehavior;

/// Store key for the pending-flush snapshot
pub const QUEUE_KEY: &str = "event_queue";

/// Where flushed batches go. Implemented by the transport; tests inject
/// recording and failing sinks.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn deliver(&self, batch: &[Event]) -> Result<(), TransportError>;
}

/// Batching parameters; capacity is `batch_size * max_batches`
#[derive(Debug, Clone)]
pub struct BatchingConfig {
    pub batch_size: usize,
    pub flush_interval_ms: u64,
    pub max_batches: usize,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            flush_interval_ms: 5_000,
            max_batches: 10,
        }
    }
}

impl BatchingConfig {
    /// Hard cap on resident queued events
    pub fn capacity(&self) -> usize {
        self.batch_size * self.max_batches
    }
}

struct QueueState {
    pending: VecDeque<Event>,
    /// Reentrancy guard: at most one flush in flight
    is_processing: bool,
}

/// Bounded durable buffer between the tracker and the transport
pub struct EventQueue {
    state: Mutex<QueueState>,
    sink: Arc<dyn EventSink>,
    store: Arc<dyn KeyValueStore>,
    config: BatchingConfig,
    /// Dropping the sender stops the periodic task
    shutdown: std::sync::Mutex<Option<oneshot::Sender<()>>>,
}

impl EventQueue {
    pub fn new(config: BatchingConfig, sink: Arc<dyn EventSink>, store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            state: Mutex::new(QueueState {
                pending: VecDeque::with_capacity(config.capacity().min(1024)),
                is_processing: false,
            }),
            sink,
            store,
            config,
            shutdown: std::sync::Mutex::new(None),
        }
    }

    /// Append an event, evicting the oldest first if the queue is at
    /// capacity. Persists the snapshot, then triggers a flush once a full
    /// batch is resident. Flush failures are swallowed here - the batch is
    /// already requeued and the periodic cycle will retry.
    pub async fn enqueue(self: &Arc<Self>, event: Event) -> Result<(), TransportError> {
        let capacity = self.config.capacity().max(1);
        let should_flush = {
            let mut st = self.state.lock().await;
            while st.pending.len() >= capacity {
                let dropped = st.pending.pop_front();
                tracing::warn!(
                    "Event queue at capacity ({}); dropping oldest event {:?}",
                    capacity,
                    dropped.as_ref().map(|e| e.event_id.as_str())
                );
            }
            st.pending.push_back(event);
            self.persist_locked(&st)?;
            st.pending.len() >= self.config.batch_size
        };

        if should_flush {
            if let Err(e) = self.flush(false).await {
                tracing::debug!("Flush after enqueue failed, events requeued: {}", e);
            }
        }
        Ok(())
    }

    /// Deliver up to one batch. Returns immediately when another flush is
    /// in flight or when the queue is empty. On delivery failure the batch
    /// is prepended back in order and the error propagates to the caller.
    pub async fn flush(&self, force: bool) -> Result<(), TransportError> {
        tracing::trace!("Flush requested (force={})", force);
        let batch: Vec<Event> = {
            let mut st = self.state.lock().await;
            if st.is_processing {
                return Ok(());
            }
            if st.pending.is_empty() {
                // Nothing to flush, forced or not
                return Ok(());
            }
            st.is_processing = true;
            let take = self.config.batch_size.min(st.pending.len());
            st.pending.drain(..take).collect()
        };

        let result = self.sink.deliver(&batch).await;

        // The guard is cleared unconditionally, before the result is acted on
        let mut st = self.state.lock().await;
        st.is_processing = false;

        match result {
            Ok(()) => {
                tracing::debug!("Flushed {} events", batch.len());
                self.persist_locked(&st)?;
                Ok(())
            }
            Err(e) => {
                for event in batch.into_iter().rev() {
                    st.pending.push_front(event);
                }
                self.persist_locked(&st)?;
                Err(e)
            }
        }
    }

    /// Restore the pending buffer from the persisted snapshot. Anything
    /// beyond capacity (config may have shrunk) loses its oldest entries.
    pub async fn load_persisted(&self) -> Result<usize, TransportError> {
        let Some(raw) = self.store.get(QUEUE_KEY)? else {
            return Ok(0);
        };
        let mut restored: VecDeque<Event> = serde_json::from_str(&raw)?;
        while restored.len() > self.config.capacity() {
            restored.pop_front();
        }
        let count = restored.len();
        let mut st = self.state.lock().await;
        st.pending = restored;
        self.persist_locked(&st)?;
        tracing::debug!("Restored {} pending events from snapshot", count);
        Ok(count)
    }

    /// Start the periodic flush task. Errors are logged and swallowed;
    /// the task stops when `destroy` fires the shutdown channel.
    pub fn start_periodic(self: &Arc<Self>) {
        let (tx, mut rx) = oneshot::channel::<()>();
        *self.shutdown.lock().unwrap() = Some(tx);

        let queue = Arc::clone(self);
        tokio::spawn(async move {
            let period = Duration::from_millis(queue.config.flush_interval_ms.max(1));
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval.tick().await; // first tick is immediate; skip it

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = queue.flush(false).await {
                            tracing::warn!("Periodic flush failed, events requeued: {}", e);
                        }
                    }
                    _ = &mut rx => break,
                }
            }
            tracing::debug!("Periodic flush task stopped");
        });
    }

    /// Stop the timer, then force a final flush of whatever remains
    pub async fn destroy(&self) -> Result<(), TransportError> {
        if let Some(tx) = self.shutdown.lock().unwrap().take() {
            let _ = tx.send(());
        }
        self.flush(true).await
    }

    /// Drop all pending events and persist the empty snapshot
    pub async fn clear(&self) -> Result<(), TransportError> {
        let mut st = self.state.lock().await;
        st.pending.clear();
        self.persist_locked(&st)
    }

    pub async fn size(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    /// Snapshot of pending event ids, oldest first (test/introspection aid)
    pub async fn pending_ids(&self) -> Vec<String> {
        self.state
            .lock()
            .await
            .pending
            .iter()
            .map(|e| e.event_id.clone())
            .collect()
    }

    fn persist_locked(&self, st: &QueueState) -> Result<(), TransportError> {
        let snapshot = serde_json::to_string(&st.pending)?;
        self.store.set(QUEUE_KEY, &snapshot)
    }
}
