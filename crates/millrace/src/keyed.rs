//! Per-key sequential processing.
//!
//! [`KeyedDispatcher`] routes every item to a lane owned by its key. A lane
//! is one task with a bounded inbox, started the first time its key is seen,
//! so items sharing a key run one at a time in dispatch order, while items of
//! different keys run in parallel.
//!
//! Lanes live until [`KeyedDispatcher::finish`]. A workload with unbounded
//! key cardinality therefore keeps an unbounded number of lanes.

use crate::{Error, Handler, Job, JobId, JobResult, Result, pool::worker::execute};
use core::hash::Hash;
use parking_lot::Mutex;
use portable_atomic::{AtomicU64, Ordering};
use std::{collections::HashMap, sync::Arc};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;

/// A lane's result, tagged with the key it was dispatched under.
///
/// `result.id` is the global dispatch order; `result.worker` is the lane
/// index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyedResult<K, O, E> {
    pub key: K,
    pub result: JobResult<O, E>,
}

struct Lane<T> {
    inbox: mpsc::Sender<Job<T>>,
    task: JoinHandle<()>,
}

type SpawnLane<K, T> =
    Box<dyn Fn(K, usize, mpsc::Receiver<Job<T>>) -> JoinHandle<()> + Send + Sync>;

/// Dispatches items to one sequential lane per key. See the
/// [module docs](self).
pub struct KeyedDispatcher<K, T> {
    lanes: Mutex<HashMap<K, Lane<T>>>,
    spawn_lane: SpawnLane<K, T>,
    lane_capacity: usize,
    next_id: AtomicU64,
    token: CancellationToken,
}

impl<K, T> KeyedDispatcher<K, T>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    T: Send + 'static,
{
    /// Creates a dispatcher running `handler` in every lane.
    ///
    /// Each lane buffers up to `lane_capacity` items (at least 1) before
    /// [`dispatch`](Self::dispatch) suspends. Returns the dispatcher and the
    /// channel all lanes publish to; it must be drained concurrently with
    /// dispatching, and closes after [`finish`](Self::finish).
    pub fn new<H>(
        lane_capacity: usize,
        handler: H,
    ) -> (Self, mpsc::Receiver<KeyedResult<K, H::Output, H::Error>>)
    where
        H: Handler<T>,
    {
        Self::with_cancellation(lane_capacity, handler, CancellationToken::new())
    }

    /// Like [`new`](Self::new), with lanes that stop at their next
    /// suspension point once `token` fires.
    pub fn with_cancellation<H>(
        lane_capacity: usize,
        handler: H,
        token: CancellationToken,
    ) -> (Self, mpsc::Receiver<KeyedResult<K, H::Output, H::Error>>)
    where
        H: Handler<T>,
    {
        let lane_capacity = lane_capacity.max(1);
        let (results, rx) = mpsc::channel(lane_capacity);
        let handler = Arc::new(handler);

        let spawn_lane: SpawnLane<K, T> = {
            let token = token.clone();
            Box::new(move |key, index, inbox| {
                tokio::spawn(lane_loop(
                    key,
                    index,
                    inbox,
                    Arc::clone(&handler),
                    results.clone(),
                    token.clone(),
                ))
            })
        };

        let dispatcher = Self {
            lanes: Mutex::new(HashMap::new()),
            spawn_lane,
            lane_capacity,
            next_id: AtomicU64::new(0),
            token,
        };
        (dispatcher, rx)
    }

    /// Number of lanes started so far.
    pub fn lanes(&self) -> usize {
        self.lanes.lock().len()
    }

    /// Queues `item` on the lane for `key`, starting the lane if needed.
    ///
    /// Suspends while that lane's inbox is full; other lanes are unaffected.
    ///
    /// # Errors
    ///
    /// - [`Error::Cancelled`] if the dispatcher's token fired first.
    /// - [`Error::ChannelError`] if the lane already stopped (cancelled, or
    ///   its results are no longer read).
    ///
    /// # Panics
    ///
    /// Panics if a new lane has to be started outside a Tokio runtime.
    pub async fn dispatch(&self, key: K, item: T) -> Result<JobId> {
        let id = JobId::new(self.next_id.fetch_add(1, Ordering::Relaxed));

        // The guard is released before suspending on the inbox.
        let inbox = {
            let mut lanes = self.lanes.lock();
            let index = lanes.len();
            lanes
                .entry(key)
                .or_insert_with_key(|key| {
                    #[cfg(feature = "tracing")]
                    tracing::trace!("Starting lane {index}");

                    let (inbox, rx) = mpsc::channel(self.lane_capacity);
                    let task = (self.spawn_lane)(key.clone(), index, rx);
                    Lane { inbox, task }
                })
                .inbox
                .clone()
        };

        tokio::select! {
            biased;
            () = self.token.cancelled() => Err(Error::Cancelled),
            sent = inbox.send(Job::new(id, item)) => match sent {
                Ok(()) => Ok(id),
                Err(_) => Err(Error::ChannelError {
                    context: format!("lane stopped before accepting {id}"),
                }),
            },
        }
    }

    /// Requests that all lanes stop at their next suspension point.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Closes every lane and waits for them to process what they hold.
    ///
    /// The result channel closes once this returns.
    pub async fn finish(self) {
        let Self {
            lanes, spawn_lane, ..
        } = self;

        // The lane factory holds a results sender; only lanes may keep the
        // channel open from here on.
        drop(spawn_lane);

        let tasks: Vec<_> = lanes
            .into_inner()
            .into_values()
            .map(|Lane { inbox, task }| {
                drop(inbox);
                task
            })
            .collect();

        #[cfg(feature = "tracing")]
        tracing::debug!("Waiting for {} lanes", tasks.len());

        for (_i, joined) in futures::future::join_all(tasks)
            .await
            .into_iter()
            .enumerate()
        {
            if let Err(_e) = joined {
                #[cfg(feature = "tracing")]
                tracing::error!("Lane {_i} terminated abnormally: {_e}");
            }
        }
    }
}

impl<K, T> core::fmt::Debug for KeyedDispatcher<K, T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("KeyedDispatcher")
            .field("lanes", &self.lanes.lock().len())
            .field("lane_capacity", &self.lane_capacity)
            .finish_non_exhaustive()
    }
}

async fn lane_loop<K, T, H>(
    key: K,
    index: usize,
    mut inbox: mpsc::Receiver<Job<T>>,
    handler: Arc<H>,
    results: mpsc::Sender<KeyedResult<K, H::Output, H::Error>>,
    token: CancellationToken,
) where
    K: Clone,
    H: Handler<T>,
{
    loop {
        let job = tokio::select! {
            biased;
            () = token.cancelled() => break,
            job = inbox.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };

        let outcome = execute(handler.as_ref(), job.payload).await;
        let result = KeyedResult {
            key: key.clone(),
            result: JobResult {
                id: job.id,
                worker: index,
                outcome,
            },
        };

        let sent = tokio::select! {
            biased;
            sent = results.send(result) => sent,
            () = token.cancelled() => break,
        };
        if sent.is_err() {
            break;
        }
    }

    #[cfg(feature = "tracing")]
    tracing::trace!("Lane {index} stopped");
}
