//! Bounded worker pool with graceful drain.
//!
//! A run wires four kinds of tasks together:
//!
//! ```text
//! job source --> DispatchQueue --> WorkerSet (n tasks) --> result sink --> consumer
//!                                        |                     ^
//!                                        +--> coordinator -----+ (closes once)
//! ```
//!
//! - The **job source** assigns ids in submission order, enqueues every
//!   payload (suspending when the queue is full) and closes the queue.
//! - The **workers** pull jobs until the queue is closed and drained.
//! - The **coordinator** waits for all workers on its own task and then
//!   closes the sink, so the consumer can drain results while workers are
//!   still producing.
//! - The **consumer** is the caller, polling the returned [`ResultStream`].
//!
//! Cancellation (caller token or deadline) is observed at every queue and
//! sink suspension point. A job that is already running always completes.
//!
//! ## Submodules
//!
//! - [`config`] - Run configuration and validation.
//! - [`worker`] - The worker loop and the [`WorkerSet`] that owns it.
//! - [`coordinator`] - Joins workers and closes the sink exactly once.

pub mod config;
pub mod coordinator;
pub mod worker;

use crate::{
    DispatchQueue, Handler, Job, JobId, PoolStats, Result, ResultStream,
    pool::{
        config::PoolConfig,
        coordinator::{Deadline, LifecycleCoordinator},
        worker::WorkerSet,
    },
};
use futures::{Stream, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Runs `handler` over every item of `jobs` on a bounded pool of workers.
///
/// Returns immediately with a [`ResultStream`]; the work happens on spawned
/// tasks. Exactly one result is produced per job that a worker picked up.
/// Without cancellation that is every job.
///
/// # Errors
///
/// Returns [`Error::InvalidConfig`](crate::Error::InvalidConfig) if `config`
/// fails validation. Nothing is spawned in that case.
///
/// # Panics
///
/// Panics if called outside a Tokio runtime.
///
/// # Example
///
/// ```
/// use futures::StreamExt;
/// use millrace::{PoolConfig, run_pool};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> millrace::Result<()> {
/// let config = PoolConfig::new(3).with_order_preserving(true);
/// let mut results = run_pool(1..=5_u32, config, |n: u32| async move {
///     Ok::<_, std::convert::Infallible>(n * n)
/// })?;
///
/// let mut squares = Vec::new();
/// while let Some(result) = results.next().await {
///     squares.extend(result.ok());
/// }
/// assert_eq!(squares, vec![1, 4, 9, 16, 25]);
/// # Ok(())
/// # }
/// ```
pub fn run_pool<I, H>(
    jobs: I,
    config: PoolConfig,
    handler: H,
) -> Result<ResultStream<H::Output, H::Error>>
where
    I: IntoIterator,
    I::IntoIter: Send + 'static,
    I::Item: Send + 'static,
    H: Handler<I::Item>,
{
    run_pool_stream(futures::stream::iter(jobs), config, handler)
}

/// Like [`run_pool`], but pulls jobs from an asynchronous, possibly
/// unbounded, source.
///
/// # Errors
///
/// Returns [`Error::InvalidConfig`](crate::Error::InvalidConfig) if `config`
/// fails validation.
///
/// # Panics
///
/// Panics if called outside a Tokio runtime.
pub fn run_pool_stream<S, H>(
    jobs: S,
    config: PoolConfig,
    handler: H,
) -> Result<ResultStream<H::Output, H::Error>>
where
    S: Stream + Send + 'static,
    S::Item: Send + 'static,
    H: Handler<S::Item>,
{
    config.validate()?;

    #[cfg(feature = "tracing")]
    tracing::debug!(
        "Starting pool: {} workers, queue capacity {}, result capacity {}",
        config.workers,
        config.queue_capacity,
        config.effective_result_capacity()
    );

    // A child token: cancelling the run (deadline, dropped consumer, normal
    // shutdown) never cancels the caller's token, but the caller's token
    // always cancels the run.
    let token = config
        .cancellation
        .as_ref()
        .map_or_else(CancellationToken::new, CancellationToken::child_token);
    let stats = Arc::new(PoolStats::new());
    let queue = Arc::new(DispatchQueue::new(config.queue_capacity));
    let (sink, receiver) = mpsc::channel(config.effective_result_capacity());

    let workers = WorkerSet::spawn(
        config.workers,
        Arc::clone(&queue),
        &sink,
        Arc::new(handler),
        token.clone(),
        Arc::clone(&stats),
    );

    let deadline = config
        .deadline
        .map(|after| Deadline::start(after, token.clone()));
    let (coordinator, completion) = LifecycleCoordinator::new(workers, sink, token.clone());
    coordinator
        .with_deadline(deadline)
        .with_stats(Arc::clone(&stats))
        .spawn();

    tokio::spawn(feed_jobs(jobs, queue, token.clone(), Arc::clone(&stats)));

    Ok(ResultStream::new(
        receiver,
        config.order_preserving,
        completion,
        stats,
        token,
    ))
}

/// The job source: numbers payloads in submission order, enqueues them, and
/// closes the queue exactly once when the source is exhausted or the run is
/// cancelled.
async fn feed_jobs<S>(
    jobs: S,
    queue: Arc<DispatchQueue<S::Item>>,
    token: CancellationToken,
    stats: Arc<PoolStats>,
) where
    S: Stream,
{
    let mut jobs = core::pin::pin!(jobs);
    let mut next_id = JobId::default();

    loop {
        let payload = tokio::select! {
            biased;
            () = token.cancelled() => break,
            payload = jobs.next() => match payload {
                Some(payload) => payload,
                None => {
                    stats.record_source_exhausted();
                    break;
                }
            },
        };

        if queue
            .enqueue_or_cancel(Job::new(next_id, payload), &token)
            .await
            .is_err()
        {
            #[cfg(feature = "tracing")]
            tracing::debug!("Job source cancelled before enqueueing {next_id}");
            break;
        }

        stats.record_submitted();
        next_id = next_id.next();
    }

    #[cfg(feature = "tracing")]
    tracing::debug!("Job source done after {} jobs", next_id.get());

    queue.close();
}
