use crate::{Dequeued, DispatchQueue, Failure, Handler, JobResult, PoolStats};
use futures::FutureExt;
use std::{any::Any, panic::AssertUnwindSafe, sync::Arc};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;

/// Result item type published by workers running handler `H` on payload `P`.
pub type HandlerResult<P, H> =
    JobResult<<H as Handler<P>>::Output, <H as Handler<P>>::Error>;

/// Why a worker left its dequeue loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// The dispatch queue was closed and drained.
    Drained,
    /// The run's cancellation token fired at a suspension point.
    Cancelled,
    /// The result sink was closed by its consumer.
    SinkClosed,
}

/// The fixed set of worker tasks of one pool run.
///
/// Handed to the [`LifecycleCoordinator`](crate::LifecycleCoordinator), which
/// joins every worker before closing the result sink.
#[derive(Debug)]
pub struct WorkerSet {
    handles: Vec<JoinHandle<WorkerExit>>,
}

impl WorkerSet {
    /// Spawns exactly `n` workers on the current Tokio runtime.
    ///
    /// Every worker dequeues from `queue`, runs `handler`, and publishes to
    /// its own clone of `sink`. The caller keeps `sink` and passes it to the
    /// coordinator, so the result channel stays open until the coordinator
    /// decides to close it.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn spawn<P, H>(
        n: usize,
        queue: Arc<DispatchQueue<P>>,
        sink: &mpsc::Sender<HandlerResult<P, H>>,
        handler: Arc<H>,
        token: CancellationToken,
        stats: Arc<PoolStats>,
    ) -> Self
    where
        P: Send + 'static,
        H: Handler<P>,
    {
        let handles = (0..n)
            .map(|worker_id| {
                tokio::spawn(worker_loop(
                    worker_id,
                    Arc::clone(&queue),
                    sink.clone(),
                    Arc::clone(&handler),
                    token.clone(),
                    Arc::clone(&stats),
                ))
            })
            .collect();

        Self { handles }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub(crate) fn into_handles(self) -> Vec<JoinHandle<WorkerExit>> {
        self.handles
    }
}

/// Worker task: dequeue, execute, publish, until the queue drains or the run
/// is cancelled.
///
/// A job that returns an error or panics is reported as a [`Failure`]; the
/// worker itself keeps going. Cancellation is observed only while waiting on
/// the queue or on the sink, never in the middle of a job.
///
/// # Arguments
///
/// - `worker_id`: Index of this worker, stamped on every result it publishes.
/// - `queue`: Shared dispatch queue.
/// - `sink`: This worker's handle on the result sink.
/// - `handler`: Work function shared by the whole pool.
/// - `token`: The run's cancellation token.
/// - `stats`: The run's counters.
async fn worker_loop<P, H>(
    worker_id: usize,
    queue: Arc<DispatchQueue<P>>,
    sink: mpsc::Sender<HandlerResult<P, H>>,
    handler: Arc<H>,
    token: CancellationToken,
    stats: Arc<PoolStats>,
) -> WorkerExit
where
    H: Handler<P>,
{
    #[cfg(feature = "tracing")]
    tracing::trace!("Worker {worker_id} started");

    let exit = loop {
        let job = match queue.dequeue_or_cancel(&token).await {
            Dequeued::Job(job) => job,
            Dequeued::Closed => break WorkerExit::Drained,
            Dequeued::Cancelled => break WorkerExit::Cancelled,
        };

        #[cfg(feature = "tracing")]
        tracing::trace!("Worker {worker_id} picked up {}", job.id);

        let outcome = execute(handler.as_ref(), job.payload).await;
        match &outcome {
            Ok(_) => stats.record_succeeded(),
            Err(Failure::Error(_)) => stats.record_failed(),
            Err(Failure::Panic(_msg)) => {
                #[cfg(feature = "tracing")]
                tracing::warn!("Worker {worker_id}: {} panicked: {_msg}", job.id);
                stats.record_panicked();
            }
        }

        let result = JobResult {
            id: job.id,
            worker: worker_id,
            outcome,
        };

        // Publish before looking at the token so a finished job is not lost
        // when there is room in the sink.
        tokio::select! {
            biased;
            sent = sink.send(result) => {
                if sent.is_err() {
                    #[cfg(feature = "tracing")]
                    tracing::debug!("Worker {worker_id}: result sink closed, stopping run");
                    stats.record_discarded();
                    token.cancel();
                    break WorkerExit::SinkClosed;
                }
            }
            () = token.cancelled() => {
                stats.record_discarded();
                break WorkerExit::Cancelled;
            }
        }
    };

    stats.record_worker_exit();

    #[cfg(feature = "tracing")]
    tracing::trace!("Worker {worker_id} stopped: {exit:?}");

    exit
}

/// Runs one job and turns both `Err` and a panic into a [`Failure`].
pub(crate) async fn execute<P, H>(handler: &H, payload: P) -> Result<H::Output, Failure<H::Error>>
where
    H: Handler<P>,
{
    // The call sits inside the async block so a panic raised before the
    // handler's future is even built is caught as well.
    let run = AssertUnwindSafe(async move { handler.handle(payload).await });

    match run.catch_unwind().await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(e)) => Err(Failure::Error(e)),
        Err(panic) => Err(Failure::Panic(panic_message(panic.as_ref()))),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
