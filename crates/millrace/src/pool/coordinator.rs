//! Lifecycle coordination for a pool run.
//!
//! The [`LifecycleCoordinator`] owns the worker join handles and the primary
//! sender of the result sink. Once every worker has exited it reports how the
//! run ended and drops the sender, which closes the sink exactly once.
//!
//! It must run as its own task ([`LifecycleCoordinator::spawn`]). Waiting for
//! the workers in the same control flow that later drains the sink
//! ([`LifecycleCoordinator::wait`]) deadlocks as soon as the sink holds fewer
//! slots than there are results: workers block publishing to a sink nobody
//! reads while the caller blocks on the workers.

use super::worker::{WorkerExit, WorkerSet};
use crate::{Completion, PoolStats};
use core::time::Duration;
use portable_atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

/// Cancels a run's token once a fixed amount of time has passed, remembering
/// whether it was the one that fired.
#[derive(Debug)]
pub(crate) struct Deadline {
    fired: Arc<AtomicBool>,
    timer: JoinHandle<()>,
}

impl Deadline {
    pub(crate) fn start(after: Duration, token: CancellationToken) -> Self {
        let fired = Arc::new(AtomicBool::new(false));
        let timer = {
            let fired = Arc::clone(&fired);
            tokio::spawn(async move {
                tokio::select! {
                    () = tokio::time::sleep(after) => {
                        #[cfg(feature = "tracing")]
                        tracing::debug!("Deadline of {after:?} elapsed, cancelling run");
                        fired.store(true, Ordering::Release);
                        token.cancel();
                    }
                    () = token.cancelled() => {}
                }
            })
        };
        Self { fired, timer }
    }

    fn fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }
}

impl Drop for Deadline {
    fn drop(&mut self) {
        self.timer.abort();
    }
}

/// Joins the workers of one run and closes its result sink. See the
/// [module docs](self).
#[derive(Debug)]
pub struct LifecycleCoordinator<R> {
    workers: Vec<JoinHandle<WorkerExit>>,
    sink: mpsc::Sender<R>,
    token: CancellationToken,
    deadline: Option<Deadline>,
    stats: Option<Arc<PoolStats>>,
    report: oneshot::Sender<Completion>,
}

impl<R: Send + 'static> LifecycleCoordinator<R> {
    /// Creates a coordinator for `workers`, taking ownership of the last
    /// sender of the result sink.
    ///
    /// Returns the coordinator and the receiver on which the run's
    /// [`Completion`] is reported.
    pub fn new(
        workers: WorkerSet,
        sink: mpsc::Sender<R>,
        token: CancellationToken,
    ) -> (Self, oneshot::Receiver<Completion>) {
        let (report, completion) = oneshot::channel();
        let coordinator = Self {
            workers: workers.into_handles(),
            sink,
            token,
            deadline: None,
            stats: None,
            report,
        };
        (coordinator, completion)
    }

    pub(crate) fn with_deadline(mut self, deadline: Option<Deadline>) -> Self {
        self.deadline = deadline;
        self
    }

    pub(crate) fn with_stats(mut self, stats: Arc<PoolStats>) -> Self {
        self.stats = Some(stats);
        self
    }

    /// Runs the coordinator as an independent task. This is the only safe way
    /// to use it when the consumer drains the sink afterwards.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn spawn(self) -> JoinHandle<Completion> {
        tokio::spawn(self.wait())
    }

    /// Waits for every worker in the current control flow, then closes the
    /// sink.
    ///
    /// Only call this when something else is already draining the sink, or
    /// when the sink is large enough for every result. Otherwise it never
    /// returns.
    pub async fn wait(self) -> Completion {
        let Self {
            workers,
            sink,
            token,
            deadline,
            stats,
            report,
        } = self;

        #[cfg(feature = "tracing")]
        tracing::debug!("Waiting for {} workers", workers.len());

        let mut drained = true;
        for (_i, exit) in futures::future::join_all(workers)
            .await
            .into_iter()
            .enumerate()
        {
            match exit {
                Ok(WorkerExit::Drained) => {
                    #[cfg(feature = "tracing")]
                    tracing::trace!("Worker {_i} drained");
                }
                Ok(_exit) => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!("Worker {_i} exited early: {_exit:?}");
                    drained = false;
                }
                Err(_e) => {
                    #[cfg(feature = "tracing")]
                    tracing::error!("Worker {_i} terminated abnormally: {_e}");
                    // It never reached its own exit bookkeeping.
                    if let Some(stats) = &stats {
                        stats.record_worker_exit();
                    }
                    drained = false;
                }
            }
        }

        // Workers that were cancelled while idle after the last job still
        // leave a fully delivered run behind.
        let delivered = stats.as_ref().is_some_and(|stats| stats.all_delivered());

        let completion = if drained || delivered {
            Completion::Drained
        } else if deadline.as_ref().is_some_and(Deadline::fired) {
            Completion::DeadlineExceeded
        } else {
            Completion::Cancelled
        };

        // Releases the job source if it is still blocked on the queue, and
        // stops the deadline timer. The run token is a child of the caller's
        // token, so cancelling it never propagates upward.
        token.cancel();
        drop(deadline);

        #[cfg(feature = "tracing")]
        match &stats {
            Some(stats) => tracing::info!("Run {completion}: {}", stats.snapshot()),
            None => tracing::info!("Run {completion}"),
        }

        if report.send(completion).is_err() {
            #[cfg(feature = "tracing")]
            tracing::debug!("Completion receiver dropped before the report");
        }

        // Last sender: the consumer observes the end of the stream from here.
        drop(sink);

        completion
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DispatchQueue, Job, JobResult};
    use core::convert::Infallible;
    use tokio::time::{sleep, timeout};

    type Item = JobResult<u64, Infallible>;

    async fn slow_double(x: u64) -> Result<u64, Infallible> {
        sleep(Duration::from_millis(10)).await;
        Ok(x * 2)
    }

    async fn filled_queue(jobs: u64) -> Arc<DispatchQueue<u64>> {
        let queue = Arc::new(DispatchQueue::new(jobs as usize));
        for i in 0..jobs {
            queue.enqueue(Job::new(i.into(), i)).await;
        }
        queue.close();
        queue
    }

    #[tokio::test(start_paused = true)]
    async fn inline_wait_with_small_sink_deadlocks() {
        let queue = filled_queue(10).await;
        let (tx, mut rx) = mpsc::channel::<Item>(2);
        let token = CancellationToken::new();
        let workers = WorkerSet::spawn(
            3,
            queue,
            &tx,
            Arc::new(slow_double),
            token.clone(),
            Arc::new(PoolStats::new()),
        );
        let (coordinator, _completion) = LifecycleCoordinator::new(workers, tx, token.clone());

        // Nobody drains the sink while we wait on the workers.
        let hung = timeout(Duration::from_secs(5), coordinator.wait()).await;
        assert!(hung.is_err(), "inline wait must hang with a 2-slot sink");

        // Unstick the workers so the test runtime can shut down.
        token.cancel();
        while rx.recv().await.is_some() {}
    }

    #[tokio::test(start_paused = true)]
    async fn spawned_coordinator_lets_the_consumer_drain() {
        let queue = filled_queue(10).await;
        let (tx, mut rx) = mpsc::channel::<Item>(2);
        let token = CancellationToken::new();
        let workers = WorkerSet::spawn(
            3,
            queue,
            &tx,
            Arc::new(slow_double),
            token.clone(),
            Arc::new(PoolStats::new()),
        );
        let (coordinator, completion) = LifecycleCoordinator::new(workers, tx, token);
        let handle = coordinator.spawn();

        let mut outputs = Vec::new();
        while let Some(result) = rx.recv().await {
            outputs.push(result.ok().unwrap());
        }
        outputs.sort_unstable();

        assert_eq!(outputs, (0..10).map(|x| x * 2).collect::<Vec<_>>());
        assert_eq!(completion.await, Ok(Completion::Drained));
        assert_eq!(handle.await.unwrap(), Completion::Drained);
    }

    /// Two jobs queued but the queue left open, as in the moment between the
    /// source running dry and the queue being closed.
    async fn open_queue_with_two_jobs(stats: &PoolStats) -> Arc<DispatchQueue<u64>> {
        let queue = Arc::new(DispatchQueue::new(2));
        for i in 0..2 {
            queue.enqueue(Job::new(i.into(), i)).await;
            stats.record_submitted();
        }
        queue
    }

    async fn cancel_after_two_results(
        stats: Arc<PoolStats>,
        queue: Arc<DispatchQueue<u64>>,
    ) -> Completion {
        let (tx, mut rx) = mpsc::channel::<Item>(2);
        let token = CancellationToken::new();
        let workers = WorkerSet::spawn(
            2,
            queue,
            &tx,
            Arc::new(slow_double),
            token.clone(),
            Arc::clone(&stats),
        );
        let (coordinator, completion) = LifecycleCoordinator::new(workers, tx, token.clone());
        let _handle = coordinator.with_stats(stats).spawn();

        for _ in 0..2 {
            assert!(rx.recv().await.is_some());
        }
        // Both workers are now idle on the open queue.
        sleep(Duration::from_millis(5)).await;
        token.cancel();
        while rx.recv().await.is_some() {}

        completion.await.unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn cancelling_idle_workers_after_every_result_is_still_drained() {
        let stats = Arc::new(PoolStats::new());
        let queue = open_queue_with_two_jobs(&stats).await;
        stats.record_source_exhausted();

        assert_eq!(
            cancel_after_two_results(stats, queue).await,
            Completion::Drained
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cancelling_before_the_source_ran_dry_is_cancelled() {
        let stats = Arc::new(PoolStats::new());
        let queue = open_queue_with_two_jobs(&stats).await;

        assert_eq!(
            cancel_after_two_results(stats, queue).await,
            Completion::Cancelled
        );
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_is_reported_distinctly() {
        let queue = filled_queue(10).await;
        let (tx, mut rx) = mpsc::channel::<Item>(10);
        let token = CancellationToken::new();
        let workers = WorkerSet::spawn(
            1,
            queue,
            &tx,
            Arc::new(slow_double),
            token.clone(),
            Arc::new(PoolStats::new()),
        );
        let deadline = Deadline::start(Duration::from_millis(25), token.clone());
        let (coordinator, completion) = LifecycleCoordinator::new(workers, tx, token);
        let _handle = coordinator.with_deadline(Some(deadline)).spawn();

        let mut received = 0;
        while rx.recv().await.is_some() {
            received += 1;
        }

        assert!(received < 10);
        assert_eq!(completion.await, Ok(Completion::DeadlineExceeded));
    }
}
