use crate::{Completion, Error, JobResult, PoolStats, Reorder, Result, StatsSnapshot};
use futures::{Stream, StreamExt};
use std::{
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};
use tokio::sync::oneshot;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

enum Results<T> {
    Unordered(ReceiverStream<T>),
    Ordered(Reorder<ReceiverStream<T>>),
}

enum CompletionState {
    Pending(oneshot::Receiver<Completion>),
    Ready(Completion),
    Lost,
}

/// The consumer side of a pool run.
///
/// Yields every [`JobResult`] the workers publish, in completion order (or in
/// submission order when the run was configured as order-preserving), and
/// ends once the lifecycle coordinator has closed the sink.
///
/// Results are buffered only up to the configured result capacity: workers
/// wait for this stream to be polled. Dropping it stops the run.
pub struct ResultStream<O, E> {
    results: Results<JobResult<O, E>>,
    completion: CompletionState,
    stats: Arc<PoolStats>,
    token: CancellationToken,
}

impl<O, E> ResultStream<O, E> {
    pub(crate) fn new(
        receiver: tokio::sync::mpsc::Receiver<JobResult<O, E>>,
        order_preserving: bool,
        completion: oneshot::Receiver<Completion>,
        stats: Arc<PoolStats>,
        token: CancellationToken,
    ) -> Self {
        let receiver = ReceiverStream::new(receiver);
        let results = if order_preserving {
            Results::Ordered(Reorder::new(receiver))
        } else {
            Results::Unordered(receiver)
        };

        Self {
            results,
            completion: CompletionState::Pending(completion),
            stats,
            token,
        }
    }

    /// Whether results are released in submission order.
    pub const fn is_order_preserving(&self) -> bool {
        matches!(self.results, Results::Ordered(_))
    }

    /// Current counters of the run.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Requests cooperative cancellation of the run.
    ///
    /// Workers finish the job they are executing, publish it if the sink has
    /// room, and stop. Keep polling the stream to observe the remaining
    /// results and the end of the run.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Waits for the coordinator's report of how the run ended.
    ///
    /// The report is sent once every worker has exited, so call this after
    /// the stream has ended (or while another task keeps draining it).
    ///
    /// # Errors
    ///
    /// Returns [`Error::CoordinatorLost`] if the coordinator went away
    /// without reporting.
    pub async fn completion(&mut self) -> Result<Completion> {
        if let CompletionState::Pending(rx) = &mut self.completion {
            let state = match rx.await {
                Ok(completion) => CompletionState::Ready(completion),
                Err(_) => CompletionState::Lost,
            };
            self.completion = state;
        }

        match self.completion {
            CompletionState::Ready(completion) => Ok(completion),
            CompletionState::Pending(_) | CompletionState::Lost => Err(Error::CoordinatorLost),
        }
    }

    /// Drains the stream and returns every result together with the
    /// completion reason.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CoordinatorLost`] if the coordinator went away
    /// without reporting.
    pub async fn collect_all(mut self) -> Result<(Vec<JobResult<O, E>>, Completion)> {
        let mut results = Vec::new();
        while let Some(result) = self.next().await {
            results.push(result);
        }
        let completion = self.completion().await?;
        Ok((results, completion))
    }
}

impl<O, E> Stream for ResultStream<O, E> {
    type Item = JobResult<O, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match &mut self.get_mut().results {
            Results::Unordered(rx) => rx.poll_next_unpin(cx),
            Results::Ordered(rx) => rx.poll_next_unpin(cx),
        }
    }
}

impl<O, E> core::fmt::Debug for ResultStream<O, E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ResultStream")
            .field("order_preserving", &self.is_order_preserving())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}
