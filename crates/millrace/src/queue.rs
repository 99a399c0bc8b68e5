//! Bounded FIFO dispatch queue between the job source and the workers.
//!
//! [`DispatchQueue`] is a multi-producer, multi-consumer buffer with a fixed
//! capacity `C`:
//!
//! - `C > 0`: up to `C` jobs can wait in the queue. The next `enqueue`
//!   suspends until a worker dequeues one. This is the producer's
//!   backpressure.
//! - `C == 0`: direct handoff. `enqueue` does not return until a worker has
//!   taken the job. The handoff is acknowledged back to the producer over a
//!   oneshot, so the producer knows a worker is responsible for it. A
//!   producer that gives up first withdraws the job: workers skip it.
//!
//! Jobs are delivered in arrival order to *some* worker, never to two.
//! Closing the queue lets workers drain what is left and then observe
//! [`Dequeued::Closed`].
//!
//! Enqueueing after close and closing twice are lifecycle bugs in the caller
//! and panic.

use crate::{Error, Job, Result};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// A job travelling through the queue, plus the handoff acknowledgement used
/// when the queue has no buffer.
struct Envelope<P> {
    job: Job<P>,
    taken: Option<oneshot::Sender<()>>,
}

/// Result of a dequeue attempt.
#[derive(Debug, PartialEq, Eq)]
pub enum Dequeued<P> {
    /// The next job in arrival order.
    Job(Job<P>),
    /// The queue is closed and fully drained.
    Closed,
    /// The cancellation token fired while waiting.
    Cancelled,
}

/// Bounded MPMC job queue with backpressure. See the [module docs](self).
pub struct DispatchQueue<P> {
    tx: async_channel::Sender<Envelope<P>>,
    rx: async_channel::Receiver<Envelope<P>>,
    capacity: usize,
}

impl<P> DispatchQueue<P> {
    /// Creates a queue holding at most `capacity` jobs.
    ///
    /// A capacity of 0 creates a rendezvous queue.
    pub fn new(capacity: usize) -> Self {
        // The channel needs one slot for the envelope that is being handed
        // off; the producer stays suspended until a worker acknowledges it.
        let (tx, rx) = async_channel::bounded(capacity.max(1));
        Self { tx, rx, capacity }
    }

    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of jobs currently waiting for a worker.
    ///
    /// On a rendezvous queue this may count a withdrawn handoff until the next
    /// dequeue discards it.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Enqueues a job, suspending while the queue is full.
    ///
    /// With a capacity of 0, returns only once a worker has dequeued the job.
    ///
    /// # Panics
    ///
    /// Panics if the queue has been closed.
    pub async fn enqueue(&self, job: Job<P>) {
        let (envelope, taken) = self.wrap(job);

        if self.tx.send(envelope).await.is_err() {
            panic!("enqueue on a closed dispatch queue");
        }

        if let Some(taken) = taken {
            // The envelope can only be dropped unread together with the
            // queue itself, which `&self` keeps alive.
            let _ = taken.await;
        }
    }

    /// Like [`enqueue`](Self::enqueue), but gives up when `token` is
    /// cancelled while the caller is suspended.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] if the token fired before the job was
    /// accepted (or, for a rendezvous queue, before a worker took it). A job
    /// reported as cancelled is never delivered.
    ///
    /// # Panics
    ///
    /// Panics if the queue has been closed.
    pub async fn enqueue_or_cancel(&self, job: Job<P>, token: &CancellationToken) -> Result<()> {
        let (envelope, taken) = self.wrap(job);

        tokio::select! {
            biased;
            () = token.cancelled() => return Err(Error::Cancelled),
            sent = self.tx.send(envelope) => {
                if sent.is_err() {
                    panic!("enqueue on a closed dispatch queue");
                }
            }
        }

        if let Some(mut taken) = taken {
            tokio::select! {
                biased;
                () = token.cancelled() => {
                    // A worker may have taken it in the meantime; otherwise
                    // closing the ack withdraws the job.
                    taken.close();
                    if taken.try_recv().is_err() {
                        return Err(Error::Cancelled);
                    }
                }
                _ = &mut taken => {}
            }
        }

        Ok(())
    }

    /// Signals that no further jobs will be enqueued.
    ///
    /// Jobs already queued are still delivered.
    ///
    /// # Panics
    ///
    /// Panics if the queue was already closed.
    #[track_caller]
    pub fn close(&self) {
        if let Err(e) = self.try_close() {
            panic!("{e}");
        }
    }

    /// Non-panicking variant of [`close`](Self::close).
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyClosed`] if the queue was already closed.
    pub fn try_close(&self) -> Result<()> {
        if self.tx.close() {
            #[cfg(feature = "tracing")]
            tracing::trace!("Dispatch queue closed with {} jobs pending", self.len());
            Ok(())
        } else {
            Err(Error::AlreadyClosed)
        }
    }

    /// Takes the next job, waiting while the queue is empty and open.
    pub async fn dequeue(&self) -> Dequeued<P> {
        loop {
            match self.rx.recv().await {
                Ok(envelope) => {
                    if let Some(job) = Self::accept(envelope) {
                        return Dequeued::Job(job);
                    }
                }
                Err(_) => return Dequeued::Closed,
            }
        }
    }

    /// Like [`dequeue`](Self::dequeue), but returns [`Dequeued::Cancelled`]
    /// as soon as `token` fires. A cancelled token wins over pending jobs.
    pub async fn dequeue_or_cancel(&self, token: &CancellationToken) -> Dequeued<P> {
        tokio::select! {
            biased;
            () = token.cancelled() => Dequeued::Cancelled,
            next = self.dequeue() => next,
        }
    }

    fn wrap(&self, job: Job<P>) -> (Envelope<P>, Option<oneshot::Receiver<()>>) {
        if self.capacity == 0 {
            let (tx, rx) = oneshot::channel();
            (
                Envelope {
                    job,
                    taken: Some(tx),
                },
                Some(rx),
            )
        } else {
            (Envelope { job, taken: None }, None)
        }
    }

    /// Takes responsibility for the job, or returns `None` if its producer
    /// already withdrew it.
    fn accept(envelope: Envelope<P>) -> Option<Job<P>> {
        if let Some(taken) = envelope.taken {
            if taken.send(()).is_err() {
                #[cfg(feature = "tracing")]
                tracing::trace!("Skipping withdrawn handoff of {}", envelope.job.id);
                return None;
            }
        }
        Some(envelope.job)
    }
}

impl<P> core::fmt::Debug for DispatchQueue<P> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DispatchQueue")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}
