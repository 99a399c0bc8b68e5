//! Size-or-time batching.
//!
//! A [`Batcher`] groups items from a channel into `Vec`s. A batch is emitted
//! as soon as one of these holds:
//!
//! - it reached `max_size` items,
//! - `flush_after` has passed since its first item arrived,
//! - the input closed (the partial batch is emitted as is).
//!
//! Empty batches are never emitted.

use core::time::Duration;
use tokio::{sync::mpsc, time::Instant};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Batcher {
    max_size: usize,
    flush_after: Duration,
}

impl Batcher {
    /// A batcher emitting at most `max_size` items per batch (at least 1), and
    /// holding the first item of a batch for no longer than `flush_after`.
    pub fn new(max_size: usize, flush_after: Duration) -> Self {
        Self {
            max_size: max_size.max(1),
            flush_after,
        }
    }

    pub const fn max_size(&self) -> usize {
        self.max_size
    }

    pub const fn flush_after(&self) -> Duration {
        self.flush_after
    }

    /// Starts batching `input` on a new task and returns the batch channel.
    ///
    /// The batch channel closes after the input closed and the last partial
    /// batch was delivered, or when `token` fires. A cancelled batcher drops
    /// the batch it was building.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn run<T>(
        self,
        mut input: mpsc::Receiver<T>,
        token: CancellationToken,
    ) -> mpsc::Receiver<Vec<T>>
    where
        T: Send + 'static,
    {
        let (tx, rx) = mpsc::channel(1);

        tokio::spawn(async move {
            let mut batch = Vec::with_capacity(self.max_size);
            let mut deadline: Option<Instant> = None;

            loop {
                // The timer branch is disabled while the batch is empty, so
                // the fallback instant is never awaited.
                let flush_at = deadline.unwrap_or_else(Instant::now);

                let flush = tokio::select! {
                    biased;
                    () = token.cancelled() => break,
                    item = input.recv() => match item {
                        Some(item) => {
                            if batch.is_empty() {
                                deadline = Some(Instant::now() + self.flush_after);
                            }
                            batch.push(item);
                            batch.len() >= self.max_size
                        }
                        None => {
                            if !batch.is_empty() {
                                let last = core::mem::take(&mut batch);
                                tokio::select! {
                                    biased;
                                    () = token.cancelled() => {}
                                    _ = tx.send(last) => {}
                                }
                            }
                            break;
                        }
                    },
                    () = tokio::time::sleep_until(flush_at), if deadline.is_some() => true,
                };

                if !flush {
                    continue;
                }

                deadline = None;
                let full = core::mem::replace(&mut batch, Vec::with_capacity(self.max_size));

                #[cfg(feature = "tracing")]
                tracing::trace!("Flushing batch of {}", full.len());

                let sent = tokio::select! {
                    biased;
                    () = token.cancelled() => break,
                    sent = tx.send(full) => sent,
                };
                if sent.is_err() {
                    break;
                }
            }
        });

        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    #[tokio::test(start_paused = true)]
    async fn flushes_by_size_then_remainder_on_close() {
        let (tx, rx) = mpsc::channel(1);
        let mut batches = Batcher::new(5, Duration::from_millis(300))
            .run(rx, CancellationToken::new());

        tokio::spawn(async move {
            for i in 1..=17 {
                tx.send(i).await.unwrap();
                sleep(Duration::from_millis(50)).await;
            }
        });

        let mut sizes = Vec::new();
        let mut items = Vec::new();
        while let Some(batch) = batches.recv().await {
            sizes.push(batch.len());
            items.extend(batch);
        }

        assert_eq!(sizes, vec![5, 5, 5, 2]);
        assert_eq!(items, (1..=17).collect::<Vec<_>>());
    }

    #[tokio::test(start_paused = true)]
    async fn flushes_a_partial_batch_after_the_timeout() {
        let (tx, rx) = mpsc::channel(4);
        let mut batches = Batcher::new(10, Duration::from_millis(100))
            .run(rx, CancellationToken::new());

        let start = Instant::now();
        tx.send('a').await.unwrap();
        tx.send('b').await.unwrap();

        // The sender stays open: only the timer can release the batch.
        assert_eq!(batches.recv().await, Some(vec!['a', 'b']));
        assert!(start.elapsed() >= Duration::from_millis(100));

        tx.send('c').await.unwrap();
        drop(tx);
        assert_eq!(batches.recv().await, Some(vec!['c']));
        assert_eq!(batches.recv().await, None);
    }

    #[tokio::test]
    async fn never_emits_empty_batches() {
        let (tx, rx) = mpsc::channel::<u8>(1);
        let mut batches = Batcher::new(3, Duration::from_millis(1))
            .run(rx, CancellationToken::new());
        drop(tx);
        assert_eq!(batches.recv().await, None);
    }

    #[tokio::test]
    async fn cancellation_closes_the_batch_channel() {
        let (tx, rx) = mpsc::channel(1);
        let token = CancellationToken::new();
        let mut batches = Batcher::new(3, Duration::from_secs(60)).run(rx, token.clone());

        tx.send(1).await.unwrap();
        token.cancel();
        assert_eq!(batches.recv().await, None);
    }
}
