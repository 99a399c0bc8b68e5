//! Channel-connected processing stages.
//!
//! Each stage is a single task reading from the previous stage's receiver and
//! writing to its own bounded sender. A stage closes its output when its input
//! closes, so closing the source ripples down the whole pipeline. All stages
//! stop at their next receive or send once the shared token fires; an item
//! already being processed is finished first.
//!
//! ```text
//! source --> stage --> stage_async --> ... --> consumer
//!                                   \
//!   other pipelines ---------------> merge --> consumer
//! ```
//!
//! Buffers are bounded: a slow stage back-pressures every stage before it.
//! A `capacity` of 0 is rounded up to 1.

use core::future::Future;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Sends `item` unless the token fires first. Returns `false` once the
/// stage should stop (cancelled, or nobody reads the output any more).
async fn forward<T>(tx: &mpsc::Sender<T>, item: T, token: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        () = token.cancelled() => false,
        sent = tx.send(item) => sent.is_ok(),
    }
}

/// Receives the next item unless the token fires first.
async fn pull<T>(rx: &mut mpsc::Receiver<T>, token: &CancellationToken) -> Option<T> {
    tokio::select! {
        biased;
        () = token.cancelled() => None,
        item = rx.recv() => item,
    }
}

/// Emits every item of `items`, then closes.
///
/// # Panics
///
/// Panics if called outside a Tokio runtime.
pub fn source<I>(items: I, capacity: usize, token: CancellationToken) -> mpsc::Receiver<I::Item>
where
    I: IntoIterator,
    I::IntoIter: Send + 'static,
    I::Item: Send + 'static,
{
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let items = items.into_iter();

    tokio::spawn(async move {
        for item in items {
            if !forward(&tx, item, &token).await {
                break;
            }
        }
        #[cfg(feature = "tracing")]
        tracing::trace!("Pipeline source finished");
    });

    rx
}

/// A synchronous stage: applies `f` to every input item. Returning `None`
/// drops the item, which makes filters and maps the same kind of stage.
///
/// # Panics
///
/// Panics if called outside a Tokio runtime.
pub fn stage<T, U, F>(
    mut input: mpsc::Receiver<T>,
    capacity: usize,
    token: CancellationToken,
    mut f: F,
) -> mpsc::Receiver<U>
where
    T: Send + 'static,
    U: Send + 'static,
    F: FnMut(T) -> Option<U> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(capacity.max(1));

    tokio::spawn(async move {
        while let Some(item) = pull(&mut input, &token).await {
            let Some(out) = f(item) else { continue };
            if !forward(&tx, out, &token).await {
                break;
            }
        }
    });

    rx
}

/// Like [`stage`], but `f` may suspend (I/O, timers). Items are still
/// processed one at a time, so the stage keeps input order.
///
/// Cancellation is observed between items: an item already handed to `f`
/// runs to completion, then its output is dropped.
///
/// # Panics
///
/// Panics if called outside a Tokio runtime.
pub fn stage_async<T, U, F, Fut>(
    mut input: mpsc::Receiver<T>,
    capacity: usize,
    token: CancellationToken,
    f: F,
) -> mpsc::Receiver<U>
where
    T: Send + 'static,
    U: Send + 'static,
    F: Fn(T) -> Fut + Send + 'static,
    Fut: Future<Output = Option<U>> + Send,
{
    let (tx, rx) = mpsc::channel(capacity.max(1));

    tokio::spawn(async move {
        while let Some(item) = pull(&mut input, &token).await {
            let Some(out) = f(item).await else { continue };
            if !forward(&tx, out, &token).await {
                break;
            }
        }
    });

    rx
}

/// Fans several receivers into one. The output closes once every input has
/// closed. Items from one input keep their relative order; there is no
/// ordering across inputs.
///
/// # Panics
///
/// Panics if called outside a Tokio runtime.
pub fn merge<T>(
    inputs: Vec<mpsc::Receiver<T>>,
    capacity: usize,
    token: CancellationToken,
) -> mpsc::Receiver<T>
where
    T: Send + 'static,
{
    let (tx, rx) = mpsc::channel(capacity.max(1));

    for mut input in inputs {
        let tx = tx.clone();
        let token = token.clone();
        tokio::spawn(async move {
            while let Some(item) = pull(&mut input, &token).await {
                if !forward(&tx, item, &token).await {
                    break;
                }
            }
        });
    }

    // Only the forwarders hold senders now.
    drop(tx);
    rx
}
