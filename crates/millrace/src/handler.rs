use core::future::Future;

/// The work function executed by pool workers for each job payload.
///
/// A handler is chosen once, when the pool is built, and shared by every
/// worker behind an `Arc`. Implement it on an enum to offer several kinds of
/// work selected at construction time, or pass a closure: any
/// `Fn(P) -> impl Future<Output = Result<O, E>>` is a handler through the
/// blanket implementation below.
///
/// Returning `Err` (or panicking) fails only the current job. The worker
/// reports it as a [`Failure`](crate::Failure) and moves on to the next job.
///
/// # Example
///
/// ```
/// use millrace::Handler;
///
/// struct Double;
///
/// impl Handler<u32> for Double {
///     type Output = u32;
///     type Error = std::num::TryFromIntError;
///
///     async fn handle(&self, payload: u32) -> Result<u32, Self::Error> {
///         u32::try_from(u64::from(payload) * 2)
///     }
/// }
/// ```
pub trait Handler<P>: Send + Sync + 'static {
    type Output: Send + 'static;
    type Error: Send + 'static;

    /// Processes one payload.
    fn handle(&self, payload: P) -> impl Future<Output = Result<Self::Output, Self::Error>> + Send;
}

impl<P, F, Fut, O, E> Handler<P> for F
where
    F: Fn(P) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<O, E>> + Send,
    O: Send + 'static,
    E: Send + 'static,
{
    type Output = O;
    type Error = E;

    fn handle(&self, payload: P) -> impl Future<Output = Result<O, E>> + Send {
        self(payload)
    }
}
