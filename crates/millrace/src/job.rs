use core::fmt;

/// Identifier of a job within a single pool run.
///
/// Ids are assigned by the job source in submission order, starting at 0.
/// They are unique within a run and are what [`Reorder`](crate::Reorder) uses
/// to restore submission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct JobId(u64);

impl JobId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u64 {
        self.0
    }

    /// The id that follows this one.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

impl From<u64> for JobId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

/// A unit of work submitted to the pool. Immutable once enqueued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job<P> {
    pub id: JobId,
    pub payload: P,
}

impl<P> Job<P> {
    pub const fn new(id: JobId, payload: P) -> Self {
        Self { id, payload }
    }
}

/// Why a job did not produce an output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure<E> {
    /// The work function returned an error.
    Error(E),
    /// The work function panicked. Holds the panic message when it was a
    /// string, or a placeholder otherwise.
    Panic(String),
}

impl<E: fmt::Display> fmt::Display for Failure<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error(e) => write!(f, "job failed: {e}"),
            Self::Panic(msg) => write!(f, "job panicked: {msg}"),
        }
    }
}

/// The outcome of processing exactly one [`Job`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobResult<O, E> {
    /// Id of the job this result belongs to.
    pub id: JobId,
    /// Index of the worker that processed the job.
    pub worker: usize,
    pub outcome: Result<O, Failure<E>>,
}

impl<O, E> JobResult<O, E> {
    pub const fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    /// Returns the output, discarding the failure if there was one.
    pub fn ok(self) -> Option<O> {
        self.outcome.ok()
    }
}
