use core::fmt;

/// How a pool run ended.
///
/// Reported by the lifecycle coordinator once every worker has exited, just
/// before the result sink is closed:
///
/// - [`Completion::Drained`]: the source finished and every queued job was
///   processed.
/// - [`Completion::Cancelled`]: the caller's cancellation token fired; some
///   jobs may not have produced a result.
/// - [`Completion::DeadlineExceeded`]: the configured deadline elapsed before
///   the run drained.
///
/// Cancellation is a normal way for a run to end, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Completion {
    Drained,
    Cancelled,
    DeadlineExceeded,
}

impl Completion {
    /// Returns `true` unless the run drained normally.
    pub const fn is_early(self) -> bool {
        !matches!(self, Self::Drained)
    }
}

impl fmt::Display for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Drained => write!(f, "drained"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::DeadlineExceeded => write!(f, "deadline exceeded"),
        }
    }
}
