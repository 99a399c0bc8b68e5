use core::time::Duration;
use millrace::Handler;
use rand::Rng;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkError {
    #[error("job {0} hit an injected failure")]
    Injected(u64),
}

/// Simulated jobs run by the demo pools. The variant is picked once per run.
///
/// Every job takes a `u64` payload and returns its square, after sleeping to
/// stand in for I/O.
#[derive(Debug, Clone, Copy)]
pub enum Work {
    /// Sleeps exactly `duration`.
    Fixed { duration: Duration, failure_rate: f64 },
    /// Sleeps a random time in `0..=max`.
    Jittered { max: Duration, failure_rate: f64 },
    /// Sleeps longer for earlier payloads: `(span - payload) * step`. Used to
    /// force completion order to be the reverse of submission order.
    Reversed { span: u64, step: Duration },
}

impl Work {
    /// How long the job for `payload` sleeps, and whether it fails.
    fn plan(&self, payload: u64) -> (Duration, bool) {
        // The thread-local rng is not `Send`; it must not live across an await.
        let mut rng = rand::rng();
        match *self {
            Self::Fixed {
                duration,
                failure_rate,
            } => (duration, rng.random_bool(failure_rate)),
            Self::Jittered { max, failure_rate } => {
                let millis = rng.random_range(0..=max.as_millis() as u64);
                (Duration::from_millis(millis), rng.random_bool(failure_rate))
            }
            Self::Reversed { span, step } => {
                let factor = span.saturating_sub(payload).min(u64::from(u32::MAX)) as u32;
                (step * factor, false)
            }
        }
    }
}

impl Handler<u64> for Work {
    type Output = u64;
    type Error = WorkError;

    async fn handle(&self, payload: u64) -> Result<u64, WorkError> {
        let (delay, fail) = self.plan(payload);
        tokio::time::sleep(delay).await;

        if fail {
            return Err(WorkError::Injected(payload));
        }
        Ok(payload.wrapping_mul(payload))
    }
}
