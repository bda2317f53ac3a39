use std::{future::Future, time::Duration};

use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollOutcome {
    Ready,
    TimedOut,
    Cancelled,
}

/// Evaluates `predicate` right away and then every `interval`, until it holds,
/// `timeout` elapses or `cancel` fires. The last check happens at the deadline.
pub async fn poll_until<F, Fut>(
    interval: Duration,
    timeout: Duration,
    cancel: &CancellationToken,
    mut predicate: F,
) -> PollOutcome
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + timeout;

    loop {
        if cancel.is_cancelled() {
            return PollOutcome::Cancelled;
        }

        if predicate().await {
            return PollOutcome::Ready;
        }

        let now = Instant::now();
        if now >= deadline {
            return PollOutcome::TimedOut;
        }

        tokio::select! {
            _ = cancel.cancelled() => return PollOutcome::Cancelled,
            _ = sleep_until((now + interval).min(deadline)) => (),
        }
    }
}
