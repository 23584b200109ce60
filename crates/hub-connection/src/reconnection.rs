//! Reconnect policy and the manager's reconnect timer.
//!
//! Two layers of recovery exist. The transport retries a dropped
//! connection on its own, asking a [`ReconnectPolicy`] for the delay. When
//! the transport gives up and closes, or the first connect fails, the
//! manager schedules a fresh connect through a [`ReconnectTimer`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Information a transport passes when asking whether to retry.
#[derive(Debug, Clone, Default)]
pub struct RetryContext {
    /// Retries already attempted in this recovery round.
    pub previous_retry_count: u32,
    /// Time spent recovering so far.
    pub elapsed: Duration,
    /// Error that caused the current recovery round.
    pub retry_reason: Option<String>,
}

/// Outcome of a reconnect policy decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try again after the given delay.
    RetryAfter(Duration),
    /// Stop retrying; the transport closes the connection.
    GiveUp,
}

/// Rule governing retry delay vs. give-up after a connection loss.
pub trait ReconnectPolicy: Send + Sync {
    fn next_retry(&self, ctx: &RetryContext) -> RetryDecision;
}

/// Retries forever at a fixed delay until shutdown is requested.
#[derive(Debug, Clone)]
pub struct FixedDelayPolicy {
    delay: Duration,
    shutdown: Arc<AtomicBool>,
}

impl FixedDelayPolicy {
    pub fn new(delay: Duration, shutdown: Arc<AtomicBool>) -> Self {
        Self { delay, shutdown }
    }
}

impl ReconnectPolicy for FixedDelayPolicy {
    fn next_retry(&self, ctx: &RetryContext) -> RetryDecision {
        if self.shutdown.load(Ordering::Acquire) {
            debug!(
                attempts = ctx.previous_retry_count,
                "shutdown requested, declining transport retry"
            );
            return RetryDecision::GiveUp;
        }
        RetryDecision::RetryAfter(self.delay)
    }
}

/// Single-slot reconnect timer.
///
/// At most one timer is pending; scheduling cancels the previous one.
/// Each timer carries a sequence number so a firing that raced with a
/// cancellation can be recognized as stale by [`take_due`](Self::take_due).
#[derive(Debug, Default)]
pub(crate) struct ReconnectTimer {
    pending: Option<(u64, CancellationToken)>,
    next_seq: u64,
}

impl ReconnectTimer {
    /// Schedules `fire(seq)` after `delay`, replacing any pending timer.
    pub(crate) fn schedule<F>(&mut self, delay: Duration, fire: F) -> u64
    where
        F: FnOnce(u64) + Send + 'static,
    {
        self.cancel();
        self.next_seq = self.next_seq.wrapping_add(1);
        let seq = self.next_seq;
        let cancel = CancellationToken::new();
        self.pending = Some((seq, cancel.clone()));

        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    trace!(seq, "reconnect timer cancelled");
                }
                _ = tokio::time::sleep(delay) => {
                    fire(seq);
                }
            }
        });
        seq
    }

    /// Cancels the pending timer, if any.
    pub(crate) fn cancel(&mut self) {
        if let Some((seq, token)) = self.pending.take() {
            trace!(seq, "cancelling pending reconnect timer");
            token.cancel();
        }
    }

    /// Clears the pending timer if `seq` is the one pending.
    ///
    /// Returns `false` for a firing from an already replaced or cancelled
    /// timer.
    pub(crate) fn take_due(&mut self, seq: u64) -> bool {
        let due = self.pending.as_ref().is_some_and(|(s, _)| *s == seq);
        if due {
            self.pending = None;
        }
        due
    }

    pub(crate) fn is_pending(&self) -> bool {
        self.pending.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn fixed_delay_until_shutdown() {
        let shutdown = Arc::new(AtomicBool::new(false));
        let policy = FixedDelayPolicy::new(Duration::from_millis(3000), shutdown.clone());
        let ctx = RetryContext::default();

        assert_eq!(
            policy.next_retry(&ctx),
            RetryDecision::RetryAfter(Duration::from_millis(3000))
        );

        shutdown.store(true, Ordering::Release);
        assert_eq!(policy.next_retry(&ctx), RetryDecision::GiveUp);
    }

    #[tokio::test(start_paused = true)]
    async fn timer_fires_after_delay() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timer = ReconnectTimer::default();
        let seq = timer.schedule(Duration::from_secs(3), move |s| {
            let _ = tx.send(s);
        });

        assert!(timer.is_pending());
        let fired = rx.recv().await.unwrap();
        assert_eq!(fired, seq);
        assert!(timer.take_due(fired));
        assert!(!timer.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn rescheduling_cancels_previous_timer() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timer = ReconnectTimer::default();

        let tx1 = tx.clone();
        let first = timer.schedule(Duration::from_secs(3), move |s| {
            let _ = tx1.send(s);
        });
        let second = timer.schedule(Duration::from_secs(3), move |s| {
            let _ = tx.send(s);
        });
        assert_ne!(first, second);

        let fired = rx.recv().await.unwrap();
        assert_eq!(fired, second);
        assert!(!timer.take_due(first));
        assert!(timer.take_due(second));

        // The first timer's sender was dropped on cancellation.
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_timer_never_fires() {
        let (tx, mut rx) = mpsc::unbounded_channel::<u64>();
        let mut timer = ReconnectTimer::default();
        timer.schedule(Duration::from_secs(3), move |s| {
            let _ = tx.send(s);
        });
        timer.cancel();
        assert!(!timer.is_pending());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_err());
    }
}
