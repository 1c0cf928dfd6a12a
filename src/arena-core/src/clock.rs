//! Per-round turn clock.
//!
//! One timer task per active round. Expiry and a manual submit race for the
//! same round advance; the session resolves the race under its own lock with
//! a round-number guard, so a stale expiry callback is a no-op even if the
//! abort here loses the race.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::trace;

pub struct TurnClock {
    armed: Option<ArmedRound>,
}

struct ArmedRound {
    round: u32,
    task: JoinHandle<()>,
}

impl TurnClock {
    pub fn new() -> Self {
        Self { armed: None }
    }

    pub fn armed_round(&self) -> Option<u32> {
        self.armed.as_ref().map(|a| a.round)
    }

    /// Start the countdown for a round. Any previously armed round is
    /// aborted first; only one timer exists per session.
    pub fn arm<F, Fut>(&mut self, round: u32, duration: Duration, on_expiry: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.disarm();
        trace!(round, ?duration, "turn clock armed");
        let task = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            on_expiry().await;
        });
        self.armed = Some(ArmedRound { round, task });
    }

    /// Stop the countdown early, called when the speaker submits before
    /// expiry. Returns false when the given round is not the armed one
    /// (the timer already fired or was re-armed).
    pub fn cancel(&mut self, round: u32) -> bool {
        match &self.armed {
            Some(armed) if armed.round == round => {
                self.disarm();
                true
            }
            _ => false,
        }
    }

    /// Forget the armed round after its timer fired. Never aborts: the
    /// caller IS the timer task, and aborting it here would cancel the
    /// advance it is in the middle of driving.
    pub fn expired(&mut self, round: u32) {
        if self.armed.as_ref().map(|a| a.round) == Some(round) {
            self.armed = None;
        }
    }

    /// Abort whatever is armed, if anything.
    pub fn disarm(&mut self) {
        if let Some(armed) = self.armed.take() {
            armed.task.abort();
        }
    }
}

impl Default for TurnClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TurnClock {
    fn drop(&mut self) {
        self.disarm();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_expiry_fires_once() {
        let fired = Arc::new(AtomicU32::new(0));
        let mut clock = TurnClock::new();
        let f = Arc::clone(&fired);
        clock.arm(1, Duration::from_secs(60), move || async move {
            f.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_suppresses_expiry() {
        let fired = Arc::new(AtomicU32::new(0));
        let mut clock = TurnClock::new();
        let f = Arc::clone(&fired);
        clock.arm(1, Duration::from_secs(60), move || async move {
            f.fetch_add(1, Ordering::SeqCst);
        });

        assert!(clock.cancel(1));
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_of_stale_round_is_noop() {
        let mut clock = TurnClock::new();
        clock.arm(2, Duration::from_secs(60), || async {});
        assert!(!clock.cancel(1));
        assert_eq!(clock.armed_round(), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_replaces_previous_round() {
        let fired = Arc::new(AtomicU32::new(0));
        let mut clock = TurnClock::new();
        let f1 = Arc::clone(&fired);
        clock.arm(1, Duration::from_secs(60), move || async move {
            f1.fetch_add(1, Ordering::SeqCst);
        });
        let f2 = Arc::clone(&fired);
        clock.arm(2, Duration::from_secs(30), move || async move {
            f2.fetch_add(10, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_secs(120)).await;
        // only the round-2 timer ran
        assert_eq!(fired.load(Ordering::SeqCst), 10);
    }
}
