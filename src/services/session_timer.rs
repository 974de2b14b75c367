use crate::utils::time::{remaining_until, Clock};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Countdown to a server-issued deadline.
///
/// Remaining time is recomputed from the deadline on every tick rather than
/// decremented, so throttled or skipped ticks cannot stretch the exam. The
/// published value never increases. `on_expire` runs at most once; if the
/// deadline has already passed it runs on the first tick.
pub struct SessionTimer {
    deadline: DateTime<Utc>,
    remaining: watch::Receiver<Duration>,
    cancel: CancellationToken,
}

impl SessionTimer {
    pub fn start<F>(deadline: DateTime<Utc>, clock: Arc<dyn Clock>, tick: Duration, on_expire: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self::start_linked(deadline, clock, tick, &CancellationToken::new(), on_expire)
    }

    /// Like `start`, but the timer also stops when `parent` is cancelled.
    pub fn start_linked<F>(
        deadline: DateTime<Utc>,
        clock: Arc<dyn Clock>,
        tick: Duration,
        parent: &CancellationToken,
        on_expire: F,
    ) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let initial = remaining_until(deadline, clock.now());
        let (tx, rx) = watch::channel(initial);
        let cancel = parent.child_token();
        let token = cancel.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tick);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!("Session timer cancelled");
                        return;
                    }
                    _ = ticker.tick() => {}
                }

                let remaining = remaining_until(deadline, clock.now());
                tx.send_if_modified(|current| {
                    if remaining < *current {
                        *current = remaining;
                        true
                    } else {
                        false
                    }
                });

                if remaining.is_zero() {
                    info!(%deadline, "Exam deadline reached");
                    on_expire();
                    return;
                }
            }
        });

        Self {
            deadline,
            remaining: rx,
            cancel,
        }
    }

    pub fn deadline(&self) -> DateTime<Utc> {
        self.deadline
    }

    pub fn remaining(&self) -> Duration {
        *self.remaining.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<Duration> {
        self.remaining.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for SessionTimer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::time::MonotonicClock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> (Arc<AtomicUsize>, impl FnOnce() + Send + 'static) {
        let fired = Arc::new(AtomicUsize::new(0));
        let hook = fired.clone();
        (fired, move || {
            hook.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test(start_paused = true)]
    async fn fires_once_at_deadline() {
        let clock = Arc::new(MonotonicClock::new());
        let deadline = clock.now() + chrono::Duration::seconds(10);
        let (fired, on_expire) = counter();
        let timer = SessionTimer::start(deadline, clock, Duration::from_secs(1), on_expire);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(timer.remaining() <= Duration::from_secs(5));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(timer.remaining(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn past_deadline_fires_on_first_tick() {
        let clock = Arc::new(MonotonicClock::new());
        let deadline = clock.now() - chrono::Duration::minutes(3);
        let (fired, on_expire) = counter();
        let _timer = SessionTimer::start(deadline, clock, Duration::from_secs(1), on_expire);

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_timer_never_fires() {
        let clock = Arc::new(MonotonicClock::new());
        let deadline = clock.now() + chrono::Duration::seconds(3);
        let (fired, on_expire) = counter();
        let timer = SessionTimer::start(deadline, clock, Duration::from_secs(1), on_expire);
        timer.cancel();

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn throttled_ticks_still_expire() {
        let clock = Arc::new(MonotonicClock::new());
        let deadline = clock.now() + chrono::Duration::seconds(2);
        let (fired, on_expire) = counter();
        let timer = SessionTimer::start(deadline, clock, Duration::from_secs(60), on_expire);
        let mut rx = timer.subscribe();

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(*rx.borrow_and_update(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn parent_cancellation_stops_linked_timer() {
        let clock = Arc::new(MonotonicClock::new());
        let deadline = clock.now() + chrono::Duration::seconds(3);
        let (fired, on_expire) = counter();
        let parent = CancellationToken::new();
        let timer = SessionTimer::start_linked(deadline, clock, Duration::from_secs(1), &parent, on_expire);
        parent.cancel();

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(timer.is_cancelled());
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
