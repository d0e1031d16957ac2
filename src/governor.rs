//! Pacing rate governor shared by every remote call.
//!
//! Each admission is granted no earlier than `window / rate` after the
//! previous one, however long the governor sat idle in between, so there is
//! never a burst. Callers queue on a fair mutex and are admitted in arrival
//! order. A "rate limited, retry after T" answer from the remote suspends all
//! admissions for T on top of the normal pacing.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::RateLimitConfig;

const MIN_INTERVAL: Duration = Duration::from_millis(1);

pub struct RateGovernor {
    interval: Duration,
    last_admitted: tokio::sync::Mutex<Option<Instant>>,
    suspended_until: Mutex<Option<Instant>>,
    admitted: AtomicU64,
}

impl RateGovernor {
    pub fn new(config: &RateLimitConfig) -> Self {
        let interval = config.interval().max(MIN_INTERVAL);
        debug!(
            rate_limit = config.rate_limit,
            window_seconds = config.window_seconds,
            interval_ms = interval.as_millis() as u64,
            "rate governor created."
        );

        Self {
            interval,
            last_admitted: tokio::sync::Mutex::new(None),
            suspended_until: Mutex::new(None),
            admitted: AtomicU64::new(0),
        }
    }

    /// Wait until one remote call may be issued.
    ///
    /// Dropping the returned future before it completes gives up the place
    /// in the queue without consuming an admission.
    pub async fn admit(&self) {
        let mut last_admitted = self.last_admitted.lock().await;

        // A suspension raised while this caller sleeps is picked up on the
        // next pass.
        while let Some(deadline) = self.next_deadline(*last_admitted) {
            tokio::time::sleep_until(deadline).await;
        }

        *last_admitted = Some(Instant::now());
        self.admitted.fetch_add(1, Ordering::SeqCst);
    }

    /// Stop admitting anyone for `duration`. Overlapping suspensions keep
    /// the later deadline.
    pub fn suspend(&self, duration: Duration) {
        let until = Instant::now() + duration;
        let mut suspended_until = self.suspended_until.lock().unwrap();
        let deadline = match *suspended_until {
            Some(existing) if existing >= until => existing,
            _ => until,
        };
        *suspended_until = Some(deadline);

        warn!(
            retry_after_ms = duration.as_millis() as u64,
            "remote rate limit signalled, suspending all admissions."
        );
    }

    pub fn is_suspended(&self) -> bool {
        self.suspension_deadline().is_some()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn admitted_count(&self) -> u64 {
        self.admitted.load(Ordering::SeqCst)
    }

    /// The instant the next admission has to wait for, or `None` when it
    /// may go out now.
    fn next_deadline(&self, last_admitted: Option<Instant>) -> Option<Instant> {
        let paced = last_admitted
            .map(|last| last + self.interval)
            .filter(|at| *at > Instant::now());

        match (paced, self.suspension_deadline()) {
            (Some(paced), Some(suspended)) => Some(paced.max(suspended)),
            (paced, suspended) => paced.or(suspended),
        }
    }

    fn suspension_deadline(&self) -> Option<Instant> {
        let mut suspended_until = self.suspended_until.lock().unwrap();
        match *suspended_until {
            Some(until) if until > Instant::now() => Some(until),
            Some(_) => {
                *suspended_until = None;
                None
            }
            None => None,
        }
    }
}
