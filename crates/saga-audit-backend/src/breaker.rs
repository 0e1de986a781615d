//! Repeated-failures-over-time circuit breaker.
//!
//! # States
//!
//! - **Closed**: failures are counted.  The first failure of a streak arms a
//!   timer for `window`; if the streak is still unbroken when it fires, the
//!   breaker opens and the trip callback fires.  A failure arriving after
//!   `window` has elapsed opens it as well, whichever comes first.
//! - **Open**: further failures are counted but never re-fire the callback.
//!
//! There is no half-open state.  Any success resets the streak and closes the
//! breaker, so a fresh streak of `window` is needed before the callback can
//! fire again.
//!
//! The timer runs on the current tokio runtime when there is one, and on a
//! dedicated thread otherwise.

use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use saga_audit_contracts::SagaAuditError;

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
}

/// Called once per Closed → Open transition with the failure that tripped it.
pub type TripCallback = Box<dyn Fn(&SagaAuditError) + Send + Sync>;

#[derive(Debug)]
struct BreakerState {
    circuit: CircuitState,
    failure_count: u64,
    /// When the current failure streak started.
    streak_started: Option<Instant>,
    /// Bumped at the start of every streak; a timer only trips its own.
    streak: u64,
    last_error: Option<SagaAuditError>,
}

struct Shared {
    name: String,
    window: Duration,
    on_trip: TripCallback,
    state: Mutex<BreakerState>,
}

impl Shared {
    /// Recovers the state from a poisoned lock.
    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Must be called without the lock held.
    fn trip(&self, error: &SagaAuditError, failure_count: u64) {
        warn!(
            breaker = %self.name,
            failure_count,
            window_secs = self.window.as_secs(),
            error = %error,
            "circuit breaker opened"
        );
        (self.on_trip)(error);
    }

    /// Timer expiry for streak `streak`.
    fn expire(&self, streak: u64) {
        let mut state = self.lock();
        let unbroken = state.circuit == CircuitState::Closed
            && state.streak_started.is_some()
            && state.streak == streak;
        if !unbroken {
            return;
        }
        state.circuit = CircuitState::Open;
        let failure_count = state.failure_count;
        let error = state.last_error.clone();
        drop(state);

        if let Some(error) = error {
            self.trip(&error, failure_count);
        }
    }
}

/// Opens after failures persist for a whole window with no success in between.
///
/// # Thread safety
///
/// All bookkeeping happens under one `Mutex`.  The lock is only held for
/// counter updates; the trip callback runs after it is released.  The
/// window timer holds a weak reference, so dropping the breaker disarms it.
pub struct RepeatedFailuresOverTimeCircuitBreaker {
    shared: Arc<Shared>,
}

impl RepeatedFailuresOverTimeCircuitBreaker {
    pub fn new(name: impl Into<String>, window: Duration, on_trip: TripCallback) -> Self {
        Self {
            shared: Arc::new(Shared {
                name: name.into(),
                window,
                on_trip,
                state: Mutex::new(BreakerState {
                    circuit: CircuitState::Closed,
                    failure_count: 0,
                    streak_started: None,
                    streak: 0,
                    last_error: None,
                }),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn window(&self) -> Duration {
        self.shared.window
    }

    pub fn state(&self) -> CircuitState {
        self.shared.lock().circuit
    }

    /// Failures since the last success.
    pub fn failure_count(&self) -> u64 {
        self.shared.lock().failure_count
    }

    /// Record a successful attempt.
    pub fn success(&self) {
        let mut state = self.shared.lock();
        if state.failure_count == 0 && state.circuit == CircuitState::Closed {
            return;
        }

        let was = state.circuit;
        state.circuit = CircuitState::Closed;
        state.failure_count = 0;
        state.streak_started = None;
        state.last_error = None;
        drop(state);

        info!(breaker = %self.shared.name, previous = ?was, "circuit breaker reset");
    }

    /// Record a failed attempt.
    pub fn failure(&self, error: &SagaAuditError) {
        self.failure_at(error, Instant::now());
    }

    pub(crate) fn failure_at(&self, error: &SagaAuditError, now: Instant) {
        let mut state = self.shared.lock();
        state.failure_count += 1;
        state.last_error = Some(error.clone());

        let new_streak = state.streak_started.is_none();
        if new_streak {
            state.streak += 1;
        }
        let started = *state.streak_started.get_or_insert(now);
        let tripped = state.circuit == CircuitState::Closed
            && now.saturating_duration_since(started) >= self.shared.window;
        if tripped {
            state.circuit = CircuitState::Open;
        }
        let failure_count = state.failure_count;
        let streak = state.streak;
        drop(state);

        if tripped {
            self.shared.trip(error, failure_count);
        } else if new_streak {
            self.arm_timer(streak);
        }
    }

    fn arm_timer(&self, streak: u64) {
        let shared: Weak<Shared> = Arc::downgrade(&self.shared);
        let window = self.shared.window;
        debug!(breaker = %self.shared.name, streak, "failure streak started, timer armed");

        let expire = move || {
            if let Some(shared) = shared.upgrade() {
                shared.expire(streak);
            }
        };

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    tokio::time::sleep(window).await;
                    expire();
                });
            }
            Err(_) => {
                let spawned = std::thread::Builder::new()
                    .name(format!("{}-window", self.shared.name))
                    .spawn(move || {
                        std::thread::sleep(window);
                        expire();
                    });
                if let Err(e) = spawned {
                    warn!(
                        breaker = %self.shared.name,
                        error = %e,
                        "could not start breaker timer; relying on later failures"
                    );
                }
            }
        }
    }
}

impl std::fmt::Debug for RepeatedFailuresOverTimeCircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepeatedFailuresOverTimeCircuitBreaker")
            .field("name", &self.shared.name)
            .field("window", &self.shared.window)
            .field("state", &*self.shared.lock())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    fn breaker(window: Duration) -> (RepeatedFailuresOverTimeCircuitBreaker, Arc<AtomicUsize>) {
        let trips = Arc::new(AtomicUsize::new(0));
        let counter = trips.clone();
        let breaker = RepeatedFailuresOverTimeCircuitBreaker::new(
            "test",
            window,
            Box::new(move |_: &SagaAuditError| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        (breaker, trips)
    }

    fn err() -> SagaAuditError {
        SagaAuditError::DispatchFailed {
            destination: "backend".to_string(),
            reason: "down".to_string(),
        }
    }

    #[test]
    fn opens_once_after_failures_span_the_window() {
        let (breaker, trips) = breaker(Duration::from_secs(120));
        let t0 = Instant::now();

        breaker.failure_at(&err(), t0);
        breaker.failure_at(&err(), t0 + Duration::from_secs(60));
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(trips.load(Ordering::SeqCst), 0);

        breaker.failure_at(&err(), t0 + Duration::from_secs(120));
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(trips.load(Ordering::SeqCst), 1);

        breaker.failure_at(&err(), t0 + Duration::from_secs(180));
        breaker.failure_at(&err(), t0 + Duration::from_secs(600));
        assert_eq!(trips.load(Ordering::SeqCst), 1, "open breaker must not re-fire");
        assert_eq!(breaker.failure_count(), 5);
    }

    #[test]
    fn success_resets_and_requires_a_new_streak() {
        let (breaker, trips) = breaker(Duration::from_secs(120));
        let t0 = Instant::now();

        breaker.failure_at(&err(), t0);
        breaker.failure_at(&err(), t0 + Duration::from_secs(130));
        assert_eq!(trips.load(Ordering::SeqCst), 1);

        breaker.success();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 0);

        // The new streak starts at its own first failure.
        let t1 = t0 + Duration::from_secs(200);
        breaker.failure_at(&err(), t1);
        breaker.failure_at(&err(), t1 + Duration::from_secs(119));
        assert_eq!(trips.load(Ordering::SeqCst), 1);

        breaker.failure_at(&err(), t1 + Duration::from_secs(121));
        assert_eq!(trips.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn success_mid_streak_prevents_trip() {
        let (breaker, trips) = breaker(Duration::from_secs(120));
        let t0 = Instant::now();

        breaker.failure_at(&err(), t0);
        breaker.success();
        breaker.failure_at(&err(), t0 + Duration::from_secs(150));
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(trips.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn concurrent_failures_trip_exactly_once() {
        let (breaker, trips) = breaker(Duration::ZERO);
        let breaker = Arc::new(breaker);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let b = breaker.clone();
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        b.failure(&err());
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(trips.load(Ordering::SeqCst), 1);
        assert_eq!(breaker.failure_count(), 400);
    }

    #[tokio::test]
    async fn quiet_streak_opens_when_the_window_elapses() {
        let (breaker, trips) = breaker(Duration::from_millis(50));

        breaker.failure(&err());
        assert_eq!(breaker.state(), CircuitState::Closed);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(trips.load(Ordering::SeqCst), 1);

        // A late failure on an open breaker does not re-fire.
        breaker.failure(&err());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(trips.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn success_before_the_window_disarms_the_timer() {
        let (breaker, trips) = breaker(Duration::from_millis(50));

        breaker.failure(&err());
        breaker.success();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(trips.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn timer_of_a_broken_streak_does_not_trip_the_next_one() {
        let (breaker, trips) = breaker(Duration::from_millis(400));

        breaker.failure(&err());
        tokio::time::sleep(Duration::from_millis(250)).await;
        breaker.success();
        breaker.failure(&err());

        // The first timer has fired by now; the second streak is 250 ms old.
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(trips.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(trips.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn quiet_streak_opens_without_an_async_runtime() {
        let (breaker, trips) = breaker(Duration::from_millis(50));

        breaker.failure(&err());
        std::thread::sleep(Duration::from_millis(200));

        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(trips.load(Ordering::SeqCst), 1);
    }
}
