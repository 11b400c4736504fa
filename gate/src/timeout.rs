//! Smart dual-mode timeout monitor.
//!
//! A command is allowed to run for `active` in total, but only while it keeps
//! producing output: `stuck` of silence expires it early. State is never
//! stored; it is derived from `start`, `last_output` and the clock:
//!
//! ```text
//! deadline = min(last_output + stuck, start + active)
//! expired  = now >= deadline
//! ```
//!
//! All fields sit behind one mutex so the output pipe can record while the
//! watcher thread and callers read.

use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::io::config::TimeoutConfig;
use crate::io::context::{ContextError, ExecContext};
use crate::io::process::OutputObserver;

/// Upper bound on one watcher sleep, so parent cancellation is noticed.
const WATCH_MAX_SLEEP: Duration = Duration::from_secs(1);

/// Budgets are capped here so `Instant` arithmetic cannot overflow.
const MAX_BUDGET: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Derived monitor state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeoutState {
    /// Output arrived within the last `stuck` window.
    Active,
    /// No output for at least `stuck`.
    Stuck,
}

/// Which budget expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeoutKind {
    Stuck,
    Active,
}

impl fmt::Display for TimeoutKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeoutKind::Stuck => f.write_str("stuck"),
            TimeoutKind::Active => f.write_str("active"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} timeout: {elapsed:?} elapsed, limit {limit:?}")]
pub struct TimeoutError {
    pub kind: TimeoutKind,
    pub elapsed: Duration,
    pub limit: Duration,
}

#[derive(Debug, Clone, Copy)]
struct Snapshot {
    start: Instant,
    last_output: Instant,
    total_bytes: u64,
}

#[derive(Debug)]
struct MonitorInner {
    active: Duration,
    stuck: Duration,
    state: Mutex<Snapshot>,
    changed: Condvar,
}

impl MonitorInner {
    fn lock(&self) -> MutexGuard<'_, Snapshot> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn deadline(&self, snap: &Snapshot) -> Instant {
        (snap.last_output + self.stuck).min(snap.start + self.active)
    }

    fn error_at(&self, snap: &Snapshot, now: Instant) -> Option<TimeoutError> {
        if now < self.deadline(snap) {
            return None;
        }
        let silent = now.saturating_duration_since(snap.last_output);
        if silent >= self.stuck {
            return Some(TimeoutError {
                kind: TimeoutKind::Stuck,
                elapsed: silent,
                limit: self.stuck,
            });
        }
        Some(TimeoutError {
            kind: TimeoutKind::Active,
            elapsed: now.saturating_duration_since(snap.start),
            limit: self.active,
        })
    }
}

/// Shared handle to one monitor; clones observe the same state.
#[derive(Debug, Clone)]
pub struct SmartTimeout {
    inner: Arc<MonitorInner>,
}

impl SmartTimeout {
    pub fn new(active: Duration, stuck: Duration) -> Self {
        Self::starting_at(active, stuck, Instant::now())
    }

    pub fn from_config(cfg: &TimeoutConfig) -> Self {
        Self::new(cfg.active(), cfg.stuck())
    }

    /// Budgets above a century are treated as a century.
    pub fn starting_at(active: Duration, stuck: Duration, start: Instant) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                active: active.min(MAX_BUDGET),
                stuck: stuck.min(MAX_BUDGET),
                state: Mutex::new(Snapshot {
                    start,
                    last_output: start,
                    total_bytes: 0,
                }),
                changed: Condvar::new(),
            }),
        }
    }

    pub fn active_duration(&self) -> Duration {
        self.inner.active
    }

    pub fn stuck_duration(&self) -> Duration {
        self.inner.stuck
    }

    pub fn record_output(&self, bytes: usize) {
        self.record_output_at(bytes, Instant::now());
    }

    /// Record `bytes` of output observed at `at`. `last_output` never moves
    /// backwards.
    pub fn record_output_at(&self, bytes: usize, at: Instant) {
        let mut snap = self.inner.lock();
        snap.last_output = snap.last_output.max(at);
        snap.total_bytes += bytes as u64;
        self.inner.changed.notify_all();
    }

    pub fn total_bytes(&self) -> u64 {
        self.inner.lock().total_bytes
    }

    pub fn start_time(&self) -> Instant {
        self.inner.lock().start
    }

    pub fn last_output_time(&self) -> Instant {
        self.inner.lock().last_output
    }

    pub fn state(&self) -> TimeoutState {
        self.state_at(Instant::now())
    }

    pub fn state_at(&self, now: Instant) -> TimeoutState {
        let snap = *self.inner.lock();
        if now.saturating_duration_since(snap.last_output) >= self.inner.stuck {
            TimeoutState::Stuck
        } else {
            TimeoutState::Active
        }
    }

    /// `min(last_output + stuck, start + active)`.
    pub fn deadline_time(&self) -> Instant {
        let snap = *self.inner.lock();
        self.inner.deadline(&snap)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    pub fn is_expired_at(&self, now: Instant) -> bool {
        now >= self.deadline_time()
    }

    pub fn time_remaining(&self) -> Duration {
        self.time_remaining_at(Instant::now())
    }

    pub fn time_remaining_at(&self, now: Instant) -> Duration {
        self.deadline_time().saturating_duration_since(now)
    }

    /// `None` while not expired; otherwise which budget ran out. The stuck
    /// budget is reported first when both have.
    pub fn error(&self) -> Option<TimeoutError> {
        self.error_at(Instant::now())
    }

    pub fn error_at(&self, now: Instant) -> Option<TimeoutError> {
        let snap = *self.inner.lock();
        self.inner.error_at(&snap, now)
    }

    /// Restart both budgets from now, for reuse across retries.
    pub fn reset(&self) {
        let now = Instant::now();
        let mut snap = self.inner.lock();
        *snap = Snapshot {
            start: now,
            last_output: now,
            total_bytes: 0,
        };
        self.inner.changed.notify_all();
    }

    /// Derive a context from `parent` that is canceled with
    /// [`ContextError::DeadlineExceeded`] the moment this monitor expires.
    ///
    /// A watcher thread sleeps until the current deadline and is woken by
    /// every recorded output, so the deadline floats forward without polling.
    /// Dropping the returned value stops the watcher.
    pub fn context_with_deadline(&self, parent: &ExecContext) -> MonitoredContext {
        let ctx = parent.child();
        let cause = Arc::new(Mutex::new(None));
        let handle = {
            let inner = Arc::clone(&self.inner);
            let ctx = ctx.clone();
            let cause = Arc::clone(&cause);
            thread::spawn(move || watch(&inner, &ctx, &cause))
        };
        MonitoredContext {
            ctx,
            monitor: Arc::clone(&self.inner),
            cause,
            handle: Some(handle),
        }
    }
}

impl OutputObserver for SmartTimeout {
    fn record_output(&self, bytes: usize) {
        SmartTimeout::record_output(self, bytes);
    }
}

fn watch(inner: &MonitorInner, ctx: &ExecContext, cause: &Mutex<Option<TimeoutError>>) {
    let mut snap = inner.lock();
    loop {
        if ctx.is_done() {
            debug!("monitored context done, watcher exiting");
            return;
        }
        let now = Instant::now();
        if let Some(err) = inner.error_at(&snap, now) {
            drop(snap);
            warn!(kind = %err.kind, elapsed_ms = err.elapsed.as_millis() as u64, "smart timeout expired");
            *cause.lock().unwrap_or_else(PoisonError::into_inner) = Some(err);
            ctx.cancel_with(ContextError::DeadlineExceeded);
            return;
        }
        let wait = inner
            .deadline(&snap)
            .saturating_duration_since(now)
            .min(WATCH_MAX_SLEEP);
        snap = inner
            .changed
            .wait_timeout(snap, wait)
            .unwrap_or_else(PoisonError::into_inner)
            .0;
    }
}

/// Context bound to a [`SmartTimeout`]; see
/// [`SmartTimeout::context_with_deadline`].
#[derive(Debug)]
pub struct MonitoredContext {
    ctx: ExecContext,
    monitor: Arc<MonitorInner>,
    cause: Arc<Mutex<Option<TimeoutError>>>,
    handle: Option<JoinHandle<()>>,
}

impl MonitoredContext {
    pub fn context(&self) -> &ExecContext {
        &self.ctx
    }

    /// The expiry that canceled the context, if any.
    pub fn timeout_error(&self) -> Option<TimeoutError> {
        self.cause
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Drop for MonitoredContext {
    fn drop(&mut self) {
        self.ctx.cancel();
        {
            let _snap = self.monitor.lock();
            self.monitor.changed.notify_all();
        }
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            warn!("smart timeout watcher panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ACTIVE: Duration = Duration::from_secs(60);
    const STUCK: Duration = Duration::from_secs(10);

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn huge_budgets_do_not_overflow() {
        let start = Instant::now();
        let forever = Duration::from_secs(u64::MAX);
        let monitor = SmartTimeout::starting_at(forever, STUCK, start);
        assert!(!monitor.is_expired_at(start));
        assert_eq!(monitor.deadline_time(), start + STUCK);
        assert_eq!(monitor.active_duration(), MAX_BUDGET);

        let unbounded = SmartTimeout::starting_at(forever, forever, start);
        assert!(!unbounded.is_expired());
        assert!(unbounded.error().is_none());
        assert!(unbounded.time_remaining() > Duration::from_secs(365 * 24 * 60 * 60));
    }

    #[test]
    fn huge_budgets_keep_the_watcher_alive() {
        let forever = Duration::from_secs(u64::MAX);
        let monitor = SmartTimeout::new(forever, forever);
        let monitored = monitor.context_with_deadline(&ExecContext::background());
        thread::sleep(Duration::from_millis(50));
        assert!(!monitored.context().is_done());
        assert!(monitored.timeout_error().is_none());
    }

    #[test]
    fn deadline_is_min_of_both_budgets() {
        let start = Instant::now();
        let monitor = SmartTimeout::starting_at(ACTIVE, STUCK, start);
        assert_eq!(monitor.deadline_time(), start + STUCK);

        monitor.record_output_at(1, start + secs(30));
        assert_eq!(monitor.deadline_time(), start + secs(40));

        // Output late in the run cannot push past the active cap.
        monitor.record_output_at(1, start + secs(55));
        assert_eq!(monitor.deadline_time(), start + ACTIVE);
    }

    #[test]
    fn expired_iff_now_reaches_deadline() {
        let start = Instant::now();
        let monitor = SmartTimeout::starting_at(ACTIVE, STUCK, start);
        for output_at in [0, 5, 30, 52, 58] {
            monitor.record_output_at(1, start + secs(output_at));
            let deadline = monitor.deadline_time();
            for offset in 0..70 {
                let now = start + secs(offset);
                assert_eq!(
                    monitor.is_expired_at(now),
                    now >= deadline,
                    "output_at={output_at} offset={offset}"
                );
            }
        }
    }

    #[test]
    fn silent_young_process_is_stuck() {
        let start = Instant::now();
        let monitor = SmartTimeout::starting_at(ACTIVE, STUCK, start);
        let now = start + STUCK;
        assert_eq!(monitor.state_at(now), TimeoutState::Stuck);
        assert!(monitor.is_expired_at(now));
        let err = monitor.error_at(now).expect("expired");
        assert_eq!(err.kind, TimeoutKind::Stuck);
        assert_eq!(err.limit, STUCK);
    }

    #[test]
    fn chatty_process_hits_active_budget() {
        let start = Instant::now();
        let monitor = SmartTimeout::starting_at(ACTIVE, STUCK, start);
        monitor.record_output_at(10, start + secs(59));
        let now = start + ACTIVE;
        assert_eq!(monitor.state_at(now), TimeoutState::Active);
        let err = monitor.error_at(now).expect("expired");
        assert_eq!(err.kind, TimeoutKind::Active);
        assert_eq!(err.elapsed, ACTIVE);
        assert!(err.to_string().starts_with("active timeout"));
    }

    #[test]
    fn no_error_before_deadline() {
        let start = Instant::now();
        let monitor = SmartTimeout::starting_at(ACTIVE, STUCK, start);
        assert_eq!(monitor.error_at(start + secs(9)), None);
        assert_eq!(monitor.time_remaining_at(start + secs(4)), secs(6));
    }

    #[test]
    fn last_output_never_moves_backwards() {
        let start = Instant::now();
        let monitor = SmartTimeout::starting_at(ACTIVE, STUCK, start);
        monitor.record_output_at(1, start + secs(20));
        monitor.record_output_at(1, start + secs(5));
        assert_eq!(monitor.last_output_time(), start + secs(20));
        assert!(monitor.last_output_time() >= monitor.start_time());
    }

    #[test]
    fn concurrent_records_sum_bytes() {
        let monitor = SmartTimeout::new(ACTIVE, STUCK);
        let handles: Vec<_> = (1..=8)
            .map(|n| {
                let monitor = monitor.clone();
                thread::spawn(move || {
                    for _ in 0..100 {
                        monitor.record_output(n);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("join");
        }
        assert_eq!(monitor.total_bytes(), 100 * (1..=8).sum::<u64>());
    }

    #[test]
    fn reset_restarts_budgets() {
        let start = Instant::now() - secs(120);
        let monitor = SmartTimeout::starting_at(ACTIVE, STUCK, start);
        monitor.record_output_at(42, start);
        assert!(monitor.is_expired());
        monitor.reset();
        assert!(!monitor.is_expired());
        assert_eq!(monitor.total_bytes(), 0);
        assert_eq!(monitor.state(), TimeoutState::Active);
    }

    #[test]
    fn monitored_context_cancels_when_stuck() {
        let monitor = SmartTimeout::new(secs(30), Duration::from_millis(100));
        let monitored = monitor.context_with_deadline(&ExecContext::background());
        let err = monitored.context().wait_timeout(secs(5));
        assert_eq!(err, Some(ContextError::DeadlineExceeded));
        let cause = monitored.timeout_error().expect("cause recorded");
        assert_eq!(cause.kind, TimeoutKind::Stuck);
    }

    #[test]
    fn output_keeps_monitored_context_alive() {
        let monitor = SmartTimeout::new(secs(30), Duration::from_millis(300));
        let monitored = monitor.context_with_deadline(&ExecContext::background());
        for _ in 0..10 {
            thread::sleep(Duration::from_millis(50));
            monitor.record_output(1);
        }
        assert_eq!(monitored.context().err(), None);
        assert_eq!(monitored.timeout_error(), None);
    }

    #[test]
    fn dropping_monitored_context_stops_watcher() {
        let monitor = SmartTimeout::new(secs(600), secs(600));
        let started = Instant::now();
        let monitored = monitor.context_with_deadline(&ExecContext::background());
        let ctx = monitored.context().clone();
        drop(monitored);
        assert_eq!(ctx.err(), Some(ContextError::Canceled));
        assert!(started.elapsed() < secs(5));
    }
}
