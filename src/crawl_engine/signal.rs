//! Wake-up primitives shared between the scheduler, workers and watchdog

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use super::crawl_types::ExitReason;

struct Activity {
    epoch: u64,
    last_progress: Instant,
}

/// Change counter for "something happened" wake-ups
///
/// `record()` marks real queue progress and resets the inactivity clock;
/// `poke()` only wakes waiters (status flips, shutdown).
pub struct ActivitySignal {
    inner: Mutex<Activity>,
    changed: Condvar,
}

impl Default for ActivitySignal {
    fn default() -> Self {
        Self::new()
    }
}

impl ActivitySignal {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Activity {
                epoch: 0,
                last_progress: Instant::now(),
            }),
            changed: Condvar::new(),
        }
    }

    pub fn record(&self) {
        let mut inner = self.inner.lock();
        inner.epoch = inner.epoch.wrapping_add(1);
        inner.last_progress = Instant::now();
        drop(inner);
        self.changed.notify_all();
    }

    pub fn poke(&self) {
        let mut inner = self.inner.lock();
        inner.epoch = inner.epoch.wrapping_add(1);
        drop(inner);
        self.changed.notify_all();
    }

    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.inner.lock().epoch
    }

    #[must_use]
    pub fn idle_for(&self) -> Duration {
        self.inner.lock().last_progress.elapsed()
    }

    /// Wait until the epoch moves past `seen` or `timeout` elapses.
    /// Returns the current epoch.
    pub fn wait_for_change(&self, seen: u64, timeout: Duration) -> u64 {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        while inner.epoch == seen {
            if self.changed.wait_until(&mut inner, deadline).timed_out() {
                break;
            }
        }
        inner.epoch
    }
}

/// Global, first-reason-wins shutdown request
pub struct ShutdownSignal {
    requested: AtomicBool,
    reason: Mutex<Option<ExitReason>>,
    cond: Condvar,
    activity: Arc<ActivitySignal>,
}

impl ShutdownSignal {
    #[must_use]
    pub fn new(activity: Arc<ActivitySignal>) -> Self {
        Self {
            requested: AtomicBool::new(false),
            reason: Mutex::new(None),
            cond: Condvar::new(),
            activity,
        }
    }

    /// Request shutdown. Returns false if another reason already won.
    pub fn request(&self, reason: ExitReason) -> bool {
        let mut slot = self.reason.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(reason);
        self.requested.store(true, Ordering::SeqCst);
        drop(slot);
        self.cond.notify_all();
        self.activity.poke();
        true
    }

    #[must_use]
    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn reason(&self) -> Option<ExitReason> {
        *self.reason.lock()
    }

    /// Sleep up to `timeout`, waking early on shutdown. Returns true if
    /// shutdown was requested.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut slot = self.reason.lock();
        while slot.is_none() {
            if self.cond.wait_until(&mut slot, deadline).timed_out() {
                break;
            }
        }
        slot.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_first_reason_wins() {
        let shutdown = ShutdownSignal::new(Arc::new(ActivitySignal::new()));
        assert!(!shutdown.is_requested());
        assert!(shutdown.request(ExitReason::TimeLimit));
        assert!(!shutdown.request(ExitReason::FileLimit));
        assert_eq!(shutdown.reason(), Some(ExitReason::TimeLimit));
        assert!(shutdown.wait_timeout(Duration::from_secs(5)));
    }

    #[test]
    fn test_wait_for_change_wakes_on_record() {
        let activity = Arc::new(ActivitySignal::new());
        let seen = activity.epoch();
        let a = Arc::clone(&activity);
        let recorder = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            a.record();
        });
        let now = activity.wait_for_change(seen, Duration::from_secs(5));
        assert_ne!(now, seen);
        recorder.join().expect("recorder should not panic");
        assert!(activity.idle_for() < Duration::from_secs(5));
    }
}
