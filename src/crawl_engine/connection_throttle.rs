//! Global and per-host connection limiter
//!
//! Both counters live under one mutex so a request is admitted only when the
//! global limit and its host's limit both have room, and both are taken in the
//! same step. Releasing wakes every waiter when a cap was hit, because a
//! freed slot on one host can unblock waiters for any host via the global cap.

use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::time::{Duration, Instant};

use super::crawl_types::{CrawlError, CrawlResult};

struct ThrottleState {
    global_in_use: usize,
    per_host: HashMap<String, usize>,
    peaks: HashMap<String, usize>,
    global_peak: usize,
    closed: bool,
}

pub struct ConnectionThrottle {
    state: Mutex<ThrottleState>,
    available: Condvar,
    max_connections: usize,
    max_per_host: usize,
}

/// Held while a request is in flight; dropping it releases the slot
#[must_use = "dropping the permit immediately releases the connection slot"]
pub struct ThrottlePermit<'a> {
    throttle: &'a ConnectionThrottle,
    host: String,
}

impl ThrottlePermit<'_> {
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Release explicitly; equivalent to dropping
    pub fn release(self) {}
}

impl Drop for ThrottlePermit<'_> {
    fn drop(&mut self) {
        self.throttle.release(&self.host);
    }
}

impl ConnectionThrottle {
    /// Limits below 1 are raised to 1
    #[must_use]
    pub fn new(max_connections: usize, max_per_host: usize) -> Self {
        Self {
            state: Mutex::new(ThrottleState {
                global_in_use: 0,
                per_host: HashMap::new(),
                peaks: HashMap::new(),
                global_peak: 0,
                closed: false,
            }),
            available: Condvar::new(),
            max_connections: max_connections.max(1),
            max_per_host: max_per_host.max(1),
        }
    }

    /// Block until both limits admit a request to `host`.
    ///
    /// # Errors
    ///
    /// Returns `CrawlError::Cancelled` if the throttle is closed while waiting.
    pub fn acquire(&self, host: &str) -> CrawlResult<ThrottlePermit<'_>> {
        self.acquire_until(host, None)
    }

    /// Like `acquire`, giving up after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns `CrawlError::ThrottleTimeout` when no slot freed up in time, or
    /// `CrawlError::Cancelled` if the throttle was closed.
    pub fn acquire_timeout(&self, host: &str, timeout: Duration) -> CrawlResult<ThrottlePermit<'_>> {
        self.acquire_until(host, Some(Instant::now() + timeout))
    }

    fn acquire_until(&self, host: &str, deadline: Option<Instant>) -> CrawlResult<ThrottlePermit<'_>> {
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return Err(CrawlError::Cancelled);
            }
            let host_in_use = state.per_host.get(host).copied().unwrap_or(0);
            if state.global_in_use < self.max_connections && host_in_use < self.max_per_host {
                break;
            }
            match deadline {
                None => self.available.wait(&mut state),
                Some(deadline) => {
                    if self.available.wait_until(&mut state, deadline).timed_out() {
                        let host_in_use = state.per_host.get(host).copied().unwrap_or(0);
                        let admitted = !state.closed
                            && state.global_in_use < self.max_connections
                            && host_in_use < self.max_per_host;
                        if !admitted {
                            log::debug!(
                                target: "trawl::throttle",
                                "Timed out waiting for a slot to {host}"
                            );
                            return Err(CrawlError::ThrottleTimeout {
                                host: host.to_string(),
                            });
                        }
                    }
                }
            }
        }

        state.global_in_use += 1;
        state.global_peak = state.global_peak.max(state.global_in_use);
        let count = state.per_host.entry(host.to_string()).or_insert(0);
        *count += 1;
        let count = *count;
        let peak = state.peaks.entry(host.to_string()).or_insert(0);
        *peak = (*peak).max(count);

        Ok(ThrottlePermit {
            throttle: self,
            host: host.to_string(),
        })
    }

    fn release(&self, host: &str) {
        let mut state = self.state.lock();
        let global_was_capped = state.global_in_use >= self.max_connections;
        state.global_in_use = state.global_in_use.saturating_sub(1);

        let mut host_was_capped = false;
        if let Some(count) = state.per_host.get_mut(host) {
            host_was_capped = *count >= self.max_per_host;
            *count = count.saturating_sub(1);
            if *count == 0 {
                state.per_host.remove(host);
            }
        } else {
            log::warn!(target: "trawl::throttle", "Release for {host} without a matching acquire");
        }
        drop(state);

        if global_was_capped || host_was_capped {
            self.available.notify_all();
        }
    }

    /// Fail every current and future acquire with `Cancelled`
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.available.notify_all();
        log::debug!(target: "trawl::throttle", "Connection throttle closed");
    }

    #[must_use]
    pub fn in_flight(&self, host: &str) -> usize {
        self.state.lock().per_host.get(host).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn total_in_flight(&self) -> usize {
        self.state.lock().global_in_use
    }

    /// Highest concurrent count ever observed for `host`
    #[must_use]
    pub fn peak(&self, host: &str) -> usize {
        self.state.lock().peaks.get(host).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn global_peak(&self) -> usize {
        self.state.lock().global_peak
    }

    #[must_use]
    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    #[must_use]
    pub fn max_per_host(&self) -> usize {
        self.max_per_host
    }
}
