//! Thread-safe, optionally bounded priority queue
//!
//! Items are ordered by `(priority, insertion sequence)`: lower priority values
//! come out first and equal priorities keep their insertion order. Blocking
//! operations park on condition variables and are released by `close()`.

use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use super::crawl_types::{CrawlError, WorkItem};

/// Anything that can be ordered by the queue
pub trait Prioritized {
    fn priority(&self) -> i64;
}

impl Prioritized for WorkItem {
    fn priority(&self) -> i64 {
        WorkItem::priority(self)
    }
}

/// How long a queue operation may wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    /// Fail immediately instead of waiting
    NonBlocking,
    /// Wait until the operation can proceed or the queue is closed
    Block,
    /// Wait at most this long
    Timeout(Duration),
}

/// A rejected `put`; the item is handed back so nothing is lost
#[derive(Debug, PartialEq, Eq)]
pub enum PutError<T> {
    Full(T),
    Closed(T),
}

impl<T> PutError<T> {
    #[must_use]
    pub fn into_inner(self) -> T {
        match self {
            Self::Full(item) | Self::Closed(item) => item,
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed(_))
    }
}

impl<T> From<PutError<T>> for CrawlError {
    fn from(err: PutError<T>) -> Self {
        match err {
            PutError::Full(_) => CrawlError::QueueFull,
            PutError::Closed(_) => CrawlError::Cancelled,
        }
    }
}

/// A failed `get`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GetError {
    Empty,
    Closed,
}

impl From<GetError> for CrawlError {
    fn from(err: GetError) -> Self {
        match err {
            GetError::Empty => CrawlError::QueueEmpty,
            GetError::Closed => CrawlError::Cancelled,
        }
    }
}

struct Inner<T> {
    items: BTreeMap<(i64, u64), T>,
    next_seq: u64,
    closed: bool,
}

pub struct PriorityQueue<T> {
    inner: Mutex<Inner<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: Option<usize>,
}

impl<T: Prioritized> PriorityQueue<T> {
    /// Create a queue. `None` or `Some(0)` means unbounded.
    #[must_use]
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                items: BTreeMap::new(),
                next_seq: 0,
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity: capacity.filter(|&c| c > 0),
        }
    }

    #[must_use]
    pub fn unbounded() -> Self {
        Self::new(None)
    }

    /// Insert an item.
    ///
    /// # Errors
    ///
    /// Returns `PutError::Full(item)` if the queue is at capacity and the wait
    /// policy gave up, or `PutError::Closed(item)` once the queue is closed.
    pub fn put(&self, item: T, wait: Wait) -> Result<(), PutError<T>> {
        let deadline = deadline_for(wait);
        let mut inner = self.inner.lock();
        loop {
            if inner.closed {
                return Err(PutError::Closed(item));
            }
            if !self.is_at_capacity(&inner) {
                break;
            }
            if wait == Wait::NonBlocking {
                return Err(PutError::Full(item));
            }
            if !park(&self.not_full, &mut inner, deadline)
                && !inner.closed
                && self.is_at_capacity(&inner)
            {
                return Err(PutError::Full(item));
            }
        }

        Self::insert(&mut inner, item);
        drop(inner);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Insert ignoring the capacity bound. Used when restoring saved state and
    /// when re-queueing work that was already admitted once.
    pub(crate) fn force_put(&self, item: T) {
        let mut inner = self.inner.lock();
        Self::insert(&mut inner, item);
        drop(inner);
        self.not_empty.notify_one();
    }

    /// Remove the lowest-priority item.
    ///
    /// # Errors
    ///
    /// Returns `GetError::Empty` if nothing arrived within the wait policy, or
    /// `GetError::Closed` once the queue is closed and drained.
    pub fn get(&self, wait: Wait) -> Result<T, GetError> {
        let deadline = deadline_for(wait);
        let mut inner = self.inner.lock();
        loop {
            if let Some((_, item)) = inner.items.pop_first() {
                drop(inner);
                self.not_full.notify_one();
                return Ok(item);
            }
            if inner.closed {
                return Err(GetError::Closed);
            }
            if wait == Wait::NonBlocking {
                return Err(GetError::Empty);
            }
            if !park(&self.not_empty, &mut inner, deadline) && inner.items.is_empty() {
                return Err(if inner.closed {
                    GetError::Closed
                } else {
                    GetError::Empty
                });
            }
        }
    }

    /// Reject further puts and wake every blocked caller
    pub fn close(&self) {
        self.inner.lock().closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Remove and return every item in dequeue order
    pub fn drain(&self) -> Vec<T> {
        let items = std::mem::take(&mut self.inner.lock().items);
        self.not_full.notify_all();
        items.into_values().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().items.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    fn is_at_capacity(&self, inner: &Inner<T>) -> bool {
        self.capacity.is_some_and(|cap| inner.items.len() >= cap)
    }

    fn insert(inner: &mut Inner<T>, item: T) {
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.items.insert((item.priority(), seq), item);
    }
}

impl<T: Prioritized + Clone> PriorityQueue<T> {
    /// Copy of every item in dequeue order, without removing anything
    #[must_use]
    pub fn snapshot(&self) -> Vec<T> {
        self.inner.lock().items.values().cloned().collect()
    }
}

fn deadline_for(wait: Wait) -> Option<Instant> {
    match wait {
        Wait::Timeout(d) => Some(Instant::now() + d),
        Wait::NonBlocking | Wait::Block => None,
    }
}

/// Park on `cv`. Returns false when the deadline passed.
fn park<T>(cv: &Condvar, guard: &mut MutexGuard<'_, Inner<T>>, deadline: Option<Instant>) -> bool {
    match deadline {
        None => {
            cv.wait(guard);
            true
        }
        Some(deadline) => !cv.wait_until(guard, deadline).timed_out(),
    }
}
