//! Counted event pool
//!
//! Events are heap buffers that report back to their pool when dropped, so
//! the live-event count is exact no matter which path releases an event
//! (explicit free, queue deletion, or a failed send that is discarded).

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::utils::RuntimeError;

struct PoolInner {
    capacity: Option<usize>,
    live: AtomicUsize,
    allocs: AtomicU64,
    frees: AtomicU64,
}

/// Event pool with an optional cap on live events
#[derive(Clone)]
pub struct EventPool {
    inner: Arc<PoolInner>,
}

impl EventPool {
    /// Pool without a capacity limit
    pub fn unbounded() -> Self {
        Self::build(None)
    }

    /// Pool that refuses allocations beyond `capacity` live events
    pub fn with_capacity(capacity: usize) -> Self {
        Self::build(Some(capacity))
    }

    fn build(capacity: Option<usize>) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                capacity,
                live: AtomicUsize::new(0),
                allocs: AtomicU64::new(0),
                frees: AtomicU64::new(0),
            }),
        }
    }

    /// Allocate a zeroed event of `size` bytes
    pub fn alloc(&self, size: usize) -> Result<Event, RuntimeError> {
        match self.inner.capacity {
            Some(capacity) => {
                self.inner
                    .live
                    .fetch_update(Ordering::AcqRel, Ordering::Acquire, |live| {
                        (live < capacity).then_some(live + 1)
                    })
                    .map_err(|live| RuntimeError::PoolExhausted { live, capacity })?;
            }
            None => {
                self.inner.live.fetch_add(1, Ordering::AcqRel);
            }
        }
        self.inner.allocs.fetch_add(1, Ordering::Relaxed);

        Ok(Event {
            buf: vec![0u8; size].into_boxed_slice(),
            pool: Arc::clone(&self.inner),
        })
    }

    /// Events allocated and not yet released
    pub fn live(&self) -> usize {
        self.inner.live.load(Ordering::Acquire)
    }

    pub fn capacity(&self) -> Option<usize> {
        self.inner.capacity
    }

    /// Total (allocations, releases) since the pool was created
    pub fn totals(&self) -> (u64, u64) {
        (
            self.inner.allocs.load(Ordering::Relaxed),
            self.inner.frees.load(Ordering::Relaxed),
        )
    }
}

/// A pool-allocated event buffer
pub struct Event {
    buf: Box<[u8]>,
    pool: Arc<PoolInner>,
}

impl Event {
    pub fn size(&self) -> usize {
        self.buf.len()
    }

    pub fn payload(&self) -> &[u8] {
        &self.buf
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }
}

impl Drop for Event {
    fn drop(&mut self) {
        self.pool.live.fetch_sub(1, Ordering::AcqRel);
        self.pool.frees.fetch_add(1, Ordering::Relaxed);
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event").field("size", &self.buf.len()).finish()
    }
}
