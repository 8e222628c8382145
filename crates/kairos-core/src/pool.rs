//! Request context pool.
//!
//! [`ContextPool::acquire`] hands out a [`PooledContext`] guard. The guard
//! derefs to [`RequestContext`] and returns it to the pool when dropped, so
//! a context is released on every exit path: normal completion, early
//! return and unwinding.
//!
//! Acquisition never waits. If no idle context is available a new one is
//! allocated; if the pool already holds `max_idle` contexts, a released one
//! is simply dropped.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::context::RequestContext;

/// Default upper bound on idle contexts kept for reuse.
pub const DEFAULT_MAX_IDLE: usize = 1024;

/// Counters describing pool behavior.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Contexts constructed because none was idle.
    pub allocated: u64,
    /// Acquisitions served from the idle list.
    pub reused: u64,
    /// Contexts currently idle.
    pub idle: usize,
}

/// Pool of reusable [`RequestContext`] values.
#[derive(Debug)]
pub struct ContextPool {
    idle: Mutex<Vec<RequestContext>>,
    max_idle: usize,
    allocated: AtomicU64,
    reused: AtomicU64,
}

impl Default for ContextPool {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_IDLE)
    }
}

impl ContextPool {
    /// Creates a pool that keeps at most `max_idle` idle contexts.
    #[must_use]
    pub fn new(max_idle: usize) -> Self {
        Self {
            idle: Mutex::new(Vec::new()),
            max_idle,
            allocated: AtomicU64::new(0),
            reused: AtomicU64::new(0),
        }
    }

    /// Takes a blank context out of the pool.
    #[must_use]
    pub fn acquire(self: &Arc<Self>) -> PooledContext {
        let recycled = self.idle.lock().pop();
        let reused = recycled.is_some();
        let ctx = if let Some(ctx) = recycled {
            self.reused.fetch_add(1, Ordering::Relaxed);
            ctx
        } else {
            self.allocated.fetch_add(1, Ordering::Relaxed);
            RequestContext::new()
        };

        PooledContext {
            ctx,
            pool: Arc::clone(self),
            reused,
        }
    }

    fn release(&self, mut ctx: RequestContext) {
        ctx.reset();
        let mut idle = self.idle.lock();
        if idle.len() < self.max_idle {
            idle.push(ctx);
        }
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            allocated: self.allocated.load(Ordering::Relaxed),
            reused: self.reused.load(Ordering::Relaxed),
            idle: self.idle.lock().len(),
        }
    }
}

/// Exclusive handle to a pooled [`RequestContext`].
#[derive(Debug)]
pub struct PooledContext {
    ctx: RequestContext,
    pool: Arc<ContextPool>,
    reused: bool,
}

impl PooledContext {
    /// Returns `true` if this context came from the idle list.
    #[must_use]
    pub const fn was_reused(&self) -> bool {
        self.reused
    }
}

impl Deref for PooledContext {
    type Target = RequestContext;

    fn deref(&self) -> &RequestContext {
        &self.ctx
    }
}

impl DerefMut for PooledContext {
    fn deref_mut(&mut self) -> &mut RequestContext {
        &mut self.ctx
    }
}

impl Drop for PooledContext {
    fn drop(&mut self) {
        let ctx = std::mem::take(&mut self.ctx);
        self.pool.release(ctx);
    }
}
