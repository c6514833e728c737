//! Bounded pool of precompiled lookup statements.
//!
//! The pool is a fixed-capacity queue guarded by a mutex and a condition
//! variable. Acquisition takes a resting handle if one is there, otherwise
//! waits a short, fixed time for another caller to release one, and after
//! that compiles a fallback handle on the spot. It never waits longer than
//! `acquire_timeout` and never fails just because the pool is empty.
//!
//! Pooled handles hold connections from the capped connection handle.
//! Fallbacks take a free one if there is one and otherwise open a dedicated
//! connection, so an exhausted connection handle never turns the fallback
//! into a wait for `connection_timeout`.
//!
//! Only handles created by [`StatementPool::populate`] ever rest in the
//! queue. Fallback handles are disposed on release, so the number of pooled
//! handles (resting or checked out) never exceeds the capacity.

use std::collections::VecDeque;
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use r2d2_sqlite::SqliteConnectionManager;

use crate::connection::DbPool;
use crate::error::DbError;
use crate::statement::{HandleOrigin, StatementHandle};

/// Default number of handles kept ready.
pub const DEFAULT_POOL_CAPACITY: usize = 64;

/// Default wait for a released handle before compiling a fallback.
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_millis(20);

/// Sizing for a [`StatementPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    /// Number of handles compiled at startup and kept for reuse.
    pub capacity: usize,
    /// How long `acquire` waits on an empty pool before falling back.
    pub acquire_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_POOL_CAPACITY,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
        }
    }
}

/// Point-in-time counters for a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub capacity: usize,
    /// Handles resting in the pool right now.
    pub available: usize,
    /// Fallback handles compiled since the pool was created.
    pub fallbacks_created: u64,
    /// Pooled handles replaced because their connection outlived its lifetime.
    pub recycled: u64,
}

struct PoolState {
    idle: VecDeque<StatementHandle>,
    closed: bool,
}

/// A bounded, thread-safe pool of [`StatementHandle`]s.
pub struct StatementPool {
    db: DbPool,
    dedicated: SqliteConnectionManager,
    settings: PoolSettings,
    max_lifetime: Option<Duration>,
    state: Mutex<PoolState>,
    released: Condvar,
    fallbacks_created: AtomicU64,
    recycled: AtomicU64,
}

impl StatementPool {
    /// Creates an empty pool over `db`. Call [`populate`](Self::populate)
    /// before serving lookups.
    ///
    /// Fallback handles that find `db` exhausted connect through
    /// `dedicated`. Pooled handles older than `max_lifetime` are recompiled
    /// on release.
    pub fn new(
        db: DbPool,
        dedicated: SqliteConnectionManager,
        settings: PoolSettings,
        max_lifetime: Option<Duration>,
    ) -> Self {
        Self {
            db,
            dedicated,
            state: Mutex::new(PoolState {
                idle: VecDeque::with_capacity(settings.capacity),
                closed: false,
            }),
            settings,
            max_lifetime,
            released: Condvar::new(),
            fallbacks_created: AtomicU64::new(0),
            recycled: AtomicU64::new(0),
        }
    }

    /// Compiles handles until the pool holds `capacity` of them.
    ///
    /// Returns how many were created. On error every handle created by this
    /// call is disposed and the pool is left as it was.
    ///
    /// # Errors
    ///
    /// `DbError::PoolClosed` after [`drain`](Self::drain), otherwise whatever
    /// [`StatementHandle`] compilation reports.
    pub fn populate(&self) -> Result<usize, DbError> {
        let missing = {
            let state = self.lock_state();
            if state.closed {
                return Err(DbError::PoolClosed);
            }
            self.settings.capacity.saturating_sub(state.idle.len())
        };

        let mut created = Vec::with_capacity(missing);
        for _ in 0..missing {
            match StatementHandle::compile(&self.db, HandleOrigin::Pooled) {
                Ok(handle) => created.push(handle),
                Err(e) => {
                    created.into_iter().for_each(StatementHandle::dispose);
                    return Err(e);
                }
            }
        }

        self.lock_state().idle.extend(created);
        self.released.notify_all();
        tracing::info!(
            created = missing,
            capacity = self.settings.capacity,
            "statement pool populated"
        );
        Ok(missing)
    }

    /// Hands out a handle, falling back to on-demand compilation when the
    /// pool stays empty for `acquire_timeout`.
    ///
    /// The returned guard releases the handle when dropped.
    ///
    /// # Errors
    ///
    /// `DbError::PoolClosed` after [`drain`](Self::drain). A fallback can
    /// also fail to compile, which signals a broken connection or schema.
    pub fn acquire(&self) -> Result<PooledStatement<'_>, DbError> {
        let handle = match self.take_idle()? {
            Some(handle) => handle,
            None => self.compile_fallback()?,
        };
        Ok(PooledStatement {
            pool: self,
            handle: Some(handle),
        })
    }

    /// Takes a handle back.
    ///
    /// Pooled handles return to the queue while it has room and the pool is
    /// open. Fallback handles, surplus handles and anything released after
    /// draining are disposed. `None` is ignored.
    pub fn release(&self, handle: Option<StatementHandle>) {
        let Some(handle) = handle else {
            return;
        };
        if handle.origin() == HandleOrigin::Fallback {
            handle.dispose();
            return;
        }

        let handle = match self.max_lifetime {
            Some(lifetime) if handle.age() >= lifetime => match self.recycle(handle) {
                Some(fresh) => fresh,
                None => return,
            },
            _ => handle,
        };

        let mut state = self.lock_state();
        if state.closed || state.idle.len() >= self.settings.capacity {
            drop(state);
            handle.dispose();
            return;
        }
        state.idle.push_back(handle);
        drop(state);
        self.released.notify_one();
    }

    /// Closes the pool and disposes every resting handle.
    ///
    /// Handles checked out at this point are disposed when their guards
    /// drop. Waiting acquirers wake up and fail with `PoolClosed`.
    pub fn drain(&self) -> usize {
        let resting: Vec<StatementHandle> = {
            let mut state = self.lock_state();
            state.closed = true;
            state.idle.drain(..).collect()
        };
        self.released.notify_all();

        let disposed = resting.len();
        resting.into_iter().for_each(StatementHandle::dispose);
        tracing::info!(disposed, "statement pool drained");
        disposed
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            capacity: self.settings.capacity,
            available: self.lock_state().idle.len(),
            fallbacks_created: self.fallbacks_created.load(Ordering::Relaxed),
            recycled: self.recycled.load(Ordering::Relaxed),
        }
    }

    fn take_idle(&self) -> Result<Option<StatementHandle>, DbError> {
        let mut state = self.lock_state();
        if state.closed {
            return Err(DbError::PoolClosed);
        }
        if let Some(handle) = state.idle.pop_front() {
            return Ok(Some(handle));
        }

        let (mut state, _) = self
            .released
            .wait_timeout_while(state, self.settings.acquire_timeout, |s| {
                s.idle.is_empty() && !s.closed
            })
            .unwrap_or_else(PoisonError::into_inner);
        if state.closed {
            return Err(DbError::PoolClosed);
        }
        Ok(state.idle.pop_front())
    }

    fn compile_fallback(&self) -> Result<StatementHandle, DbError> {
        let handle = StatementHandle::compile_fallback(&self.db, &self.dedicated)?;
        let total = self.fallbacks_created.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::debug!(
            total,
            dedicated = handle.is_dedicated(),
            timeout_ms = self.settings.acquire_timeout.as_millis() as u64,
            "statement pool empty, compiled fallback handle"
        );
        Ok(handle)
    }

    fn recycle(&self, expired: StatementHandle) -> Option<StatementHandle> {
        expired.dispose();
        match StatementHandle::compile_within(&self.db, self.settings.acquire_timeout) {
            Ok(fresh) => {
                self.recycled.fetch_add(1, Ordering::Relaxed);
                Some(fresh)
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "failed to recompile expired statement handle, pool shrinks by one"
                );
                None
            }
        }
    }

    // The queue is never left half-updated while the lock is held, so a
    // poisoned lock still guards a consistent state.
    fn lock_state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A checked-out handle that goes back to its pool when dropped.
pub struct PooledStatement<'a> {
    pool: &'a StatementPool,
    handle: Option<StatementHandle>,
}

impl fmt::Debug for PooledStatement<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PooledStatement").field(&self.handle).finish()
    }
}

impl Deref for PooledStatement<'_> {
    type Target = StatementHandle;

    fn deref(&self) -> &StatementHandle {
        self.handle
            .as_ref()
            .expect("statement handle is present until the guard drops")
    }
}

impl Drop for PooledStatement<'_> {
    fn drop(&mut self) {
        self.pool.release(self.handle.take());
    }
}
