//! Pooled session reuse for the DRDA client driver.
//!
//! A pooled session is never physically closed on return. It is closed
//! logically with `close_for_reuse`, which flows the close of its open
//! cursors and any owed auto-commit, and sits idle until the next checkout
//! reopens it with a light or full reset.

use drda_client::Session;
use drda_core::{Error, PoolError, PoolErrorKind, Result};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Idle sessions kept for reuse; extras are closed on return
    pub max_idle: usize,
    /// Checkout runs a full reset (session defaults, statement re-prepare)
    /// instead of a light reopen
    pub full_reset_on_checkout: bool,
    /// Keep prepared statements open across a return
    pub statement_pooling: bool,
    /// Roll back a unit of work left open by the borrower
    pub rollback_on_return: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_idle: 8,
            full_reset_on_checkout: true,
            statement_pooling: false,
            rollback_on_return: true,
        }
    }
}

impl PoolConfig {
    /// Create a pool configuration keeping up to `max_idle` sessions.
    pub fn new(max_idle: usize) -> Self {
        Self {
            max_idle,
            ..Default::default()
        }
    }

    pub fn full_reset_on_checkout(mut self, enabled: bool) -> Self {
        self.full_reset_on_checkout = enabled;
        self
    }

    pub fn statement_pooling(mut self, enabled: bool) -> Self {
        self.statement_pooling = enabled;
        self
    }

    pub fn rollback_on_return(mut self, enabled: bool) -> Self {
        self.rollback_on_return = enabled;
        self
    }
}

/// Pool statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Sessions waiting for a checkout
    pub idle_sessions: usize,
    /// Sessions currently checked out
    pub active_sessions: usize,
    /// Sessions opened by the factory
    pub created: usize,
    /// Checkouts served from the idle list
    pub reused: usize,
    /// Sessions closed instead of being kept
    pub discarded: usize,
}

type Factory = Box<dyn Fn() -> Result<Session> + Send + Sync>;

struct PoolInner {
    config: PoolConfig,
    factory: Factory,
    idle: Mutex<VecDeque<Session>>,
    closed: AtomicBool,
    active: AtomicUsize,
    created: AtomicUsize,
    reused: AtomicUsize,
    discarded: AtomicUsize,
}

impl PoolInner {
    fn idle(&self) -> Result<MutexGuard<'_, VecDeque<Session>>> {
        self.idle.lock().map_err(|_| {
            Error::Pool(PoolError {
                kind: PoolErrorKind::Closed,
                message: "pool state is poisoned".to_string(),
                source: None,
            })
        })
    }

    fn pop_idle(&self) -> Result<Option<Session>> {
        Ok(self.idle()?.pop_front())
    }

    /// Close for good. A session that refuses to close is aborted in place,
    /// which rolls back and releases the channel.
    fn discard(&self, session: &Session) {
        self.discarded.fetch_add(1, Ordering::Relaxed);
        if let Err(e) = session.close() {
            tracing::warn!(error = %e, "Closing discarded session failed, aborting");
            let inline = |task: Box<dyn FnOnce() + Send + 'static>| task();
            if let Err(e) = session.abort(&inline) {
                tracing::warn!(error = %e, "Aborting discarded session failed");
            }
        }
    }

    /// Reopen an idle session for a new borrower.
    fn reopen(&self, session: &Session) -> Result<()> {
        if self.config.full_reset_on_checkout {
            session.reset(true, false)
        } else {
            session.light_reset()
        }
    }

    /// Close logically and keep, or close for good.
    fn give_back(&self, session: Session) -> Result<()> {
        self.active.fetch_sub(1, Ordering::Relaxed);
        let prepared = self.prepare_for_reuse(&session);
        let keep = prepared.is_ok()
            && !self.closed.load(Ordering::Acquire)
            && !session.is_physically_closed();
        if keep {
            let mut idle = self.idle()?;
            if idle.len() < self.config.max_idle {
                idle.push_back(session);
                tracing::debug!(idle = idle.len(), "Session returned to pool");
                return Ok(());
            }
        }
        self.discard(&session);
        prepared.map_err(|e| {
            Error::Pool(PoolError {
                kind: PoolErrorKind::Reuse,
                message: format!("session could not be prepared for reuse: {e}"),
                source: Some(Box::new(e)),
            })
        })
    }

    fn prepare_for_reuse(&self, session: &Session) -> Result<()> {
        if self.config.rollback_on_return && session.in_unit_of_work()? {
            tracing::debug!("Rolling back unit of work left open by borrower");
            session.rollback()?;
        }
        session.check_for_transaction_in_progress()?;
        session.close_for_reuse(self.config.statement_pooling)
    }
}

/// A pool of reusable sessions.
///
/// Cloning the handle shares the pool.
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("config", &self.inner.config)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl Pool {
    /// Create a pool that opens new sessions with `factory`.
    pub fn new<F>(config: PoolConfig, factory: F) -> Self
    where
        F: Fn() -> Result<Session> + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(PoolInner {
                config,
                factory: Box::new(factory),
                idle: Mutex::new(VecDeque::new()),
                closed: AtomicBool::new(false),
                active: AtomicUsize::new(0),
                created: AtomicUsize::new(0),
                reused: AtomicUsize::new(0),
                discarded: AtomicUsize::new(0),
            }),
        }
    }

    /// Get the pool configuration.
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Check out a session: an idle one reopened, or a new one.
    pub fn get(&self) -> Result<PooledSession> {
        if self.is_closed() {
            return Err(Error::Pool(PoolError {
                kind: PoolErrorKind::Closed,
                message: "pool is closed".to_string(),
                source: None,
            }));
        }
        while let Some(session) = self.inner.pop_idle()? {
            match self.inner.reopen(&session) {
                Ok(()) => {
                    self.inner.reused.fetch_add(1, Ordering::Relaxed);
                    return Ok(self.checked_out(session));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Idle session failed to reset, discarding");
                    self.inner.discard(&session);
                }
            }
        }
        let session = (self.inner.factory)()?;
        self.inner.created.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("Opened new pooled session");
        Ok(self.checked_out(session))
    }

    fn checked_out(&self, session: Session) -> PooledSession {
        self.inner.active.fetch_add(1, Ordering::Relaxed);
        PooledSession {
            session,
            pool: Arc::clone(&self.inner),
            returned: false,
        }
    }

    /// Get the current pool statistics.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            idle_sessions: self.inner.idle().map(|idle| idle.len()).unwrap_or_default(),
            active_sessions: self.inner.active.load(Ordering::Relaxed),
            created: self.inner.created.load(Ordering::Relaxed),
            reused: self.inner.reused.load(Ordering::Relaxed),
            discarded: self.inner.discarded.load(Ordering::Relaxed),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Close every idle session. Checked-out sessions are closed on return.
    pub fn close(&self) -> Result<()> {
        self.inner.closed.store(true, Ordering::Release);
        let idle: Vec<Session> = self.inner.idle()?.drain(..).collect();
        tracing::info!(idle = idle.len(), "Closing pool");
        for session in &idle {
            self.inner.discard(session);
        }
        Ok(())
    }
}

/// A session borrowed from a [`Pool`].
///
/// Dropping it returns the session; [`release`](Self::release) does the same
/// and reports whether the session could be kept.
pub struct PooledSession {
    session: Session,
    pool: Arc<PoolInner>,
    returned: bool,
}

impl std::fmt::Debug for PooledSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledSession")
            .field("session", &self.session)
            .field("returned", &self.returned)
            .finish_non_exhaustive()
    }
}

impl PooledSession {
    /// Return the session to the pool now.
    pub fn release(mut self) -> Result<()> {
        self.returned = true;
        self.pool.give_back(self.session.clone())
    }

    /// Take the session out of the pool for good.
    pub fn detach(mut self) -> Session {
        self.returned = true;
        self.pool.active.fetch_sub(1, Ordering::Relaxed);
        self.session.clone()
    }
}

impl std::ops::Deref for PooledSession {
    type Target = Session;

    fn deref(&self) -> &Self::Target {
        &self.session
    }
}

impl Drop for PooledSession {
    fn drop(&mut self) {
        if self.returned {
            return;
        }
        if let Err(e) = self.pool.give_back(self.session.clone()) {
            tracing::warn!(error = %e, "Pooled session discarded on return");
        }
    }
}
