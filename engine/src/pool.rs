//! A fixed-size pool of engine sessions.
//!
//! Sessions are handed out most-recently-released first. Callers that find
//! the pool empty queue up and are served in arrival order. A session whose
//! process dies is dropped from the pool and replaced by a fresh one.
//!
//! Neither [`StockfishPool::acquire`] nor the futures it returns ever fail or
//! time out. After [`StockfishPool::terminate`], queued and future acquires
//! stay pending forever; wrap them in a timeout if that matters.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::oneshot;

use crate::config::PoolConfig;
use crate::{EngineError, EngineFault, SessionId, StockfishEngine};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MemberStatus {
    Free,
    Held,
    Replacing,
}

struct Member {
    engine: StockfishEngine,
    status: MemberStatus,
}

#[derive(Default)]
struct PoolState {
    members: HashMap<SessionId, Member>,
    /// Stack of free members, most recently released last.
    free: Vec<SessionId>,
    waiters: VecDeque<oneshot::Sender<StockfishEngine>>,
    terminated: bool,
}

impl PoolState {
    /// Give `id` to the oldest waiter still listening, or put it on the free stack.
    fn make_available(&mut self, id: SessionId) {
        let Some(member) = self.members.get_mut(&id) else {
            return;
        };
        while let Some(waiter) = self.waiters.pop_front() {
            if waiter.send(member.engine.clone()).is_ok() {
                member.status = MemberStatus::Held;
                return;
            }
        }
        member.status = MemberStatus::Free;
        self.free.push(id);
    }

    fn count(&self, status: MemberStatus) -> usize {
        self.members.values().filter(|m| m.status == status).count()
    }
}

/// Point-in-time view of the pool's bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Live members, free or held.
    pub members: usize,
    pub free: usize,
    pub waiting: usize,
    pub replacing: usize,
}

/// A queued [`StockfishPool::acquire`].
///
/// On drop, an engine that was handed over but never picked up is released
/// back into the pool.
struct Waiting<'a> {
    pool: &'a StockfishPool,
    rx: oneshot::Receiver<StockfishEngine>,
}

impl Drop for Waiting<'_> {
    fn drop(&mut self) {
        self.rx.close();
        if let Ok(engine) = self.rx.try_recv() {
            tracing::debug!(session = %engine.id(), "Acquire dropped after hand-off, releasing");
            self.pool.release(engine);
        }
    }
}

/// Cheap, cloneable handle to a pool of engines.
#[derive(Clone)]
pub struct StockfishPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    config: PoolConfig,
    state: Mutex<PoolState>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl StockfishPool {
    /// Spawn `config.size` engines.
    ///
    /// Each engine can be acquired right away, before its handshake is done.
    /// Call [`initialize`](Self::initialize) to wait for all of them.
    #[tracing::instrument(level = "info", skip_all, fields(pool_size = config.size))]
    pub fn new(config: PoolConfig) -> Result<Self, EngineError> {
        let size = config.size;
        let pool = Self {
            inner: Arc::new(PoolInner {
                config,
                state: Mutex::new(PoolState::default()),
            }),
        };

        for _ in 0..size {
            if let Err(e) = pool.inner.spawn_member() {
                tracing::error!("Failed to start engine pool: {}", e);
                pool.terminate();
                return Err(e);
            }
        }

        tracing::info!("Engine pool started");
        Ok(pool)
    }

    /// Configured number of engines.
    pub fn size(&self) -> usize {
        self.inner.config.size
    }

    pub fn stats(&self) -> PoolStats {
        let state = lock(&self.inner.state);
        PoolStats {
            members: state.members.len() - state.count(MemberStatus::Replacing),
            free: state.free.len(),
            waiting: state.waiters.iter().filter(|w| !w.is_closed()).count(),
            replacing: state.count(MemberStatus::Replacing),
        }
    }

    /// Ids of the live members, free or held.
    pub fn session_ids(&self) -> Vec<SessionId> {
        lock(&self.inner.state)
            .members
            .iter()
            .filter(|(_, m)| m.status != MemberStatus::Replacing)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Wait until every current member has finished its handshake.
    pub async fn initialize(&self) -> Result<(), EngineError> {
        let engines: Vec<StockfishEngine> = lock(&self.inner.state)
            .members
            .values()
            .filter(|m| m.status != MemberStatus::Replacing)
            .map(|m| m.engine.clone())
            .collect();

        futures::future::try_join_all(engines.iter().map(|e| e.wait_ready())).await?;
        tracing::info!(engines = engines.len(), "Engine pool ready");
        Ok(())
    }

    /// Take an engine, waiting for one to be released if none is free.
    ///
    /// Dropping the returned future gives up the place in the queue. An
    /// engine handed over just before the drop goes back to the pool.
    pub async fn acquire(&self) -> StockfishEngine {
        let rx = {
            let mut state = lock(&self.inner.state);
            if state.terminated {
                None
            } else {
                while let Some(id) = state.free.pop() {
                    if let Some(member) = state.members.get_mut(&id) {
                        member.status = MemberStatus::Held;
                        tracing::debug!(session = %id, "Engine acquired");
                        return member.engine.clone();
                    }
                }
                let (tx, rx) = oneshot::channel();
                state.waiters.retain(|w| !w.is_closed());
                state.waiters.push_back(tx);
                tracing::debug!(waiting = state.waiters.len(), "No free engine, queueing");
                Some(rx)
            }
        };
        // Nothing is ever released into a terminated pool
        let Some(rx) = rx else {
            return std::future::pending().await;
        };

        let mut waiting = Waiting { pool: self, rx };
        match (&mut waiting.rx).await {
            Ok(engine) => engine,
            // The pool was terminated with us in the queue
            Err(_) => std::future::pending().await,
        }
    }

    /// Hand an engine back. Engines the pool no longer owns are ignored.
    pub fn release(&self, engine: StockfishEngine) {
        let id = engine.id();
        let mut state = lock(&self.inner.state);
        match state.members.get(&id) {
            Some(member) if member.status == MemberStatus::Held => {}
            _ => {
                tracing::debug!(session = %id, "Ignoring release of an engine the pool does not hold");
                return;
            }
        }
        state.make_available(id);
        tracing::debug!(session = %id, "Engine released");
    }

    /// Kill every engine and forget all members and waiters.
    ///
    /// Waiters are dropped without an answer, so their `acquire` calls never
    /// complete. Neither do acquires made after this.
    pub fn terminate(&self) {
        let members = {
            let mut state = lock(&self.inner.state);
            state.terminated = true;
            state.free.clear();
            state.waiters.clear();
            std::mem::take(&mut state.members)
        };
        for member in members.into_values() {
            member.engine.terminate();
        }
        tracing::info!("Engine pool terminated");
    }
}

impl PoolInner {
    fn spawn_member(self: &Arc<Self>) -> Result<(), EngineError> {
        let engine = StockfishEngine::spawn(&self.config.engine)?;
        // Admit first so an early crash finds the member to replace
        self.admit(engine.clone());
        self.watch_for_crash(&engine);
        Ok(())
    }

    fn admit(&self, engine: StockfishEngine) {
        let mut state = lock(&self.state);
        if state.terminated {
            drop(state);
            engine.terminate();
            return;
        }
        let id = engine.id();
        state.members.insert(
            id,
            Member {
                engine,
                status: MemberStatus::Free,
            },
        );
        state.make_available(id);
    }

    fn watch_for_crash(self: &Arc<Self>, engine: &StockfishEngine) {
        let pool: Weak<Self> = Arc::downgrade(self);
        let engine = engine.clone();
        tokio::spawn(async move {
            let Some(fault) = engine.wait_exit().await else {
                return;
            };
            if let Some(pool) = pool.upgrade() {
                pool.replace(engine, fault);
            }
        });
    }

    fn replace(self: &Arc<Self>, engine: StockfishEngine, fault: EngineFault) {
        let id = engine.id();
        {
            let mut state = lock(&self.state);
            if state.terminated {
                return;
            }
            let Some(member) = state.members.get_mut(&id) else {
                return;
            };
            member.status = MemberStatus::Replacing;
            state.free.retain(|free| *free != id);
        }

        tracing::warn!(session = %id, "Replacing crashed engine: {}", fault);
        engine.terminate();

        let replacement = StockfishEngine::spawn(&self.config.engine);
        lock(&self.state).members.remove(&id);

        match replacement {
            Ok(engine) => {
                tracing::info!(old = %id, new = %engine.id(), "Replacement engine spawned");
                self.admit(engine.clone());
                self.watch_for_crash(&engine);
            }
            Err(e) => {
                tracing::error!(session = %id, "Failed to spawn replacement engine: {}", e);
            }
        }
    }
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        let state = lock(&self.state);
        for member in state.members.values() {
            member.engine.terminate();
        }
    }
}
