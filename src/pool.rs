//! The connection pool: a fixed set of holders, a FIFO waiter queue, and a
//! lightweight admission-control heuristic (spec §4.5, component C5).
//!
//! Grounded directly on the teacher crate's `SharedPool`/`PoolInternals`:
//! `PoolState::idle`/`waiters` here are the same shape as the teacher's
//! `conns: VecDeque<IdleConn<C>>`/`waiters: VecDeque<oneshot::Sender<Conn<C>>>`,
//! and [`PoolInner::mark_idle`] is a direct translation of the teacher's
//! `PoolInternals::put_idle_conn` (hand the slot straight to the oldest
//! waiter if one is queued, otherwise park it as idle).

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex as StdMutex, Weak};
use std::time::{Duration, Instant};

use tokio::sync::oneshot;

use crate::adapter::{Adapter, Outcome};
use crate::client::Client;
use crate::error::{ConnectionError, RunError};
use crate::holder::{HolderId, HolderInner, HolderState, IdleSink};
use crate::options::Options;
use crate::principal::Principal;

struct Waiter {
    tx: oneshot::Sender<HolderId>,
}

struct PoolState<A: Adapter> {
    idle: VecDeque<HolderId>,
    waiters: VecDeque<Waiter>,
    holders: HashMap<HolderId, Arc<HolderInner<A>>>,
}

/// Simplified CoDel-style admission control (spec §4.5): once checkout wait
/// times have exceeded `queue_target` continuously for `queue_interval`, new
/// check-outs are refused immediately (without joining the waiter queue)
/// until a check-out completes quickly again. This crate does not attempt
/// the full CoDel algorithm described informally in spec §9 — a single
/// "first time we went over target" timestamp plus a reset on a fast
/// check-out is judged close enough for the invariants this crate tests.
struct Admission {
    target: Duration,
    interval: Duration,
    first_over_target: StdMutex<Option<Instant>>,
}

impl Admission {
    fn new(target: Duration, interval: Duration) -> Self {
        Admission {
            target,
            interval,
            first_over_target: StdMutex::new(None),
        }
    }

    fn should_shed(&self) -> bool {
        let guard = self.first_over_target.lock().unwrap();
        match *guard {
            Some(since) => since.elapsed() >= self.interval,
            None => false,
        }
    }

    fn record(&self, wait: Duration) {
        let mut guard = self.first_over_target.lock().unwrap();
        if wait > self.target {
            guard.get_or_insert_with(Instant::now);
        } else {
            *guard = None;
        }
    }
}

pub(crate) struct PoolInner<A: Adapter> {
    adapter: Arc<A>,
    options: Arc<Options<A>>,
    state: StdMutex<PoolState<A>>,
    admission: Admission,
    /// Set once, right after construction, so [`PoolInner::mark_dead`] can
    /// spawn this holder's replacement with a handle back to the pool.
    self_ref: StdMutex<Option<Weak<PoolInner<A>>>>,
}

impl<A: Adapter> IdleSink<A> for PoolInner<A> {
    fn mark_idle(&self, id: HolderId) {
        let mut state = self.state.lock().unwrap();
        loop {
            match state.waiters.pop_front() {
                Some(waiter) => {
                    if waiter.tx.send(id).is_ok() {
                        return;
                    }
                    // Waiter already gave up (dropped its receiver); try the
                    // next one instead of stranding this holder idle forever.
                }
                None => {
                    state.idle.push_back(id);
                    return;
                }
            }
        }
    }

    /// A dead holder (backoff exhausted under `backoff_type = stop`) is
    /// removed and immediately replaced with a fresh holder so the pool
    /// keeps `pool_size` members (spec §4.5 "the pool restarts the holder").
    fn mark_dead(&self, id: HolderId) {
        {
            let mut state = self.state.lock().unwrap();
            state.idle.retain(|&h| h != id);
            state.holders.remove(&id);
        }
        let Some(self_arc) = self.self_ref.lock().unwrap().as_ref().and_then(Weak::upgrade) else {
            return;
        };
        let sink: Weak<dyn IdleSink<A>> = Arc::downgrade(&self_arc);
        let holder = HolderInner::new(self.adapter.clone(), self.options.clone(), sink);
        self.state.lock().unwrap().holders.insert(holder.id, holder.clone());
        holder.spawn_supervisor();
    }
}

impl<A: Adapter> PoolInner<A> {
    fn new(adapter: Arc<A>, options: Arc<Options<A>>) -> Self {
        let admission = Admission::new(options.queue_target, options.queue_interval);
        PoolInner {
            adapter,
            options,
            state: StdMutex::new(PoolState {
                idle: VecDeque::new(),
                waiters: VecDeque::new(),
                holders: HashMap::new(),
            }),
            admission,
            self_ref: StdMutex::new(None),
        }
    }

    fn holder(&self, id: HolderId) -> Option<Arc<HolderInner<A>>> {
        self.state.lock().unwrap().holders.get(&id).cloned()
    }

    /// Seizes `id`'s connection and runs the `checkout` callback, producing
    /// a ready [`Client`]. Returns `Ok(None)` if the holder turned out to be
    /// disconnected (the caller should try again) rather than an error —
    /// that's an ordinary race, not a failure.
    async fn try_claim(
        self: &Arc<Self>,
        id: HolderId,
        principal: &Principal,
        pool_time: Duration,
    ) -> Result<Option<Client<A>>, RunError<A::Error>> {
        let Some(holder) = self.holder(id) else {
            return Ok(None);
        };
        let Some((mut guard, state)) = holder.seize().await else {
            return Ok(None);
        };
        match self.adapter.checkout(state).await {
            Outcome::Ok((), state) => {
                *guard = HolderState::Connected(state);
                Ok(Some(Client::new(
                    holder,
                    self.clone(),
                    self.adapter.clone(),
                    self.options.clone(),
                    principal.id(),
                    guard,
                    pool_time,
                )))
            }
            Outcome::Error(e, state) => {
                log::warn!("{}: checkout callback returned an error, keeping the connection idle: {e}", holder.id);
                holder.restore(guard, state);
                self.mark_idle(holder.id);
                Err(RunError::User(ConnectionError::Adapter(e)))
            }
            Outcome::Disconnect(e, state) => {
                holder.teardown(guard, Some(&e), state).await;
                Err(RunError::User(ConnectionError::Adapter(e)))
            }
        }
    }

    pub async fn checkout(self: &Arc<Self>, principal: &Principal) -> Result<Client<A>, RunError<A::Error>> {
        let deadline = Instant::now() + self.options.queue_timeout;
        let started = Instant::now();

        loop {
            let idle_id = self.state.lock().unwrap().idle.pop_front();
            if let Some(id) = idle_id {
                let pool_time = started.elapsed();
                if let Some(client) = self.try_claim(id, principal, pool_time).await? {
                    self.admission.record(pool_time);
                    return Ok(client);
                }
                continue;
            }

            if self.admission.should_shed() {
                return Err(RunError::TimedOut);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                self.admission.record(self.options.queue_timeout);
                return Err(RunError::TimedOut);
            }

            let (tx, rx) = oneshot::channel();
            self.state.lock().unwrap().waiters.push_back(Waiter { tx });

            match tokio::time::timeout(remaining, rx).await {
                Ok(Ok(id)) => {
                    let pool_time = started.elapsed();
                    if let Some(client) = self.try_claim(id, principal, pool_time).await? {
                        self.admission.record(pool_time);
                        return Ok(client);
                    }
                    // Handed a holder that disconnected before we could seize
                    // it; loop around and try again against the live pool.
                }
                Ok(Err(_)) | Err(_) => {
                    self.admission.record(self.options.queue_timeout);
                    return Err(RunError::TimedOut);
                }
            }
        }
    }
}

/// A pool of holders for one adapter, reconnecting and pinging them in the
/// background (spec §4.2, §4.5).
///
/// Cheap to clone (an `Arc` around the shared state), mirroring the teacher
/// crate's `Pool<M>`.
pub struct Pool<A: Adapter> {
    inner: Arc<PoolInner<A>>,
}

impl<A: Adapter> Clone for Pool<A> {
    fn clone(&self) -> Self {
        Pool { inner: self.inner.clone() }
    }
}

impl<A: Adapter> PartialEq for Pool<A> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<A: Adapter> Pool<A> {
    /// Builds a pool of `options.pool_size` holders. If `options.sync_connect`
    /// is set, blocks until every holder's first connect attempt settles;
    /// a holder that fails with `backoff_type = stop` aborts the whole
    /// startup, matching spec §4.3's "stop" semantics applied at boot.
    /// Holders that fail with any other backoff kind fall through to the
    /// ordinary background retry loop instead of failing startup.
    pub async fn new(adapter: A, options: Options<A>) -> Result<Pool<A>, A::Error> {
        let adapter = Arc::new(adapter);
        let options = Arc::new(options);
        let inner = Arc::new(PoolInner::new(adapter.clone(), options.clone()));
        *inner.self_ref.lock().unwrap() = Some(Arc::downgrade(&inner));

        let mut holders = Vec::with_capacity(options.pool_size as usize);
        for _ in 0..options.pool_size {
            let sink: Weak<dyn IdleSink<A>> = Arc::downgrade(&inner);
            let holder = HolderInner::new(adapter.clone(), options.clone(), sink);
            holders.push(holder);
        }

        if options.sync_connect {
            for holder in &holders {
                match holder.initial_connect().await {
                    Ok(()) => {
                        inner.mark_idle(holder.id);
                    }
                    Err(e) => {
                        if options.backoff_kind == crate::backoff::BackoffKind::Stop {
                            return Err(e);
                        }
                        log::warn!("{}: initial connect failed, falling back to background retry: {e}", holder.id);
                    }
                }
            }
        }

        {
            let mut state = inner.state.lock().unwrap();
            for holder in &holders {
                state.holders.insert(holder.id, holder.clone());
            }
        }
        for holder in &holders {
            holder.spawn_supervisor();
        }

        if let Some(name) = &options.name {
            crate::registry::register(name, Pool { inner: inner.clone() });
        }

        Ok(Pool { inner })
    }

    /// Looks up a pool previously registered under `name` (spec §4.6, §9).
    pub fn named(name: &str) -> Option<Pool<A>>
    where
        A: 'static,
    {
        crate::registry::lookup(name)
    }

    /// Checks a connection out, bound to `principal`.
    pub async fn checkout(&self, principal: &Principal) -> Result<Client<A>, RunError<A::Error>> {
        self.inner.checkout(principal).await
    }

    /// Shuts down every holder's supervisor. Already checked-out clients are
    /// unaffected; new check-outs will simply never succeed once this is
    /// called. Also drops this pool's entry from the process-wide name
    /// registry, if it was registered (spec §9: "torn down on pool
    /// shutdown").
    pub fn shutdown(&self) {
        {
            let state = self.inner.state.lock().unwrap();
            for holder in state.holders.values() {
                holder.shutdown();
            }
        }
        if let Some(name) = &self.inner.options.name {
            crate::registry::unregister_if(name, self);
        }
    }

    /// Runs `f` against a freshly checked-out connection, checking it back
    /// in afterward regardless of outcome (spec §4.4's `run`, mirroring the
    /// teacher crate's `Pool::run`).
    pub async fn run<F, Fut, T>(&self, principal: &Principal, f: F) -> Result<T, RunError<A::Error>>
    where
        F: FnOnce(&mut Client<A>) -> Fut,
        Fut: std::future::Future<Output = Result<T, ConnectionError<A::Error>>>,
    {
        let mut client = self.checkout(principal).await?;
        let result = f(&mut client).await;
        client.checkin().await;
        result.map_err(RunError::User)
    }

    /// Runs `f` inside an adapter-level transaction against a freshly
    /// checked-out connection (spec §4.4's `transaction`, convenience
    /// wrapper over [`Client::transaction`]).
    pub async fn transaction<F, Fut, T>(&self, principal: &Principal, f: F) -> Result<T, RunError<A::Error>>
    where
        F: FnOnce(&mut Client<A>) -> Fut,
        Fut: std::future::Future<Output = crate::client::TxOutcome<T, ConnectionError<A::Error>>>,
    {
        let mut client = self.checkout(principal).await?;
        let result = client.transaction(principal, f).await;
        client.checkin().await;
        result
    }
}
