//! The connection holder: a long-lived actor owning one adapter state,
//! handling connect/disconnect/ping and reconnect backoff (spec §4.3,
//! component C3).
//!
//! Rather than a literal message-passing task (the teacher crate spawns
//! bare futures onto the executor for one-shot connects), a holder here is
//! a `tokio::sync::Mutex<HolderState<A>>` plus a single supervisor task.
//! Holding the mutex's `OwnedMutexGuard` *is* "seizing the connection" (spec
//! §4.1 `checkout`): only whoever holds it may call adapter callbacks, which
//! is exactly spec §5's "all adapter callbacks for one holder run
//! sequentially", enforced by the borrow checker instead of an explicit
//! queue.

use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Weak};

use tokio::sync::{Mutex, Notify, OwnedMutexGuard};

use crate::adapter::{Adapter, Outcome};
use crate::backoff::Backoff;
use crate::options::Options;

static NEXT_HOLDER_ID: AtomicU64 = AtomicU64::new(1);

/// Stable identity for one pooled connection slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HolderId(u64);

impl HolderId {
    fn next() -> Self {
        HolderId(NEXT_HOLDER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for HolderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#Holder<{}>", self.0)
    }
}

/// The holder's top-level state (spec §4.3: "disconnected and
/// connected(S)").
pub(crate) enum HolderState<A: Adapter> {
    Disconnected,
    Connected(A::State),
}

/// Narrow interface the holder's supervisor uses to tell the pool "I have a
/// connection ready" (or "I'm giving up for good"), without needing the
/// pool's full type.
pub(crate) trait IdleSink<A: Adapter>: Send + Sync {
    fn mark_idle(&self, id: HolderId);
    fn mark_dead(&self, id: HolderId);
}

pub(crate) struct HolderInner<A: Adapter> {
    pub id: HolderId,
    adapter: Arc<A>,
    options: Arc<Options<A>>,
    state: Arc<Mutex<HolderState<A>>>,
    backoff: StdMutex<Backoff>,
    /// Woken whenever something the supervisor should react to promptly
    /// happens: a checkin, a mid-operation disconnect, a shutdown request.
    pub(crate) wake: Notify,
    shutdown: AtomicBool,
    dead: AtomicBool,
    sink: Weak<dyn IdleSink<A>>,
}

impl<A: Adapter> HolderInner<A> {
    pub fn new(adapter: Arc<A>, options: Arc<Options<A>>, sink: Weak<dyn IdleSink<A>>) -> Arc<Self> {
        let backoff = Backoff::new(options.backoff_kind, options.backoff_min, options.backoff_max);
        Arc::new(HolderInner {
            id: HolderId::next(),
            adapter,
            options,
            state: Arc::new(Mutex::new(HolderState::Disconnected)),
            backoff: StdMutex::new(backoff),
            wake: Notify::new(),
            shutdown: AtomicBool::new(false),
            dead: AtomicBool::new(false),
            sink,
        })
    }

    /// True once this holder has permanently given up (backoff exhausted
    /// under `backoff_type = stop`); the pool should stop routing work to
    /// it.
    pub fn is_dead(&self) -> bool {
        self.dead.load(Ordering::Acquire)
    }

    /// Performs the very first connect attempt for this holder, used
    /// directly (and awaited) for `sync_connect`. Returns the adapter's
    /// error on failure without touching the backoff cursor — the caller
    /// decides (per spec §4.3) whether to abort startup or fall back to the
    /// async retry loop.
    pub async fn initial_connect(self: &Arc<Self>) -> Result<(), A::Error> {
        match self.adapter.connect(&self.options.adapter_options).await {
            Ok(state) => {
                let mut guard = self.state.lock().await;
                *guard = HolderState::Connected(state);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Seizes the connection for a check-out, taking its live state out of
    /// the mutex. Returns `None` if currently disconnected — the caller
    /// (the pool) should try a different idle holder.
    pub async fn seize(self: &Arc<Self>) -> Option<(OwnedMutexGuard<HolderState<A>>, A::State)> {
        let mut guard = self.state.clone().lock_owned().await;
        match mem::replace(&mut *guard, HolderState::Disconnected) {
            HolderState::Connected(state) => Some((guard, state)),
            HolderState::Disconnected => None,
        }
    }

    /// Writes a seized connection's state back as `Connected`, releasing
    /// the guard. Used by the checkout path (`checkout` callback succeeded)
    /// and by checkin.
    pub fn restore(&self, mut guard: OwnedMutexGuard<HolderState<A>>, state: A::State) {
        *guard = HolderState::Connected(state);
        drop(guard);
        self.wake.notify_one();
    }

    /// Consumes a seized connection after a fatal/disconnecting callback:
    /// runs `adapter.disconnect`, leaves the holder `Disconnected`, and
    /// wakes the supervisor so it starts retrying immediately rather than
    /// waiting out the rest of the idle interval.
    pub async fn teardown(
        self: &Arc<Self>,
        guard: OwnedMutexGuard<HolderState<A>>,
        err: Option<&A::Error>,
        state: A::State,
    ) {
        self.adapter.disconnect(err, state).await;
        drop(guard); // already `Disconnected` from `seize`'s replace
        self.wake.notify_one();
    }

    /// Spawns the background supervisor: connects when disconnected
    /// (honoring backoff), pings when idle past `idle_interval`.
    pub fn spawn_supervisor(self: &Arc<Self>) {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.supervise().await });
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.wake.notify_one();
    }

    async fn supervise(self: Arc<Self>) {
        // The very first pass, if nobody has connected yet (async startup
        // path), dials immediately rather than waiting out a backoff delay
        // (spec §4.3: "otherwise schedule connect and return immediately").
        if !self.currently_connected().await {
            self.reconnect_loop(true).await;
        }
        loop {
            if self.shutdown.load(Ordering::Acquire) || self.dead.load(Ordering::Acquire) {
                return;
            }
            tokio::select! {
                _ = self.wake.notified() => {}
                _ = tokio::time::sleep(self.options.idle_interval) => {}
            }
            if self.shutdown.load(Ordering::Acquire) {
                return;
            }
            let Ok(mut guard) = self.state.clone().try_lock_owned() else {
                // Checked out right now; reassess on the next wake/tick.
                continue;
            };
            match mem::replace(&mut *guard, HolderState::Disconnected) {
                HolderState::Connected(state) => match self.adapter.ping(state).await {
                    Outcome::Ok((), state) => {
                        *guard = HolderState::Connected(state);
                    }
                    Outcome::Error(e, state) => {
                        log::warn!("{}: ping returned an error, staying connected: {e}", self.id);
                        *guard = HolderState::Connected(state);
                    }
                    Outcome::Disconnect(e, state) => {
                        log::warn!("{}: ping forced a disconnect: {e}", self.id);
                        self.adapter.disconnect(Some(&e), state).await;
                        drop(guard);
                        self.reconnect_loop(false).await;
                    }
                },
                HolderState::Disconnected => {
                    drop(guard);
                    self.reconnect_loop(false).await;
                }
            }
        }
    }

    async fn currently_connected(&self) -> bool {
        matches!(&*self.state.lock().await, HolderState::Connected(_))
    }

    /// Drives the reconnect loop until a connection is established or the
    /// backoff curve gives up (`backoff_type = stop`). `immediate` skips the
    /// very first delay, matching the async-startup contract.
    async fn reconnect_loop(self: &Arc<Self>, immediate: bool) {
        let mut first = immediate;
        loop {
            if self.shutdown.load(Ordering::Acquire) {
                return;
            }
            if !first {
                let delay = {
                    let mut backoff = self.backoff.lock().unwrap();
                    backoff.next()
                };
                match delay {
                    Some(delay) => tokio::time::sleep(delay).await,
                    None => {
                        log::error!("{}: backoff exhausted, holder is giving up", self.id);
                        self.dead.store(true, Ordering::Release);
                        if let Some(sink) = self.sink.upgrade() {
                            sink.mark_dead(self.id);
                        }
                        return;
                    }
                }
            }
            first = false;
            match self.adapter.connect(&self.options.adapter_options).await {
                Ok(state) => {
                    let mut guard = self.state.clone().lock_owned().await;
                    *guard = HolderState::Connected(state);
                    drop(guard);
                    self.backoff.lock().unwrap().reset();
                    if let Some(sink) = self.sink.upgrade() {
                        sink.mark_idle(self.id);
                    }
                    return;
                }
                Err(e) => {
                    log::warn!("{}: connect failed, will retry: {e}", self.id);
                }
            }
        }
    }
}
