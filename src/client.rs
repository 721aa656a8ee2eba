//! The client-side transaction/streaming state machine layered over one
//! checked-out connection (spec §4.4, component C4).

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::OwnedMutexGuard;

use crate::adapter::{Adapter, CallOptions, DeclareOutcome, FetchOutcome, Outcome};
use crate::error::{hook_panic, ConnectionError, RunError};
use crate::holder::{HolderInner, HolderState, IdleSink};
use crate::log::{self, Call, LogEntry, LogResult};
use crate::options::{DecodeHook, Options};
use crate::pool::PoolInner;
use crate::principal::{Principal, PrincipalId};

static NEXT_CURSOR_ID: AtomicU64 = AtomicU64::new(1);

/// `{tx_status, cursor_set}` (spec §4.4, §3 "Connection holder record"/
/// "Client handle"). `Idle`/`Transaction`/`Failed` track exactly the three
/// states spec §4.4 names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TxStatus {
    Idle,
    Transaction,
    Failed,
}

/// Opaque handle to a server-side cursor returned by [`Client::declare`],
/// tracked in the client's `cursor_set` so a later `fetch`/`deallocate`
/// against a cursor that was never declared (or already deallocated) is
/// rejected rather than forwarded to the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CursorHandle(u64);

struct CursorEntry<A: Adapter> {
    query: A::Query,
    cursor: A::Cursor,
}

/// A fetch step's result: `cont` keeps the cursor alive, `halt` is final
/// (spec §4.1 `handle_fetch`, §4.7 item 2).
#[derive(Debug)]
pub enum FetchStep<T> {
    Cont(T),
    Halt(T),
}

impl<T> FetchStep<T> {
    pub fn into_inner(self) -> T {
        match self {
            FetchStep::Cont(t) | FetchStep::Halt(t) => t,
        }
    }

    pub fn is_halt(&self) -> bool {
        matches!(self, FetchStep::Halt(_))
    }
}

/// The three ways a [`Client::transaction`] body can conclude (spec §9
/// "Coroutine-style transaction scoping": `Ok`/`UserError`/`Rollback` as the
/// Rust translation of normal-return / raise / explicit-rollback).
pub enum TxOutcome<T, E> {
    /// The function completed normally; its connection work commits.
    Commit(T),
    /// The function called for an explicit rollback, carrying a value back
    /// to the caller (spec: "or calling `rollback`").
    Rollback(T),
    /// The function failed with an adapter/application error; rolls back.
    Err(E),
}

/// A connection checked out of a [`Pool`](crate::pool::Pool) (directly, or
/// via an [`OwnershipProxy`](crate::ownership::OwnershipProxy)), bound to
/// the [`Principal`] that checked it out.
///
/// Every operation method takes `&Principal` and rejects a mismatched
/// caller with [`ConnectionError::OwnershipMismatch`], modeling spec §5's
/// "a handle is bound to the principal that checked it out".
pub struct Client<A: Adapter> {
    pub(crate) holder: Arc<HolderInner<A>>,
    pub(crate) pool: Arc<PoolInner<A>>,
    adapter: Arc<A>,
    options: Arc<Options<A>>,
    owner: PrincipalId,
    guard: Option<OwnedMutexGuard<HolderState<A>>>,
    tx_status: TxStatus,
    tx_depth: u32,
    cursors: HashMap<CursorHandle, CursorEntry<A>>,
    pending_pool_time: Option<Duration>,
    closed: bool,
}

type CallFuture<'a, T, A> = Pin<Box<dyn Future<Output = Outcome<T, A>> + Send + 'a>>;

impl<A: Adapter> Client<A> {
    pub(crate) fn new(
        holder: Arc<HolderInner<A>>,
        pool: Arc<PoolInner<A>>,
        adapter: Arc<A>,
        options: Arc<Options<A>>,
        owner: PrincipalId,
        guard: OwnedMutexGuard<HolderState<A>>,
        pool_time: Duration,
    ) -> Self {
        Client {
            holder,
            pool,
            adapter,
            options,
            owner,
            guard: Some(guard),
            tx_status: TxStatus::Idle,
            tx_depth: 0,
            cursors: HashMap::new(),
            pending_pool_time: Some(pool_time),
            closed: false,
        }
    }

    fn check_principal(&self, principal: &Principal) -> Result<(), ConnectionError<A::Error>> {
        if principal.id() == self.owner {
            Ok(())
        } else {
            Err(ConnectionError::OwnershipMismatch)
        }
    }

    /// Consumes this client's pending `pool_time`, if any hasn't already
    /// been attributed to an earlier call (spec §8: "`pool_time` is nil iff
    /// the call did not perform a pool check-out").
    fn take_pool_time(&mut self) -> Option<Duration> {
        self.pending_pool_time.take()
    }

    /// Checks this client's connection back in to the pool, running the
    /// `checkin` adapter callback. Consumes `self`; if a transaction is
    /// still open (the caller never matched `transaction` with a return),
    /// it is best-effort rolled back first, exactly as happens when the
    /// principal dies mid-transaction (spec §4.3 "Client supervision").
    pub async fn checkin(mut self) {
        let Some(guard) = self.guard.take() else { return };
        let timeout = self.options.timeout;
        Self::finalize(guard, self.holder.clone(), self.pool.clone(), self.adapter.clone(), self.tx_status, timeout).await;
    }

    /// Runs this client's best-effort teardown: rolls back an open
    /// transaction (if any) and then checks the connection back in. Called
    /// both from an explicit [`Client::checkin`] and from `Drop` — in
    /// either case, `self.guard` being `Some` is the only precondition,
    /// since every path that invalidates the connection already takes the
    /// guard itself (see `teardown_now`).
    async fn finalize(
        guard: OwnedMutexGuard<HolderState<A>>,
        holder: Arc<HolderInner<A>>,
        pool: Arc<PoolInner<A>>,
        adapter: Arc<A>,
        tx_status: TxStatus,
        timeout: Duration,
    ) {
        let mut guard = guard;
        let state = match std::mem::replace(&mut *guard, HolderState::Disconnected) {
            HolderState::Connected(state) => state,
            HolderState::Disconnected => {
                drop(guard);
                holder.wake.notify_one();
                return;
            }
        };

        let state = if tx_status != TxStatus::Idle {
            let opts = CallOptions { timeout };
            match adapter.handle_rollback(&opts, state).await {
                Outcome::Ok(_, state) => state,
                Outcome::Error(e, state) => {
                    // A rollback that merely errors still leaves the
                    // connection in an unknown transactional state; force a
                    // reconnect rather than handing it back to the pool.
                    holder.teardown(guard, Some(&e), state).await;
                    return;
                }
                Outcome::Disconnect(e, state) => {
                    holder.teardown(guard, Some(&e), state).await;
                    return;
                }
            }
        } else {
            state
        };

        match adapter.checkin(state).await {
            Outcome::Ok((), state) => {
                holder.restore(guard, state);
                pool.mark_idle(holder.id);
            }
            Outcome::Error(e, state) => {
                ::log::error!("{}: checkin callback returned an error, keeping the connection: {e}", holder.id);
                holder.restore(guard, state);
                pool.mark_idle(holder.id);
            }
            Outcome::Disconnect(e, state) => {
                holder.teardown(guard, Some(&e), state).await;
            }
        }
    }

    /// Runs `f` with direct access to the underlying operations, inside an
    /// adapter-level transaction (`handle_begin`/`commit`/`rollback`).
    ///
    /// A `transaction` nested inside another `transaction` is a no-op that
    /// only reflects the inner function's [`TxOutcome`] up to the enclosing
    /// one (spec §4.4's documented savepoint-like behavior) — no real
    /// `handle_begin`/`handle_commit` pair is issued for the inner call.
    pub async fn transaction<F, Fut, T>(&mut self, principal: &Principal, f: F) -> Result<T, RunError<A::Error>>
    where
        F: FnOnce(&mut Client<A>) -> Fut,
        Fut: Future<Output = TxOutcome<T, ConnectionError<A::Error>>>,
    {
        self.check_principal(principal)?;

        if self.tx_depth > 0 {
            // Nested call: just run the body, no begin/commit of our own.
            self.tx_depth += 1;
            let outcome = f(self).await;
            self.tx_depth -= 1;
            return match outcome {
                TxOutcome::Commit(t) | TxOutcome::Rollback(t) => Ok(t),
                TxOutcome::Err(e) => Err(RunError::User(e)),
            };
        }

        if self.tx_status != TxStatus::Idle {
            return Err(RunError::User(ConnectionError::RollingBack));
        }

        let call_opts = CallOptions { timeout: self.options.timeout };
        let begin = self
            .call_adapter(
                Call::Begin,
                call_opts,
                None,
                None,
                |adapter, opts, state| adapter.handle_begin(opts, state),
                |result: &A::Result| LogResult::Value(result.clone()),
            )
            .await;
        if let Err(e) = begin {
            return Err(RunError::User(e));
        }
        self.tx_status = TxStatus::Transaction;
        self.tx_depth = 1;

        let outcome = f(self).await;
        self.tx_depth = 0;
        self.close_dangling_cursors(principal).await;

        let commit_requested = matches!(outcome, TxOutcome::Commit(_)) && self.tx_status == TxStatus::Transaction;

        if commit_requested {
            let result = self
                .call_adapter(
                    Call::Commit,
                    call_opts,
                    None,
                    None,
                    |adapter, opts, state| adapter.handle_commit(opts, state),
                    |result: &A::Result| LogResult::Value(result.clone()),
                )
                .await;
            self.tx_status = TxStatus::Idle;
            return match (result, outcome) {
                (Ok(_), TxOutcome::Commit(t)) => Ok(t),
                (Err(e), _) => Err(RunError::User(e)),
                _ => unreachable!(),
            };
        }

        let rollback_result = self
            .call_adapter(
                Call::Rollback,
                call_opts,
                None,
                None,
                |adapter, opts, state| adapter.handle_rollback(opts, state),
                |result: &A::Result| LogResult::Value(result.clone()),
            )
            .await;
        self.tx_status = TxStatus::Idle;
        if let Err(e) = rollback_result {
            return Err(RunError::User(e));
        }
        match outcome {
            TxOutcome::Err(e) => Err(RunError::User(e)),
            TxOutcome::Commit(_) | TxOutcome::Rollback(_) => Err(RunError::Rollback),
        }
    }

    /// Explicit rollback from inside a `transaction` body: downgrades the
    /// in-progress transaction so the enclosing `transaction` call issues
    /// `handle_rollback` and reports [`RunError::Rollback`] regardless of
    /// what the body returns.
    pub fn rollback(&mut self) {
        if self.tx_status == TxStatus::Transaction {
            self.tx_status = TxStatus::Failed;
        }
    }

    pub async fn query(
        &mut self,
        principal: &Principal,
        query: A::Query,
        params: A::Params,
    ) -> Result<A::Result, ConnectionError<A::Error>> {
        self.check_principal(principal)?;
        if self.tx_status == TxStatus::Failed {
            return Err(ConnectionError::RollingBack);
        }
        let opts = CallOptions { timeout: self.options.timeout };
        let log_query = query.clone();
        let log_params = params.clone();
        self.call_adapter(
            Call::Query,
            opts,
            Some(log_query),
            Some(log_params),
            move |adapter, opts, state| adapter.handle_query(query, params, opts, state),
            |result: &A::Result| LogResult::Value(result.clone()),
        )
        .await
        .map_err(|e| self.fail_if_in_tx(e))
    }

    pub async fn prepare(&mut self, principal: &Principal, query: A::Query) -> Result<A::Query, ConnectionError<A::Error>> {
        self.check_principal(principal)?;
        if self.tx_status == TxStatus::Failed {
            return Err(ConnectionError::RollingBack);
        }
        let opts = CallOptions { timeout: self.options.timeout };
        let log_query = query.clone();
        self.call_adapter(
            Call::Prepare,
            opts,
            Some(log_query),
            None,
            move |adapter, opts, state| adapter.handle_prepare(query, opts, state),
            |_: &A::Query| LogResult::Unit,
        )
        .await
    }

    pub async fn execute(
        &mut self,
        principal: &Principal,
        query: A::Query,
        params: A::Params,
    ) -> Result<A::Result, ConnectionError<A::Error>> {
        self.check_principal(principal)?;
        if self.tx_status == TxStatus::Failed {
            return Err(ConnectionError::RollingBack);
        }
        let opts = CallOptions { timeout: self.options.timeout };
        let log_query = query.clone();
        let log_params = params.clone();
        self.call_adapter(
            Call::Execute,
            opts,
            Some(log_query),
            Some(log_params),
            move |adapter, opts, state| adapter.handle_execute(query, params, opts, state),
            |result: &A::Result| LogResult::Value(result.clone()),
        )
        .await
    }

    pub async fn close(&mut self, principal: &Principal, query: A::Query) -> Result<(), ConnectionError<A::Error>> {
        self.check_principal(principal)?;
        if self.tx_status == TxStatus::Failed {
            return Err(ConnectionError::RollingBack);
        }
        let opts = CallOptions { timeout: self.options.timeout };
        let log_query = query.clone();
        self.call_adapter(
            Call::Close,
            opts,
            Some(log_query),
            None,
            move |adapter, opts, state| adapter.handle_close(query, opts, state),
            |_: &()| LogResult::Unit,
        )
        .await
    }

    /// Delivers an out-of-band message to the adapter (spec §4.1
    /// `handle_info`). Unlike the other callbacks, `handle_info` cannot
    /// fail or disconnect — it only ever transforms `state`.
    pub async fn info(&mut self, principal: &Principal, info: A::Info) -> Result<(), ConnectionError<A::Error>> {
        self.check_principal(principal)?;
        if self.closed {
            return Err(ConnectionError::Closed);
        }
        let pool_time = self.take_pool_time();
        let state = match self.take_connected_state() {
            Some(state) => state,
            None => return Err(ConnectionError::Closed),
        };
        let started = Instant::now();
        let state = self.adapter.handle_info(info, state).await;
        let connection_time = started.elapsed();
        self.put_back_connected(state);
        self.log(Call::Info, None, None, LogResult::Unit, pool_time, Some(connection_time), None);
        Ok(())
    }

    /// Marks an in-progress transaction `failed` after an adapter-level
    /// error, matching spec §4.4 ("On any adapter-returned error inside
    /// `transaction`, `tx_status -> failed`").
    fn fail_if_in_tx(&mut self, e: ConnectionError<A::Error>) -> ConnectionError<A::Error> {
        if self.tx_status == TxStatus::Transaction {
            self.tx_status = TxStatus::Failed;
        }
        e
    }

    /// Deallocates every cursor a [`crate::stream::Stream`] left open when
    /// its transaction's body returned without driving it to completion
    /// (spec §4.7: "close always runs, even on partial consumption").
    async fn close_dangling_cursors(&mut self, principal: &Principal) {
        let handles: Vec<CursorHandle> = self.cursors.keys().copied().collect();
        for handle in handles {
            let _ = self.deallocate(principal, handle).await;
        }
    }

    /// Opens a server-side cursor. Only legal while inside a `transaction`
    /// (spec §4.4, §4.7 item "A stream may be opened only inside a
    /// transaction").
    pub(crate) async fn declare(
        &mut self,
        principal: &Principal,
        query: A::Query,
        params: A::Params,
    ) -> Result<(CursorHandle, A::Query), ConnectionError<A::Error>> {
        self.check_principal(principal)?;
        if self.tx_status != TxStatus::Transaction {
            return Err(ConnectionError::RollingBack);
        }
        if self.closed {
            return Err(ConnectionError::Closed);
        }
        let pool_time = self.take_pool_time();
        let timeout = self.options.timeout;
        let state = match self.take_connected_state() {
            Some(state) => state,
            None => return Err(ConnectionError::Closed),
        };
        let opts = CallOptions { timeout };
        let log_params = params.clone();
        let started = Instant::now();
        let outcome = self.adapter.handle_declare(query.clone(), params, &opts, state).await;
        let connection_time = started.elapsed();

        match outcome {
            DeclareOutcome::Ok(cursor, state) => {
                self.put_back_connected(state);
                let handle = CursorHandle(NEXT_CURSOR_ID.fetch_add(1, Ordering::Relaxed));
                self.log(
                    Call::Declare,
                    Some(query.clone()),
                    Some(log_params),
                    LogResult::Cursor(cursor.clone()),
                    pool_time,
                    Some(connection_time),
                    None,
                );
                self.cursors.insert(handle, CursorEntry { query: query.clone(), cursor });
                Ok((handle, query))
            }
            DeclareOutcome::OkQuery(new_query, cursor, state) => {
                self.put_back_connected(state);
                let handle = CursorHandle(NEXT_CURSOR_ID.fetch_add(1, Ordering::Relaxed));
                self.log(
                    Call::Declare,
                    Some(new_query.clone()),
                    Some(log_params),
                    LogResult::Cursor(cursor.clone()),
                    pool_time,
                    Some(connection_time),
                    None,
                );
                self.cursors.insert(handle, CursorEntry { query: new_query.clone(), cursor });
                Ok((handle, new_query))
            }
            DeclareOutcome::Error(e, state) => {
                self.put_back_connected(state);
                self.fail_if_in_tx(ConnectionError::RollingBack);
                self.log(Call::Declare, Some(query), Some(log_params), LogResult::Err(e.to_string()), pool_time, Some(connection_time), None);
                Err(ConnectionError::Adapter(e))
            }
            DeclareOutcome::Disconnect(e, state) => {
                let msg = e.to_string();
                self.teardown_now(Some(&e), state).await;
                self.log(Call::Declare, Some(query), Some(log_params), LogResult::Err(msg), pool_time, Some(connection_time), None);
                Err(ConnectionError::Adapter(e))
            }
        }
    }

    /// Fetches the next batch from a declared cursor, running `decode` (if
    /// any) on the raw result before logging and returning it — so the
    /// logged entry's `decode_time` (spec §4.8) actually reflects the hook's
    /// cost instead of always being `None`. Requires `cursor` to still be
    /// tracked in this client's `cursor_set`.
    pub(crate) async fn fetch(
        &mut self,
        principal: &Principal,
        cursor_handle: CursorHandle,
        decode: Option<&DecodeHook<A>>,
    ) -> Result<FetchStep<A::Result>, ConnectionError<A::Error>> {
        self.check_principal(principal)?;
        let Some(entry) = self.cursors.get(&cursor_handle) else {
            return Err(ConnectionError::OwnershipMismatch);
        };
        let query = entry.query.clone();
        let cursor = entry.cursor.clone();
        if self.closed {
            return Err(ConnectionError::Closed);
        }
        let pool_time = self.take_pool_time();
        let timeout = self.options.timeout;
        let state = match self.take_connected_state() {
            Some(state) => state,
            None => return Err(ConnectionError::Closed),
        };
        let opts = CallOptions { timeout };
        let started = Instant::now();
        let outcome = self.adapter.handle_fetch(query.clone(), cursor, &opts, state).await;
        let connection_time = started.elapsed();

        let (raw, halt) = match outcome {
            FetchOutcome::Cont(result, state) => {
                self.put_back_connected(state);
                (result, false)
            }
            FetchOutcome::Halt(result, state) => {
                self.put_back_connected(state);
                (result, true)
            }
            FetchOutcome::Error(e, state) => {
                self.put_back_connected(state);
                self.fail_if_in_tx(ConnectionError::RollingBack);
                self.log(Call::Fetch, Some(query), None, LogResult::Err(e.to_string()), pool_time, Some(connection_time), None);
                return Err(ConnectionError::Adapter(e));
            }
            FetchOutcome::Disconnect(e, state) => {
                let msg = e.to_string();
                self.teardown_now(Some(&e), state).await;
                self.log(Call::Fetch, Some(query), None, LogResult::Err(msg), pool_time, Some(connection_time), None);
                return Err(ConnectionError::Adapter(e));
            }
        };

        match decode_one::<A>(decode, &query, raw) {
            Ok((decoded, decode_time)) => {
                self.log(
                    Call::Fetch,
                    Some(query),
                    None,
                    LogResult::Value(decoded.clone()),
                    pool_time,
                    Some(connection_time),
                    decode_time,
                );
                Ok(if halt { FetchStep::Halt(decoded) } else { FetchStep::Cont(decoded) })
            }
            Err(e) => {
                self.log(Call::Fetch, Some(query), None, LogResult::Err(e.to_string()), pool_time, Some(connection_time), None);
                Err(e)
            }
        }
    }

    /// Removes `cursor` from the tracked set and issues `handle_deallocate`,
    /// unless the connection already disconnected underneath the stream —
    /// in that case deallocate never reaches the adapter and is reported as
    /// `connection is closed` with no `connection_time` (spec §4.7 item 3,
    /// scenario 3 in spec §8).
    pub(crate) async fn deallocate(
        &mut self,
        principal: &Principal,
        cursor_handle: CursorHandle,
    ) -> Result<A::Result, ConnectionError<A::Error>> {
        self.check_principal(principal)?;
        let entry = self.cursors.remove(&cursor_handle);
        let pool_time = self.take_pool_time();
        if self.closed {
            self.log(
                Call::Deallocate,
                entry.map(|e| e.query),
                None,
                LogResult::Err("connection is closed".to_string()),
                pool_time,
                None,
                None,
            );
            return Err(ConnectionError::Closed);
        }
        let Some(CursorEntry { query, cursor }) = entry else {
            return Err(ConnectionError::Closed);
        };
        let timeout = self.options.timeout;
        let state = match self.take_connected_state() {
            Some(state) => state,
            None => {
                self.log(
                    Call::Deallocate,
                    Some(query),
                    None,
                    LogResult::Err("connection is closed".to_string()),
                    pool_time,
                    None,
                    None,
                );
                return Err(ConnectionError::Closed);
            }
        };
        let opts = CallOptions { timeout };
        let started = Instant::now();
        let outcome = self.adapter.handle_deallocate(query.clone(), cursor, &opts, state).await;
        let connection_time = started.elapsed();

        match outcome {
            Outcome::Ok(result, state) => {
                self.put_back_connected(state);
                self.log(Call::Deallocate, Some(query), None, LogResult::Value(result.clone()), pool_time, Some(connection_time), None);
                Ok(result)
            }
            Outcome::Error(e, state) => {
                self.put_back_connected(state);
                self.log(Call::Deallocate, Some(query), None, LogResult::Err(e.to_string()), pool_time, Some(connection_time), None);
                Err(ConnectionError::Adapter(e))
            }
            Outcome::Disconnect(e, state) => {
                let msg = e.to_string();
                self.teardown_now(Some(&e), state).await;
                self.log(Call::Deallocate, Some(query), None, LogResult::Err(msg), pool_time, Some(connection_time), None);
                Err(ConnectionError::Adapter(e))
            }
        }
    }

    fn take_connected_state(&mut self) -> Option<A::State> {
        let guard = self.guard.as_mut()?;
        match std::mem::replace(&mut **guard, HolderState::Disconnected) {
            HolderState::Connected(state) => Some(state),
            HolderState::Disconnected => {
                self.closed = true;
                None
            }
        }
    }

    fn put_back_connected(&mut self, state: A::State) {
        if let Some(guard) = self.guard.as_mut() {
            **guard = HolderState::Connected(state);
        }
    }

    async fn teardown_now(&mut self, err: Option<&A::Error>, state: A::State) {
        self.closed = true;
        if let Some(guard) = self.guard.take() {
            self.holder.teardown(guard, err, state).await;
        }
    }

    async fn call_adapter<T>(
        &mut self,
        call: Call,
        opts: CallOptions,
        query: Option<A::Query>,
        params: Option<A::Params>,
        invoke: impl for<'a> FnOnce(&'a A, &'a CallOptions, A::State) -> CallFuture<'a, T, A>,
        ok_result: impl FnOnce(&T) -> LogResult<A>,
    ) -> Result<T, ConnectionError<A::Error>>
    where
        T: Send,
    {
        if self.closed {
            return Err(ConnectionError::Closed);
        }
        let pool_time = self.take_pool_time();
        let state = match self.take_connected_state() {
            Some(state) => state,
            None => return Err(ConnectionError::Closed),
        };

        let started = Instant::now();
        let timed = tokio::time::timeout(opts.timeout, invoke(self.adapter.as_ref(), &opts, state)).await;

        let Ok(outcome) = timed else {
            // No safe cancellation primitive: the in-flight future owned
            // `state` and is now gone with it. Treat this like a
            // holder-initiated disconnect (spec §5 "Cancellation").
            self.closed = true;
            if let Some(guard) = self.guard.take() {
                drop(guard);
                self.holder.wake.notify_one();
            }
            return Err(ConnectionError::Timeout);
        };
        let connection_time = started.elapsed();

        match outcome {
            Outcome::Ok(value, state) => {
                self.put_back_connected(state);
                let log_result = ok_result(&value);
                self.log(call, query, params, log_result, pool_time, Some(connection_time), None);
                Ok(value)
            }
            Outcome::Error(e, state) => {
                self.put_back_connected(state);
                let msg = e.to_string();
                self.log(call, query, params, LogResult::Err(msg), pool_time, Some(connection_time), None);
                Err(ConnectionError::Adapter(e))
            }
            Outcome::Disconnect(e, state) => {
                let msg = e.to_string();
                self.teardown_now(Some(&e), state).await;
                self.log(call, query, params, LogResult::Err(msg), pool_time, Some(connection_time), None);
                Err(ConnectionError::Adapter(e))
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn log(
        &self,
        call: Call,
        query: Option<A::Query>,
        params: Option<A::Params>,
        result: LogResult<A>,
        pool_time: Option<Duration>,
        connection_time: Option<Duration>,
        decode_time: Option<Duration>,
    ) {
        let entry = LogEntry {
            call,
            query,
            params,
            result,
            pool_time,
            connection_time,
            decode_time,
        };
        log::emit(self.options.log.as_ref(), &entry);
    }
}

/// Runs `decode`, if present, against a raw fetch result, measuring its
/// cost. Panics inside the hook are caught and surfaced the same way a
/// panicking encode hook is (spec §4.8: "Hook exceptions are caught").
fn decode_one<A: Adapter>(
    decode: Option<&DecodeHook<A>>,
    query: &A::Query,
    result: A::Result,
) -> Result<(A::Result, Option<Duration>), ConnectionError<A::Error>> {
    let Some(hook) = decode else { return Ok((result, None)) };
    let hook = hook.clone();
    let query = query.clone();
    let result = AssertUnwindSafe(result);
    let started = Instant::now();
    let decoded = std::panic::catch_unwind(AssertUnwindSafe(move || hook(result.0, &query))).map_err(|p| hook_panic("decode hook", p))?;
    Ok((decoded, Some(started.elapsed())))
}

impl<A: Adapter> Drop for Client<A> {
    fn drop(&mut self) {
        let Some(guard) = self.guard.take() else { return };
        let holder = self.holder.clone();
        let pool = self.pool.clone();
        let adapter = self.adapter.clone();
        let tx_status = self.tx_status;
        let timeout = self.options.timeout;
        tokio::spawn(async move {
            Client::<A>::finalize(guard, holder, pool, adapter, tx_status, timeout).await;
        });
    }
}
