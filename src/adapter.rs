//! The driver contract (spec §4.1, component C1).
//!
//! An [`Adapter`] is a pure capability set a driver implements; this crate
//! never talks to a real database itself. This generalizes the teacher
//! crate's `ManageConnection` (which only covers `connect`/`is_valid`/
//! `has_broken`) to the full callback surface the client state machine,
//! pool, and stream driver need.

use std::time::Duration;

use async_trait::async_trait;

/// Per-call options threaded into every adapter callback: currently just the
/// operation deadline (spec §6 `timeout`, default 15000 ms), kept as its own
/// type so additional per-call knobs can grow without changing every
/// callback's signature.
#[derive(Debug, Clone, Copy)]
pub struct CallOptions {
    pub timeout: Duration,
}

impl Default for CallOptions {
    fn default() -> Self {
        CallOptions {
            timeout: Duration::from_millis(15_000),
        }
    }
}

/// The three-way result shape shared by most callbacks: `ok result S'`,
/// `error E S'`, or `disconnect E S'` (spec §4.1).
pub enum Outcome<T, A: Adapter + ?Sized> {
    /// The callback succeeded; `T` is the operation's result and the
    /// adapter's state is threaded forward.
    Ok(T, A::State),
    /// The callback failed without disturbing the connection; the state is
    /// still usable.
    Error(A::Error, A::State),
    /// The callback failed in a way that invalidates the connection; the
    /// holder must call `disconnect` and reconnect.
    Disconnect(A::Error, A::State),
}

/// The four-way result of `handle_declare` (spec §4.1): like [`Outcome`] but
/// with an extra "ok, but the query was rewritten" variant used when the
/// adapter substitutes a prepared/server-side query.
pub enum DeclareOutcome<A: Adapter + ?Sized> {
    Ok(A::Cursor, A::State),
    OkQuery(A::Query, A::Cursor, A::State),
    Error(A::Error, A::State),
    Disconnect(A::Error, A::State),
}

/// The result of `handle_fetch` (spec §4.1): `cont` keeps the cursor alive
/// for another fetch, `halt` is the final batch.
pub enum FetchOutcome<A: Adapter + ?Sized> {
    Cont(A::Result, A::State),
    Halt(A::Result, A::State),
    Error(A::Error, A::State),
    Disconnect(A::Error, A::State),
}

/// A driver-specific implementation of the database protocol this crate
/// pools and sequences calls against.
///
/// All methods but `connect`/`disconnect` have spec-mandated defaults
/// (spec §4.1 "Defaults") so an adapter only needs to override the
/// operations it actually supports; an un-overridden method that has no
/// sensible default (e.g. `handle_query`) simply isn't callable through a
/// default — callers invoking it against an adapter that hasn't implemented
/// it will get whatever the adapter's own default does, which for the
/// "not implemented" cases below is to fail loudly rather than silently
/// succeed.
#[async_trait]
pub trait Adapter: Send + Sync + 'static {
    /// Opaque per-connection state threaded through every callback.
    type State: Send + 'static;
    /// The adapter's own error type.
    type Error: std::error::Error + Send + Sync + 'static;
    /// A query value (string, prepared statement handle, AST — whatever the
    /// driver wants).
    type Query: Send + Sync + Clone + 'static;
    /// Bound parameters for a query. `Clone` so the actual value passed can
    /// still be attached to the structured `log` hook's entry (spec §4.8)
    /// after being moved into the adapter call.
    type Params: Send + Clone + 'static;
    /// The result of executing a query/fetch/deallocate. `Clone` so the
    /// same value can be both returned to the caller and attached to the
    /// structured `log` hook's entry (spec §4.8).
    type Result: Send + Clone + 'static;
    /// An opaque server-side cursor handle returned by `declare`. `Clone`
    /// because `handle_fetch` takes it by value but doesn't hand back an
    /// updated one — the same handle is reused across every fetch against
    /// one cursor (spec §4.1 `handle_fetch`).
    type Cursor: Send + Clone + 'static;
    /// Out-of-band messages delivered via `handle_info`.
    type Info: Send + 'static;
    /// Options passed to `connect`.
    type Options: Send + Sync + Clone + 'static;

    /// Establishes a new connection. May perform blocking I/O; only ever
    /// called from the connection holder's actor.
    async fn connect(&self, opts: &Self::Options) -> Result<Self::State, Self::Error>;

    /// Idempotent teardown, always paired with a prior `connect`. `err` is
    /// `Some` when teardown was triggered by a callback's `disconnect`
    /// result, `None` on a clean shutdown (e.g. pool drop).
    async fn disconnect(&self, err: Option<&Self::Error>, state: Self::State);

    /// Invoked when a client seizes the connection.
    async fn checkout(&self, state: Self::State) -> Outcome<(), Self>;

    /// Invoked when the client releases the connection.
    async fn checkin(&self, state: Self::State) -> Outcome<(), Self>;

    /// Periodic liveness probe. Default: succeeds without touching `state`.
    async fn ping(&self, state: Self::State) -> Outcome<(), Self> {
        Outcome::Ok((), state)
    }

    async fn handle_begin(&self, opts: &CallOptions, state: Self::State) -> Outcome<Self::Result, Self>;
    async fn handle_commit(&self, opts: &CallOptions, state: Self::State) -> Outcome<Self::Result, Self>;
    async fn handle_rollback(&self, opts: &CallOptions, state: Self::State) -> Outcome<Self::Result, Self>;

    /// Default: returns the query unmodified (no server-side preparation).
    async fn handle_prepare(
        &self,
        query: Self::Query,
        _opts: &CallOptions,
        state: Self::State,
    ) -> Outcome<Self::Query, Self> {
        Outcome::Ok(query, state)
    }

    /// Default: forwards to [`Adapter::handle_query`] with no params applied
    /// beyond what the caller already bound.
    async fn handle_execute(
        &self,
        query: Self::Query,
        params: Self::Params,
        opts: &CallOptions,
        state: Self::State,
    ) -> Outcome<Self::Result, Self> {
        self.handle_query(query, params, opts, state).await
    }

    /// Default: succeeds without touching `state`.
    async fn handle_close(
        &self,
        _query: Self::Query,
        _opts: &CallOptions,
        state: Self::State,
    ) -> Outcome<(), Self> {
        Outcome::Ok((), state)
    }

    async fn handle_query(
        &self,
        query: Self::Query,
        params: Self::Params,
        opts: &CallOptions,
        state: Self::State,
    ) -> Outcome<Self::Result, Self>;

    async fn handle_declare(
        &self,
        query: Self::Query,
        params: Self::Params,
        opts: &CallOptions,
        state: Self::State,
    ) -> DeclareOutcome<Self>;

    async fn handle_fetch(
        &self,
        query: Self::Query,
        cursor: Self::Cursor,
        opts: &CallOptions,
        state: Self::State,
    ) -> FetchOutcome<Self>;

    async fn handle_deallocate(
        &self,
        query: Self::Query,
        cursor: Self::Cursor,
        opts: &CallOptions,
        state: Self::State,
    ) -> Outcome<Self::Result, Self>;

    /// Handles an out-of-band message from the environment. Default: passes
    /// the state through unchanged.
    async fn handle_info(&self, _info: Self::Info, state: Self::State) -> Self::State {
        state
    }
}
