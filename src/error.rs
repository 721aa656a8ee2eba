//! Error types surfaced across the pool, the client state machine, and the
//! ownership proxy.

use std::fmt;

/// Every error an application can observe from a checked-out [`Client`](crate::client::Client)
/// or a bare adapter callback.
///
/// Generic over `E`, the driver adapter's own error type (`Adapter::Error`),
/// mirroring the way the teacher crate's `RunError<E>` is generic over the
/// manager's error.
#[derive(thiserror::Error, Debug)]
pub enum ConnectionError<E> {
    /// An error returned by the adapter for an operation that left the
    /// connection alive (spec §7, class 1: "Adapter errors").
    #[error(transparent)]
    Adapter(E),

    /// The connection was torn down and is being reconnected. Surfaced to the
    /// in-flight operation when a callback returns `disconnect(err, S')`
    /// (spec §7, class 2).
    #[error("connection is closed")]
    Closed,

    /// A query/prepare/execute/close call was attempted while the enclosing
    /// transaction is in the `failed` state (spec §4.4).
    #[error("transaction rolling back")]
    RollingBack,

    /// The pool's `queue_timeout` (or a per-operation `timeout`) elapsed
    /// before a connection/response was available.
    #[error("timed out in pool")]
    Timeout,

    /// An adapter callback returned a value outside its declared shape, or
    /// panicked. The holder that produced this terminates (spec §7, class 3).
    #[error("bad return value: {0}")]
    BadReturn(String),

    /// A client principal died (was dropped) mid check-out, and, if it was
    /// holding a transaction, best-effort rollback itself failed or could
    /// not run because the connection already disconnected.
    #[error("client {principal} stopped: ** ({kind}) {message}")]
    ClientStopped {
        /// Opaque identifier of the principal that stopped.
        principal: String,
        /// A short error-kind tag, e.g. `RuntimeError`.
        kind: String,
        /// Human-readable detail.
        message: String,
    },

    /// A handle was used from a principal other than the one that checked
    /// it out of a bare [`Pool`](crate::pool::Pool) (spec §5).
    #[error("ownership mismatch")]
    OwnershipMismatch,

    /// An operation was attempted through an [`OwnershipProxy`](crate::ownership::OwnershipProxy)
    /// by a principal with no reservation (owner or allowed) on file
    /// (spec §4.6).
    #[error("cannot find ownership process")]
    OwnershipNotFound,

    /// `ownership_checkin` was called by a principal that is only in the
    /// `allowed` set, not the owner (spec §4.6).
    #[error("not owner")]
    NotOwner,
}

impl<E> ConnectionError<E> {
    /// Construct the "bad return value" protocol error from a `Debug`-able
    /// offending value, matching the `ConnectionError("bad return value: <v>")`
    /// wording in spec §4.3.
    pub fn bad_return(value: impl fmt::Debug) -> Self {
        ConnectionError::BadReturn(format!("{:?}", value))
    }

    /// True for the two error kinds that indicate the connection itself is
    /// no longer usable (as opposed to a recoverable adapter-level error).
    pub fn is_connection_closed(&self) -> bool {
        matches!(self, ConnectionError::Closed | ConnectionError::ClientStopped { .. })
    }
}

/// Renders a caught encode/decode hook panic as a [`ConnectionError::BadReturn`],
/// shared between the client's fetch path and the stream's encode path so
/// both report panics identically.
pub(crate) fn hook_panic<E>(what: &str, panic: Box<dyn std::any::Any + Send>) -> ConnectionError<E> {
    let msg = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string());
    ConnectionError::BadReturn(format!("{what} panicked: {msg}"))
}

/// The outermost error type returned by [`Pool::run`](crate::pool::Pool) and
/// [`Client::transaction`](crate::client::Client::transaction) style
/// entry points. Named after, and shaped like, the teacher crate's
/// `RunError<E>` (`User`/`TimedOut`), extended with the `Rollback` variant
/// spec §6 requires (`{:error, :rollback}`).
#[derive(thiserror::Error, Debug)]
pub enum RunError<E> {
    /// An error surfaced from the adapter or the state machine itself.
    #[error(transparent)]
    User(#[from] ConnectionError<E>),

    /// The pool's `queue_timeout` elapsed waiting for a free connection.
    #[error("timed out waiting for a connection")]
    TimedOut,

    /// The transaction function raised, returned an error, or called
    /// `rollback` explicitly; `handle_rollback` ran and the transaction's
    /// overall result is reported as a rollback rather than unwound further.
    #[error("transaction rolled back")]
    Rollback,
}
