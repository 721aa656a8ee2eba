//! Structured timing events emitted to the optional user hook (spec §4.8,
//! component C8).

use std::sync::Arc;
use std::time::Duration;

use crate::adapter::Adapter;

/// Which operation a [`LogEntry`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Call {
    Query,
    Prepare,
    Execute,
    Close,
    Begin,
    Commit,
    Rollback,
    Declare,
    Fetch,
    Deallocate,
    Info,
}

/// The observed outcome of the call a [`LogEntry`] reports on, type-erased
/// just enough to let one `LogEntry` type cover every callback shape in
/// [`Adapter`] (query/execute results, declare's cursor, the unit-ish
/// begin/commit/rollback/close acks, and errors).
///
/// Errors carry their `Display` rendering rather than the adapter's
/// `Error` value itself: the call site generally needs to move that value
/// into the `Result` it returns to the caller, and `Adapter::Error` is not
/// required to be `Clone`.
pub enum LogResult<A: Adapter + ?Sized> {
    Value(A::Result),
    Cursor(A::Cursor),
    Unit,
    Err(String),
}

/// One structured timing record, handed to the user-supplied `log` hook
/// once per adapter call (spec §4.8, §3 "Log entry").
pub struct LogEntry<A: Adapter + ?Sized> {
    pub call: Call,
    pub query: Option<A::Query>,
    pub params: Option<A::Params>,
    pub result: LogResult<A>,
    /// Time spent waiting in the pool queue for this call's connection.
    /// `None` when the call reused an already-held connection.
    pub pool_time: Option<Duration>,
    /// Time spent inside the adapter callback. `None` when the callback
    /// never actually ran (e.g. deallocate logged after a disconnect).
    pub connection_time: Option<Duration>,
    /// Time spent in the user decode hook. `None` when no decode ran, or
    /// the result was an error.
    pub decode_time: Option<Duration>,
}

/// User-supplied logging callback, invoked once per adapter call.
///
/// Hook panics are caught at the call site (see [`crate::client`]) and
/// routed to the `log` crate facade rather than unwinding into the state
/// machine, per spec §4.8 ("Hook exceptions are caught, logged to the
/// standard log sink, and do not interrupt the operation").
pub type LogHook<A> = Arc<dyn Fn(&LogEntry<A>) + Send + Sync>;

/// Invokes `hook`, if present, catching and logging any panic so a faulty
/// user callback can never abort an in-flight operation.
pub(crate) fn emit<A: Adapter + ?Sized>(hook: Option<&LogHook<A>>, entry: &LogEntry<A>) {
    let Some(hook) = hook else { return };
    let entry_ref = std::panic::AssertUnwindSafe(entry);
    let hook_ref = std::panic::AssertUnwindSafe(hook);
    if let Err(panic) = std::panic::catch_unwind(move || (hook_ref.0)(entry_ref.0)) {
        let msg = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        log::error!("log hook panicked: {msg}");
    }
}
