//! A generic, driver-agnostic database connection runtime.
//!
//! This crate is deliberately ignorant of any concrete wire protocol: it
//! pools connections, retries them with backoff, sequences client-side
//! transactions and server-side cursors over an adapter's callbacks, and
//! lets test suites reserve a pooled connection under one principal and
//! share it with others. A driver plugs in by implementing [`Adapter`];
//! everything else (SQL dialects, connection strings, wire codecs) is out
//! of scope.
//!
//! ```text
//! Pool<A>          — fixed set of holders, reconnect + backoff (pool)
//! Client<A>        — one checked-out connection's tx/cursor state (client)
//! OwnershipProxy<A> — shared, name-addressable reservation (ownership)
//! Stream<'a, A>    — declare/fetch/deallocate, one batch at a time (stream)
//! ```

pub mod adapter;
pub mod backoff;
mod client;
mod error;
mod holder;
mod log;
pub mod options;
pub mod ownership;
pub mod pool;
pub mod principal;
mod registry;
pub mod stream;

pub use adapter::{Adapter, CallOptions, DeclareOutcome, FetchOutcome, Outcome};
pub use backoff::{Backoff, BackoffKind};
pub use client::{Client, CursorHandle, FetchStep, TxOutcome};
pub use error::{ConnectionError, RunError};
pub use log::{Call, LogEntry, LogHook, LogResult};
pub use options::{Builder, DecodeHook, EncodeHook, Options, OwnershipMode};
pub use ownership::OwnershipProxy;
pub use pool::Pool;
pub use principal::{Death, Principal, PrincipalId};
pub use stream::Stream;
