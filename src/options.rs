//! Pool/runtime configuration (spec §6).

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use crate::adapter::Adapter;
use crate::backoff::BackoffKind;
use crate::log::LogHook;

/// Whether an [`OwnershipProxy`](crate::ownership::OwnershipProxy) requires
/// an explicit `ownership_checkout` before use, or synthesizes one on first
/// touch (spec §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnershipMode {
    /// `ownership_checkout` must be called before any operation.
    Manual,
    /// The first operation by a principal transparently checks out.
    Auto,
}

/// A params-encode hook, applied before `handle_declare` (spec §4.7 item 5).
pub type EncodeHook<A> = Arc<dyn Fn(<A as Adapter>::Params) -> <A as Adapter>::Params + Send + Sync>;

/// A result-decode hook, applied to each yielded stream element. Receives
/// the (possibly replaced) query alongside the raw result (spec §4.7 item 4).
pub type DecodeHook<A> =
    Arc<dyn Fn(<A as Adapter>::Result, &<A as Adapter>::Query) -> <A as Adapter>::Result + Send + Sync>;

/// Fully resolved configuration for a [`Pool`](crate::pool::Pool), built
/// from a [`Builder`] and shared (read-only) by every holder and client.
///
/// Field-for-field, this is spec §6's configuration table; the shape (a
/// `Builder<M>` consumed into a plain value struct) mirrors the teacher
/// crate's `Builder<M>`/pool-internal split.
pub struct Options<A: Adapter> {
    pub pool_size: u32,
    pub sync_connect: bool,
    pub backoff_kind: BackoffKind,
    pub backoff_min: Duration,
    pub backoff_max: Duration,
    pub idle_interval: Duration,
    pub queue_timeout: Duration,
    pub queue_target: Duration,
    pub queue_interval: Duration,
    pub timeout: Duration,
    pub ownership_mode: OwnershipMode,
    pub name: Option<String>,
    pub log: Option<LogHook<A>>,
    pub encode: Option<EncodeHook<A>>,
    pub decode: Option<DecodeHook<A>>,
    pub adapter_options: A::Options,
}

/// Builds a [`Options`] value, validating invariants the way the teacher
/// crate's `Builder<M>` setters do (`assert!` on construction, not deferred
/// to pool startup).
pub struct Builder<A: Adapter> {
    pool_size: u32,
    sync_connect: bool,
    backoff_kind: BackoffKind,
    backoff_min: Duration,
    backoff_max: Duration,
    idle_interval: Duration,
    queue_timeout: Duration,
    queue_target: Duration,
    queue_interval: Duration,
    timeout: Duration,
    ownership_mode: OwnershipMode,
    name: Option<String>,
    log: Option<LogHook<A>>,
    encode: Option<EncodeHook<A>>,
    decode: Option<DecodeHook<A>>,
    _p: PhantomData<A>,
}

impl<A: Adapter> Default for Builder<A> {
    fn default() -> Self {
        Builder {
            pool_size: 1,
            sync_connect: false,
            backoff_kind: BackoffKind::Exp,
            backoff_min: Duration::from_millis(1000),
            backoff_max: Duration::from_millis(30_000),
            idle_interval: Duration::from_millis(1000),
            queue_timeout: Duration::from_millis(5000),
            queue_target: Duration::from_millis(50),
            queue_interval: Duration::from_millis(1000),
            timeout: Duration::from_millis(15_000),
            ownership_mode: OwnershipMode::Manual,
            name: None,
            log: None,
            encode: None,
            decode: None,
            _p: PhantomData,
        }
    }
}

impl<A: Adapter> Builder<A> {
    /// Constructs a new `Builder` with the spec's default values.
    pub fn new() -> Self {
        Default::default()
    }

    /// Number of connection holders the pool maintains (default 1).
    pub fn pool_size(mut self, pool_size: u32) -> Self {
        assert!(pool_size > 0, "pool_size must be greater than zero!");
        self.pool_size = pool_size;
        self
    }

    /// Block startup until the first connect completes (default false).
    pub fn sync_connect(mut self, sync_connect: bool) -> Self {
        self.sync_connect = sync_connect;
        self
    }

    /// Reconnect backoff curve and bounds (default `exp`, 1000/30000 ms).
    pub fn backoff(mut self, kind: BackoffKind, min: Duration, max: Duration) -> Self {
        assert!(
            kind == BackoffKind::Stop || max >= min,
            "backoff_max must be >= backoff_min!"
        );
        self.backoff_kind = kind;
        self.backoff_min = min;
        self.backoff_max = max;
        self
    }

    /// Interval between pings on an idle connection (default 1000 ms).
    pub fn idle_interval(mut self, idle_interval: Duration) -> Self {
        assert!(idle_interval > Duration::from_secs(0), "idle_interval must be non-zero");
        self.idle_interval = idle_interval;
        self
    }

    /// Deadline for a pool check-out to be granted (default 5000 ms).
    pub fn queue_timeout(mut self, queue_timeout: Duration) -> Self {
        assert!(queue_timeout > Duration::from_secs(0), "queue_timeout must be non-zero");
        self.queue_timeout = queue_timeout;
        self
    }

    /// Admission-control knobs (spec §4.5, heuristic by design).
    pub fn queue_admission(mut self, queue_target: Duration, queue_interval: Duration) -> Self {
        self.queue_target = queue_target;
        self.queue_interval = queue_interval;
        self
    }

    /// Per-operation adapter-callback deadline (default 15000 ms).
    pub fn timeout(mut self, timeout: Duration) -> Self {
        assert!(timeout > Duration::from_secs(0), "timeout must be non-zero");
        self.timeout = timeout;
        self
    }

    /// Whether an [`OwnershipProxy`](crate::ownership::OwnershipProxy) wraps
    /// this pool in manual or automatic mode (default manual).
    pub fn ownership_mode(mut self, mode: OwnershipMode) -> Self {
        self.ownership_mode = mode;
        self
    }

    /// Registers the pool/proxy under `name` in the process-wide registry
    /// (spec §4.6, §9).
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Installs a structured timing hook (spec §4.8).
    pub fn log(mut self, hook: LogHook<A>) -> Self {
        self.log = Some(hook);
        self
    }

    /// Installs a params-encode hook for streams (spec §4.7 item 5).
    pub fn encode(mut self, hook: EncodeHook<A>) -> Self {
        self.encode = Some(hook);
        self
    }

    /// Installs a result-decode hook for streams (spec §4.7 item 4).
    pub fn decode(mut self, hook: DecodeHook<A>) -> Self {
        self.decode = Some(hook);
        self
    }

    /// Finalizes the builder into an [`Options`] value, pairing it with the
    /// adapter-specific connect options.
    pub fn build(self, adapter_options: A::Options) -> Options<A> {
        Options {
            pool_size: self.pool_size,
            sync_connect: self.sync_connect,
            backoff_kind: self.backoff_kind,
            backoff_min: self.backoff_min,
            backoff_max: self.backoff_max,
            idle_interval: self.idle_interval,
            queue_timeout: self.queue_timeout,
            queue_target: self.queue_target,
            queue_interval: self.queue_interval,
            timeout: self.timeout,
            ownership_mode: self.ownership_mode,
            name: self.name,
            log: self.log,
            encode: self.encode,
            decode: self.decode,
            adapter_options,
        }
    }
}
