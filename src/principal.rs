//! Identity and liveness for callers of the pool (spec glossary: "Principal").
//!
//! The original system runs on a VM where every caller is a supervised
//! process with a pid; this crate has no such ambient concept, so a
//! [`Principal`] is an explicit, cheaply-comparable identity token that the
//! application creates once per logical caller (a task, a request, a test)
//! and threads through pool/ownership calls. Dropping the token is how
//! "the principal dies" is observed (spec §4.3, §4.6): anyone awaiting the
//! paired [`Death`] future is woken with an error once the sender side is
//! gone.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::oneshot;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque, `Copy` identity for a [`Principal`]. Safe to use as a map key or
/// to compare across tasks without holding on to the `Principal` itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PrincipalId(u64);

impl fmt::Display for PrincipalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#Principal<{}>", self.0)
    }
}

/// A caller identity whose liveness can be observed.
///
/// Application code holds a `Principal` for as long as it intends to use a
/// checked-out client or an ownership reservation; dropping it (going out of
/// scope, task panicking, `?`-returning early) is treated exactly like a
/// BEAM process dying, triggering the holder's/proxy's implicit-rollback
/// path.
pub struct Principal {
    id: PrincipalId,
    _death_tx: oneshot::Sender<()>,
}

/// The other half of a [`Principal`]; resolves once the paired `Principal`
/// is dropped. Held internally by the holder/ownership actor loops.
pub struct Death {
    pub(crate) id: PrincipalId,
    rx: oneshot::Receiver<()>,
}

impl Principal {
    /// Mints a fresh principal identity and its paired death signal.
    pub fn new() -> (Principal, Death) {
        let id = PrincipalId(NEXT_ID.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = oneshot::channel();
        (Principal { id, _death_tx: tx }, Death { id, rx })
    }

    /// This principal's stable identity.
    pub fn id(&self) -> PrincipalId {
        self.id
    }
}

impl Death {
    /// Waits for the paired [`Principal`] to be dropped.
    pub async fn observe(self) {
        // The sender is never used to send a value; a `RecvError` here is
        // the expected, and only, way this resolves.
        let _ = self.rx.await;
    }
}

impl fmt::Debug for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Principal").field("id", &self.id).finish()
    }
}
