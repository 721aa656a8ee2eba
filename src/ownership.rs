//! The ownership proxy: a sticky, shareable reservation layered over a
//! [`Pool`] for test-isolation use cases (spec §4.6, component C6).
//!
//! Grounded on the same `Arc<Mutex<...>>`-table pattern as
//! [`crate::registry`] (spec §9: "model as a process-wide map from name to
//! actor reference"), applied here to a per-proxy ownership table instead of
//! the crate-wide name registry.
//!
//! A caller's [`Principal`] is only ever used by this module to *authorize*
//! a request (is this id the owner, or in the allowed set?). The actual
//! connection underneath is driven by a `Principal` this module mints for
//! itself at `ownership_checkout` time, so every authorized caller can
//! delegate onto the same [`Client`] without tripping its internal
//! ownership check (spec §5: "a handle is bound to the principal that
//! checked it out" — here, that principal is the reservation's own, not
//! any individual caller's).

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::Mutex as AsyncMutex;

use crate::adapter::Adapter;
use crate::client::Client;
use crate::error::{ConnectionError, RunError};
use crate::options::OwnershipMode;
use crate::pool::Pool;
use crate::principal::{Death, Principal, PrincipalId};

static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

struct Entry<A: Adapter> {
    client: Arc<AsyncMutex<Client<A>>>,
    /// The principal actually passed to every [`Client`] method; distinct
    /// from the caller's own identity so owner *and* allowed principals can
    /// share one check-out.
    client_principal: Arc<Principal>,
    allowed: HashSet<PrincipalId>,
    /// Bumped on every reservation so a stale liveness-monitor task (from a
    /// reservation that has since been checked in and possibly replaced)
    /// can tell it no longer owns the slot it's about to mutate.
    generation: u64,
}

struct ProxyState<A: Adapter> {
    table: HashMap<PrincipalId, Entry<A>>,
    /// Ids that used to be in some entry's `allowed` set but whose owner has
    /// since checked in. Lets `ownership_checkin` tell "never part of any
    /// reservation" (`OwnershipNotFound`) apart from "was allowed, now
    /// revoked" (`NotOwner`) once the owning entry itself is gone.
    revoked: HashSet<PrincipalId>,
}

/// Wraps a [`Pool`], letting one principal (the owner) reserve a connection
/// and share it with other principals it explicitly allows.
pub struct OwnershipProxy<A: Adapter> {
    pool: Pool<A>,
    mode: StdMutex<OwnershipMode>,
    state: Arc<StdMutex<ProxyState<A>>>,
    /// Set by [`OwnershipProxy::register`], so [`OwnershipProxy::shutdown`]
    /// can unregister without the caller having to repeat the name.
    registered_name: StdMutex<Option<String>>,
}

impl<A: Adapter> Clone for OwnershipProxy<A> {
    fn clone(&self) -> Self {
        OwnershipProxy {
            pool: self.pool.clone(),
            mode: StdMutex::new(*self.mode.lock().unwrap()),
            state: self.state.clone(),
            registered_name: StdMutex::new(self.registered_name.lock().unwrap().clone()),
        }
    }
}

impl<A: Adapter> PartialEq for OwnershipProxy<A> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }
}

impl<A: Adapter> OwnershipProxy<A> {
    pub fn new(pool: Pool<A>, mode: OwnershipMode) -> Self {
        OwnershipProxy {
            pool,
            mode: StdMutex::new(mode),
            state: Arc::new(StdMutex::new(ProxyState {
                table: HashMap::new(),
                revoked: HashSet::new(),
            })),
            registered_name: StdMutex::new(None),
        }
    }

    /// Registers this proxy under `name` in the process-wide registry (spec
    /// §4.6 "Lookup by name"). Remembered so [`OwnershipProxy::shutdown`] can
    /// unregister it without being told the name again.
    pub fn register(&self, name: &str)
    where
        A: 'static,
    {
        *self.registered_name.lock().unwrap() = Some(name.to_string());
        crate::registry::register(name, self.clone());
    }

    /// Looks up a proxy previously registered under `name`.
    pub fn named(name: &str) -> Option<OwnershipProxy<A>>
    where
        A: 'static,
    {
        crate::registry::lookup(name)
    }

    /// Removes this proxy's registration under `name`, if it is still the
    /// registered instance (spec §9: "torn down on pool shutdown").
    pub fn unregister(&self, name: &str)
    where
        A: 'static,
    {
        crate::registry::unregister_if(name, self);
    }

    /// Shuts down the underlying pool and unregisters this proxy, if it was
    /// registered via [`OwnershipProxy::register`] (spec §9: "torn down on
    /// pool shutdown").
    pub fn shutdown(&self)
    where
        A: 'static,
    {
        self.pool.shutdown();
        if let Some(name) = self.registered_name.lock().unwrap().take() {
            crate::registry::unregister_if(&name, self);
        }
    }

    pub fn ownership_mode(&self, mode: OwnershipMode) {
        *self.mode.lock().unwrap() = mode;
    }

    /// Reserves a connection for `principal`. `death` is consumed to
    /// monitor the owner's liveness: if the paired [`Principal`] is
    /// dropped before an explicit [`OwnershipProxy::ownership_checkin`],
    /// the reservation is torn down and its [`Client`] is checked back in
    /// (with a best-effort rollback), mirroring spec §4.6's "owner death ⇒
    /// implicit checkin".
    ///
    /// A second check-out by the same principal while one is already
    /// outstanding is a no-op (spec's `{:already, :owner}` collapsed to
    /// plain success, since there is nothing further to report in this
    /// API).
    pub async fn ownership_checkout(&self, principal: &Principal, death: Death) -> Result<(), RunError<A::Error>> {
        let owner_id = principal.id();
        if self.state.lock().unwrap().table.contains_key(&owner_id) {
            return Ok(());
        }

        let (internal, _unused_death) = Principal::new();
        let client = self.pool.checkout(&internal).await?;
        let client = Arc::new(AsyncMutex::new(client));
        let client_principal = Arc::new(internal);
        let generation = NEXT_GENERATION.fetch_add(1, Ordering::Relaxed);

        self.state.lock().unwrap().table.insert(
            owner_id,
            Entry {
                client: client.clone(),
                client_principal,
                allowed: HashSet::new(),
                generation,
            },
        );

        let state = self.state.clone();
        tokio::spawn(async move {
            death.observe().await;
            let entry = {
                let mut guard = state.lock().unwrap();
                match guard.table.get(&owner_id) {
                    Some(e) if e.generation == generation => guard.table.remove(&owner_id),
                    _ => None,
                }
            };
            if let Some(entry) = entry {
                if let Ok(client) = Arc::try_unwrap(entry.client) {
                    client.into_inner().checkin().await;
                }
            }
        });

        Ok(())
    }

    /// Checks `principal`'s reservation back in. Revokes every principal it
    /// had allowed.
    pub async fn ownership_checkin(&self, principal: &Principal) -> Result<(), ConnectionError<A::Error>> {
        let id = principal.id();
        let entry = {
            let mut state = self.state.lock().unwrap();
            if state.revoked.contains(&id) {
                return Err(ConnectionError::NotOwner);
            }
            if let Some(entry) = state.table.remove(&id) {
                for allowed_id in &entry.allowed {
                    state.revoked.insert(*allowed_id);
                }
                Some(entry)
            } else if state.table.values().any(|e| e.allowed.contains(&id)) {
                return Err(ConnectionError::NotOwner);
            } else {
                None
            }
        };
        let Some(entry) = entry else {
            return Err(ConnectionError::OwnershipNotFound);
        };
        if let Ok(client) = Arc::try_unwrap(entry.client) {
            client.into_inner().checkin().await;
        }
        Ok(())
    }

    /// Lets `owner`'s reservation be shared by a freshly minted principal,
    /// returned to the caller to hand to whichever other task/thread should
    /// gain access (spec §4.6 `ownership_allow`). The original spec's
    /// `ownership_allow(owner, allowee)` takes the allowee's identity as an
    /// argument; since Rust has no ambient process registry to resolve an
    /// arbitrary pre-existing identity against, this mints the allowed
    /// identity instead of accepting one (see DESIGN.md).
    pub fn ownership_allow(&self, owner: &Principal) -> Result<Principal, ConnectionError<A::Error>> {
        let owner_id = owner.id();
        let mut state = self.state.lock().unwrap();
        let Some(entry) = state.table.get_mut(&owner_id) else {
            let not_owner = state.revoked.contains(&owner_id) || state.table.values().any(|e| e.allowed.contains(&owner_id));
            return Err(if not_owner {
                ConnectionError::NotOwner
            } else {
                ConnectionError::OwnershipNotFound
            });
        };
        let (allowee, allowee_death) = Principal::new();
        let allowee_id = allowee.id();
        entry.allowed.insert(allowee_id);
        let generation = entry.generation;
        drop(state);

        let state = self.state.clone();
        tokio::spawn(async move {
            allowee_death.observe().await;
            let mut guard = state.lock().unwrap();
            if let Some(e) = guard.table.get_mut(&owner_id) {
                if e.generation == generation {
                    e.allowed.remove(&allowee_id);
                }
            }
        });

        Ok(allowee)
    }

    fn resolve_sync(&self, caller: &Principal) -> Option<(Arc<AsyncMutex<Client<A>>>, Arc<Principal>)> {
        let id = caller.id();
        let state = self.state.lock().unwrap();
        if let Some(entry) = state.table.get(&id) {
            return Some((entry.client.clone(), entry.client_principal.clone()));
        }
        for entry in state.table.values() {
            if entry.allowed.contains(&id) {
                return Some((entry.client.clone(), entry.client_principal.clone()));
            }
        }
        None
    }

    async fn resolve(&self, caller: &Principal) -> Result<(Arc<AsyncMutex<Client<A>>>, Arc<Principal>), RunError<A::Error>> {
        if let Some(found) = self.resolve_sync(caller) {
            return Ok(found);
        }
        if *self.mode.lock().unwrap() == OwnershipMode::Manual {
            return Err(RunError::User(ConnectionError::OwnershipNotFound));
        }

        // Auto mode: transparently check out on first touch. No `Death` is
        // available from a bare `&Principal`, so this reservation is not
        // owner-liveness-monitored; call `ownership_checkout` explicitly
        // when that matters.
        let owner_id = caller.id();
        let (internal, _unused_death) = Principal::new();
        let client = self.pool.checkout(&internal).await?;
        let client = Arc::new(AsyncMutex::new(client));
        let client_principal = Arc::new(internal);
        let generation = NEXT_GENERATION.fetch_add(1, Ordering::Relaxed);
        self.state.lock().unwrap().table.insert(
            owner_id,
            Entry {
                client: client.clone(),
                client_principal: client_principal.clone(),
                allowed: HashSet::new(),
                generation,
            },
        );
        Ok((client, client_principal))
    }

    /// Runs `f` against the caller's reserved connection (spec §4.4 `run`,
    /// delegated through the caller's ownership reservation rather than a
    /// bare pool check-out).
    pub async fn run<F, Fut, T>(&self, caller: &Principal, f: F) -> Result<T, RunError<A::Error>>
    where
        F: FnOnce(&mut Client<A>, &Principal) -> Fut,
        Fut: Future<Output = Result<T, ConnectionError<A::Error>>>,
    {
        let (client, principal) = self.resolve(caller).await?;
        let mut guard = client.lock().await;
        f(&mut guard, &principal).await.map_err(RunError::User)
    }

    /// Runs `f` inside a transaction against the caller's reserved
    /// connection (spec §4.4 `transaction`, same delegation as `run`).
    pub async fn transaction<F, Fut, T>(&self, caller: &Principal, f: F) -> Result<T, RunError<A::Error>>
    where
        F: FnOnce(&mut Client<A>, &Principal) -> Fut,
        Fut: Future<Output = crate::client::TxOutcome<T, ConnectionError<A::Error>>>,
    {
        let (client, principal) = self.resolve(caller).await?;
        let mut guard = client.lock().await;
        guard.transaction(&principal, |client| f(client, &principal)).await
    }
}
