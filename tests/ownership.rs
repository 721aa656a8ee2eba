mod support;

use std::time::Duration;

use dbc_core::{Builder, ConnectionError, OwnershipMode, OwnershipProxy, Principal, RunError};

use support::MockAdapter;

#[tokio::test]
async fn checkout_run_checkin_round_trip() {
    let adapter = MockAdapter::default();
    let pool = dbc_core::Pool::new(adapter, Builder::new().pool_size(1).build(())).await.unwrap();
    let proxy = OwnershipProxy::new(pool, OwnershipMode::Manual);
    let (owner, owner_death) = Principal::new();

    proxy.ownership_checkout(&owner, owner_death).await.unwrap();
    let result = proxy
        .run(&owner, |client, principal| async move { client.query(principal, "select 1".into(), ()).await })
        .await
        .unwrap();
    assert_eq!(result, "select 1");
    proxy.ownership_checkin(&owner).await.unwrap();
}

#[tokio::test]
async fn checking_out_twice_for_the_same_owner_is_a_no_op() {
    let adapter = MockAdapter::default();
    let pool = dbc_core::Pool::new(adapter, Builder::new().pool_size(1).build(())).await.unwrap();
    let proxy = OwnershipProxy::new(pool, OwnershipMode::Manual);
    let (owner, owner_death) = Principal::new();

    proxy.ownership_checkout(&owner, owner_death).await.unwrap();
    let (_unused, unused_death) = Principal::new();
    proxy.ownership_checkout(&owner, unused_death).await.unwrap();

    proxy.ownership_checkin(&owner).await.unwrap();
}

#[tokio::test]
async fn manual_mode_rejects_a_run_with_no_reservation() {
    let adapter = MockAdapter::default();
    let pool = dbc_core::Pool::new(adapter, Builder::new().pool_size(1).build(())).await.unwrap();
    let proxy = OwnershipProxy::new(pool, OwnershipMode::Manual);
    let (caller, _death) = Principal::new();

    let result = proxy.run(&caller, |client, principal| async move { client.query(principal, "select 1".into(), ()).await }).await;
    assert!(matches!(result, Err(RunError::User(ConnectionError::OwnershipNotFound))));
}

#[tokio::test]
async fn auto_mode_checks_out_transparently_on_first_touch() {
    let adapter = MockAdapter::default();
    let pool = dbc_core::Pool::new(adapter, Builder::new().pool_size(1).build(())).await.unwrap();
    let proxy = OwnershipProxy::new(pool, OwnershipMode::Auto);
    let (caller, _death) = Principal::new();

    let result = proxy
        .run(&caller, |client, principal| async move { client.query(principal, "select 1".into(), ()).await })
        .await
        .unwrap();
    assert_eq!(result, "select 1");
}

#[tokio::test]
async fn ownership_allow_lets_another_principal_share_the_reservation() {
    let adapter = MockAdapter::default();
    let pool = dbc_core::Pool::new(adapter, Builder::new().pool_size(1).build(())).await.unwrap();
    let proxy = OwnershipProxy::new(pool, OwnershipMode::Manual);

    let (owner, owner_death) = Principal::new();
    proxy.ownership_checkout(&owner, owner_death).await.unwrap();
    let allowed = proxy.ownership_allow(&owner).unwrap();

    let result = proxy
        .run(&allowed, |client, principal| async move { client.query(principal, "select 1".into(), ()).await })
        .await
        .unwrap();
    assert_eq!(result, "select 1");

    let err = proxy.ownership_checkin(&allowed).await.unwrap_err();
    assert!(matches!(err, ConnectionError::NotOwner));

    proxy.ownership_checkin(&owner).await.unwrap();
}

#[tokio::test]
async fn checkin_after_owner_already_checked_in_is_not_owner_not_not_found() {
    let adapter = MockAdapter::default();
    let pool = dbc_core::Pool::new(adapter, Builder::new().pool_size(1).build(())).await.unwrap();
    let proxy = OwnershipProxy::new(pool, OwnershipMode::Manual);

    let (owner, owner_death) = Principal::new();
    proxy.ownership_checkout(&owner, owner_death).await.unwrap();
    let allowed = proxy.ownership_allow(&owner).unwrap();

    // Owner checks in first, tearing down the reservation's entry.
    proxy.ownership_checkin(&owner).await.unwrap();

    // A principal that was once `allowed` must still be told it isn't the
    // owner, not that the reservation was never found.
    let err = proxy.ownership_checkin(&allowed).await.unwrap_err();
    assert!(matches!(err, ConnectionError::NotOwner));
}

#[tokio::test]
async fn owner_death_implicitly_checks_the_connection_back_in() {
    let adapter = MockAdapter::default();
    let options = Builder::new().pool_size(1).queue_timeout(Duration::from_millis(500)).build(());
    let pool = dbc_core::Pool::new(adapter, options).await.unwrap();
    let proxy = OwnershipProxy::new(pool.clone(), OwnershipMode::Manual);

    let (owner, owner_death) = Principal::new();
    proxy.ownership_checkout(&owner, owner_death).await.unwrap();
    drop(owner);

    // The pool has only one holder; this blocks (as a waiter) until the
    // spawned liveness-monitor task observes the owner's death and runs the
    // implicit checkin, proving that path actually frees the connection.
    let (probe, _probe_death) = Principal::new();
    let client = pool.checkout(&probe).await.expect("pool never became available after the owner died");
    client.checkin().await;
}
