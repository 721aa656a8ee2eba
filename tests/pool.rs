mod support;

use std::time::Duration;

use dbc_core::{BackoffKind, Builder, Principal};

use support::MockAdapter;

#[tokio::test]
async fn run_checks_out_and_back_in() {
    let adapter = MockAdapter::default();
    let options = Builder::new().pool_size(1).build(());
    let pool = dbc_core::Pool::new(adapter, options).await.unwrap();
    let (principal, _death) = Principal::new();

    let result = pool
        .run(&principal, |client| async move { client.query(&principal, "select 1".into(), ()).await })
        .await
        .unwrap();
    assert_eq!(result, "select 1");
}

#[tokio::test]
async fn a_disconnecting_query_forces_reconnect_then_recovers() {
    let adapter = MockAdapter::default();
    adapter.push_query(support::Step::Disconnect("connection reset".into()));
    let options = Builder::new().pool_size(1).idle_interval(Duration::from_millis(20)).build(());
    let pool = dbc_core::Pool::new(adapter, options).await.unwrap();
    let (principal, _death) = Principal::new();

    let first = pool.run(&principal, |client| async move { client.query(&principal, "select 1".into(), ()).await }).await;
    assert!(first.is_err());

    // The holder's supervisor reconnects in the background; a fresh
    // check-out should eventually succeed again.
    let mut last_err = None;
    for _ in 0..50 {
        match pool.run(&principal, |client| async move { client.query(&principal, "select 1".into(), ()).await }).await {
            Ok(v) => {
                assert_eq!(v, "select 1");
                return;
            }
            Err(e) => last_err = Some(e),
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("pool never recovered: {last_err:?}");
}

#[tokio::test]
async fn sync_connect_with_stop_backoff_surfaces_the_connect_error() {
    let adapter = MockAdapter::default();
    adapter.fail_next_connects(1);
    let options = Builder::new()
        .pool_size(1)
        .sync_connect(true)
        .backoff(BackoffKind::Stop, Duration::from_millis(10), Duration::from_millis(10))
        .build(());

    let err = dbc_core::Pool::new(adapter, options).await.unwrap_err();
    assert_eq!(err.0, "connect failed");
}

#[tokio::test]
async fn a_mismatched_principal_is_rejected() {
    let adapter = MockAdapter::default();
    let options = Builder::new().pool_size(1).build(());
    let pool = dbc_core::Pool::new(adapter, options).await.unwrap();
    let (owner, _owner_death) = Principal::new();
    let (stranger, _stranger_death) = Principal::new();

    let mut client = pool.checkout(&owner).await.unwrap();
    let result = client.query(&stranger, "select 1".into(), ()).await;
    assert!(matches!(result, Err(dbc_core::ConnectionError::OwnershipMismatch)));
    client.checkin().await;
}
