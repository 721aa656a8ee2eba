mod support;

use std::sync::Arc;

use dbc_core::{Builder, ConnectionError, DecodeHook, Principal, RunError, Stream, TxOutcome};

use support::{DeclareStep, FetchStep, MockAdapter};

#[tokio::test]
async fn happy_stream_yields_cont_then_halt_and_closes() {
    let adapter = MockAdapter::default();
    adapter.push_declare(DeclareStep::Ok(7));
    adapter.push_fetch(FetchStep::Cont("row1".into()));
    adapter.push_fetch(FetchStep::Halt("row2".into()));
    let options = Builder::new().pool_size(1).build(());
    let pool = dbc_core::Pool::new(adapter, options).await.unwrap();
    let (principal, _death) = Principal::new();

    let rows = pool
        .transaction(&principal, |client| async move {
            let mut stream = match Stream::open(client, &principal, "select * from t".into(), (), None, None).await {
                Ok(s) => s,
                Err(e) => return TxOutcome::Err(e),
            };
            let mut rows = Vec::new();
            while let Some(next) = stream.next(&principal).await {
                match next {
                    Ok(v) => rows.push(v),
                    Err(e) => return TxOutcome::Err(e),
                }
            }
            TxOutcome::Commit(rows)
        })
        .await
        .unwrap();
    assert_eq!(rows, vec!["row1".to_string(), "row2".to_string()]);
}

#[tokio::test]
async fn declare_disconnect_rolls_back_and_never_opens_a_cursor() {
    let adapter = MockAdapter::default();
    adapter.push_declare(DeclareStep::Disconnect("conn reset".into()));
    let options = Builder::new().pool_size(1).build(());
    let pool = dbc_core::Pool::new(adapter, options).await.unwrap();
    let (principal, _death) = Principal::new();

    let result = pool
        .transaction(&principal, |client| async move {
            match Stream::open(client, &principal, "select 1".into(), (), None, None).await {
                Ok(_) => TxOutcome::Commit(()),
                Err(e) => TxOutcome::Err(e),
            }
        })
        .await;
    assert!(matches!(result, Err(RunError::User(_))));
}

#[tokio::test]
async fn first_fetch_disconnect_surfaces_as_an_error() {
    let adapter = MockAdapter::default();
    adapter.push_declare(DeclareStep::Ok(1));
    adapter.push_fetch(FetchStep::Disconnect("conn reset".into()));
    let options = Builder::new().pool_size(1).build(());
    let pool = dbc_core::Pool::new(adapter, options).await.unwrap();
    let (principal, _death) = Principal::new();

    let result = pool
        .transaction(&principal, |client| async move {
            let mut stream = match Stream::open(client, &principal, "select 1".into(), (), None, None).await {
                Ok(s) => s,
                Err(e) => return TxOutcome::Err(e),
            };
            match stream.next(&principal).await {
                Some(Err(e)) => TxOutcome::Err(e),
                _ => TxOutcome::Commit(()),
            }
        })
        .await;
    assert!(matches!(result, Err(RunError::User(_))));
}

#[tokio::test]
async fn decode_hook_replaces_the_yielded_result() {
    let adapter = MockAdapter::default();
    adapter.push_declare(DeclareStep::Ok(1));
    adapter.push_fetch(FetchStep::Halt("raw".into()));
    let options = Builder::new().pool_size(1).build(());
    let pool = dbc_core::Pool::new(adapter, options).await.unwrap();
    let (principal, _death) = Principal::new();
    let decode: DecodeHook<MockAdapter> = Arc::new(|result, _query| format!("decoded:{result}"));

    let row = pool
        .transaction(&principal, |client| async move {
            let mut stream = match Stream::open(client, &principal, "select 1".into(), (), None, Some(decode)).await {
                Ok(s) => s,
                Err(e) => return TxOutcome::Err(e),
            };
            match stream.next(&principal).await {
                Some(Ok(v)) => TxOutcome::Commit(v),
                Some(Err(e)) => TxOutcome::Err(e),
                None => TxOutcome::Err(ConnectionError::Closed),
            }
        })
        .await
        .unwrap();
    assert_eq!(row, "decoded:raw");
}

#[tokio::test]
async fn breaking_out_of_the_loop_early_still_closes_the_cursor() {
    let adapter = MockAdapter::default();
    adapter.push_declare(DeclareStep::Ok(1));
    adapter.push_fetch(FetchStep::Cont("row1".into()));
    adapter.push_fetch(FetchStep::Halt("row2".into()));
    let options = Builder::new().pool_size(1).build(());
    let pool = dbc_core::Pool::new(adapter, options).await.unwrap();
    let (principal, _death) = Principal::new();

    pool.transaction(&principal, |client| async move {
        let mut stream = match Stream::open(client, &principal, "select 1".into(), (), None, None).await {
            Ok(s) => s,
            Err(e) => return TxOutcome::Err(e),
        };
        // Only ever consume the first batch; `Client::transaction` is
        // responsible for deallocating the still-open cursor once this body
        // returns without exhausting the stream.
        let _ = stream.next(&principal).await;
        TxOutcome::Commit(())
    })
    .await
    .unwrap();

    // A second transaction against the same (still idle) connection proves
    // the first one didn't leave the client in a broken state.
    let again = pool
        .transaction(&principal, |client| async move {
            match client.query(&principal, "select 2".into(), ()).await {
                Ok(v) => TxOutcome::Commit(v),
                Err(e) => TxOutcome::Err(e),
            }
        })
        .await
        .unwrap();
    assert_eq!(again, "select 2");
}
