//! End-to-end behaviour of the Aggregator and Propagator, driven event by
//! event against scripted storage.

use std::sync::{Arc, Mutex};

use logquery_core::{ChunkerConfig, MessageRef, Record, RequestId};
use logquery_store::{MemoryStore, RecordStream, StoreError};
use logquery_sync::{
    Aggregator, NodeId, Propagator, ProtocolViolation, QueryConfig, QueryError, QueryOutput,
    QueryPropagate, QueryResponse, QueryState,
};
use logquery_testkit::{refs_of, ScriptedStore, TestFixture};
use tokio::sync::{mpsc, oneshot};

const REQUEST: &str = "scenario";

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn r(ts: i64) -> MessageRef {
    MessageRef::new(ts, 0)
}

fn response(refs: &[i64], is_final: bool) -> QueryResponse {
    QueryResponse::new(
        RequestId::new(REQUEST),
        refs.iter().map(|ts| r(*ts)).collect(),
        is_final,
    )
}

fn propagate(records: Vec<Record>) -> QueryPropagate {
    QueryPropagate {
        request_id: RequestId::new(REQUEST),
        payload: records,
    }
}

fn peer(n: u8) -> NodeId {
    NodeId::from_bytes([n; 32])
}

fn spawn_aggregator<S: logquery_store::Store>(
    store: Arc<S>,
    fixture: &TestFixture,
    peers: Vec<NodeId>,
) -> (Aggregator, QueryOutput) {
    Aggregator::spawn(
        store,
        fixture.range_request(REQUEST, (0, 0), (1000, 0)),
        peers,
        Box::new(|_, _| {}),
        &QueryConfig::default(),
    )
    .unwrap()
}

#[tokio::test]
async fn scenario_a_empty_primary_no_peers() {
    init_tracing();
    let fixture = TestFixture::new();
    let calls = Arc::new(Mutex::new(Vec::new()));
    let sink = calls.clone();

    let (aggregator, output) = Aggregator::spawn(
        Arc::new(MemoryStore::new()),
        fixture.range_request(REQUEST, (0, 0), (1000, 0)),
        vec![],
        Box::new(move |batch, is_final| sink.lock().unwrap().push((batch, is_final))),
        &QueryConfig::default(),
    )
    .unwrap();

    assert!(output.collect().await.unwrap().is_empty());
    assert_eq!(*calls.lock().unwrap(), vec![(Vec::<MessageRef>::new(), true)]);
    assert_eq!(aggregator.status().state, QueryState::Closed);
}

#[tokio::test]
async fn scenario_b_peer_reports_record_primary_holds() {
    init_tracing();
    let fixture = TestFixture::new();
    let store = Arc::new(ScriptedStore::new(fixture.store_with([r(1)]).unwrap()));
    let primary = store.script_channel();

    let (aggregator, output) = spawn_aggregator(store.clone(), &fixture, vec![peer(1)]);

    assert!(primary.send(fixture.record(1, 0)).await);
    aggregator
        .on_foreign_response(peer(1), response(&[1], true))
        .await
        .unwrap();
    drop(primary);

    let records = output.collect().await.unwrap();
    assert_eq!(records, vec![fixture.record(1, 0)]);

    // The local query plus one re-query of the ready range.
    let calls = store.range_calls();
    assert_eq!(calls.len(), 2);
    assert_eq!((calls[1].from, calls[1].to), (r(1), r(1)));
}

#[tokio::test]
async fn scenario_c_propagated_record_is_stored_then_emitted() {
    init_tracing();
    let fixture = TestFixture::new();
    let store = Arc::new(MemoryStore::new());

    let (aggregator, output) = spawn_aggregator(store.clone(), &fixture, vec![peer(1)]);

    aggregator
        .on_foreign_response(peer(1), response(&[5], true))
        .await
        .unwrap();

    let mut status = aggregator.watch_status();
    let snapshot = status
        .wait_for(|s| s.primary.finalized && s.pending_peers().is_empty())
        .await
        .unwrap()
        .clone();
    assert_eq!(snapshot.state, QueryState::Draining);
    assert_eq!(snapshot.emitted, 0);

    aggregator
        .on_foreign_propagation(peer(1), propagate(vec![fixture.record(5, 0)]))
        .await
        .unwrap();

    assert_eq!(output.collect().await.unwrap(), vec![fixture.record(5, 0)]);
    assert_eq!(store.len().unwrap(), 1);
}

#[tokio::test]
async fn scenario_d_prefix_advances_with_each_report() {
    init_tracing();
    let fixture = TestFixture::new();
    let store = Arc::new(fixture.store_with([r(1), r(2), r(3)]).unwrap());
    let (a, b) = (peer(1), peer(2));

    let (aggregator, output) = spawn_aggregator(store, &fixture, vec![a, b]);
    let mut status = aggregator.watch_status();

    aggregator
        .on_foreign_response(a, response(&[1, 2], false))
        .await
        .unwrap();
    let snapshot = status
        .wait_for(|s| {
            s.primary.finalized && s.peers.iter().any(|(id, p)| *id == a && p.watermark == Some(r(2)))
        })
        .await
        .unwrap()
        .clone();
    // B has not reported: nothing is settled yet.
    assert_eq!(snapshot.emitted, 0);

    aggregator
        .on_foreign_response(b, response(&[1, 2, 3], true))
        .await
        .unwrap();
    // A's watermark holds the prefix at 2.
    status.wait_for(|s| s.emitted == 2).await.unwrap();
    assert_eq!(aggregator.status().emitted, 2);

    aggregator
        .on_foreign_response(a, response(&[3], true))
        .await
        .unwrap();

    let records = output.collect().await.unwrap();
    assert_eq!(refs_of(&records), vec![r(1), r(2), r(3)]);
}

#[tokio::test]
async fn scenario_e_propagator_decides_before_requester_finalizes() {
    init_tracing();
    let fixture = TestFixture::new();
    let store = Arc::new(ScriptedStore::new(fixture.store_with([r(1), r(2)]).unwrap()));
    let local = store.script_channel();

    let (propagation_tx, mut propagations) = mpsc::unbounded_channel();
    let (close_tx, closed) = oneshot::channel();
    let config = QueryConfig {
        chunker: ChunkerConfig {
            items_limit: 1,
            bytes_limit: usize::MAX,
        },
        ..QueryConfig::default()
    };

    let propagator = Propagator::spawn(
        store,
        fixture.range_request(REQUEST, (0, 0), (1000, 0)),
        peer(9),
        Box::new(|_, _| {}),
        Box::new(move |records: Vec<Record>, is_final| {
            let _ = propagation_tx.send((refs_of(&records), is_final));
        }),
        Box::new(move |result| {
            let _ = close_tx.send(result.is_ok());
        }),
        &config,
    )
    .unwrap();

    assert!(local.send(fixture.record(1, 0)).await);
    assert!(local.send(fixture.record(2, 0)).await);
    propagator
        .on_requester_response(response(&[1], false))
        .await
        .unwrap();
    propagator
        .on_requester_response(response(&[], true))
        .await
        .unwrap();

    // 1 was matched, so the first thing the requester receives is 2.
    assert_eq!(propagations.recv().await, Some((vec![r(2)], false)));

    drop(local);
    assert_eq!(propagations.recv().await, Some((vec![], true)));
    assert!(closed.await.unwrap());
}

#[tokio::test]
async fn failed_local_query_surfaces_on_output() {
    init_tracing();
    let fixture = TestFixture::new();
    let store = Arc::new(ScriptedStore::new(MemoryStore::new()));
    store.script(RecordStream::failed(StoreError::QueryFailed("disk gone".into())));

    let (_aggregator, mut output) = spawn_aggregator(store, &fixture, vec![]);

    assert!(matches!(
        output.next().await,
        Some(Err(QueryError::Storage(StoreError::QueryFailed(_))))
    ));
    assert!(output.next().await.is_none());
}

#[tokio::test]
async fn failed_store_of_propagation_surfaces_on_output() {
    init_tracing();
    let fixture = TestFixture::new();
    let store = Arc::new(ScriptedStore::new(MemoryStore::new()));
    store.fail_stores(true);

    let (aggregator, output) = spawn_aggregator(store, &fixture, vec![peer(1)]);
    aggregator
        .on_foreign_response(peer(1), response(&[5], true))
        .await
        .unwrap();
    aggregator
        .on_foreign_propagation(peer(1), propagate(vec![fixture.record(5, 0)]))
        .await
        .unwrap();

    assert!(matches!(
        output.collect().await,
        Err(QueryError::Storage(_))
    ));
}

#[tokio::test]
async fn failed_sub_query_is_terminal_not_truncating() {
    init_tracing();
    let fixture = TestFixture::new();
    let store = Arc::new(ScriptedStore::new(fixture.store_with([r(1), r(2)]).unwrap()));
    let primary = store.script_channel();
    store.script(RecordStream::failed(StoreError::QueryFailed("re-query".into())));

    let (_aggregator, output) = spawn_aggregator(store, &fixture, vec![]);
    assert!(primary.send(fixture.record(1, 0)).await);
    drop(primary);

    assert!(matches!(output.collect().await, Err(QueryError::Storage(_))));
}

#[tokio::test]
async fn missing_payload_is_skipped_and_propagator_closes() {
    init_tracing();
    let fixture = TestFixture::new();
    // The local stream reports a ref whose payload is not in storage; the
    // lookup then yields nothing, which is not an error.
    let store = Arc::new(ScriptedStore::new(MemoryStore::new()));
    let local = store.script_channel();
    let (close_tx, closed) = oneshot::channel();

    let propagator = Propagator::spawn(
        store,
        fixture.range_request(REQUEST, (0, 0), (1000, 0)),
        peer(9),
        Box::new(|_, _| {}),
        Box::new(|_, _| {}),
        Box::new(move |result| {
            let _ = close_tx.send(result.is_ok());
        }),
        &QueryConfig::default(),
    )
    .unwrap();

    assert!(local.send(fixture.record(4, 0)).await);
    drop(local);
    propagator
        .on_requester_response(response(&[], true))
        .await
        .unwrap();

    assert!(closed.await.unwrap());
}

#[tokio::test]
async fn late_report_below_emitted_prefix_is_ignored() {
    init_tracing();
    let fixture = TestFixture::new();
    let store = Arc::new(fixture.store_with([r(1), r(2), r(3)]).unwrap());
    let (a, b) = (peer(1), peer(2));

    let (aggregator, output) = spawn_aggregator(store, &fixture, vec![a, b]);
    let mut status = aggregator.watch_status();

    aggregator
        .on_foreign_response(a, response(&[1, 2, 3], true))
        .await
        .unwrap();
    aggregator
        .on_foreign_response(b, response(&[2], false))
        .await
        .unwrap();
    status.wait_for(|s| s.emitted == 2).await.unwrap();

    // B re-reports an already emitted ref before finishing.
    aggregator
        .on_foreign_response(b, response(&[2, 3], true))
        .await
        .unwrap();

    assert_eq!(
        refs_of(&output.collect().await.unwrap()),
        vec![r(1), r(2), r(3)]
    );
}

#[tokio::test]
async fn second_final_is_reported_even_while_closing() {
    init_tracing();
    let fixture = TestFixture::new();

    // The query closes right after the first final; the second one races
    // that close and must never vanish.
    for round in 0..200 {
        let (aggregator, output) =
            spawn_aggregator(Arc::new(MemoryStore::new()), &fixture, vec![peer(1)]);

        let first = aggregator.on_foreign_response(peer(1), response(&[], true)).await;
        let second = aggregator.on_foreign_response(peer(1), response(&[], true)).await;
        assert!(first.is_ok(), "round {round}");

        let outcome = output.collect().await;
        let rejected = matches!(second, Err(QueryError::Closed));
        let failed = matches!(
            outcome,
            Err(QueryError::ProtocolViolation(ProtocolViolation::FinalizedTwice { .. }))
        );
        assert!(rejected || failed, "round {round}: second final swallowed");
    }
}

#[tokio::test]
async fn full_mailbox_fails_only_that_query() {
    init_tracing();
    let fixture = TestFixture::new();
    let store = Arc::new(fixture.store_with((1..=5).map(r)).unwrap());
    let cramped = QueryConfig {
        mailbox_capacity: 1,
        output_capacity: 1,
        ..QueryConfig::default()
    };

    let (aggregator, stalled) = Aggregator::spawn(
        store.clone(),
        fixture.range_request(REQUEST, (0, 0), (1000, 0)),
        vec![peer(1)],
        Box::new(|_, _| {}),
        &cramped,
    )
    .unwrap();

    // Nobody reads `stalled`, so the actor soon stops draining its mailbox.
    let mut overloaded = false;
    for _ in 0..1_000 {
        match aggregator.try_foreign_response(peer(1), response(&[5], false)) {
            Ok(()) => tokio::task::yield_now().await,
            Err(QueryError::Overloaded) => {
                overloaded = true;
                break;
            }
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert!(overloaded);

    // An unrelated query over the same store is unaffected.
    let (_other, output) = Aggregator::spawn(
        store,
        fixture.range_request("other", (0, 0), (1000, 0)),
        vec![],
        Box::new(|_, _| {}),
        &cramped,
    )
    .unwrap();
    assert_eq!(refs_of(&output.collect().await.unwrap()), (1..=5).map(r).collect::<Vec<_>>());

    assert!(matches!(stalled.collect().await, Err(QueryError::Overloaded)));
}
