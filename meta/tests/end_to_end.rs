//! End-to-end coverage of the concrete scenarios and cross-cutting
//! invariants, driven through the real `Dispatcher`/`RpcClient` wiring
//! where that matters and through `Core` directly otherwise.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use meta::controllers;
use meta::core::Core;
use meta_core::CoreResult;
use meta_fsm::{BatchReport, More, ProviderExecutor, ProviderState};
use meta_rpc::{Dispatcher, RpcClient};
use meta_store::SqliteCheckpointStore;
use meta_test::{paired_transports, ScriptedQuotaSource, TransportPair};
use meta_transport::{Envelope, EnvelopeType};
use serde_json::json;
use tokio_util::sync::CancellationToken;

struct ScriptedExecutor {
    batches_remaining: AtomicU32,
    items_per_batch: u64,
}

#[async_trait]
impl ProviderExecutor for ScriptedExecutor {
    async fn execute(&self, _batch_size: u32, report: &mut BatchReport) -> CoreResult<More> {
        let remaining = self.batches_remaining.fetch_sub(1, Ordering::SeqCst);
        for i in 0..self.items_per_batch {
            report.record_success(format!("v2e::nvd::cve::CVE-2024-{i:05}"));
        }
        Ok(remaining > 1)
    }
}

struct NeverFinishesExecutor;

#[async_trait]
impl ProviderExecutor for NeverFinishesExecutor {
    async fn execute(&self, _batch_size: u32, report: &mut BatchReport) -> CoreResult<More> {
        tokio::time::sleep(Duration::from_millis(50)).await;
        report.record_success("v2e::nvd::cve::CVE-2024-00001");
        Ok(true)
    }
}

async fn terminated_within(core: &Arc<Core<ScriptedQuotaSource>>, provider_id: &str, attempts: u32) -> bool {
    for _ in 0..attempts {
        tokio::time::sleep(Duration::from_millis(10)).await;
        if core.registry().lock().unwrap().get(provider_id).unwrap().state == ProviderState::Terminated {
            return true;
        }
    }
    false
}

/// The happy path and the RPC surface, driven end-to-end: a simulated
/// remote caller issues `FSMStartProvider` then `FSMListProviders` over a
/// real `Dispatcher`/`Envelope` wire, not by calling `Core` directly.
#[tokio::test]
async fn start_provider_and_list_providers_round_trip_through_the_dispatcher() {
    let store = Arc::new(SqliteCheckpointStore::in_memory().await.unwrap());
    let quota = Arc::new(ScriptedQuotaSource::new([5]));
    let core = Arc::new(Core::new(store, quota));
    core.register_provider(
        "cve",
        "cve",
        vec![],
        5,
        Arc::new(ScriptedExecutor {
            batches_remaining: AtomicU32::new(3),
            items_per_batch: 80,
        }),
    )
    .unwrap();
    core.run_recovery().await.unwrap();

    let TransportPair { left, right } = paired_transports();
    let (mut left_reader, mut left_writer) = left.split();
    let (right_reader, right_writer) = right.split();
    let right_writer = Arc::new(tokio::sync::Mutex::new(right_writer));
    let mut dispatcher = Dispatcher::new("meta", right_reader, right_writer, Arc::new(std::sync::Mutex::new(HashMap::new())));
    controllers::register(&mut dispatcher, Arc::clone(&core));
    tokio::spawn(dispatcher.run());

    left_writer
        .send_one(&Envelope::request(
            "FSMStartProvider",
            "test-client",
            "meta",
            "rpc-test-1",
            json!({"provider_id": "cve", "requested_permits": 5}),
        ))
        .await
        .unwrap();
    let reply = left_reader.recv_one().await.unwrap().unwrap();
    assert_eq!(reply.kind, EnvelopeType::Response);
    assert_eq!(reply.payload["success"], true);

    assert!(terminated_within(&core, "cve", 100).await);

    left_writer
        .send_one(&Envelope::request("FSMListProviders", "test-client", "meta", "rpc-test-2", json!({})))
        .await
        .unwrap();
    let reply = left_reader.recv_one().await.unwrap().unwrap();
    assert_eq!(reply.payload["count"], 1);
    assert_eq!(reply.payload["providers"][0]["state"], "TERMINATED");
}

/// Unregistered-provider errors surface as a `type=error` envelope, not a
/// dropped connection or a panic.
#[tokio::test]
async fn starting_an_unknown_provider_returns_an_error_envelope() {
    let store = Arc::new(SqliteCheckpointStore::in_memory().await.unwrap());
    let quota = Arc::new(ScriptedQuotaSource::always_zero());
    let core = Arc::new(Core::new(store, quota));
    core.run_recovery().await.unwrap();

    let TransportPair { left, right } = paired_transports();
    let (mut left_reader, mut left_writer) = left.split();
    let (right_reader, right_writer) = right.split();
    let right_writer = Arc::new(tokio::sync::Mutex::new(right_writer));
    let mut dispatcher = Dispatcher::new("meta", right_reader, right_writer, Arc::new(std::sync::Mutex::new(HashMap::new())));
    controllers::register(&mut dispatcher, Arc::clone(&core));
    tokio::spawn(dispatcher.run());

    left_writer
        .send_one(&Envelope::request(
            "FSMStartProvider",
            "test-client",
            "meta",
            "rpc-test-1",
            json!({"provider_id": "ghost"}),
        ))
        .await
        .unwrap();
    let reply = left_reader.recv_one().await.unwrap().unwrap();
    assert_eq!(reply.kind, EnvelopeType::Error);
    assert_eq!(reply.payload["kind"], "not_found");
}

/// Concurrent `StartProvider` calls for the same id produce exactly one
/// admitted job; the rest are rejected as `InvalidTransition`.
#[tokio::test]
async fn concurrent_start_calls_for_the_same_provider_admit_exactly_one() {
    let store = Arc::new(SqliteCheckpointStore::in_memory().await.unwrap());
    let quota = Arc::new(ScriptedQuotaSource::new(std::iter::repeat(5).take(16)));
    let core = Arc::new(Core::new(store, quota));
    core.register_provider("cve", "cve", vec![], 5, Arc::new(NeverFinishesExecutor)).unwrap();
    core.run_recovery().await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let core = Arc::clone(&core);
        handles.push(tokio::spawn(async move { core.start_provider("cve", 5).await }));
    }
    let results: Vec<_> = futures_join_all(handles).await;
    let ok_count = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(ok_count, 1, "exactly one concurrent StartProvider should be admitted");
}

async fn futures_join_all(handles: Vec<tokio::task::JoinHandle<CoreResult<()>>>) -> Vec<CoreResult<()>> {
    let mut out = Vec::with_capacity(handles.len());
    for handle in handles {
        out.push(handle.await.unwrap());
    }
    out
}

/// A batch of RPC calls that all time out leaves no entry behind in the
/// pending table once every caller has returned.
#[tokio::test]
async fn a_hundred_timed_out_invokes_leave_no_pending_entries() {
    // A writer nobody ever reads from: 100 small envelopes comfortably fit
    // in the 64 KiB buffer, so every `invoke` below times out waiting for
    // a reply rather than blocking on a full pipe.
    let (read_half, write_half) = tokio::io::duplex(64 * 1024);
    let (_unused_reader, client_writer) = meta_transport::Transport::new(read_half, write_half).split();
    let client = Arc::new(RpcClient::new("meta", Arc::new(tokio::sync::Mutex::new(client_writer))));

    let mut handles = Vec::new();
    for i in 0..100 {
        let client = Arc::clone(&client);
        handles.push(tokio::spawn(async move {
            let cancel = CancellationToken::new();
            client
                .invoke("ghost-service", "Whatever", json!({"i": i}), Duration::from_millis(50), &cancel)
                .await
        }));
    }
    for handle in handles {
        let result = handle.await.unwrap();
        assert!(matches!(result, Err(meta_core::CoreError::Timeout)));
    }
    assert_eq!(client.pending_handle().lock().unwrap().len(), 0);
}
