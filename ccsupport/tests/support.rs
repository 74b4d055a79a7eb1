//! Integration tests for inbound chaincode connections and definition lookup.

use std::sync::Arc;
use std::time::Duration;

use ccsupport::shim;
use ccsupport::{
    ChaincodeError, ChaincodeMessage, ChaincodeStream, ChaincodeSupport, ChannelStream,
    FramedStream, LedgerLifecycle, MessageKind, SupportConfig, WorkerStatus,
};
use ccsupport_shared::constants::LIFECYCLE_NAMESPACE;
use ccsupport_shared::protocol::ChaincodeId;
use ccsupport_test_utils::{
    CC_NAME, FakeRuntime, MemoryPackages, MemoryQuery, TestChaincode, TestContext, args, cc1,
    cc1_definition, cc1_key, params, wait_until,
};
use prost::Message;
use tempfile::TempDir;
use tokio::net::{TcpListener, TcpStream};

// ============================================================================
// TEST FIXTURES
// ============================================================================

/// Broker that accepts chaincodes started by hand.
fn dev_mode() -> TestContext {
    TestContext::with_config(FakeRuntime::connecting(CC_NAME, Arc::new(TestChaincode)), |config| {
        config.user_runs_cc = true;
    })
}

/// Serve one in-memory connection on the broker, returning the chaincode end.
fn connect(support: &ChaincodeSupport) -> ChannelStream {
    let (peer, chaincode) = ChannelStream::pair();
    let support = support.clone();
    tokio::spawn(async move { support.handle_incoming_connection(Arc::new(peer)).await });
    chaincode
}

fn register_message(name: &str, version: &str) -> ChaincodeMessage {
    let id = ChaincodeId {
        name: name.into(),
        version: version.into(),
        ..Default::default()
    };
    ChaincodeMessage::new(MessageKind::Register, "", "", id.encode_to_vec())
}

async fn recv_kind(stream: &ChannelStream) -> MessageKind {
    let msg = tokio::time::timeout(Duration::from_secs(2), stream.recv())
        .await
        .expect("no message within 2s")
        .unwrap()
        .expect("stream closed");
    msg.message_kind().unwrap()
}

// ============================================================================
// REGISTRATION TESTS
// ============================================================================

#[tokio::test]
async fn user_started_chaincode_serves_without_launch() {
    let ctx = dev_mode();
    let chaincode = connect(&ctx.support);
    tokio::spawn(shim::start(chaincode, cc1_key(), Arc::new(TestChaincode)));

    let registry = ctx.support.registry().clone();
    wait_until(|| registry.handler(&cc1_key()).is_some()).await;

    let result = ctx
        .support
        .invoke(&params("tx1"), &cc1(), args(&["echo", "by hand"]))
        .await
        .unwrap();
    assert_eq!(result.response.payload, b"by hand");
    assert_eq!(ctx.runtime.starts(), 0);
}

#[tokio::test]
async fn unsolicited_registration_is_rejected() {
    let ctx = TestContext::connecting();
    let chaincode = connect(&ctx.support);

    let err = shim::start(chaincode, cc1_key(), Arc::new(TestChaincode))
        .await
        .unwrap_err();

    assert!(matches!(err, ChaincodeError::Protocol(ref msg) if msg.contains("rejected")));
    assert!(!ctx.support.registry().contains(&cc1_key()));
}

#[tokio::test]
async fn duplicate_registration_is_rejected() {
    let ctx = dev_mode();
    tokio::spawn(shim::start(connect(&ctx.support), cc1_key(), Arc::new(TestChaincode)));
    let registry = ctx.support.registry().clone();
    wait_until(|| registry.handler(&cc1_key()).is_some()).await;
    let first = registry.handler(&cc1_key()).unwrap();

    let result = shim::start(connect(&ctx.support), cc1_key(), Arc::new(TestChaincode)).await;

    assert!(result.is_err());
    assert!(Arc::ptr_eq(&first, &registry.handler(&cc1_key()).unwrap()));
}

#[tokio::test]
async fn register_carries_name_and_version_fields() {
    let ctx = dev_mode();
    let chaincode = connect(&ctx.support);

    chaincode.send(register_message("cc1", "v1")).await.unwrap();
    assert_eq!(recv_kind(&chaincode).await, MessageKind::Registered);
    assert_eq!(recv_kind(&chaincode).await, MessageKind::Ready);

    let registry = ctx.support.registry().clone();
    wait_until(|| registry.status(&cc1_key()) == WorkerStatus::Ready).await;
    assert_eq!(ctx.support.handler_metrics().registrations_total(), 1);
}

#[tokio::test]
async fn message_before_register_ends_connection() {
    let ctx = dev_mode();
    let (peer, chaincode) = ChannelStream::pair();

    chaincode
        .send(ChaincodeMessage::new(MessageKind::Transaction, "tx1", "ch1", Vec::new()))
        .await
        .unwrap();
    let err = ctx
        .support
        .handle_incoming_connection(Arc::new(peer))
        .await
        .unwrap_err();

    assert!(matches!(err, ChaincodeError::Protocol(_)));
    assert!(ctx.support.registry().ready_keys().is_empty());
}

#[tokio::test]
async fn disconnect_after_ready_deregisters() {
    let ctx = dev_mode();
    let chaincode = connect(&ctx.support);
    chaincode.send(register_message("cc1:v1", "")).await.unwrap();
    assert_eq!(recv_kind(&chaincode).await, MessageKind::Registered);
    assert_eq!(recv_kind(&chaincode).await, MessageKind::Ready);

    let registry = ctx.support.registry().clone();
    wait_until(|| registry.contains(&cc1_key())).await;
    drop(chaincode);

    wait_until(|| !registry.contains(&cc1_key())).await;
    assert_eq!(ctx.support.status(&cc1_key()), WorkerStatus::Unregistered);
}

#[tokio::test]
async fn keepalive_is_sent_when_configured() {
    let ctx = TestContext::with_config(
        FakeRuntime::connecting(CC_NAME, Arc::new(TestChaincode)),
        |config| {
            config.user_runs_cc = true;
            config.keepalive_ms = 50;
        },
    );
    let chaincode = connect(&ctx.support);
    chaincode.send(register_message("cc1", "v1")).await.unwrap();
    assert_eq!(recv_kind(&chaincode).await, MessageKind::Registered);
    assert_eq!(recv_kind(&chaincode).await, MessageKind::Ready);

    assert_eq!(recv_kind(&chaincode).await, MessageKind::Keepalive);
}

// ============================================================================
// TCP ACCEPTOR TESTS
// ============================================================================

#[tokio::test]
async fn tcp_connection_is_served_with_framing() {
    let ctx = dev_mode();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let acceptor = ctx.support.acceptor();
    let server = tokio::spawn(async move {
        acceptor
            .serve(listener, async move {
                let _ = shutdown_rx.await;
            })
            .await
    });

    let socket = TcpStream::connect(addr).await.unwrap();
    tokio::spawn(shim::start(
        FramedStream::new(socket),
        cc1_key(),
        Arc::new(TestChaincode),
    ));
    let registry = ctx.support.registry().clone();
    wait_until(|| registry.handler(&cc1_key()).is_some()).await;

    let result = ctx
        .support
        .invoke(&params("tx1"), &cc1(), args(&["divide", "9", "3"]))
        .await
        .unwrap();
    assert_eq!(result.response.payload, b"3");

    shutdown_tx.send(()).unwrap();
    server.await.unwrap().unwrap();
}

// ============================================================================
// LEDGER DEFINITION TESTS
// ============================================================================

#[tokio::test]
async fn ledger_definitions_are_read_through_the_transaction_query() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config = SupportConfig {
        startup_timeout_ms: 2_000,
        execute_timeout_ms: 2_000,
        work_dir: temp_dir.path().to_path_buf(),
        ..Default::default()
    };
    let runtime = Arc::new(FakeRuntime::connecting(CC_NAME, Arc::new(TestChaincode)));
    let support = ChaincodeSupport::new(
        config,
        runtime.clone(),
        Arc::new(LedgerLifecycle::new()),
        Arc::new(MemoryPackages::default().with_package(cc1_key(), b"cc1 package")),
    )
    .unwrap();
    runtime.bind(support.acceptor());

    let err = support
        .invoke(&params("tx1"), &cc1(), args(&["echo", "x"]))
        .await
        .unwrap_err();
    assert!(matches!(err, ChaincodeError::DefinitionNotFound { .. }));

    let query = Arc::new(MemoryQuery::default());
    query.put(
        LIFECYCLE_NAMESPACE,
        &LedgerLifecycle::definition_key(CC_NAME),
        serde_json::to_vec(&cc1_definition()).unwrap(),
    );
    let result = support
        .invoke(&params("tx2").with_query(query), &cc1(), args(&["echo", "ledger"]))
        .await
        .unwrap();

    assert_eq!(result.response.payload, b"ledger");
    assert_eq!(runtime.starts(), 1);
}

#[test]
fn invalid_config_is_rejected() {
    let runtime = Arc::new(FakeRuntime::connecting(CC_NAME, Arc::new(TestChaincode)));
    let config = SupportConfig {
        execute_timeout_ms: 0,
        ..Default::default()
    };

    let result = ChaincodeSupport::new(
        config,
        runtime,
        Arc::new(LedgerLifecycle::new()),
        Arc::new(MemoryPackages::default()),
    );
    assert!(matches!(result, Err(ChaincodeError::Config(_))));
}
