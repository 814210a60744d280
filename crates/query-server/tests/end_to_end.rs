//! Socket-level scenarios driven against a real `zmq::Context`: the worker
//! binds real TCP sockets and a `DEALER` client exercises it the way an
//! actual caller would. Unit tests elsewhere cover handler and codec logic
//! in isolation; these cover the wiring between worker, registry,
//! subscription manager, and event bridges that only a live socket can
//! exercise.

use std::sync::Arc;
use std::time::Duration;

use query_proto::payloads::{SubscribeKind, SubscribeRequest};
use query_proto::{decode_response, encode_request};
use query_server::core::node::mock::MockNode;
use query_server::core::node::{BlockEvent, Transaction, TxOutput};
use query_server::core::worker::WorkerSettings;
use query_server::core::{self, HandlerContext, Publisher, Registry, RequestWorker, SendQueue, SubscriptionManager};

struct Harness {
    worker: RequestWorker,
    node: Arc<MockNode>,
    query_endpoint: String,
}

fn start_harness(
    query_port: u16,
    heartbeat_port: u16,
    block_port: u16,
    transaction_port: u16,
    subscription_limit: usize,
    subscription_expiration: Duration,
) -> Harness {
    let zmq_context = zmq::Context::new();
    let node = Arc::new(MockNode::default());
    let node_dyn: Arc<dyn core::Node> = node.clone();

    let publisher = Arc::new(
        Publisher::bind(
            &zmq_context,
            &format!("tcp://127.0.0.1:{block_port}"),
            &format!("tcp://127.0.0.1:{transaction_port}"),
        )
        .expect("publisher should bind"),
    );

    let (send_queue, wakeup_pull_socket) =
        SendQueue::new(&zmq_context, 1000).expect("send queue should be created");
    let send_queue = Arc::new(send_queue);

    let subscriptions =
        SubscriptionManager::start(send_queue.clone(), subscription_limit, subscription_expiration);

    core::events::spawn_block_bridge(node_dyn.block_events(), publisher.clone(), subscriptions.clone());
    core::events::spawn_transaction_bridge(node_dyn.transaction_events(), publisher.clone());

    let mut registry = Registry::new();
    core::handlers::register_all(&mut registry);

    let handler_context = Arc::new(HandlerContext { node: node_dyn.clone(), subscriptions });

    let query_endpoint = format!("tcp://127.0.0.1:{query_port}");
    let settings = WorkerSettings {
        query_endpoint: query_endpoint.clone(),
        heartbeat_endpoint: format!("tcp://127.0.0.1:{heartbeat_port}"),
        polling_interval: Duration::from_millis(20),
        heartbeat_interval: Duration::from_secs(3600),
        server_certificate: None,
        accepted_client_keys: None,
        whitelisted_ips: Vec::new(),
    };

    let worker = RequestWorker::start(
        zmq_context,
        settings,
        send_queue,
        wakeup_pull_socket,
        registry,
        handler_context,
        tokio::runtime::Handle::current(),
    )
    .expect("worker should start");

    Harness { worker, node, query_endpoint }
}

fn connect_client(context: &zmq::Context, endpoint: &str) -> zmq::Socket {
    let socket = context.socket(zmq::DEALER).expect("socket should be created");
    socket.set_rcvtimeo(2000).unwrap();
    socket.set_sndtimeo(2000).unwrap();
    socket.set_linger(0).unwrap();
    socket.connect(endpoint).expect("client should connect");
    socket
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn echo_correlation_round_trips_request_id() {
    let harness = start_harness(19101, 19102, 19103, 19104, 1000, Duration::from_secs(600));
    let context = zmq::Context::new();
    let client = connect_client(&context, &harness.query_endpoint);

    client
        .send_multipart(encode_request("blockchain.fetch_last_height", 0xDEAD_BEEF, &[]), 0)
        .unwrap();

    let response = decode_response(&client.recv_multipart(0).unwrap()).unwrap();
    assert_eq!(response.id, 0xDEAD_BEEF);
    assert_eq!(response.command, "blockchain.fetch_last_height");
    assert_eq!(&response.payload[0..4], &0u32.to_le_bytes());
    assert_eq!(&response.payload[4..8], &0u32.to_le_bytes());

    harness.worker.stop();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn malformed_frame_group_is_dropped_without_a_reply() {
    let harness = start_harness(19111, 19112, 19113, 19114, 1000, Duration::from_secs(600));
    let context = zmq::Context::new();
    let client = connect_client(&context, &harness.query_endpoint);
    client.set_rcvtimeo(300).unwrap();

    // Command and id only; no payload frame at all, so the worker's
    // decode_request fails and the request is dropped silently (§4.4).
    client
        .send_multipart(
            vec![b"blockchain.fetch_last_height".to_vec(), 1u32.to_le_bytes().to_vec()],
            0,
        )
        .unwrap();

    let err = client.recv_multipart(0).unwrap_err();
    assert_eq!(err, zmq::Error::EAGAIN);

    harness.worker.stop();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn subscribe_then_receive_notification_on_matching_block_event() {
    let harness = start_harness(19121, 19122, 19123, 19124, 1000, Duration::from_secs(600));
    let context = zmq::Context::new();
    let client = connect_client(&context, &harness.query_endpoint);

    let subscribe_payload =
        SubscribeRequest { kind: SubscribeKind::Address, bitsize: 8, prefix_bytes: vec![0xAB] }.encode();
    client.send_multipart(encode_request("subscribe", 7, &subscribe_payload), 0).unwrap();
    let ack = decode_response(&client.recv_multipart(0).unwrap()).unwrap();
    assert_eq!(ack.command, "subscribe");
    assert_eq!(&ack.payload[0..4], &0u32.to_le_bytes());

    let mut address_hash = [0u8; 20];
    address_hash[0] = 0xAB;
    harness.node.emit_block(BlockEvent {
        height: 777,
        hash: [0x11; 32],
        raw: Vec::new(),
        added: vec![Transaction {
            hash: [0x22; 32],
            raw: b"tx-bytes".to_vec(),
            outputs: vec![TxOutput { address_hash: Some(address_hash), stealth_prefix: None }],
        }],
        removed: Vec::new(),
    });

    let notification = decode_response(&client.recv_multipart(0).unwrap()).unwrap();
    assert_eq!(notification.command, "address.update");
    assert_eq!(notification.id, 7);
    assert_eq!(&notification.payload[0..4], &0u32.to_le_bytes());
    assert_eq!(&notification.payload[4..8], &777u32.to_le_bytes());
    assert_eq!(&notification.payload[40..], b"tx-bytes");

    harness.worker.stop();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn subscription_limit_is_enforced_over_the_wire() {
    let harness = start_harness(19131, 19132, 19133, 19134, 1, Duration::from_secs(600));
    let context = zmq::Context::new();
    let client = connect_client(&context, &harness.query_endpoint);

    let first =
        SubscribeRequest { kind: SubscribeKind::Address, bitsize: 8, prefix_bytes: vec![1] }.encode();
    client.send_multipart(encode_request("subscribe", 1, &first), 0).unwrap();
    let first_reply = decode_response(&client.recv_multipart(0).unwrap()).unwrap();
    assert_eq!(&first_reply.payload[0..4], &0u32.to_le_bytes());

    let second =
        SubscribeRequest { kind: SubscribeKind::Address, bitsize: 8, prefix_bytes: vec![2] }.encode();
    client.send_multipart(encode_request("subscribe", 2, &second), 0).unwrap();
    let second_reply = decode_response(&client.recv_multipart(0).unwrap()).unwrap();
    assert_eq!(&second_reply.payload[0..4], &2u32.to_le_bytes());

    harness.worker.stop();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_clients_each_get_their_own_response_routed_back() {
    let harness = start_harness(19141, 19142, 19143, 19144, 1000, Duration::from_secs(600));
    let context = zmq::Context::new();

    let client_a = connect_client(&context, &harness.query_endpoint);
    let client_b = connect_client(&context, &harness.query_endpoint);

    client_a.send_multipart(encode_request("blockchain.fetch_last_height", 100, &[]), 0).unwrap();
    client_b.send_multipart(encode_request("blockchain.fetch_last_height", 200, &[]), 0).unwrap();

    let response_a = decode_response(&client_a.recv_multipart(0).unwrap()).unwrap();
    let response_b = decode_response(&client_b.recv_multipart(0).unwrap()).unwrap();

    assert_eq!(response_a.id, 100);
    assert_eq!(response_b.id, 200);

    harness.worker.stop();
}
