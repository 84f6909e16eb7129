//! Integration tests driving the public patterns end to end.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use wirebus::transport::{Acceptor as _, Socket as _};
use wirebus::{
    encode_message, AnyMessage, Endpoint, MessageRegistry, Requester, Responder, Rotation,
    Routable, ServiceQueue, ServiceQueueReader, Subscriber, WirebusError, WorkUnit,
};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct TestMessage {
    seq: u32,
    text: String,
}

impl Routable for TestMessage {
    const TYPE_ID: u16 = 7;
}

fn test_message(seq: u32) -> TestMessage {
    TestMessage {
        seq,
        text: "payload".to_string(),
    }
}

fn registry() -> Arc<MessageRegistry> {
    let mut registry = MessageRegistry::new();
    registry.register::<TestMessage>();
    Arc::new(registry)
}

/// Reader that records every received sequence number.
fn recording_reader(registry: Arc<MessageRegistry>) -> (ServiceQueueReader, Arc<Mutex<Vec<u32>>>) {
    let received = Arc::new(Mutex::new(Vec::new()));
    let reader = ServiceQueueReader::new(registry);
    {
        let received = received.clone();
        reader.on_message(move |message: AnyMessage| {
            let msg = message.downcast::<TestMessage>().expect("known type");
            received.lock().unwrap().push(msg.seq);
        });
    }
    (reader, received)
}

async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

#[tokio::test]
async fn service_queue_delivers_single_frame() {
    let endpoint = Endpoint::inproc("/it-single");
    let queue = ServiceQueue::new(Rotation::FirstIdle);
    queue.bind(&endpoint).await.unwrap();

    let (reader, received) = recording_reader(registry());
    reader.connect(&endpoint).await.unwrap();

    queue.add_message_frame(encode_message(&test_message(42)).unwrap());

    assert!(
        wait_until(Duration::from_secs(1), || received.lock().unwrap().len() == 1).await,
        "frame should be delivered within a second"
    );
    assert_eq!(received.lock().unwrap()[0], 42);
}

#[tokio::test]
async fn service_queue_stores_frames_added_before_bind() {
    let endpoint = Endpoint::inproc("/it-early");
    let queue = ServiceQueue::new(Rotation::FirstIdle);

    // Frame goes in before any endpoint is bound, let alone a worker
    // connected; it must be retained.
    queue.add_message_frame(encode_message(&test_message(1)).unwrap());

    queue.bind(&endpoint).await.unwrap();
    let (reader, received) = recording_reader(registry());
    reader.connect(&endpoint).await.unwrap();

    assert!(
        wait_until(Duration::from_secs(1), || received.lock().unwrap().len() == 1).await,
        "stored frame should reach the first worker"
    );
}

#[tokio::test]
async fn service_queue_store_and_forward_preserves_order() {
    let endpoint = Endpoint::inproc("/it-order");
    let queue = ServiceQueue::new(Rotation::FirstIdle);
    queue.bind(&endpoint).await.unwrap();

    for seq in 0..50 {
        queue.add_message_frame(encode_message(&test_message(seq)).unwrap());
    }

    let (reader, received) = recording_reader(registry());
    reader.connect(&endpoint).await.unwrap();

    assert!(
        wait_until(Duration::from_secs(5), || received.lock().unwrap().len() == 50).await,
        "all stored frames should be delivered"
    );
    let seqs = received.lock().unwrap().clone();
    assert_eq!(seqs, (0..50).collect::<Vec<_>>());
}

#[tokio::test]
async fn service_queue_reader_survives_reconnect() {
    let endpoint = Endpoint::inproc("/it-reconnect");
    let queue = ServiceQueue::new(Rotation::FirstIdle);
    queue.bind(&endpoint).await.unwrap();

    let (reader, received) = recording_reader(registry());
    reader.connect(&endpoint).await.unwrap();

    queue.add_message_frame(encode_message(&test_message(1)).unwrap());
    assert!(wait_until(Duration::from_secs(1), || received.lock().unwrap().len() == 1).await);

    reader.disconnect().await.unwrap();
    assert!(
        wait_until(Duration::from_secs(1), || queue.worker_count() == 0).await,
        "queue should notice the worker leaving"
    );

    reader.connect(&endpoint).await.unwrap();
    queue.add_message_frame(encode_message(&test_message(2)).unwrap());

    assert!(
        wait_until(Duration::from_secs(1), || received.lock().unwrap().len() == 2).await,
        "reconnected reader should resume receiving"
    );
    assert_eq!(received.lock().unwrap().clone(), vec![1, 2]);
}

#[tokio::test]
async fn load_balance_shares_preloaded_frames_between_workers() {
    const N: u32 = 1000;
    let endpoint = Endpoint::inproc("/it-fairness");
    let queue = ServiceQueue::new(Rotation::LoadBalance);
    queue.bind(&endpoint).await.unwrap();

    for seq in 0..N {
        queue.add_message_frame(encode_message(&test_message(seq)).unwrap());
    }

    let (reader_a, received_a) = recording_reader(registry());
    let (reader_b, received_b) = recording_reader(registry());
    reader_a.connect(&endpoint).await.unwrap();
    reader_b.connect(&endpoint).await.unwrap();

    assert!(
        wait_until(Duration::from_secs(15), || {
            received_a.lock().unwrap().len() + received_b.lock().unwrap().len() == N as usize
        })
        .await,
        "every frame should be delivered exactly once"
    );

    let a: Vec<u32> = received_a.lock().unwrap().clone();
    let b: Vec<u32> = received_b.lock().unwrap().clone();

    let mut seen: HashSet<u32> = HashSet::new();
    for seq in a.iter().chain(b.iter()) {
        assert!(seen.insert(*seq), "sequence {seq} delivered twice");
    }
    assert_eq!(seen.len(), N as usize);

    let quarter = (N / 4) as usize;
    assert!(
        a.len() > quarter && a.len() < 3 * quarter,
        "unbalanced split: {} vs {}",
        a.len(),
        b.len()
    );
}

#[tokio::test]
async fn load_balance_shares_across_two_endpoints() {
    const N: u32 = 1000;
    let p1 = Endpoint::inproc("/it-share-p1");
    let p2 = Endpoint::inproc("/it-share-p2");
    let queue = ServiceQueue::new(Rotation::LoadBalance);
    queue.bind(&p1).await.unwrap();
    queue.bind(&p2).await.unwrap();

    let (reader_a, received_a) = recording_reader(registry());
    let (reader_b, received_b) = recording_reader(registry());
    reader_a.connect(&p1).await.unwrap();
    reader_b.connect(&p2).await.unwrap();

    assert!(
        wait_until(Duration::from_secs(2), || queue.worker_count() == 2).await,
        "both workers should join"
    );

    for seq in 0..N {
        queue.add_message_frame(encode_message(&test_message(seq)).unwrap());
    }

    assert!(
        wait_until(Duration::from_secs(15), || {
            received_a.lock().unwrap().len() + received_b.lock().unwrap().len() == N as usize
        })
        .await,
        "every frame should be delivered exactly once"
    );

    let count_a = received_a.lock().unwrap().len();
    let count_b = received_b.lock().unwrap().len();
    assert!(count_a > 0 && count_b > 0);

    let quarter = (N / 4) as usize;
    assert!(
        count_a > quarter && count_a < 3 * quarter,
        "unbalanced split: {count_a} vs {count_b}"
    );
}

#[tokio::test]
async fn first_idle_delivers_all_frames_across_workers() {
    const N: u32 = 100;
    let endpoint = Endpoint::inproc("/it-firstidle-total");
    let queue = ServiceQueue::new(Rotation::FirstIdle);
    queue.bind(&endpoint).await.unwrap();

    let (reader_a, received_a) = recording_reader(registry());
    let (reader_b, received_b) = recording_reader(registry());
    reader_a.connect(&endpoint).await.unwrap();
    reader_b.connect(&endpoint).await.unwrap();

    for seq in 0..N {
        queue.add_message_frame(encode_message(&test_message(seq)).unwrap());
    }

    assert!(
        wait_until(Duration::from_secs(10), || {
            received_a.lock().unwrap().len() + received_b.lock().unwrap().len() == N as usize
        })
        .await,
        "no frame may be lost or duplicated"
    );

    let mut seen: HashSet<u32> = HashSet::new();
    for seq in received_a
        .lock()
        .unwrap()
        .iter()
        .chain(received_b.lock().unwrap().iter())
    {
        assert!(seen.insert(*seq));
    }
    assert_eq!(seen.len(), N as usize);
}

fn echo_factory() -> impl Fn(AnyMessage) -> Box<dyn WorkUnit> + Send + Sync + 'static {
    |request: AnyMessage| -> Box<dyn WorkUnit> {
        let message = request
            .downcast::<TestMessage>()
            .cloned()
            .expect("request type is registered");
        Box::new(move || encode_message(&message))
    }
}

#[tokio::test]
async fn request_response_echo_round_trip() {
    let endpoint = Endpoint::inproc("/it-echo");
    let responder = Responder::new(registry(), echo_factory(), 1, 4).unwrap();
    responder.bind(&endpoint).await.unwrap();

    let requester = Requester::new(registry());
    requester.connect(&endpoint).await.unwrap();

    let request = test_message(99);
    let response = tokio::time::timeout(Duration::from_secs(1), requester.request(&request))
        .await
        .expect("request should complete within a second")
        .unwrap();

    assert_eq!(response.downcast::<TestMessage>().unwrap(), &request);
}

#[tokio::test]
async fn request_response_echo_over_tcp() {
    let endpoint: Endpoint = "tcp://127.0.0.1:47311".parse().unwrap();
    let responder = Responder::new(registry(), echo_factory(), 1, 2).unwrap();
    responder.bind(&endpoint).await.unwrap();

    let requester = Requester::new(registry());
    requester.connect(&endpoint).await.unwrap();

    for seq in 0..5 {
        let request = test_message(seq);
        let response = tokio::time::timeout(Duration::from_secs(1), requester.request(&request))
            .await
            .expect("request should complete")
            .unwrap();
        assert_eq!(response.downcast::<TestMessage>().unwrap(), &request);
    }
}

#[tokio::test]
async fn requester_disconnect_cancels_inflight_request() {
    // An acceptor that never answers keeps the request in flight.
    let endpoint = Endpoint::inproc("/it-cancel");
    let acceptor = wirebus::transport::bind(&endpoint).await.unwrap();
    let accepted = tokio::spawn(async move { acceptor.accept().await });

    let requester = Arc::new(Requester::new(registry()));
    requester.connect(&endpoint).await.unwrap();
    let _server_socket = accepted.await.unwrap().unwrap();

    let pending = {
        let requester = requester.clone();
        tokio::spawn(async move { requester.request(&test_message(1)).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    tokio::time::timeout(Duration::from_secs(1), requester.disconnect(true))
        .await
        .expect("disconnect should not hang")
        .unwrap();

    let outcome = pending.await.unwrap();
    assert!(matches!(outcome, Err(WirebusError::Cancelled)));
}

#[tokio::test]
async fn publisher_preserves_broadcast_order_per_subscriber() {
    const N: u32 = 200;
    let endpoint = Endpoint::inproc("/it-pubsub");
    let publisher = wirebus::Publisher::new();
    publisher.bind(&endpoint).await.unwrap();

    let received = Arc::new(Mutex::new(Vec::new()));
    let subscriber = Subscriber::new(registry());
    {
        let received = received.clone();
        subscriber.on_message(move |message| {
            let msg = message.downcast::<TestMessage>().expect("known type");
            received.lock().unwrap().push(msg.seq);
        });
    }
    subscriber.connect(&endpoint).await.unwrap();

    assert!(
        wait_until(Duration::from_secs(2), || publisher.subscriber_count() == 1).await,
        "publisher should see the subscriber"
    );

    for seq in 0..N {
        publisher.broadcast(&test_message(seq)).unwrap();
    }

    assert!(
        wait_until(Duration::from_secs(5), || {
            received.lock().unwrap().len() == N as usize
        })
        .await,
        "every broadcast should arrive"
    );
    assert_eq!(received.lock().unwrap().clone(), (0..N).collect::<Vec<_>>());
}

#[tokio::test]
async fn repeated_disconnects_fire_one_client_event() {
    let endpoint = Endpoint::inproc("/it-idempotent");
    let disconnects = Arc::new(AtomicUsize::new(0));

    let responder = Responder::new(registry(), echo_factory(), 1, 2).unwrap();
    {
        let disconnects = disconnects.clone();
        responder.on_client_disconnected(move |_| {
            disconnects.fetch_add(1, Ordering::AcqRel);
        });
    }
    responder.bind(&endpoint).await.unwrap();

    let socket = wirebus::transport::connect(&endpoint).await.unwrap();
    assert!(wait_until(Duration::from_secs(1), || responder.client_count() == 1).await);

    socket.disconnect();
    socket.disconnect();
    socket.disconnect();

    assert!(
        wait_until(Duration::from_secs(1), || responder.client_count() == 0).await,
        "responder should drop the client"
    );
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(disconnects.load(Ordering::Acquire), 1);
}

#[tokio::test]
async fn responder_reports_client_connections() {
    let endpoint = Endpoint::inproc("/it-client-events");
    let (tx, mut rx) = mpsc::unbounded_channel();

    let responder = Responder::new(registry(), echo_factory(), 1, 2).unwrap();
    responder.on_client_connected(move |client_endpoint| {
        let _ = tx.send(client_endpoint);
    });
    responder.bind(&endpoint).await.unwrap();

    let requester = Requester::new(registry());
    requester.connect(&endpoint).await.unwrap();

    let connected = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("connected event should fire")
        .unwrap();
    assert_eq!(connected, endpoint);
}
