use cereal_lease::{Cereal, CerealConfig, LockServer, Timeout};
use cereal_wire::{
    Client, Frame, Gateway, KeyedDigest, Listener, Request, Response, TokioTransport, Transport,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

const KEY: &str = "shared-secret";
const LONG: Duration = Duration::from_secs(30);

async fn start() -> (SocketAddr, Arc<Cereal>) {
    let cereal = Arc::new(
        Cereal::new(
            CerealConfig::builder()
                .system("wire")
                .default_wait_timeout(Duration::from_millis(100))
                .build(),
        )
        .unwrap(),
    );
    let server: Arc<dyn LockServer> = cereal.clone();
    let listener = Listener::bind("127.0.0.1:0", server, Gateway::new(KeyedDigest::new(KEY)))
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(listener.serve());
    (addr, cereal)
}

async fn client(addr: SocketAddr, context: u16) -> Client<TokioTransport> {
    let transport = TokioTransport::connect(addr).await.expect("Failed to connect");
    Client::new(transport, KeyedDigest::new(KEY), context)
}

#[tokio::test(flavor = "multi_thread")]
async fn test_lock_and_release_over_tcp() {
    let (addr, cereal) = start().await;
    let mut alice = client(addr, 1).await;

    let Response::Granted(grain) = alice.lock("alice", "A", LONG, Timeout::Forever).await.unwrap()
    else {
        panic!("expected a grant");
    };
    assert_eq!(grain.subject(), "alice");
    assert_eq!(grain.resource(), "A");
    assert!(cereal.is_held("A"));

    assert_eq!(alice.release(&grain).await.unwrap(), Response::Released);
    assert!(!cereal.is_held("A"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_contended_lock_times_out() {
    let (addr, _cereal) = start().await;
    let mut alice = client(addr, 1).await;
    let mut bob = client(addr, 2).await;

    let Response::Granted(grain) = alice.lock("alice", "A", LONG, Timeout::Forever).await.unwrap()
    else {
        panic!("expected a grant");
    };

    let missed = bob.lock("bob", "A", LONG, Timeout::Default).await.unwrap();
    assert_eq!(missed, Response::TimedOut);

    assert_eq!(alice.release(&grain).await.unwrap(), Response::Released);
    let Response::Granted(next) = bob.lock("bob", "A", LONG, Timeout::Forever).await.unwrap()
    else {
        panic!("expected a grant after release");
    };
    assert_eq!(next.subject(), "bob");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_waiter_is_served_while_connection_blocks() {
    let (addr, _cereal) = start().await;
    let mut alice = client(addr, 1).await;
    let mut bob = client(addr, 2).await;

    let Response::Granted(grain) = alice.lock("alice", "A", LONG, Timeout::Forever).await.unwrap()
    else {
        panic!("expected a grant");
    };

    let waiting =
        tokio::spawn(async move { bob.lock("bob", "A", LONG, Timeout::Forever).await.unwrap() });
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(alice.release(&grain).await.unwrap(), Response::Released);

    let Response::Granted(next) = waiting.await.unwrap() else {
        panic!("expected the waiter to be served");
    };
    assert_eq!(next.subject(), "bob");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_forged_signature_is_rejected() {
    let (addr, cereal) = start().await;
    let mut mallory = Client::new(
        TokioTransport::connect(addr).await.unwrap(),
        KeyedDigest::new("guessed"),
        7,
    );

    let response = mallory.lock("mallory", "A", LONG, Timeout::Forever).await.unwrap();
    assert!(matches!(response, Response::Rejected(_)));
    assert!(!cereal.is_held("A"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_garbage_frame_keeps_connection_open() {
    let (addr, _cereal) = start().await;
    let mut transport = TokioTransport::connect(addr).await.unwrap();

    transport.send_frame(&[1, 0]).await.unwrap();
    let reply = transport.recv_frame().await.unwrap().unwrap();
    assert!(matches!(
        Response::decode(reply).unwrap(),
        Response::Rejected(_)
    ));

    // Same connection still answers a well-formed request.
    let digest = KeyedDigest::new(KEY);
    let payload = Request::Lock {
        subject: "alice".into(),
        resource: "B".into(),
        timeout: Timeout::Forever,
        duration: LONG,
    }
    .encode()
    .unwrap();
    let frame = Frame::new(3, payload.clone())
        .with_signature(digest.sign(&payload, 3).to_vec())
        .encode()
        .unwrap();
    transport.send_frame(&frame).await.unwrap();
    let reply = transport.recv_frame().await.unwrap().unwrap();
    assert!(matches!(
        Response::decode(reply).unwrap(),
        Response::Granted(_)
    ));
}
