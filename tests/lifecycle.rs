#![cfg(not(loom))]
//! Opening, handshaking, expiry and disposal.

use std::{sync::Arc, time::Duration};

use rstest::rstest;
use tokio_util::sync::CancellationToken;
use wiremux::{
    Connection,
    ConnectionError,
    ConnectionObserver,
    ConnectionSettings,
    ConnectionState,
    HelloInitializer,
    RequestIds,
    handshake::HelloReply,
};
use wiremux_testing::{
    DuplexFactory,
    LoggerHandle,
    RecordingObserver,
    ScriptedPeer,
    logger,
    request_frame,
};

#[tokio::test]
async fn concurrent_opens_observe_one_outcome() {
    let (factory, _peers) = DuplexFactory::new(1024);
    let connection = Connection::new(factory, "open");
    let cancel = CancellationToken::new();

    let (a, b, c) = tokio::join!(
        connection.open(&cancel),
        connection.open(&cancel),
        connection.open(&cancel)
    );
    a.expect("open a");
    b.expect("open b");
    c.expect("open c");
    assert_eq!(connection.state(), ConnectionState::Open);
}

#[tokio::test]
async fn refused_connection_fails_every_opener_identically() {
    let connection = Connection::new(DuplexFactory::refusing(), "refused");
    let cancel = CancellationToken::new();

    let (a, b) = tokio::join!(connection.open(&cancel), connection.open(&cancel));
    let (a, b) = (a.expect_err("refused"), b.expect_err("refused"));
    assert!(matches!(a, ConnectionError::ConnectFailed(_)));
    assert_eq!(a.to_string(), b.to_string());
    assert_eq!(connection.state(), ConnectionState::Failed);

    let late = connection.open(&cancel).await.expect_err("still failed");
    assert_eq!(late.to_string(), a.to_string());
}

#[tokio::test]
async fn hello_handshake_describes_the_peer() {
    let (factory, mut peers) = DuplexFactory::new(1024);
    let ids = Arc::new(RequestIds::new());
    let connection = Connection::builder(factory, "hello")
        .initializer(HelloInitializer::new("tests", Arc::clone(&ids)))
        .build();
    let cancel = CancellationToken::new();

    let server = async {
        let mut peer = ScriptedPeer::new(peers.accept().await.expect("peer end"));
        peer.answer_hello(&HelloReply {
            connection_id: 41,
            max_message_size: 4096,
            server_version: "7.0.2".into(),
        })
        .await;
        peer
    };
    let (opened, _peer) = tokio::join!(connection.open(&cancel), server);
    opened.expect("open");

    let description = connection.description().expect("described");
    assert_eq!(description.connection_id.server, Some(41));
    assert_eq!(description.server_version.as_deref(), Some("7.0.2"));
    assert_eq!(connection.id().server, Some(41));
    assert_eq!(connection.max_frame_length(), 4096);
    assert_eq!(ids.next_id(), 2, "hello consumed the first request id");
}

#[tokio::test]
async fn failed_handshake_fails_the_open() {
    let (factory, mut peers) = DuplexFactory::new(1024);
    let connection = Connection::builder(factory, "bad hello")
        .initializer(HelloInitializer::new("tests", Arc::new(RequestIds::new())))
        .build();
    let cancel = CancellationToken::new();

    let server = async {
        let mut peer = ScriptedPeer::new(peers.accept().await.expect("peer end"));
        let hello = peer.recv().await.expect("hello").expect("valid hello");
        peer.reply_with(hello.request_id(), b"not a hello reply")
            .await
            .expect("peer write");
        peer
    };
    let (opened, _peer) = tokio::join!(connection.open(&cancel), server);

    let err = opened.expect_err("handshake rejected");
    assert!(matches!(err, ConnectionError::ConnectFailed(_)), "{err:?}");
    assert_eq!(connection.state(), ConnectionState::Failed);
    assert!(connection.description().is_none());
}

#[rstest]
#[case::lifetime(ConnectionSettings::default().with_max_lifetime(Some(Duration::from_secs(30))))]
#[case::idle(ConnectionSettings::default().with_max_idle_time(Some(Duration::from_secs(30))))]
#[tokio::test]
async fn expires_strictly_after_the_limit(#[case] settings: ConnectionSettings) {
    let (factory, _peers) = DuplexFactory::new(1024);
    let connection = Connection::builder(factory, "expiry")
        .settings(settings)
        .build();
    connection
        .open(&CancellationToken::new())
        .await
        .expect("open");

    let opened_at = connection.opened_at().expect("opened");
    let limit = Duration::from_secs(30);
    assert!(!connection.is_expired_at(opened_at + limit));
    assert!(connection.is_expired_at(opened_at + limit + Duration::from_nanos(1)));
}

#[tokio::test]
async fn unlimited_connection_expires_only_when_closed() {
    let (factory, _peers) = DuplexFactory::new(1024);
    let connection = Connection::new(factory, "forever");
    connection
        .open(&CancellationToken::new())
        .await
        .expect("open");
    let far_future = connection.opened_at().expect("opened") + Duration::from_secs(86_400 * 365);
    assert!(!connection.is_expired_at(far_future));

    connection.dispose();
    assert!(connection.is_expired());
}

#[tokio::test]
async fn successful_traffic_refreshes_last_use() {
    let (factory, mut peers) = DuplexFactory::new(1024);
    let connection = Connection::new(factory, "touch");
    let cancel = CancellationToken::new();
    connection.open(&cancel).await.expect("open");
    let _peer = peers.accept().await.expect("peer end");
    let before = connection.last_used_at().expect("set on open");

    tokio::time::sleep(Duration::from_millis(2)).await;
    connection
        .send(&[request_frame(1, 1, b"ping")], &cancel)
        .await
        .expect("send");
    assert!(connection.last_used_at().expect("touched") > before);
}

#[rstest]
#[tokio::test]
async fn dispose_is_idempotent_and_notifies_once(mut logger: LoggerHandle) {
    let (factory, mut peers) = DuplexFactory::new(1024);
    let observer = Arc::new(RecordingObserver::default());
    let connection = Connection::builder(factory, "dispose")
        .observer(Arc::clone(&observer) as Arc<dyn ConnectionObserver>)
        .build();
    let cancel = CancellationToken::new();
    connection.open(&cancel).await.expect("open");
    let mut peer = ScriptedPeer::new(peers.accept().await.expect("peer end"));

    connection.dispose();
    connection.dispose();

    assert_eq!(
        observer.events(),
        ["opening", "opened", "closing", "closed"].map(String::from)
    );
    assert!(logger.contains("connection disposed"));
    assert!(peer.recv().await.is_none(), "stream released");
    assert!(matches!(
        connection.send(&[request_frame(1, 1, b"late")], &cancel).await,
        Err(ConnectionError::AlreadyClosed)
    ));
}

#[tokio::test]
async fn dispose_during_open_wins() {
    let (factory, _peers) = DuplexFactory::new(1024);
    let ids = Arc::new(RequestIds::new());
    let connection = Connection::builder(factory, "racing")
        .initializer(HelloInitializer::new("tests", ids))
        .build();
    let cancel = CancellationToken::new();

    // Nobody answers the hello, so the open parks in the handshake.
    let (opened, ()) = tokio::join!(connection.open(&cancel), async {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
        connection.dispose();
    });

    let err = opened.expect_err("disposed while opening");
    assert!(
        matches!(
            err,
            ConnectionError::ConnectFailed(_) | ConnectionError::AlreadyClosed
        ),
        "{err:?}"
    );
    assert_eq!(connection.state(), ConnectionState::Disposed);
}
