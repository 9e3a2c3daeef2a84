//! Unit tests for the connection facade over in-memory streams.

use std::{
    io,
    sync::{
        Arc,
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use rstest::{fixture, rstest};
use tokio::io::DuplexStream;
use tokio_util::sync::CancellationToken;

use super::*;
use crate::{
    codec,
    frame::{Frame, FrameHeader},
};

/// Hands out one end of a pre-made duplex pipe, once.
struct PipeFactory {
    stream: Mutex<Option<DuplexStream>>,
    calls: AtomicUsize,
}

#[async_trait]
impl StreamFactory for PipeFactory {
    type Endpoint = &'static str;
    type Stream = DuplexStream;

    async fn create_stream(
        &self,
        _endpoint: &&'static str,
        _cancel: &CancellationToken,
    ) -> io::Result<DuplexStream> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        self.stream
            .lock()
            .expect("factory lock")
            .take()
            .ok_or_else(|| io::Error::from(io::ErrorKind::ConnectionRefused))
    }
}

/// Never finishes connecting.
struct StalledFactory;

#[async_trait]
impl StreamFactory for StalledFactory {
    type Endpoint = &'static str;
    type Stream = DuplexStream;

    async fn create_stream(
        &self,
        _endpoint: &&'static str,
        _cancel: &CancellationToken,
    ) -> io::Result<DuplexStream> {
        std::future::pending().await
    }
}

#[derive(Default)]
struct Recorder(Mutex<Vec<String>>);

impl ConnectionObserver for Recorder {
    fn on_event(&self, _connection: ConnectionId, event: &ConnectionEvent<'_>) {
        self.0.lock().expect("recorder lock").push(event.to_string());
    }
}

impl Recorder {
    fn count(&self, name: &str) -> usize {
        self.0
            .lock()
            .expect("recorder lock")
            .iter()
            .filter(|event| *event == name)
            .count()
    }
}

struct Harness {
    connection: Connection<PipeFactory>,
    peer: DuplexStream,
    recorder: Arc<Recorder>,
}

#[fixture]
fn harness() -> Harness {
    let (client, peer) = tokio::io::duplex(4096);
    let recorder = Arc::new(Recorder::default());
    let factory = PipeFactory {
        stream: Mutex::new(Some(client)),
        calls: AtomicUsize::new(0),
    };
    let connection = Connection::builder(factory, "pipe")
        .observer(Arc::clone(&recorder) as Arc<dyn ConnectionObserver>)
        .build();
    Harness {
        connection,
        peer,
        recorder,
    }
}

fn reply(response_to: i32) -> Frame {
    Frame::build(FrameHeader::reply(100 + response_to, response_to, 1), b"reply").expect("frame")
}

#[rstest]
#[tokio::test]
async fn traffic_before_open_is_rejected(harness: Harness) {
    let cancel = CancellationToken::new();
    let err = harness
        .connection
        .receive(1, &cancel)
        .await
        .expect_err("not open");
    assert!(matches!(err, ConnectionError::NotOpen(ConnectionState::Initial)));
    let err = harness
        .connection
        .send(&[reply(1)], &cancel)
        .await
        .expect_err("not open");
    assert!(matches!(err, ConnectionError::NotOpen(ConnectionState::Initial)));
}

#[rstest]
#[tokio::test]
async fn concurrent_opens_share_one_attempt(harness: Harness) {
    let cancel = CancellationToken::new();
    let (a, b) = tokio::join!(
        harness.connection.open(&cancel),
        harness.connection.open(&cancel)
    );
    a.expect("first open");
    b.expect("second open");
    assert_eq!(harness.connection.factory.calls.load(Ordering::SeqCst), 1);
    assert_eq!(harness.connection.state(), ConnectionState::Open);
    assert_eq!(harness.recorder.count("opened"), 1);
    assert!(harness.connection.opened_at().is_some());
}

#[tokio::test]
async fn failed_open_is_shared_and_final() {
    let factory = PipeFactory {
        stream: Mutex::new(None),
        calls: AtomicUsize::new(0),
    };
    let connection = Connection::new(factory, "nowhere");
    let cancel = CancellationToken::new();

    let first = connection.open(&cancel).await.expect_err("refused");
    let second = connection.open(&cancel).await.expect_err("still refused");
    assert!(matches!(first, ConnectionError::ConnectFailed(_)));
    assert!(matches!(second, ConnectionError::ConnectFailed(_)));
    assert_eq!(connection.factory.calls.load(Ordering::SeqCst), 1);
    assert_eq!(connection.state(), ConnectionState::Failed);
    assert!(connection.is_expired());
}

#[tokio::test(start_paused = true)]
async fn abandoned_open_fails_the_connection() {
    let connection = Connection::new(StalledFactory, "stalled");
    let cancel = CancellationToken::new();

    let attempt = tokio::time::timeout(Duration::from_millis(10), connection.open(&cancel)).await;
    assert!(attempt.is_err(), "open should still be pending");
    assert_eq!(connection.state(), ConnectionState::Failed);
    assert!(matches!(connection.failure(), Some(ConnectionError::Cancelled)));

    let retry = connection.open(&cancel).await.expect_err("cannot reopen");
    assert!(matches!(retry, ConnectionError::AlreadyFailed));
}

#[tokio::test]
async fn cancelled_open_reports_cancellation() {
    let connection = Connection::new(StalledFactory, "stalled");
    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = connection.open(&cancel).await.expect_err("cancelled");
    assert!(matches!(err, ConnectionError::Cancelled));
    assert_eq!(connection.state(), ConnectionState::Failed);
}

#[rstest]
#[tokio::test]
async fn reply_written_by_peer_reaches_receiver(mut harness: Harness) {
    let cancel = CancellationToken::new();
    harness.connection.open(&cancel).await.expect("open");

    codec::write_frame(&mut harness.peer, &reply(5))
        .await
        .expect("peer write");
    let frame = harness.connection.receive(5, &cancel).await.expect("receive");
    assert_eq!(frame.response_to(), 5);
    assert_eq!(frame.body(), b"reply");
    assert_eq!(harness.recorder.count("received_message"), 1);
}

#[rstest]
#[tokio::test]
async fn sent_frames_arrive_whole(mut harness: Harness) {
    let cancel = CancellationToken::new();
    harness.connection.open(&cancel).await.expect("open");
    let first = Frame::build(FrameHeader::request(1, 7), b"one").expect("frame");
    let second = Frame::build(FrameHeader::request(2, 7), b"two").expect("frame");

    let bytes = harness
        .connection
        .send(&[first.clone(), second.clone()], &cancel)
        .await
        .expect("send");
    assert_eq!(bytes, first.as_bytes().len() + second.as_bytes().len());

    let max = codec::DEFAULT_MAX_FRAME_LENGTH;
    assert_eq!(codec::read_frame(&mut harness.peer, max).await.expect("read"), first);
    assert_eq!(codec::read_frame(&mut harness.peer, max).await.expect("read"), second);
}

#[rstest]
#[tokio::test]
async fn dispose_releases_parked_receivers(harness: Harness) {
    let cancel = CancellationToken::new();
    harness.connection.open(&cancel).await.expect("open");

    let (result, ()) = tokio::join!(harness.connection.receive(3, &cancel), async {
        tokio::task::yield_now().await;
        harness.connection.dispose();
    });
    assert!(matches!(result, Err(ConnectionError::AlreadyClosed)));
    assert_eq!(harness.connection.state(), ConnectionState::Disposed);
}

#[rstest]
#[tokio::test]
async fn dispose_and_fail_notify_once(harness: Harness) {
    let cancel = CancellationToken::new();
    harness.connection.open(&cancel).await.expect("open");

    assert!(harness.connection.fail(ConnectionError::Cancelled));
    assert!(!harness.connection.fail(ConnectionError::AlreadyClosed));
    harness.connection.dispose();
    harness.connection.dispose();

    assert_eq!(harness.recorder.count("failed"), 1);
    assert_eq!(harness.recorder.count("closing"), 1);
    assert_eq!(harness.recorder.count("closed"), 1);

    let err = harness
        .connection
        .receive(1, &cancel)
        .await
        .expect_err("disposed");
    assert!(matches!(err, ConnectionError::AlreadyClosed));
}

#[rstest]
#[tokio::test]
async fn empty_send_is_a_no_op(harness: Harness) {
    let cancel = CancellationToken::new();
    harness.connection.open(&cancel).await.expect("open");
    assert_eq!(harness.connection.send(&[], &cancel).await.expect("send"), 0);
    assert_eq!(harness.recorder.count("sending_messages"), 0);
}

#[rstest]
#[tokio::test]
async fn reply_to_cancelled_receive_is_discarded(mut harness: Harness) {
    let cancel = CancellationToken::new();
    harness.connection.open(&cancel).await.expect("open");

    let gave_up = CancellationToken::new();
    gave_up.cancel();
    let err = harness
        .connection
        .receive(2, &gave_up)
        .await
        .expect_err("cancelled");
    assert!(matches!(err, ConnectionError::Cancelled));

    codec::write_frame(&mut harness.peer, &reply(2))
        .await
        .expect("peer write");
    codec::write_frame(&mut harness.peer, &reply(1))
        .await
        .expect("peer write");
    let frame = harness.connection.receive(1, &cancel).await.expect("receive");
    assert_eq!(frame.response_to(), 1);
    assert!(
        harness.connection.dropbox.is_empty(),
        "late reply for 2 must not be kept"
    );
}

#[rstest]
#[tokio::test]
async fn open_after_dispose_reports_no_opening_events(harness: Harness) {
    harness.connection.dispose();
    let err = harness
        .connection
        .open(&CancellationToken::new())
        .await
        .expect_err("disposed");
    assert!(matches!(err, ConnectionError::AlreadyClosed));
    assert_eq!(harness.recorder.count("opening"), 0);
    assert_eq!(harness.recorder.count("opening_failed"), 0);
    assert_eq!(harness.connection.factory.calls.load(Ordering::SeqCst), 0);
}
