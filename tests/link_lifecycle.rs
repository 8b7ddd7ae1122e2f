//! Lifecycle tests for the RFCOMM link over the in-memory platform.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

use btlink::bluetooth::memory::{FailAt, MemoryPlatform};
use btlink::bluetooth::{
    serve_once, BluetoothHost, EventSink, HostConfig, PeerAddress, SinkSlot, SocketServer,
    IO_FAILED, MAX_CHANNEL, MAX_TRANSFER_SIZE, MIN_CHANNEL,
};
use btlink::LinkError;

const PEER: PeerAddress = PeerAddress::new([0x12, 0x34, 0x56, 0x78, 0x9A, 0xBC]);

#[derive(Default)]
struct RecordingSink {
    connected: Mutex<Vec<String>>,
    disconnects: AtomicUsize,
}

impl RecordingSink {
    fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

impl EventSink for RecordingSink {
    fn on_connected(&self, address: &str) {
        self.connected.lock().push(address.to_string());
    }

    fn on_disconnected(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

/// Connect once a listener shows up on `channel`.
async fn connect_when_listening(platform: MemoryPlatform, channel: u8) -> DuplexStream {
    for _ in 0..1000 {
        if platform.is_listening(channel) {
            return platform.connect(channel, PEER).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("nothing listened on channel {}", channel);
}

fn host_on(platform: &MemoryPlatform, channel: u8) -> BluetoothHost<MemoryPlatform> {
    BluetoothHost::new(
        platform.clone(),
        HostConfig {
            channel,
            ..HostConfig::default()
        },
    )
}

/// Host with a connected peer and a recording listener.
async fn connected_host(
    channel: u8,
) -> (
    BluetoothHost<MemoryPlatform>,
    DuplexStream,
    Arc<RecordingSink>,
    MemoryPlatform,
) {
    let platform = MemoryPlatform::new();
    let mut host = host_on(&platform, channel);
    let sink = Arc::new(RecordingSink::default());
    host.set_listener(sink.clone());

    let client = tokio::spawn(connect_when_listening(platform.clone(), channel));
    assert_eq!(host.create_server().await, 0);
    (host, client.await.unwrap(), sink, platform)
}

#[tokio::test]
async fn test_every_channel_accepts_a_peer() {
    for channel in MIN_CHANNEL..=MAX_CHANNEL {
        let platform = MemoryPlatform::new();
        let server = SocketServer::create(&platform, SinkSlot::new()).unwrap();
        server.bind(channel).unwrap();
        server.listen().unwrap();

        let _client = platform.connect(channel, PEER).await.unwrap();
        let (session, peer) = server.accept().await.unwrap();
        assert_eq!(peer, PEER);
        assert!(session.is_connected());
        server.close();
    }
}

#[tokio::test]
async fn test_independent_platforms_share_a_channel() {
    let (mut first, _c1, _, _) = connected_host(1).await;
    let (mut second, _c2, _, _) = connected_host(1).await;
    assert!(first.is_connected());
    assert!(second.is_connected());
    first.close().await;
    second.close().await;
}

#[tokio::test]
async fn test_connect_notification_formats_address() {
    let (host, _client, sink, _) = connected_host(2).await;
    assert!(host.is_connected());
    assert_eq!(*sink.connected.lock(), vec!["BC:9A:78:56:34:12".to_string()]);
    assert_eq!(sink.disconnects(), 0);
}

#[tokio::test]
async fn test_close_before_and_after_accept() {
    let platform = MemoryPlatform::new();
    let mut host = host_on(&platform, 3);
    host.close().await;
    host.close().await;
    assert!(!host.is_connected());
    assert_eq!(host.available(), 0);

    let server = SocketServer::create(&platform, SinkSlot::new()).unwrap();
    server.close();
    server.close();

    let (mut host, _client, sink, _) = connected_host(3).await;
    for _ in 0..5 {
        host.close().await;
    }
    assert!(!host.is_connected());
    assert_eq!(sink.disconnects(), 1);
}

#[tokio::test]
async fn test_peer_close_ends_connection() {
    let (host, client, sink, _) = connected_host(4).await;
    assert!(host.is_connected());

    drop(client);
    let mut buf = [0u8; 16];
    assert_eq!(host.read(&mut buf).await, IO_FAILED);
    assert!(!host.is_connected());
    assert_eq!(host.read(&mut buf).await, IO_FAILED);
    assert_eq!(host.send(b"late").await, IO_FAILED);
    assert_eq!(sink.disconnects(), 1);
}

#[tokio::test]
async fn test_max_transfer_round_trip() {
    let (host, mut client, _, _) = connected_host(5).await;
    let payload: Vec<u8> = (0..MAX_TRANSFER_SIZE).map(|i| (i % 251) as u8).collect();

    client.write_all(&payload).await.unwrap();
    let mut received = Vec::with_capacity(payload.len());
    let mut buf = [0u8; MAX_TRANSFER_SIZE];
    while received.len() < payload.len() {
        let n = host.read(&mut buf).await;
        assert!(n > 0);
        received.extend_from_slice(&buf[..n as usize]);
    }
    assert_eq!(received, payload);

    assert_eq!(host.send(&payload).await, MAX_TRANSFER_SIZE as isize);
    let mut echoed = vec![0u8; MAX_TRANSFER_SIZE];
    client.read_exact(&mut echoed).await.unwrap();
    assert_eq!(echoed, payload);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_foreground_and_worker_disconnect_once() {
    for round in 0..20u8 {
        let channel = MIN_CHANNEL + round % MAX_CHANNEL;
        let (mut host, client, sink, _) = connected_host(channel).await;
        let session = host.session().unwrap();
        let mut chunks = host.start_receiving().unwrap();

        let foreground = tokio::spawn(async move {
            let mut buf = [0u8; 64];
            session.receive(&mut buf).await
        });

        tokio::time::sleep(Duration::from_millis(1)).await;
        drop(client);

        assert!(foreground.await.unwrap().is_err());
        assert!(chunks.recv().await.is_none());
        assert!(!host.is_connected());
        assert_eq!(sink.disconnects(), 1, "round {}", round);
        host.close().await;
        assert_eq!(sink.disconnects(), 1);
    }
}

#[tokio::test]
async fn test_worker_delivers_stream_in_order() {
    let (mut host, mut client, _, _) = connected_host(6).await;
    let mut chunks = host.start_receiving().unwrap();
    assert!(host.start_receiving().is_none());

    let payload: Vec<u8> = (0..4096u32).map(|i| (i % 256) as u8).collect();
    client.write_all(&payload).await.unwrap();
    drop(client);

    let mut received = Vec::new();
    while let Some(chunk) = chunks.recv().await {
        assert!(chunk.len() <= 512);
        received.extend(chunk);
    }
    assert_eq!(received, payload);
    assert!(!host.is_connected());
}

#[tokio::test]
async fn test_available_hint() {
    let (mut host, _client, _, platform) = connected_host(7).await;

    assert_eq!(host.available(), 0);
    platform.set_ready_hint(Some(42));
    assert_eq!(host.available(), 42);

    host.close().await;
    assert_eq!(host.available(), 0);
}

#[tokio::test]
async fn test_startup_status_codes() {
    let cases = [
        (FailAt::Create, -1),
        (FailAt::Bind, -2),
        (FailAt::Listen, -3),
        (FailAt::Accept, -4),
    ];
    for (stage, expected) in cases {
        let platform = MemoryPlatform::new();
        platform.fail_at(stage);
        let mut host = host_on(&platform, 8);
        assert_eq!(host.create_server().await, expected, "{:?}", stage);
        assert!(!host.is_connected());
        assert!(host.start_receiving().is_none());
    }
}

#[tokio::test]
async fn test_invalid_channel_is_bind_failure() {
    let platform = MemoryPlatform::new();
    let mut host = host_on(&platform, 0);
    assert_eq!(host.create_server().await, -2);
}

#[tokio::test]
async fn test_recreate_after_disconnect() {
    let (mut host, client, sink, platform) = connected_host(9).await;
    drop(client);
    let mut buf = [0u8; 8];
    assert_eq!(host.read(&mut buf).await, IO_FAILED);
    host.close().await;
    assert!(!platform.is_listening(9));

    let reconnect = tokio::spawn(connect_when_listening(platform.clone(), 9));
    assert_eq!(host.create_server().await, 0);
    let _client = reconnect.await.unwrap();
    assert!(host.is_connected());
    assert_eq!(sink.connected.lock().len(), 2);
    assert_eq!(sink.disconnects(), 1);
}

#[tokio::test]
async fn test_listener_replacement_applies_to_live_session() {
    let (host, client, first, _) = connected_host(10).await;
    let second = Arc::new(RecordingSink::default());
    host.set_listener(second.clone());

    drop(client);
    let mut buf = [0u8; 8];
    assert_eq!(host.read(&mut buf).await, IO_FAILED);
    assert_eq!(first.disconnects(), 0);
    assert_eq!(second.disconnects(), 1);
}

#[tokio::test]
async fn test_serve_once_reads_single_message() {
    let platform = MemoryPlatform::new();
    let client = tokio::spawn({
        let platform = platform.clone();
        async move {
            let mut client = connect_when_listening(platform, 11).await;
            client.write_all(b"hello rfcomm").await.unwrap();
            client
        }
    });

    let mut buf = [0u8; 1024];
    let n = serve_once(&platform, 11, &mut buf).await.unwrap();
    assert_eq!(&buf[..n], b"hello rfcomm");
    drop(client.await.unwrap());
    assert!(!platform.is_listening(11));
}

#[tokio::test]
async fn test_serve_once_reports_stage_error() {
    let platform = MemoryPlatform::new();
    platform.fail_at(FailAt::Listen);
    let mut buf = [0u8; 16];
    let err = serve_once(&platform, 1, &mut buf).await.unwrap_err();
    assert!(matches!(err, LinkError::ListenFailed(_)));
}

#[tokio::test]
async fn test_send_after_peer_drop_disconnects_once() {
    let (host, client, sink, _) = connected_host(12).await;
    drop(client);

    assert_eq!(host.send(b"x").await, IO_FAILED);
    assert!(!host.is_connected());
    assert_eq!(sink.disconnects(), 1);
    assert_eq!(host.send(b"x").await, IO_FAILED);
    assert_eq!(sink.disconnects(), 1);
}

#[tokio::test]
async fn test_peer_drop_fails_blocked_send() {
    let (host, client, sink, _) = connected_host(13).await;
    let session = host.session().unwrap();
    let payload = vec![0x5Au8; 256 * 1024];
    let pending = tokio::spawn(async move { session.send(&payload).await });

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(!pending.is_finished());
    drop(client);

    let result = pending.await.unwrap();
    assert!(matches!(result, Err(LinkError::WriteFailed(_))));
    assert!(!host.is_connected());
    assert_eq!(sink.disconnects(), 1);
    assert_eq!(host.send(b"x").await, IO_FAILED);
}

#[tokio::test]
async fn test_stream_reads_until_peer_leaves() {
    let (host, mut client, sink, _) = connected_host(15).await;
    let mut stream = host.stream().unwrap();

    let payload: Vec<u8> = (0..2048u32).map(|i| (i % 241) as u8).collect();
    client.write_all(&payload).await.unwrap();
    drop(client);

    let mut received = Vec::new();
    stream.read_to_end(&mut received).await.unwrap();
    assert_eq!(received, payload);
    assert!(!host.is_connected());
    assert_eq!(sink.disconnects(), 1);
}

#[tokio::test]
async fn test_accept_retried_after_failure() {
    let platform = MemoryPlatform::new();
    let mut host = host_on(&platform, 14);
    platform.fail_at(FailAt::Accept);
    assert_eq!(host.create_server().await, -4);

    host.close().await;
    assert!(!platform.is_listening(14));
    platform.clear_failure();

    let client = tokio::spawn(connect_when_listening(platform.clone(), 14));
    assert_eq!(host.create_server().await, 0);
    let _client = client.await.unwrap();
    assert!(host.is_connected());
}
