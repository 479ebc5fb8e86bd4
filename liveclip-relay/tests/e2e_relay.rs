use std::time::Duration;

use futures::{SinkExt, StreamExt};
use liveclip_core::{
    ClientControl, ClientMessage, ClipboardItem, InboundMessage, ItemKind, OutboundEnvelope,
    decode_inbound, encode_outbound,
};
use liveclip_relay::{AppState, RelayConfig, build_router, cleanup_task};
use tokio::{net::TcpListener, sync::oneshot, time::timeout};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;
type WsWrite = futures::stream::SplitSink<WsStream, Message>;
type WsRead = futures::stream::SplitStream<WsStream>;

struct TestClient {
    write: WsWrite,
    read: WsRead,
}

impl TestClient {
    async fn send(&mut self, message: ClientMessage) {
        let text = encode_outbound(&message).expect("encode outbound");
        self.write
            .send(Message::Text(text.into()))
            .await
            .expect("send outbound");
    }
}

#[tokio::test]
async fn new_connection_receives_current_collection() {
    let (address, shutdown_tx) = start_relay(AppState::new()).await;

    let mut client_a = connect_client(&address).await;
    let initial = recv_inbound(&mut client_a, Duration::from_secs(2)).await;
    assert_eq!(initial, Some(InboundMessage::Sync { items: Vec::new() }));

    client_a.send(text_envelope("first")).await;
    let _ = recv_inbound(&mut client_a, Duration::from_secs(2)).await;

    let mut client_b = connect_client(&address).await;
    let Some(InboundMessage::Sync { items }) =
        recv_inbound(&mut client_b, Duration::from_secs(2)).await
    else {
        panic!("late joiner should receive sync first");
    };
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].data.as_deref(), Some("first"));

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn envelope_is_broadcast_as_add_to_every_client_including_sender() {
    let (address, shutdown_tx) = start_relay(AppState::new()).await;

    let mut client_a = connect_client(&address).await;
    let mut client_b = connect_client(&address).await;
    drain(&mut client_a).await;
    drain(&mut client_b).await;

    client_a
        .send(
            OutboundEnvelope::File {
                name: "archive.zip".to_owned(),
                size: 1234,
                mime: "application/zip".to_owned(),
            }
            .into(),
        )
        .await;

    for client in [&mut client_a, &mut client_b] {
        let Some(InboundMessage::Add { item }) =
            recv_inbound(client, Duration::from_secs(2)).await
        else {
            panic!("expected add");
        };
        assert_eq!(item.kind, ItemKind::File);
        assert_eq!(item.name.as_deref(), Some("archive.zip"));
        assert_eq!(item.size, Some(1234));
        assert!(item.data.is_none());
        assert!(item.created_at > 0.0);
    }

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn resync_is_answered_to_requester_only() {
    let (address, shutdown_tx) = start_relay(AppState::new()).await;

    let mut client_a = connect_client(&address).await;
    let mut client_b = connect_client(&address).await;
    drain(&mut client_a).await;
    drain(&mut client_b).await;

    client_a.send(ClientControl::Resync.into()).await;

    let received_a = recv_inbound(&mut client_a, Duration::from_secs(2)).await;
    assert_eq!(received_a, Some(InboundMessage::Sync { items: Vec::new() }));

    let received_b = recv_inbound(&mut client_b, Duration::from_millis(400)).await;
    assert!(received_b.is_none(), "resync leaked to another client");

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn malformed_text_frame_is_ignored() {
    let state = AppState::new();
    let (address, shutdown_tx) = start_relay(state.clone()).await;

    let mut client_a = connect_client(&address).await;
    drain(&mut client_a).await;

    client_a
        .write
        .send(Message::Text(r#"{"type":"image","data":"no-name"}"#.into()))
        .await
        .expect("send malformed frame");
    client_a
        .write
        .send(Message::Text("definitely not json".into()))
        .await
        .expect("send garbage frame");

    let received = recv_inbound(&mut client_a, Duration::from_millis(400)).await;
    assert!(received.is_none());
    assert_eq!(state.item_count().await, 0);

    client_a.send(text_envelope("still alive")).await;
    let received = recv_inbound(&mut client_a, Duration::from_secs(2)).await;
    assert!(matches!(received, Some(InboundMessage::Add { .. })));

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn expired_items_are_removed_with_a_sync() {
    let state = AppState::with_config(RelayConfig {
        ttl: Duration::from_millis(300),
        cleanup_interval: Duration::from_millis(100),
    });
    let (address, shutdown_tx) = start_relay(state.clone()).await;
    let cleanup = tokio::spawn(cleanup_task(state.clone()));

    let mut client_a = connect_client(&address).await;
    drain(&mut client_a).await;

    client_a.send(text_envelope("short lived")).await;
    assert!(matches!(
        recv_inbound(&mut client_a, Duration::from_secs(2)).await,
        Some(InboundMessage::Add { .. })
    ));

    let after_expiry = recv_inbound(&mut client_a, Duration::from_secs(3)).await;
    assert_eq!(after_expiry, Some(InboundMessage::Sync { items: Vec::new() }));
    assert_eq!(state.item_count().await, 0);

    cleanup.abort();
    let _ = shutdown_tx.send(());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn adds_and_resyncs_arrive_in_collection_order() {
    const SENDERS: usize = 4;
    const ITEMS_PER_SENDER: usize = 75;
    const RESYNCS: usize = 800;

    let (address, shutdown_tx) = start_relay(AppState::new()).await;

    let TestClient {
        write: mut observer_write,
        read: mut observer_read,
    } = connect_client(&address).await;
    let Some(InboundMessage::Sync { items }) =
        recv_from(&mut observer_read, Duration::from_secs(2)).await
    else {
        panic!("observer should receive sync first");
    };
    let mut store: Vec<ClipboardItem> = items;

    let mut senders = Vec::new();
    for sender in 0..SENDERS {
        let mut client = connect_client(&address).await;
        senders.push(tokio::spawn(async move {
            for n in 0..ITEMS_PER_SENDER {
                client.send(text_envelope(&format!("{sender}-{n}"))).await;
            }
            client
        }));
    }

    let resync = encode_outbound(&ClientControl::Resync.into()).expect("encode resync");
    let resyncs = tokio::spawn(async move {
        for _ in 0..RESYNCS {
            if observer_write
                .send(Message::Text(resync.clone().into()))
                .await
                .is_err()
            {
                break;
            }
            tokio::task::yield_now().await;
        }
        observer_write
    });

    while let Some(message) = recv_from(&mut observer_read, Duration::from_secs(2)).await {
        match message {
            InboundMessage::Sync { items } => store = items,
            InboundMessage::Add { item } => {
                assert!(
                    store.iter().all(|known| known.id != item.id),
                    "add for {} arrived after a sync that already held it",
                    item.id
                );
                store.push(item);
            }
        }
    }

    let _clients = futures::future::join_all(senders).await;
    let _observer_write = resyncs.await.expect("resync task");

    let mut ids: Vec<String> = store.iter().map(|item| item.id.to_string()).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), store.len(), "observer store held the same item twice");
    assert_eq!(store.len(), SENDERS * ITEMS_PER_SENDER);

    let _ = shutdown_tx.send(());
}

fn text_envelope(data: &str) -> ClientMessage {
    OutboundEnvelope::Text {
        data: data.to_owned(),
        name: None,
    }
    .into()
}

async fn start_relay(state: AppState) -> (String, oneshot::Sender<()>) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral relay socket");
    let address = listener.local_addr().expect("relay local addr");
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    let server = axum::serve(listener, build_router(state)).with_graceful_shutdown(async {
        let _ = shutdown_rx.await;
    });
    tokio::spawn(async move {
        let _ = server.await;
    });

    (format!("ws://{}/ws", address), shutdown_tx)
}

async fn connect_client(ws_url: &str) -> TestClient {
    let (ws_stream, _) = connect_async(ws_url).await.expect("connect websocket");
    let (write, read) = ws_stream.split();
    TestClient { write, read }
}

async fn drain(client: &mut TestClient) {
    while recv_inbound(client, Duration::from_millis(150)).await.is_some() {}
}

async fn recv_inbound(client: &mut TestClient, wait: Duration) -> Option<InboundMessage> {
    recv_from(&mut client.read, wait).await
}

async fn recv_from(read: &mut WsRead, wait: Duration) -> Option<InboundMessage> {
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        let remaining = deadline.checked_duration_since(tokio::time::Instant::now())?;
        let next = timeout(remaining, read.next()).await.ok()?;
        match next?.ok()? {
            Message::Text(text) => return decode_inbound(text.as_str()).ok().flatten(),
            Message::Close(_) => return None,
            _ => continue,
        }
    }
}
