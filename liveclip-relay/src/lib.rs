use std::{
    collections::HashMap,
    sync::Arc,
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use axum::{
    Json, Router,
    extract::{State, WebSocketUpgrade, ws::Message},
    response::IntoResponse,
    routing::get,
};
use futures::{SinkExt, StreamExt};
use liveclip_core::{
    ClientControl, ClientMessage, ClipboardItem, ITEM_LIFETIME, InboundMessage, ItemId,
    MAX_RELAY_MESSAGE_BYTES, decode_outbound, encode_inbound,
};
use tokio::{
    net::TcpListener,
    sync::{RwLock, mpsc},
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(5);

type ConnectionId = u64;

#[derive(Debug, Clone, Copy)]
pub struct RelayConfig {
    pub ttl: Duration,
    pub cleanup_interval: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            ttl: ITEM_LIFETIME,
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
        }
    }
}

#[derive(Debug, Default)]
struct RelayState {
    items: Vec<ClipboardItem>,
    clients: HashMap<ConnectionId, mpsc::UnboundedSender<Message>>,
}

#[derive(Debug, Clone)]
pub struct AppState {
    inner: Arc<RwLock<RelayState>>,
    next_connection: Arc<AtomicU64>,
    config: RelayConfig,
}

impl AppState {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RelayConfig::default())
    }

    #[must_use]
    pub fn with_config(config: RelayConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(RelayState::default())),
            next_connection: Arc::new(AtomicU64::new(1)),
            config,
        }
    }

    pub async fn item_count(&self) -> usize {
        self.inner.read().await.items.len()
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/healthz", get(healthz_handler))
        .with_state(state)
}

pub async fn serve(listener: TcpListener, state: AppState) -> Result<(), String> {
    info!(
        "relay listening on {}",
        listener
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_owned())
    );
    let cleanup = tokio::spawn(cleanup_task(state.clone()));
    let result = axum::serve(listener, build_router(state))
        .await
        .map_err(|err| err.to_string());
    cleanup.abort();
    result
}

/// Evicts expired items on a fixed cadence and re-syncs every client when
/// membership changed.
pub async fn cleanup_task(state: AppState) {
    let mut ticker = tokio::time::interval(state.config.cleanup_interval);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let evicted = evict_expired(&state, unix_now_secs()).await;
        if evicted > 0 {
            debug!(evicted, "expired items evicted");
        }
    }
}

/// Returns how many items were removed.
pub async fn evict_expired(state: &AppState, now_secs: f64) -> usize {
    let ttl = state.config.ttl.as_secs_f64();
    let mut relay = state.inner.write().await;
    let before = relay.items.len();
    relay.items.retain(|item| now_secs - item.created_at < ttl);
    let evicted = before - relay.items.len();
    if evicted == 0 {
        return 0;
    }

    let sync = InboundMessage::Sync {
        items: relay.items.clone(),
    };
    broadcast(relay.clients.values(), &sync);
    evicted
}

async fn healthz_handler() -> impl IntoResponse {
    Json(serde_json::json!({"ok": true}))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.max_message_size(MAX_RELAY_MESSAGE_BYTES)
        .on_upgrade(move |socket| async move {
            if let Err(err) = handle_socket(state, socket).await {
                warn!("socket session ended with error: {}", err);
            }
        })
}

async fn handle_socket(
    state: AppState,
    socket: axum::extract::ws::WebSocket,
) -> Result<(), String> {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

    // Pongs queued by the read half are only flushed when the write half sends,
    // so an idle connection needs periodic writes to stay alive behind proxies.
    const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

    let send_task = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(KEEPALIVE_INTERVAL);
        ping_interval.tick().await;

        loop {
            tokio::select! {
                msg = outbound_rx.recv() => {
                    match msg {
                        Some(message) => {
                            if ws_sender.send(message).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = ping_interval.tick() => {
                    if ws_sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let connection_id = register_client(&state, outbound_tx).await;
    info!(connection_id, "client connected");

    while let Some(next_message) = ws_receiver.next().await {
        let message = match next_message {
            Ok(message) => message,
            Err(err) => {
                warn!(connection_id, "websocket receive error: {}", err);
                break;
            }
        };

        match message {
            Message::Text(text) => {
                if text.as_str().len() > MAX_RELAY_MESSAGE_BYTES {
                    warn!(connection_id, "dropping oversized message");
                    continue;
                }

                match decode_outbound(text.as_str()) {
                    Ok(ClientMessage::Envelope(envelope)) => {
                        let item = ClipboardItem::from_envelope(
                            ItemId::Text(Uuid::new_v4().to_string()),
                            envelope,
                            unix_now_secs(),
                        );
                        debug!(
                            connection_id,
                            item_id = %item.id,
                            kind = item.kind.as_str(),
                            "item received"
                        );
                        append_and_broadcast(&state, item).await;
                    }
                    Ok(ClientMessage::Control(ClientControl::Resync)) => {
                        send_sync_to(&state, connection_id).await;
                    }
                    Err(err) => {
                        warn!(connection_id, "ignoring unparseable message: {}", err);
                    }
                }
            }
            Message::Close(_) => break,
            Message::Binary(_) | Message::Ping(_) | Message::Pong(_) => {}
        }
    }

    unregister_client(&state, connection_id).await;
    send_task.abort();
    info!(connection_id, "client disconnected");
    Ok(())
}

/// Registers the connection and queues its initial `sync` under the same lock,
/// so no `add` can slip in ahead of it.
async fn register_client(state: &AppState, tx: mpsc::UnboundedSender<Message>) -> ConnectionId {
    let connection_id = state.next_connection.fetch_add(1, Ordering::Relaxed);
    let mut relay = state.inner.write().await;
    let sync = InboundMessage::Sync {
        items: relay.items.clone(),
    };
    send_one(&tx, &sync);
    relay.clients.insert(connection_id, tx);
    connection_id
}

async fn unregister_client(state: &AppState, connection_id: ConnectionId) {
    let mut relay = state.inner.write().await;
    relay.clients.remove(&connection_id);
}

/// Queues the `add` while the write lock is held, so every connection sees
/// adds and syncs in the order the collection changed.
async fn append_and_broadcast(state: &AppState, item: ClipboardItem) {
    let mut relay = state.inner.write().await;
    relay.items.push(item.clone());
    broadcast(relay.clients.values(), &InboundMessage::Add { item });
}

async fn send_sync_to(state: &AppState, connection_id: ConnectionId) {
    let relay = state.inner.read().await;
    let Some(tx) = relay.clients.get(&connection_id) else {
        return;
    };
    let sync = InboundMessage::Sync {
        items: relay.items.clone(),
    };
    send_one(tx, &sync);
}

fn send_one(tx: &mpsc::UnboundedSender<Message>, message: &InboundMessage) {
    match encode_inbound(message) {
        Ok(text) => {
            let _ = tx.send(Message::Text(text.into()));
        }
        Err(err) => error!("failed to serialize message: {}", err),
    }
}

fn broadcast<'a>(
    recipients: impl IntoIterator<Item = &'a mpsc::UnboundedSender<Message>>,
    message: &InboundMessage,
) {
    let text = match encode_inbound(message) {
        Ok(text) => text,
        Err(err) => {
            error!("failed to serialize broadcast: {}", err);
            return;
        }
    };

    for tx in recipients {
        let _ = tx.send(Message::Text(text.clone().into()));
    }
}

pub fn unix_now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
        .as_secs_f64()
}
