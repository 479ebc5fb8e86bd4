use std::{sync::Arc, time::Duration};

use futures::{SinkExt, StreamExt};
use liveclip_core::{
    ClientControl, ClientMessage, InboundMessage, OutboundEnvelope, decode_inbound,
    encode_outbound,
};
use thiserror::Error;
use tokio::{
    net::TcpStream,
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
    time::timeout,
};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{self, Message},
};
use tracing::{debug, info, warn};
use url::Url;

use crate::ingest::EnvelopeSink;

pub const OUTBOUND_QUEUE_CAPACITY: usize = 32;
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(12);
const CLOSE_GRACE: Duration = Duration::from_secs(1);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWrite = futures::stream::SplitSink<WsStream, Message>;
type WsRead = futures::stream::SplitStream<WsStream>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
    Errored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    NotConnected,
    QueueFull,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The frame was handed to the socket. This is not an acknowledgment from the backend.
    Written,
    Failed,
}

/// Resolves once the writer task has dealt with a queued message.
#[derive(Debug)]
pub struct Receipt(oneshot::Receiver<Delivery>);

impl Receipt {
    pub fn new(rx: oneshot::Receiver<Delivery>) -> Self {
        Self(rx)
    }

    pub async fn delivery(self) -> Delivery {
        self.0.await.unwrap_or(Delivery::Failed)
    }
}

#[derive(Debug)]
pub enum SendOutcome {
    Queued(Receipt),
    Dropped(DropReason),
}

impl SendOutcome {
    pub fn is_queued(&self) -> bool {
        matches!(self, SendOutcome::Queued(_))
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect to {endpoint} timed out after {timeout:?}")]
    ConnectTimeout { endpoint: String, timeout: Duration },
    #[error("connect to {endpoint} failed: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: Box<tungstenite::Error>,
    },
}

#[derive(Debug, Clone)]
pub struct TransportOptions {
    pub connect_timeout: Duration,
    pub queue_capacity: usize,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            queue_capacity: OUTBOUND_QUEUE_CAPACITY,
        }
    }
}

#[derive(Debug)]
enum Outgoing {
    Message {
        message: ClientMessage,
        delivery: oneshot::Sender<Delivery>,
    },
    Close,
}

/// One live websocket connection to the backend.
///
/// Inbound messages come out of [`TransportSession::recv`] strictly in arrival
/// order. Sends never block: while not connected, or with a full queue, the
/// message is dropped and the caller is told so.
#[derive(Debug)]
pub struct TransportSession {
    endpoint: Url,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    state_rx: watch::Receiver<ConnectionState>,
    outbound_tx: mpsc::Sender<Outgoing>,
    inbound_rx: mpsc::UnboundedReceiver<InboundMessage>,
    writer: JoinHandle<()>,
    reader: JoinHandle<()>,
}

impl TransportSession {
    pub async fn open(endpoint: &Url, options: &TransportOptions) -> Result<Self, TransportError> {
        info!(endpoint = %endpoint, "connecting");
        let (ws_stream, _) = match timeout(options.connect_timeout, connect_async(endpoint.as_str()))
            .await
        {
            Ok(Ok(ok)) => ok,
            Ok(Err(err)) => {
                return Err(TransportError::Connect {
                    endpoint: endpoint.to_string(),
                    source: Box::new(err),
                });
            }
            Err(_) => {
                return Err(TransportError::ConnectTimeout {
                    endpoint: endpoint.to_string(),
                    timeout: options.connect_timeout,
                });
            }
        };
        info!(endpoint = %endpoint, "connected");

        let (state_tx, state_rx) = watch::channel(ConnectionState::Connected);
        let state_tx = Arc::new(state_tx);
        let (outbound_tx, outbound_rx) = mpsc::channel(options.queue_capacity.max(1));
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        let (write_half, read_half) = ws_stream.split();
        let writer = tokio::spawn(network_send_task(
            write_half,
            outbound_rx,
            Arc::clone(&state_tx),
        ));
        let reader = tokio::spawn(network_receive_task(
            read_half,
            inbound_tx,
            Arc::clone(&state_tx),
        ));

        Ok(Self {
            endpoint: endpoint.clone(),
            state_tx,
            state_rx,
            outbound_tx,
            inbound_rx,
            writer,
            reader,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    pub fn current_state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Next inbound message, or `None` once the connection is gone.
    pub async fn recv(&mut self) -> Option<InboundMessage> {
        self.inbound_rx.recv().await
    }

    pub fn send_control(&self, control: ClientControl) -> SendOutcome {
        self.enqueue(control.into())
    }

    pub(crate) fn enqueue(&self, message: ClientMessage) -> SendOutcome {
        if self.current_state() != ConnectionState::Connected {
            debug!("dropping outbound message: not connected");
            return SendOutcome::Dropped(DropReason::NotConnected);
        }

        let (delivery_tx, delivery_rx) = oneshot::channel();
        let outgoing = Outgoing::Message {
            message,
            delivery: delivery_tx,
        };
        match self.outbound_tx.try_send(outgoing) {
            Ok(()) => SendOutcome::Queued(Receipt::new(delivery_rx)),
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("dropping outbound message: queue full");
                SendOutcome::Dropped(DropReason::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("dropping outbound message: writer gone");
                SendOutcome::Dropped(DropReason::NotConnected)
            }
        }
    }

    /// Sends a close frame, stops both tasks and leaves the state at `Disconnected`.
    pub async fn close(mut self) {
        self.state_tx.send_replace(ConnectionState::Disconnected);
        let writer_done = self.outbound_tx.try_send(Outgoing::Close).is_ok()
            && timeout(CLOSE_GRACE, &mut self.writer).await.is_ok();
        self.writer.abort();
        self.reader.abort();
        if !writer_done {
            let _ = (&mut self.writer).await;
        }
        let _ = (&mut self.reader).await;
        self.state_tx.send_replace(ConnectionState::Disconnected);
        info!(endpoint = %self.endpoint, "session closed");
    }
}

impl EnvelopeSink for TransportSession {
    fn send(&self, envelope: OutboundEnvelope) -> SendOutcome {
        self.enqueue(envelope.into())
    }
}

impl Drop for TransportSession {
    fn drop(&mut self) {
        self.writer.abort();
        self.reader.abort();
    }
}

async fn network_send_task(
    mut ws_write: WsWrite,
    mut outgoing_rx: mpsc::Receiver<Outgoing>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
) {
    while let Some(outgoing) = outgoing_rx.recv().await {
        let (message, delivery) = match outgoing {
            Outgoing::Message { message, delivery } => (message, delivery),
            Outgoing::Close => {
                let _ = ws_write.send(Message::Close(None)).await;
                let _ = ws_write.close().await;
                break;
            }
        };

        let text = match encode_outbound(&message) {
            Ok(text) => text,
            Err(err) => {
                warn!("failed to encode outgoing message: {}", err);
                let _ = delivery.send(Delivery::Failed);
                continue;
            }
        };

        match ws_write.send(Message::Text(text.into())).await {
            Ok(()) => {
                let _ = delivery.send(Delivery::Written);
            }
            Err(err) => {
                warn!("write failed: {}", err);
                let _ = delivery.send(Delivery::Failed);
                leave_connected(&state_tx, ConnectionState::Errored);
                break;
            }
        }
    }
}

async fn network_receive_task(
    mut ws_read: WsRead,
    inbound_tx: mpsc::UnboundedSender<InboundMessage>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
) {
    while let Some(next) = ws_read.next().await {
        let message = match next {
            Ok(message) => message,
            Err(err) => {
                warn!("read failed: {}", err);
                leave_connected(&state_tx, ConnectionState::Errored);
                return;
            }
        };

        match message {
            Message::Text(text) => match decode_inbound(text.as_str()) {
                Ok(Some(inbound)) => {
                    if inbound_tx.send(inbound).is_err() {
                        return;
                    }
                }
                Ok(None) => debug!("ignoring inbound message of unknown kind"),
                Err(err) => warn!("ignoring malformed inbound message: {}", err),
            },
            Message::Close(frame) => {
                debug!(?frame, "server closed the connection");
                break;
            }
            Message::Binary(_) | Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
        }
    }

    leave_connected(&state_tx, ConnectionState::Disconnected);
}

/// Moves out of `Connected` only; a session already closed or errored keeps its state.
fn leave_connected(state_tx: &watch::Sender<ConnectionState>, next: ConnectionState) {
    state_tx.send_if_modified(|state| {
        if *state == ConnectionState::Connected {
            *state = next;
            true
        } else {
            false
        }
    });
}
