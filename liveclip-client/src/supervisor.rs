//! Reconnect loop around [`TransportSession`].
//!
//! The supervisor owns the one [`ReconciliationStore`] of its session. Inbound
//! messages are applied in arrival order and every applied message publishes a
//! fresh [`StoreSnapshot`]. Readers only ever see snapshots.

use std::time::Duration;

use liveclip_core::{ClientControl, ClientMessage, OutboundEnvelope};
use rand::Rng;
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
    time::{Instant, Interval, MissedTickBehavior, timeout},
};
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    ingest::EnvelopeSink,
    store::{ReconciliationStore, StoreSnapshot},
    transport::{
        ConnectionState, Delivery, DropReason, Receipt, SendOutcome, TransportOptions,
        TransportSession,
    },
};

pub const DEFAULT_RESYNC_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
    /// Extra random delay as a share of the computed delay, in `[0, 1]`.
    pub jitter: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(250),
            max: Duration::from_secs(30),
            jitter: 0.2,
        }
    }
}

impl Backoff {
    /// Delay before attempt `attempt + 1`, without jitter. `attempt` starts at 1.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        self.base
            .saturating_mul(1_u32 << exponent)
            .min(self.max)
    }

    pub fn delay_with_jitter(&self, attempt: u32) -> Duration {
        let delay = self.delay(attempt);
        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 {
            return delay;
        }
        let factor = rand::rng().random_range(0.0..=jitter);
        delay + delay.mul_f64(factor)
    }
}

#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    pub transport: TransportOptions,
    pub backoff: Backoff,
    /// `None` disables periodic resync requests.
    pub resync_interval: Option<Duration>,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            transport: TransportOptions::default(),
            backoff: Backoff::default(),
            resync_interval: Some(DEFAULT_RESYNC_INTERVAL),
        }
    }
}

#[derive(Debug)]
struct Request {
    message: ClientMessage,
    delivery: oneshot::Sender<Delivery>,
}

/// Cloneable front of a running [`Supervisor`].
#[derive(Debug, Clone)]
pub struct SupervisorHandle {
    request_tx: mpsc::Sender<Request>,
    state_rx: watch::Receiver<ConnectionState>,
    snapshot_rx: watch::Receiver<StoreSnapshot>,
}

impl SupervisorHandle {
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    pub fn current_state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    pub fn snapshots(&self) -> watch::Receiver<StoreSnapshot> {
        self.snapshot_rx.clone()
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    pub fn request_resync(&self) -> SendOutcome {
        self.enqueue(ClientControl::Resync.into())
    }

    /// Waits until at least one inbound message has been applied.
    pub async fn wait_synced(&self, wait: Duration) -> bool {
        let mut snapshots = self.snapshots();
        matches!(
            timeout(wait, snapshots.wait_for(|snapshot| snapshot.generation > 0)).await,
            Ok(Ok(_))
        )
    }

    fn enqueue(&self, message: ClientMessage) -> SendOutcome {
        if self.current_state() != ConnectionState::Connected {
            debug!("dropping outbound message: not connected");
            return SendOutcome::Dropped(DropReason::NotConnected);
        }

        let (delivery_tx, delivery_rx) = oneshot::channel();
        let request = Request {
            message,
            delivery: delivery_tx,
        };
        match self.request_tx.try_send(request) {
            Ok(()) => SendOutcome::Queued(Receipt::new(delivery_rx)),
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("dropping outbound message: queue full");
                SendOutcome::Dropped(DropReason::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                SendOutcome::Dropped(DropReason::NotConnected)
            }
        }
    }
}

impl EnvelopeSink for SupervisorHandle {
    fn send(&self, envelope: OutboundEnvelope) -> SendOutcome {
        self.enqueue(envelope.into())
    }
}

pub struct Supervisor {
    handle: SupervisorHandle,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl Supervisor {
    pub fn spawn(endpoint: Url, options: SupervisorOptions) -> Self {
        let (request_tx, request_rx) = mpsc::channel(options.transport.queue_capacity.max(1));
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (snapshot_tx, snapshot_rx) = watch::channel(StoreSnapshot::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(supervise(
            endpoint,
            options,
            request_rx,
            state_tx,
            snapshot_tx,
            shutdown_rx,
        ));

        Self {
            handle: SupervisorHandle {
                request_tx,
                state_rx,
                snapshot_rx,
            },
            shutdown_tx,
            task,
        }
    }

    pub fn handle(&self) -> SupervisorHandle {
        self.handle.clone()
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(err) = self.task.await {
            warn!("supervisor task ended abnormally: {}", err);
        }
    }
}

enum PumpExit {
    SessionEnded,
    Shutdown,
}

async fn supervise(
    endpoint: Url,
    options: SupervisorOptions,
    mut request_rx: mpsc::Receiver<Request>,
    state_tx: watch::Sender<ConnectionState>,
    snapshot_tx: watch::Sender<StoreSnapshot>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut store = ReconciliationStore::new();
    let mut attempt: u32 = 0;

    loop {
        let opened = tokio::select! {
            opened = TransportSession::open(&endpoint, &options.transport) => opened,
            _ = shutdown_rx.changed() => break,
        };

        match opened {
            Ok(mut session) => {
                attempt = 0;
                state_tx.send_replace(ConnectionState::Connected);

                let exit = pump(
                    &mut session,
                    &mut store,
                    &snapshot_tx,
                    &mut request_rx,
                    &mut shutdown_rx,
                    options.resync_interval,
                )
                .await;
                let ended_in = session.current_state();
                session.close().await;

                if matches!(exit, PumpExit::Shutdown) {
                    break;
                }
                let next = if ended_in == ConnectionState::Errored {
                    ConnectionState::Errored
                } else {
                    ConnectionState::Disconnected
                };
                state_tx.send_replace(next);
                info!(endpoint = %endpoint, state = ?next, "session ended; reconnecting");
            }
            Err(err) => {
                warn!(attempt = attempt + 1, "{}", err);
                state_tx.send_replace(ConnectionState::Errored);
            }
        }

        attempt = attempt.saturating_add(1);
        let delay = options.backoff.delay_with_jitter(attempt);
        debug!(attempt, delay_ms = delay.as_millis() as u64, "backing off");
        if !wait_backoff(delay, &mut request_rx, &mut shutdown_rx).await {
            break;
        }
    }

    state_tx.send_replace(ConnectionState::Disconnected);
    info!(endpoint = %endpoint, "supervisor stopped");
}

async fn pump(
    session: &mut TransportSession,
    store: &mut ReconciliationStore,
    snapshot_tx: &watch::Sender<StoreSnapshot>,
    request_rx: &mut mpsc::Receiver<Request>,
    shutdown_rx: &mut watch::Receiver<bool>,
    resync_interval: Option<Duration>,
) -> PumpExit {
    let mut resync = resync_interval
        .filter(|period| !period.is_zero())
        .map(|period| {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

    loop {
        tokio::select! {
            inbound = session.recv() => match inbound {
                Some(message) => {
                    store.apply(message);
                    debug!(generation = store.generation(), items = store.len(), "store updated");
                    snapshot_tx.send_replace(store.snapshot());
                }
                None => return PumpExit::SessionEnded,
            },
            request = request_rx.recv() => match request {
                Some(request) => forward(session, request),
                None => return PumpExit::Shutdown,
            },
            _ = next_tick(&mut resync) => {
                debug!("requesting resync");
                let _ = session.send_control(ClientControl::Resync);
            }
            _ = shutdown_rx.changed() => return PumpExit::Shutdown,
        }
    }
}

fn forward(session: &TransportSession, request: Request) {
    match session.enqueue(request.message) {
        SendOutcome::Queued(receipt) => {
            tokio::spawn(async move {
                let _ = request.delivery.send(receipt.delivery().await);
            });
        }
        SendOutcome::Dropped(reason) => {
            debug!(?reason, "outbound message dropped by session");
            let _ = request.delivery.send(Delivery::Failed);
        }
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// Returns `false` when shutdown was requested while waiting.
async fn wait_backoff(
    delay: Duration,
    request_rx: &mut mpsc::Receiver<Request>,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> bool {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => return true,
            request = request_rx.recv() => match request {
                Some(request) => {
                    debug!("dropping outbound message: reconnecting");
                    let _ = request.delivery.send(Delivery::Failed);
                }
                None => return false,
            },
            _ = shutdown_rx.changed() => return false,
        }
    }
}
