//! Resilient relay channel.
//!
//! ```text
//!               start(targets)                 stream opened
//! disconnected ───────────────▶ connecting ───────────────────▶ connected
//!      ▲   ▲                     ▲     │                          │  │
//!      │   │  retry after delay  │     │ error                    │  │ stream ended
//!      │   └─────────────────────┼─────┴──────────────────────────┘  │ (reconnect)
//!      │                         └───────────────────────────────────┘
//!      └── stop()          connectivity loss goes to noConnection instead
//! ```
//!
//! Every start, stop and fired retry bumps a generation counter. A task or
//! timer whose generation is stale never touches the shared state again.
//!
//! Inbound events reach their consumer through a bounded queue. The stream is
//! not read further while the queue is full, and the resume id only moves past
//! an event once the queue has accepted it, so a slow consumer delays events
//! but never loses them.

mod http;
mod sse;

use std::{io::ErrorKind, pin::Pin, sync::Arc, time::Duration};

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use self::{
    http::HttpBridge,
    sse::{parse_sse_events, SseEvent},
};
use crate::dto::BridgeMessage;

const UPDATES_CAPACITY: usize = 64;
const EVENTS_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BridgeError {
    /// The relay could not be reached at all.
    #[error("bridge unreachable: {0}")]
    Connectivity(String),
    #[error("bridge responded with HTTP {0}")]
    Status(u16),
    #[error("bridge stream failed: {0}")]
    Stream(String),
}

impl BridgeError {
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Connectivity(_))
    }
}

impl From<reqwest::Error> for BridgeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            Self::Connectivity(err.to_string())
        } else if let Some(status) = err.status() {
            Self::Status(status.as_u16())
        } else if is_connection_loss(&err) {
            Self::Connectivity(err.to_string())
        } else {
            Self::Stream(err.to_string())
        }
    }
}

/// An I/O error in the source chain that means the peer or the network went
/// away, as when a body read dies mid-stream.
fn is_connection_loss(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut source = Some(err);
    while let Some(err) = source {
        if let Some(io) = err.downcast_ref::<std::io::Error>() {
            if matches!(
                io.kind(),
                ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::NotConnected
                    | ErrorKind::BrokenPipe
                    | ErrorKind::UnexpectedEof
                    | ErrorKind::TimedOut
            ) {
                return true;
            }
        }
        source = err.source();
    }
    false
}

pub type EventStream = Pin<Box<dyn Stream<Item = Result<SseEvent, BridgeError>> + Send>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    /// Own session client id.
    pub from: String,
    pub to: String,
    pub ttl: Duration,
    /// Ciphertext, base64 encoded on the wire.
    pub body: Vec<u8>,
}

/// Wire access to the relay.
#[async_trait]
pub trait BridgeApi: Send + Sync {
    async fn send(&self, message: OutgoingMessage) -> Result<(), BridgeError>;

    async fn listen(
        &self,
        client_ids: &[String],
        last_event_id: Option<&str>,
    ) -> Result<EventStream, BridgeError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeConnectionState {
    Disconnected,
    Connecting,
    Connected,
    NoConnection,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeEvent {
    pub event_id: Option<String>,
    pub message: BridgeMessage,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeUpdate {
    State(BridgeConnectionState),
    Event(BridgeEvent),
}

struct Control {
    state: BridgeConnectionState,
    targets: Vec<String>,
    generation: u64,
    task: Option<CancellationToken>,
    retry: Option<CancellationToken>,
    last_event_id: Option<String>,
}

struct Shared {
    api: Arc<dyn BridgeApi>,
    retry_delay: Duration,
    updates: broadcast::Sender<BridgeUpdate>,
    events: mpsc::Sender<BridgeEvent>,
    control: Mutex<Control>,
}

/// Owner of the single relay subscription of a wallet runtime.
#[derive(Clone)]
pub struct BridgeTransport {
    shared: Arc<Shared>,
}

impl BridgeTransport {
    /// The receiver is the lossless feed of inbound events. Dropping it turns
    /// delivery into broadcast only.
    pub fn new(
        api: Arc<dyn BridgeApi>,
        retry_delay: Duration,
    ) -> (Self, mpsc::Receiver<BridgeEvent>) {
        let (updates, _) = broadcast::channel(UPDATES_CAPACITY);
        let (events, inbound) = mpsc::channel(EVENTS_CAPACITY);
        let transport = Self {
            shared: Arc::new(Shared {
                api,
                retry_delay,
                updates,
                events,
                control: Mutex::new(Control {
                    state: BridgeConnectionState::Disconnected,
                    targets: Vec::new(),
                    generation: 0,
                    task: None,
                    retry: None,
                    last_event_id: None,
                }),
            }),
        };
        (transport, inbound)
    }

    /// State changes and a copy of every delivered event. Lagging observers
    /// miss updates; observers unsubscribe by dropping the receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<BridgeUpdate> {
        self.shared.updates.subscribe()
    }

    pub fn state(&self) -> BridgeConnectionState {
        self.shared.control.lock().state
    }

    pub fn last_event_id(&self) -> Option<String> {
        self.shared.control.lock().last_event_id.clone()
    }

    /// Resume point for a fresh process, usually persisted by the host.
    pub fn set_last_event_id(&self, id: Option<String>) {
        self.shared.control.lock().last_event_id = id;
    }

    /// (Re)connects to `targets` unless already connecting/connected to the same set.
    pub fn start<I>(&self, targets: I)
    where
        I: IntoIterator<Item = String>,
    {
        let mut targets: Vec<String> = targets.into_iter().collect();
        targets.sort();
        targets.dedup();
        Shared::start(&self.shared, targets);
    }

    pub fn stop(&self) {
        let mut control = self.shared.control.lock();
        control.generation += 1;
        cancel_pending(&mut control);
        control.targets.clear();
        info!("bridge stopped");
        self.shared
            .set_state(&mut control, BridgeConnectionState::Disconnected);
    }

    pub async fn send(&self, message: OutgoingMessage) -> Result<(), BridgeError> {
        self.shared.api.send(message).await
    }
}

impl Shared {
    fn start(self: &Arc<Self>, targets: Vec<String>) {
        let mut control = self.control.lock();
        let busy = matches!(
            control.state,
            BridgeConnectionState::Connecting | BridgeConnectionState::Connected
        );
        if busy && control.targets == targets {
            debug!(targets = targets.len(), "bridge already running for these clients");
            return;
        }

        control.generation += 1;
        cancel_pending(&mut control);
        control.targets = targets.clone();

        if targets.is_empty() {
            self.set_state(&mut control, BridgeConnectionState::Disconnected);
            return;
        }

        let token = CancellationToken::new();
        control.task = Some(token.clone());
        let generation = control.generation;
        info!(targets = targets.len(), generation, "bridge connecting");
        self.set_state(&mut control, BridgeConnectionState::Connecting);
        drop(control);

        tokio::spawn(Arc::clone(self).run(targets, generation, token));
    }

    async fn run(self: Arc<Self>, targets: Vec<String>, generation: u64, token: CancellationToken) {
        loop {
            let last_event_id = self.control.lock().last_event_id.clone();
            let opened = tokio::select! {
                _ = token.cancelled() => return,
                opened = self.api.listen(&targets, last_event_id.as_deref()) => opened,
            };
            let mut stream = match opened {
                Ok(stream) => stream,
                Err(err) => return self.fail(generation, err),
            };

            if !self.transition(generation, BridgeConnectionState::Connected) {
                return;
            }
            info!("bridge connected");

            loop {
                let next = tokio::select! {
                    _ = token.cancelled() => return,
                    next = stream.next() => next,
                };
                match next {
                    Some(Ok(event)) => {
                        if !self.deliver(generation, event, &token).await {
                            return;
                        }
                    }
                    Some(Err(err)) => return self.fail(generation, err),
                    None => break,
                }
            }

            if !self.transition(generation, BridgeConnectionState::Connecting) {
                return;
            }
            info!("bridge stream ended, reconnecting");
        }
    }

    fn transition(&self, generation: u64, state: BridgeConnectionState) -> bool {
        let mut control = self.control.lock();
        if control.generation != generation {
            return false;
        }
        self.set_state(&mut control, state);
        true
    }

    fn fail(self: Arc<Self>, generation: u64, err: BridgeError) {
        let mut control = self.control.lock();
        if control.generation != generation {
            return;
        }

        let state = if err.is_connectivity() {
            BridgeConnectionState::NoConnection
        } else {
            BridgeConnectionState::Disconnected
        };
        warn!(error = %err, ?state, "bridge failed, retrying in {:?}", self.retry_delay);
        control.task = None;
        self.set_state(&mut control, state);

        let retry = CancellationToken::new();
        control.retry = Some(retry.clone());
        let targets = control.targets.clone();
        drop(control);

        let shared = Arc::clone(&self);
        tokio::spawn(async move {
            tokio::select! {
                _ = retry.cancelled() => {}
                _ = tokio::time::sleep(shared.retry_delay) => {
                    {
                        let mut control = shared.control.lock();
                        if control.generation != generation {
                            return;
                        }
                        control.retry = None;
                    }
                    debug!("bridge retry fired");
                    Shared::start(&shared, targets);
                }
            }
        });
    }

    /// Hands one event to the consumer. `false` when this task is stale.
    async fn deliver(&self, generation: u64, event: SseEvent, token: &CancellationToken) -> bool {
        if event.is_heartbeat() {
            return true;
        }

        {
            let control = self.control.lock();
            if control.generation != generation {
                return false;
            }
            if let Some(id) = &event.id {
                if is_replay(control.last_event_id.as_deref(), id) {
                    debug!(%id, "skipping already delivered bridge event");
                    return true;
                }
            }
        }

        let parsed = match serde_json::from_str::<BridgeMessage>(&event.data) {
            Ok(message) => Some(BridgeEvent {
                event_id: event.id.clone(),
                message,
            }),
            Err(e) => {
                warn!(error = %e, id = ?event.id, "dropping unparsable bridge event");
                None
            }
        };

        if let Some(parsed) = &parsed {
            tokio::select! {
                _ = token.cancelled() => return false,
                sent = self.events.send(parsed.clone()) => {
                    if sent.is_err() {
                        debug!("no event consumer, broadcasting only");
                    }
                }
            }
        }

        {
            let mut control = self.control.lock();
            if control.generation != generation {
                return false;
            }
            if let Some(id) = event.id {
                control.last_event_id = Some(id);
            }
        }

        if let Some(parsed) = parsed {
            // no receivers is fine
            let _ = self.updates.send(BridgeUpdate::Event(parsed));
        }
        true
    }

    fn set_state(&self, control: &mut Control, state: BridgeConnectionState) {
        control.state = state;
        let _ = self.updates.send(BridgeUpdate::State(state));
    }
}

fn cancel_pending(control: &mut Control) {
    if let Some(task) = control.task.take() {
        task.cancel();
    }
    if let Some(retry) = control.retry.take() {
        retry.cancel();
    }
}

fn is_replay(last: Option<&str>, id: &str) -> bool {
    match (last.and_then(|l| l.parse::<u64>().ok()), id.parse::<u64>().ok()) {
        (Some(last), Some(id)) => id <= last,
        _ => false,
    }
}
