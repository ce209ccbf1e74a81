//! The relay orchestrator.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use futures::stream::{FuturesOrdered, StreamExt};
use tokio::sync::{broadcast, mpsc, Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::admission::AdmissionPolicy;
use super::events::RelayEvent;
use super::options::RelayOptions;
use crate::connection::{
    Connection, ConnectionEvent, ConnectionHandle, ConnectionId, ConnectionStatus, PeerInfo,
    StartPolicy, WriteCompletion,
};
use crate::error::{ErrorPayload, RelayError};
use crate::protocol::{AckToken, ChannelEvent, ServerMessage};
use crate::transcoder::{TranscodeSlots, TranscoderEvent, TranscoderEventKind};

const EVENT_CAPACITY: usize = 1024;
const CHANNEL_CAPACITY: usize = 64;

/// Owns every live connection of one relay.
///
/// Cloning is cheap; clones share the same registry. Several independent
/// relays can coexist in one process.
#[derive(Clone)]
pub struct RelayServer {
    inner: Arc<Inner>,
}

struct Inner {
    options: RelayOptions,
    policy: Arc<AdmissionPolicy>,
    slots: TranscodeSlots,
    registry: RwLock<HashMap<ConnectionId, Entry>>,
    accepted: AtomicU64,
    events: broadcast::Sender<RelayEvent>,
    shutting_down: AtomicBool,
    shutdown_tx: broadcast::Sender<()>,
    drained: Notify,
}

struct Entry {
    seq: u64,
    handle: ConnectionHandle,
}

/// A registered connection that has not started processing intents yet.
struct Accepted {
    connection: Connection,
    transcoder_rx: mpsc::UnboundedReceiver<TranscoderEvent>,
    events_rx: mpsc::UnboundedReceiver<ConnectionEvent>,
}

/// Client-side ends of a connection started with [`RelayServer::spawn_connection`].
pub struct ClientChannel {
    pub id: ConnectionId,
    pub intents: mpsc::Sender<ChannelEvent>,
    pub messages: mpsc::Receiver<ServerMessage>,
    pub task: JoinHandle<()>,
}

impl RelayServer {
    pub fn new(options: RelayOptions) -> Self {
        let slots = TranscodeSlots::new();
        let policy = AdmissionPolicy::new(slots.clone())
            .with_limit(options.max_concurrent_transcodes)
            .with_hook(options.start_hook.clone())
            .with_allowed_destinations(options.rtmp_url_pattern.clone());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            inner: Arc::new(Inner {
                options,
                policy: Arc::new(policy),
                slots,
                registry: RwLock::new(HashMap::new()),
                accepted: AtomicU64::new(0),
                events,
                shutting_down: AtomicBool::new(false),
                shutdown_tx,
                drained: Notify::new(),
            }),
        }
    }

    pub fn options(&self) -> &RelayOptions {
        &self.inner.options
    }

    /// Subscribes to operator events from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<RelayEvent> {
        self.inner.events.subscribe()
    }

    /// Number of transcodes holding a slot (running or still exiting).
    pub fn active_transcodes(&self) -> usize {
        self.inner.slots.active()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutting_down.load(Ordering::SeqCst)
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.registry.read().await.len()
    }

    /// Snapshots of every live connection, in accept order.
    pub async fn connections(&self) -> Vec<ConnectionStatus> {
        let registry = self.inner.registry.read().await;
        let mut entries: Vec<&Entry> = registry.values().collect();
        entries.sort_by_key(|entry| entry.seq);
        entries.iter().map(|entry| entry.handle.status()).collect()
    }

    pub async fn connection(&self, id: ConnectionId) -> Option<ConnectionStatus> {
        self.inner
            .registry
            .read()
            .await
            .get(&id)
            .map(|entry| entry.handle.status())
    }

    /// Runs a connection until the client disconnects or the relay shuts down.
    ///
    /// `inbound` carries the client's intents; closing it counts as a
    /// disconnect. Notifications for the client are sent on `outbound`.
    pub async fn serve_connection(
        &self,
        peer: PeerInfo,
        inbound: mpsc::Receiver<ChannelEvent>,
        outbound: mpsc::Sender<ServerMessage>,
    ) {
        let mut shutdown_rx = self.inner.shutdown_tx.subscribe();
        if self.is_shutting_down() {
            debug!(connection = %peer.id, "refusing connection during shutdown");
            return;
        }
        let accepted = self.accept(peer).await;
        self.run(accepted, inbound, outbound, &mut shutdown_rx).await;
    }

    /// Registers a connection and drives it on a new task.
    pub async fn spawn_connection(&self, peer: PeerInfo) -> ClientChannel {
        let (intents, inbound) = mpsc::channel(CHANNEL_CAPACITY);
        let (outbound, messages) = mpsc::channel(CHANNEL_CAPACITY);
        let id = peer.id;

        let mut shutdown_rx = self.inner.shutdown_tx.subscribe();
        let task = if self.is_shutting_down() {
            tokio::spawn(async {})
        } else {
            let accepted = self.accept(peer).await;
            let server = self.clone();
            tokio::spawn(async move {
                server
                    .run(accepted, inbound, outbound, &mut shutdown_rx)
                    .await;
            })
        };

        ClientChannel {
            id,
            intents,
            messages,
            task,
        }
    }

    /// Disconnects every connection and waits until all are gone.
    pub async fn shutdown(&self) {
        if !self.inner.shutting_down.swap(true, Ordering::SeqCst) {
            info!("Shutting down relay");
        }
        let _ = self.inner.shutdown_tx.send(());

        loop {
            let drained = self.inner.drained.notified();
            if self.inner.registry.read().await.is_empty() {
                break;
            }
            drained.await;
        }
        info!("All connections closed");
    }

    async fn accept(&self, peer: PeerInfo) -> Accepted {
        let id = peer.id;
        let remote_address = peer.remote_address;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let policy: Arc<dyn StartPolicy> = self.inner.policy.clone();
        let (connection, transcoder_rx) = Connection::new(
            peer,
            self.inner.options.transcoder.clone(),
            Some(policy),
            events_tx,
        );

        let seq = self.inner.accepted.fetch_add(1, Ordering::SeqCst);
        self.inner.registry.write().await.insert(
            id,
            Entry {
                seq,
                handle: connection.handle(),
            },
        );
        info!(connection = %id, remote = ?remote_address, "Connection accepted");
        self.publish(RelayEvent::Connection { id, remote_address });

        Accepted {
            connection,
            transcoder_rx,
            events_rx,
        }
    }

    async fn run(
        &self,
        accepted: Accepted,
        mut inbound: mpsc::Receiver<ChannelEvent>,
        outbound: mpsc::Sender<ServerMessage>,
        shutdown_rx: &mut broadcast::Receiver<()>,
    ) {
        let Accepted {
            mut connection,
            mut transcoder_rx,
            mut events_rx,
        } = accepted;
        let id = connection.id();
        let mut writes: FuturesOrdered<BoxFuture<'static, (Option<AckToken>, WriteCompletion)>> =
            FuturesOrdered::new();

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    debug!(connection = %id, "Connection received shutdown signal");
                    break;
                }
                intent = inbound.recv() => {
                    let Some(intent) = intent else { break };
                    debug!(connection = %id, intent = intent.name(), "intent received");
                    match intent {
                        ChannelEvent::Start { config, ack } => {
                            let result = connection.on_start(config).await;
                            self.dispatch(id, &mut events_rx, &outbound).await;
                            self.acknowledge(ack, result, &outbound).await;
                        }
                        ChannelEvent::Stop { ack } => {
                            connection.on_stop();
                            self.dispatch(id, &mut events_rx, &outbound).await;
                            self.acknowledge(ack, Ok(()), &outbound).await;
                        }
                        ChannelEvent::BinaryStream { data, ack } => {
                            writes.push_back(
                                connection
                                    .on_binary_stream(data)
                                    .map(move |completion| (ack, completion))
                                    .boxed(),
                            );
                        }
                        ChannelEvent::Disconnect => break,
                    }
                }
                Some((ack, completion)) = writes.next(), if !writes.is_empty() => {
                    let result = connection.complete_write(completion);
                    self.dispatch(id, &mut events_rx, &outbound).await;
                    self.acknowledge(ack, result, &outbound).await;
                }
                Some(event) = transcoder_rx.recv() => {
                    connection.on_transcoder_event(event);
                    self.dispatch(id, &mut events_rx, &outbound).await;
                }
            }
        }

        connection.on_disconnect();
        self.dispatch(id, &mut events_rx, &outbound).await;
        drop(connection);
        self.unregister(id).await;

        // Whatever the detached transcoders still report goes to operators only.
        let events = self.inner.events.clone();
        tokio::spawn(async move {
            while let Some(event) = transcoder_rx.recv().await {
                let relayed = match event.kind {
                    TranscoderEventKind::Output(line) => RelayEvent::FfmpegOutput { id, line },
                    TranscoderEventKind::Destroyed => RelayEvent::Destroyed { id },
                    TranscoderEventKind::Error(_) => continue,
                };
                let _ = events.send(relayed);
            }
        });
    }

    /// Removes a connection from the registry. Only the first call for an id
    /// has any effect.
    async fn unregister(&self, id: ConnectionId) {
        let removed = self.inner.registry.write().await.remove(&id);
        if removed.is_some() {
            info!(connection = %id, "Connection removed");
            self.publish(RelayEvent::Disconnected { id });
            self.inner.drained.notify_waiters();
        }
    }

    /// Routes everything the connection has reported to the client and to
    /// operators.
    async fn dispatch(
        &self,
        id: ConnectionId,
        events_rx: &mut mpsc::UnboundedReceiver<ConnectionEvent>,
        outbound: &mpsc::Sender<ServerMessage>,
    ) {
        while let Ok(event) = events_rx.try_recv() {
            let message = match event {
                ConnectionEvent::Error(error) => {
                    warn!(connection = %id, kind = error.name(), "{}", error);
                    let payload = self.client_payload(&error);
                    self.publish(RelayEvent::Error { id, error });
                    Some(ServerMessage::Error(payload))
                }
                ConnectionEvent::Output(line) => {
                    let message = self
                        .inner
                        .options
                        .send_ffmpeg_output
                        .then(|| ServerMessage::FfmpegOutput { text: line.clone() });
                    self.publish(RelayEvent::FfmpegOutput { id, line });
                    message
                }
                ConnectionEvent::Destroyed => {
                    self.publish(RelayEvent::Destroyed { id });
                    None
                }
            };

            if let Some(message) = message {
                deliver(outbound, message).await;
            }
        }
    }

    async fn acknowledge(
        &self,
        ack: Option<AckToken>,
        result: Result<(), RelayError>,
        outbound: &mpsc::Sender<ServerMessage>,
    ) {
        if let Some(token) = ack {
            let error = result.err().map(|e| self.client_payload(&e));
            deliver(outbound, ServerMessage::Ack { token, error }).await;
        }
    }

    fn client_payload(&self, error: &RelayError) -> ErrorPayload {
        if self.inner.options.send_error_details {
            error.to_payload()
        } else {
            error.to_redacted_payload()
        }
    }

    fn publish(&self, event: RelayEvent) {
        // No subscribers is fine.
        let _ = self.inner.events.send(event);
    }
}

async fn deliver(outbound: &mpsc::Sender<ServerMessage>, message: ServerMessage) {
    if outbound.send(message).await.is_err() {
        debug!("Client channel closed, dropping message");
    }
}
