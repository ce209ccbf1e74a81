use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::future::{self, BoxFuture, FutureExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::policy::{Admission, StartPolicy};
use super::types::{ConnectionEvent, ConnectionId, ConnectionStatus, PeerInfo};
use crate::error::RelayError;
use crate::metrics::{CONNECTION_ERRORS, START_REJECTIONS};
use crate::transcoder::{
    SessionConfig, Transcoder, TranscoderConfig, TranscoderEvent, TranscoderEventKind,
    TranscoderMonitor,
};

/// Outcome of a queued binary chunk, fed back through [`Connection::complete_write`].
#[derive(Debug)]
pub struct WriteCompletion {
    generation: Option<u64>,
    result: Result<(), RelayError>,
}

/// A binary chunk waiting for its write to finish.
pub type PendingWrite = BoxFuture<'static, WriteCompletion>;

/// Read-only view of a connection, safe to share with other tasks.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    remote_address: Option<SocketAddr>,
    connected_at: DateTime<Utc>,
    transcoder: Arc<Mutex<Option<TranscoderMonitor>>>,
}

impl ConnectionHandle {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn remote_address(&self) -> Option<SocketAddr> {
        self.remote_address
    }

    pub fn status(&self) -> ConnectionStatus {
        let transcoder = self
            .transcoder
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(TranscoderMonitor::status);

        ConnectionStatus {
            id: self.id,
            remote_address: self.remote_address,
            connected_at: self.connected_at,
            transcoder,
        }
    }

    fn attach(&self, monitor: Option<TranscoderMonitor>) {
        *self.transcoder.lock().unwrap_or_else(PoisonError::into_inner) = monitor;
    }
}

/// Per-client state machine. Idle until a start succeeds, active while a
/// transcoder is attached.
///
/// A connection is driven from a single task: client intents go through the
/// `on_*` methods, transcoder events (from the receiver returned by
/// [`Connection::new`]) through [`Connection::on_transcoder_event`], and
/// finished writes through [`Connection::complete_write`]. Notifications for
/// the client and operators are sent on the `events` channel.
pub struct Connection {
    peer: PeerInfo,
    handle: ConnectionHandle,
    transcoder_config: TranscoderConfig,
    policy: Option<Arc<dyn StartPolicy>>,
    transcoder: Option<Transcoder>,
    generation: u64,
    transcoder_events: mpsc::UnboundedSender<TranscoderEvent>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
}

impl Connection {
    pub fn new(
        peer: PeerInfo,
        transcoder_config: TranscoderConfig,
        policy: Option<Arc<dyn StartPolicy>>,
        events: mpsc::UnboundedSender<ConnectionEvent>,
    ) -> (Self, mpsc::UnboundedReceiver<TranscoderEvent>) {
        let (transcoder_events, transcoder_rx) = mpsc::unbounded_channel();
        let handle = ConnectionHandle {
            id: peer.id,
            remote_address: peer.remote_address,
            connected_at: Utc::now(),
            transcoder: Arc::new(Mutex::new(None)),
        };

        let connection = Self {
            peer,
            handle,
            transcoder_config,
            policy,
            transcoder: None,
            generation: 0,
            transcoder_events,
            events,
        };
        (connection, transcoder_rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.peer.id
    }

    pub fn peer(&self) -> &PeerInfo {
        &self.peer
    }

    pub fn handle(&self) -> ConnectionHandle {
        self.handle.clone()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.handle.status()
    }

    /// Whether a transcoder is attached.
    pub fn is_active(&self) -> bool {
        self.transcoder.is_some()
    }

    /// Handles a start request. A failure has already been reported as a
    /// connection error when this returns.
    pub async fn on_start(&mut self, config: SessionConfig) -> Result<(), RelayError> {
        debug!(connection = %self.id(), "start requested");
        let result = self.try_start(config).await;
        if let Err(error) = &result {
            warn!(connection = %self.id(), "start failed: {}", error);
            self.report(error.clone());
        }
        result
    }

    async fn try_start(&mut self, config: SessionConfig) -> Result<(), RelayError> {
        let admission = match &self.policy {
            Some(policy) => policy
                .admit(&self.peer, config)
                .await
                .map_err(|rejection| RelayError::cant_start(rejection.reason))?,
            None => Admission::new(config),
        };

        if let Err(error) = admission.config.validate() {
            START_REJECTIONS
                .with_label_values(&["invalid_parameters"])
                .inc();
            return Err(error);
        }

        self.detach();
        self.generation += 1;

        let mut transcoder = Transcoder::new(
            self.generation,
            admission.config,
            self.transcoder_config.clone(),
            self.transcoder_events.clone(),
            admission.slot,
        );
        transcoder.start();
        self.handle.attach(Some(transcoder.monitor()));
        self.transcoder = Some(transcoder);

        info!(connection = %self.id(), generation = self.generation, "transcoder attached");
        Ok(())
    }

    /// Destroys the active transcoder, if any.
    pub fn on_stop(&mut self) {
        debug!(connection = %self.id(), "stop requested");
        self.detach();
    }

    /// Queues a chunk for the active transcoder.
    ///
    /// The returned future completes when the write has been performed;
    /// hand its output to [`Connection::complete_write`]. Writes complete in
    /// the order they were queued.
    pub fn on_binary_stream(&mut self, data: Bytes) -> PendingWrite {
        match &self.transcoder {
            Some(transcoder) => {
                let generation = Some(transcoder.generation());
                transcoder
                    .send_data(data)
                    .map(move |result| WriteCompletion { generation, result })
                    .boxed()
            }
            None => future::ready(WriteCompletion {
                generation: None,
                result: Err(RelayError::NotRunning),
            })
            .boxed(),
        }
    }

    /// Applies the outcome of a finished write and returns it for the
    /// acknowledgment.
    pub fn complete_write(&mut self, completion: WriteCompletion) -> Result<(), RelayError> {
        let WriteCompletion { generation, result } = completion;
        if let Err(error) = &result {
            self.report(error.clone());
            if error.is_fatal() && generation.is_some() && generation == self.current_generation()
            {
                self.detach();
            }
        }
        result
    }

    /// Applies an event from a transcoder this connection started.
    pub fn on_transcoder_event(&mut self, event: TranscoderEvent) {
        let current = self.current_generation() == Some(event.generation);

        match event.kind {
            TranscoderEventKind::Output(line) => {
                self.emit(ConnectionEvent::Output(line));
            }
            TranscoderEventKind::Error(error) if current => {
                self.report(error.clone());
                if error.is_fatal() {
                    self.detach();
                }
            }
            TranscoderEventKind::Error(error) => {
                debug!(
                    connection = %self.id(),
                    generation = event.generation,
                    "dropping error from detached transcoder: {}",
                    error
                );
            }
            TranscoderEventKind::Destroyed => {
                if current {
                    self.transcoder = None;
                    self.handle.attach(None);
                }
                self.emit(ConnectionEvent::Destroyed);
            }
        }
    }

    /// Tears down the active transcoder. The connection accepts no further
    /// intents after this.
    pub fn on_disconnect(&mut self) {
        info!(connection = %self.id(), "disconnected");
        self.detach();
    }

    fn current_generation(&self) -> Option<u64> {
        self.transcoder.as_ref().map(Transcoder::generation)
    }

    fn detach(&mut self) {
        if let Some(mut transcoder) = self.transcoder.take() {
            debug!(
                connection = %self.id(),
                generation = transcoder.generation(),
                "destroying transcoder"
            );
            transcoder.destroy();
            self.handle.attach(None);
        }
    }

    fn report(&self, error: RelayError) {
        CONNECTION_ERRORS.with_label_values(&[error.name()]).inc();
        self.emit(ConnectionEvent::Error(error));
    }

    fn emit(&self, event: ConnectionEvent) {
        let _ = self.events.send(event);
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.detach();
    }
}
