//! Supervision of a single ffmpeg process.

use std::future::Future;
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use bytes::Bytes;
use chrono::Utc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

use super::config::TranscoderConfig;
use super::diagnostics::{classify, Diagnostic, LineSplitter};
use super::session::SessionConfig;
use super::slots::TranscodeSlot;
use super::types::{
    ProcessRecord, TranscoderEvent, TranscoderEventKind, TranscoderState, TranscoderStatus,
};
use crate::error::RelayError;
use crate::metrics::{TRANSCODES_RUNNING, TRANSCODES_STARTED, TRANSCODE_DURATION, TRANSCODE_EXITS};

const READ_BUFFER_SIZE: usize = 8 * 1024;

/// Shared process record plus the flag telling helpers whether an exit was asked for.
///
/// The admission slot lives here so that whichever comes first, `destroy` or
/// an unrequested exit, releases it.
#[derive(Debug)]
struct Shared {
    record: ProcessRecord,
    shutdown_requested: bool,
    slot: Option<TranscodeSlot>,
}

type SharedRecord = Arc<Mutex<Shared>>;

fn lock(shared: &SharedRecord) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

struct WriteRequest {
    data: Bytes,
    done: oneshot::Sender<Result<(), RelayError>>,
}

/// Read-only handle onto a transcoder's status, usable from other tasks.
#[derive(Debug, Clone)]
pub struct TranscoderMonitor {
    shared: SharedRecord,
    session: SessionConfig,
}

impl TranscoderMonitor {
    pub fn status(&self) -> TranscoderStatus {
        let shared = lock(&self.shared);
        TranscoderStatus {
            state: shared.record.state,
            frames_sent: shared.record.frames_sent,
            last_frame_sent_at: shared.record.last_frame_sent_at,
            pid: shared.record.pid,
            config: self.session.clone(),
        }
    }
}

/// Owns one ffmpeg process: starts it, feeds it, watches it, kills it.
///
/// Events are reported on the channel given at construction, tagged with
/// this transcoder's generation. Exactly one [`TranscoderEventKind::Destroyed`]
/// is sent once the process is gone. Dropping a transcoder destroys it.
pub struct Transcoder {
    generation: u64,
    session: SessionConfig,
    config: TranscoderConfig,
    shared: SharedRecord,
    events: mpsc::UnboundedSender<TranscoderEvent>,
    writer: Option<mpsc::UnboundedSender<WriteRequest>>,
    kill: Option<oneshot::Sender<()>>,
}

impl Transcoder {
    pub fn new(
        generation: u64,
        session: SessionConfig,
        config: TranscoderConfig,
        events: mpsc::UnboundedSender<TranscoderEvent>,
        slot: Option<TranscodeSlot>,
    ) -> Self {
        Self {
            generation,
            session,
            config,
            shared: Arc::new(Mutex::new(Shared {
                record: ProcessRecord::new(),
                shutdown_requested: false,
                slot,
            })),
            events,
            writer: None,
            kill: None,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn monitor(&self) -> TranscoderMonitor {
        TranscoderMonitor {
            shared: Arc::clone(&self.shared),
            session: self.session.clone(),
        }
    }

    pub fn status(&self) -> TranscoderStatus {
        self.monitor().status()
    }

    /// Full argument list passed to ffmpeg.
    pub fn args(&self) -> Vec<String> {
        self.config
            .global_args
            .iter()
            .cloned()
            .chain(self.session.ffmpeg_args())
            .collect()
    }

    /// Spawns ffmpeg and the tasks that supervise it.
    ///
    /// Launch failures are reported as events (followed by `Destroyed`), not
    /// returned. Must be called at most once, from within a tokio runtime.
    pub fn start(&mut self) {
        let args = self.args();
        info!(
            generation = self.generation,
            ffmpeg = %self.config.ffmpeg_path.display(),
            destination = %self.session.rtmp,
            "Starting ffmpeg"
        );
        debug!("ffmpeg args: {:?}", args);

        let spawned = Command::new(&self.config.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                let error = if e.kind() == std::io::ErrorKind::NotFound {
                    RelayError::NotFound {
                        path: self.config.ffmpeg_path.clone(),
                    }
                } else {
                    RelayError::process(e.to_string())
                };
                warn!(generation = self.generation, "Failed to spawn ffmpeg: {}", e);
                let slot = {
                    let mut shared = lock(&self.shared);
                    shared.record.state = TranscoderState::Ended;
                    shared.slot.take()
                };
                drop(slot);
                self.emit(TranscoderEventKind::Error(error));
                self.emit(TranscoderEventKind::Destroyed);
                return;
            }
        };

        let pid = child.id();
        {
            let mut shared = lock(&self.shared);
            shared.record.pid = pid;
            shared.record.state = TranscoderState::Running;
        }
        TRANSCODES_STARTED.inc();
        TRANSCODES_RUNNING.inc();
        info!(generation = self.generation, pid = ?pid, "ffmpeg running");

        let ctx = DiagnosticContext {
            generation: self.generation,
            shared: Arc::clone(&self.shared),
            events: self.events.clone(),
        };

        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(read_diagnostics(stdout, ctx.clone())));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(read_diagnostics(stderr, ctx.clone())));
        }

        let (writer_tx, writer_rx) = mpsc::unbounded_channel();
        tokio::spawn(write_input(
            child.stdin.take(),
            writer_rx,
            Arc::clone(&self.shared),
        ));
        self.writer = Some(writer_tx);

        let (kill_tx, kill_rx) = oneshot::channel();
        self.kill = Some(kill_tx);

        tokio::spawn(observe_exit(
            child,
            kill_rx,
            readers,
            ExitContext {
                diagnostics: ctx,
                drain_timeout: self.config.drain_timeout(),
                started_at: Instant::now(),
            },
        ));
    }

    /// Queues `data` for ffmpeg's stdin.
    ///
    /// The write is queued immediately, in call order; the returned future
    /// resolves once it has been performed. Fails with `NotRunning` unless
    /// the process is running.
    pub fn send_data(
        &self,
        data: Bytes,
    ) -> impl Future<Output = Result<(), RelayError>> + Send + 'static {
        let queued = self.enqueue(data);
        let shared = Arc::clone(&self.shared);
        async move {
            let done = queued?;
            match done.await {
                Ok(result) => result,
                Err(_) if lock(&shared).shutdown_requested => Ok(()),
                Err(_) => Err(RelayError::write("ffmpeg input closed")),
            }
        }
    }

    fn enqueue(&self, data: Bytes) -> Result<oneshot::Receiver<Result<(), RelayError>>, RelayError> {
        if lock(&self.shared).record.state != TranscoderState::Running {
            return Err(RelayError::NotRunning);
        }
        let writer = self.writer.as_ref().ok_or(RelayError::NotRunning)?;
        let (done, rx) = oneshot::channel();
        writer
            .send(WriteRequest { data, done })
            .map_err(|_| RelayError::write("ffmpeg input closed"))?;
        Ok(rx)
    }

    /// Kills the process and gives back its admission slot. Idempotent.
    ///
    /// The slot is released immediately; the process itself is reaped in
    /// the background.
    pub fn destroy(&mut self) {
        let slot = {
            let mut shared = lock(&self.shared);
            match shared.record.state {
                TranscoderState::Ended => {}
                TranscoderState::Created => {
                    shared.shutdown_requested = true;
                    shared.record.state = TranscoderState::Ended;
                }
                TranscoderState::Running | TranscoderState::Ending => {
                    shared.shutdown_requested = true;
                    shared.record.state = TranscoderState::Ending;
                }
            }
            shared.slot.take()
        };
        drop(slot);

        self.writer.take();
        if let Some(kill) = self.kill.take() {
            debug!(generation = self.generation, "Killing ffmpeg");
            let _ = kill.send(());
        }
    }

    fn emit(&self, kind: TranscoderEventKind) {
        let _ = self.events.send(TranscoderEvent {
            generation: self.generation,
            kind,
        });
    }
}

impl Drop for Transcoder {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[derive(Clone)]
struct DiagnosticContext {
    generation: u64,
    shared: SharedRecord,
    events: mpsc::UnboundedSender<TranscoderEvent>,
}

impl DiagnosticContext {
    fn emit(&self, kind: TranscoderEventKind) {
        let _ = self.events.send(TranscoderEvent {
            generation: self.generation,
            kind,
        });
    }

    fn handle_line(&self, line: String) {
        trace!(generation = self.generation, "ffmpeg: {}", line);
        let diagnostic = classify(&line);

        {
            let mut shared = lock(&self.shared);
            shared.record.last_output = Some(line.clone());
            if let Diagnostic::Progress { frames } = diagnostic {
                shared.record.record_progress(frames, Utc::now());
            }
        }

        match diagnostic {
            Diagnostic::ConnectionRefused => {
                self.emit(TranscoderEventKind::Error(RelayError::RtmpConnectionFailed {
                    output: line,
                }));
            }
            Diagnostic::Progress { .. } | Diagnostic::Other => {
                self.emit(TranscoderEventKind::Output(line));
            }
        }
    }
}

async fn read_diagnostics<R>(mut reader: R, ctx: DiagnosticContext)
where
    R: AsyncRead + Unpin,
{
    let mut splitter = LineSplitter::new();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                for line in splitter.push(&buf[..n]) {
                    ctx.handle_line(line);
                }
            }
            Err(e) => {
                debug!(generation = ctx.generation, "ffmpeg output stream error: {}", e);
                break;
            }
        }
    }

    if let Some(line) = splitter.finish() {
        ctx.handle_line(line);
    }
}

async fn write_input(
    stdin: Option<ChildStdin>,
    mut requests: mpsc::UnboundedReceiver<WriteRequest>,
    shared: SharedRecord,
) {
    let Some(mut stdin) = stdin else {
        while let Some(request) = requests.recv().await {
            let _ = request
                .done
                .send(Err(RelayError::write("ffmpeg stdin is not available")));
        }
        return;
    };

    while let Some(request) = requests.recv().await {
        let result = match stdin.write_all(&request.data).await {
            Ok(()) => Ok(()),
            Err(e) => write_failure(e, &shared),
        };
        let _ = request.done.send(result);
    }
}

/// Broken pipes are expected once a kill has been requested.
fn write_failure(error: std::io::Error, shared: &SharedRecord) -> Result<(), RelayError> {
    if error.kind() == std::io::ErrorKind::BrokenPipe && lock(shared).shutdown_requested {
        debug!("Ignoring broken pipe on ffmpeg stdin during shutdown");
        return Ok(());
    }
    Err(RelayError::write(error.to_string()))
}

struct ExitContext {
    diagnostics: DiagnosticContext,
    drain_timeout: Duration,
    started_at: Instant,
}

async fn observe_exit(
    mut child: Child,
    kill: oneshot::Receiver<()>,
    readers: Vec<JoinHandle<()>>,
    ctx: ExitContext,
) {
    let generation = ctx.diagnostics.generation;

    // A dropped sender counts as a kill request too.
    let status = tokio::select! {
        status = child.wait() => status,
        _ = kill => {
            if let Err(e) = child.start_kill() {
                debug!(generation, "start_kill failed: {}", e);
            }
            child.wait().await
        }
    };

    let abort_handles: Vec<_> = readers.iter().map(|r| r.abort_handle()).collect();
    if timeout(ctx.drain_timeout, futures::future::join_all(readers))
        .await
        .is_err()
    {
        warn!(generation, "ffmpeg output did not close after exit, abandoning readers");
        for handle in abort_handles {
            handle.abort();
        }
    }

    // Only an exit nobody asked for still holds the slot here.
    let (requested, last_output, slot) = {
        let mut shared = lock(&ctx.diagnostics.shared);
        shared.record.state = TranscoderState::Ended;
        (
            shared.shutdown_requested,
            shared.record.last_output.clone(),
            shared.slot.take(),
        )
    };
    drop(slot);

    let reason = if requested { "requested" } else { "unexpected" };
    TRANSCODES_RUNNING.dec();
    TRANSCODE_EXITS.with_label_values(&[reason]).inc();
    TRANSCODE_DURATION
        .with_label_values(&[reason])
        .observe(ctx.started_at.elapsed().as_secs_f64());

    match status {
        Ok(status) => {
            info!(generation, %status, requested, "ffmpeg exited");
            if !requested {
                ctx.diagnostics
                    .emit(TranscoderEventKind::Error(RelayError::UnexpectedEnd {
                        last_output,
                    }));
            }
        }
        Err(e) => {
            warn!(generation, "Failed to wait for ffmpeg: {}", e);
            if !requested {
                ctx.diagnostics
                    .emit(TranscoderEventKind::Error(RelayError::process(e.to_string())));
            }
        }
    }

    ctx.diagnostics.emit(TranscoderEventKind::Destroyed);
}
