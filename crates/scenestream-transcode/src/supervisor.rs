//! Encoder process supervision.
//!
//! [`EncoderSupervisor`] is the seam between session bookkeeping and real
//! OS processes. [`FfmpegSupervisor`] launches one ffmpeg per request and
//! reports its exit as an [`EncoderEvent`] on a channel owned by the
//! session store, so state transitions never run inside a process callback.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use scenestream_common::{Error, Result, SessionId};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::diagnostics::{
    classify_line, shared_diagnostics, LineClass, ProgressThrottle, SharedDiagnostics,
};
use crate::encoder::{ffmpeg_args, EncodeRequest};
use crate::profile::Quality;
use crate::reconcile::PID_FILE_NAME;
use crate::settings::TranscodeSettings;

/// Number of diagnostic lines logged when an encoder fails.
const FAILURE_TAIL_LINES: usize = 20;

/// A launched encoder. Cheap to clone; identifies the process by `id`.
#[derive(Debug, Clone)]
pub struct EncoderHandle {
    /// Supervisor-unique handle id, never reused.
    pub id: u64,
    /// OS process id, when known.
    pub pid: Option<u32>,
    pub diagnostics: SharedDiagnostics,
}

/// Notification delivered to the session store.
#[derive(Debug, Clone, PartialEq)]
pub enum EncoderEvent {
    Exited {
        session_id: SessionId,
        quality: Quality,
        handle_id: u64,
        /// `None` when the process was terminated by a signal.
        exit_code: Option<i32>,
        success: bool,
    },
}

pub type EventSender = mpsc::UnboundedSender<EncoderEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<EncoderEvent>;

/// Starts and stops encoder processes.
#[async_trait]
pub trait EncoderSupervisor: Send + Sync {
    /// Launch an encoder. Its exit is reported on `events` exactly once.
    async fn start(&self, request: EncodeRequest, events: EventSender) -> Result<EncoderHandle>;

    /// Stop an encoder and wait until the process has been reaped.
    ///
    /// Killing a handle that already exited is a no-op.
    async fn kill(&self, handle: &EncoderHandle);
}

struct RunningEncoder {
    stop_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Supervisor backed by real ffmpeg processes.
pub struct FfmpegSupervisor {
    ffmpeg: PathBuf,
    settings: Arc<TranscodeSettings>,
    next_id: AtomicU64,
    running: Arc<DashMap<u64, RunningEncoder>>,
}

impl FfmpegSupervisor {
    pub fn new(ffmpeg: PathBuf, settings: Arc<TranscodeSettings>) -> Self {
        Self {
            ffmpeg,
            settings,
            next_id: AtomicU64::new(1),
            running: Arc::new(DashMap::new()),
        }
    }

    /// Number of encoders currently alive.
    pub fn running_count(&self) -> usize {
        self.running.len()
    }

    pub fn ffmpeg_path(&self) -> &Path {
        &self.ffmpeg
    }
}

#[async_trait]
impl EncoderSupervisor for FfmpegSupervisor {
    async fn start(&self, request: EncodeRequest, events: EventSender) -> Result<EncoderHandle> {
        match tokio::fs::metadata(&request.source_path).await {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => {
                return Err(Error::Validation(format!(
                    "source {} is not a file",
                    request.source_path.display()
                )))
            }
            Err(e) => {
                return Err(Error::Validation(format!(
                    "source {} is not readable: {e}",
                    request.source_path.display()
                )))
            }
        }
        tokio::fs::create_dir_all(&request.output_dir).await?;

        let args = ffmpeg_args(&request, &self.settings);
        tracing::debug!(
            session_id = %request.session_id,
            quality = %request.quality,
            run = request.run,
            "ffmpeg {}",
            args.join(" ")
        );

        let mut child = Command::new(&self.ffmpeg)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::tool(
                    "ffmpeg",
                    format!("failed to spawn {}: {e}", self.ffmpeg.display()),
                )
            })?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let pid = child.id();
        let pid_file = request.output_dir.join(PID_FILE_NAME);
        if let Some(pid) = pid {
            if let Err(e) = tokio::fs::write(&pid_file, pid.to_string()).await {
                tracing::warn!(pid, "Failed to write {}: {e}", pid_file.display());
            }
        }

        tracing::info!(
            session_id = %request.session_id,
            quality = %request.quality,
            run = request.run,
            pid = pid.unwrap_or_default(),
            offset = request.start_offset_secs,
            "Encoder started"
        );

        let diagnostics = shared_diagnostics(self.settings.diagnostic_buffer_lines);
        let reader = child.stderr.take().map(|stderr| {
            tokio::spawn(read_diagnostics(
                stderr,
                diagnostics.clone(),
                self.settings.progress_log_interval,
                request.session_id,
                request.quality,
            ))
        });

        let (stop_tx, stop_rx) = oneshot::channel();
        let monitor = Monitor {
            id,
            request,
            pid_file,
            grace: self.settings.kill_grace_period,
            diagnostics: diagnostics.clone(),
            running: self.running.clone(),
            events,
        };
        // Hold the map shard until the entry exists so a fast exit cannot
        // try to remove it first.
        let entry = self.running.entry(id);
        let task = tokio::spawn(monitor.run(child, reader, stop_rx));
        entry.insert(RunningEncoder { stop_tx, task });

        Ok(EncoderHandle {
            id,
            pid,
            diagnostics,
        })
    }

    async fn kill(&self, handle: &EncoderHandle) {
        let Some((_, running)) = self.running.remove(&handle.id) else {
            return;
        };
        let _ = running.stop_tx.send(());
        if let Err(e) = running.task.await {
            tracing::error!(handle_id = handle.id, "Encoder monitor task failed: {e}");
        }
    }
}

struct Monitor {
    id: u64,
    request: EncodeRequest,
    pid_file: PathBuf,
    grace: Duration,
    diagnostics: SharedDiagnostics,
    running: Arc<DashMap<u64, RunningEncoder>>,
    events: EventSender,
}

impl Monitor {
    async fn run(
        self,
        mut child: Child,
        reader: Option<JoinHandle<()>>,
        stop_rx: oneshot::Receiver<()>,
    ) {
        let (status, stopped) = tokio::select! {
            status = child.wait() => (status, false),
            _ = stop_rx => (terminate(&mut child, self.grace).await, true),
        };

        if let Some(reader) = reader {
            let _ = reader.await;
        }
        if let Err(e) = tokio::fs::remove_file(&self.pid_file).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("Failed to remove {}: {e}", self.pid_file.display());
            }
        }
        // Natural exit: the entry is still registered.
        self.running.remove(&self.id);

        let (exit_code, success) = match &status {
            Ok(status) => (status.code(), status.success()),
            Err(_) => (None, false),
        };
        let session_id = self.request.session_id;
        let quality = self.request.quality;

        match status {
            Ok(_) if stopped => {
                tracing::debug!(%session_id, %quality, run = self.request.run, "Encoder stopped")
            }
            Ok(_) if success => {
                tracing::info!(%session_id, %quality, run = self.request.run, "Encoder finished")
            }
            Ok(_) => {
                let tail = self.diagnostics.lock().tail(FAILURE_TAIL_LINES);
                tracing::error!(
                    %session_id,
                    %quality,
                    run = self.request.run,
                    exit_code = exit_code.unwrap_or(-1),
                    "Encoder failed:\n{}",
                    tail.join("\n")
                );
            }
            Err(e) => {
                tracing::error!(%session_id, %quality, "Failed to wait for encoder: {e}")
            }
        }

        let _ = self.events.send(EncoderEvent::Exited {
            session_id,
            quality,
            handle_id: self.id,
            exit_code,
            success,
        });
    }
}

/// SIGTERM, then SIGKILL after `grace`. Returns once the child is reaped.
async fn terminate(child: &mut Child, grace: Duration) -> std::io::Result<ExitStatus> {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if kill(Pid::from_raw(pid as i32), Signal::SIGTERM).is_ok() {
            match tokio::time::timeout(grace, child.wait()).await {
                Ok(status) => return status,
                Err(_) => tracing::warn!(pid, "Encoder ignored SIGTERM, killing"),
            }
        }
    }

    if let Err(e) = child.start_kill() {
        tracing::debug!("start_kill: {e}");
    }
    child.wait().await
}

async fn read_diagnostics(
    stderr: ChildStderr,
    diagnostics: SharedDiagnostics,
    progress_interval: Duration,
    session_id: SessionId,
    quality: Quality,
) {
    let mut lines = BufReader::new(stderr).lines();
    let mut throttle = ProgressThrottle::new(progress_interval, tokio::time::Instant::now());

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(%session_id, %quality, "stderr read error: {e}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        match classify_line(&line) {
            LineClass::Progress => {
                if let Some(summary) = throttle.observe(&line, tokio::time::Instant::now()) {
                    tracing::info!(
                        %session_id,
                        %quality,
                        fps = summary.avg_fps.unwrap_or_default(),
                        speed = summary.avg_speed.unwrap_or_default(),
                        position_secs = summary.out_time_secs.unwrap_or_default(),
                        "Encode progress"
                    );
                }
            }
            LineClass::Error => {
                tracing::warn!(%session_id, %quality, "ffmpeg: {line}");
                diagnostics.lock().push(LineClass::Error, &line);
            }
            LineClass::Info => {
                tracing::debug!(%session_id, %quality, "ffmpeg: {line}");
                diagnostics.lock().push(LineClass::Info, &line);
            }
        }
    }
}
