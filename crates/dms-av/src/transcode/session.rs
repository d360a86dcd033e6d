//! Lifecycle of one running encoder.
//!
//! The caller owns the [`TranscodeStream`]; two background tasks own the
//! rest: one drains stderr into the caller's sink, the other waits for the
//! process to exit and records the outcome. Dropping the stream cancels the
//! wait task, which kills the encoder.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::process::{Child, ChildStderr, ChildStdout};
use tokio::sync::watch;
use tokio_util::sync::{CancellationToken, DropGuard};

/// Where a transcode session is in its lifecycle.
///
/// `Spawned -> Streaming -> {Completed | Failed}`. The terminal states are
/// only ever set by the wait task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "lowercase")]
pub enum SessionState {
    Spawned,
    Streaming,
    Completed,
    Failed(String),
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Failed(_))
    }
}

/// Encoder stdout, handed to the caller.
///
/// Reading suspends until the encoder produces output; end of data means the
/// encoder closed its stdout. Whether that was a clean finish is only visible
/// through [`TranscodeStream::state`].
#[derive(Debug)]
pub struct TranscodeStream {
    stdout: ChildStdout,
    state: Arc<watch::Sender<SessionState>>,
    pid: Option<u32>,
    started: bool,
    _cancel: DropGuard,
}

impl TranscodeStream {
    /// Encoder process id, if the OS reported one.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Watch the session state. The receiver stays valid after the stream is
    /// dropped and eventually observes the terminal state.
    pub fn state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn current_state(&self) -> SessionState {
        self.state.borrow().clone()
    }
}

impl AsyncRead for TranscodeStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if !this.started {
            this.started = true;
            this.state.send_if_modified(|s| {
                if *s == SessionState::Spawned {
                    *s = SessionState::Streaming;
                    true
                } else {
                    false
                }
            });
        }
        Pin::new(&mut this.stdout).poll_read(cx, buf)
    }
}

/// Take ownership of a freshly spawned encoder and start its background
/// tasks. Must be called from within a Tokio runtime.
pub(crate) fn launch<W>(
    mut child: Child,
    tool: String,
    stderr_sink: W,
) -> dms_core::Result<TranscodeStream>
where
    W: AsyncWrite + Send + Unpin + 'static,
{
    let pid = child.id();
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| dms_core::Error::spawn(&tool, "stdout was not piped"))?;

    let (state_tx, _) = watch::channel(SessionState::Spawned);
    let state = Arc::new(state_tx);
    let cancel = CancellationToken::new();

    match child.stderr.take() {
        Some(stderr) => {
            tokio::spawn(pump_stderr(stderr, stderr_sink, tool.clone()));
        }
        None => tracing::debug!(tool = %tool, "stderr was not piped; sink unused"),
    }
    tokio::spawn(wait_for_exit(child, tool, Arc::clone(&state), cancel.clone()));

    tracing::debug!(pid = ?pid, "encoder spawned");

    Ok(TranscodeStream {
        stdout,
        state,
        pid,
        started: false,
        _cancel: cancel.drop_guard(),
    })
}

async fn pump_stderr<W>(mut stderr: ChildStderr, mut sink: W, tool: String)
where
    W: AsyncWrite + Send + Unpin,
{
    match tokio::io::copy(&mut stderr, &mut sink).await {
        Ok(bytes) => tracing::trace!(tool = %tool, bytes, "stderr drained"),
        Err(e) => {
            tracing::debug!(tool = %tool, error = %e, "stderr sink failed; discarding the rest");
            // Keep draining so the encoder never blocks on a full stderr pipe.
            let _ = tokio::io::copy(&mut stderr, &mut tokio::io::sink()).await;
        }
    }
    if let Err(e) = sink.flush().await {
        tracing::debug!(tool = %tool, error = %e, "stderr sink flush failed");
    }
}

async fn wait_for_exit(
    mut child: Child,
    tool: String,
    state: Arc<watch::Sender<SessionState>>,
    cancel: CancellationToken,
) {
    let waited = tokio::select! {
        biased;
        status = child.wait() => status,
        _ = cancel.cancelled() => {
            tracing::debug!(tool = %tool, "stream closed; killing encoder");
            if let Err(e) = child.kill().await {
                tracing::warn!(tool = %tool, error = %e, "failed to kill encoder");
            }
            state.send_replace(SessionState::Failed(
                "stream closed before the encoder finished".to_string(),
            ));
            return;
        }
    };

    let next = match waited {
        Ok(status) if status.success() => {
            tracing::debug!(tool = %tool, "encoder finished");
            SessionState::Completed
        }
        Ok(status) => {
            let err = dms_core::Error::process(&tool, format!("exited with {status}"));
            tracing::warn!(error = %err, "encoder failed after its stream was handed out");
            SessionState::Failed(err.to_string())
        }
        Err(e) => {
            let err = dms_core::Error::process(&tool, format!("wait failed: {e}"));
            tracing::error!(error = %err, "lost track of encoder");
            SessionState::Failed(err.to_string())
        }
    };
    state.send_replace(next);
}
