use std::path::{Path, PathBuf};

use serde_json::Value;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{UnixListener, UnixStream},
    sync::mpsc::{self, UnboundedSender},
};
use tracing::{debug, info, warn};

use crate::{error::Error, shutdown::ShutdownSignal};

use super::{
    protocol::{FrameBuffer, TaskRequest, TaskResponse, encode_frame},
    queue::Envelope,
};

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Bind the writer socket, replacing a stale socket file left by a previous run
pub fn bind(path: &Path) -> Result<UnixListener, Error> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    if path.exists() {
        std::fs::remove_file(path)?;
    }

    Ok(UnixListener::bind(path)?)
}

/// Accept reader connections and forward their requests to `inbox` until shutdown
pub async fn serve(
    listener: UnixListener,
    socket_path: PathBuf,
    inbox: UnboundedSender<Envelope>,
    shutdown: ShutdownSignal,
) {
    info!(path = %socket_path.display(), "writer listening");

    loop {
        let stream = tokio::select! {
            res = listener.accept() => match res {
                Ok((stream, _)) => stream,
                Err(e) => {
                    warn!(error = %e, "failed to accept reader connection");
                    continue;
                }
            },
            _ = shutdown.triggered() => break,
        };

        debug!("reader connected");

        tokio::spawn(handle_connection(stream, inbox.clone(), shutdown.clone()));
    }

    if let Err(e) = std::fs::remove_file(&socket_path) {
        debug!(error = %e, "could not remove writer socket");
    }
}

async fn handle_connection(
    stream: UnixStream,
    inbox: UnboundedSender<Envelope>,
    shutdown: ShutdownSignal,
) {
    let (mut read, mut write) = stream.into_split();
    let (reply, mut replies) = mpsc::unbounded_channel::<TaskResponse>();

    let writer = tokio::spawn(async move {
        while let Some(response) = replies.recv().await {
            let frame = match encode_frame(&response) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(id = %response.id, error = %e, "failed to encode task response");
                    continue;
                }
            };

            if let Err(e) = write.write_all(&frame).await {
                warn!(error = %e, "failed to write task response");
                break;
            }
        }
    });

    let mut frames = FrameBuffer::new();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    'conn: loop {
        let read = tokio::select! {
            res = read.read(&mut buf) => res,
            _ = shutdown.triggered() => break,
        };

        let n = match read {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "reader connection failed");
                break;
            }
        };

        frames.extend(&buf[..n]);

        loop {
            let frame = match frames.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "closing reader connection");
                    break 'conn;
                }
            };

            let request = match serde_json::from_slice::<TaskRequest>(&frame) {
                Ok(request) => request,
                Err(e) => {
                    reject_malformed(&frame, e, &reply);
                    continue;
                }
            };

            let envelope = Envelope {
                task: request.task,
                priority: request.priority,
                reply: reply.clone(),
            };

            if inbox.send(envelope).is_err() {
                warn!("writer stopped, dropping task");
            }
        }
    }

    if frames.pending() > 0 {
        debug!(bytes = frames.pending(), "reader left an incomplete frame");
    }

    // responses still queued for this reader are delivered before the writer half closes
    drop(reply);
    let _ = writer.await;

    debug!("reader disconnected");
}

/// Answer a frame that is not a valid task with an error, if it carries a task id to
/// answer to. Without one there is nobody to reply to and the frame is dropped.
fn reject_malformed(
    frame: &[u8],
    error: serde_json::Error,
    reply: &UnboundedSender<TaskResponse>,
) {
    let id = serde_json::from_slice::<Value>(frame)
        .ok()
        .and_then(|v| v.pointer("/task/id")?.as_str().map(str::to_string));

    match id {
        Some(id) => {
            debug!(%id, error = %error, "rejecting malformed task");
            let _ = reply.send(TaskResponse::err(id, format!("malformed task: {error}")));
        }
        None => warn!(error = %error, "dropping malformed task frame"),
    }
}
