use std::{
    collections::HashMap,
    path::Path,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
};

use serde_json::Value;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::UnixStream,
    sync::{mpsc, oneshot},
};
use tracing::{debug, warn};

use crate::error::Error;

use super::{
    protocol::{FrameBuffer, TaskId, TaskRequest, TaskResponse, encode_frame, new_task_id},
    tasks::WriterMethod,
};

type Pending = Arc<Mutex<HashMap<TaskId, oneshot::Sender<TaskResponse>>>>;

/// Connection state shared by the client and its two socket tasks
#[derive(Clone, Default)]
struct Connection {
    pending: Pending,
    closed: Arc<AtomicBool>,
}

impl Connection {
    /// Mark the connection dead and fail every outstanding request. Requests registered
    /// afterwards see the flag.
    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);

        // waiters see the dropped senders as a disconnect
        if let Ok(mut pending) = self.pending.lock() {
            pending.clear();
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Something that can get a mutation executed by the writer
#[async_trait::async_trait]
pub trait TaskSubmitter: Send + Sync {
    async fn submit(&self, method: WriterMethod, priority: i64) -> Result<Value, Error>;
}

/// Reader side of the writer socket. One persistent connection, replies are matched to
/// requests by task id. No timeout is applied, callers wanting one wrap the future.
pub struct WriterClient {
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    connection: Connection,
}

impl WriterClient {
    pub async fn connect(path: &Path) -> Result<Self, Error> {
        let stream = UnixStream::connect(path).await?;
        let (mut read, mut write) = stream.into_split();

        let (outbound, mut frames_out) = mpsc::unbounded_channel::<Vec<u8>>();
        let connection = Connection::default();

        tokio::spawn({
            let connection = connection.clone();

            async move {
                while let Some(frame) = frames_out.recv().await {
                    if let Err(e) = write.write_all(&frame).await {
                        warn!(error = %e, "failed to send task to writer");
                        connection.close();
                        break;
                    }
                }
            }
        });

        tokio::spawn({
            let connection = connection.clone();

            async move {
                let mut frames = FrameBuffer::new();
                let mut buf = vec![0u8; 64 * 1024];

                'conn: loop {
                    let n = match read.read(&mut buf).await {
                        Ok(0) => break,
                        Ok(n) => n,
                        Err(e) => {
                            warn!(error = %e, "writer connection failed");
                            break;
                        }
                    };

                    frames.extend(&buf[..n]);

                    loop {
                        let frame = match frames.next_frame() {
                            Ok(Some(frame)) => frame,
                            Ok(None) => break,
                            Err(e) => {
                                warn!(error = %e, "unreadable writer response stream");
                                break 'conn;
                            }
                        };

                        match serde_json::from_slice::<TaskResponse>(&frame) {
                            Ok(response) => resolve(&connection.pending, response),
                            Err(e) => warn!(error = %e, "dropping malformed writer response"),
                        }
                    }
                }

                connection.close();

                debug!("writer connection closed");
            }
        });

        Ok(Self {
            outbound,
            connection,
        })
    }

    /// Send `method` to the writer and wait for its reply. A reply carrying an error is
    /// returned as `Error::Writer`, nothing is retried here.
    pub async fn request(&self, method: WriterMethod, priority: i64) -> Result<Value, Error> {
        let id = new_task_id();
        let task = method.into_task(id.clone())?;
        let frame = encode_frame(&TaskRequest { task, priority })?;

        if self.connection.is_closed() {
            return Err(Error::WriterDisconnected);
        }

        let (tx, rx) = oneshot::channel();

        self.connection
            .pending
            .lock()
            .map_err(|_| Error::custom("pending task map poisoned"))?
            .insert(id.clone(), tx);

        // closed between the check and the insert, nobody would fail this entry
        if self.connection.is_closed() {
            self.forget(&id);
            return Err(Error::WriterDisconnected);
        }

        if self.outbound.send(frame).is_err() {
            self.forget(&id);
            return Err(Error::WriterDisconnected);
        }

        let response = rx.await.map_err(|_| Error::WriterDisconnected)?;

        match response.error {
            Some(error) => Err(Error::Writer(error.message)),
            None => Ok(response.result),
        }
    }

    pub fn outstanding(&self) -> usize {
        self.connection
            .pending
            .lock()
            .map(|p| p.len())
            .unwrap_or_default()
    }

    fn forget(&self, id: &str) {
        if let Ok(mut pending) = self.connection.pending.lock() {
            pending.remove(id);
        }
    }
}

fn resolve(pending: &Pending, response: TaskResponse) {
    let waiter = pending
        .lock()
        .ok()
        .and_then(|mut pending| pending.remove(&response.id));

    match waiter {
        Some(waiter) => {
            // caller may have given up on the reply
            let _ = waiter.send(response);
        }
        None => warn!(id = %response.id, "reply for unknown task"),
    }
}

#[async_trait::async_trait]
impl TaskSubmitter for WriterClient {
    async fn submit(&self, method: WriterMethod, priority: i64) -> Result<Value, Error> {
        self.request(method, priority).await
    }
}
