//! Client for a backend running as a separate process.
//!
//! The wire is newline-delimited JSON over TCP. Requests carry an id that the
//! backend echoes in its response; events are pushed unsolicited:
//!
//! ```text
//! -> {"id":1,"cmd":"forward","args":{"localIp":"127.0.0.1","localPort":5678,...}}
//! <- {"type":"event","event":"connect-count-change","payload":1}
//! <- {"type":"response","id":1,"ok":true}
//! -> {"id":2,"cmd":"stop"}
//! <- {"type":"response","id":2,"ok":false,"error":"not forwarding"}
//! ```

use crate::bridge::{BackendEvent, EventChannel, EventSink, EventSource, ListenerId, ListenerRegistry};
use crate::gateway::{BackendError, ForwardBackend, ForwardRequest};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const MAX_FRAME_BYTES: usize = 256 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame exceeds max size: {size} > {max}")]
    Oversized { size: usize, max: usize },
    #[error("frame encode failed: {0}")]
    Encode(String),
    #[error("frame decode failed: {0}")]
    Decode(String),
}

#[derive(Debug, Serialize)]
pub struct Request<'a> {
    pub id: u64,
    pub cmd: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<&'a ForwardRequest>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Incoming {
    Response {
        id: u64,
        ok: bool,
        #[serde(default)]
        error: Option<String>,
    },
    Event {
        event: String,
        #[serde(default)]
        payload: Value,
    },
}

pub fn encode_frame<T: Serialize>(value: &T, max_frame_bytes: usize) -> Result<Vec<u8>, FrameError> {
    let mut encoded = serde_json::to_vec(value).map_err(|err| FrameError::Encode(err.to_string()))?;
    if encoded.len() > max_frame_bytes {
        return Err(FrameError::Oversized {
            size: encoded.len(),
            max: max_frame_bytes,
        });
    }
    encoded.push(b'\n');
    Ok(encoded)
}

pub fn decode_frame(line: &str, max_frame_bytes: usize) -> Result<Incoming, FrameError> {
    let raw = line.trim_end_matches(['\n', '\r']);
    if raw.len() > max_frame_bytes {
        return Err(FrameError::Oversized {
            size: raw.len(),
            max: max_frame_bytes,
        });
    }
    serde_json::from_str(raw).map_err(|err| FrameError::Decode(err.to_string()))
}

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<(), BackendError>>>>>;

pub struct IpcBackend {
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    pending: Pending,
    closed: Arc<AtomicBool>,
    next_id: AtomicU64,
    registry: Arc<ListenerRegistry>,
    reader: JoinHandle<()>,
}

impl IpcBackend {
    pub async fn connect(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .with_context(|| format!("cannot reach backend at {addr}"))?;
        stream.set_nodelay(true)?;
        info!("Connected to backend at {}", addr);
        Ok(Self::from_stream(stream))
    }

    pub fn from_stream(stream: TcpStream) -> Self {
        let (read_half, write_half) = stream.into_split();
        let pending: Pending = Arc::default();
        let closed = Arc::new(AtomicBool::new(false));
        let registry = Arc::new(ListenerRegistry::new());

        let reader = tokio::spawn(read_loop(
            read_half,
            pending.clone(),
            closed.clone(),
            registry.clone(),
        ));

        IpcBackend {
            writer: tokio::sync::Mutex::new(write_half),
            pending,
            closed,
            next_id: AtomicU64::new(1),
            registry,
            reader,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn call(&self, cmd: &str, args: Option<&ForwardRequest>) -> Result<(), BackendError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let frame = encode_frame(&Request { id, cmd, args }, MAX_FRAME_BYTES)
            .map_err(|e| BackendError::Protocol(e.to_string()))?;

        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(id, tx);
        // The reader drains `pending` after flagging `closed`, so a request
        // registered after that drain is caught here.
        if self.is_closed() {
            lock(&self.pending).remove(&id);
            return Err(BackendError::Disconnected);
        }

        debug!(id, cmd, "sending request");
        let written = {
            let mut writer = self.writer.lock().await;
            match writer.write_all(&frame).await {
                Ok(()) => writer.flush().await,
                Err(e) => Err(e),
            }
        };
        if let Err(e) = written {
            lock(&self.pending).remove(&id);
            return Err(BackendError::Io(e.to_string()));
        }

        rx.await.unwrap_or(Err(BackendError::Disconnected))
    }
}

impl Drop for IpcBackend {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

impl ForwardBackend for IpcBackend {
    async fn forward(&self, request: ForwardRequest) -> Result<(), BackendError> {
        self.call("forward", Some(&request)).await
    }

    async fn stop(&self) -> Result<(), BackendError> {
        self.call("stop", None).await
    }
}

impl EventSource for IpcBackend {
    fn listen(&self, channel: EventChannel, sink: EventSink) -> ListenerId {
        self.registry.listen(channel, sink)
    }

    fn unlisten(&self, id: ListenerId) {
        self.registry.unlisten(id);
    }
}

async fn read_loop(
    read_half: OwnedReadHalf,
    pending: Pending,
    closed: Arc<AtomicBool>,
    registry: Arc<ListenerRegistry>,
) {
    let mut lines = BufReader::new(read_half).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                info!("Backend closed the connection");
                break;
            }
            Err(e) => {
                warn!("Backend read error: {}", e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        match decode_frame(&line, MAX_FRAME_BYTES) {
            Ok(Incoming::Response { id, ok, error }) => {
                let result = if ok {
                    Ok(())
                } else {
                    Err(BackendError::Rejected(
                        error.unwrap_or_else(|| "backend rejected the command".to_string()),
                    ))
                };
                match lock(&pending).remove(&id) {
                    Some(tx) => {
                        let _ = tx.send(result);
                    }
                    None => debug!(id, "response for unknown request"),
                }
            }
            Ok(Incoming::Event { event, payload }) => match BackendEvent::from_wire(&event, payload) {
                Ok(Some(event)) => {
                    registry.emit(event);
                }
                Ok(None) => debug!(event, "ignoring unknown event"),
                Err(e) => warn!("Bad payload for {}: {}", event, e),
            },
            Err(e) => warn!("Dropping backend frame: {}", e),
        }
    }

    closed.store(true, Ordering::SeqCst);
    for (_, tx) in lock(&pending).drain() {
        let _ = tx.send(Err(BackendError::Disconnected));
    }
    // Ends every event stream so the console learns the backend is gone.
    registry.close();
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
