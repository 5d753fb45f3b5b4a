//! Remote-call channel to a worker instance.
//!
//! Requests and responses travel as line-delimited JSON frames over one TCP
//! connection. A background reader task routes each response to the pending
//! request's oneshot channel by id; a writer task serializes outbound
//! frames. Both halves shut down when the peer closes, failing every pending
//! call and firing the close signal.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};

use quarry_proto::{CallRequest, RequestFrame, ResponseFrame};

use crate::error::RuntimeError;

/// A named, host-resolvable worker endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerAddress {
    pub instance: String,
    pub host: String,
    pub port: u16,
}

impl WorkerAddress {
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl std::fmt::Display for WorkerAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}:{}", self.instance, self.host, self.port)
    }
}

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<ResponseFrame>>>>;

struct ChannelInner {
    address: WorkerAddress,
    outbound: mpsc::UnboundedSender<String>,
    pending: Pending,
    next_id: AtomicU64,
    closed_rx: watch::Receiver<bool>,
}

/// Handle to one established remote-call channel. Cheap to clone; all
/// clones share the underlying connection.
#[derive(Clone)]
pub struct RpcChannel {
    inner: Arc<ChannelInner>,
}

impl std::fmt::Debug for RpcChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcChannel")
            .field("address", &self.inner.address)
            .field("closed", &*self.inner.closed_rx.borrow())
            .finish()
    }
}

impl RpcChannel {
    /// Open a channel to `address`. Fails outright if the endpoint refuses
    /// or is unreachable; the caller owns any retry policy.
    pub async fn connect(address: WorkerAddress) -> Result<Self, RuntimeError> {
        let stream = TcpStream::connect(address.socket_addr())
            .await
            .map_err(|e| RuntimeError::Transport(e.to_string()))?;
        let (read_half, write_half) = stream.into_split();

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
        let (closed_tx, closed_rx) = watch::channel(false);

        let mut writer = FramedWrite::new(write_half, LinesCodec::new());
        tokio::spawn(async move {
            while let Some(line) = outbound_rx.recv().await {
                if let Err(e) = writer.send(line).await {
                    tracing::debug!(error = %e, "worker channel writer stopped");
                    break;
                }
            }
        });

        let reader_pending = pending.clone();
        let reader_address = address.clone();
        tokio::spawn(async move {
            let mut reader = FramedRead::new(read_half, LinesCodec::new());
            while let Some(next) = reader.next().await {
                let line = match next {
                    Ok(line) => line,
                    Err(e) => {
                        tracing::debug!(address = %reader_address, error = %e, "worker channel read error");
                        break;
                    }
                };
                match serde_json::from_str::<ResponseFrame>(&line) {
                    Ok(frame) => {
                        let waiter = reader_pending.lock().ok().and_then(|mut map| map.remove(&frame.id));
                        match waiter {
                            Some(tx) => {
                                let _ = tx.send(frame);
                            }
                            None => {
                                tracing::warn!(
                                    address = %reader_address,
                                    id = frame.id,
                                    "response frame with no pending request"
                                );
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!(address = %reader_address, error = %e, "unparseable worker frame");
                    }
                }
            }

            // Peer gone: fail everything still waiting, then signal close.
            if let Ok(mut map) = reader_pending.lock() {
                map.clear();
            }
            let _ = closed_tx.send(true);
        });

        Ok(Self {
            inner: Arc::new(ChannelInner {
                address,
                outbound: outbound_tx,
                pending,
                next_id: AtomicU64::new(1),
                closed_rx,
            }),
        })
    }

    pub fn address(&self) -> &WorkerAddress {
        &self.inner.address
    }

    /// Issue one remote call and wait for its response frame. Transport
    /// failures and remote error payloads both surface as errors; the
    /// caller interprets the distinction if it cares.
    pub async fn call(&self, request: CallRequest) -> Result<serde_json::Value, RuntimeError> {
        if self.is_closed() {
            return Err(RuntimeError::Transport(
                "worker channel closed".to_string(),
            ));
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let frame = RequestFrame {
            id,
            ns: request.ns,
            op: request.op,
            args: request.args,
        };
        let line = serde_json::to_string(&frame)?;

        let (tx, rx) = oneshot::channel();
        {
            let mut map = self
                .inner
                .pending
                .lock()
                .map_err(|_| RuntimeError::Transport("channel state poisoned".to_string()))?;
            map.insert(id, tx);
        }

        if self.inner.outbound.send(line).is_err() {
            if let Ok(mut map) = self.inner.pending.lock() {
                map.remove(&id);
            }
            return Err(RuntimeError::Transport(
                "worker channel closed".to_string(),
            ));
        }

        // The reader fails pending requests exactly once when the peer
        // goes away; racing against the close signal covers a request
        // enqueued after that sweep.
        let frame = tokio::select! {
            biased;
            frame = rx => frame
                .map_err(|_| RuntimeError::Transport("worker channel closed".to_string()))?,
            _ = self.closed() => {
                if let Ok(mut map) = self.inner.pending.lock() {
                    map.remove(&id);
                }
                return Err(RuntimeError::Transport(
                    "worker channel closed".to_string(),
                ));
            }
        };

        match (frame.ok, frame.error) {
            (Some(value), _) => Ok(value),
            (None, Some(message)) => Err(RuntimeError::Remote(message)),
            (None, None) => Err(RuntimeError::Remote("empty response frame".to_string())),
        }
    }

    /// Resolves when the connection is gone. Used by the establisher to
    /// report connection loss to the supervisor.
    pub async fn closed(&self) {
        let mut rx = self.inner.closed_rx.clone();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.inner.closed_rx.borrow()
    }
}
