//! Client for the line protocol with request/response correlation.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::codec::JsonLineCodec;
use crate::error::ServerError;
use crate::protocol::{Request, Response};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<Response>>>>;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("connection error: {0}")]
    Transport(#[from] ServerError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("request timed out")]
    Timeout,

    #[error("connection closed before a response arrived")]
    Disconnected,

    /// The server answered with an error response.
    #[error("{kind}: {message}")]
    Remote { kind: String, message: String },
}

/// A connected client.
///
/// Every request carries a fresh `requestId`. A reader task matches each
/// response to its waiting caller, so several requests may be in flight on
/// one connection.
pub struct Client {
    writer: Mutex<FramedWrite<OwnedWriteHalf, JsonLineCodec>>,
    pending: PendingMap,
    next_id: AtomicU64,
    timeout: Duration,
    reader: JoinHandle<()>,
}

impl Client {
    pub async fn connect(addr: &str) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self::from_stream(stream))
    }

    pub fn from_stream(stream: TcpStream) -> Self {
        let (read_half, write_half) = stream.into_split();
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));

        let reader_pending = Arc::clone(&pending);
        let reader = tokio::spawn(async move {
            let mut frames = FramedRead::new(read_half, JsonLineCodec::default());
            while let Some(frame) = frames.next().await {
                let line = match frame {
                    Ok(line) => line,
                    Err(e) => {
                        tracing::warn!(error = %e, "client read failed");
                        break;
                    }
                };
                let response: Response = match serde_json::from_slice(&line) {
                    Ok(response) => response,
                    Err(e) => {
                        tracing::warn!(error = %e, "unparseable response dropped");
                        continue;
                    }
                };
                let Some(id) = response.request_id.as_ref().and_then(request_key) else {
                    tracing::warn!(action = %response.response_to_action, "response without requestId dropped");
                    continue;
                };
                match reader_pending.lock().await.remove(&id) {
                    Some(tx) => {
                        let _ = tx.send(response);
                    }
                    None => tracing::warn!(request_id = %id, "response for unknown request dropped"),
                }
            }
            // Dropping the senders wakes every waiting caller.
            reader_pending.lock().await.clear();
        });

        Self {
            writer: Mutex::new(FramedWrite::new(write_half, JsonLineCodec::default())),
            pending,
            next_id: AtomicU64::new(1),
            timeout: DEFAULT_TIMEOUT,
            reader,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sends `action` and waits for the matching response.
    pub async fn request(&self, action: &str, payload: Value) -> Result<Response, ClientError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed).to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id.clone(), tx);

        let request = Request {
            action: action.to_string(),
            payload,
            request_id: Some(Value::String(id.clone())),
        };
        if let Err(e) = self.writer.lock().await.send(request).await {
            self.pending.lock().await.remove(&id);
            return Err(e.into());
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(ClientError::Disconnected),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(ClientError::Timeout)
            }
        }
    }

    /// Like [`Client::request`], returning `data` on success and
    /// [`ClientError::Remote`] for error responses.
    pub async fn call(&self, action: &str, payload: Value) -> Result<Value, ClientError> {
        let response = self.request(action, payload).await?;
        if response.is_success() {
            Ok(response.data.unwrap_or_else(|| json!({})))
        } else {
            Err(ClientError::Remote {
                kind: response.kind.unwrap_or_else(|| "Unknown".to_string()),
                message: response.message.unwrap_or_default(),
            })
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

fn request_key(id: &Value) -> Option<String> {
    match id {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
