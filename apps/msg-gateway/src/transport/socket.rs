//! Per-connection writer task and the `SessionTransport` backed by it.
//!
//! Every outbound frame goes through one mpsc queue drained by a dedicated
//! task, so frames are written in submission order and never interleave.
//! Each command carries a oneshot that resolves once the frame is on the
//! socket (or failed), which is what lets a push report delivery failure.

use std::fmt::Display;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message};
use futures_util::{Sink, SinkExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::AbortHandle;
use tokio::time;

use crate::hub::error::TransportError;
use crate::hub::session::{CloseReason, OutboundFrame, SessionTransport};

use super::events::{EventName, GatewayMessage};

/// How long a close may wait for the writer before it is aborted.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

type Ack = oneshot::Sender<Result<(), TransportError>>;

enum WriterCommand {
    Send { message: Message, ack: Ack },
    Close { code: u16, reason: String, ack: Ack },
}

/// Handle to a connection's writer task.
#[derive(Clone)]
pub struct WsTransport {
    commands: mpsc::Sender<WriterCommand>,
    writer: AbortHandle,
}

impl WsTransport {
    /// Start the writer task over `sink`.
    ///
    /// The returned receiver flips to `true` (or errors) once the writer has
    /// stopped, so the read loop can stop too.
    pub fn spawn<S>(sink: S, buffer: usize) -> (Self, watch::Receiver<bool>)
    where
        S: Sink<Message> + Unpin + Send + 'static,
        S::Error: Display,
    {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let (done_tx, done_rx) = watch::channel(false);
        let handle = tokio::spawn(writer_loop(sink, rx, done_tx));
        (
            Self {
                commands: tx,
                writer: handle.abort_handle(),
            },
            done_rx,
        )
    }

    /// Write a message and wait until it is on the socket.
    pub async fn send_message(&self, msg: &GatewayMessage) -> Result<(), TransportError> {
        let (ack, done) = oneshot::channel();
        self.commands
            .send(WriterCommand::Send {
                message: Message::Text(msg.to_json().into()),
                ack,
            })
            .await
            .map_err(|_| TransportError::Closed)?;
        done.await.map_err(|_| TransportError::Closed)?
    }

    /// Send a close frame and stop the writer.
    ///
    /// A writer that does not finish within the grace period is aborted.
    pub async fn close_with(&self, code: u16, reason: &str) -> Result<(), TransportError> {
        let (ack, done) = oneshot::channel();
        let command = WriterCommand::Close {
            code,
            reason: reason.to_string(),
            ack,
        };

        let closing = async {
            self.commands
                .send(command)
                .await
                .map_err(|_| TransportError::Closed)?;
            done.await.map_err(|_| TransportError::Closed)?
        };

        match time::timeout(CLOSE_GRACE, closing).await {
            Ok(result) => result,
            Err(_) => {
                tracing::debug!(code, "writer did not drain in time, aborting");
                self.writer.abort();
                Ok(())
            }
        }
    }
}

#[async_trait]
impl SessionTransport for WsTransport {
    async fn send(&self, frame: OutboundFrame) -> Result<(), TransportError> {
        let msg = match frame {
            OutboundFrame::Push { seq, msg } => {
                let data = serde_json::to_value(msg.as_ref()).unwrap_or_default();
                GatewayMessage::dispatch(EventName::PUSH_MESSAGE, seq, data)
            }
            OutboundFrame::Kicked { reason } => GatewayMessage::kicked(reason.code(), reason.as_str()),
        };
        self.send_message(&msg).await
    }

    async fn close(&self, reason: CloseReason) -> Result<(), TransportError> {
        self.close_with(reason.code(), reason.as_str()).await
    }
}

async fn writer_loop<S>(mut sink: S, mut commands: mpsc::Receiver<WriterCommand>, done: watch::Sender<bool>)
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    while let Some(command) = commands.recv().await {
        match command {
            WriterCommand::Send { message, ack } => {
                let result = sink
                    .send(message)
                    .await
                    .map_err(|e| TransportError::Write(e.to_string()));
                let failed = result.is_err();
                let _ = ack.send(result);
                if failed {
                    break;
                }
            }
            WriterCommand::Close { code, reason, ack } => {
                let frame = Message::Close(Some(CloseFrame {
                    code,
                    reason: reason.into(),
                }));
                let result = sink
                    .send(frame)
                    .await
                    .map_err(|e| TransportError::Write(e.to_string()));
                let _ = sink.close().await;
                let _ = ack.send(result);
                break;
            }
        }
    }
    let _ = done.send(true);
}
