//! Drives a single WebSocket connection: reads inbound frames, writes
//! outbound ones, and keeps the connection alive with a ping. Mirrors the
//! teacher's `WsBackend`/`BackendDriver` split so that reconnection can swap
//! one backend for another without disturbing the manager's own state.

use std::time::Duration;

use futures_util::{select, sink::SinkExt, stream::StreamExt, FutureExt};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::{connection::types::NORMAL_CLOSURE_CODE, event::WireFrame};

const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(10);

type Socket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Why the backend task stopped running. Distinguishes a protocol-level
/// "normal closure" (spec.md §4.1: pins the connection to `Disconnected`,
/// never reconnects) from everything else (read error, unexpected EOF,
/// keepalive failure, or a close frame with any other code).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    Normal,
    Abnormal,
}

/// Handle held by the manager to talk to a running [`ConnectionBackend`] task.
pub struct BackendDriver {
    /// Frames decoded off the wire.
    pub inbound: futures_channel::mpsc::UnboundedReceiver<WireFrame>,
    /// Fires once the backend stops, carrying why.
    pub error: futures_channel::oneshot::Receiver<CloseReason>,
    /// Outbound text frames to write to the socket.
    pub outbound: futures_channel::mpsc::UnboundedSender<String>,
    shutdown: futures_channel::oneshot::Sender<()>,
}

impl BackendDriver {
    pub fn shutdown(self) {
        let _ = self.shutdown.send(());
    }
}

pub struct ConnectionBackend {
    socket: Socket,
    handler: futures_channel::mpsc::UnboundedSender<WireFrame>,
    error: futures_channel::oneshot::Sender<CloseReason>,
    to_dispatch: futures_channel::mpsc::UnboundedReceiver<String>,
    shutdown: futures_channel::oneshot::Receiver<()>,
}

impl ConnectionBackend {
    #[tracing::instrument(skip(url), fields(url = %url))]
    pub async fn connect(
        url: &Url,
    ) -> Result<(Self, BackendDriver), tokio_tungstenite::tungstenite::Error> {
        let (socket, _response) = connect_async(url.as_str()).await?;
        Ok(Self::new(socket))
    }

    fn new(socket: Socket) -> (Self, BackendDriver) {
        let (handler, inbound) = futures_channel::mpsc::unbounded();
        let (dispatcher, to_dispatch) = futures_channel::mpsc::unbounded();
        let (error_tx, error_rx) = futures_channel::oneshot::channel();
        let (shutdown_tx, shutdown_rx) = futures_channel::oneshot::channel();

        (
            Self { socket, handler, error: error_tx, to_dispatch, shutdown: shutdown_rx },
            BackendDriver { inbound, error: error_rx, outbound: dispatcher, shutdown: shutdown_tx },
        )
    }

    fn handle_text(&mut self, text: &str) -> bool {
        match serde_json::from_str::<WireFrame>(text) {
            Ok(frame) => self.handler.unbounded_send(frame).is_ok(),
            Err(err) => {
                tracing::warn!(err = %err, "dropping frame that failed to decode");
                true
            }
        }
    }

    /// Runs the read/write/keepalive loop until shutdown or an unrecoverable
    /// error, then reports the error (if any) on `self.error` and returns.
    pub fn spawn(mut self) {
        let fut = async move {
            let mut closed: Option<CloseReason> = None;
            loop {
                let keepalive = tokio::time::sleep(KEEPALIVE_INTERVAL).fuse();
                tokio::pin!(keepalive);

                select! {
                    _ = keepalive => {
                        if let Err(err) = self.socket.send(Message::Ping(Vec::new())).await {
                            tracing::error!(err = %err, "failed to send keepalive ping");
                            closed = Some(CloseReason::Abnormal);
                            break;
                        }
                    }
                    incoming = self.socket.next() => {
                        match incoming {
                            Some(Ok(Message::Text(text))) => {
                                if !self.handle_text(&text) {
                                    closed = Some(CloseReason::Abnormal);
                                    break;
                                }
                            }
                            Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                            Some(Ok(Message::Binary(_))) => {
                                tracing::warn!("ignoring unexpected binary frame");
                            }
                            Some(Ok(Message::Close(frame))) => {
                                tracing::debug!(?frame, "server closed the connection");
                                let code = frame.as_ref().map(|f| u16::from(f.code));
                                closed = Some(if code == Some(NORMAL_CLOSURE_CODE) {
                                    CloseReason::Normal
                                } else {
                                    CloseReason::Abnormal
                                });
                                break;
                            }
                            Some(Err(err)) => {
                                tracing::error!(err = %err, "websocket read error");
                                closed = Some(CloseReason::Abnormal);
                                break;
                            }
                            None => {
                                tracing::debug!("websocket stream ended");
                                closed = Some(CloseReason::Abnormal);
                                break;
                            }
                        }
                    }
                    outgoing = self.to_dispatch.next() => {
                        match outgoing {
                            Some(text) => {
                                if let Err(err) = self.socket.send(Message::Text(text)).await {
                                    tracing::error!(err = %err, "failed to write frame");
                                    closed = Some(CloseReason::Abnormal);
                                    break;
                                }
                            }
                            None => break,
                        }
                    }
                    _ = &mut self.shutdown => break,
                }
            }

            if let Some(reason) = closed {
                let _ = self.error.send(reason);
            }
        };

        tokio::spawn(fut);
    }
}
