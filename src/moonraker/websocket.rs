//! Moonraker websocket client.
//!
//! The socket itself lives in a spawned session task. Everything that task
//! observes is posted as a [`TransportEvent`] to the screen loop, which feeds
//! it back through [`KlippyWebsocket::handle_event`]. All mutation of the
//! pending-call table and the connection state therefore happens on that one
//! consumer and no locks are needed.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use super::correlator::{RequestCorrelator, RpcCallback};
use super::rest::{KlippyRest, RestError};
use super::rpc::{Frame, JsonRpcRequest, RpcMethod, RpcReply};
use super::supervisor::{CloseOutcome, ConnectAttempt, ConnectionState, ReconnectDecision, Supervisor};
use crate::config::{ConnectionConfig, PrinterEntry};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("REST client error: {0}")]
    Rest(#[from] RestError),
}

/// Produced by the session and timer tasks, consumed on the screen loop.
#[derive(Debug)]
pub enum TransportEvent {
    ConnectFailed {
        generation: u64,
        status: String,
        rest_failed: bool,
    },
    Opened {
        generation: u64,
        writer: mpsc::UnboundedSender<Message>,
    },
    Frame {
        generation: u64,
        text: String,
    },
    Closed {
        generation: u64,
    },
    ReconnectTick,
}

/// What the screen needs to react to after an event has been handled.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionNotice {
    Connected,
    /// Informational, the client keeps retrying.
    Status(String),
    /// The socket dropped without being asked to.
    Lost(String),
    /// Retries exhausted; waiting for an explicit retry.
    Failed(String),
    Notification { method: String, payload: Value },
}

pub struct KlippyWebsocket {
    printer: PrinterEntry,
    connection: ConnectionConfig,
    rest: KlippyRest,
    supervisor: Supervisor,
    correlator: RequestCorrelator,
    events: mpsc::UnboundedSender<TransportEvent>,
    writer: Option<mpsc::UnboundedSender<Message>>,
    /// Bumped on every connect attempt and on close so late events from an
    /// abandoned session are ignored.
    generation: u64,
    session_task: Option<JoinHandle<()>>,
    reconnect_timer: Option<JoinHandle<()>>,
}

impl KlippyWebsocket {
    pub fn new(
        printer: PrinterEntry,
        connection: ConnectionConfig,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<Self, ClientError> {
        let rest = KlippyRest::new(&printer, connection.rest_timeout())?;
        Ok(Self {
            supervisor: Supervisor::new(connection.max_retries),
            printer,
            connection,
            rest,
            correlator: RequestCorrelator::new(),
            events,
            writer: None,
            generation: 0,
            session_task: None,
            reconnect_timer: None,
        })
    }

    pub fn printer(&self) -> &PrinterEntry {
        &self.printer
    }

    pub fn rest(&self) -> &KlippyRest {
        &self.rest
    }

    pub fn state(&self) -> ConnectionState {
        self.supervisor.state()
    }

    pub fn is_connected(&self) -> bool {
        self.supervisor.is_connected()
    }

    pub fn reconnect_count(&self) -> u32 {
        self.supervisor.reconnect_count()
    }

    pub fn pending_calls(&self) -> usize {
        self.correlator.pending_len()
    }

    /// Last REST failure, for display.
    pub fn status(&self) -> String {
        self.rest.status()
    }

    pub fn initial_connect(&mut self) {
        self.connect();
        if !self.is_connected() {
            self.arm_reconnect_timer();
        }
    }

    /// Start a connection attempt. Returns false when one is not needed.
    pub fn connect(&mut self) -> bool {
        let attempt = match self.supervisor.begin_connect() {
            ConnectAttempt::AlreadyConnected => return false,
            ConnectAttempt::Proceed { attempt } => attempt,
        };
        self.generation += 1;
        tracing::info!("Connecting to Moonraker at {} (attempt {})", self.rest.endpoint(), attempt);

        let session = Session {
            generation: self.generation,
            rest: self.rest.clone(),
            ws_endpoint: self.printer.ws_endpoint(),
            handshake_timeout: self.connection.handshake_timeout(),
            events: self.events.clone(),
        };
        if let Some(task) = self.session_task.take() {
            task.abort();
        }
        self.session_task = Some(tokio::spawn(session.run()));
        true
    }

    /// Timer entry point. Returns whether the retry timer should keep running.
    pub fn reconnect(&mut self) -> bool {
        match self.supervisor.reconnect() {
            ReconnectDecision::Cancel => false,
            ReconnectDecision::GiveUp => {
                tracing::error!(
                    "Giving up on Moonraker after {} attempts",
                    self.supervisor.reconnect_count()
                );
                false
            }
            ReconnectDecision::Attempt => {
                self.connect();
                true
            }
        }
    }

    /// User-triggered retry after the client gave up.
    pub fn retry(&mut self) {
        tracing::info!("Retrying connection to Moonraker");
        self.supervisor.retry();
        self.initial_connect();
    }

    pub fn close(&mut self) {
        self.cancel_reconnect_timer();
        if self.supervisor.close() {
            tracing::info!("Closing connection to Moonraker");
            if let Some(writer) = self.writer.take() {
                let _ = writer.send(Message::Close(None));
            }
            if let Some(task) = self.session_task.take() {
                task.abort();
            }
            self.generation += 1;
            self.supervisor.closed();
        }
        self.correlator.abandon_all();
    }

    /// Send a request. Returns false without side effects when not connected.
    pub fn send_method(&mut self, method: RpcMethod, callback: Option<RpcCallback>) -> bool {
        let writer = match (&self.writer, self.supervisor.is_connected()) {
            (Some(writer), true) => writer.clone(),
            _ => {
                tracing::debug!("Not connected, not sending {}", method.name());
                return false;
            }
        };
        let params = method.params();
        let id = self.correlator.register(method.name(), &params, callback);
        let text = match JsonRpcRequest::new(method.name(), &params, id).to_text() {
            Ok(text) => text,
            Err(e) => {
                tracing::error!("Failed to encode {}: {}", method.name(), e);
                self.correlator.cancel(id);
                return false;
            }
        };
        tracing::debug!("Sending {} (id {})", method.name(), id);
        if writer.send(Message::text(text)).is_err() {
            tracing::warn!("Websocket writer is gone, {} not sent", method.name());
            self.correlator.cancel(id);
            return false;
        }
        true
    }

    /// Awaitable form of [`send_method`](Self::send_method).
    pub fn call(&mut self, method: RpcMethod) -> Option<oneshot::Receiver<RpcReply>> {
        let (tx, rx) = oneshot::channel();
        let sent = self.send_method(
            method,
            Some(Box::new(move |reply| {
                let _ = tx.send(reply);
            })),
        );
        sent.then_some(rx)
    }

    pub fn handle_event(&mut self, event: TransportEvent) -> Option<ConnectionNotice> {
        match event {
            TransportEvent::ReconnectTick => self.on_reconnect_tick(),
            TransportEvent::ConnectFailed { generation, status, rest_failed } => {
                if generation != self.generation {
                    return None;
                }
                self.session_task = None;
                if rest_failed {
                    if self.supervisor.rest_failed() {
                        return Some(ConnectionNotice::Status(format!(
                            "Cannot connect to Moonraker\n{}\n\nRetrying #{}",
                            status,
                            self.supervisor.reconnect_count()
                        )));
                    }
                    None
                } else {
                    self.supervisor.handshake_failed();
                    tracing::warn!("{}", status);
                    Some(ConnectionNotice::Status(status))
                }
            }
            TransportEvent::Opened { generation, writer } => {
                if generation != self.generation {
                    return None;
                }
                self.writer = Some(writer);
                self.supervisor.opened();
                tracing::info!("Connected to Moonraker at {}", self.rest.endpoint());
                self.send_method(
                    RpcMethod::ConnectionIdentify {
                        client_name: env!("CARGO_PKG_NAME").to_string(),
                        version: env!("CARGO_PKG_VERSION").to_string(),
                    },
                    None,
                );
                Some(ConnectionNotice::Connected)
            }
            TransportEvent::Frame { generation, text } => {
                if generation != self.generation {
                    return None;
                }
                self.route_frame(&text)
            }
            TransportEvent::Closed { generation } => {
                if generation != self.generation {
                    return None;
                }
                self.writer = None;
                self.session_task = None;
                self.correlator.abandon_all();
                match self.supervisor.closed() {
                    CloseOutcome::Shutdown => {
                        tracing::info!("Moonraker connection closed");
                        None
                    }
                    CloseOutcome::Lost => {
                        tracing::warn!("Lost connection to Moonraker");
                        Some(ConnectionNotice::Lost("Lost connection to Moonraker".to_string()))
                    }
                }
            }
        }
    }

    fn route_frame(&mut self, text: &str) -> Option<ConnectionNotice> {
        let frame = match Frame::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!("Dropping malformed frame from Moonraker: {}", e);
                return None;
            }
        };
        if let Some(id) = frame.id {
            if self.correlator.contains(id) {
                if let Err(e) = self.correlator.resolve(id, frame.raw) {
                    tracing::debug!("{}", e);
                }
                return None;
            }
        }
        let payload = frame.notification_payload();
        match frame.method {
            Some(method) => Some(ConnectionNotice::Notification { method, payload }),
            None => {
                tracing::debug!("Dropping response for unknown call {:?}", frame.id);
                None
            }
        }
    }

    fn on_reconnect_tick(&mut self) -> Option<ConnectionNotice> {
        if self.reconnect() {
            return None;
        }
        self.cancel_reconnect_timer();
        if self.supervisor.state() == ConnectionState::Failed {
            let status = self.rest.status();
            return Some(ConnectionNotice::Failed(format!("Cannot connect to Moonraker\n\n{}", status)));
        }
        None
    }

    fn arm_reconnect_timer(&mut self) {
        self.cancel_reconnect_timer();
        let events = self.events.clone();
        let period = self.connection.retry_interval().max(Duration::from_secs(1));
        self.reconnect_timer = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                interval.tick().await;
                if events.send(TransportEvent::ReconnectTick).is_err() {
                    break;
                }
            }
        }));
    }

    fn cancel_reconnect_timer(&mut self) {
        if let Some(timer) = self.reconnect_timer.take() {
            timer.abort();
        }
    }
}

impl Drop for KlippyWebsocket {
    fn drop(&mut self) {
        self.cancel_reconnect_timer();
        if let Some(task) = self.session_task.take() {
            task.abort();
        }
    }
}

/// One connection attempt and, if it succeeds, the socket's read loop.
struct Session {
    generation: u64,
    rest: KlippyRest,
    ws_endpoint: String,
    handshake_timeout: Duration,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl Session {
    fn fail(&self, status: String, rest_failed: bool) {
        let _ = self.events.send(TransportEvent::ConnectFailed {
            generation: self.generation,
            status,
            rest_failed,
        });
    }

    async fn run(self) {
        if let Err(e) = self.rest.get_server_info().await {
            self.fail(KlippyRest::format_status(&e.chain()), true);
            return;
        }
        let token = match self.rest.get_oneshot_token().await {
            Ok(token) => token,
            Err(e) => {
                self.fail(KlippyRest::format_status(&e.chain()), true);
                return;
            }
        };

        let url = format!("{}/websocket?token={}", self.ws_endpoint, token);
        let stream = match tokio::time::timeout(self.handshake_timeout, connect_async(url.as_str())).await {
            Ok(Ok((stream, _response))) => stream,
            Ok(Err(e)) => {
                self.fail(format!("Websocket handshake with {} failed: {}", self.ws_endpoint, e), false);
                return;
            }
            Err(_) => {
                self.fail(format!("Websocket handshake with {} timed out", self.ws_endpoint), false);
                return;
            }
        };

        let (mut sink, mut stream) = stream.split();
        let (writer_tx, mut writer_rx) = mpsc::unbounded_channel::<Message>();
        if self
            .events
            .send(TransportEvent::Opened { generation: self.generation, writer: writer_tx })
            .is_err()
        {
            return;
        }

        let writer = tokio::spawn(async move {
            while let Some(message) = writer_rx.recv().await {
                let closing = matches!(message, Message::Close(_));
                if let Err(e) = sink.send(message).await {
                    tracing::error!("Websocket write error: {}", e);
                    break;
                }
                if closing {
                    break;
                }
            }
            let _ = sink.close().await;
            tracing::debug!("Websocket writer task terminated");
        });

        while let Some(message) = stream.next().await {
            match message {
                Ok(Message::Text(text)) => {
                    tracing::trace!("Websocket RX: {}", text.as_str());
                    let event = TransportEvent::Frame {
                        generation: self.generation,
                        text: text.as_str().to_owned(),
                    };
                    if self.events.send(event).is_err() {
                        break;
                    }
                }
                Ok(Message::Close(frame)) => {
                    tracing::info!("Moonraker closed the websocket: {:?}", frame);
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!("Websocket read error: {}", e);
                    break;
                }
            }
        }

        writer.abort();
        let _ = self.events.send(TransportEvent::Closed { generation: self.generation });
    }
}
