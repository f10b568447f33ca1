//! Single relay connection management
//!
//! A `RelayConnection` owns one WebSocket. The write half sits behind a mutex
//! so REQ/CLOSE/EVENT can be sent from any task; the read half is drained by a
//! background task that resolves publish confirmations and forwards every
//! parsed relay message to the channel returned by [`RelayConnection::connect`].
//! That channel closes when the socket does.

use crate::error::{ClientError, Result};
use crate::message::{ClientMessage, RelayMessage};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use nostr::{Event, Filter};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, RwLock, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Disconnected
    Disconnected,
    /// Currently connecting
    Connecting,
    /// Connected and ready
    Connected,
}

/// Confirmation result for event publishing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishConfirmation {
    /// Event ID that was published
    pub event_id: String,
    /// Whether the relay accepted the event
    pub accepted: bool,
    /// Message from the relay (empty if accepted, error message if rejected)
    pub message: String,
}

type ConfirmationSender = oneshot::Sender<PublishConfirmation>;

/// Relay connection configuration
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Connection timeout
    pub connect_timeout: Duration,
    /// How long `publish` waits for the relay's OK
    pub publish_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            publish_timeout: Duration::from_secs(10),
        }
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// Relay connection
pub struct RelayConnection {
    /// Relay URL
    url: Url,
    /// Configuration
    config: RelayConfig,
    /// Connection state
    state: Arc<RwLock<ConnectionState>>,
    /// Write half of the WebSocket
    writer: Arc<Mutex<Option<WsSink>>>,
    /// Pending event confirmations (event_id -> oneshot sender)
    pending_confirmations: Arc<Mutex<HashMap<String, ConfirmationSender>>>,
    /// Receive loop task handle
    recv_task: Mutex<Option<JoinHandle<()>>>,
}

impl RelayConnection {
    /// Create a new relay connection (does not connect yet)
    pub fn new(url: &str) -> Result<Self> {
        Self::with_config(url, RelayConfig::default())
    }

    /// Create a new relay connection with custom config
    pub fn with_config(url: &str, config: RelayConfig) -> Result<Self> {
        let url = Url::parse(url)?;

        if url.scheme() != "ws" && url.scheme() != "wss" {
            return Err(ClientError::InvalidUrl(format!(
                "URL must use ws:// or wss:// scheme, got: {}",
                url.scheme()
            )));
        }

        Ok(Self {
            url,
            config,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            writer: Arc::new(Mutex::new(None)),
            pending_confirmations: Arc::new(Mutex::new(HashMap::new())),
            recv_task: Mutex::new(None),
        })
    }

    /// Connect to the relay.
    ///
    /// Returns the stream of messages the relay sends on this socket.
    pub async fn connect(&self) -> Result<mpsc::UnboundedReceiver<RelayMessage>> {
        {
            let mut state = self.state.write().await;
            if *state != ConnectionState::Disconnected {
                return Err(ClientError::AlreadyConnected);
            }
            *state = ConnectionState::Connecting;
        }

        info!("Connecting to relay: {}", self.url);

        let connect_start = Instant::now();
        let ws_stream = match timeout(self.config.connect_timeout, connect_async(self.url.as_str()))
            .await
        {
            Ok(Ok((stream, _))) => stream,
            Ok(Err(e)) => {
                *self.state.write().await = ConnectionState::Disconnected;
                return Err(ClientError::WebSocket(e.to_string()));
            }
            Err(_) => {
                *self.state.write().await = ConnectionState::Disconnected;
                return Err(ClientError::Timeout(format!(
                    "Connection timeout after {:?}",
                    self.config.connect_timeout
                )));
            }
        };

        let (sink, stream) = ws_stream.split();
        *self.writer.lock().await = Some(sink);
        *self.state.write().await = ConnectionState::Connected;

        info!(
            "Connected to relay: {} (took {:?})",
            self.url,
            connect_start.elapsed()
        );

        let (tx, rx) = mpsc::unbounded_channel();
        self.start_recv_loop(stream, tx).await;
        Ok(rx)
    }

    /// Start background receive loop to process incoming messages
    async fn start_recv_loop(
        &self,
        mut stream: SplitStream<WsStream>,
        tx: mpsc::UnboundedSender<RelayMessage>,
    ) {
        let writer = Arc::clone(&self.writer);
        let state = Arc::clone(&self.state);
        let pending_confirmations = Arc::clone(&self.pending_confirmations);
        let url = self.url.to_string();

        let handle = tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                let text = match frame {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Ping(data)) => {
                        if let Some(sink) = writer.lock().await.as_mut() {
                            let _ = sink.send(Message::Pong(data)).await;
                        }
                        continue;
                    }
                    Ok(Message::Close(_)) => {
                        info!("Relay {} closed connection", url);
                        break;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        warn!("WebSocket error from {}: {}", url, e);
                        break;
                    }
                };

                debug!("Received from {}: {}", url, text.as_str());
                let relay_msg = match RelayMessage::from_json(text.as_str()) {
                    Ok(msg) => msg,
                    Err(e) => {
                        debug!("Ignoring malformed message from {}: {}", url, e);
                        continue;
                    }
                };

                if let RelayMessage::Ok {
                    event_id,
                    success,
                    message,
                } = &relay_msg
                    && let Some(sender) = pending_confirmations.lock().await.remove(event_id)
                {
                    let _ = sender.send(PublishConfirmation {
                        event_id: event_id.clone(),
                        accepted: *success,
                        message: message.clone(),
                    });
                }

                if tx.send(relay_msg).is_err() {
                    debug!("Message consumer for {} is gone", url);
                }
            }

            *state.write().await = ConnectionState::Disconnected;
            writer.lock().await.take();
            pending_confirmations.lock().await.clear();
            info!("Receive loop for {} ended", url);
        });

        *self.recv_task.lock().await = Some(handle);
    }

    /// Disconnect from the relay
    pub async fn disconnect(&self) {
        if *self.state.read().await == ConnectionState::Disconnected {
            return;
        }

        info!("Disconnecting from relay: {}", self.url);

        if let Some(handle) = self.recv_task.lock().await.take() {
            handle.abort();
        }

        if let Some(mut sink) = self.writer.lock().await.take() {
            let _ = sink.close().await;
        }

        self.pending_confirmations.lock().await.clear();
        *self.state.write().await = ConnectionState::Disconnected;
        info!("Disconnected from relay: {}", self.url);
    }

    /// Get current connection state
    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Check if connected
    pub async fn is_connected(&self) -> bool {
        *self.state.read().await == ConnectionState::Connected
    }

    /// Publish an event and wait for the relay's OK.
    pub async fn publish(&self, event: &Event) -> Result<PublishConfirmation> {
        let (tx, rx) = oneshot::channel();
        let event_id = event.id.clone();

        self.pending_confirmations
            .lock()
            .await
            .insert(event_id.clone(), tx);

        if let Err(e) = self.send_message(&ClientMessage::Event(event.clone())).await {
            self.pending_confirmations.lock().await.remove(&event_id);
            return Err(e);
        }

        match timeout(self.config.publish_timeout, rx).await {
            Ok(Ok(confirmation)) => Ok(confirmation),
            Ok(Err(_)) => Err(ClientError::PublishFailed(
                "connection closed before confirmation".to_string(),
            )),
            Err(_) => {
                self.pending_confirmations.lock().await.remove(&event_id);
                Err(ClientError::Timeout(format!(
                    "Event confirmation timeout after {:?}",
                    self.config.publish_timeout
                )))
            }
        }
    }

    /// Send a REQ for `filters` under `subscription_id`.
    pub async fn subscribe(&self, subscription_id: &str, filters: &[Filter]) -> Result<()> {
        self.send_message(&ClientMessage::Req {
            subscription_id: subscription_id.to_string(),
            filters: filters.to_vec(),
        })
        .await
    }

    /// Close a subscription
    pub async fn close_subscription(&self, subscription_id: &str) -> Result<()> {
        self.send_message(&ClientMessage::Close {
            subscription_id: subscription_id.to_string(),
        })
        .await
    }

    /// Send a client message to the relay
    pub async fn send_message(&self, msg: &ClientMessage) -> Result<()> {
        if !self.is_connected().await {
            return Err(ClientError::NotConnected);
        }

        let msg_text = msg.to_json()?;
        debug!("Sending to {}: {}", self.url, msg_text);

        let mut writer = self.writer.lock().await;
        let Some(sink) = writer.as_mut() else {
            return Err(ClientError::NotConnected);
        };

        sink.send(Message::Text(msg_text.into()))
            .await
            .map_err(|e| ClientError::WebSocket(e.to_string()))
    }

    /// Get relay URL
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Number of publishes still waiting for an OK
    pub async fn pending_count(&self) -> usize {
        self.pending_confirmations.lock().await.len()
    }
}

impl Drop for RelayConnection {
    fn drop(&mut self) {
        if let Some(handle) = self.recv_task.get_mut().take() {
            handle.abort();
        }
    }
}
