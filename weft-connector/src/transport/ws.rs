//! WebSocket transport over mutual TLS.
//!
//! [`WsTransport`] manages a `tokio-tungstenite` connection to the broker:
//!
//! - **Write loop** — drains an unbounded channel of outbound frames, so
//!   `send`/`ping` never block past a channel push.
//! - **Read loop** — turns inbound binary frames into `on_message`
//!   invocations and flips the state on close or error.
//! - **Bounded connect** — retries with a capped backoff ladder; exhausting
//!   the attempt budget is fatal.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{Bytes, Message as WsMessage};
use tokio_tungstenite::{
    connect_async_tls_with_config, Connector as TlsConnector, MaybeTlsStream, WebSocketStream,
};

use super::{tls, ConnectionState, MessageCallback, OpenCallback, SharedCallbacks, Transport};
use crate::config::ClientMetadata;
use crate::error::{ConnectionError, ConnectionResult};

/// Reconnect backoff ladder in milliseconds; the last entry repeats.
const BACKOFF_MS: [u64; 5] = [500, 1_000, 2_000, 4_000, 8_000];

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A mutually-authenticated WebSocket link to the broker.
pub struct WsTransport {
    url: String,
    metadata: ClientMetadata,
    callbacks: SharedCallbacks,
    shared: Arc<Shared>,
}

struct Shared {
    state: Mutex<ConnectionState>,
    write_tx: Mutex<Option<mpsc::UnboundedSender<WsMessage>>>,
    /// Bumped on every (re)install; stale loops must not clobber the state
    /// of a newer connection.
    epoch: AtomicU64,
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        *self.state.lock().unwrap() = state;
    }

    /// Mark the link closed, but only if `epoch` still names the live
    /// connection.
    fn close_if_current(&self, epoch: u64) {
        if self.epoch.load(Ordering::SeqCst) == epoch {
            self.set_state(ConnectionState::Closed);
            self.write_tx.lock().unwrap().take();
        }
    }
}

impl WsTransport {
    pub fn new(url: impl Into<String>, metadata: ClientMetadata) -> Self {
        Self {
            url: url.into(),
            metadata,
            callbacks: SharedCallbacks::new(),
            shared: Arc::new(Shared {
                state: Mutex::new(ConnectionState::Closed),
                write_tx: Mutex::new(None),
                epoch: AtomicU64::new(0),
            }),
        }
    }

    /// Wire up the write and read loops for a freshly opened stream.
    fn install(&self, stream: WsStream) {
        let (ws_write, ws_read) = stream.split();
        let (write_tx, write_rx) = mpsc::unbounded_channel();

        let epoch = self.shared.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        *self.shared.write_tx.lock().unwrap() = Some(write_tx);
        self.shared.set_state(ConnectionState::Open);

        let shared = self.shared.clone();
        tokio::spawn(async move {
            run_write_loop(ws_write, write_rx).await;
            shared.close_if_current(epoch);
        });

        let shared = self.shared.clone();
        let callbacks = self.callbacks.clone();
        tokio::spawn(async move {
            run_read_loop(ws_read, callbacks).await;
            shared.close_if_current(epoch);
        });
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn connect(&self, max_attempts: usize) -> ConnectionResult<()> {
        if self.state() == ConnectionState::Open {
            return Ok(());
        }

        // An unusable credential set can never connect; retrying is
        // pointless.
        let tls_config = match tls::client_tls_config(&self.metadata) {
            Ok(config) => config,
            Err(e) => {
                self.shared.set_state(ConnectionState::Failed);
                return Err(ConnectionError::fatal(format!(
                    "invalid TLS configuration: {e}"
                )));
            }
        };
        let mut attempt = 0usize;

        loop {
            attempt += 1;
            self.shared.set_state(ConnectionState::Connecting);

            #[cfg(feature = "tracing")]
            tracing::debug!("connecting to {} (attempt {})", self.url, attempt);

            let connector = Some(TlsConnector::Rustls(tls_config.clone()));
            match connect_async_tls_with_config(self.url.as_str(), None, false, connector).await
            {
                Ok((stream, _response)) => {
                    self.install(stream);

                    #[cfg(feature = "tracing")]
                    tracing::info!("connected to {}", self.url);

                    if let Some(on_open) = self.callbacks.on_open() {
                        on_open();
                    }
                    return Ok(());
                }
                Err(e) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!("connection attempt {} failed: {}", attempt, e);

                    if attempt >= max_attempts.max(1) {
                        self.shared.set_state(ConnectionState::Failed);
                        return Err(ConnectionError::fatal(format!(
                            "giving up on {} after {attempt} attempt(s): {e}",
                            self.url
                        )));
                    }
                    let delay = BACKOFF_MS[(attempt - 1).min(BACKOFF_MS.len() - 1)];
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
            }
        }
    }

    fn send(&self, bytes: Vec<u8>) -> ConnectionResult<()> {
        let guard = self.shared.write_tx.lock().unwrap();
        let tx = guard
            .as_ref()
            .ok_or_else(|| ConnectionError::processing("transport is not open"))?;
        tx.send(WsMessage::Binary(bytes.into()))
            .map_err(|_| ConnectionError::processing("write loop has shut down"))
    }

    fn ping(&self) -> ConnectionResult<()> {
        let guard = self.shared.write_tx.lock().unwrap();
        let tx = guard
            .as_ref()
            .ok_or_else(|| ConnectionError::processing("transport is not open"))?;
        tx.send(WsMessage::Ping(Bytes::new()))
            .map_err(|_| ConnectionError::processing("write loop has shut down"))
    }

    fn state(&self) -> ConnectionState {
        *self.shared.state.lock().unwrap()
    }

    fn set_on_message_callback(&self, callback: MessageCallback) {
        self.callbacks.set_on_message(callback);
    }

    fn set_on_open_callback(&self, callback: OpenCallback) {
        self.callbacks.set_on_open(callback);
    }

    fn reset_callbacks(&self) {
        self.callbacks.reset();
    }

    async fn close(&self) {
        self.shared.set_state(ConnectionState::Closing);
        // Dropping the sender ends the write loop, which closes the sink.
        self.shared.write_tx.lock().unwrap().take();
        self.shared.set_state(ConnectionState::Closed);
    }
}

async fn run_write_loop(
    mut ws_write: SplitSink<WsStream, WsMessage>,
    mut write_rx: mpsc::UnboundedReceiver<WsMessage>,
) {
    while let Some(msg) = write_rx.recv().await {
        if ws_write.send(msg).await.is_err() {
            #[cfg(feature = "tracing")]
            tracing::warn!("write failed, closing write loop");
            break;
        }
    }
    let _ = ws_write.close().await;
}

async fn run_read_loop(mut ws_read: SplitStream<WsStream>, callbacks: SharedCallbacks) {
    while let Some(result) = ws_read.next().await {
        match result {
            Ok(WsMessage::Binary(bytes)) => {
                if let Some(on_message) = callbacks.on_message() {
                    on_message(bytes.to_vec());
                }
            }
            Ok(WsMessage::Close(_)) => {
                #[cfg(feature = "tracing")]
                tracing::info!("received close frame");
                break;
            }
            // Ping/pong frames are answered by tungstenite; text frames are
            // not part of the protocol.
            Ok(_) => {}
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::debug!("read error: {}", _e);
                break;
            }
        }
    }
}
