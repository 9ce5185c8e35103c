//! The connector state machine and dispatcher.
//!
//! [`Connector`] owns the transport, the schema validator, and the handler
//! registry. On transport open it runs the associate-session handshake
//! binding this connection to the client's URI; inbound messages are
//! validated and dispatched to handlers keyed by the envelope's
//! `message_type`.
//!
//! # Lifecycle
//!
//! ```text
//! Connector::new()
//!   ├─ pre-register envelope/debug schemas
//!   └─ pre-register the associate-response handler
//! connect(max_attempts)
//!   ├─ lazily create the WebSocket transport
//!   ├─ install on_message → process_message, on_open → associate_session
//!   └─ open the link (bounded retries)
//! monitor_connection(max_attempts)
//!   └─ spawn the monitor task (once)
//! shutdown()
//!   ├─ reset transport callbacks
//!   ├─ signal and join the monitor
//!   └─ close the transport
//! ```

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use serde::Deserialize;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use weft_protocol::{associate_response_schema, Message, ParsedChunks, Schema};

use crate::assembler::{MessageAssembler, Payload};
use crate::config::ConnectorConfig;
use crate::error::{ConnectionError, ConnectionResult};
use crate::monitor;
use crate::registry::CallbackRegistry;
use crate::transport::{ConnectionState, Transport, WsTransport};

/// Data object of the broker's associate-session response.
#[derive(Debug, Deserialize)]
struct AssociateResponse {
    /// Echo of the request's envelope id.
    id: String,
    success: bool,
    #[serde(default)]
    reason: Option<String>,
}

/// State shared between the connector, its transport callbacks, and the
/// monitor task. Callbacks hold this weakly so a finished connector cannot
/// be re-entered through a late frame.
pub(crate) struct Shared {
    pub(crate) assembler: MessageAssembler,
    pub(crate) registry: RwLock<CallbackRegistry>,
    pub(crate) transport: RwLock<Option<Arc<dyn Transport>>>,
    pub(crate) associated: AtomicBool,
    pub(crate) monitoring: AtomicBool,
    pub(crate) association_ttl_secs: u64,
}

impl Shared {
    pub(crate) fn transport(&self) -> Option<Arc<dyn Transport>> {
        self.transport.read().unwrap().clone()
    }

    fn send_message(&self, message: &Message) -> ConnectionResult<()> {
        let transport = self.transport().ok_or(ConnectionError::NotInitialized(
            "connect() has not been called",
        ))?;
        let bytes = message.serialize()?;

        #[cfg(feature = "tracing")]
        tracing::debug!("sending message of {} bytes", bytes.len());

        transport.send(bytes)
    }

    /// Transport on-message callback: validate, then dispatch.
    ///
    /// Invalid messages are logged and dropped; the session stays up.
    fn process_message(&self, bytes: Vec<u8>) {
        #[cfg(feature = "tracing")]
        tracing::debug!("received message of {} bytes", bytes.len());

        let registry = self.registry.read().unwrap();
        let parsed = match MessageAssembler::parse(&bytes, registry.validator()) {
            Ok(parsed) => parsed,
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::error!("dropping invalid message: {}", _e);
                return;
            }
        };
        let handler = registry.handler(parsed.message_type());
        drop(registry);

        match handler {
            Some(handler) => {
                #[cfg(feature = "tracing")]
                tracing::trace!("executing callback for a '{}' message", parsed.message_type());

                if let Err(panic) = catch_unwind(AssertUnwindSafe(|| handler(&parsed))) {
                    let reason = format_panic(panic);
                    let _ = &reason;
                    #[cfg(feature = "tracing")]
                    tracing::error!(
                        "handler for '{}' panicked: {}",
                        parsed.message_type(),
                        reason
                    );
                }
            }
            None => {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    "no message callback registered for '{}'",
                    parsed.message_type()
                );
            }
        }
    }

    /// Transport on-open callback: send the associate-session request.
    ///
    /// Fired from the open path itself, so the request is ordered before
    /// any user send racing with the open.
    fn associate_session(&self) {
        let (id, message) = match self.assembler.associate_request(self.association_ttl_secs) {
            Ok(pair) => pair,
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::error!("failed to build the associate request: {}", _e);
                return;
            }
        };
        let _ = &id;

        #[cfg(feature = "tracing")]
        tracing::info!("sending associate session request {}", id);

        if let Err(_e) = self.send_message(&message) {
            #[cfg(feature = "tracing")]
            tracing::error!("failed to send the associate request: {}", _e);
        }
    }

    /// Pre-registered handler for the associate-session response.
    fn on_associate_response(&self, parsed: &ParsedChunks) {
        let Some(data) = parsed.data.as_ref() else {
            #[cfg(feature = "tracing")]
            tracing::warn!("associate response carries no data; ignoring");
            return;
        };
        let response: AssociateResponse = match serde_json::from_value(data.clone()) {
            Ok(response) => response,
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!("unreadable associate response: {}", _e);
                return;
            }
        };

        let response_id = envelope_str(&parsed.envelope, "id");
        let server = envelope_str(&parsed.envelope, "sender");
        let _ = (&response_id, &server);

        if response.success {
            self.associated.store(true, Ordering::SeqCst);

            #[cfg(feature = "tracing")]
            tracing::info!(
                "associate session response {} from {} for request {}: success",
                response_id,
                server,
                response.id
            );
        } else {
            #[cfg(feature = "tracing")]
            match &response.reason {
                Some(reason) => tracing::warn!(
                    "associate session response {} from {} for request {}: failure - {}",
                    response_id,
                    server,
                    response.id,
                    reason
                ),
                None => tracing::warn!(
                    "associate session response {} from {} for request {}: failure",
                    response_id,
                    server,
                    response.id
                ),
            }
        }
    }
}

fn envelope_str<'a>(envelope: &'a Value, key: &str) -> &'a str {
    envelope.get(key).and_then(Value::as_str).unwrap_or_default()
}

fn format_panic(panic: Box<dyn Any + Send>) -> String {
    match panic.downcast::<String>() {
        Ok(s) => *s,
        Err(panic) => match panic.downcast::<&'static str>() {
            Ok(s) => (*s).to_string(),
            Err(_) => "non-string panic payload".to_string(),
        },
    }
}

/// The client half of the messaging fabric.
///
/// See the [module docs](self) for the lifecycle overview.
pub struct Connector {
    config: ConnectorConfig,
    shared: Arc<Shared>,
    shutdown_tx: watch::Sender<bool>,
    monitor_handle: Mutex<Option<JoinHandle<ConnectionResult<()>>>>,
}

impl Connector {
    /// Construct a connector with no open transport.
    ///
    /// Pre-registers the envelope and debug schemas and the internal
    /// handler for the associate-session response.
    pub fn new(
        server_url: impl Into<String>,
        client_type: impl Into<String>,
        ca_crt_path: impl Into<std::path::PathBuf>,
        client_crt_path: impl Into<std::path::PathBuf>,
        client_key_path: impl Into<std::path::PathBuf>,
    ) -> Self {
        Self::with_config(ConnectorConfig::new(
            server_url,
            client_type,
            ca_crt_path,
            client_crt_path,
            client_key_path,
        ))
    }

    /// Construct from a tuned [`ConnectorConfig`].
    pub fn with_config(config: ConnectorConfig) -> Self {
        let shared = Arc::new(Shared {
            assembler: MessageAssembler::new(config.metadata.uri.clone()),
            registry: RwLock::new(CallbackRegistry::new()),
            transport: RwLock::new(None),
            associated: AtomicBool::new(false),
            monitoring: AtomicBool::new(false),
            association_ttl_secs: config.association_ttl_secs,
        });

        let weak = Arc::downgrade(&shared);
        shared.registry.write().unwrap().register(
            associate_response_schema(),
            Arc::new(move |parsed: &ParsedChunks| {
                if let Some(shared) = weak.upgrade() {
                    shared.on_associate_response(parsed);
                }
            }),
        );

        let (shutdown_tx, _) = watch::channel(false);
        Self {
            config,
            shared,
            shutdown_tx,
            monitor_handle: Mutex::new(None),
        }
    }

    /// The client URI this connector identifies as.
    pub fn client_uri(&self) -> &str {
        &self.config.metadata.uri
    }

    /// Register `handler` for inbound messages whose envelope names
    /// `schema`'s message type.
    ///
    /// Registering the same schema name again replaces the handler.
    pub fn register_message_callback<F>(&self, schema: Schema, handler: F)
    where
        F: Fn(&ParsedChunks) + Send + Sync + 'static,
    {
        self.shared
            .registry
            .write()
            .unwrap()
            .register(schema, Arc::new(handler));
    }

    /// Substitute a custom [`Transport`] for the default WebSocket link.
    ///
    /// Must be called before the first `connect`.
    pub fn use_transport(&self, transport: Arc<dyn Transport>) -> ConnectionResult<()> {
        let mut guard = self.shared.transport.write().unwrap();
        if guard.is_some() {
            return Err(ConnectionError::config("transport already initialized"));
        }
        Self::install_callbacks(&self.shared, &transport);
        *guard = Some(transport);
        Ok(())
    }

    fn ensure_transport(&self) -> Arc<dyn Transport> {
        let mut guard = self.shared.transport.write().unwrap();
        if let Some(transport) = guard.as_ref() {
            return transport.clone();
        }
        let transport: Arc<dyn Transport> = Arc::new(WsTransport::new(
            self.config.server_url.clone(),
            self.config.metadata.clone(),
        ));
        Self::install_callbacks(&self.shared, &transport);
        *guard = Some(transport.clone());
        transport
    }

    fn install_callbacks(shared: &Arc<Shared>, transport: &Arc<dyn Transport>) {
        let weak = Arc::downgrade(shared);
        transport.set_on_message_callback(Arc::new(move |bytes| {
            if let Some(shared) = weak.upgrade() {
                shared.process_message(bytes);
            }
        }));

        let weak = Arc::downgrade(shared);
        transport.set_on_open_callback(Arc::new(move || {
            if let Some(shared) = weak.upgrade() {
                shared.associate_session();
            }
        }));
    }

    /// Open the link, retrying up to `max_attempts` times.
    ///
    /// The transport is instantiated lazily on the first call. Transient
    /// transport failures surface as [`ConnectionError::Config`]; an
    /// exhausted attempt budget as [`ConnectionError::Fatal`].
    pub async fn connect(&self, max_attempts: usize) -> ConnectionResult<()> {
        let transport = self.ensure_transport();
        match transport.connect(max_attempts).await {
            Err(ConnectionError::Processing(reason)) => {
                #[cfg(feature = "tracing")]
                tracing::error!("failed to connect: {}", reason);
                Err(ConnectionError::Config(reason))
            }
            other => other,
        }
    }

    /// True iff the transport exists and its state is open.
    pub fn is_connected(&self) -> bool {
        self.shared
            .transport()
            .is_some_and(|t| t.state() == ConnectionState::Open)
    }

    /// True iff connected and the associate-session handshake succeeded.
    pub fn is_associated(&self) -> bool {
        self.is_connected() && self.shared.associated.load(Ordering::SeqCst)
    }

    /// Whether the monitor task is currently running.
    pub fn is_monitoring(&self) -> bool {
        self.shared.monitoring.load(Ordering::SeqCst)
    }

    /// Ship an already-built message.
    ///
    /// Requires a prior `connect`; fails with
    /// [`ConnectionError::NotInitialized`] otherwise.
    pub fn send(&self, message: &Message) -> ConnectionResult<()> {
        self.shared.send_message(message)
    }

    /// Build and send a JSON-data message.
    pub fn send_json(
        &self,
        targets: &[String],
        message_type: &str,
        timeout_secs: u64,
        data: Value,
        debug: &[Value],
    ) -> ConnectionResult<()> {
        self.send_payload(
            targets,
            message_type,
            timeout_secs,
            false,
            Payload::Json(data),
            debug,
        )
    }

    /// Build and send a binary-data message.
    pub fn send_binary(
        &self,
        targets: &[String],
        message_type: &str,
        timeout_secs: u64,
        data: Vec<u8>,
        debug: &[Value],
    ) -> ConnectionResult<()> {
        self.send_payload(
            targets,
            message_type,
            timeout_secs,
            false,
            Payload::Binary(data),
            debug,
        )
    }

    /// Build and send a message, optionally requesting a destination
    /// report from the broker.
    pub fn send_payload(
        &self,
        targets: &[String],
        message_type: &str,
        timeout_secs: u64,
        destination_report: bool,
        payload: Payload,
        debug: &[Value],
    ) -> ConnectionResult<()> {
        let message = self.shared.assembler.build(
            targets,
            message_type,
            timeout_secs,
            destination_report,
            payload,
            debug,
        )?;
        self.send(&message)
    }

    /// Start the background connection monitor.
    ///
    /// At most one monitor runs per connector; further calls warn and do
    /// nothing. Requires a prior `connect`.
    pub fn monitor_connection(&self, max_connect_attempts: usize) -> ConnectionResult<()> {
        if self.shared.transport().is_none() {
            return Err(ConnectionError::NotInitialized(
                "connect() must be called before monitoring",
            ));
        }
        if self.shared.monitoring.swap(true, Ordering::SeqCst) {
            #[cfg(feature = "tracing")]
            tracing::warn!("the connection monitor is already running");
            return Ok(());
        }

        let handle = tokio::spawn(monitor::run(
            Arc::downgrade(&self.shared),
            self.config.heartbeat_interval,
            max_connect_attempts,
            self.shutdown_tx.subscribe(),
        ));
        *self.monitor_handle.lock().unwrap() = Some(handle);
        Ok(())
    }

    /// Graceful teardown.
    ///
    /// Resets the transport callbacks first so no frame can re-enter a
    /// dying connector, then signals and joins the monitor, and finally
    /// closes the transport. Returns the monitor's exit result, which is
    /// [`ConnectionError::Fatal`] when the monitor died reconnecting.
    pub async fn shutdown(&self) -> ConnectionResult<()> {
        if let Some(transport) = self.shared.transport() {
            #[cfg(feature = "tracing")]
            tracing::info!("resetting the transport event callbacks");
            transport.reset_callbacks();
        }

        let _ = self.shutdown_tx.send(true);
        let handle = self.monitor_handle.lock().unwrap().take();
        let monitor_result = match handle {
            Some(handle) => handle.await.unwrap_or(Ok(())),
            None => Ok(()),
        };

        if let Some(transport) = self.shared.transport() {
            transport.close().await;
        }
        self.shared.associated.store(false, Ordering::SeqCst);
        monitor_result
    }
}

impl Drop for Connector {
    fn drop(&mut self) {
        // The non-blocking half of shutdown(): prevent callback re-entry
        // and wake the monitor so it can exit.
        if let Some(transport) = self.shared.transport() {
            transport.reset_callbacks();
        }
        let _ = self.shutdown_tx.send(true);
    }
}
