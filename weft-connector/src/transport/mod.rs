//! The transport seam between the connector and the wire.
//!
//! [`Transport`] is the interface the connector state machine drives; the
//! production implementation is [`WsTransport`](ws::WsTransport), a
//! mutually-authenticated WebSocket link. Test suites substitute their own
//! in-memory implementations.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::ConnectionResult;

pub mod tls;
pub mod ws;

pub use ws::WsTransport;

/// Invoked with the raw bytes of each inbound binary frame.
pub type MessageCallback = Arc<dyn Fn(Vec<u8>) + Send + Sync>;

/// Invoked once each time the transport reaches the open state.
pub type OpenCallback = Arc<dyn Fn() + Send + Sync>;

/// Lifecycle state of a transport link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closing,
    Closed,
    Failed,
}

/// A full-duplex message transport.
///
/// `send` and `ping` enqueue onto the transport's write loop and therefore
/// do not block beyond a channel push; `connect` blocks until the link is
/// open or the attempt budget is spent.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the link, retrying up to `max_attempts` times.
    ///
    /// Returns [`ConnectionError::Fatal`](crate::ConnectionError::Fatal)
    /// once the budget is exhausted and
    /// [`ConnectionError::Config`](crate::ConnectionError::Config) when the
    /// credentials or URL cannot produce a connection at all.
    async fn connect(&self, max_attempts: usize) -> ConnectionResult<()>;

    /// Ship one message as a single binary frame.
    fn send(&self, bytes: Vec<u8>) -> ConnectionResult<()>;

    /// Issue a transport-level ping (the monitor's heartbeat).
    fn ping(&self) -> ConnectionResult<()>;

    /// Current lifecycle state.
    fn state(&self) -> ConnectionState;

    fn set_on_message_callback(&self, callback: MessageCallback);

    fn set_on_open_callback(&self, callback: OpenCallback);

    /// Drop both callbacks.
    ///
    /// Called before the owner is torn down so a late frame cannot re-enter
    /// destroyed state. An invocation already in flight holds its own clone
    /// of the callback and is allowed to finish.
    fn reset_callbacks(&self);

    /// Close the link and stop its background loops.
    async fn close(&self);
}

/// Shared callback storage used by transport implementations.
#[derive(Default)]
pub struct CallbackSet {
    on_message: Option<MessageCallback>,
    on_open: Option<OpenCallback>,
}

/// Callback slots behind a lock, clonable into transport read loops.
#[derive(Clone, Default)]
pub struct SharedCallbacks {
    inner: Arc<Mutex<CallbackSet>>,
}

impl SharedCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_on_message(&self, callback: MessageCallback) {
        self.inner.lock().unwrap().on_message = Some(callback);
    }

    pub fn set_on_open(&self, callback: OpenCallback) {
        self.inner.lock().unwrap().on_open = Some(callback);
    }

    pub fn reset(&self) {
        let mut set = self.inner.lock().unwrap();
        set.on_message = None;
        set.on_open = None;
    }

    /// Clone the message callback out of the slot, if any.
    pub fn on_message(&self) -> Option<MessageCallback> {
        self.inner.lock().unwrap().on_message.clone()
    }

    /// Clone the open callback out of the slot, if any.
    pub fn on_open(&self) -> Option<OpenCallback> {
        self.inner.lock().unwrap().on_open.clone()
    }
}
