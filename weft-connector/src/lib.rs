//! # weft-connector
//!
//! The client half of the weft messaging fabric — a persistent,
//! mutually-authenticated WebSocket session to a central broker with an
//! application-layer session-association handshake, schema-validated
//! message envelopes, and handler dispatch keyed by message type.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use weft_connector::{Connector, ContentType, Schema, ValueKind};
//!
//! let connector = Connector::new(
//!     "wss://broker.example.com:8142/weft",
//!     "agent",
//!     "/etc/weft/ca.pem",
//!     "/etc/weft/agent01.pem",
//!     "/etc/weft/agent01.key",
//! );
//!
//! let schema = Schema::new("example/ping", ContentType::Json)
//!     .required("seq", ValueKind::Number);
//! connector.register_message_callback(schema, |parsed| {
//!     println!("ping from {}", parsed.envelope["sender"]);
//! });
//!
//! connector.connect(4).await?;
//! connector.monitor_connection(4)?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! caller ── send_json/send_binary ─► MessageAssembler ─► chunks ──► Transport ──► broker
//! broker ──► Transport ── on_message ─► parse + validate ─► dispatch ─► handler
//!                         on_open ───► associate-session request
//! MonitorTask ── every heartbeat interval ──► heartbeat ping / reconnect
//! ```
//!
//! The wire format and schema machinery live in [`weft_protocol`],
//! re-exported here as [`protocol`].

pub mod assembler;
pub mod config;
pub mod connector;
pub mod error;
mod monitor;
pub mod registry;
pub mod transport;

pub use weft_protocol as protocol;

// ════════════════════════════════════════════════════════════════════
// Public re-exports
// ════════════════════════════════════════════════════════════════════

pub use assembler::{MessageAssembler, Payload, SERVER_URI};
pub use config::{
    ClientMetadata, ConnectorConfig, DEFAULT_ASSOCIATION_TTL_SECS, DEFAULT_HEARTBEAT_INTERVAL,
};
pub use connector::Connector;
pub use error::{ConnectionError, ConnectionResult};
pub use registry::{CallbackRegistry, MessageHandler};
pub use transport::{
    ConnectionState, MessageCallback, OpenCallback, Transport, WsTransport,
};

pub use weft_protocol::{
    ChunkDescriptor, ContentType, Message, MessageChunk, ParsedChunks, ProtocolError, Schema,
    Validator, ValueKind, ASSOCIATE_REQ_TYPE, ASSOCIATE_RESP_TYPE,
};
