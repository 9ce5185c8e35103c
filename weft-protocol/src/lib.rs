//! # weft-protocol
//!
//! Shared wire protocol types for the weft messaging fabric.
//!
//! This crate is `no_std + alloc` compatible so it can be used from:
//!
//! - **`weft-connector`** — the native client connector (Tokio)
//! - **Broker implementations** — server-side chunk parsing
//! - **Future embedded clients** — `alloc`-only targets
//!
//! # Wire Format
//!
//! A weft message is a concatenation of framed chunks, carried one message
//! per binary WebSocket frame:
//!
//! ```text
//! ┌────────────┬──────────────────┬──────────────────┐
//! │ descriptor │ size (u32, BE)   │ content (size B) │
//! │   1 byte   │     4 bytes      │                  │
//! └────────────┴──────────────────┴──────────────────┘
//! ```
//!
//! Descriptors:
//!
//! | Value  | Chunk    | Cardinality          | Content               |
//! |--------|----------|----------------------|-----------------------|
//! | `0x01` | envelope | exactly one, first   | JSON routing metadata |
//! | `0x02` | data     | at most one          | JSON or raw bytes     |
//! | `0x03` | debug    | zero or more, last   | JSON diagnostics      |
//!
//! # Validation
//!
//! Inbound messages are checked against named [`Schema`]s held by a
//! [`Validator`]: the envelope against the built-in envelope schema, the
//! data chunk against the schema named by the envelope's `message_type`,
//! and every debug chunk against the built-in debug schema. The validated
//! view of a message is a [`ParsedChunks`].

#![no_std]

extern crate alloc;

pub mod chunk;
pub mod error;
pub mod message;
pub mod schema;

pub use chunk::{ChunkDescriptor, MessageChunk};
pub use error::ProtocolError;
pub use message::{Message, ParsedChunks};
pub use schema::{
    associate_response_schema, debug_schema, envelope_schema, ContentType, Schema, Validator,
    ValueKind, ASSOCIATE_REQ_TYPE, ASSOCIATE_RESP_TYPE, DEBUG_SCHEMA_NAME, ENVELOPE_SCHEMA_NAME,
};
