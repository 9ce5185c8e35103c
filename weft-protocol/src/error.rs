//! Errors arising while framing, parsing, or validating wire messages.

use alloc::string::String;

/// Errors that can arise when interpreting wire-format data.
///
/// Every inbound variant maps to a drop-the-message policy on the receive
/// path; none of them tears down the connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// The byte stream does not decode into a well-formed chunk sequence.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// A chunk's content does not fit the u32 size field.
    #[error("chunk content of {0} bytes exceeds the wire size field")]
    ChunkTooLarge(usize),

    /// The envelope chunk is missing, not JSON, or fails envelope validation.
    #[error("invalid envelope: {0}")]
    InvalidEnvelope(String),

    /// The data chunk fails validation against its message-type schema.
    #[error("invalid data content: {0}")]
    InvalidData(String),

    /// A chunk's content is not parseable JSON.
    #[error("invalid JSON in chunk content: {0}")]
    DataParse(String),

    /// The envelope names a `message_type` with no registered schema.
    #[error("no schema registered under '{0}'")]
    UnknownSchema(String),

    /// A schema with the same name is already registered.
    #[error("schema '{0}' is already registered")]
    DuplicateSchema(String),
}
