//! Outbound message construction.
//!
//! The assembler stamps every outbound envelope with a fresh UUID message
//! id, the sender URI, and an `expires` deadline in extended ISO-8601 UTC.

use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;

use weft_protocol::{
    ChunkDescriptor, Message, MessageChunk, ParsedChunks, ProtocolError, Validator,
    ASSOCIATE_REQ_TYPE,
};

/// Routing URI of the broker itself, the target of the associate-session
/// request.
pub const SERVER_URI: &str = "cth:///server";

/// `expires` timestamps use extended ISO-8601 with microseconds, UTC, `Z`.
const EXPIRES_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

/// TTLs beyond a century are clamped so the deadline arithmetic cannot
/// overflow.
const MAX_TTL_SECS: u64 = 100 * 365 * 24 * 3_600;

/// The data payload of an outbound message.
#[derive(Debug, Clone)]
pub enum Payload {
    /// A JSON object, validated by the receiver against the message-type
    /// schema.
    Json(Value),
    /// An opaque byte string; receivers skip JSON validation.
    Binary(Vec<u8>),
}

/// Builds outbound messages on behalf of one client identity.
#[derive(Debug, Clone)]
pub struct MessageAssembler {
    sender: String,
}

impl MessageAssembler {
    pub fn new(sender: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
        }
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    /// Build an envelope chunk; returns the generated message id with it.
    ///
    /// `targets` and `message_type` must be non-empty.
    pub fn envelope(
        &self,
        targets: &[String],
        message_type: &str,
        timeout_secs: u64,
        destination_report: bool,
    ) -> Result<(String, MessageChunk), ProtocolError> {
        if targets.is_empty() {
            return Err(ProtocolError::InvalidEnvelope(
                "outbound targets must not be empty".to_string(),
            ));
        }
        if message_type.is_empty() {
            return Err(ProtocolError::InvalidEnvelope(
                "outbound message_type must not be empty".to_string(),
            ));
        }

        let id = Uuid::new_v4().to_string();
        let expires = expires_at(timeout_secs);

        #[cfg(feature = "tracing")]
        tracing::debug!(
            "creating message {} for {} receiver(s)",
            id,
            targets.len()
        );

        let mut envelope = json!({
            "id": id,
            "message_type": message_type,
            "targets": targets,
            "expires": expires,
            "sender": self.sender,
        });
        if destination_report {
            envelope["destination_report"] = json!(true);
        }

        let content = serde_json::to_vec(&envelope).expect("envelope serialization failed");
        Ok((id, MessageChunk::new(ChunkDescriptor::Envelope, content)))
    }

    /// Build a complete outbound message with a data payload.
    pub fn build(
        &self,
        targets: &[String],
        message_type: &str,
        timeout_secs: u64,
        destination_report: bool,
        payload: Payload,
        debug: &[Value],
    ) -> Result<Message, ProtocolError> {
        let (_, envelope) = self.envelope(targets, message_type, timeout_secs, destination_report)?;

        let data_content = match payload {
            Payload::Json(value) => {
                serde_json::to_vec(&value).expect("data serialization failed")
            }
            Payload::Binary(bytes) => bytes,
        };

        let mut message = Message::new(envelope)?
            .with_data(MessageChunk::new(ChunkDescriptor::Data, data_content))?;
        for entry in debug {
            let content = serde_json::to_vec(entry).expect("debug serialization failed");
            message.add_debug_chunk(MessageChunk::new(ChunkDescriptor::Debug, content))?;
        }
        Ok(message)
    }

    /// Build the envelope-only associate-session request.
    pub fn associate_request(&self, ttl_secs: u64) -> Result<(String, Message), ProtocolError> {
        let (id, envelope) = self.envelope(
            &[SERVER_URI.to_string()],
            ASSOCIATE_REQ_TYPE,
            ttl_secs,
            false,
        )?;
        Ok((id, Message::new(envelope)?))
    }

    /// Parse raw wire bytes into a validated view.
    pub fn parse(bytes: &[u8], validator: &Validator) -> Result<ParsedChunks, ProtocolError> {
        Message::from_bytes(bytes)?.parse(validator)
    }
}

fn expires_at(timeout_secs: u64) -> String {
    let offset = chrono::Duration::seconds(timeout_secs.min(MAX_TTL_SECS) as i64);
    (Utc::now() + offset).format(EXPIRES_FORMAT).to_string()
}
