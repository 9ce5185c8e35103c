//! Message aggregates and the validated inbound view.
//!
//! A [`Message`] owns its chunks in wire order: exactly one envelope first,
//! at most one data chunk, then any debug chunks. [`ParsedChunks`] is the
//! schema-validated decoding of an inbound message.

use alloc::format;
use alloc::string::ToString;
use alloc::vec::Vec;
use core::fmt;

use serde_json::Value;

use crate::chunk::{ChunkDescriptor, MessageChunk};
use crate::error::ProtocolError;
use crate::schema::{ContentType, Validator, DEBUG_SCHEMA_NAME, ENVELOPE_SCHEMA_NAME};

/// An ordered aggregate of chunks forming one wire message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    envelope: MessageChunk,
    data: Option<MessageChunk>,
    debug: Vec<MessageChunk>,
}

impl Message {
    /// Create an envelope-only message.
    pub fn new(envelope: MessageChunk) -> Result<Self, ProtocolError> {
        if envelope.descriptor != ChunkDescriptor::Envelope {
            return Err(ProtocolError::InvalidEnvelope(
                "first chunk is not an envelope".to_string(),
            ));
        }
        if envelope.content.is_empty() {
            return Err(ProtocolError::InvalidEnvelope(
                "envelope content is empty".to_string(),
            ));
        }
        Ok(Self {
            envelope,
            data: None,
            debug: Vec::new(),
        })
    }

    /// Attach the data chunk. A message carries at most one.
    pub fn with_data(mut self, data: MessageChunk) -> Result<Self, ProtocolError> {
        if data.descriptor != ChunkDescriptor::Data {
            return Err(ProtocolError::MalformedFrame(
                "data chunk carries a non-data descriptor".to_string(),
            ));
        }
        if self.data.is_some() {
            return Err(ProtocolError::MalformedFrame(
                "message already has a data chunk".to_string(),
            ));
        }
        self.data = Some(data);
        Ok(self)
    }

    /// Append a debug chunk after any data chunk.
    pub fn add_debug_chunk(&mut self, chunk: MessageChunk) -> Result<(), ProtocolError> {
        if chunk.descriptor != ChunkDescriptor::Debug {
            return Err(ProtocolError::MalformedFrame(
                "debug chunk carries a non-debug descriptor".to_string(),
            ));
        }
        self.debug.push(chunk);
        Ok(())
    }

    pub fn envelope(&self) -> &MessageChunk {
        &self.envelope
    }

    pub fn data(&self) -> Option<&MessageChunk> {
        self.data.as_ref()
    }

    pub fn debug(&self) -> &[MessageChunk] {
        &self.debug
    }

    /// Encode the message into its on-wire byte layout.
    pub fn serialize(&self) -> Result<Vec<u8>, ProtocolError> {
        let capacity = self.envelope.wire_len()
            + self.data.as_ref().map_or(0, MessageChunk::wire_len)
            + self.debug.iter().map(MessageChunk::wire_len).sum::<usize>();
        let mut buf = Vec::with_capacity(capacity);
        self.envelope.encode_into(&mut buf)?;
        if let Some(data) = &self.data {
            data.encode_into(&mut buf)?;
        }
        for chunk in &self.debug {
            chunk.encode_into(&mut buf)?;
        }
        Ok(buf)
    }

    /// Split a wire buffer into a chunk-ordered message.
    ///
    /// Rejects empty input, trailing garbage inside chunks, a non-envelope
    /// first chunk, a second envelope or data chunk, and data arriving
    /// after debug.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let mut src = bytes;
        if src.is_empty() {
            return Err(ProtocolError::MalformedFrame("empty message".to_string()));
        }

        let first = MessageChunk::decode(&mut src)?;
        let mut message = Message::new(first)?;

        while !src.is_empty() {
            let chunk = MessageChunk::decode(&mut src)?;
            match chunk.descriptor {
                ChunkDescriptor::Envelope => {
                    return Err(ProtocolError::MalformedFrame(
                        "message carries a second envelope chunk".to_string(),
                    ));
                }
                ChunkDescriptor::Data => {
                    if !message.debug.is_empty() {
                        return Err(ProtocolError::MalformedFrame(
                            "data chunk after debug chunk".to_string(),
                        ));
                    }
                    message = message.with_data(chunk)?;
                }
                ChunkDescriptor::Debug => message.debug.push(chunk),
            }
        }

        Ok(message)
    }

    /// Decode and validate this message into a [`ParsedChunks`].
    ///
    /// The envelope is validated against the built-in envelope schema, the
    /// data chunk against the schema named by the envelope's
    /// `message_type`, and every debug chunk against the debug schema.
    pub fn parse(&self, validator: &Validator) -> Result<ParsedChunks, ProtocolError> {
        let envelope: Value = serde_json::from_slice(&self.envelope.content)
            .map_err(|e| ProtocolError::InvalidEnvelope(format!("not valid JSON: {e}")))?;
        validator
            .get(ENVELOPE_SCHEMA_NAME)?
            .validate(&envelope)
            .map_err(ProtocolError::InvalidEnvelope)?;

        let message_type = envelope
            .get("message_type")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                ProtocolError::InvalidEnvelope("missing message_type".to_string())
            })?;
        let data_schema = validator.get(message_type)?;

        let debug_schema = validator.get(DEBUG_SCHEMA_NAME)?;
        let mut debug = Vec::with_capacity(self.debug.len());
        for chunk in &self.debug {
            let value: Value = serde_json::from_slice(&chunk.content)
                .map_err(|e| ProtocolError::DataParse(format!("debug chunk: {e}")))?;
            debug_schema
                .validate(&value)
                .map_err(ProtocolError::InvalidData)?;
            debug.push(value);
        }

        match (&self.data, data_schema.content_type()) {
            (None, _) => Ok(ParsedChunks::without_data(envelope, debug)),
            (Some(chunk), ContentType::Binary) => Ok(ParsedChunks::with_binary(
                envelope,
                chunk.content.clone(),
                debug,
            )),
            (Some(chunk), ContentType::Json) => {
                let value: Value = serde_json::from_slice(&chunk.content)
                    .map_err(|e| ProtocolError::DataParse(e.to_string()))?;
                data_schema
                    .validate(&value)
                    .map_err(ProtocolError::InvalidData)?;
                Ok(ParsedChunks::with_json(envelope, value, debug))
            }
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ENVELOPE {}", self.envelope)?;
        if let Some(data) = &self.data {
            write!(f, "\nDATA {data}")?;
        }
        for chunk in &self.debug {
            write!(f, "\nDEBUG {chunk}")?;
        }
        Ok(())
    }
}

/// The validated in-memory view of an inbound message.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedChunks {
    /// Decoded envelope object.
    pub envelope: Value,
    /// Whether a data chunk was present.
    pub has_data: bool,
    /// Interpretation of the data chunk, per its message-type schema.
    pub data_type: ContentType,
    /// Decoded data object; present iff `has_data` and `data_type` is JSON.
    pub data: Option<Value>,
    /// Raw data bytes; present iff `has_data` and `data_type` is binary.
    pub binary_data: Option<Vec<u8>>,
    /// Decoded debug objects, in wire order.
    pub debug: Vec<Value>,
}

impl ParsedChunks {
    pub fn without_data(envelope: Value, debug: Vec<Value>) -> Self {
        Self {
            envelope,
            has_data: false,
            data_type: ContentType::Json,
            data: None,
            binary_data: None,
            debug,
        }
    }

    pub fn with_json(envelope: Value, data: Value, debug: Vec<Value>) -> Self {
        Self {
            envelope,
            has_data: true,
            data_type: ContentType::Json,
            data: Some(data),
            binary_data: None,
            debug,
        }
    }

    pub fn with_binary(envelope: Value, binary_data: Vec<u8>, debug: Vec<Value>) -> Self {
        Self {
            envelope,
            has_data: true,
            data_type: ContentType::Binary,
            data: None,
            binary_data: Some(binary_data),
            debug,
        }
    }

    /// The envelope's `message_type`, guaranteed present after validation.
    pub fn message_type(&self) -> &str {
        self.envelope
            .get("message_type")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }
}

impl fmt::Display for ParsedChunks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ENVELOPE: {}", self.envelope)?;
        if self.has_data {
            match self.data_type {
                ContentType::Json => {
                    if let Some(data) = &self.data {
                        write!(f, "\nDATA: {data}")?;
                    }
                }
                ContentType::Binary => {
                    let len = self.binary_data.as_ref().map_or(0, Vec::len);
                    write!(f, "\nDATA: {len} binary bytes")?;
                }
            }
        }
        for entry in &self.debug {
            write!(f, "\nDEBUG: {entry}")?;
        }
        Ok(())
    }
}
