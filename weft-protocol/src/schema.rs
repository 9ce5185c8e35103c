//! Named schemas and the validator registry.
//!
//! A [`Schema`] describes one message type: whether its data chunk is JSON
//! or raw bytes, and which keys a JSON content object must carry. The
//! [`Validator`] is the registry of schemas keyed by name; the envelope's
//! `message_type` field selects the schema an inbound data chunk is
//! checked against.

use alloc::collections::BTreeMap;
use alloc::format;
use alloc::string::{String, ToString};
use alloc::vec::Vec;

use serde_json::Value;

use crate::error::ProtocolError;

/// Schema name the envelope chunk of every message validates against.
pub const ENVELOPE_SCHEMA_NAME: &str = "envelope";

/// Schema name every debug chunk validates against.
pub const DEBUG_SCHEMA_NAME: &str = "debug";

/// `message_type` of the associate-session request sent on transport open.
pub const ASSOCIATE_REQ_TYPE: &str = "weft/associate_request";

/// `message_type` of the broker's associate-session response.
pub const ASSOCIATE_RESP_TYPE: &str = "weft/associate_response";

/// How the data chunk of a message type is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContentType {
    /// Data is a JSON object, schema-validated.
    #[default]
    Json,
    /// Data is an opaque byte string; JSON validation is skipped.
    Binary,
}

/// JSON value shapes a schema key can require.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    String,
    Bool,
    Number,
    Object,
    Array,
    /// An array whose elements are all strings.
    StringArray,
}

impl ValueKind {
    fn matches(self, value: &Value) -> bool {
        match self {
            ValueKind::String => value.is_string(),
            ValueKind::Bool => value.is_boolean(),
            ValueKind::Number => value.is_number(),
            ValueKind::Object => value.is_object(),
            ValueKind::Array => value.is_array(),
            ValueKind::StringArray => value
                .as_array()
                .is_some_and(|items| items.iter().all(Value::is_string)),
        }
    }

    fn describe(self) -> &'static str {
        match self {
            ValueKind::String => "a string",
            ValueKind::Bool => "a boolean",
            ValueKind::Number => "a number",
            ValueKind::Object => "an object",
            ValueKind::Array => "an array",
            ValueKind::StringArray => "an array of strings",
        }
    }
}

/// A named validator for one message type.
#[derive(Debug, Clone)]
pub struct Schema {
    name: String,
    content_type: ContentType,
    required: Vec<(String, ValueKind)>,
    optional: Vec<(String, ValueKind)>,
}

impl Schema {
    pub fn new(name: impl Into<String>, content_type: ContentType) -> Self {
        Self {
            name: name.into(),
            content_type,
            required: Vec::new(),
            optional: Vec::new(),
        }
    }

    /// Require `key` to be present with the given shape.
    pub fn required(mut self, key: impl Into<String>, kind: ValueKind) -> Self {
        self.required.push((key.into(), kind));
        self
    }

    /// Allow `key` with the given shape; absent keys pass.
    pub fn optional(mut self, key: impl Into<String>, kind: ValueKind) -> Self {
        self.optional.push((key.into(), kind));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn content_type(&self) -> ContentType {
        self.content_type
    }

    /// Check `value` against this schema's key requirements.
    ///
    /// Keys not named by the schema are permitted; the check is shape-wise,
    /// not exhaustive.
    pub fn validate(&self, value: &Value) -> Result<(), String> {
        let object = value
            .as_object()
            .ok_or_else(|| format!("'{}' content must be a JSON object", self.name))?;

        for (key, kind) in &self.required {
            match object.get(key.as_str()) {
                None => return Err(format!("missing required key '{key}'")),
                Some(v) if !kind.matches(v) => {
                    return Err(format!("key '{key}' must be {}", kind.describe()));
                }
                Some(_) => {}
            }
        }

        for (key, kind) in &self.optional {
            if let Some(v) = object.get(key.as_str()) {
                if !kind.matches(v) {
                    return Err(format!("key '{key}' must be {}", kind.describe()));
                }
            }
        }

        Ok(())
    }
}

/// The envelope schema every message's first chunk validates against.
pub fn envelope_schema() -> Schema {
    Schema::new(ENVELOPE_SCHEMA_NAME, ContentType::Json)
        .required("id", ValueKind::String)
        .required("message_type", ValueKind::String)
        .required("targets", ValueKind::StringArray)
        .required("expires", ValueKind::String)
        .required("sender", ValueKind::String)
        .optional("destination_report", ValueKind::Bool)
}

/// The schema every debug chunk validates against: any JSON object.
pub fn debug_schema() -> Schema {
    Schema::new(DEBUG_SCHEMA_NAME, ContentType::Json)
}

/// Data schema of the broker's associate-session response.
pub fn associate_response_schema() -> Schema {
    Schema::new(ASSOCIATE_RESP_TYPE, ContentType::Json)
        .required("id", ValueKind::String)
        .required("success", ValueKind::Bool)
        .optional("reason", ValueKind::String)
}

/// Registry of schemas keyed by name.
#[derive(Debug, Clone, Default)]
pub struct Validator {
    schemas: BTreeMap<String, Schema>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a schema under its name.
    ///
    /// Name collisions are rejected; the first registration wins.
    pub fn register(&mut self, schema: Schema) -> Result<(), ProtocolError> {
        if self.schemas.contains_key(schema.name()) {
            return Err(ProtocolError::DuplicateSchema(schema.name().to_string()));
        }
        self.schemas.insert(schema.name().to_string(), schema);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.schemas.contains_key(name)
    }

    /// Look up the schema registered under `name`.
    pub fn get(&self, name: &str) -> Result<&Schema, ProtocolError> {
        self.schemas
            .get(name)
            .ok_or_else(|| ProtocolError::UnknownSchema(name.to_string()))
    }
}
