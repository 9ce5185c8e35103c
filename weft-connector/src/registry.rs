//! Message-type dispatch registry.
//!
//! Maps an envelope `message_type` to a user handler and keeps the owned
//! [`Validator`] in step: registering a handler registers its schema. The
//! envelope and debug schemas every connector needs are installed at
//! construction.

use std::collections::HashMap;
use std::sync::Arc;

use weft_protocol::{debug_schema, envelope_schema, ParsedChunks, Schema, Validator};

/// A registered message handler.
///
/// Handlers run synchronously on the thread driving transport reads; a
/// long-running handler delays delivery of subsequent messages on the same
/// connection.
pub type MessageHandler = Arc<dyn Fn(&ParsedChunks) + Send + Sync>;

/// Registry binding schema names to handlers.
pub struct CallbackRegistry {
    validator: Validator,
    handlers: HashMap<String, MessageHandler>,
}

impl CallbackRegistry {
    /// Create a registry with the built-in envelope and debug schemas.
    pub fn new() -> Self {
        let mut validator = Validator::new();
        // A fresh validator cannot collide on the built-ins.
        let _ = validator.register(envelope_schema());
        let _ = validator.register(debug_schema());
        Self {
            validator,
            handlers: HashMap::new(),
        }
    }

    /// Register `handler` for messages of `schema`'s type.
    ///
    /// The schema is stored on first sight; re-registering the same name
    /// replaces the handler only (last write wins).
    pub fn register(&mut self, schema: Schema, handler: MessageHandler) {
        let name = schema.name().to_string();
        if !self.validator.contains(&name) {
            let _ = self.validator.register(schema);
        }
        self.handlers.insert(name, handler);
    }

    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    /// Clone out the handler registered under `name`, if any.
    pub fn handler(&self, name: &str) -> Option<MessageHandler> {
        self.handlers.get(name).cloned()
    }
}

impl Default for CallbackRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use weft_protocol::ContentType;

    #[test]
    fn builtin_schemas_are_present() {
        let registry = CallbackRegistry::new();
        assert!(registry.validator().contains("envelope"));
        assert!(registry.validator().contains("debug"));
    }

    #[test]
    fn handler_lookup_is_exact() {
        let mut registry = CallbackRegistry::new();
        registry.register(
            Schema::new("example/type", ContentType::Json),
            Arc::new(|_| {}),
        );
        assert!(registry.handler("example/type").is_some());
        assert!(registry.handler("example/typ").is_none());
        assert!(registry.handler("example/type2").is_none());
    }

    #[test]
    fn re_registration_replaces_the_handler() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut registry = CallbackRegistry::new();

        registry.register(
            Schema::new("example/type", ContentType::Json),
            Arc::new(|_| panic!("stale handler invoked")),
        );
        let captured = counter.clone();
        registry.register(
            Schema::new("example/type", ContentType::Json),
            Arc::new(move |_| {
                captured.fetch_add(1, Ordering::SeqCst);
            }),
        );

        let parsed = ParsedChunks::without_data(serde_json::json!({}), Vec::new());
        registry.handler("example/type").unwrap()(&parsed);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
