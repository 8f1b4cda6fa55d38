//! Type tag → loader lookup.

use std::collections::BTreeMap;
use tracing::debug;

use super::codec::ActionEnvelope;
use super::{Action, ActionError};
use crate::value::Value;

/// Rebuilds an action from its plain value.
pub type ActionLoader = fn(&Value) -> Result<Box<dyn Action>, ActionError>;

/// Known action kinds. Built once at startup and shared read-only.
#[derive(Debug, Clone, Default)]
pub struct ActionRegistry {
    loaders: BTreeMap<String, ActionLoader>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `loader` under `tag`, replacing any earlier registration.
    pub fn register(&mut self, tag: impl Into<String>, loader: ActionLoader) -> &mut Self {
        let tag = tag.into();
        debug!(%tag, "action type registered");
        self.loaders.insert(tag, loader);
        self
    }

    pub fn lookup(&self, tag: &str) -> Option<ActionLoader> {
        self.loaders.get(tag).copied()
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.loaders.contains_key(tag)
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.loaders.keys().map(String::as_str)
    }

    /// Resolve an envelope to executable logic.
    pub fn load(&self, envelope: &ActionEnvelope) -> Result<Box<dyn Action>, ActionError> {
        let loader = self
            .lookup(&envelope.type_tag)
            .ok_or_else(|| ActionError::UnknownActionType(envelope.type_tag.clone()))?;
        loader(&envelope.plain_value)
    }

    /// Decode canonical action bytes and resolve them.
    pub fn decode(&self, bytes: &[u8]) -> Result<Box<dyn Action>, ActionError> {
        self.load(&ActionEnvelope::decode(bytes)?)
    }
}
