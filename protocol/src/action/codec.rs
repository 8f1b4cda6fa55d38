//! Action wire form: the canonical encoding of `[text tag, plain value]`.

use serde::{Deserialize, Serialize};

use super::ActionError;
use crate::value::{self, Value};

/// An action as it appears inside a transaction, not yet resolved to logic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionEnvelope {
    pub type_tag: String,
    #[serde(with = "value_bytes")]
    pub plain_value: Value,
}

impl ActionEnvelope {
    pub fn new(type_tag: impl Into<String>, plain_value: Value) -> Self {
        Self {
            type_tag: type_tag.into(),
            plain_value,
        }
    }

    /// `[text tag, plain value]`.
    pub fn to_value(&self) -> Value {
        Value::list([Value::Text(self.type_tag.clone()), self.plain_value.clone()])
    }

    pub fn from_value(value: &Value) -> Result<Self, ActionError> {
        let items = value.as_list().ok_or_else(|| {
            ActionError::MalformedEncoding(format!("expected a list, found {}", value.kind()))
        })?;
        match items {
            [Value::Text(tag), plain] => Ok(Self::new(tag.clone(), plain.clone())),
            [other, _] => Err(ActionError::MalformedEncoding(format!(
                "type tag must be text, found {}",
                other.kind()
            ))),
            _ => Err(ActionError::MalformedEncoding(format!(
                "expected 2 elements, found {}",
                items.len()
            ))),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        encode(&self.type_tag, &self.plain_value)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ActionError> {
        let (type_tag, plain_value) = decode(bytes)?;
        Ok(Self {
            type_tag,
            plain_value,
        })
    }
}

/// Canonical bytes of `[tag, value]`. Never fails.
pub fn encode(tag: &str, plain_value: &Value) -> Vec<u8> {
    value::encode(&Value::list([Value::from(tag), plain_value.clone()]))
}

/// Inverse of [`encode`].
pub fn decode(bytes: &[u8]) -> Result<(String, Value), ActionError> {
    let decoded = value::decode(bytes).map_err(|e| ActionError::MalformedEncoding(e.to_string()))?;
    let envelope = ActionEnvelope::from_value(&decoded)?;
    Ok((envelope.type_tag, envelope.plain_value))
}

/// bincode carries envelopes as canonical bytes so the shard and submission
/// paths never depend on serde's view of `Value`.
mod value_bytes {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use crate::value::{self, Value};

    pub fn serialize<S: Serializer>(v: &Value, s: S) -> Result<S::Ok, S::Error> {
        value::encode(v).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Value, D::Error> {
        let bytes = Vec::<u8>::deserialize(d)?;
        value::decode(&bytes).map_err(D::Error::custom)
    }
}
