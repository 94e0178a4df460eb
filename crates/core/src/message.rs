//! Runtime message model and wire record
//!
//! A [`Message`] is what flows through a pipeline: opaque payload bytes plus
//! transport attributes and an additive enrichment map. The wire form for
//! publish sinks is [`MessageData`]; attributes are carried as transport
//! metadata, never inside the record. The payload of a message must never be
//! a serialized [`MessageData`] itself; producers enforce this through
//! [`MessageData::from_message`].

use std::collections::{BTreeMap, HashMap};

use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{DomainError, Result};

/// A single in-flight pipeline message.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: String,
    pub payload: Vec<u8>,
    pub publish_time: DateTime<Utc>,
    pub attributes: HashMap<String, String>,
    /// Additive enrichment; never replaces the payload.
    pub enrichment: BTreeMap<String, EnrichmentValue>,
}

impl Message {
    pub fn new(payload: Vec<u8>, attributes: HashMap<String, String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            payload,
            publish_time: Utc::now(),
            attributes,
            enrichment: BTreeMap::new(),
        }
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn enrich(&mut self, key: impl Into<String>, value: impl Into<EnrichmentValue>) {
        self.enrichment.insert(key.into(), value.into());
    }
}

/// Closed value type for the enrichment map.
///
/// The wire contract stays a string-keyed map of plain JSON scalars; the
/// in-memory representation is this tagged union.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EnrichmentValue {
    Str(String),
    I64(i64),
    F64(f64),
    Bool(bool),
}

impl EnrichmentValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for EnrichmentValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for EnrichmentValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<i64> for EnrichmentValue {
    fn from(v: i64) -> Self {
        Self::I64(v)
    }
}

impl From<f64> for EnrichmentValue {
    fn from(v: f64) -> Self {
        Self::F64(v)
    }
}

impl From<bool> for EnrichmentValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

/// The structured record publish sinks put on the wire.
///
/// Payload bytes are base64-encoded in JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageData {
    pub id: String,
    #[serde(with = "base64_bytes")]
    pub payload: Vec<u8>,
    pub publish_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub enrichment_data: BTreeMap<String, EnrichmentValue>,
}

impl MessageData {
    /// Build the wire record for a message.
    ///
    /// Fails with a Processing error if the payload already parses as a
    /// serialized record: re-wrapping is forbidden.
    pub fn from_message(msg: &Message) -> Result<Self> {
        if is_wrapped(&msg.payload) {
            return Err(DomainError::Processing(format!(
                "message {} payload is already a serialized message record",
                msg.id
            )));
        }
        Ok(Self {
            id: msg.id.clone(),
            payload: msg.payload.clone(),
            publish_time: msg.publish_time,
            enrichment_data: msg.enrichment.clone(),
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| DomainError::Processing(format!("failed to serialize message record: {e}")))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| DomainError::Processing(format!("failed to parse message record: {e}")))
    }

    /// Reconstruct a runtime message; attributes come from the transport.
    pub fn into_message(self, attributes: HashMap<String, String>) -> Message {
        Message {
            id: self.id,
            payload: self.payload,
            publish_time: self.publish_time,
            attributes,
            enrichment: self.enrichment_data,
        }
    }
}

/// Whether a payload already is a serialized [`MessageData`].
pub fn is_wrapped(payload: &[u8]) -> bool {
    serde_json::from_slice::<MessageData>(payload).is_ok()
}

mod base64_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    use super::BASE64;
    use base64::Engine as _;

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        BASE64.decode(encoded).map_err(serde::de::Error::custom)
    }
}
