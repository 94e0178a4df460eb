//! Process-wide table schema registry
//!
//! Warehouse tables record their row shape by an opaque schema identifier.
//! The registry maps identifiers to concrete shapes and is populated at
//! program initialization, before the first hydration; it can be sealed to
//! catch late registrations. Re-registering an identical shape is a no-op so
//! independent initializers may race safely.

use std::collections::HashMap;
use std::sync::OnceLock;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    pub fields: Vec<FieldSchema>,
}

impl TableSchema {
    pub fn new(fields: Vec<FieldSchema>) -> Self {
        Self { fields }
    }

    /// Check a JSON row object against this shape: required fields present,
    /// value kinds compatible. Returns the first mismatch.
    pub fn check_row(&self, row: &serde_json::Value) -> std::result::Result<(), String> {
        let object = row
            .as_object()
            .ok_or_else(|| "row is not an object".to_string())?;
        for field in &self.fields {
            match object.get(&field.name) {
                None | Some(serde_json::Value::Null) => {
                    if field.required {
                        return Err(format!("missing required field {}", field.name));
                    }
                }
                Some(value) => {
                    if !field.kind.accepts(value) {
                        return Err(format!(
                            "field {} is not a {:?}",
                            field.name, field.kind
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSchema {
    pub name: String,
    pub kind: FieldKind,
    #[serde(default)]
    pub required: bool,
}

impl FieldSchema {
    pub fn required(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    String,
    Integer,
    Float,
    Boolean,
    Timestamp,
}

impl FieldKind {
    fn accepts(&self, value: &serde_json::Value) -> bool {
        match self {
            Self::String | Self::Timestamp => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Float => value.is_number(),
            Self::Boolean => value.is_boolean(),
        }
    }
}

struct Registry {
    schemas: HashMap<String, TableSchema>,
    sealed: bool,
}

fn registry() -> &'static RwLock<Registry> {
    static REGISTRY: OnceLock<RwLock<Registry>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        RwLock::new(Registry {
            schemas: HashMap::new(),
            sealed: false,
        })
    })
}

/// Register a schema under an identifier.
///
/// Identical re-registration succeeds; a different shape under the same
/// identifier, or any new identifier after [`seal`], is a Conflict.
pub fn register_schema(identifier: impl Into<String>, schema: TableSchema) -> Result<()> {
    let identifier = identifier.into();
    let mut reg = registry().write();
    if let Some(existing) = reg.schemas.get(&identifier) {
        if *existing == schema {
            return Ok(());
        }
        return Err(DomainError::Conflict(format!(
            "schema {identifier} already registered with a different shape"
        )));
    }
    if reg.sealed {
        return Err(DomainError::Conflict(format!(
            "schema registry is sealed; late registration of {identifier}"
        )));
    }
    reg.schemas.insert(identifier, schema);
    Ok(())
}

pub fn lookup_schema(identifier: &str) -> Option<TableSchema> {
    registry().read().schemas.get(identifier).cloned()
}

pub fn is_registered(identifier: &str) -> bool {
    registry().read().schemas.contains_key(identifier)
}

/// Close the registry for new identifiers.
pub fn seal() {
    registry().write().sealed = true;
}
