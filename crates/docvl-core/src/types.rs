use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::traits::{JsonDocument, SelfDescribing};

/// JSON-safe mapping produced for each raw inference unit. This is the only
/// artifact that crosses the service boundary.
pub type NormalizedResult = serde_json::Map<String, Value>;

/// One opaque per-page/segment result object from a prediction call.
///
/// The capability check happens once, when the unit is built: either the
/// unit can describe itself, or it is handed over as a structural value
/// that needs generic traversal.
pub enum RawUnit {
    SelfDescribing(Box<dyn SelfDescribing>),
    Opaque(OpaqueValue),
}

impl RawUnit {
    pub fn self_describing(unit: impl SelfDescribing + 'static) -> Self {
        RawUnit::SelfDescribing(Box::new(unit))
    }

    /// Classify a decoded JSON document. Objects describe themselves,
    /// anything else goes through the structural fallback.
    pub fn from_json(source: impl Into<String>, value: Value) -> Self {
        match value {
            Value::Object(body) => RawUnit::self_describing(JsonDocument {
                source: source.into(),
                body,
            }),
            other => RawUnit::Opaque(OpaqueValue::from(other)),
        }
    }

    /// Type name reported in logs.
    pub fn type_name(&self) -> &str {
        match self {
            RawUnit::SelfDescribing(unit) => unit.type_name(),
            RawUnit::Opaque(value) => value.type_name(),
        }
    }
}

impl fmt::Debug for RawUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawUnit::SelfDescribing(unit) => {
                f.debug_tuple("SelfDescribing").field(&unit.type_name()).finish()
            }
            RawUnit::Opaque(value) => f.debug_tuple("Opaque").field(value).finish(),
        }
    }
}

/// A value the structural visitor does not recognize. It may still know
/// how to encode itself as JSON; otherwise its description is used.
pub trait ForeignValue: fmt::Debug + Send + Sync {
    fn type_name(&self) -> &str;

    fn encode_json(&self) -> Option<Value>;

    fn describe(&self) -> String;
}

/// Closed set of shapes understood by the structural fallback.
#[derive(Debug, Clone)]
pub enum OpaqueValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Sequence(Vec<OpaqueValue>),
    Mapping(Vec<(String, OpaqueValue)>),
    /// An object exposing named attributes.
    Object {
        type_name: String,
        attributes: Vec<(String, OpaqueValue)>,
    },
    /// Executable behavior. Never serialized.
    Callable { name: String },
    Foreign(Arc<dyn ForeignValue>),
}

impl OpaqueValue {
    pub fn object<K: Into<String>>(
        type_name: impl Into<String>,
        attributes: impl IntoIterator<Item = (K, OpaqueValue)>,
    ) -> Self {
        OpaqueValue::Object {
            type_name: type_name.into(),
            attributes: attributes
                .into_iter()
                .map(|(k, v)| (k.into(), v))
                .collect(),
        }
    }

    pub fn callable(name: impl Into<String>) -> Self {
        OpaqueValue::Callable { name: name.into() }
    }

    pub fn is_callable(&self) -> bool {
        matches!(self, OpaqueValue::Callable { .. })
    }

    pub fn type_name(&self) -> &str {
        match self {
            OpaqueValue::Null => "null",
            OpaqueValue::Bool(_) => "bool",
            OpaqueValue::Int(_) => "int",
            OpaqueValue::Float(_) => "float",
            OpaqueValue::Str(_) => "str",
            OpaqueValue::Sequence(_) => "sequence",
            OpaqueValue::Mapping(_) => "mapping",
            OpaqueValue::Object { type_name, .. } => type_name,
            OpaqueValue::Callable { .. } => "callable",
            OpaqueValue::Foreign(value) => value.type_name(),
        }
    }
}

impl From<Value> for OpaqueValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => OpaqueValue::Null,
            Value::Bool(b) => OpaqueValue::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => OpaqueValue::Int(i),
                None => OpaqueValue::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => OpaqueValue::Str(s),
            Value::Array(items) => {
                OpaqueValue::Sequence(items.into_iter().map(OpaqueValue::from).collect())
            }
            Value::Object(map) => OpaqueValue::Mapping(
                map.into_iter()
                    .map(|(k, v)| (k, OpaqueValue::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<&str> for OpaqueValue {
    fn from(s: &str) -> Self {
        OpaqueValue::Str(s.to_string())
    }
}

impl From<String> for OpaqueValue {
    fn from(s: String) -> Self {
        OpaqueValue::Str(s)
    }
}

impl From<i64> for OpaqueValue {
    fn from(i: i64) -> Self {
        OpaqueValue::Int(i)
    }
}

impl From<f64> for OpaqueValue {
    fn from(f: f64) -> Self {
        OpaqueValue::Float(f)
    }
}

impl From<bool> for OpaqueValue {
    fn from(b: bool) -> Self {
        OpaqueValue::Bool(b)
    }
}

impl<T: Into<OpaqueValue>> From<Vec<T>> for OpaqueValue {
    fn from(items: Vec<T>) -> Self {
        OpaqueValue::Sequence(items.into_iter().map(Into::into).collect())
    }
}

/// Readiness record derived from the lifecycle manager. Reading it never
/// triggers construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub initialized: bool,
    pub gpu_enabled: bool,
    pub device: String,
}
