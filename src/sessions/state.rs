//! Opaque session state payloads.
//!
//! State values form a closed set so arbitrary keys written by agents survive a
//! snapshot → patch → replace cycle unchanged, without falling back to fully
//! dynamic typing.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::traits::SessionError;

/// Key-value state blob carried by every session.
pub type SessionState = BTreeMap<String, StateValue>;

/// A single state value.
///
/// Serialized untagged, so a state map looks like plain JSON on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StateValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<StateValue>),
    Map(BTreeMap<String, StateValue>),
}

impl StateValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[StateValue]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, StateValue>> {
        match self {
            Self::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Falsy values: `false`, zero, and empty strings/lists/maps.
    pub fn is_empty_like(&self) -> bool {
        match self {
            Self::Bool(b) => !b,
            Self::Int(i) => *i == 0,
            Self::Float(f) => *f == 0.0,
            Self::String(s) => s.is_empty(),
            Self::List(items) => items.is_empty(),
            Self::Map(map) => map.is_empty(),
        }
    }
}

impl fmt::Display for StateValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => f.write_str(s),
            other => {
                let json = serde_json::to_string(other).map_err(|_| fmt::Error)?;
                f.write_str(&json)
            }
        }
    }
}

impl From<&str> for StateValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for StateValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<bool> for StateValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for StateValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for StateValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<Vec<StateValue>> for StateValue {
    fn from(value: Vec<StateValue>) -> Self {
        Self::List(value)
    }
}

impl From<BTreeMap<String, StateValue>> for StateValue {
    fn from(value: BTreeMap<String, StateValue>) -> Self {
        Self::Map(value)
    }
}

impl TryFrom<serde_json::Value> for StateValue {
    type Error = SessionError;

    fn try_from(value: serde_json::Value) -> Result<Self, Self::Error> {
        use serde_json::Value;

        match value {
            Value::Null => Err(SessionError::InvalidValue(
                "null is not a valid state value".to_string(),
            )),
            Value::Bool(b) => Ok(Self::Bool(b)),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Self::Int(i))
                } else if let Some(f) = n.as_f64() {
                    Ok(Self::Float(f))
                } else {
                    Err(SessionError::InvalidValue(format!(
                        "number {n} does not fit a state value"
                    )))
                }
            }
            Value::String(s) => Ok(Self::String(s)),
            Value::Array(items) => items
                .into_iter()
                .map(StateValue::try_from)
                .collect::<Result<Vec<_>, _>>()
                .map(Self::List),
            Value::Object(map) => map
                .into_iter()
                .map(|(k, v)| StateValue::try_from(v).map(|v| (k, v)))
                .collect::<Result<BTreeMap<_, _>, _>>()
                .map(Self::Map),
        }
    }
}

impl From<StateValue> for serde_json::Value {
    fn from(value: StateValue) -> Self {
        use serde_json::Value;

        match value {
            StateValue::Bool(b) => Value::Bool(b),
            StateValue::Int(i) => Value::from(i),
            StateValue::Float(f) => Value::from(f),
            StateValue::String(s) => Value::String(s),
            StateValue::List(items) => Value::Array(items.into_iter().map(Value::from).collect()),
            StateValue::Map(map) => {
                Value::Object(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

/// Parse a JSON object into a session state map.
pub fn state_from_json(value: serde_json::Value) -> Result<SessionState, SessionError> {
    match StateValue::try_from(value)? {
        StateValue::Map(map) => Ok(map),
        other => Err(SessionError::InvalidValue(format!(
            "session state must be an object, got {other}"
        ))),
    }
}
