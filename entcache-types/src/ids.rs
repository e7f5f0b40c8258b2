//! Identity key types.
//!
//! Every cached entity is named by a single scalar key. The scalar kind is
//! fixed per entity type (declared on its identity property), so incoming
//! JSON is parsed against the declared [`KeyKind`] rather than guessed.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// The scalar kind an entity type uses for its identity key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyKind {
    /// 64-bit signed integer (database sequence keys).
    #[default]
    Int,
    /// UUID, usually v7 for locally generated keys.
    Uuid,
    /// Opaque string key.
    Text,
}

/// The identity key of an entity instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityKey {
    Int(i64),
    Uuid(Uuid),
    Text(String),
}

impl EntityKey {
    /// Creates a new time-ordered UUID key.
    #[must_use]
    pub fn new_uuid() -> Self {
        Self::Uuid(Uuid::now_v7())
    }

    /// Returns the kind of this key.
    #[must_use]
    pub const fn kind(&self) -> KeyKind {
        match self {
            Self::Int(_) => KeyKind::Int,
            Self::Uuid(_) => KeyKind::Uuid,
            Self::Text(_) => KeyKind::Text,
        }
    }

    /// Parses a key of the given kind from a JSON scalar.
    ///
    /// Integer keys also accept their decimal string form, since some
    /// servers quote 64-bit integers to survive JavaScript clients.
    pub fn from_json(kind: KeyKind, value: &serde_json::Value) -> Result<Self> {
        match (kind, value) {
            (KeyKind::Int, serde_json::Value::Number(n)) => n
                .as_i64()
                .map(Self::Int)
                .ok_or_else(|| Error::InvalidKey(format!("{n} is not a 64-bit integer"))),
            (KeyKind::Int, serde_json::Value::String(s)) => s
                .parse::<i64>()
                .map(Self::Int)
                .map_err(|_| Error::InvalidKey(format!("{s:?} is not an integer key"))),
            (KeyKind::Uuid, serde_json::Value::String(s)) => Ok(Self::Uuid(Uuid::parse_str(s)?)),
            (KeyKind::Text, serde_json::Value::String(s)) => Ok(Self::Text(s.clone())),
            (KeyKind::Text, serde_json::Value::Number(n)) => Ok(Self::Text(n.to_string())),
            (kind, other) => Err(Error::InvalidKey(format!(
                "expected {kind:?} key, found {other}"
            ))),
        }
    }

    /// Parses a key of the given kind from its textual form (headers, URLs).
    pub fn parse(kind: KeyKind, s: &str) -> Result<Self> {
        match kind {
            KeyKind::Int => s
                .parse::<i64>()
                .map(Self::Int)
                .map_err(|_| Error::InvalidKey(format!("{s:?} is not an integer key"))),
            KeyKind::Uuid => Ok(Self::Uuid(Uuid::parse_str(s)?)),
            KeyKind::Text => Ok(Self::Text(s.to_string())),
        }
    }

    /// Returns the JSON scalar for this key.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Int(v) => serde_json::Value::from(*v),
            Self::Uuid(v) => serde_json::Value::String(v.to_string()),
            Self::Text(v) => serde_json::Value::String(v.clone()),
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Uuid(v) => write!(f, "{v}"),
            Self::Text(v) => f.write_str(v),
        }
    }
}

impl From<i64> for EntityKey {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for EntityKey {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<Uuid> for EntityKey {
    fn from(value: Uuid) -> Self {
        Self::Uuid(value)
    }
}

impl From<&str> for EntityKey {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for EntityKey {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl FromStr for KeyKind {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "int" | "integer" | "long" => Ok(Self::Int),
            "uuid" | "guid" => Ok(Self::Uuid),
            "text" | "string" => Ok(Self::Text),
            other => Err(Error::InvalidKey(format!("unknown key kind {other:?}"))),
        }
    }
}
