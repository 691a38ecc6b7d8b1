//! Query-related data models.
//!
//! This module defines statement parameters, write results and the untyped
//! row view produced by the scanner.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Default statement timeout in seconds.
pub const DEFAULT_STATEMENT_TIMEOUT_SECS: u64 = 30;

/// Textual placeholder for SQL NULL in a [`RowMap`].
///
/// A text column whose stored value is literally `NULL` renders the same way;
/// use the typed scanning path when that distinction matters.
pub const NULL_SENTINEL: &str = "NULL";

/// One row rendered as column name to textual value.
pub type RowMap = HashMap<String, String>;

/// A parameter value for parameterized statements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryParam {
    /// NULL value
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value (stored as i64 for maximum range)
    Int(i64),
    /// Floating point value
    Float(f64),
    /// String value
    String(String),
    /// Binary data (base64 encoded in JSON)
    #[serde(with = "base64_bytes")]
    Bytes(Vec<u8>),
}

impl QueryParam {
    /// Parse a parameter from its JSON literal form.
    ///
    /// Anything that is not valid JSON is taken as a plain string, so
    /// `--param alice` and `--param '"alice"'` mean the same thing.
    pub fn from_literal(literal: &str) -> Self {
        serde_json::from_str(literal).unwrap_or_else(|_| Self::String(literal.to_string()))
    }

    /// Check if this parameter is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the type name of this parameter for debugging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Bytes(_) => "bytes",
        }
    }
}

impl From<i64> for QueryParam {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<&str> for QueryParam {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for QueryParam {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<bool> for QueryParam {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<f64> for QueryParam {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl<T: Into<QueryParam>> From<Option<T>> for QueryParam {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Self::Null)
    }
}

/// Custom serialization for binary data as base64.
mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(bytes: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        STANDARD.encode(bytes).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

/// Outcome of a write statement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecResult {
    pub rows_affected: u64,
    /// Not reported by PostgreSQL; use `RETURNING` there.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_insert_id: Option<i64>,
}
