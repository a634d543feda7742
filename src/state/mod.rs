//! State Module
//!
//! The emulated device's data points.
//!
//! ## Responsibilities
//! - Typed data-point keys and scalar values
//! - Single-writer access to the whole map
//! - Atomic batch updates for control requests
//!
//! ## Data Structure Choice
//! BTreeMap wrapped in RwLock:
//! - Sorted keys give a deterministic JSON encoding
//! - One write lock per batch keeps control updates all-or-nothing

mod store;

pub use store::DeviceStore;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Number;

/// Map of data points, as carried in the `dps` field
pub type Dps = BTreeMap<DpKey, DpValue>;

/// Identifier of a data point
///
/// Tuya encodes dp ids as JSON object keys, so numeric ids are stored in
/// their decimal string form.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DpKey(String);

impl DpKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DpKey {
    fn from(s: &str) -> Self {
        DpKey(s.to_string())
    }
}

impl From<String> for DpKey {
    fn from(s: String) -> Self {
        DpKey(s)
    }
}

impl From<u32> for DpKey {
    fn from(n: u32) -> Self {
        DpKey(n.to_string())
    }
}

impl fmt::Display for DpKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Scalar value of a data point
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DpValue {
    Bool(bool),
    Number(Number),
    Text(String),
}

impl DpValue {
    /// Parse a value the way a user would type it on a command line
    pub fn parse_loose(s: &str) -> Self {
        match s {
            "true" => DpValue::Bool(true),
            "false" => DpValue::Bool(false),
            _ => match serde_json::from_str::<Number>(s) {
                Ok(n) => DpValue::Number(n),
                Err(_) => DpValue::Text(s.to_string()),
            },
        }
    }
}

impl From<bool> for DpValue {
    fn from(b: bool) -> Self {
        DpValue::Bool(b)
    }
}

impl From<i64> for DpValue {
    fn from(n: i64) -> Self {
        DpValue::Number(n.into())
    }
}

impl From<i32> for DpValue {
    fn from(n: i32) -> Self {
        DpValue::Number(n.into())
    }
}

impl From<u32> for DpValue {
    fn from(n: u32) -> Self {
        DpValue::Number(n.into())
    }
}

impl From<&str> for DpValue {
    fn from(s: &str) -> Self {
        DpValue::Text(s.to_string())
    }
}

impl From<String> for DpValue {
    fn from(s: String) -> Self {
        DpValue::Text(s)
    }
}

impl fmt::Display for DpValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DpValue::Bool(b) => write!(f, "{}", b),
            DpValue::Number(n) => write!(f, "{}", n),
            DpValue::Text(s) => write!(f, "{:?}", s),
        }
    }
}
