//! Interface-management payload.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::trace::TraceContext;

/// A wire value that does not name a known variant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {what} {value:?}")]
pub struct UnknownValue {
    pub what: &'static str,
    pub value: String,
}

/// Operation requested on an interface record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceOperation {
    Get,
    Set,
    Delete,
}

impl InterfaceOperation {
    pub const ALL: [InterfaceOperation; 3] = [Self::Get, Self::Set, Self::Delete];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::Set => "set",
            Self::Delete => "delete",
        }
    }
}

impl FromStr for InterfaceOperation {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| UnknownValue {
                what: "interface operation",
                value: s.to_string(),
            })
    }
}

impl fmt::Display for InterfaceOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operational status of an interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceStatus {
    #[default]
    Up,
    Down,
    Error,
}

impl InterfaceStatus {
    pub const ALL: [InterfaceStatus; 3] = [Self::Up, Self::Down, Self::Error];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
            Self::Error => "error",
        }
    }
}

impl FromStr for InterfaceStatus {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownValue {
                what: "interface status",
                value: s.to_string(),
            })
    }
}

impl fmt::Display for InterfaceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Interface state carried alongside a trace context.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InterfaceRecord {
    pub name: String,
    pub operation: InterfaceOperation,
    pub status: InterfaceStatus,
    pub trace: TraceContext,
}

impl InterfaceRecord {
    /// A `get` for `name` with the default `up` status.
    pub fn get(name: impl Into<String>, trace: TraceContext) -> Self {
        Self {
            name: name.into(),
            operation: InterfaceOperation::Get,
            status: InterfaceStatus::default(),
            trace,
        }
    }

    /// A `set` of `name` to `status`.
    pub fn set(name: impl Into<String>, status: InterfaceStatus, trace: TraceContext) -> Self {
        Self {
            name: name.into(),
            operation: InterfaceOperation::Set,
            status,
            trace,
        }
    }
}
