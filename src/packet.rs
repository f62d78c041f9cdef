//! Packet envelope exchanged with the provider.
//!
//! A packet is a command name plus a positional list of typed arguments.
//! Requests, replies and push events all share this shape; the transport
//! decides how it travels.

use serde::{Deserialize, Serialize};

use crate::error::{Result, ViewerError};

/// One positional packet argument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Integer argument.
    Int(i64),
    /// Floating point argument.
    Double(f64),
    /// String argument.
    Str(String),
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

/// A command-tagged packet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Packet {
    /// Command name, e.g. `"new"` or `"widget_updated"`.
    pub command: String,
    /// Positional arguments.
    #[serde(default)]
    pub args: Vec<Value>,
}

impl Packet {
    /// Create a packet with no arguments.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
        }
    }

    /// Append an argument (builder style).
    #[must_use]
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    /// Number of arguments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.args.len()
    }

    /// Whether the packet has no arguments.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    /// String argument at `idx`.
    pub fn str(&self, idx: usize) -> Result<&str> {
        match self.args.get(idx) {
            Some(Value::Str(s)) => Ok(s),
            other => Err(self.bad_arg(idx, "string", other)),
        }
    }

    /// Integer argument at `idx`.
    pub fn int(&self, idx: usize) -> Result<i64> {
        match self.args.get(idx) {
            Some(Value::Int(v)) => Ok(*v),
            other => Err(self.bad_arg(idx, "int", other)),
        }
    }

    /// Integer argument at `idx`, narrowed to `i32`.
    pub fn int32(&self, idx: usize) -> Result<i32> {
        let v = self.int(idx)?;
        i32::try_from(v)
            .ok()
            .ok_or_else(|| self.bad_arg(idx, "i32", self.args.get(idx)))
    }

    /// Floating point argument at `idx`. Integers are widened.
    pub fn double(&self, idx: usize) -> Result<f64> {
        match self.args.get(idx) {
            Some(Value::Double(v)) => Ok(*v),
            Some(Value::Int(v)) => Ok(*v as f64),
            other => Err(self.bad_arg(idx, "double", other)),
        }
    }

    /// Leading status argument of a reply packet.
    pub fn status(&self) -> Result<i32> {
        self.int32(0)
    }

    fn bad_arg(&self, idx: usize, want: &str, got: Option<&Value>) -> ViewerError {
        log::warn!(
            "[Packet] '{}' arg {}: expected {}, got {:?}",
            self.command,
            idx,
            want,
            got
        );
        ViewerError::Fault
    }
}
