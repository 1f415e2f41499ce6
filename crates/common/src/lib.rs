//! # Common: Call Records & Build Configuration
//!
//! Shared vocabulary between the trace reader (`lazarus`), the graph engine
//! (`anatomist`) and the `sandgraph` binary.
//!
//! **Core Types**:
//! - `Call`: one intercepted API call as delivered by the sandbox instrumentation.
//! - `Arguments`: the named argument bag of a call (fields vary per API).
//! - `RawHandle`: a normalized OS handle value (socket or registry key handle).
//! - `BuildConfig`: current-host identity, limits and derived graph views.

pub mod config;

pub use config::{BuildConfig, ConfigError, HostConfig, Limits, ViewConfig};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Errors raised when a call record lacks an argument a handler needs.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ArgumentError {
    #[error("missing argument '{0}'")]
    Missing(String),
    #[error("argument '{name}' is not {expected}")]
    WrongType { name: String, expected: &'static str },
}

/// Outcome flag of an intercepted call.
///
/// Deserializes from booleans, integer codes (`0` = failure) or the strings
/// `"success"` / `"failure"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "StatusRepr", rename_all = "lowercase")]
pub enum CallStatus {
    Success,
    Failure,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StatusRepr {
    Flag(bool),
    Code(i64),
    Text(String),
}

impl TryFrom<StatusRepr> for CallStatus {
    type Error = String;

    fn try_from(repr: StatusRepr) -> Result<Self, Self::Error> {
        match repr {
            StatusRepr::Flag(true) => Ok(CallStatus::Success),
            StatusRepr::Flag(false) => Ok(CallStatus::Failure),
            StatusRepr::Code(0) => Ok(CallStatus::Failure),
            StatusRepr::Code(_) => Ok(CallStatus::Success),
            StatusRepr::Text(s) => match s.to_ascii_lowercase().as_str() {
                "success" | "ok" | "true" => Ok(CallStatus::Success),
                "failure" | "failed" | "false" => Ok(CallStatus::Failure),
                other => Err(format!("unknown call status '{other}'")),
            },
        }
    }
}

/// A single argument value as decoded from the trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl ArgValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ArgValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            ArgValue::Int(n) => Some(*n),
            ArgValue::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    /// Interprets the value as an OS handle. Integers and strings are both
    /// accepted since instrumentation layers disagree on the encoding.
    pub fn as_handle(&self) -> Option<RawHandle> {
        match self {
            ArgValue::Int(n) => Some(RawHandle::from_int(*n)),
            ArgValue::Str(s) if !s.trim().is_empty() => Some(RawHandle::from_text(s)),
            _ => None,
        }
    }
}

impl From<i64> for ArgValue {
    fn from(n: i64) -> Self {
        ArgValue::Int(n)
    }
}

impl From<&str> for ArgValue {
    fn from(s: &str) -> Self {
        ArgValue::Str(s.to_string())
    }
}

impl From<String> for ArgValue {
    fn from(s: String) -> Self {
        ArgValue::Str(s)
    }
}

/// Normalized OS handle value.
///
/// Integers render as `0x%08x`; textual handles are trimmed and lowercased so
/// that `"0x000000A4"` and `164` name the same handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RawHandle(String);

impl RawHandle {
    pub fn from_int(n: i64) -> Self {
        RawHandle(format!("0x{:08x}", n as u64))
    }

    pub fn from_text(s: &str) -> Self {
        let s = s.trim().to_lowercase();
        match s.parse::<i64>() {
            Ok(n) => RawHandle::from_int(n),
            Err(_) => RawHandle(s),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RawHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Named argument bag of a call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Arguments(BTreeMap<String, ArgValue>);

impl Arguments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, name: &str, value: impl Into<ArgValue>) -> Self {
        self.0.insert(name.to_string(), value.into());
        self
    }

    pub fn insert(&mut self, name: &str, value: impl Into<ArgValue>) {
        self.0.insert(name.to_string(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&ArgValue> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn str(&self, name: &str) -> Result<&str, ArgumentError> {
        self.require(name)?
            .as_str()
            .ok_or_else(|| ArgumentError::WrongType {
                name: name.to_string(),
                expected: "a string",
            })
    }

    pub fn int(&self, name: &str) -> Result<i64, ArgumentError> {
        self.require(name)?
            .as_int()
            .ok_or_else(|| ArgumentError::WrongType {
                name: name.to_string(),
                expected: "an integer",
            })
    }

    pub fn handle(&self, name: &str) -> Result<RawHandle, ArgumentError> {
        self.require(name)?
            .as_handle()
            .ok_or_else(|| ArgumentError::WrongType {
                name: name.to_string(),
                expected: "a handle",
            })
    }

    /// Returns the handle stored under the first present name in `names`.
    pub fn handle_any(&self, names: &[&str]) -> Result<RawHandle, ArgumentError> {
        match names.iter().find(|n| self.contains(n)) {
            Some(name) => self.handle(name),
            None => Err(ArgumentError::Missing(names.join("|"))),
        }
    }

    fn require(&self, name: &str) -> Result<&ArgValue, ArgumentError> {
        self.0
            .get(name)
            .ok_or_else(|| ArgumentError::Missing(name.to_string()))
    }
}

/// The process that issued a call, as reported by process bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessRef {
    pub pid: u32,
    #[serde(default)]
    pub executable: String,
    #[serde(default)]
    pub command: String,
}

impl ProcessRef {
    pub fn new(pid: u32) -> Self {
        Self {
            pid,
            ..Default::default()
        }
    }
}

/// One intercepted API call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Call {
    pub name: String,
    pub status: CallStatus,
    #[serde(default)]
    pub arguments: Arguments,
    /// Decoder-supplied annotations (e.g. `reg_type` for registry values).
    #[serde(default)]
    pub flags: Arguments,
    #[serde(default)]
    pub return_value: Option<ArgValue>,
    pub process: ProcessRef,
    /// Seconds since the start of the trace.
    #[serde(default)]
    pub time: f64,
}

impl Call {
    /// Creates a successful call with no arguments.
    pub fn new(name: &str, process: ProcessRef) -> Self {
        Self {
            name: name.to_string(),
            status: CallStatus::Success,
            arguments: Arguments::new(),
            flags: Arguments::new(),
            return_value: None,
            process,
            time: 0.0,
        }
    }

    pub fn arg(mut self, name: &str, value: impl Into<ArgValue>) -> Self {
        self.arguments.insert(name, value);
        self
    }

    pub fn flag(mut self, name: &str, value: impl Into<ArgValue>) -> Self {
        self.flags.insert(name, value);
        self
    }

    pub fn returning(mut self, value: impl Into<ArgValue>) -> Self {
        self.return_value = Some(value.into());
        self
    }

    pub fn at(mut self, time: f64) -> Self {
        self.time = time;
        self
    }

    pub fn failed(mut self) -> Self {
        self.status = CallStatus::Failure;
        self
    }

    pub fn succeeded(&self) -> bool {
        self.status == CallStatus::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_from_int_codes() {
        let ok: CallStatus = serde_json::from_str("1").unwrap();
        let ko: CallStatus = serde_json::from_str("0").unwrap();
        assert_eq!(ok, CallStatus::Success);
        assert_eq!(ko, CallStatus::Failure);
    }

    #[test]
    fn test_status_from_bool_and_text() {
        let ok: CallStatus = serde_json::from_str("true").unwrap();
        let ko: CallStatus = serde_json::from_str("\"FAILURE\"").unwrap();
        assert_eq!(ok, CallStatus::Success);
        assert_eq!(ko, CallStatus::Failure);
        assert!(serde_json::from_str::<CallStatus>("\"maybe\"").is_err());
    }

    #[test]
    fn test_handle_normalization() {
        assert_eq!(RawHandle::from_int(164), RawHandle::from_text("164"));
        assert_eq!(RawHandle::from_int(164).as_str(), "0x000000a4");
        assert_eq!(RawHandle::from_text(" 0x000000A4 ").as_str(), "0x000000a4");
    }

    #[test]
    fn test_argument_accessors() {
        let args = Arguments::new()
            .with("socket", 12_i64)
            .with("ip_address", "10.0.0.1");
        assert_eq!(args.int("socket").unwrap(), 12);
        assert_eq!(args.str("ip_address").unwrap(), "10.0.0.1");
        assert_eq!(
            args.str("port"),
            Err(ArgumentError::Missing("port".to_string()))
        );
        assert!(matches!(
            args.str("socket"),
            Err(ArgumentError::WrongType { .. })
        ));
    }

    #[test]
    fn test_handle_any_prefers_first_present() {
        let args = Arguments::new().with("s", 7_i64);
        assert_eq!(
            args.handle_any(&["socket", "s"]).unwrap(),
            RawHandle::from_int(7)
        );
        assert!(Arguments::new().handle_any(&["socket", "s"]).is_err());
    }

    #[test]
    fn test_call_deserialization() {
        let json = r#"{
            "name": "bind",
            "status": 1,
            "arguments": {"socket": 300, "ip_address": "0.0.0.0", "port": 8080},
            "process": {"pid": 1234, "executable": "C:\\evil.exe"},
            "time": 1.5
        }"#;
        let call: Call = serde_json::from_str(json).unwrap();
        assert_eq!(call.name, "bind");
        assert!(call.succeeded());
        assert_eq!(call.process.pid, 1234);
        assert_eq!(call.arguments.int("port").unwrap(), 8080);
        assert!(call.flags.get("reg_type").is_none());
        assert_eq!(call.return_value, None);
    }

    #[test]
    fn test_large_numbers_fall_back_to_float() {
        let v: ArgValue = serde_json::from_str("18446744073709551615").unwrap();
        assert!(matches!(v, ArgValue::Float(_)));
        assert_eq!(v.as_handle(), None);
    }
}
