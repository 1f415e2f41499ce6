//! Registry value model.
//!
//! `RegData` pairs each registry value type with the only runtime shape it
//! accepts, so a KeyEntry can never hold a value that disagrees with its type.
//! Construction goes through [`RegData::typed`] (already-shaped values) or
//! [`RegData::ingest`] (raw decoder output), both of which reject mismatches
//! with a [`TypeContractError`].

use std::fmt;
use std::str::FromStr;

/// A value/type disagreement. Raised only when a decoder hands over data that
/// contradicts the declared registry type.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TypeContractError {
    #[error("Not a valid type for registry key: '{0}'")]
    UnknownType(String),
    #[error("Expected {expected} for key entry of type '{reg_type}'")]
    Mismatch {
        reg_type: RegType,
        expected: &'static str,
    },
    #[error("Expected empty string for key entry of type 'REG_NONE', got {0:?}")]
    NonEmptyNone(String),
}

/// Closed set of registry value types.
///
/// `REG_DWORD` and `REG_DWORD_LITTLE_ENDIAN` (resp. `REG_QWORD` and
/// `REG_QWORD_LITTLE_ENDIAN`) are the same type and parse to the same variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegType {
    Binary,
    Dword,
    DwordBigEndian,
    Qword,
    None,
    ExpandSz,
    Link,
    MultiSz,
    Sz,
}

impl RegType {
    pub fn name(&self) -> &'static str {
        match self {
            RegType::Binary => "REG_BINARY",
            RegType::Dword => "REG_DWORD",
            RegType::DwordBigEndian => "REG_DWORD_BIG_ENDIAN",
            RegType::Qword => "REG_QWORD",
            RegType::None => "REG_NONE",
            RegType::ExpandSz => "REG_EXPAND_SZ",
            RegType::Link => "REG_LINK",
            RegType::MultiSz => "REG_MULTI_SZ",
            RegType::Sz => "REG_SZ",
        }
    }

    /// Plain and multi-string types: the ones whose values may name files.
    pub fn is_textual(&self) -> bool {
        matches!(self, RegType::Sz | RegType::MultiSz)
    }
}

impl fmt::Display for RegType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RegType {
    type Err = TypeContractError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "REG_BINARY" => Ok(RegType::Binary),
            "REG_DWORD" | "REG_DWORD_LITTLE_ENDIAN" => Ok(RegType::Dword),
            "REG_DWORD_BIG_ENDIAN" => Ok(RegType::DwordBigEndian),
            "REG_QWORD" | "REG_QWORD_LITTLE_ENDIAN" => Ok(RegType::Qword),
            "REG_NONE" => Ok(RegType::None),
            "REG_EXPAND_SZ" => Ok(RegType::ExpandSz),
            "REG_LINK" => Ok(RegType::Link),
            "REG_MULTI_SZ" => Ok(RegType::MultiSz),
            "REG_SZ" => Ok(RegType::Sz),
            _ => Err(TypeContractError::UnknownType(s.to_string())),
        }
    }
}

/// Runtime shape of a value before it is bound to a registry type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegValue {
    Absent,
    Bytes(Vec<u8>),
    Integer(i64),
    Text(String),
    TextList(Vec<String>),
}

/// Typed registry data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegData {
    None,
    Binary(Vec<u8>),
    Dword(u32),
    DwordBigEndian(u32),
    Qword(u64),
    ExpandSz(String),
    Link(String),
    MultiSz(Vec<String>),
    Sz(String),
}

impl Default for RegData {
    fn default() -> Self {
        RegData::None
    }
}

impl RegData {
    pub fn reg_type(&self) -> RegType {
        match self {
            RegData::None => RegType::None,
            RegData::Binary(_) => RegType::Binary,
            RegData::Dword(_) => RegType::Dword,
            RegData::DwordBigEndian(_) => RegType::DwordBigEndian,
            RegData::Qword(_) => RegType::Qword,
            RegData::ExpandSz(_) => RegType::ExpandSz,
            RegData::Link(_) => RegType::Link,
            RegData::MultiSz(_) => RegType::MultiSz,
            RegData::Sz(_) => RegType::Sz,
        }
    }

    /// Zero value of a type. `REG_NONE` is always absent.
    pub fn empty(reg_type: RegType) -> Self {
        match reg_type {
            RegType::None => RegData::None,
            RegType::Binary => RegData::Binary(Vec::new()),
            RegType::Dword => RegData::Dword(0),
            RegType::DwordBigEndian => RegData::DwordBigEndian(0),
            RegType::Qword => RegData::Qword(0),
            RegType::ExpandSz => RegData::ExpandSz(String::new()),
            RegType::Link => RegData::Link(String::new()),
            RegType::MultiSz => RegData::MultiSz(Vec::new()),
            RegType::Sz => RegData::Sz(String::new()),
        }
    }

    /// Binds an already-shaped value to `reg_type`.
    pub fn typed(reg_type: RegType, value: RegValue) -> Result<Self, TypeContractError> {
        let mismatch = |expected| TypeContractError::Mismatch { reg_type, expected };
        match (reg_type, value) {
            (RegType::None, RegValue::Absent) => Ok(RegData::None),
            (RegType::None, _) => Err(mismatch("no value")),
            (RegType::Binary, RegValue::Bytes(b)) => Ok(RegData::Binary(b)),
            (RegType::Binary, _) => Err(mismatch("bytes")),
            (RegType::Dword, RegValue::Integer(n)) => Ok(RegData::Dword(to_dword(reg_type, n)?)),
            (RegType::DwordBigEndian, RegValue::Integer(n)) => {
                Ok(RegData::DwordBigEndian(to_dword(reg_type, n)?))
            }
            (RegType::Qword, RegValue::Integer(n)) => Ok(RegData::Qword(n as u64)),
            (RegType::Dword | RegType::DwordBigEndian | RegType::Qword, _) => Err(mismatch("int")),
            (RegType::ExpandSz, RegValue::Text(s)) => Ok(RegData::ExpandSz(s)),
            (RegType::Link, RegValue::Text(s)) => Ok(RegData::Link(s)),
            (RegType::Sz, RegValue::Text(s)) => Ok(RegData::Sz(s)),
            (RegType::ExpandSz | RegType::Link | RegType::Sz, _) => Err(mismatch("str")),
            (RegType::MultiSz, RegValue::TextList(l)) => Ok(RegData::MultiSz(l)),
            (RegType::MultiSz, _) => Err(mismatch("list")),
        }
    }

    /// Type-directed ingestion of a raw decoder value.
    ///
    /// Decoders report every non-numeric value as a string: plain, expandable
    /// and link strings are copied, multi-strings are split on NUL (one
    /// trailing NUL terminator dropped first), binary data is the string's
    /// UTF-8 bytes and `REG_NONE` accepts only the empty string.
    pub fn ingest(reg_type: RegType, raw: RegValue) -> Result<Self, TypeContractError> {
        match (reg_type, raw) {
            (RegType::Binary, RegValue::Text(s)) => Ok(RegData::Binary(s.into_bytes())),
            (RegType::MultiSz, RegValue::Text(s)) => {
                let body = s.strip_suffix('\0').unwrap_or(&s);
                Ok(RegData::MultiSz(body.split('\0').map(str::to_string).collect()))
            }
            (RegType::None, RegValue::Text(s)) if s.is_empty() => Ok(RegData::None),
            (RegType::None, RegValue::Text(s)) => Err(TypeContractError::NonEmptyNone(s)),
            (reg_type, raw @ (RegValue::Text(_) | RegValue::Integer(_) | RegValue::Absent)) => {
                Self::typed(reg_type, raw)
            }
            (reg_type, _) => Err(TypeContractError::Mismatch {
                reg_type,
                expected: "str or int",
            }),
        }
    }

    /// The runtime shape of this data.
    pub fn value(&self) -> RegValue {
        match self {
            RegData::None => RegValue::Absent,
            RegData::Binary(b) => RegValue::Bytes(b.clone()),
            RegData::Dword(n) | RegData::DwordBigEndian(n) => RegValue::Integer(*n as i64),
            RegData::Qword(n) => RegValue::Integer(*n as i64),
            RegData::ExpandSz(s) | RegData::Link(s) | RegData::Sz(s) => RegValue::Text(s.clone()),
            RegData::MultiSz(l) => RegValue::TextList(l.clone()),
        }
    }

    /// Every string carried by the data (empty for binary and numeric types).
    pub fn strings(&self) -> Vec<&str> {
        match self {
            RegData::ExpandSz(s) | RegData::Link(s) | RegData::Sz(s) => vec![s.as_str()],
            RegData::MultiSz(l) => l.iter().map(String::as_str).collect(),
            _ => Vec::new(),
        }
    }
}

/// Accepts both unsigned and sign-extended 32-bit encodings.
fn to_dword(reg_type: RegType, n: i64) -> Result<u32, TypeContractError> {
    u32::try_from(n)
        .or_else(|_| i32::try_from(n).map(|v| v as u32))
        .map_err(|_| TypeContractError::Mismatch {
            reg_type,
            expected: "a 32-bit int",
        })
}
