//! Vertex vocabulary.
//!
//! Back-references (`Connection::socket`, `Key::parent`, `KeyEntry::key`,
//! `KeyHandle::key`) are plain ids; the owning edge in the graph is the
//! authoritative link and the id is kept for O(1) lookups.

use crate::value::{RegData, RegType, RegValue, TypeContractError};
use crate::{SubstrateError, VertexId};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum VertexKind {
    Host,
    Process,
    Invocation,
    Socket,
    Connection,
    Data,
    Key,
    KeyEntry,
    KeyHandle,
    Directory,
    File,
}

impl VertexKind {
    pub const ALL: [VertexKind; 11] = [
        VertexKind::Host,
        VertexKind::Process,
        VertexKind::Invocation,
        VertexKind::Socket,
        VertexKind::Connection,
        VertexKind::Data,
        VertexKind::Key,
        VertexKind::KeyEntry,
        VertexKind::KeyHandle,
        VertexKind::Directory,
        VertexKind::File,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            VertexKind::Host => "Host",
            VertexKind::Process => "Process",
            VertexKind::Invocation => "Invocation",
            VertexKind::Socket => "Socket",
            VertexKind::Connection => "Connection",
            VertexKind::Data => "Data",
            VertexKind::Key => "Key",
            VertexKind::KeyEntry => "KeyEntry",
            VertexKind::KeyHandle => "KeyHandle",
            VertexKind::Directory => "Directory",
            VertexKind::File => "File",
        }
    }
}

impl fmt::Display for VertexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for VertexKind {
    type Err = SubstrateError;

    /// Case-insensitive; `Handle` and `Call` are accepted as aliases.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        if wanted.eq_ignore_ascii_case("handle") {
            return Ok(VertexKind::KeyHandle);
        }
        if wanted.eq_ignore_ascii_case("call") {
            return Ok(VertexKind::Invocation);
        }
        VertexKind::ALL
            .into_iter()
            .find(|k| k.name().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| SubstrateError::UnknownKind(s.to_string()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Host {
    pub address: String,
    pub domain: String,
    pub name: String,
    pub platform: String,
}

impl Host {
    /// A remote peer known only by its address.
    pub fn at_address(address: &str) -> Self {
        Self {
            address: address.to_string(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Process {
    pub pid: u32,
    pub executable: String,
    pub command: String,
}

/// An intercepted call, materialized once it takes part in an edge.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub name: String,
    pub time: f64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Socket {
    pub family: String,
    pub protocol: String,
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SocketAddress {
    pub ip: String,
    pub port: u16,
}

impl SocketAddress {
    pub fn new(ip: &str, port: u16) -> Self {
        Self {
            ip: ip.to_string(),
            port,
        }
    }
}

impl fmt::Display for SocketAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Connection {
    pub socket: Option<VertexId>,
    pub source: Option<SocketAddress>,
    pub destination: Option<SocketAddress>,
    /// Bytes sent and received over the connection.
    pub volume: u64,
    pub opened_at: f64,
    pub duration: f64,
    pub shut_down: bool,
    pub closed: bool,
}

impl Connection {
    pub fn opened(socket: VertexId, time: f64) -> Self {
        Self {
            socket: Some(socket),
            opened_at: time,
            ..Default::default()
        }
    }

    pub fn stamp_duration(&mut self, time: f64) {
        self.duration = (time - self.opened_at).max(0.0);
    }
}

/// A message exchanged over a connection.
#[derive(Debug, Clone, PartialEq)]
pub struct Data {
    pub time: f64,
    pub length: usize,
    pub entropy: f64,
    pub printable: bool,
    pub digest: blake3::Hash,
}

impl Data {
    pub fn from_text(buffer: &str, time: f64) -> Self {
        let bytes = buffer.as_bytes();
        Self {
            time,
            length: bytes.len(),
            entropy: shannon_entropy(bytes),
            printable: buffer.chars().all(|c| !c.is_control()),
            digest: blake3::hash(bytes),
        }
    }
}

/// Shannon entropy of a byte string, in bits per byte.
pub fn shannon_entropy(bytes: &[u8]) -> f64 {
    if bytes.is_empty() {
        return 0.0;
    }
    let mut counts = [0usize; 256];
    for b in bytes {
        counts[*b as usize] += 1;
    }
    let total = bytes.len() as f64;
    counts
        .iter()
        .filter(|c| **c > 0)
        .map(|c| {
            let p = *c as f64 / total;
            -p * p.log2()
        })
        .sum()
}

/// A registry key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Key {
    pub name: String,
    /// Backslash-joined path from the root key, computed at creation.
    pub path: String,
    pub parent: Option<VertexId>,
    pub deleted: bool,
    /// False when the name holds control characters or a replaced NUL.
    pub printable: bool,
}

impl Key {
    pub fn root(name: String) -> Self {
        Self {
            path: name.clone(),
            printable: is_printable(&name),
            name,
            parent: None,
            deleted: false,
        }
    }

    pub fn child(name: String, parent: VertexId, parent_path: &str) -> Self {
        Self {
            path: format!("{parent_path}\\{name}"),
            printable: is_printable(&name),
            name,
            parent: Some(parent),
            deleted: false,
        }
    }
}

fn is_printable(name: &str) -> bool {
    name.chars()
        .all(|c| c == ' ' || !(c.is_control() || c.is_whitespace() || c == '\u{FFFD}'))
}

/// Normalizes one registry path segment into a key name.
///
/// NUL becomes U+FFFD and the name is case-folded to title case (first
/// letter of every alphabetic run upper, rest lower).
pub fn normalize_key_name(raw: &str, max_len: usize) -> Result<String, SubstrateError> {
    let invalid = |reason| SubstrateError::InvalidName {
        what: "key",
        name: raw.to_string(),
        reason,
    };
    if raw.is_empty() {
        return Err(invalid("empty"));
    }
    if raw.contains('\\') {
        return Err(invalid("'\\' not permitted in a registry key name"));
    }
    if raw.chars().count() > max_len {
        return Err(invalid("too long to be allowed by registry"));
    }
    let mut out = String::with_capacity(raw.len());
    let mut prev_cased = false;
    for c in raw.chars() {
        let c = if c == '\0' { '\u{FFFD}' } else { c };
        if prev_cased {
            out.extend(c.to_lowercase());
        } else {
            out.extend(c.to_uppercase());
        }
        prev_cased = c.is_alphabetic();
    }
    Ok(out)
}

/// A named value under a registry key, at one point of its history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyEntry {
    pub name: String,
    pub data: RegData,
    pub key: Option<VertexId>,
    pub deleted: bool,
}

impl KeyEntry {
    /// An entry with no type and no value.
    pub fn bare(name: &str, max_len: usize) -> Result<Self, SubstrateError> {
        if name.chars().count() > max_len {
            return Err(SubstrateError::InvalidName {
                what: "entry",
                name: name.to_string(),
                reason: "registry key value name is too long",
            });
        }
        Ok(Self {
            name: name.to_string(),
            data: RegData::None,
            key: None,
            deleted: false,
        })
    }

    pub fn reg_type(&self) -> RegType {
        self.data.reg_type()
    }

    /// Retags the entry. Switching to `REG_NONE` clears the value, any
    /// other change resets it to the zero value of the new type.
    pub fn set_type(&mut self, reg_type: RegType) {
        if reg_type != self.data.reg_type() {
            self.data = RegData::empty(reg_type);
        }
    }

    /// Assigns a value, validated against the current type.
    pub fn set_value(&mut self, value: RegValue) -> Result<(), TypeContractError> {
        self.data = RegData::typed(self.data.reg_type(), value)?;
        Ok(())
    }

    /// Same type tag and value.
    pub fn same_content(&self, other: &KeyEntry) -> bool {
        self.data == other.data
    }
}

/// An open handle on a registry key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyHandle {
    pub key: Option<VertexId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directory {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct File {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Vertex {
    Host(Host),
    Process(Process),
    Invocation(Invocation),
    Socket(Socket),
    Connection(Connection),
    Data(Data),
    Key(Key),
    KeyEntry(KeyEntry),
    KeyHandle(KeyHandle),
    Directory(Directory),
    File(File),
}

macro_rules! accessors {
    ($($variant:ident => $get:ident, $get_mut:ident;)*) => {
        $(
            pub fn $get(&self) -> Option<&$variant> {
                match self {
                    Vertex::$variant(v) => Some(v),
                    _ => None,
                }
            }

            pub fn $get_mut(&mut self) -> Option<&mut $variant> {
                match self {
                    Vertex::$variant(v) => Some(v),
                    _ => None,
                }
            }
        )*
    };
}

impl Vertex {
    pub fn kind(&self) -> VertexKind {
        match self {
            Vertex::Host(_) => VertexKind::Host,
            Vertex::Process(_) => VertexKind::Process,
            Vertex::Invocation(_) => VertexKind::Invocation,
            Vertex::Socket(_) => VertexKind::Socket,
            Vertex::Connection(_) => VertexKind::Connection,
            Vertex::Data(_) => VertexKind::Data,
            Vertex::Key(_) => VertexKind::Key,
            Vertex::KeyEntry(_) => VertexKind::KeyEntry,
            Vertex::KeyHandle(_) => VertexKind::KeyHandle,
            Vertex::Directory(_) => VertexKind::Directory,
            Vertex::File(_) => VertexKind::File,
        }
    }

    /// Short human-readable label.
    pub fn label(&self) -> String {
        match self {
            Vertex::Host(h) if !h.name.is_empty() => format!("Host {}", h.name),
            Vertex::Host(h) => format!("Host {}", h.address),
            Vertex::Process(p) => format!("Process {} ({})", p.pid, p.executable),
            Vertex::Invocation(c) => format!("{} @ {:.3}", c.name, c.time),
            Vertex::Socket(s) => format!("Socket {}/{}/{}", s.family, s.protocol, s.kind),
            Vertex::Connection(c) => match (&c.source, &c.destination) {
                (Some(s), Some(d)) => format!("Connection {s} -> {d}"),
                (Some(s), None) => format!("Connection {s}"),
                (None, Some(d)) => format!("Connection -> {d}"),
                (None, None) => "Connection".to_string(),
            },
            Vertex::Data(d) => format!("Data ({} bytes)", d.length),
            Vertex::Key(k) => format!("Key {}", k.path),
            Vertex::KeyEntry(e) => format!("KeyEntry {} [{}]", e.name, e.reg_type()),
            Vertex::KeyHandle(_) => "KeyHandle".to_string(),
            Vertex::Directory(d) => format!("Directory {}", d.name),
            Vertex::File(f) => format!("File {}", f.name),
        }
    }

    accessors! {
        Host => as_host, as_host_mut;
        Process => as_process, as_process_mut;
        Socket => as_socket, as_socket_mut;
        Connection => as_connection, as_connection_mut;
        Key => as_key, as_key_mut;
        KeyEntry => as_entry, as_entry_mut;
        KeyHandle => as_handle, as_handle_mut;
    }

    /// Name of a filesystem vertex.
    pub fn fs_name(&self) -> Option<&str> {
        match self {
            Vertex::Directory(d) => Some(&d.name),
            Vertex::File(f) => Some(&f.name),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_parsing() {
        assert_eq!("socket".parse::<VertexKind>().unwrap(), VertexKind::Socket);
        assert_eq!("Handle".parse::<VertexKind>().unwrap(), VertexKind::KeyHandle);
        assert_eq!("KEYENTRY".parse::<VertexKind>().unwrap(), VertexKind::KeyEntry);
        assert!(matches!(
            "Thread".parse::<VertexKind>(),
            Err(SubstrateError::UnknownKind(_))
        ));
    }

    #[test]
    fn test_key_name_title_case() {
        assert_eq!(normalize_key_name("SOFTWARE", 255).unwrap(), "Software");
        assert_eq!(normalize_key_name("currentVersion", 255).unwrap(), "Currentversion");
        assert_eq!(normalize_key_name("hkey_local_machine", 255).unwrap(), "Hkey_Local_Machine");
        assert_eq!(normalize_key_name("a\0b", 255).unwrap(), "A\u{FFFD}B");
    }

    #[test]
    fn test_key_name_rejections() {
        assert!(normalize_key_name("", 255).is_err());
        assert!(normalize_key_name("a\\b", 255).is_err());
        assert!(normalize_key_name(&"x".repeat(256), 255).is_err());
        assert!(normalize_key_name(&"x".repeat(255), 255).is_ok());
    }

    #[test]
    fn test_child_key_path() {
        let key = Key::child("Run".into(), VertexId(3), "Hkey_Local_Machine\\Software");
        assert_eq!(key.path, "Hkey_Local_Machine\\Software\\Run");
        assert_eq!(key.parent, Some(VertexId(3)));
        assert!(key.printable);
    }

    #[test]
    fn test_key_printability() {
        assert!(Key::root("Hkey Current User".into()).printable);
        let nul = normalize_key_name("a\0b", 255).unwrap();
        assert!(!Key::root(nul).printable);
        assert!(!Key::root("Tab\there".into()).printable);
    }

    #[test]
    fn test_entropy() {
        assert_eq!(shannon_entropy(b""), 0.0);
        assert_eq!(shannon_entropy(b"aaaa"), 0.0);
        assert!((shannon_entropy(b"abab") - 1.0).abs() < 1e-12);
        assert!((shannon_entropy(b"abcd") - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_data_from_text() {
        let data = Data::from_text("GET / HTTP/1.1", 2.0);
        assert_eq!(data.length, 14);
        assert!(data.printable);
        assert_eq!(data.digest, blake3::hash(b"GET / HTTP/1.1"));
        assert!(!Data::from_text("line\r\n", 0.0).printable);
    }

    #[test]
    fn test_entry_type_contract() {
        let mut entry = KeyEntry::bare("Path", 16383).unwrap();
        assert_eq!(entry.reg_type(), RegType::None);
        entry.set_type(RegType::Sz);
        entry.set_value(RegValue::Text("C:\\x".into())).unwrap();
        assert!(entry.set_value(RegValue::Integer(1)).is_err());
        assert_eq!(entry.data, RegData::Sz("C:\\x".into()));
        entry.set_type(RegType::None);
        assert_eq!(entry.data.value(), RegValue::Absent);
        assert!(KeyEntry::bare(&"n".repeat(16384), 16383).is_err());
    }

    #[test]
    fn test_connection_duration() {
        let mut conn = Connection::opened(VertexId(1), 10.0);
        conn.stamp_duration(12.5);
        assert_eq!(conn.duration, 2.5);
        conn.stamp_duration(5.0);
        assert_eq!(conn.duration, 0.0);
    }
}
