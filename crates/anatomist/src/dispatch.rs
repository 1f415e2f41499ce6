//! Call dispatch.
//!
//! `CallKind::from_name` maps an API name to the family of calls sharing a
//! handler; `integrate` runs that handler against a `Context`.

use crate::maps::ResourceMaps;
use crate::{network, registry, AnatomistError};
use common::{Call, Limits};
use substrate::{GraphSet, Invocation, Process, Vertex, VertexId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    SocketCreate,
    SocketBind,
    SocketConnect,
    SocketListen,
    SocketAccept,
    SocketSend,
    SocketReceive,
    SocketShutdown,
    SocketClose,
    KeyOpen,
    KeyEnumerate,
    KeyClose,
    KeyDelete,
    EntryQuery,
    EntrySet,
    EntryDelete,
}

impl CallKind {
    pub fn from_name(name: &str) -> Option<Self> {
        let kind = match name {
            "socket" | "WSASocketA" | "WSASocketW" => CallKind::SocketCreate,
            "bind" => CallKind::SocketBind,
            "connect" | "WSAConnect" => CallKind::SocketConnect,
            "listen" => CallKind::SocketListen,
            "accept" | "WSAAccept" => CallKind::SocketAccept,
            "send" => CallKind::SocketSend,
            "recv" => CallKind::SocketReceive,
            "shutdown" => CallKind::SocketShutdown,
            "closesocket" => CallKind::SocketClose,
            "RegOpenKeyExA" | "RegOpenKeyExW" | "NtOpenKey" | "NtOpenKeyEx" | "RegCreateKeyExA"
            | "RegCreateKeyExW" | "NtCreateKey" => CallKind::KeyOpen,
            "RegEnumKeyW" | "RegEnumKeyExA" | "RegEnumKeyExW" | "NtEnumerateKey" => {
                CallKind::KeyEnumerate
            }
            "RegCloseKey" => CallKind::KeyClose,
            "NtDeleteKey" | "RegDeleteKeyA" | "RegDeleteKeyW" => CallKind::KeyDelete,
            "NtQueryValueKey" | "RegQueryValueExA" | "RegQueryValueExW" | "RegEnumValueA"
            | "RegEnumValueW" | "NtEnumerateValueKey" => CallKind::EntryQuery,
            "RegSetValueExA" | "RegSetValueExW" | "NtSetValueKey" => CallKind::EntrySet,
            "RegDeleteValueA" | "RegDeleteValueW" | "NtDeleteValueKey" => CallKind::EntryDelete,
            _ => return None,
        };
        Some(kind)
    }
}

/// What a handler did with a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The graph and maps were updated.
    Applied,
    /// The call referenced an unknown resource and was dropped.
    Skipped,
    /// No handler for this call, or the call failed.
    Ignored,
}

/// Everything a handler may touch while integrating one call.
pub struct Context<'a> {
    pub graphs: &'a mut GraphSet,
    pub maps: &'a mut ResourceMaps,
    pub limits: &'a Limits,
    pub call: &'a Call,
    invocation: Option<VertexId>,
}

impl<'a> Context<'a> {
    pub fn new(
        graphs: &'a mut GraphSet,
        maps: &'a mut ResourceMaps,
        limits: &'a Limits,
        call: &'a Call,
    ) -> Self {
        Self {
            graphs,
            maps,
            limits,
            call,
            invocation: None,
        }
    }

    /// The vertex standing for this call, created on first use.
    pub fn invocation(&mut self) -> VertexId {
        if let Some(id) = self.invocation {
            return id;
        }
        let id = self.graphs.add_vertex(Vertex::Invocation(Invocation {
            name: self.call.name.clone(),
            time: self.call.time,
        }));
        self.invocation = Some(id);
        id
    }

    /// The Process vertex of the calling process.
    pub fn process(&mut self) -> VertexId {
        let p = &self.call.process;
        self.graphs.find_or_create_process(Process {
            pid: p.pid,
            executable: p.executable.clone(),
            command: p.command.clone(),
        })
    }
}

pub fn integrate(kind: CallKind, ctx: &mut Context<'_>) -> Result<Outcome, AnatomistError> {
    match kind {
        CallKind::SocketCreate => network::create(ctx),
        CallKind::SocketBind => network::bind(ctx),
        CallKind::SocketConnect => network::connect(ctx),
        CallKind::SocketListen => network::listen(ctx),
        CallKind::SocketAccept => network::accept(ctx),
        CallKind::SocketSend => network::send(ctx),
        CallKind::SocketReceive => network::receive(ctx),
        CallKind::SocketShutdown => network::shutdown(ctx),
        CallKind::SocketClose => network::close(ctx),
        CallKind::KeyOpen => registry::open_key(ctx),
        CallKind::KeyEnumerate => registry::enumerate_key(ctx),
        CallKind::KeyClose => registry::close_key(ctx),
        CallKind::KeyDelete => registry::delete_key(ctx),
        CallKind::EntryQuery => registry::query_entry(ctx),
        CallKind::EntrySet => registry::set_entry(ctx),
        CallKind::EntryDelete => registry::delete_entry(ctx),
    }
}
