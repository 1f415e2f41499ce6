//! # Network Resource State Machine
//!
//! Socket: `Created → [Bound] → Connected | Listening → Closed`, where each
//! accept on a listening socket spawns a child Socket with its own Connection.
//! Connection: `Bound(local) → Connected(remote) → [Shutdown]`, superseded
//! when its socket is closed.
//!
//! A socket has at most one active Connection (`ResourceMaps::active_connections`).
//! Calls naming an unknown socket handle are logged and skipped.

use crate::dispatch::{Context, Outcome};
use crate::labels;
use crate::AnatomistError;
use common::{Arguments, Call, RawHandle};
use substrate::{
    Connection, Data, Host, Relation, RelationKind, Socket, SocketAddress, Vertex, VertexId,
};
use tracing::{debug, error, warn};

fn socket_handle(call: &Call) -> Result<RawHandle, AnatomistError> {
    Ok(call.arguments.handle_any(&["socket", "s"])?)
}

/// The non-blank `ip_address` argument, if any.
fn peer_ip(args: &Arguments) -> Option<&str> {
    args.get("ip_address")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
}

/// `(ip_address, port)` when the call carries an address.
fn peer_address(args: &Arguments) -> Result<Option<SocketAddress>, AnatomistError> {
    let Some(ip) = peer_ip(args) else {
        return Ok(None);
    };
    let port = args.int("port")?;
    let port = u16::try_from(port)
        .map_err(|_| AnatomistError::MalformedCall(format!("port {port} out of range")))?;
    Ok(Some(SocketAddress::new(ip, port)))
}

/// Looks up the socket named by the call, warning when it is unknown.
fn known_socket(ctx: &Context<'_>, action: &str) -> Result<Option<VertexId>, AnatomistError> {
    let handle = socket_handle(ctx.call)?;
    let socket = ctx.maps.sockets.get(&handle);
    if socket.is_none() {
        warn!(handle = %handle, call = %ctx.call.name, "{action} non-existing socket");
    }
    Ok(socket)
}

fn socket_of(ctx: &Context<'_>, id: VertexId) -> Socket {
    ctx.graphs
        .vertex(id)
        .and_then(Vertex::as_socket)
        .cloned()
        .unwrap_or(Socket {
            family: labels::UNCHARTED.to_string(),
            protocol: labels::UNCHARTED.to_string(),
            kind: labels::UNCHARTED.to_string(),
        })
}

fn is_inter_network(socket: &Socket) -> bool {
    socket.family == labels::INTER_NETWORK
}

/// Opens a Connection on `socket`, owned by it and talking from the current host.
fn open_connection(
    ctx: &mut Context<'_>,
    socket: VertexId,
    connection: Connection,
) -> Result<VertexId, AnatomistError> {
    let conn = ctx.graphs.add_vertex(Vertex::Connection(connection));
    ctx.graphs.add_edge(socket, conn, RelationKind::HasConnection)?;
    let host = ctx.graphs.current_host();
    ctx.graphs.add_edge(conn, host, RelationKind::Communicates)?;
    Ok(conn)
}

fn communicate_with_peer(
    ctx: &mut Context<'_>,
    conn: VertexId,
    peer_ip: Option<&str>,
) -> Result<(), AnatomistError> {
    if let Some(ip) = peer_ip {
        let host = ctx.graphs.find_or_create_host(Host::at_address(ip));
        ctx.graphs
            .ensure_edge(conn, host, RelationKind::Communicates)?;
    }
    Ok(())
}

fn update_connection(
    ctx: &mut Context<'_>,
    conn: VertexId,
    update: impl Fn(&mut Connection),
) -> Result<(), AnatomistError> {
    ctx.graphs.update_vertex(conn, |v| {
        if let Some(c) = v.as_connection_mut() {
            update(c);
        }
    })?;
    Ok(())
}

pub fn create(ctx: &mut Context<'_>) -> Result<Outcome, AnatomistError> {
    let args = &ctx.call.arguments;
    let handle = match args.handle("socket") {
        Ok(h) => h,
        Err(e) => ctx
            .call
            .return_value
            .as_ref()
            .and_then(|v| v.as_handle())
            .ok_or(e)?,
    };
    let socket = Socket {
        family: labels::family(args.int("af")?).to_string(),
        protocol: labels::protocol(args.int("protocol")?).to_string(),
        kind: labels::socket_type(args.int("type")?).to_string(),
    };
    debug!(handle = %handle, family = %socket.family, "Socket created");

    if let Some(stale) = ctx.maps.sockets.remove_handle(&handle) {
        warn!(handle = %handle, "Socket handle reused while still mapped, dropping the old socket");
        ctx.maps.active_connections.remove(&stale);
    }
    let s = ctx.graphs.add_vertex(Vertex::Socket(socket));
    ctx.maps.sockets.insert(handle, s);

    let call = ctx.invocation();
    ctx.graphs.add_edge(call, s, RelationKind::CreatesSocket)?;
    let process = ctx.process();
    ctx.graphs.add_edge(process, s, RelationKind::HasSocket)?;
    Ok(Outcome::Applied)
}

pub fn bind(ctx: &mut Context<'_>) -> Result<Outcome, AnatomistError> {
    let Some(s) = known_socket(ctx, "Binding to")? else {
        return Ok(Outcome::Skipped);
    };
    let socket = socket_of(ctx, s);
    let local = if is_inter_network(&socket) {
        peer_address(&ctx.call.arguments)?
    } else {
        error!(family = %socket.family, "Unsupported address family, leaving the local address empty");
        None
    };
    debug!(local = ?local, "Socket bound");

    let mut connection = Connection::opened(s, ctx.call.time);
    connection.source = local.clone();
    let conn = open_connection(ctx, s, connection)?;
    if let Some(previous) = ctx.maps.active_connections.insert(s, conn) {
        debug!(previous = %previous, "Rebinding replaced the active connection");
    }
    let call = ctx.invocation();
    ctx.graphs
        .add_edge(call, conn, Relation::with_address(RelationKind::Binds, local))?;
    Ok(Outcome::Applied)
}

pub fn connect(ctx: &mut Context<'_>) -> Result<Outcome, AnatomistError> {
    let Some(s) = known_socket(ctx, "Connecting from")? else {
        return Ok(Outcome::Skipped);
    };
    let socket = socket_of(ctx, s);
    let record = ctx.call;
    let peer = peer_ip(&record.arguments);
    let remote = if is_inter_network(&socket) {
        peer_address(&record.arguments)?
    } else {
        error!(family = %socket.family, "Unsupported address family, leaving the remote address empty");
        None
    };
    debug!(remote = ?remote, "Socket connected");

    let conn = match ctx.maps.active_connections.get(&s) {
        Some(&existing) => {
            warn!(socket = %s, "Connecting a socket that already has a connection");
            existing
        }
        None => {
            let opened = Connection::opened(s, ctx.call.time);
            let conn = open_connection(ctx, s, opened)?;
            ctx.maps.active_connections.insert(s, conn);
            conn
        }
    };
    let call = ctx.invocation();
    ctx.graphs.add_edge(
        call,
        conn,
        Relation::with_address(RelationKind::Connects, remote.clone()),
    )?;
    communicate_with_peer(ctx, conn, peer)?;
    if let Some(remote) = remote {
        update_connection(ctx, conn, |c| c.destination = Some(remote.clone()))?;
    }
    Ok(Outcome::Applied)
}

pub fn listen(ctx: &mut Context<'_>) -> Result<Outcome, AnatomistError> {
    let Some(s) = known_socket(ctx, "Listening from")? else {
        return Ok(Outcome::Skipped);
    };
    debug!(socket = %s, "Socket listening");
    let call = ctx.invocation();
    ctx.graphs.add_edge(call, s, RelationKind::ListensOn)?;
    Ok(Outcome::Applied)
}

pub fn accept(ctx: &mut Context<'_>) -> Result<Outcome, AnatomistError> {
    let Some(parent) = known_socket(ctx, "Accepting from")? else {
        return Ok(Outcome::Skipped);
    };
    let child_handle = ctx
        .call
        .return_value
        .as_ref()
        .and_then(|v| v.as_handle())
        .ok_or_else(|| {
            AnatomistError::MalformedCall("accept without a returned socket handle".into())
        })?;
    let socket = socket_of(ctx, parent);
    let record = ctx.call;
    let peer = peer_ip(&record.arguments);
    let remote = if is_inter_network(&socket) {
        peer_address(&record.arguments)?
    } else {
        None
    };
    debug!(parent = %parent, handle = %child_handle, remote = ?remote, "Socket accepting connection");

    let local = match ctx.maps.active_connections.get(&parent) {
        Some(conn) => ctx
            .graphs
            .vertex(*conn)
            .and_then(Vertex::as_connection)
            .and_then(|c| c.source.clone()),
        None => {
            warn!(socket = %parent, "Accepting from unbound socket");
            None
        }
    };

    let child = ctx.graphs.add_vertex(Vertex::Socket(socket));
    if let Some(stale) = ctx.maps.sockets.insert(child_handle, child) {
        warn!(socket = %stale, "Accepted socket reuses a handle that was still mapped");
        ctx.maps.active_connections.remove(&stale);
    }
    let process = ctx.process();
    ctx.graphs.add_edge(process, child, RelationKind::HasSocket)?;

    let mut connection = Connection::opened(child, ctx.call.time);
    connection.source = local;
    connection.destination = remote.clone();
    let conn = ctx.graphs.add_vertex(Vertex::Connection(connection));
    let call = ctx.invocation();
    ctx.graphs
        .add_edge(call, conn, Relation::with_address(RelationKind::Accepts, remote))?;
    ctx.graphs.add_edge(child, conn, RelationKind::HasConnection)?;
    ctx.graphs.add_edge(parent, child, RelationKind::Duplicates)?;
    communicate_with_peer(ctx, conn, peer)?;
    ctx.maps.active_connections.insert(child, conn);
    Ok(Outcome::Applied)
}

#[derive(Clone, Copy)]
enum Direction {
    Outbound,
    Inbound,
}

fn transfer(ctx: &mut Context<'_>, direction: Direction) -> Result<Outcome, AnatomistError> {
    let action = match direction {
        Direction::Outbound => "Sending through",
        Direction::Inbound => "Receiving through",
    };
    let Some(s) = known_socket(ctx, action)? else {
        return Ok(Outcome::Skipped);
    };
    let buffer = ctx.call.arguments.str("buffer")?;
    let Some(&conn) = ctx.maps.active_connections.get(&s) else {
        warn!(socket = %s, "{action} unbound socket");
        return Ok(Outcome::Skipped);
    };
    let data = Data::from_text(buffer, ctx.call.time);
    let length = data.length as u64;
    debug!(bytes = length, entropy = data.entropy, "{action} socket");

    let d = ctx.graphs.add_vertex(Vertex::Data(data));
    let call = ctx.invocation();
    match direction {
        Direction::Outbound => {
            ctx.graphs.add_edge(call, d, RelationKind::Sends)?;
            ctx.graphs.add_edge(d, conn, RelationKind::Conveys)?;
        }
        Direction::Inbound => {
            ctx.graphs.add_edge(d, call, RelationKind::Receives)?;
            ctx.graphs.add_edge(conn, d, RelationKind::Conveys)?;
        }
    }
    update_connection(ctx, conn, |c| c.volume += length)?;
    Ok(Outcome::Applied)
}

pub fn send(ctx: &mut Context<'_>) -> Result<Outcome, AnatomistError> {
    transfer(ctx, Direction::Outbound)
}

pub fn receive(ctx: &mut Context<'_>) -> Result<Outcome, AnatomistError> {
    transfer(ctx, Direction::Inbound)
}

pub fn shutdown(ctx: &mut Context<'_>) -> Result<Outcome, AnatomistError> {
    let Some(s) = known_socket(ctx, "Shutting down")? else {
        return Ok(Outcome::Skipped);
    };
    let Some(conn) = ctx.maps.active_connections.remove(&s) else {
        warn!(socket = %s, "Shutting down unbound socket");
        return Ok(Outcome::Skipped);
    };
    debug!(socket = %s, connection = %conn, "Socket shut down");
    let call = ctx.invocation();
    ctx.graphs.add_edge(call, conn, RelationKind::Shutdown)?;
    let time = ctx.call.time;
    update_connection(ctx, conn, |c| {
        c.shut_down = true;
        c.stamp_duration(time);
    })?;
    Ok(Outcome::Applied)
}

pub fn close(ctx: &mut Context<'_>) -> Result<Outcome, AnatomistError> {
    let Some(s) = known_socket(ctx, "Closing")? else {
        return Ok(Outcome::Skipped);
    };
    debug!(socket = %s, "Closing socket");
    let call = ctx.invocation();
    ctx.graphs.add_edge(call, s, RelationKind::CloseSocket)?;
    ctx.maps.sockets.remove_vertex(s);
    match ctx.maps.active_connections.remove(&s) {
        Some(conn) => {
            ctx.graphs.add_edge(call, conn, RelationKind::Closes)?;
            let time = ctx.call.time;
            update_connection(ctx, conn, |c| {
                c.closed = true;
                c.stamp_duration(time);
            })?;
        }
        None => warn!(socket = %s, "Closing down unbound socket"),
    }
    Ok(Outcome::Applied)
}
