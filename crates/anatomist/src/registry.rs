//! # Registry Resource State Machine
//!
//! Keys are resolved by path and live for the whole run (deletion only flags
//! them). Handles map an OS key handle to a Key. Entries form an append-only
//! history per `(containing key, entry name)`: a new KeyEntry vertex is added
//! only when the observed type/value differs from the current one, linked
//! from it by `ChangesTowards`.

use crate::dispatch::{Context, Outcome};
use crate::AnatomistError;
use common::{ArgValue, RawHandle};
use substrate::vertex::normalize_key_name;
use substrate::{
    Key, KeyEntry, KeyHandle, RegData, RegType, RegValue, RelationKind, TypeContractError,
    Vertex, VertexId,
};
use tracing::{debug, info, warn};

/// Resolves a backslash-separated key path, creating missing keys.
///
/// Every prefix is looked up in the path cache first; otherwise the
/// `HasSubKey` chain is walked from the current host, ignoring deleted keys.
pub fn resolve_path(ctx: &mut Context<'_>, path: &str) -> Result<VertexId, AnatomistError> {
    let names = path
        .split('\\')
        .filter(|s| !s.is_empty())
        .map(|s| normalize_key_name(s, ctx.limits.key_name_max))
        .collect::<Result<Vec<_>, _>>()?;
    if names.is_empty() {
        return Err(AnatomistError::MalformedCall(format!(
            "unnamed registry key {path:?}"
        )));
    }

    let host = ctx.graphs.current_host();
    let mut parent: Option<(VertexId, String)> = None;
    for name in names {
        let full_path = match &parent {
            Some((_, prefix)) => format!("{prefix}\\{name}"),
            None => name.clone(),
        };
        if let Some(key) = ctx.maps.paths.get(&full_path) {
            parent = Some((key, full_path));
            continue;
        }
        let from = parent.as_ref().map_or(host, |(id, _)| *id);
        let existing = ctx
            .graphs
            .full()
            .outgoing(from, RelationKind::HasSubKey)
            .into_iter()
            .find(|id| {
                ctx.graphs
                    .vertex(*id)
                    .and_then(Vertex::as_key)
                    .is_some_and(|k| !k.deleted && k.name == name)
            });
        let key = match existing {
            Some(key) => key,
            None => {
                let vertex = match &parent {
                    Some((id, prefix)) => Key::child(name, *id, prefix),
                    None => Key::root(name),
                };
                if !vertex.printable {
                    info!(key = %vertex.path, "Got an unprintable registry key");
                }
                let key = ctx.graphs.add_vertex(Vertex::Key(vertex));
                ctx.graphs.add_edge(from, key, RelationKind::HasSubKey)?;
                key
            }
        };
        ctx.maps.paths.insert(&full_path, key);
        parent = Some((key, full_path));
    }
    // `names` is non-empty, so the loop ran at least once.
    parent
        .map(|(key, _)| key)
        .ok_or_else(|| AnatomistError::MalformedCall(format!("unnamed registry key {path:?}")))
}

fn key_handle_arg(ctx: &Context<'_>) -> Result<RawHandle, AnatomistError> {
    Ok(ctx.call.arguments.handle("key_handle")?)
}

/// The Handle vertex for the call's key handle and the Key it uses.
fn known_handle(
    ctx: &Context<'_>,
    action: &str,
) -> Result<Option<(VertexId, VertexId)>, AnatomistError> {
    let raw = key_handle_arg(ctx)?;
    let Some(handle) = ctx.maps.key_handles.get(&raw) else {
        warn!(handle = %raw, call = %ctx.call.name, "Trying to {action} with unseen key handle");
        return Ok(None);
    };
    let key = ctx
        .graphs
        .vertex(handle)
        .and_then(Vertex::as_handle)
        .and_then(|h| h.key);
    match key {
        Some(key) => Ok(Some((handle, key))),
        None => {
            warn!(handle = %raw, "Key handle with no attached key");
            Ok(None)
        }
    }
}

fn key_path(ctx: &Context<'_>, key: VertexId) -> String {
    ctx.graphs
        .vertex(key)
        .and_then(Vertex::as_key)
        .map(|k| k.path.clone())
        .unwrap_or_default()
}

pub fn open_key(ctx: &mut Context<'_>) -> Result<Outcome, AnatomistError> {
    let raw = key_handle_arg(ctx)?;
    if ctx.maps.key_handles.get(&raw).is_some() {
        warn!(handle = %raw, "Opening an already existing registry key handle");
        return Ok(Outcome::Skipped);
    }
    let call = ctx.call;
    let path = call.arguments.str("regkey")?;
    debug!(path, "Opening registry key");
    let key = resolve_path(ctx, path)?;

    let handle = ctx
        .graphs
        .add_vertex(Vertex::KeyHandle(KeyHandle { key: Some(key) }));
    ctx.graphs.add_edge(handle, key, RelationKind::UsesKey)?;
    let process = ctx.process();
    ctx.graphs.add_edge(process, handle, RelationKind::HasHandle)?;
    ctx.maps.key_handles.insert(raw, handle);
    Ok(Outcome::Applied)
}

/// Decodes a byte buffer that was captured as text but holds UTF-16LE.
fn utf16_lossy(buffer: &str) -> String {
    let bytes = buffer.as_bytes();
    let units = bytes
        .chunks(2)
        .map(|pair| match pair {
            [lo, hi] => u16::from_le_bytes([*lo, *hi]),
            _ => 0xFFFD,
        });
    char::decode_utf16(units)
        .map(|r| r.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect()
}

pub fn enumerate_key(ctx: &mut Context<'_>) -> Result<Outcome, AnatomistError> {
    let Some((handle, key)) = known_handle(ctx, "enumerate a registry key")? else {
        return Ok(Outcome::Skipped);
    };
    let call = ctx.call;
    let sub_name = if call.name == "NtEnumerateKey" {
        utf16_lossy(call.arguments.str("buffer")?)
    } else {
        call.arguments.str("key_name")?.to_string()
    };
    let path = format!("{}\\{}", key_path(ctx, key), sub_name);
    debug!(path = %path, "Enumerating from registry key");
    let sub_key = resolve_path(ctx, &path)?;
    ctx.graphs
        .add_edge(handle, sub_key, RelationKind::Discovered)?;
    Ok(Outcome::Applied)
}

pub fn close_key(ctx: &mut Context<'_>) -> Result<Outcome, AnatomistError> {
    let raw = key_handle_arg(ctx)?;
    match ctx.maps.key_handles.remove_handle(&raw) {
        Some(_) => {
            debug!(handle = %raw, "Closing key handle");
            Ok(Outcome::Applied)
        }
        None => {
            warn!(handle = %raw, "Trying to close unseen key handle");
            Ok(Outcome::Skipped)
        }
    }
}

pub fn delete_key(ctx: &mut Context<'_>) -> Result<Outcome, AnatomistError> {
    let Some((_, handle_key)) = known_handle(ctx, "delete a key")? else {
        return Ok(Outcome::Skipped);
    };
    let call = ctx.call;
    let key = match call.arguments.str("regkey") {
        Ok(path) => resolve_path(ctx, path)?,
        Err(_) => handle_key,
    };
    let path = key_path(ctx, key);
    debug!(path = %path, "Deleting registry key");
    ctx.graphs.update_vertex(key, |v| {
        if let Some(k) = v.as_key_mut() {
            k.deleted = true;
        }
    })?;
    ctx.maps.paths.remove(&path);
    let moved = ctx.maps.entries.retire_key(key);
    debug!(entries = moved, "Retired entries of deleted key");
    Ok(Outcome::Applied)
}

/// Splits `key\path\entry` at the last separator.
fn split_entry_path(path: &str) -> Result<(&str, &str), AnatomistError> {
    path.rsplit_once('\\').ok_or_else(|| {
        AnatomistError::MalformedCall(format!("expected at least one '\\', got {path:?}"))
    })
}

fn entry_path(ctx: &Context<'_>) -> Result<String, AnatomistError> {
    let regkey = ctx.call.arguments.str("regkey")?;
    if ctx.call.name == "NtEnumerateValueKey" {
        let name = ctx.call.arguments.str("key_name")?;
        Ok(format!("{regkey}\\{name}"))
    } else {
        Ok(regkey.to_string())
    }
}

/// Best-effort check that `key` sits under the handle's key.
fn check_descendant(ctx: &Context<'_>, key: VertexId, handle_key: VertexId) {
    let mut at = Some(key);
    while let Some(id) = at {
        if id == handle_key {
            return;
        }
        at = ctx.graphs.vertex(id).and_then(Vertex::as_key).and_then(|k| k.parent);
    }
    warn!(
        key = %key_path(ctx, key),
        open_key = %key_path(ctx, handle_key),
        "Entry key is not under the open key, possibly an unknown symbolic link"
    );
}

/// Raw decoder value. Integers above `i64::MAX` arrive as floats and keep
/// their 64-bit pattern.
fn raw_value(reg_type: RegType, value: Option<&ArgValue>) -> Result<RegValue, AnatomistError> {
    let value =
        value.ok_or_else(|| AnatomistError::MalformedCall("missing argument 'value'".into()))?;
    Ok(match value {
        ArgValue::Null => RegValue::Absent,
        ArgValue::Str(s) => RegValue::Text(s.clone()),
        ArgValue::Int(n) => RegValue::Integer(*n),
        ArgValue::Bool(b) => RegValue::Integer(*b as i64),
        ArgValue::Float(f) if f.fract() == 0.0 && *f >= 0.0 => RegValue::Integer(*f as u64 as i64),
        ArgValue::Float(f) if f.fract() == 0.0 => RegValue::Integer(*f as i64),
        ArgValue::Float(_) => {
            return Err(TypeContractError::Mismatch {
                reg_type,
                expected: "str or int",
            }
            .into())
        }
    })
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Access {
    Query,
    Set,
}

/// Resolved target of an entry operation, with a bare entry for its name.
struct EntryTarget {
    handle: VertexId,
    key: VertexId,
    name: String,
    entry: KeyEntry,
}

fn entry_target(
    ctx: &mut Context<'_>,
    action: &str,
) -> Result<Option<EntryTarget>, AnatomistError> {
    let Some((handle, handle_key)) = known_handle(ctx, action)? else {
        return Ok(None);
    };
    let path = entry_path(ctx)?;
    let (key_part, name) = split_entry_path(&path)?;
    let mut entry = KeyEntry::bare(name, ctx.limits.entry_name_max)?;
    let key = resolve_path(ctx, key_part)?;
    check_descendant(ctx, key, handle_key);
    entry.key = Some(key);
    Ok(Some(EntryTarget {
        handle,
        key,
        name: name.to_string(),
        entry,
    }))
}

fn access_entry(ctx: &mut Context<'_>, access: Access) -> Result<Outcome, AnatomistError> {
    // Everything fallible about the value happens before any graph mutation.
    let reg_type: RegType = ctx
        .call
        .flags
        .str("reg_type")
        .map_err(AnatomistError::from)?
        .parse()?;
    let data = RegData::ingest(reg_type, raw_value(reg_type, ctx.call.arguments.get("value"))?)?;

    let action = match access {
        Access::Query => "query value",
        Access::Set => "set value",
    };
    let Some(target) = entry_target(ctx, action)? else {
        return Ok(Outcome::Skipped);
    };
    let mut candidate = target.entry;
    candidate.data = data;

    let old = ctx.maps.entries.current(target.key, &target.name);
    let keep = match old {
        None => true,
        Some(old) => {
            ctx.maps.entries.is_deleted(target.key, &target.name, old)
                || !ctx
                    .graphs
                    .vertex(old)
                    .and_then(Vertex::as_entry)
                    .is_some_and(|o| o.same_content(&candidate))
        }
    };
    let entry = match (keep, old) {
        (false, Some(old)) => {
            debug!(entry = %target.name, "Entry unchanged, reusing current vertex");
            old
        }
        (_, old) => {
            debug!(entry = %target.name, reg_type = %reg_type, "New entry value");
            let entry = ctx.graphs.add_vertex(Vertex::KeyEntry(candidate));
            if let Some(old) = old {
                ctx.graphs
                    .add_edge(old, entry, RelationKind::ChangesTowards)?;
            }
            entry
        }
    };

    ctx.maps.entries.set_current(target.key, &target.name, entry);
    ctx.graphs
        .ensure_edge(target.key, entry, RelationKind::HasEntry)?;
    match access {
        Access::Query => ctx
            .graphs
            .add_edge(entry, target.handle, RelationKind::QueriesEntry)?,
        Access::Set => ctx
            .graphs
            .add_edge(target.handle, entry, RelationKind::SetsEntry)?,
    };
    Ok(Outcome::Applied)
}

pub fn query_entry(ctx: &mut Context<'_>) -> Result<Outcome, AnatomistError> {
    access_entry(ctx, Access::Query)
}

pub fn set_entry(ctx: &mut Context<'_>) -> Result<Outcome, AnatomistError> {
    access_entry(ctx, Access::Set)
}

pub fn delete_entry(ctx: &mut Context<'_>) -> Result<Outcome, AnatomistError> {
    let Some(target) = entry_target(ctx, "delete value")? else {
        return Ok(Outcome::Skipped);
    };
    let mut tombstone = target.entry;
    tombstone.deleted = true;

    let old = ctx.maps.entries.current(target.key, &target.name);
    if let Some(previous) = old.and_then(|o| ctx.graphs.vertex(o)).and_then(Vertex::as_entry) {
        tombstone.data = previous.data.clone();
    }
    debug!(entry = %target.name, "Deleting key entry");

    let entry = ctx.graphs.add_vertex(Vertex::KeyEntry(tombstone));
    if let Some(old) = old {
        ctx.graphs
            .add_edge(old, entry, RelationKind::ChangesTowards)?;
    }
    ctx.maps.entries.set_current(target.key, &target.name, entry);
    ctx.maps.entries.set_deleted(target.key, &target.name, entry);
    ctx.graphs
        .ensure_edge(target.key, entry, RelationKind::HasEntry)?;
    ctx.graphs
        .add_edge(target.handle, entry, RelationKind::DeletesEntry)?;
    Ok(Outcome::Applied)
}
