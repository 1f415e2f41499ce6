//! Filesystem-vertex index.
//!
//! Files and directories hang off a host: `Host -HasDrive-> "C:"`, then
//! `Directory -Contains-> Directory | File` for every further segment.
//! Segment names are matched case-insensitively.

use crate::graph::Graph;
use crate::relation::RelationKind;
use crate::set::GraphSet;
use crate::vertex::{Directory, File, Vertex};
use crate::{SubstrateError, VertexId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsKind {
    Directory,
    File,
}

const FORBIDDEN: &[char] = &['<', '>', '"', '|', '?', '*'];

/// Splits an absolute Windows path into `[drive, segment, ...]`.
///
/// Accepts surrounding quotes, the `\\?\` and `\??\` prefixes and forward
/// slashes. Returns `None` for anything that is not a drive-letter path.
pub fn split_path(raw: &str) -> Option<Vec<String>> {
    let mut path = raw.trim();
    if path.len() >= 2 && path.starts_with('"') && path.ends_with('"') {
        path = &path[1..path.len() - 1];
    }
    let path = path
        .strip_prefix(r"\\?\")
        .or_else(|| path.strip_prefix(r"\??\"))
        .unwrap_or(path)
        .replace('/', "\\");

    let mut chars = path.chars();
    let letter = chars.next()?;
    if !letter.is_ascii_alphabetic() || chars.next()? != ':' {
        return None;
    }
    let rest = chars.as_str();
    if !(rest.is_empty() || rest.starts_with('\\')) || rest.contains(FORBIDDEN) {
        return None;
    }

    let mut segments = vec![format!("{}:", letter.to_ascii_uppercase())];
    for part in rest.split('\\') {
        match part {
            "" | "." => {}
            ".." => {
                if segments.len() > 1 {
                    segments.pop();
                }
            }
            name => segments.push(name.to_string()),
        }
    }
    Some(segments)
}

/// Child of `parent` named `name`: a drive when `parent` is a host,
/// a directory entry otherwise.
pub fn child_named(graph: &Graph, parent: VertexId, name: &str) -> Option<VertexId> {
    let relation = match graph.vertex(parent)? {
        Vertex::Host(_) => RelationKind::HasDrive,
        _ => RelationKind::Contains,
    };
    let wanted = name.to_lowercase();
    graph
        .outgoing(parent, relation)
        .into_iter()
        .find(|id| {
            graph
                .vertex(*id)
                .and_then(Vertex::fs_name)
                .is_some_and(|n| n.to_lowercase() == wanted)
        })
}

/// Follows `segments` from `host`; `None` unless every segment resolves.
pub fn walk_from_host(graph: &Graph, host: VertexId, segments: &[String]) -> Option<VertexId> {
    if segments.is_empty() {
        return None;
    }
    segments
        .iter()
        .try_fold(host, |at, name| child_named(graph, at, name))
}

/// Declares a filesystem object under the current host, creating missing
/// directories along the way. A File that gains children becomes a Directory.
pub fn declare_path(
    set: &mut GraphSet,
    raw: &str,
    kind: FsKind,
) -> Result<Option<VertexId>, SubstrateError> {
    let Some(segments) = split_path(raw) else {
        return Ok(None);
    };
    let mut at = set.current_host();
    let last = segments.len() - 1;
    for (i, name) in segments.iter().enumerate() {
        let wants_dir = i < last || kind == FsKind::Directory;
        at = match child_named(set.full(), at, name) {
            Some(existing) => {
                let is_file = matches!(set.vertex(existing), Some(Vertex::File(_)));
                if wants_dir && is_file {
                    set.update_vertex(existing, |v| {
                        if let Vertex::File(f) = v {
                            let name = f.name.clone();
                            *v = Vertex::Directory(Directory { name });
                        }
                    })?;
                }
                existing
            }
            None => {
                let vertex = if wants_dir || i == 0 {
                    Vertex::Directory(Directory { name: name.clone() })
                } else {
                    Vertex::File(File { name: name.clone() })
                };
                let relation = if i == 0 {
                    RelationKind::HasDrive
                } else {
                    RelationKind::Contains
                };
                let id = set.add_vertex(vertex);
                set.add_edge(at, id, relation)?;
                id
            }
        };
    }
    Ok(Some(at))
}
