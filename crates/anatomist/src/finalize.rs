//! # Finalization Pass
//!
//! Links registry entries to the files and directories their values name.
//! Runs once the whole trace is in the graph, since a value may be written
//! before the file it references is declared.

use crate::cmdline::split_command_line;
use crate::AnatomistError;
use std::collections::BTreeSet;
use substrate::fs::{split_path, walk_from_host};
use substrate::{GraphSet, RelationKind, Vertex, VertexId};
use tracing::{debug, info};

pub const PHASE_NAME: &str = "filesystem-references";

/// Adds `ReferencesFileSystem` edges from modified string entries to the
/// filesystem vertices their values resolve to. Idempotent.
///
/// Only `REG_SZ` and `REG_MULTI_SZ` entries with an incoming `SetsEntry` or
/// `DeletesEntry` edge are considered. Each string is kept as-is and also
/// split as a command line; every distinct candidate that parses as an
/// absolute path is walked from the current host.
pub fn find_filesystem_references(graphs: &mut GraphSet) -> Result<usize, AnatomistError> {
    let host = graphs.current_host();
    let full = graphs.full();
    let mut links: Vec<(VertexId, VertexId)> = Vec::new();
    let mut scanned = 0usize;

    for (id, vertex) in full.vertices() {
        let Vertex::KeyEntry(entry) = vertex else {
            continue;
        };
        if !entry.reg_type().is_textual() {
            continue;
        }
        let modified = !full.incoming(id, RelationKind::SetsEntry).is_empty()
            || !full.incoming(id, RelationKind::DeletesEntry).is_empty();
        if !modified {
            continue;
        }
        scanned += 1;

        let mut candidates = BTreeSet::new();
        for value in entry.data.strings() {
            match split_command_line(value) {
                Ok(tokens) => candidates.extend(tokens),
                Err(e) => debug!(entry = %entry.name, error = %e, "Value is not a command line"),
            }
            candidates.insert(value.to_string());
        }
        for candidate in &candidates {
            let Some(segments) = split_path(candidate) else {
                continue;
            };
            if let Some(target) = walk_from_host(full, host, &segments) {
                links.push((id, target));
            }
        }
    }

    let mut added = 0;
    for (entry, target) in links {
        if graphs
            .ensure_edge(entry, target, RelationKind::ReferencesFileSystem)?
            .is_some()
        {
            added += 1;
        }
    }
    info!(entries = scanned, references = added, "Resolved filesystem references");
    Ok(added)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;
    use substrate::fs::FsKind;
    use substrate::VertexKind;

    const KEY: &str = r"HKLM\Software\Test";

    fn file_vertex(session: &crate::BuildSession, name: &str) -> VertexId {
        let full = session.graphs().full();
        full.vertices()
            .find(|(_, v)| v.fs_name() == Some(name))
            .map(|(id, _)| id)
            .unwrap()
    }

    fn finalize(session: &mut crate::BuildSession) -> usize {
        let token = session.finish_ingestion().unwrap();
        session.run_finalizers(token).unwrap().edges_added
    }

    #[test]
    fn test_set_value_references_declared_file() {
        let mut session = session();
        session
            .declare_path(r"C:\data\file.txt", FsKind::File)
            .unwrap();
        ingest(&mut session, open_key(0x40, KEY));
        ingest(&mut session, set_value(0x40, &format!(r"{KEY}\Path"), "REG_SZ", r"C:\data\file.txt"));

        assert_eq!(finalize(&mut session), 1);
        let full = session.graphs().full();
        let entry = full.vertices_of(VertexKind::KeyEntry)[0];
        let file = file_vertex(&session, "file.txt");
        assert_eq!(full.outgoing(entry, RelationKind::ReferencesFileSystem), vec![file]);
    }

    #[test]
    fn test_unresolvable_path_adds_nothing() {
        let mut session = session();
        session
            .declare_path(r"C:\data\file.txt", FsKind::File)
            .unwrap();
        ingest(&mut session, open_key(0x40, KEY));
        ingest(&mut session, set_value(0x40, &format!(r"{KEY}\Path"), "REG_SZ", r"C:\missing\file.txt"));
        assert_eq!(finalize(&mut session), 0);
        assert_eq!(
            session
                .graphs()
                .full()
                .count_edges(RelationKind::ReferencesFileSystem),
            0
        );
    }

    #[test]
    fn test_rerun_on_same_set_is_idempotent() {
        let mut session = session();
        session.declare_path(r"C:\Windows\System32", FsKind::Directory).unwrap();
        ingest(&mut session, open_key(0x40, KEY));
        ingest(&mut session, set_value(0x40, &format!(r"{KEY}\Dir"), "REG_SZ", r"\??\C:\Windows\System32"));
        session.finish_ingestion().unwrap();

        let graphs = session.graphs_mut();
        assert_eq!(find_filesystem_references(graphs).unwrap(), 1);
        assert_eq!(find_filesystem_references(graphs).unwrap(), 0);
        assert_eq!(graphs.full().count_edges(RelationKind::ReferencesFileSystem), 1);
    }

    #[test]
    fn test_command_line_and_multi_string_candidates() {
        let mut session = session();
        session.declare_path(r"C:\Program Files\app\app.exe", FsKind::File).unwrap();
        session.declare_path(r"C:\temp\payload.dll", FsKind::File).unwrap();
        ingest(&mut session, open_key(0x40, KEY));
        ingest(
            &mut session,
            set_value(0x40, &format!(r"{KEY}\Cmd"), "REG_SZ", r#""C:\Program Files\app\app.exe" /quiet"#),
        );
        ingest(
            &mut session,
            set_value(0x40, &format!(r"{KEY}\Dlls"), "REG_MULTI_SZ", "C:\\temp\\payload.dll\0C:\\nope.dll\0"),
        );
        assert_eq!(finalize(&mut session), 2);
    }

    #[test]
    fn test_only_modified_string_entries_count() {
        let mut session = session();
        session.declare_path(r"C:\data\file.txt", FsKind::File).unwrap();
        ingest(&mut session, open_key(0x40, KEY));
        // Read but never written.
        ingest(&mut session, query_value(0x40, &format!(r"{KEY}\A"), "REG_SZ", r"C:\data\file.txt"));
        // Written, but an expandable string.
        ingest(&mut session, set_value(0x40, &format!(r"{KEY}\B"), "REG_EXPAND_SZ", r"C:\data\file.txt"));
        assert_eq!(finalize(&mut session), 0);
    }

    #[test]
    fn test_deleted_entry_keeps_reference() {
        let mut session = session();
        session.declare_path(r"C:\data\file.txt", FsKind::File).unwrap();
        ingest(&mut session, open_key(0x40, KEY));
        ingest(&mut session, query_value(0x40, &format!(r"{KEY}\A"), "REG_SZ", r"C:\data\file.txt"));
        ingest(&mut session, delete_value(0x40, &format!(r"{KEY}\A")));
        assert_eq!(finalize(&mut session), 1);
    }
}
