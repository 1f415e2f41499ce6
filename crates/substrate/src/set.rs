//! The set of active output graphs.
//!
//! Graph 0 is the full graph; every other graph is a filtered view. Each
//! mutation is applied to all of them before returning, so a view can never
//! lag behind the full graph.

use crate::graph::{Graph, VertexFilter};
use crate::relation::{Relation, RelationKind};
use crate::vertex::{Host, Process, Vertex};
use crate::{EdgeId, SubstrateError, VertexId};
use std::collections::HashMap;
use tracing::debug;

/// Keys of the content-addressed host index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HostLookup {
    Address(String),
    Name(String),
    Domain(String),
    /// A host known by none of the above.
    Anonymous,
}

impl HostLookup {
    /// Most specific non-empty identity of a host.
    fn primary(host: &Host) -> Option<HostLookup> {
        Self::all(host).into_iter().next()
    }

    fn all(host: &Host) -> Vec<HostLookup> {
        let mut keys = Vec::new();
        if !host.address.is_empty() {
            keys.push(HostLookup::Address(host.address.clone()));
        }
        if !host.name.is_empty() {
            keys.push(HostLookup::Name(host.name.to_lowercase()));
        }
        if !host.domain.is_empty() {
            keys.push(HostLookup::Domain(host.domain.to_lowercase()));
        }
        if keys.is_empty() {
            keys.push(HostLookup::Anonymous);
        }
        keys
    }
}

#[derive(Debug)]
pub struct GraphSet {
    graphs: Vec<Graph>,
    next_vertex: u64,
    next_edge: u64,
    hosts: HashMap<HostLookup, VertexId>,
    processes: HashMap<u32, VertexId>,
    current_host: VertexId,
}

impl GraphSet {
    pub const FULL: &'static str = "full";

    /// Creates the full graph holding only the current host.
    pub fn new(current: Host) -> Self {
        let mut set = Self {
            graphs: vec![Graph::new(Self::FULL, VertexFilter::All)],
            next_vertex: 0,
            next_edge: 0,
            hosts: HashMap::new(),
            processes: HashMap::new(),
            current_host: VertexId(0),
        };
        set.current_host = set.insert_host(current);
        set
    }

    pub fn graphs(&self) -> &[Graph] {
        &self.graphs
    }

    pub fn full(&self) -> &Graph {
        &self.graphs[0]
    }

    pub fn view(&self, name: &str) -> Option<&Graph> {
        self.graphs.iter().find(|g| g.name() == name)
    }

    pub fn into_graphs(self) -> Vec<Graph> {
        self.graphs
    }

    pub fn current_host(&self) -> VertexId {
        self.current_host
    }

    /// Adds a filtered view, seeded with the admitted part of the full graph.
    pub fn add_view(&mut self, name: &str, filter: VertexFilter) -> Result<(), SubstrateError> {
        if self.view(name).is_some() {
            return Err(SubstrateError::DuplicateView(name.to_string()));
        }
        let mut view = Graph::new(name, filter);
        let full = &self.graphs[0];
        for (id, vertex) in full.vertices() {
            view.insert_vertex(id, vertex);
        }
        for e in full.petgraph().edge_indices() {
            if let (Some((a, b)), Some(link)) =
                (full.petgraph().edge_endpoints(e), full.petgraph().edge_weight(e))
            {
                let (src, dst) = (full.petgraph()[a].id, full.petgraph()[b].id);
                view.insert_edge(link.id, src, dst, &link.relation);
            }
        }
        debug!(view = name, vertices = view.vertex_count(), "Added graph view");
        self.graphs.push(view);
        Ok(())
    }

    pub fn vertex(&self, id: VertexId) -> Option<&Vertex> {
        self.graphs[0].vertex(id)
    }

    pub fn add_vertex(&mut self, vertex: Vertex) -> VertexId {
        let id = VertexId(self.next_vertex);
        self.next_vertex += 1;
        for graph in &mut self.graphs {
            graph.insert_vertex(id, &vertex);
        }
        id
    }

    pub fn add_edge(
        &mut self,
        src: VertexId,
        dst: VertexId,
        relation: impl Into<Relation>,
    ) -> Result<EdgeId, SubstrateError> {
        for id in [src, dst] {
            if !self.graphs[0].contains(id) {
                return Err(SubstrateError::UnknownVertex(id));
            }
        }
        let relation = relation.into();
        let id = EdgeId(self.next_edge);
        self.next_edge += 1;
        for graph in &mut self.graphs {
            graph.insert_edge(id, src, dst, &relation);
        }
        Ok(id)
    }

    /// Adds the edge unless one of the same kind already links the pair.
    /// Returns `None` when nothing was added.
    pub fn ensure_edge(
        &mut self,
        src: VertexId,
        dst: VertexId,
        kind: RelationKind,
    ) -> Result<Option<EdgeId>, SubstrateError> {
        if self.graphs[0].has_edge(src, dst, kind) {
            return Ok(None);
        }
        self.add_edge(src, dst, kind).map(Some)
    }

    /// Mutates a vertex in every graph that holds it.
    pub fn update_vertex(
        &mut self,
        id: VertexId,
        update: impl Fn(&mut Vertex),
    ) -> Result<(), SubstrateError> {
        if !self.graphs[0].contains(id) {
            return Err(SubstrateError::UnknownVertex(id));
        }
        for graph in &mut self.graphs {
            graph.update_vertex(id, &update);
        }
        Ok(())
    }

    pub fn find_host(&self, lookup: &HostLookup) -> Option<VertexId> {
        self.hosts.get(lookup).copied()
    }

    /// Content-addressed host lookup on the most specific identity
    /// (address, then name, then domain).
    pub fn find_or_create_host(&mut self, host: Host) -> VertexId {
        if let Some(id) = HostLookup::primary(&host).and_then(|k| self.find_host(&k)) {
            return id;
        }
        self.insert_host(host)
    }

    fn insert_host(&mut self, host: Host) -> VertexId {
        let keys = HostLookup::all(&host);
        let id = self.add_vertex(Vertex::Host(host));
        for key in keys {
            self.hosts.entry(key).or_insert(id);
        }
        id
    }

    /// Returns the Process vertex for `pid`, creating it (spawned by the
    /// current host) on first sight. Missing executable or command details
    /// are filled in from later sightings.
    pub fn find_or_create_process(&mut self, process: Process) -> VertexId {
        if let Some(&id) = self.processes.get(&process.pid) {
            let incomplete = self
                .vertex(id)
                .and_then(Vertex::as_process)
                .is_some_and(|p| {
                    (p.executable.is_empty() && !process.executable.is_empty())
                        || (p.command.is_empty() && !process.command.is_empty())
                });
            if incomplete {
                let _ = self.update_vertex(id, |v| {
                    if let Some(p) = v.as_process_mut() {
                        if p.executable.is_empty() {
                            p.executable = process.executable.clone();
                        }
                        if p.command.is_empty() {
                            p.command = process.command.clone();
                        }
                    }
                });
            }
            return id;
        }
        let pid = process.pid;
        let id = self.add_vertex(Vertex::Process(process));
        self.processes.insert(pid, id);
        let host = self.current_host;
        // Both endpoints were just checked into the full graph.
        let _ = self.add_edge(host, id, RelationKind::SpawnedProcess);
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vertex::{Socket, VertexKind};

    fn current() -> Host {
        Host {
            name: "SANDBOX".into(),
            domain: "host".into(),
            platform: "Windows".into(),
            ..Default::default()
        }
    }

    fn socket() -> Vertex {
        Vertex::Socket(Socket {
            family: "InterNetwork".into(),
            protocol: "TCP".into(),
            kind: "Stream".into(),
        })
    }

    #[test]
    fn test_new_holds_current_host() {
        let set = GraphSet::new(current());
        assert_eq!(set.full().vertex_count(), 1);
        assert_eq!(
            set.find_host(&HostLookup::Name("sandbox".into())),
            Some(set.current_host())
        );
    }

    #[test]
    fn test_host_lookup_is_content_addressed() {
        let mut set = GraphSet::new(current());
        let a = set.find_or_create_host(Host::at_address("10.0.0.5"));
        let b = set.find_or_create_host(Host::at_address("10.0.0.5"));
        let c = set.find_or_create_host(Host::at_address("10.0.0.6"));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(set.full().vertices_of(VertexKind::Host).len(), 3);
    }

    #[test]
    fn test_hosts_without_identity_share_one_vertex() {
        let mut set = GraphSet::new(current());
        let a = set.find_or_create_host(Host::default());
        let b = set.find_or_create_host(Host::at_address(""));
        assert_eq!(a, b);
        assert_ne!(a, set.current_host());
        assert_eq!(set.full().vertices_of(VertexKind::Host).len(), 2);
    }

    #[test]
    fn test_process_spawned_once() {
        let mut set = GraphSet::new(current());
        let p = set.find_or_create_process(Process {
            pid: 42,
            ..Default::default()
        });
        let q = set.find_or_create_process(Process {
            pid: 42,
            executable: "C:\\evil.exe".into(),
            command: String::new(),
        });
        assert_eq!(p, q);
        assert_eq!(set.full().count_edges(RelationKind::SpawnedProcess), 1);
        assert_eq!(
            set.vertex(p).and_then(Vertex::as_process).unwrap().executable,
            "C:\\evil.exe"
        );
    }

    #[test]
    fn test_mutations_reach_every_view() {
        let mut set = GraphSet::new(current());
        set.add_view("net", VertexFilter::from_names(&["Socket", "Process"]).unwrap())
            .unwrap();
        let p = set.find_or_create_process(Process {
            pid: 1,
            ..Default::default()
        });
        let s = set.add_vertex(socket());
        set.add_edge(p, s, RelationKind::HasSocket).unwrap();

        let view = set.view("net").unwrap();
        assert_eq!(view.vertex_count(), 2);
        assert_eq!(view.edge_count(), 1);
        // SpawnedProcess has its Host endpoint outside the view.
        assert_eq!(set.full().edge_count(), 2);

        set.update_vertex(s, |v: &mut Vertex| {
            if let Vertex::Socket(sock) = v {
                sock.kind = "Datagram".into();
            }
        })
        .unwrap();
        let updated = set.view("net").unwrap().vertex(s).and_then(Vertex::as_socket);
        assert_eq!(updated.unwrap().kind, "Datagram");
    }

    #[test]
    fn test_view_is_seeded_from_full_graph() {
        let mut set = GraphSet::new(current());
        let p = set.find_or_create_process(Process {
            pid: 1,
            ..Default::default()
        });
        set.add_view("procs", VertexFilter::from_names(&["Host", "Process"]).unwrap())
            .unwrap();
        let view = set.view("procs").unwrap();
        assert!(view.has_edge(set.current_host(), p, RelationKind::SpawnedProcess));
        assert_eq!(
            set.add_view("procs", VertexFilter::All),
            Err(SubstrateError::DuplicateView("procs".into()))
        );
    }

    #[test]
    fn test_edges_require_known_endpoints() {
        let mut set = GraphSet::new(current());
        let host = set.current_host();
        assert_eq!(
            set.add_edge(host, VertexId(99), RelationKind::HasDrive),
            Err(SubstrateError::UnknownVertex(VertexId(99)))
        );
        let s = set.add_vertex(socket());
        assert!(set.ensure_edge(s, s, RelationKind::Duplicates).unwrap().is_some());
        assert!(set.ensure_edge(s, s, RelationKind::Duplicates).unwrap().is_none());
    }
}
