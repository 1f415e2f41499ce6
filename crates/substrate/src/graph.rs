//! A single output graph.
//!
//! Backed by petgraph's `StableDiGraph` so indices survive vertex removal.
//! A graph only ever holds vertices its `VertexFilter` admits, and only
//! edges whose two endpoints it holds.

use crate::relation::{Relation, RelationKind};
use crate::vertex::{Vertex, VertexKind};
use crate::{EdgeId, SubstrateError, VertexId};
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::collections::{BTreeMap, HashMap, HashSet};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VertexFilter {
    All,
    Kinds(HashSet<VertexKind>),
}

impl VertexFilter {
    /// Builds a filter from kind names (see `VertexKind::from_str`).
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self, SubstrateError> {
        let kinds = names
            .iter()
            .map(|n| n.as_ref().parse::<VertexKind>())
            .collect::<Result<HashSet<_>, _>>()?;
        Ok(VertexFilter::Kinds(kinds))
    }

    pub fn admits(&self, kind: VertexKind) -> bool {
        match self {
            VertexFilter::All => true,
            VertexFilter::Kinds(kinds) => kinds.contains(&kind),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    pub id: VertexId,
    pub vertex: Vertex,
}

#[derive(Debug, Clone)]
pub struct Link {
    pub id: EdgeId,
    pub relation: Relation,
}

#[derive(Debug, Clone)]
pub struct Graph {
    name: String,
    filter: VertexFilter,
    inner: StableDiGraph<Node, Link>,
    index: HashMap<VertexId, NodeIndex>,
}

impl Graph {
    pub fn new(name: &str, filter: VertexFilter) -> Self {
        Self {
            name: name.to_string(),
            filter,
            inner: StableDiGraph::new(),
            index: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn filter(&self) -> &VertexFilter {
        &self.filter
    }

    /// Underlying petgraph storage, for traversal algorithms.
    pub fn petgraph(&self) -> &StableDiGraph<Node, Link> {
        &self.inner
    }

    pub(crate) fn insert_vertex(&mut self, id: VertexId, vertex: &Vertex) -> bool {
        if !self.filter.admits(vertex.kind()) || self.index.contains_key(&id) {
            return false;
        }
        let ix = self.inner.add_node(Node {
            id,
            vertex: vertex.clone(),
        });
        self.index.insert(id, ix);
        true
    }

    pub(crate) fn insert_edge(
        &mut self,
        id: EdgeId,
        src: VertexId,
        dst: VertexId,
        relation: &Relation,
    ) -> bool {
        match (self.index.get(&src), self.index.get(&dst)) {
            (Some(&a), Some(&b)) => {
                self.inner.add_edge(
                    a,
                    b,
                    Link {
                        id,
                        relation: relation.clone(),
                    },
                );
                true
            }
            _ => false,
        }
    }

    pub(crate) fn remove_vertex(&mut self, id: VertexId) -> bool {
        match self.index.remove(&id) {
            Some(ix) => self.inner.remove_node(ix).is_some(),
            None => false,
        }
    }

    /// Applies `update` to this graph's copy of the vertex. A vertex whose
    /// kind stops being admitted leaves the graph along with its edges.
    pub(crate) fn update_vertex(&mut self, id: VertexId, update: &dyn Fn(&mut Vertex)) {
        let Some(&ix) = self.index.get(&id) else {
            return;
        };
        let admitted = match self.inner.node_weight_mut(ix) {
            Some(node) => {
                update(&mut node.vertex);
                self.filter.admits(node.vertex.kind())
            }
            None => return,
        };
        if !admitted {
            self.remove_vertex(id);
        }
    }

    pub fn contains(&self, id: VertexId) -> bool {
        self.index.contains_key(&id)
    }

    pub fn vertex(&self, id: VertexId) -> Option<&Vertex> {
        let ix = self.index.get(&id)?;
        self.inner.node_weight(*ix).map(|n| &n.vertex)
    }

    pub fn vertex_count(&self) -> usize {
        self.inner.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.inner.edge_count()
    }

    pub fn vertices(&self) -> impl Iterator<Item = (VertexId, &Vertex)> + '_ {
        self.inner
            .node_indices()
            .filter_map(move |ix| self.inner.node_weight(ix))
            .map(|n| (n.id, &n.vertex))
    }

    /// Every edge as `(source, target, relation)`.
    pub fn edges(&self) -> impl Iterator<Item = (VertexId, VertexId, &Relation)> + '_ {
        self.inner.edge_indices().filter_map(move |e| {
            let (a, b) = self.inner.edge_endpoints(e)?;
            let link = self.inner.edge_weight(e)?;
            Some((self.inner[a].id, self.inner[b].id, &link.relation))
        })
    }

    fn neighbors(&self, id: VertexId, kind: RelationKind, dir: Direction) -> Vec<VertexId> {
        let Some(&ix) = self.index.get(&id) else {
            return Vec::new();
        };
        let mut found: Vec<VertexId> = self
            .inner
            .edges_directed(ix, dir)
            .filter(|e| e.weight().relation.kind == kind)
            .map(|e| {
                let other = if dir == Direction::Outgoing {
                    e.target()
                } else {
                    e.source()
                };
                self.inner[other].id
            })
            .collect();
        found.sort();
        found.dedup();
        found
    }

    /// Targets of `kind` edges leaving `id`, in creation order.
    pub fn outgoing(&self, id: VertexId, kind: RelationKind) -> Vec<VertexId> {
        self.neighbors(id, kind, Direction::Outgoing)
    }

    /// Sources of `kind` edges entering `id`, in creation order.
    pub fn incoming(&self, id: VertexId, kind: RelationKind) -> Vec<VertexId> {
        self.neighbors(id, kind, Direction::Incoming)
    }

    pub fn has_edge(&self, src: VertexId, dst: VertexId, kind: RelationKind) -> bool {
        self.relations_between(src, dst)
            .iter()
            .any(|r| r.kind == kind)
    }

    pub fn relations_between(&self, src: VertexId, dst: VertexId) -> Vec<&Relation> {
        match (self.index.get(&src), self.index.get(&dst)) {
            (Some(&a), Some(&b)) => self
                .inner
                .edges_connecting(a, b)
                .map(|e| &e.weight().relation)
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn count_edges(&self, kind: RelationKind) -> usize {
        self.edges().filter(|(_, _, r)| r.kind == kind).count()
    }

    pub fn vertices_of(&self, kind: VertexKind) -> Vec<VertexId> {
        let mut ids: Vec<VertexId> = self
            .vertices()
            .filter(|(_, v)| v.kind() == kind)
            .map(|(id, _)| id)
            .collect();
        ids.sort();
        ids
    }

    pub fn vertex_histogram(&self) -> BTreeMap<VertexKind, usize> {
        let mut counts = BTreeMap::new();
        for (_, v) in self.vertices() {
            *counts.entry(v.kind()).or_insert(0) += 1;
        }
        counts
    }

    pub fn edge_histogram(&self) -> BTreeMap<RelationKind, usize> {
        let mut counts = BTreeMap::new();
        for (_, _, r) in self.edges() {
            *counts.entry(r.kind).or_insert(0) += 1;
        }
        counts
    }
}
