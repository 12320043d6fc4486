//! Resource dependency graph
//!
//! Resources live in an arena addressed by declaration index; edges point
//! from a dependency to its dependent. The graph is built once per run from
//! the catalog's relationship metaparameters and the types' autorequire
//! rules, checked for cycles, and ordered topologically with ties broken by
//! declaration order.

use crate::catalog::Catalog;
use crate::error::GraphError;
use crate::registry::Registry;
use crate::resource::{Resource, ResourceRef};
use serde::Serialize;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::fmt;

/// What an edge does besides ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeKind {
    /// Dependency is applied first
    Order,
    /// Dependency is applied first and a change in it refreshes the dependent
    Notify,
}

/// Where an edge came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeOrigin {
    /// A relationship metaparameter (`require`, `notify`, ...)
    Explicit,
    /// An autorequire rule
    Auto,
}

/// A directed edge between two resources, by index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Edge {
    pub from: usize,
    pub to: usize,
    pub kind: EdgeKind,
    pub origin: EdgeOrigin,
}

/// Resources, their relationships and the order to apply them in
#[derive(Debug)]
pub struct ResourceGraph {
    resources: Vec<Resource>,
    edges: Vec<Edge>,
    /// Per resource: indices into `edges` of incoming edges
    incoming: Vec<Vec<usize>>,
    /// Per resource: indices into `edges` of outgoing edges
    outgoing: Vec<Vec<usize>>,
    order: Vec<usize>,
}

impl ResourceGraph {
    /// Build and order the graph
    ///
    /// Fails if two resources of one type manage the same name, if a
    /// relationship names a resource missing from the catalog, or if the
    /// relationships form a cycle.
    pub fn build(catalog: Catalog, registry: &Registry) -> Result<Self, GraphError> {
        let mut graph = Self::new(catalog.into_resources());
        graph.check_name_clashes(registry)?;
        graph.add_explicit_edges(registry)?;
        graph.add_autorequire_edges(registry);

        if let Some(cycle) = graph.find_cycle() {
            return Err(GraphError::Cycle {
                cycle: cycle
                    .into_iter()
                    .map(|i| graph.resources[i].reference().clone())
                    .collect(),
            });
        }

        graph.order = graph.topological_order();
        log::debug!(
            "graph: {} resources, {} edges",
            graph.resources.len(),
            graph.edges.len()
        );
        Ok(graph)
    }

    fn new(resources: Vec<Resource>) -> Self {
        let n = resources.len();
        Self {
            resources,
            edges: Vec::new(),
            incoming: vec![Vec::new(); n],
            outgoing: vec![Vec::new(); n],
            order: Vec::new(),
        }
    }

    /// Titles are unique per type already; names must be too
    fn check_name_clashes(&self, registry: &Registry) -> Result<(), GraphError> {
        let mut seen: HashMap<(&str, &str), usize> = HashMap::new();
        for (i, resource) in self.resources.iter().enumerate() {
            let Some(ty) = registry.get(resource.type_name()) else {
                continue;
            };
            let key = (resource.type_name(), resource.name_value(ty.namevar));
            if let Some(&first) = seen.get(&key) {
                return Err(GraphError::DuplicateName {
                    type_name: key.0.to_string(),
                    name: key.1.to_string(),
                    first: self.resources[first].reference().clone(),
                    second: resource.reference().clone(),
                });
            }
            seen.insert(key, i);
        }
        Ok(())
    }

    /// Index of each resource by reference and by type plus name
    fn name_index(&self, registry: &Registry) -> HashMap<(String, String), usize> {
        let mut index = HashMap::new();
        for (i, resource) in self.resources.iter().enumerate() {
            let key = (resource.type_name().to_string(), resource.title().to_string());
            index.entry(key).or_insert(i);
        }
        // Names are aliases; titles win when both match
        for (i, resource) in self.resources.iter().enumerate() {
            if let Some(ty) = registry.get(resource.type_name()) {
                let key = (
                    resource.type_name().to_string(),
                    resource.name_value(ty.namevar).to_string(),
                );
                index.entry(key).or_insert(i);
            }
        }
        index
    }

    fn add_explicit_edges(&mut self, registry: &Registry) -> Result<(), GraphError> {
        let index = self.name_index(registry);
        let find = |source: &ResourceRef, metaparam: &'static str, target: &ResourceRef| {
            index
                .get(&(target.type_name.clone(), target.title.clone()))
                .copied()
                .ok_or_else(|| GraphError::MissingReference {
                    source_ref: source.clone(),
                    metaparam,
                    target: target.clone(),
                })
        };

        let mut pending = Vec::new();
        for (i, resource) in self.resources.iter().enumerate() {
            let meta = resource.meta();
            let source = resource.reference();
            for target in &meta.require {
                pending.push((find(source, "require", target)?, i, EdgeKind::Order));
            }
            for target in &meta.subscribe {
                pending.push((find(source, "subscribe", target)?, i, EdgeKind::Notify));
            }
            for target in &meta.before {
                pending.push((i, find(source, "before", target)?, EdgeKind::Order));
            }
            for target in &meta.notify {
                pending.push((i, find(source, "notify", target)?, EdgeKind::Notify));
            }
        }

        for (from, to, kind) in pending {
            self.add_edge(from, to, kind, EdgeOrigin::Explicit);
        }
        Ok(())
    }

    fn add_autorequire_edges(&mut self, registry: &Registry) {
        let index = self.name_index(registry);
        let lookup = |type_name: &str, name: &str| {
            index
                .get(&(type_name.to_string(), name.to_string()))
                .copied()
        };

        let mut pending = Vec::new();
        for (i, resource) in self.resources.iter().enumerate() {
            let Some(ty) = registry.get(resource.type_name()) else {
                continue;
            };
            for rule in &ty.autorequire {
                for dep in rule.targets(resource, ty.namevar, lookup) {
                    if dep == i || self.has_explicit_between(dep, i) {
                        continue;
                    }
                    log::trace!(
                        "autorequire: {} -> {}",
                        self.resources[dep].reference(),
                        resource.reference()
                    );
                    pending.push((dep, i));
                }
            }
        }

        for (from, to) in pending {
            self.add_edge(from, to, EdgeKind::Order, EdgeOrigin::Auto);
        }
    }

    fn has_explicit_between(&self, a: usize, b: usize) -> bool {
        self.outgoing[a]
            .iter()
            .chain(&self.outgoing[b])
            .map(|&e| &self.edges[e])
            .any(|e| {
                e.origin == EdgeOrigin::Explicit
                    && ((e.from == a && e.to == b) || (e.from == b && e.to == a))
            })
    }

    /// Add an edge, merging with an existing edge between the same pair
    ///
    /// Notify wins over order and explicit over automatic.
    fn add_edge(&mut self, from: usize, to: usize, kind: EdgeKind, origin: EdgeOrigin) {
        if let Some(&existing) = self.outgoing[from]
            .iter()
            .find(|&&e| self.edges[e].to == to)
        {
            let edge = &mut self.edges[existing];
            edge.kind = edge.kind.max(kind);
            if origin == EdgeOrigin::Explicit {
                edge.origin = EdgeOrigin::Explicit;
            }
            return;
        }

        let id = self.edges.len();
        self.edges.push(Edge {
            from,
            to,
            kind,
            origin,
        });
        self.outgoing[from].push(id);
        self.incoming[to].push(id);
    }

    fn successors_sorted(&self, node: usize) -> Vec<usize> {
        let mut succ: Vec<usize> = self.outgoing[node]
            .iter()
            .map(|&e| self.edges[e].to)
            .collect();
        succ.sort_unstable();
        succ
    }

    /// Depth-first search for a cycle, visiting in declaration order
    ///
    /// Returns the resources on the cycle in edge order.
    fn find_cycle(&self) -> Option<Vec<usize>> {
        #[derive(Clone, Copy, PartialEq, Eq)]
        enum Mark {
            Unvisited,
            InProgress,
            Done,
        }

        let n = self.resources.len();
        let mut marks = vec![Mark::Unvisited; n];

        for start in 0..n {
            if marks[start] != Mark::Unvisited {
                continue;
            }

            // (node, successors, next successor position)
            let mut stack: Vec<(usize, Vec<usize>, usize)> =
                vec![(start, self.successors_sorted(start), 0)];
            marks[start] = Mark::InProgress;

            while let Some((node, succ, pos)) = stack.last_mut() {
                let Some(&next) = succ.get(*pos) else {
                    marks[*node] = Mark::Done;
                    stack.pop();
                    continue;
                };
                *pos += 1;

                match marks[next] {
                    Mark::Unvisited => {
                        marks[next] = Mark::InProgress;
                        stack.push((next, self.successors_sorted(next), 0));
                    }
                    Mark::InProgress => {
                        let from = stack
                            .iter()
                            .position(|(n, _, _)| *n == next)
                            .unwrap_or(0);
                        return Some(stack[from..].iter().map(|(n, _, _)| *n).collect());
                    }
                    Mark::Done => {}
                }
            }
        }
        None
    }

    /// Kahn's algorithm; among ready resources the earliest declared goes first
    fn topological_order(&self) -> Vec<usize> {
        let n = self.resources.len();
        let mut in_degree: Vec<usize> = self.incoming.iter().map(Vec::len).collect();
        let mut ready: BinaryHeap<Reverse<usize>> = (0..n)
            .filter(|&i| in_degree[i] == 0)
            .map(Reverse)
            .collect();

        let mut order = Vec::with_capacity(n);
        while let Some(Reverse(node)) = ready.pop() {
            order.push(node);
            for &e in &self.outgoing[node] {
                let to = self.edges[e].to;
                in_degree[to] -= 1;
                if in_degree[to] == 0 {
                    ready.push(Reverse(to));
                }
            }
        }
        order
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn resource(&self, index: usize) -> &Resource {
        &self.resources[index]
    }

    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Resource indices in application order
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    pub fn index_of(&self, reference: &ResourceRef) -> Option<usize> {
        self.resources.iter().position(|r| r.reference() == reference)
    }

    /// Edges into `index`
    pub fn predecessors(&self, index: usize) -> impl Iterator<Item = &Edge> {
        self.incoming[index].iter().map(|&e| &self.edges[e])
    }

    /// Edges out of `index`
    pub fn successors(&self, index: usize) -> impl Iterator<Item = &Edge> {
        self.outgoing[index].iter().map(|&e| &self.edges[e])
    }

    /// Display adapter for one edge
    pub fn describe(&self, edge: &Edge) -> EdgeDisplay<'_> {
        EdgeDisplay { graph: self, edge: *edge }
    }
}

/// `File[/a] => File[/b] (notify)`
pub struct EdgeDisplay<'a> {
    graph: &'a ResourceGraph,
    edge: Edge,
}

impl fmt::Display for EdgeDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let arrow = match self.edge.kind {
            EdgeKind::Order => "->",
            EdgeKind::Notify => "~>",
        };
        write!(
            f,
            "{} {arrow} {}",
            self.graph.resources[self.edge.from].reference(),
            self.graph.resources[self.edge.to].reference()
        )?;
        if self.edge.origin == EdgeOrigin::Auto {
            write!(f, " (autorequire)")?;
        }
        Ok(())
    }
}
