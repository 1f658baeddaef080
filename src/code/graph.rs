//! Dependency graph over code units.
//!
//! Built wholesale from one indexing run with `petgraph`. An edge `u → v`
//! means `u` references `v`: a module points at the modules it imports, and
//! members and their module point at each other. Dependencies that do not
//! resolve to a module of the same run are dropped, so the graph never has
//! dangling edges.

use std::collections::{HashMap, HashSet, VecDeque};

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;

use crate::memory::types::{CodeMeta, CodeUnitKind, FragmentId};

#[derive(Debug, Clone)]
pub struct UnitNode {
    pub unit: String,
    pub fragment: FragmentId,
}

/// A node reached by [`DependencyGraph::traverse`], with its hop count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reached {
    pub fragment: FragmentId,
    pub unit: String,
    pub depth: usize,
}

#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    graph: DiGraph<UnitNode, ()>,
    by_unit: HashMap<String, NodeIndex>,
    by_fragment: HashMap<FragmentId, NodeIndex>,
}

impl DependencyGraph {
    pub fn build<'a>(units: impl IntoIterator<Item = (&'a FragmentId, &'a CodeMeta)>) -> Self {
        let mut g = Self::default();
        let mut metas: Vec<&CodeMeta> = Vec::new();

        for (fragment, meta) in units {
            if g.by_unit.contains_key(&meta.unit) {
                tracing::debug!(unit = %meta.unit, "duplicate code unit in run, keeping first");
                continue;
            }
            let idx = g.graph.add_node(UnitNode {
                unit: meta.unit.clone(),
                fragment: fragment.clone(),
            });
            g.by_unit.insert(meta.unit.clone(), idx);
            g.by_fragment.insert(fragment.clone(), idx);
            metas.push(meta);
        }

        let modules: Vec<&str> = metas
            .iter()
            .filter(|m| m.kind == CodeUnitKind::Module)
            .map(|m| m.unit.as_str())
            .collect();

        for meta in &metas {
            let Some(&from) = g.by_unit.get(&meta.unit) else {
                continue;
            };
            match meta.kind {
                CodeUnitKind::Module => {
                    for dep in &meta.dependencies {
                        for target in resolve_dependency(&modules, dep) {
                            if target == meta.unit {
                                continue;
                            }
                            if let Some(&to) = g.by_unit.get(target) {
                                g.graph.update_edge(from, to, ());
                            }
                        }
                    }
                }
                _ => {
                    if let Some(&module) = g.by_unit.get(&meta.module) {
                        g.graph.update_edge(from, module, ());
                        g.graph.update_edge(module, from, ());
                    }
                }
            }
        }

        tracing::debug!(
            nodes = g.graph.node_count(),
            edges = g.graph.edge_count(),
            "dependency graph built"
        );
        g
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn contains_fragment(&self, fragment: &FragmentId) -> bool {
        self.by_fragment.contains_key(fragment)
    }

    /// Module units that import `module`.
    pub fn dependents(&self, module: &str) -> Vec<String> {
        let Some(&idx) = self.by_unit.get(module) else {
            return Vec::new();
        };
        let mut out: Vec<String> = self
            .graph
            .neighbors_directed(idx, Direction::Incoming)
            .filter_map(|n| self.graph.node_weight(n))
            .filter(|n| !n.unit.contains("::"))
            .map(|n| n.unit.clone())
            .collect();
        out.sort();
        out
    }

    /// Breadth-first walk from `seeds` along outgoing and incoming edges,
    /// at most `depth` hops. Seeds come first; every node appears once.
    pub fn traverse(&self, seeds: &[FragmentId], depth: usize) -> Vec<Reached> {
        let mut visited: HashSet<NodeIndex> = HashSet::new();
        let mut queue: VecDeque<(NodeIndex, usize)> = VecDeque::new();
        let mut out = Vec::new();

        for seed in seeds {
            if let Some(&idx) = self.by_fragment.get(seed) {
                if visited.insert(idx) {
                    queue.push_back((idx, 0));
                    self.push_reached(&mut out, idx, 0);
                }
            }
        }

        while let Some((idx, hops)) = queue.pop_front() {
            if hops >= depth {
                continue;
            }
            let neighbors = self
                .graph
                .neighbors_directed(idx, Direction::Outgoing)
                .chain(self.graph.neighbors_directed(idx, Direction::Incoming));
            for next in neighbors {
                if visited.insert(next) {
                    self.push_reached(&mut out, next, hops + 1);
                    queue.push_back((next, hops + 1));
                }
            }
        }

        out
    }

    fn push_reached(&self, out: &mut Vec<Reached>, idx: NodeIndex, depth: usize) {
        if let Some(node) = self.graph.node_weight(idx) {
            out.push(Reached {
                fragment: node.fragment.clone(),
                unit: node.unit.clone(),
                depth,
            });
        }
    }
}

/// Modules that a declared dependency `dep` refers to: an exact match, or a
/// module whose dotted name ends with `.dep` (relative or partial imports).
pub fn resolve_dependency<'a>(modules: &[&'a str], dep: &str) -> Vec<&'a str> {
    let suffix = format!(".{dep}");
    modules
        .iter()
        .copied()
        .filter(|m| *m == dep || m.ends_with(&suffix))
        .collect()
}
