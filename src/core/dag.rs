//! Step dependency graph.
//!
//! The graph is built once while a plan is validated and is never mutated
//! during execution. Nodes are step declaration indices; an edge `a → b`
//! means `b` waits for `a` to reach a terminal status.

use crate::core::step::StepKey;
use crate::error::PlanError;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// Why one step depends on another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyKind {
    /// No explicit dependencies: wait for the preceding step.
    Sequential,
    /// Listed in `dependsOn`.
    Declared,
    /// A parameter or condition reads the other step's output.
    Data,
}

impl std::fmt::Display for DependencyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DependencyKind::Sequential => write!(f, "sequential"),
            DependencyKind::Declared => write!(f, "declared"),
            DependencyKind::Data => write!(f, "data"),
        }
    }
}

pub struct StepGraph {
    graph: DiGraph<StepKey, DependencyKind>,
    /// Declaration index → node.
    nodes: Vec<NodeIndex>,
}

impl StepGraph {
    /// Create a graph with one node per step and no edges.
    pub fn new(keys: Vec<StepKey>) -> Self {
        let mut graph = DiGraph::new();
        let nodes = keys.into_iter().map(|key| graph.add_node(key)).collect();
        Self { graph, nodes }
    }

    pub fn step_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn dependency_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Record that `to` waits for `from`. A repeated edge keeps its first kind.
    ///
    /// Cycles are not rejected here; call [`StepGraph::check_acyclic`] once
    /// all edges are in.
    pub fn add_dependency(&mut self, from: usize, to: usize, kind: DependencyKind) {
        let (Some(&a), Some(&b)) = (self.nodes.get(from), self.nodes.get(to)) else {
            return;
        };
        if self.graph.find_edge(a, b).is_none() {
            self.graph.add_edge(a, b, kind);
        }
    }

    pub fn get_dependency(&self, from: usize, to: usize) -> Option<DependencyKind> {
        let (&a, &b) = (self.nodes.get(from)?, self.nodes.get(to)?);
        let edge = self.graph.find_edge(a, b)?;
        self.graph.edge_weight(edge).copied()
    }

    /// Fails with [`PlanError::CyclicDependency`] naming a step on a cycle.
    pub fn check_acyclic(&self) -> Result<(), PlanError> {
        toposort(&self.graph, None).map(|_| ()).map_err(|cycle| {
            let label = self
                .graph
                .node_weight(cycle.node_id())
                .map(|k| k.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            PlanError::CyclicDependency(label)
        })
    }

    fn neighbors(&self, index: usize, direction: Direction) -> Vec<usize> {
        let Some(&node) = self.nodes.get(index) else {
            return Vec::new();
        };
        let mut found: Vec<usize> = self
            .graph
            .neighbors_directed(node, direction)
            .map(|n| n.index())
            .collect();
        found.sort_unstable();
        found.dedup();
        found
    }

    /// Steps `index` waits for, ascending by declaration index.
    pub fn dependencies(&self, index: usize) -> Vec<usize> {
        self.neighbors(index, Direction::Incoming)
    }

    /// Steps waiting for `index`, ascending by declaration index.
    pub fn dependents(&self, index: usize) -> Vec<usize> {
        self.neighbors(index, Direction::Outgoing)
    }

    /// Topological order with ties broken by declaration index.
    ///
    /// Kahn's algorithm over a min-heap, so independent steps keep their
    /// declared order. Assumes the graph is acyclic.
    pub fn execution_order(&self) -> Vec<usize> {
        let mut in_degree: Vec<usize> = (0..self.nodes.len())
            .map(|i| self.dependencies(i).len())
            .collect();
        let mut ready: BinaryHeap<Reverse<usize>> = in_degree
            .iter()
            .enumerate()
            .filter(|&(_, &d)| d == 0)
            .map(|(i, _)| Reverse(i))
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(Reverse(index)) = ready.pop() {
            order.push(index);
            for dependent in self.dependents(index) {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    ready.push(Reverse(dependent));
                }
            }
        }
        order
    }
}

impl std::fmt::Debug for StepGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepGraph")
            .field("steps", &self.step_count())
            .field("dependencies", &self.dependency_count())
            .finish()
    }
}
