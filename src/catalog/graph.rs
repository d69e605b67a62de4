//! Schema reference graph
//!
//! Nodes are schema documents, edges point from a document to the documents
//! owning the subjects it references. The load order is a depth-first
//! post-order over this graph, so referenced documents always come first.

use std::collections::HashMap;

use petgraph::graph::{DiGraph, NodeIndex};
use tracing::debug;

use crate::error::{Error, Result};
use crate::schema::SchemaDescriptor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    Visiting,
    Visited,
}

/// One level of the explicit depth-first stack
struct Frame {
    node: NodeIndex,
    targets: Vec<NodeIndex>,
    next: usize,
}

/// Dependency graph between schema documents
#[derive(Debug)]
pub struct ReferenceGraph {
    graph: DiGraph<usize, ()>,
    labels: Vec<String>,
}

impl ReferenceGraph {
    /// Build the graph from scanned documents and the subject index
    /// (subject -> position in `descriptors`).
    ///
    /// Fails with `UnknownReference` when a document references a subject no
    /// document derives.
    pub fn build(descriptors: &[SchemaDescriptor], index: &HashMap<String, usize>) -> Result<Self> {
        let mut graph = DiGraph::with_capacity(descriptors.len(), descriptors.len() * 2);
        let nodes: Vec<NodeIndex> = (0..descriptors.len()).map(|i| graph.add_node(i)).collect();

        for (position, descriptor) in descriptors.iter().enumerate() {
            for reference in &descriptor.references {
                let target = index.get(reference).ok_or_else(|| Error::UnknownReference {
                    subject: descriptor.label().to_string(),
                    reference: reference.clone(),
                })?;
                if !graph.contains_edge(nodes[position], nodes[*target]) {
                    graph.add_edge(nodes[position], nodes[*target], ());
                }
            }
        }

        Ok(Self {
            graph,
            labels: descriptors.iter().map(|d| d.label().to_string()).collect(),
        })
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Resolve the order documents must be parsed in.
    ///
    /// Three-color traversal: reaching a node that is still being visited
    /// means the references form a cycle.
    pub fn load_order(&self) -> Result<Vec<usize>> {
        let mut marks = vec![Mark::Unvisited; self.graph.node_count()];
        let mut order = Vec::with_capacity(self.graph.node_count());

        for root in self.graph.node_indices() {
            if marks[root.index()] != Mark::Unvisited {
                continue;
            }

            marks[root.index()] = Mark::Visiting;
            let mut stack = vec![self.frame(root)];

            while let Some(frame) = stack.last_mut() {
                if frame.next == frame.targets.len() {
                    let node = frame.node;
                    stack.pop();
                    marks[node.index()] = Mark::Visited;
                    order.push(self.graph[node]);
                    continue;
                }

                let target = frame.targets[frame.next];
                frame.next += 1;

                match marks[target.index()] {
                    Mark::Visited => {}
                    Mark::Visiting => return Err(self.cycle_error(&stack, target)),
                    Mark::Unvisited => {
                        marks[target.index()] = Mark::Visiting;
                        stack.push(self.frame(target));
                    }
                }
            }
        }

        debug!(
            order = ?order.iter().map(|&i| self.labels[i].as_str()).collect::<Vec<_>>(),
            "resolved schema load order"
        );

        Ok(order)
    }

    fn frame(&self, node: NodeIndex) -> Frame {
        // petgraph yields the most recently added edge first
        let mut targets: Vec<NodeIndex> = self.graph.neighbors(node).collect();
        targets.reverse();
        Frame {
            node,
            targets,
            next: 0,
        }
    }

    fn cycle_error(&self, stack: &[Frame], target: NodeIndex) -> Error {
        let start = stack.iter().position(|f| f.node == target).unwrap_or(0);
        let mut chain: Vec<String> = stack[start..]
            .iter()
            .map(|f| self.labels[self.graph[f.node]].clone())
            .collect();
        chain.push(self.labels[self.graph[target]].clone());
        Error::Cycle { chain }
    }
}
