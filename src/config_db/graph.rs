//! Directed routing graph with per-edge action lists.
//!
//! Nodes are numbered `0..node_size` and carry no payload; the interesting
//! data lives on the edges. Storage is a flat vector of out-edge lists
//! indexed by source node. Fabric out-degrees are small constants, so edge
//! lookup scans the source's list linearly.

use log::error;

use super::schema::RoutingAction;

#[derive(Clone, Debug)]
struct Edge {
    sink: u64,
    actions: Vec<RoutingAction>,
}

#[derive(Clone, Debug, Default)]
pub struct RoutingGraph {
    out_edges: Vec<Vec<Edge>>,
}

impl RoutingGraph {
    pub fn new(node_size: u64) -> Self {
        Self {
            out_edges: vec![Vec::new(); node_size as usize],
        }
    }

    pub fn num_nodes(&self) -> usize {
        self.out_edges.len()
    }

    pub fn num_edges(&self) -> usize {
        self.out_edges.iter().map(Vec::len).sum()
    }

    /// Insert an edge. Repeated insertions of the same `(src, sink)` pair
    /// accumulate their actions on the one existing edge.
    pub fn add_edge(&mut self, src: u64, sink: u64, action: Option<RoutingAction>) -> bool {
        let num_nodes = self.out_edges.len();
        if src as usize >= num_nodes {
            error!("[CONFIG] Edge source node {src} beyond node count {num_nodes}");
            return false;
        }
        if sink as usize >= num_nodes {
            error!("[CONFIG] Edge sink node {sink} beyond node count {num_nodes}");
            return false;
        }
        let edges = &mut self.out_edges[src as usize];
        let edge = match edges.iter_mut().find(|e| e.sink == sink) {
            Some(edge) => edge,
            None => {
                edges.push(Edge {
                    sink,
                    actions: Vec::new(),
                });
                edges.last_mut().unwrap()
            }
        };
        if let Some(action) = action {
            edge.actions.push(action);
        }
        true
    }

    /// Actions of the `(src, sink)` edge; `None` (with an error log) when
    /// the edge does not exist.
    pub fn edge_actions(&self, src: u64, sink: u64) -> Option<&[RoutingAction]> {
        let found = self
            .out_edges
            .get(src as usize)
            .and_then(|edges| edges.iter().find(|e| e.sink == sink));
        match found {
            Some(edge) => Some(&edge.actions),
            None => {
                error!("[CONFIG] No edge from node {src} to node {sink}");
                None
            }
        }
    }
}
