//! Pull-based mono audio graph.
//!
//! ```text
//! MicrophoneSource ──► Convolver ──► Destination
//!                  └─► (unconnected nodes still render, so sources keep draining)
//! ```
//!
//! The graph is an arena of processors plus directed connections. Every
//! render quantum, all nodes run in topological order; each node's input is
//! the sum of the nodes connected to it, and the destination receives the
//! sum of everything connected to it.
//!
//! The arena is also the registry of every node created during a session:
//! [`AudioGraph::clear`] drops all of them, including leftovers from a chain
//! that failed halfway through construction.

pub mod convolver;
pub mod nodes;

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::error::{Result, SoundverseError};
use nodes::{NodeKind, Processor};

/// Frames rendered per pull.
pub const RENDER_QUANTUM: usize = 256;

/// Graph shared between the session (mutation) and the render thread (pull).
pub type SharedGraph = Arc<Mutex<AudioGraph>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u64);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "node-{}", self.0)
    }
}

/// Where a connection leads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Node(NodeId),
    Destination,
}

struct NodeSlot {
    processor: Box<dyn Processor>,
    outputs: Vec<Endpoint>,
    buffer: Vec<f32>,
}

pub struct AudioGraph {
    sample_rate: u32,
    next_id: u64,
    nodes: BTreeMap<NodeId, NodeSlot>,
    /// Cached processing order, invalidated by any topology change.
    order: Option<Vec<NodeId>>,
    scratch: Vec<f32>,
}

impl AudioGraph {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            next_id: 0,
            nodes: BTreeMap::new(),
            order: None,
            scratch: vec![0.0; RENDER_QUANTUM],
        }
    }

    pub fn shared(sample_rate: u32) -> SharedGraph {
        Arc::new(Mutex::new(Self::new(sample_rate)))
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Register a processor. It produces output but reaches nothing until connected.
    pub fn add_node(&mut self, processor: Box<dyn Processor>) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        trace!(%id, kind = ?processor.kind(), "node created");
        self.nodes.insert(
            id,
            NodeSlot {
                processor,
                outputs: Vec::new(),
                buffer: vec![0.0; RENDER_QUANTUM],
            },
        );
        self.order = None;
        id
    }

    /// Route `from`'s output into `to`. Connecting twice is a no-op.
    pub fn connect(&mut self, from: NodeId, to: Endpoint) -> Result<()> {
        if !self.nodes.contains_key(&from) {
            return Err(SoundverseError::Graph(format!("unknown source {from}")));
        }
        if let Endpoint::Node(target) = to {
            if !self.nodes.contains_key(&target) {
                return Err(SoundverseError::Graph(format!("unknown target {target}")));
            }
            if target == from || self.reaches(target, from) {
                return Err(SoundverseError::Graph(format!(
                    "connecting {from} to {target} would create a cycle"
                )));
            }
        }

        if let Some(slot) = self.nodes.get_mut(&from) {
            if !slot.outputs.contains(&to) {
                slot.outputs.push(to);
                self.order = None;
            }
        }
        Ok(())
    }

    /// Remove every outgoing connection of `id`. Unknown or already
    /// disconnected nodes are a no-op.
    pub fn disconnect(&mut self, id: NodeId) {
        if let Some(slot) = self.nodes.get_mut(&id) {
            if !slot.outputs.is_empty() {
                slot.outputs.clear();
                self.order = None;
            }
        }
    }

    /// Disconnect `id` on both sides and drop it. Idempotent.
    pub fn remove(&mut self, id: NodeId) {
        if self.nodes.remove(&id).is_none() {
            return;
        }
        let incoming = Endpoint::Node(id);
        for slot in self.nodes.values_mut() {
            slot.outputs.retain(|e| *e != incoming);
        }
        self.order = None;
        trace!(%id, "node released");
    }

    /// Disconnect and drop every node.
    pub fn clear(&mut self) {
        if !self.nodes.is_empty() {
            debug!(nodes = self.nodes.len(), "releasing all graph nodes");
        }
        self.nodes.clear();
        self.order = None;
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node_kind(&self, id: NodeId) -> Option<NodeKind> {
        self.nodes.get(&id).map(|slot| slot.processor.kind())
    }

    pub fn outputs(&self, id: NodeId) -> &[Endpoint] {
        self.nodes
            .get(&id)
            .map(|slot| slot.outputs.as_slice())
            .unwrap_or(&[])
    }

    /// Nodes feeding the destination directly.
    pub fn destination_inputs(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|(_, slot)| slot.outputs.contains(&Endpoint::Destination))
            .map(|(id, _)| *id)
            .collect()
    }

    /// Render one block into `out`, overwriting it.
    pub fn render(&mut self, out: &mut [f32]) {
        let frames = out.len();
        if self.order.is_none() {
            self.order = Some(self.topological_order());
        }
        let order = self.order.clone().unwrap_or_default();
        self.scratch.resize(frames, 0.0);

        for id in order {
            self.scratch.iter_mut().for_each(|s| *s = 0.0);
            let target = Endpoint::Node(id);
            for slot in self.nodes.values() {
                if slot.outputs.contains(&target) {
                    for (acc, s) in self.scratch.iter_mut().zip(&slot.buffer) {
                        *acc += s;
                    }
                }
            }
            if let Some(slot) = self.nodes.get_mut(&id) {
                slot.buffer.resize(frames, 0.0);
                slot.processor.process(&self.scratch, &mut slot.buffer);
            }
        }

        out.iter_mut().for_each(|s| *s = 0.0);
        for slot in self.nodes.values() {
            if slot.outputs.contains(&Endpoint::Destination) {
                for (acc, s) in out.iter_mut().zip(&slot.buffer) {
                    *acc += s;
                }
            }
        }
        out.iter_mut().for_each(|s| *s = s.clamp(-1.0, 1.0));
    }

    /// Whether `to` is reachable from `from` through node connections.
    fn reaches(&self, from: NodeId, to: NodeId) -> bool {
        let mut stack = vec![from];
        let mut seen = Vec::new();
        while let Some(id) = stack.pop() {
            if id == to {
                return true;
            }
            if seen.contains(&id) {
                continue;
            }
            seen.push(id);
            for endpoint in self.outputs(id) {
                if let Endpoint::Node(next) = endpoint {
                    stack.push(*next);
                }
            }
        }
        false
    }

    /// Kahn's algorithm. `connect` rejects cycles, so every node is emitted.
    fn topological_order(&self) -> Vec<NodeId> {
        let mut indegree: BTreeMap<NodeId, usize> = self.nodes.keys().map(|id| (*id, 0)).collect();
        for slot in self.nodes.values() {
            for endpoint in &slot.outputs {
                if let Endpoint::Node(target) = endpoint {
                    if let Some(d) = indegree.get_mut(target) {
                        *d += 1;
                    }
                }
            }
        }

        let mut ready: Vec<NodeId> = indegree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(id) = ready.pop() {
            order.push(id);
            for endpoint in self.outputs(id) {
                if let Endpoint::Node(target) = endpoint {
                    if let Some(d) = indegree.get_mut(target) {
                        *d -= 1;
                        if *d == 0 {
                            ready.push(*target);
                        }
                    }
                }
            }
        }
        order
    }
}

#[cfg(test)]
mod tests {
    use super::nodes::{Gain, NodeKind, Processor};
    use super::*;

    /// Emits a constant value.
    struct Constant(f32);

    impl Processor for Constant {
        fn kind(&self) -> NodeKind {
            NodeKind::BufferSource
        }

        fn process(&mut self, _input: &[f32], output: &mut [f32]) {
            output.iter_mut().for_each(|s| *s = self.0);
        }
    }

    #[test]
    fn renders_a_linear_chain() {
        let mut graph = AudioGraph::new(48_000);
        let src = graph.add_node(Box::new(Constant(0.25)));
        let gain = graph.add_node(Box::new(Gain::new(2.0)));
        graph.connect(src, Endpoint::Node(gain)).unwrap();
        graph.connect(gain, Endpoint::Destination).unwrap();

        let mut out = vec![0.0; RENDER_QUANTUM];
        graph.render(&mut out);
        assert!(out.iter().all(|s| (*s - 0.5).abs() < 1e-6));
        assert_eq!(graph.destination_inputs(), vec![gain]);
    }

    #[test]
    fn order_does_not_depend_on_creation_order() {
        let mut graph = AudioGraph::new(48_000);
        let gain = graph.add_node(Box::new(Gain::new(0.5)));
        let src = graph.add_node(Box::new(Constant(0.5)));
        graph.connect(gain, Endpoint::Destination).unwrap();
        graph.connect(src, Endpoint::Node(gain)).unwrap();

        let mut out = vec![0.0; 8];
        graph.render(&mut out);
        assert!(out.iter().all(|s| (*s - 0.25).abs() < 1e-6));
    }

    #[test]
    fn disconnected_graph_renders_silence() {
        let mut graph = AudioGraph::new(48_000);
        let src = graph.add_node(Box::new(Constant(0.9)));
        graph.connect(src, Endpoint::Destination).unwrap();
        graph.disconnect(src);
        graph.disconnect(src);

        let mut out = vec![1.0; 16];
        graph.render(&mut out);
        assert!(out.iter().all(|s| *s == 0.0));
        assert!(graph.destination_inputs().is_empty());
    }

    #[test]
    fn output_is_clamped() {
        let mut graph = AudioGraph::new(48_000);
        let a = graph.add_node(Box::new(Constant(0.8)));
        let b = graph.add_node(Box::new(Constant(0.8)));
        graph.connect(a, Endpoint::Destination).unwrap();
        graph.connect(b, Endpoint::Destination).unwrap();

        let mut out = vec![0.0; 4];
        graph.render(&mut out);
        assert!(out.iter().all(|s| *s == 1.0));
    }

    #[test]
    fn rejects_cycles_and_unknown_nodes() {
        let mut graph = AudioGraph::new(48_000);
        let a = graph.add_node(Box::new(Gain::new(1.0)));
        let b = graph.add_node(Box::new(Gain::new(1.0)));
        graph.connect(a, Endpoint::Node(b)).unwrap();
        assert!(graph.connect(b, Endpoint::Node(a)).is_err());
        assert!(graph.connect(a, Endpoint::Node(a)).is_err());

        graph.remove(b);
        assert!(graph.connect(a, Endpoint::Node(b)).is_err());
        assert!(graph.outputs(a).is_empty(), "removing b drops a→b");
    }

    #[test]
    fn clear_releases_everything_and_is_repeatable() {
        let mut graph = AudioGraph::new(48_000);
        let a = graph.add_node(Box::new(Constant(0.1)));
        graph.connect(a, Endpoint::Destination).unwrap();
        graph.clear();
        graph.clear();
        assert!(graph.is_empty());
        assert!(!graph.contains(a));
        graph.remove(a);
    }
}
