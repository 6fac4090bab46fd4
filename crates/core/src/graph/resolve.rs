use std::collections::BTreeSet;

use serde::Serialize;

use super::{FilterGraph, FilterNode, NodeId};
use crate::{
    filter::{FilterKind, FilterParams, GateParams},
    video::VideoMode,
};

/// Whether a chain member's transform runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LinkBehavior {
    Apply,
    Passthrough,
}

/// One node of a resolved chain, snapshotted at resolution time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChainLink {
    pub node: NodeId,
    pub params: FilterParams,
    pub behavior: LinkBehavior,
}

impl ChainLink {
    fn from_node(node: &FilterNode) -> Self {
        let behavior = if node.enabled || node.kind().is_gate() {
            LinkBehavior::Apply
        } else {
            LinkBehavior::Passthrough
        };

        Self {
            node: node.id,
            params: node.params,
            behavior,
        }
    }

    pub fn kind(&self) -> FilterKind {
        self.params.kind()
    }
}

/// An executable input-gate to output-gate sequence. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterChain {
    links: Vec<ChainLink>,
}

impl FilterChain {
    /// Every member in traversal order, gates included.
    pub fn links(&self) -> &[ChainLink] {
        &self.links
    }

    pub fn input_gate(&self) -> NodeId {
        self.links[0].node
    }

    pub fn output_gate(&self) -> NodeId {
        self.links[self.links.len() - 1].node
    }

    /// Whether frames of `mode` are routed into this chain.
    pub fn accepts(&self, mode: &VideoMode) -> bool {
        match self.links[0].params {
            FilterParams::InputGate(GateParams { width, height }) => {
                GateParams { width, height }.accepts(mode.width(), mode.height())
            }
            _ => false,
        }
    }
}

/// Why a traversal from an input gate produced no executable chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChainDefect {
    /// The path from `input_gate` came back to `at`.
    Cycle { input_gate: NodeId, at: NodeId },
    /// The path from `input_gate` ended at `last` without an output gate.
    Unterminated { input_gate: NodeId, last: NodeId },
}

impl ChainDefect {
    pub fn input_gate(&self) -> NodeId {
        match self {
            Self::Cycle { input_gate, .. } | Self::Unterminated { input_gate, .. } => *input_gate,
        }
    }
}

/// Outcome of resolving a whole graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChainReport {
    /// [`FilterGraph::id`] of the graph this report was built from.
    pub graph: u64,
    /// Graph revision this report was built from.
    pub revision: u64,
    /// Complete chains in ascending input-gate order.
    pub chains: Vec<FilterChain>,
    pub defects: Vec<ChainDefect>,
}

/// Compiles a [`FilterGraph`] into linear chains.
#[derive(Debug, Default)]
pub struct FilterChainResolver {
    last_seen: Option<(u64, u64)>,
}

impl FilterChainResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves every chain starting at an input gate. Pure: the same graph
    /// always yields the same report.
    pub fn resolve(graph: &FilterGraph) -> ChainReport {
        let mut report = ChainReport {
            graph: graph.id(),
            revision: graph.revision(),
            ..Default::default()
        };

        for gate in graph.input_gates() {
            match trace(graph, gate) {
                Ok(chain) => report.chains.push(chain),
                Err(defect) => report.defects.push(defect),
            }
        }

        report
    }

    /// Resolves `graph` only if it changed, or is a different graph, since
    /// the previous refresh.
    pub fn refresh(&mut self, graph: &FilterGraph) -> Option<ChainReport> {
        let seen = (graph.id(), graph.revision());
        if self.last_seen == Some(seen) {
            return None;
        }

        self.last_seen = Some(seen);
        Some(Self::resolve(graph))
    }

    /// Forces the next refresh to resolve again.
    pub fn invalidate(&mut self) {
        self.last_seen = None;
    }
}

fn trace(graph: &FilterGraph, input_gate: NodeId) -> Result<FilterChain, ChainDefect> {
    let mut visited = BTreeSet::from([input_gate]);
    let mut links = Vec::new();
    let mut current = input_gate;

    if let Some(gate) = graph.node(input_gate) {
        links.push(ChainLink::from_node(gate));
    }

    loop {
        let Some(next) = graph.successor(current) else {
            return Err(ChainDefect::Unterminated {
                input_gate,
                last: current,
            });
        };

        if !visited.insert(next) {
            return Err(ChainDefect::Cycle { input_gate, at: next });
        }

        let Some(node) = graph.node(next) else {
            return Err(ChainDefect::Unterminated {
                input_gate,
                last: current,
            });
        };

        links.push(ChainLink::from_node(node));
        if node.kind() == FilterKind::OutputGate {
            return Ok(FilterChain { links });
        }
        current = next;
    }
}
