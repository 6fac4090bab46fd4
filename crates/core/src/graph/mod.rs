//! The editable filter graph and its compilation into linear chains.

mod resolve;

use std::{
    collections::BTreeMap,
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

use petgraph::{
    stable_graph::{NodeIndex, StableGraph},
    visit::EdgeRef,
    Direction,
};
use serde::{Deserialize, Serialize};

use crate::{
    error::GraphError,
    filter::{FilterKind, FilterParams, ParamBlock},
    Result,
};

pub use resolve::{
    ChainDefect, ChainLink, ChainReport, FilterChain, FilterChainResolver, LinkBehavior,
};

/// Stable identity of a node within one [`FilterGraph`]. Ids are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A single processing stage in the graph.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterNode {
    pub id: NodeId,
    pub params: FilterParams,
    /// Disabled nodes stay in their chain but pass frames through untouched.
    pub enabled: bool,
}

impl FilterNode {
    pub fn kind(&self) -> FilterKind {
        self.params.kind()
    }
}

/// Edge weight: the output point of the source node feeds the input point
/// of the target node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Connection;

static NEXT_GRAPH_ID: AtomicU64 = AtomicU64::new(0);

/// Mutable set of filter nodes and the connections between them.
///
/// Each node has at most one input and one output connection point (gates
/// have only one of the two), and each point accepts at most one edge.
#[derive(Debug)]
pub struct FilterGraph {
    id: u64,
    dag: StableGraph<FilterNode, Connection>,
    index: BTreeMap<NodeId, NodeIndex>,
    next_id: u32,
    revision: u64,
}

impl Default for FilterGraph {
    fn default() -> Self {
        Self {
            id: NEXT_GRAPH_ID.fetch_add(1, Ordering::Relaxed),
            dag: StableGraph::default(),
            index: BTreeMap::new(),
            next_id: 0,
            revision: 0,
        }
    }
}

impl FilterGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Identifies this graph among all graphs in the process. Revisions are
    /// only comparable between reports carrying the same id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Counter bumped by every edit that can change the resolved chains.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn edge_count(&self) -> usize {
        self.dag.edge_count()
    }

    /// Adds an enabled node of `kind` with that type's default parameters.
    pub fn add_node(&mut self, kind: FilterKind) -> NodeId {
        self.insert(FilterParams::defaults(kind))
    }

    /// Adds an enabled node configured with `params`, provided they are in
    /// range for their filter type.
    pub fn add_node_with_params(&mut self, params: FilterParams) -> Result<NodeId> {
        params.validate()?;
        Ok(self.insert(params))
    }

    /// Adds a node from a persisted parameter payload.
    pub fn add_node_from_block(&mut self, kind: FilterKind, block: &ParamBlock) -> Result<NodeId> {
        let params = FilterParams::decode(kind, block)?;
        Ok(self.insert(params))
    }

    fn insert(&mut self, params: FilterParams) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;

        let index = self.dag.add_node(FilterNode {
            id,
            params,
            enabled: true,
        });
        self.index.insert(id, index);
        self.touch();
        id
    }

    /// Removes a node together with any edges touching it.
    pub fn remove_node(&mut self, id: NodeId) -> Result<FilterNode> {
        let index = self.index_of(id)?;
        self.index.remove(&id);
        let node = self
            .dag
            .remove_node(index)
            .ok_or(GraphError::UnknownNode(id))?;
        self.touch();
        Ok(node)
    }

    pub fn node(&self, id: NodeId) -> Option<&FilterNode> {
        self.index.get(&id).and_then(|index| self.dag.node_weight(*index))
    }

    /// All nodes in ascending id order.
    pub fn nodes(&self) -> impl Iterator<Item = &FilterNode> + '_ {
        self.index.values().filter_map(|index| self.dag.node_weight(*index))
    }

    /// Input gates in ascending id order.
    pub fn input_gates(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes()
            .filter(|node| node.kind() == FilterKind::InputGate)
            .map(|node| node.id)
    }

    /// Connects the output point of `from` to the input point of `to`.
    pub fn connect(&mut self, from: NodeId, to: NodeId) -> Result<()> {
        let source = self.index_of(from)?;
        let target = self.index_of(to)?;

        if !self.dag[source].kind().has_output_point() {
            return Err(GraphError::NoOutputPoint(from).into());
        }
        if !self.dag[target].kind().has_input_point() {
            return Err(GraphError::NoInputPoint(to).into());
        }
        if self.successor(from).is_some() {
            return Err(GraphError::OutputOccupied(from).into());
        }
        if self.predecessor(to).is_some() {
            return Err(GraphError::InputOccupied(to).into());
        }

        self.dag.add_edge(source, target, Connection);
        self.touch();
        Ok(())
    }

    /// Removes the edge from `from` to `to`. Returns whether one existed.
    pub fn disconnect(&mut self, from: NodeId, to: NodeId) -> Result<bool> {
        let source = self.index_of(from)?;
        let target = self.index_of(to)?;

        match self.dag.find_edge(source, target) {
            Some(edge) => {
                self.dag.remove_edge(edge);
                self.touch();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// The node fed by `id`'s output point. If several edges leave the
    /// node the lowest target id wins, keeping traversal deterministic.
    pub fn successor(&self, id: NodeId) -> Option<NodeId> {
        self.neighbor(id, Direction::Outgoing)
    }

    /// The node feeding `id`'s input point.
    pub fn predecessor(&self, id: NodeId) -> Option<NodeId> {
        self.neighbor(id, Direction::Incoming)
    }

    fn neighbor(&self, id: NodeId, direction: Direction) -> Option<NodeId> {
        let index = *self.index.get(&id)?;
        self.dag
            .edges_directed(index, direction)
            .map(|edge| match direction {
                Direction::Outgoing => edge.target(),
                Direction::Incoming => edge.source(),
            })
            .map(|other| self.dag[other].id)
            .min()
    }

    pub fn set_enabled(&mut self, id: NodeId, enabled: bool) -> Result<()> {
        let index = self.index_of(id)?;
        let node = &mut self.dag[index];

        if node.kind().is_gate() {
            if enabled {
                return Ok(());
            }
            return Err(GraphError::GateAlwaysEnabled(id).into());
        }

        if node.enabled != enabled {
            node.enabled = enabled;
            self.touch();
        }
        Ok(())
    }

    pub fn set_params(&mut self, id: NodeId, params: FilterParams) -> Result<()> {
        let index = self.index_of(id)?;
        params.validate()?;
        let node = &mut self.dag[index];

        if node.kind() != params.kind() {
            return Err(GraphError::ParameterKindMismatch {
                node: id,
                expected: node.kind(),
                given: params.kind(),
            }
            .into());
        }

        if node.params != params {
            node.params = params;
            self.touch();
        }
        Ok(())
    }

    /// Replaces a node's parameters from a persisted payload.
    pub fn set_param_block(&mut self, id: NodeId, block: &ParamBlock) -> Result<()> {
        let kind = self.node(id).ok_or(GraphError::UnknownNode(id))?.kind();
        let params = FilterParams::decode(kind, block)?;
        self.set_params(id, params)
    }

    /// Drops every node and edge. Ids keep counting up.
    pub fn clear(&mut self) {
        self.dag.clear();
        self.index.clear();
        self.touch();
    }

    fn index_of(&self, id: NodeId) -> Result<NodeIndex> {
        self.index
            .get(&id)
            .copied()
            .ok_or_else(|| GraphError::UnknownNode(id).into())
    }

    fn touch(&mut self) {
        self.revision += 1;
    }

    /// Adds an edge without checking connection points.
    #[cfg(test)]
    pub(crate) fn connect_unchecked(&mut self, from: NodeId, to: NodeId) {
        let source = self.index[&from];
        let target = self.index[&to];
        self.dag.add_edge(source, target, Connection);
        self.touch();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        filter::{DecimateParams, DecimateSampling},
        PipelineError,
    };

    #[test]
    fn connection_points_accept_one_edge() {
        let mut graph = FilterGraph::new();
        let input = graph.add_node(FilterKind::InputGate);
        let blur = graph.add_node(FilterKind::Blur);
        let flip = graph.add_node(FilterKind::Flip);

        graph.connect(input, blur).unwrap();

        let err = graph.connect(input, flip).unwrap_err();
        assert!(matches!(err, PipelineError::Graph(GraphError::OutputOccupied(id)) if id == input));

        let err = graph.connect(flip, blur).unwrap_err();
        assert!(matches!(err, PipelineError::Graph(GraphError::InputOccupied(id)) if id == blur));
    }

    #[test]
    fn gates_only_expose_one_side() {
        let mut graph = FilterGraph::new();
        let input = graph.add_node(FilterKind::InputGate);
        let output = graph.add_node(FilterKind::OutputGate);
        let blur = graph.add_node(FilterKind::Blur);

        assert!(matches!(
            graph.connect(blur, input),
            Err(PipelineError::Graph(GraphError::NoInputPoint(_)))
        ));
        assert!(matches!(
            graph.connect(output, blur),
            Err(PipelineError::Graph(GraphError::NoOutputPoint(_)))
        ));
    }

    #[test]
    fn gates_cannot_be_disabled() {
        let mut graph = FilterGraph::new();
        let input = graph.add_node(FilterKind::InputGate);

        assert!(graph.set_enabled(input, true).is_ok());
        assert!(graph.set_enabled(input, false).is_err());
        assert!(graph.node(input).unwrap().enabled);
    }

    #[test]
    fn edits_bump_the_revision() {
        let mut graph = FilterGraph::new();
        let start = graph.revision();
        let input = graph.add_node(FilterKind::InputGate);
        let blur = graph.add_node(FilterKind::Blur);
        graph.connect(input, blur).unwrap();
        let connected = graph.revision();
        assert!(connected > start);

        graph.set_enabled(blur, true).unwrap();
        assert_eq!(graph.revision(), connected, "no-op edits keep the revision");

        graph.set_enabled(blur, false).unwrap();
        assert!(graph.revision() > connected);
    }

    #[test]
    fn removing_a_node_drops_its_edges() {
        let mut graph = FilterGraph::new();
        let input = graph.add_node(FilterKind::InputGate);
        let blur = graph.add_node(FilterKind::Blur);
        graph.connect(input, blur).unwrap();

        let removed = graph.remove_node(blur).unwrap();
        assert_eq!(removed.kind(), FilterKind::Blur);
        assert_eq!(graph.edge_count(), 0);
        assert_eq!(graph.successor(input), None);
        assert!(graph.remove_node(blur).is_err());
    }

    #[test]
    fn ids_are_not_reused() {
        let mut graph = FilterGraph::new();
        let first = graph.add_node(FilterKind::Blur);
        graph.remove_node(first).unwrap();
        let second = graph.add_node(FilterKind::Blur);
        assert_ne!(first, second);
    }

    #[test]
    fn parameters_must_match_the_node_type() {
        let mut graph = FilterGraph::new();
        let blur = graph.add_node(FilterKind::Blur);

        let err = graph
            .set_params(blur, FilterParams::defaults(FilterKind::Crop))
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Graph(GraphError::ParameterKindMismatch { .. })
        ));
    }

    #[test]
    fn out_of_range_parameters_never_enter_the_graph() {
        let zero = FilterParams::Decimate(DecimateParams {
            sampling: DecimateSampling::Nearest,
            factor: 0,
        });

        let mut graph = FilterGraph::new();
        assert!(matches!(
            graph.add_node_with_params(zero),
            Err(PipelineError::InvalidParameter { kind: FilterKind::Decimate, .. })
        ));
        assert!(graph.is_empty());

        let decimate = graph.add_node(FilterKind::Decimate);
        let revision = graph.revision();
        assert!(graph.set_params(decimate, zero).is_err());
        assert_eq!(
            graph.node(decimate).unwrap().params,
            FilterParams::defaults(FilterKind::Decimate)
        );
        assert_eq!(graph.revision(), revision);
    }

    #[test]
    fn every_graph_has_its_own_id() {
        assert_ne!(FilterGraph::new().id(), FilterGraph::new().id());
    }

    #[test]
    fn persisted_payloads_are_decoded() {
        let mut graph = FilterGraph::new();
        let crop = graph
            .add_node_from_block(FilterKind::Crop, &FilterKind::Crop.default_params())
            .unwrap();

        assert_eq!(
            graph.node(crop).unwrap().params,
            FilterParams::defaults(FilterKind::Crop)
        );
    }
}
