//! Runs resolved filter chains over captured frames.

use std::collections::{BTreeSet, HashMap};

use crate::{
    config::PipelineConfig,
    error::TransformError,
    filter::{FilterKind, FilterStage, WorkingFrame},
    graph::{ChainReport, FilterChain, LinkBehavior, NodeId},
    video::{FrameView, PixelFormat, VideoMode},
};

/// Immutable snapshot of the chains frames are currently routed through.
/// Replaced as a whole, never edited in place.
#[derive(Debug, Clone, Default)]
pub struct ActiveChains {
    chains: Vec<FilterChain>,
    graph: Option<u64>,
    revision: Option<u64>,
}

impl ActiveChains {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn new(chains: Vec<FilterChain>, graph: u64, revision: u64) -> Self {
        Self {
            chains,
            graph: Some(graph),
            revision: Some(revision),
        }
    }

    pub fn from_report(report: &ChainReport) -> Self {
        Self::new(report.chains.clone(), report.graph, report.revision)
    }

    pub fn chains(&self) -> &[FilterChain] {
        &self.chains
    }

    /// Graph revision the snapshot was resolved from; `None` before the
    /// first activation.
    pub fn revision(&self) -> Option<u64> {
        self.revision
    }

    /// Whether this snapshot came from a later revision of the graph
    /// `report` was resolved from.
    pub fn is_newer_than(&self, report: &ChainReport) -> bool {
        self.graph == Some(report.graph)
            && self.revision.is_some_and(|revision| revision > report.revision)
    }

    /// The first chain whose input gate accepts frames of `mode`.
    pub fn select(&self, mode: &VideoMode) -> Option<&FilterChain> {
        self.chains.iter().find(|chain| chain.accepts(mode))
    }

    pub fn len(&self) -> usize {
        self.chains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }
}

/// A processed frame, borrowed from the processor until the next pass.
#[derive(Debug, Clone, Copy)]
pub struct FrameOutput<'a> {
    pub pixels: &'a [u8],
    pub mode: VideoMode,
    pub format: PixelFormat,
    /// Input gate of the chain that was applied, if any.
    pub chain: Option<NodeId>,
}

/// A frame that could not be pushed through its chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("frame dropped at {kind} node {node}: {error}")]
pub struct DroppedFrame {
    pub node: NodeId,
    pub kind: FilterKind,
    pub error: TransformError,
}

/// Applies filter chains to frames. Owns the working buffers and the
/// per-node state that must survive between frames.
#[derive(Debug)]
pub struct FrameProcessor {
    stages: HashMap<NodeId, FilterStage>,
    working: WorkingFrame,
    scratch: Vec<u8>,
    filtering_enabled: bool,
}

impl FrameProcessor {
    pub fn new(config: &PipelineConfig) -> Self {
        let capacity = config.max_working_resolution.pixel_count() * 4;
        Self {
            stages: HashMap::new(),
            working: WorkingFrame {
                pixels: Vec::with_capacity(capacity),
                ..Default::default()
            },
            scratch: Vec::with_capacity(capacity),
            filtering_enabled: config.filtering_enabled,
        }
    }

    pub fn filtering_enabled(&self) -> bool {
        self.filtering_enabled
    }

    /// When disabled every frame passes through unfiltered.
    pub fn set_filtering_enabled(&mut self, enabled: bool) {
        self.filtering_enabled = enabled;
    }

    /// Copies `frame` into the working buffer and applies every
    /// non-passthrough link of `chain` in order.
    pub fn process(
        &mut self,
        frame: FrameView<'_>,
        chain: Option<&FilterChain>,
    ) -> Result<FrameOutput<'_>, DroppedFrame> {
        let Self {
            stages,
            working,
            scratch,
            filtering_enabled,
        } = &mut *self;

        working.pixels.clear();
        working.pixels.extend_from_slice(frame.pixels);
        working.mode = frame.mode;
        working.format = frame.format;

        let chain = chain.filter(|_| *filtering_enabled);
        if let Some(chain) = chain {
            for link in chain.links() {
                if link.behavior == LinkBehavior::Passthrough {
                    continue;
                }

                let stage = stages
                    .entry(link.node)
                    .or_insert_with(|| FilterStage::new(link.params));
                if *stage.params() != link.params {
                    *stage = FilterStage::new(link.params);
                }

                stage.apply(working, scratch).map_err(|error| DroppedFrame {
                    node: link.node,
                    kind: link.kind(),
                    error,
                })?;
            }
        }

        Ok(FrameOutput {
            pixels: &self.working.pixels,
            mode: self.working.mode,
            format: self.working.format,
            chain: chain.map(FilterChain::input_gate),
        })
    }

    /// Forgets per-node state for nodes no longer in any active chain.
    pub fn retain(&mut self, active: &ActiveChains) {
        let live: BTreeSet<NodeId> = active
            .chains()
            .iter()
            .flat_map(|chain| chain.links().iter().map(|link| link.node))
            .collect();
        self.stages.retain(|node, _| live.contains(node));
    }

    /// Number of nodes currently holding state.
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }
}
