// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Runtime-mutable media graph contract.
//!
//! The schedulers never touch media data. They drive a directed graph of
//! typed nodes through this trait:
//!
//! ```text
//!  ChunkReader ─┐
//!               ├─(one at a time)─→ Decoder ─→ Merge[slot] ─→ Queue ─→ Sink
//!  GapGenerator ┘
//! ```
//!
//! Nodes are arena handles, never references, so branches can be unlinked,
//! reconfigured and relinked while the graph runs.
//!
//! Two execution contexts exist. Structural calls (`link`, `set_state`,
//! `request_fanin_slot`, ...) are only made from the control loop that owns
//! the graph. Probe callbacks and event subscribers run on the graph's own
//! delivery threads and must do nothing but hand a message to that loop.

#[cfg(feature = "gst")]
pub mod gst;

use std::path::PathBuf;

use crate::error::Result;

/// Handle of a node in the graph's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeHandle(usize);

impl NodeHandle {
    pub fn from_index(index: usize) -> Self {
        Self(index)
    }

    pub fn index(self) -> usize {
        self.0
    }
}

/// Dynamically allocated input of a merge node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Slot(pub u32);

/// Handle of an installed probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProbeHandle(pub u64);

/// Connection point on a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Port {
    Input,
    Output,
    Slot(Slot),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pad {
    pub node: NodeHandle,
    pub port: Port,
}

impl Pad {
    pub fn input(node: NodeHandle) -> Self {
        Self { node, port: Port::Input }
    }

    pub fn output(node: NodeHandle) -> Self {
        Self { node, port: Port::Output }
    }

    pub fn slot(node: NodeHandle, slot: Slot) -> Self {
        Self { node, port: Port::Slot(slot) }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    /// File-backed reader producing parsed video of one chunk.
    ChunkReader,
    /// Synthetic filler for an interval without recordings.
    GapGenerator,
    /// Per-branch tail; `passthrough` forwards encoded data untouched.
    Decoder { passthrough: bool },
    /// Fan-in point playing its inputs one after another.
    Merge,
    Queue,
    Sink { factory: String },
}

impl NodeKind {
    /// Kinds whose state is driven explicitly by the scheduler rather than
    /// following the graph.
    pub fn is_branch_member(&self) -> bool {
        matches!(
            self,
            NodeKind::ChunkReader | NodeKind::GapGenerator | NodeKind::Decoder { .. }
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeParams {
    pub name: Option<String>,
}

impl NodeParams {
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: Some(name.into()) }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Idle,
    Ready,
    Running,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Setting {
    /// File read by a reader, or written by a sink.
    Location(PathBuf),
}

/// What a probe watches and whether it may hold data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeMask {
    pub buffers: bool,
    pub events: bool,
    pub blocking: bool,
}

impl ProbeMask {
    /// Inspect media units; returning [`ProbeReturn::Hold`] blocks there.
    pub const BLOCKING_BUFFER: Self = Self { buffers: true, events: false, blocking: true };
    /// Inspect downstream control signals, may hold them.
    pub const BLOCKING_EVENT: Self = Self { buffers: false, events: true, blocking: true };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    EndOfStream,
    Other,
}

/// Data passing a probe point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeData {
    Buffer { keyframe: bool },
    Event(Signal),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeReturn {
    /// Let the data through, keep the probe.
    Pass,
    /// Halt delivery at this point, data included, until the probe is
    /// removed. Only honoured by blocking probes.
    Hold,
    /// Discard the data, keep the probe.
    Drop,
}

pub type ProbeCallback = Box<dyn Fn(&ProbeData) -> ProbeReturn + Send + Sync + 'static>;

/// Notifications raised from the delivery context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphEvent {
    /// The merge node finished its current input and moved to the next.
    InputDrained { merge: NodeHandle },
    /// The whole graph reached end of stream.
    EndOfStream,
    Error { message: String },
}

pub type EventCallback = Box<dyn Fn(GraphEvent) + Send + Sync + 'static>;

/// Tracks the input a merge node is currently playing.
///
/// A merge node reports every change of its active input, including the
/// first activation and the final drain (no input left). Only a move from
/// one input straight to another is a handoff.
#[derive(Debug)]
pub struct ActiveInput<P> {
    current: Option<P>,
}

impl<P> Default for ActiveInput<P> {
    fn default() -> Self {
        Self { current: None }
    }
}

impl<P: PartialEq> ActiveInput<P> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the newly active input. Returns true for a handoff.
    pub fn update(&mut self, active: Option<P>) -> bool {
        let handoff = self.current.is_some() && active.is_some() && self.current != active;
        self.current = active;
        handoff
    }

    pub fn current(&self) -> Option<&P> {
        self.current.as_ref()
    }
}

/// Structural interface of the external media graph.
pub trait MediaGraph: Send {
    fn create_node(&mut self, kind: NodeKind, params: NodeParams) -> Result<NodeHandle>;

    /// Look up a node by name, e.g. in a graph built from a description.
    fn find_node(&mut self, name: &str) -> Option<NodeHandle>;

    fn link(&mut self, from: Pad, to: Pad) -> Result<()>;

    fn unlink(&mut self, from: Pad, to: Pad) -> Result<()>;

    fn set_state(&mut self, node: NodeHandle, state: NodeState) -> Result<()>;

    fn configure(&mut self, node: NodeHandle, setting: Setting) -> Result<()>;

    /// Playback position of `node` in nanoseconds.
    fn query_position(&self, node: NodeHandle) -> Option<u64>;

    fn add_probe(&mut self, pad: Pad, mask: ProbeMask, callback: ProbeCallback) -> Result<ProbeHandle>;

    /// Uninstall a probe; anything it holds resumes flowing.
    fn remove_probe(&mut self, probe: ProbeHandle) -> Result<()>;

    fn send_eos(&mut self, pad: Pad) -> Result<()>;

    fn request_fanin_slot(&mut self, merge: NodeHandle) -> Result<Slot>;

    fn release_fanin_slot(&mut self, merge: NodeHandle, slot: Slot) -> Result<()>;

    /// Register the receiver of [`GraphEvent`]s.
    fn subscribe(&mut self, callback: EventCallback);

    /// Bring the whole graph to running.
    fn start(&mut self) -> Result<()>;

    /// Tear the whole graph down.
    fn shutdown(&mut self) -> Result<()>;

    /// Write a debug snapshot of the graph topology. No-op by default.
    fn dump(&self, _name: &str) {}
}
