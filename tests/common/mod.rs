//! In-memory media graph for protocol tests.
//!
//! Models just enough of a real graph to observe the schedulers:
//! merge inputs play in request order, probes see buffers and events, and a
//! recording graph (parser → muxer → sink) writes "files" made of
//! keyframe / delta flags.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;

use chunkline::error::{ChunkError, Result};
use chunkline::graph::{
    ActiveInput, EventCallback, GraphEvent, MediaGraph, NodeHandle, NodeKind, NodeParams, NodeState, Pad,
    Port, ProbeCallback, ProbeData, ProbeHandle, ProbeMask, ProbeReturn, Setting, Signal, Slot,
};

/// What a merge input carried when it became active.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Played {
    File(PathBuf),
    Gap,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedFile {
    pub path: PathBuf,
    /// One flag per media unit, `true` for keyframes.
    pub units: Vec<bool>,
    pub finalized: bool,
}

struct FakeNode {
    name: Option<String>,
    kind: Option<NodeKind>,
    state: NodeState,
    location: Option<PathBuf>,
}

struct FakeProbe {
    pad: Pad,
    mask: ProbeMask,
    callback: Arc<ProbeCallback>,
}

#[derive(Default)]
struct MergeState {
    inputs: Vec<Slot>,
    active: ActiveInput<Slot>,
}

#[derive(Clone, Copy)]
struct Roles {
    parser: NodeHandle,
    muxer: NodeHandle,
    sink: NodeHandle,
}

#[derive(Default)]
struct Inner {
    nodes: Vec<FakeNode>,
    links: Vec<(Pad, Pad)>,
    merges: HashMap<NodeHandle, MergeState>,
    next_slot: u32,
    released: Vec<Slot>,
    positions: HashMap<NodeHandle, u64>,
    probes: HashMap<ProbeHandle, FakeProbe>,
    next_probe: u64,
    held: VecDeque<bool>,
    eos_sent: Vec<Pad>,
    stall_muxer_eos: bool,
    pending_muxer_eos: bool,
    subscriber: Option<Arc<EventCallback>>,
    activations: Vec<Played>,
    recorded: Vec<RecordedFile>,
    lost: usize,
    fail_slot_links: bool,
    refuse_eos: bool,
    every_drain_reported: bool,
    started: bool,
    shut_down: bool,
    roles: Option<Roles>,
}

impl Inner {
    fn add_node(&mut self, name: Option<String>, kind: Option<NodeKind>) -> NodeHandle {
        let handle = NodeHandle::from_index(self.nodes.len());
        self.nodes.push(FakeNode {
            name,
            kind,
            state: NodeState::Idle,
            location: None,
        });
        handle
    }

    fn node_mut(&mut self, node: NodeHandle) -> Result<&mut FakeNode> {
        self.nodes
            .get_mut(node.index())
            .ok_or_else(|| ChunkError::Graph(format!("unknown node {}", node.index())))
    }

    fn upstream_of(&self, to: Pad) -> Option<NodeHandle> {
        self.links.iter().find(|(_, t)| *t == to).map(|(f, _)| f.node)
    }

    fn played_for(&self, merge: NodeHandle, slot: Slot) -> Played {
        let Some(decoder) = self.upstream_of(Pad::slot(merge, slot)) else {
            return Played::Unknown;
        };
        let Some(leaf) = self.upstream_of(Pad::input(decoder)) else {
            return Played::Unknown;
        };
        let node = &self.nodes[leaf.index()];
        match node.kind {
            Some(NodeKind::GapGenerator) => Played::Gap,
            Some(NodeKind::ChunkReader) => Played::File(node.location.clone().unwrap_or_default()),
            _ => Played::Unknown,
        }
    }

    fn callbacks_on(&self, pad: Pad, want_buffers: bool) -> Vec<(bool, Arc<ProbeCallback>)> {
        let mut probes: Vec<_> = self
            .probes
            .iter()
            .filter(|(_, p)| p.pad == pad && if want_buffers { p.mask.buffers } else { p.mask.events })
            .map(|(h, p)| (h.0, p.mask.blocking, p.callback.clone()))
            .collect();
        probes.sort_by_key(|(h, _, _)| *h);
        probes.into_iter().map(|(_, b, c)| (b, c)).collect()
    }

    fn deliver(&mut self, keyframe: bool) {
        let Some(roles) = self.roles else { return };
        let running = |n: NodeHandle| self.nodes[n.index()].state == NodeState::Running;
        if !(running(roles.muxer) && running(roles.sink)) {
            self.lost += 1;
            return;
        }
        let Some(location) = self.nodes[roles.sink.index()].location.clone() else {
            self.lost += 1;
            return;
        };
        match self.recorded.last_mut() {
            Some(f) if f.path == location && !f.finalized => f.units.push(keyframe),
            _ => self.recorded.push(RecordedFile {
                path: location,
                units: vec![keyframe],
                finalized: false,
            }),
        }
    }

    fn finalize_current(&mut self) {
        if let Some(f) = self.recorded.last_mut() {
            f.finalized = true;
        }
    }
}

/// Cloneable handle; every clone sees the same graph.
#[derive(Clone, Default)]
pub struct FakeGraph {
    inner: Arc<Mutex<Inner>>,
}

impl FakeGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Graph holding the given named nodes only.
    pub fn with_named(names: &[&str]) -> Self {
        let graph = Self::new();
        {
            let mut inner = graph.inner.lock();
            for name in names {
                inner.add_node(Some(name.to_string()), None);
            }
        }
        graph
    }

    /// Recording graph with nodes `parser`, `muxer` and `destination`.
    pub fn recording() -> Self {
        let graph = Self::with_named(&["source", "parser", "muxer", "destination"]);
        {
            let mut inner = graph.inner.lock();
            inner.roles = Some(Roles {
                parser: NodeHandle::from_index(1),
                muxer: NodeHandle::from_index(2),
                sink: NodeHandle::from_index(3),
            });
        }
        graph
    }

    fn emit(&self, event: GraphEvent) {
        let subscriber = self.inner.lock().subscriber.clone();
        if let Some(cb) = subscriber {
            (*cb)(event);
        }
    }

    // ───────────── playback helpers ─────────────

    /// The active merge input reached its end. The merge node moves to the
    /// next linked input, or to none and then ends the stream. Returns
    /// whether another input took over.
    pub fn finish_active(&self, merge: NodeHandle) -> bool {
        let (events, moved) = {
            let mut inner = self.inner.lock();
            let Some(state) = inner.merges.get(&merge) else {
                return false;
            };
            let Some(active) = state.active.current().copied() else {
                return false;
            };
            let inputs = state.inputs.clone();
            let after = inputs.iter().position(|s| *s == active).map_or(0, |p| p + 1);
            let next = inputs[after..]
                .iter()
                .copied()
                .find(|s| inner.upstream_of(Pad::slot(merge, *s)).is_some());

            if let Some(slot) = next {
                let played = inner.played_for(merge, slot);
                inner.activations.push(played);
            }
            let every_drain = inner.every_drain_reported;
            let handoff = match inner.merges.get_mut(&merge) {
                Some(state) => state.active.update(next),
                None => false,
            };

            let mut events = Vec::new();
            if handoff || every_drain {
                events.push(GraphEvent::InputDrained { merge });
            }
            if next.is_none() {
                events.push(GraphEvent::EndOfStream);
            }
            (events, next.is_some())
        };
        for event in events {
            self.emit(event);
        }
        moved
    }

    /// Report an input drain for every change of the active input, the
    /// final one included, instead of handoffs only.
    pub fn set_every_drain_reported(&self, every: bool) {
        self.inner.lock().every_drain_reported = every;
    }

    /// Make `send_eos` fail.
    pub fn set_refuse_eos(&self, refuse: bool) {
        self.inner.lock().refuse_eos = refuse;
    }

    pub fn raise_error(&self, message: &str) {
        self.emit(GraphEvent::Error {
            message: message.to_string(),
        });
    }

    pub fn activations(&self) -> Vec<Played> {
        self.inner.lock().activations.clone()
    }

    pub fn merge_inputs(&self, merge: NodeHandle) -> Vec<Slot> {
        self.inner
            .lock()
            .merges
            .get(&merge)
            .map(|m| m.inputs.clone())
            .unwrap_or_default()
    }

    pub fn released_slots(&self) -> Vec<Slot> {
        self.inner.lock().released.clone()
    }

    pub fn set_position(&self, node: NodeHandle, ns: u64) {
        self.inner.lock().positions.insert(node, ns);
    }

    pub fn set_fail_slot_links(&self, fail: bool) {
        self.inner.lock().fail_slot_links = fail;
    }

    // ───────────── recording helpers ─────────────

    /// Push one media unit out of the recording parser.
    pub fn push_buffer(&self, keyframe: bool) {
        let probes = {
            let mut inner = self.inner.lock();
            if !inner.held.is_empty() {
                inner.held.push_back(keyframe);
                return;
            }
            let Some(roles) = inner.roles else { return };
            inner.callbacks_on(Pad::output(roles.parser), true)
        };

        let data = ProbeData::Buffer { keyframe };
        let mut verdict = ProbeReturn::Pass;
        for (blocking, cb) in probes {
            match (*cb)(&data) {
                ProbeReturn::Pass => {}
                ProbeReturn::Hold if !blocking => {}
                other => {
                    verdict = other;
                    break;
                }
            }
        }

        let mut inner = self.inner.lock();
        match verdict {
            ProbeReturn::Hold => inner.held.push_back(keyframe),
            ProbeReturn::Drop => {}
            ProbeReturn::Pass => inner.deliver(keyframe),
        }
    }

    /// Keep end-of-stream inside the muxer until [`release_muxer_eos`].
    pub fn set_stall_muxer_eos(&self, stall: bool) {
        self.inner.lock().stall_muxer_eos = stall;
    }

    pub fn release_muxer_eos(&self) {
        let pending = {
            let mut inner = self.inner.lock();
            inner.stall_muxer_eos = false;
            std::mem::replace(&mut inner.pending_muxer_eos, false)
        };
        if pending {
            self.muxer_eos_out();
        }
    }

    fn muxer_eos_out(&self) {
        let probes = {
            let mut inner = self.inner.lock();
            inner.finalize_current();
            let Some(roles) = inner.roles else { return };
            inner.callbacks_on(Pad::input(roles.sink), false)
        };
        let data = ProbeData::Event(Signal::EndOfStream);
        for (_, cb) in probes {
            if (*cb)(&data) == ProbeReturn::Drop {
                return;
            }
        }
        self.emit(GraphEvent::EndOfStream);
    }

    pub fn recorded(&self) -> Vec<RecordedFile> {
        self.inner.lock().recorded.clone()
    }

    pub fn lost(&self) -> usize {
        self.inner.lock().lost
    }

    pub fn held_count(&self) -> usize {
        self.inner.lock().held.len()
    }

    // ───────────── inspection ─────────────

    pub fn handle(&self, name: &str) -> Option<NodeHandle> {
        self.inner
            .lock()
            .nodes
            .iter()
            .position(|n| n.name.as_deref() == Some(name))
            .map(NodeHandle::from_index)
    }

    pub fn is_linked(&self, from: Pad, to: Pad) -> bool {
        self.inner.lock().links.contains(&(from, to))
    }

    pub fn node_state(&self, node: NodeHandle) -> NodeState {
        self.inner.lock().nodes[node.index()].state
    }

    pub fn location(&self, node: NodeHandle) -> Option<PathBuf> {
        self.inner.lock().nodes[node.index()].location.clone()
    }

    pub fn eos_sent(&self) -> Vec<Pad> {
        self.inner.lock().eos_sent.clone()
    }

    pub fn probe_count(&self) -> usize {
        self.inner.lock().probes.len()
    }

    pub fn is_started(&self) -> bool {
        self.inner.lock().started
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.lock().shut_down
    }
}

impl MediaGraph for FakeGraph {
    fn create_node(&mut self, kind: NodeKind, params: NodeParams) -> Result<NodeHandle> {
        let mut inner = self.inner.lock();
        let is_merge = kind == NodeKind::Merge;
        let handle = inner.add_node(params.name, Some(kind));
        if is_merge {
            inner.merges.insert(handle, MergeState::default());
        }
        Ok(handle)
    }

    fn find_node(&mut self, name: &str) -> Option<NodeHandle> {
        self.handle(name)
    }

    fn link(&mut self, from: Pad, to: Pad) -> Result<()> {
        let mut inner = self.inner.lock();
        if let Port::Slot(slot) = to.port {
            if inner.fail_slot_links {
                return Err(ChunkError::Graph("link refused".into()));
            }
            let known = inner.merges.get(&to.node).is_some_and(|m| m.inputs.contains(&slot));
            if !known {
                return Err(ChunkError::Graph(format!("no slot {}", slot.0)));
            }
        }
        if inner.links.iter().any(|(f, t)| *f == from || *t == to) {
            return Err(ChunkError::Graph("pad already linked".into()));
        }
        inner.links.push((from, to));
        Ok(())
    }

    fn unlink(&mut self, from: Pad, to: Pad) -> Result<()> {
        let mut inner = self.inner.lock();
        let pos = inner
            .links
            .iter()
            .position(|l| *l == (from, to))
            .ok_or_else(|| ChunkError::Graph("not linked".into()))?;
        inner.links.remove(pos);
        Ok(())
    }

    fn set_state(&mut self, node: NodeHandle, state: NodeState) -> Result<()> {
        self.inner.lock().node_mut(node)?.state = state;
        Ok(())
    }

    fn configure(&mut self, node: NodeHandle, setting: Setting) -> Result<()> {
        let Setting::Location(path) = setting;
        self.inner.lock().node_mut(node)?.location = Some(path);
        Ok(())
    }

    fn query_position(&self, node: NodeHandle) -> Option<u64> {
        self.inner.lock().positions.get(&node).copied()
    }

    fn add_probe(&mut self, pad: Pad, mask: ProbeMask, callback: ProbeCallback) -> Result<ProbeHandle> {
        let mut inner = self.inner.lock();
        let handle = ProbeHandle(inner.next_probe);
        inner.next_probe += 1;
        inner.probes.insert(
            handle,
            FakeProbe {
                pad,
                mask,
                callback: Arc::new(callback),
            },
        );
        Ok(handle)
    }

    fn remove_probe(&mut self, probe: ProbeHandle) -> Result<()> {
        let mut inner = self.inner.lock();
        let removed = inner
            .probes
            .remove(&probe)
            .ok_or_else(|| ChunkError::Graph(format!("unknown probe {}", probe.0)))?;

        let Some(roles) = inner.roles else { return Ok(()) };
        let still_blocked = inner
            .probes
            .values()
            .any(|p| p.pad == removed.pad && p.mask.blocking && p.mask.buffers);
        if removed.pad == Pad::output(roles.parser) && !still_blocked {
            while let Some(keyframe) = inner.held.pop_front() {
                inner.deliver(keyframe);
            }
        }
        Ok(())
    }

    fn send_eos(&mut self, pad: Pad) -> Result<()> {
        let into_muxer = {
            let mut inner = self.inner.lock();
            if inner.refuse_eos {
                return Err(ChunkError::Graph("end of stream refused".into()));
            }
            inner.eos_sent.push(pad);
            let into_muxer = inner.roles.is_some_and(|r| pad == Pad::input(r.muxer));
            if into_muxer && inner.stall_muxer_eos {
                inner.pending_muxer_eos = true;
                return Ok(());
            }
            into_muxer
        };
        if into_muxer {
            self.muxer_eos_out();
        }
        Ok(())
    }

    fn request_fanin_slot(&mut self, merge: NodeHandle) -> Result<Slot> {
        let mut inner = self.inner.lock();
        let slot = Slot(inner.next_slot);
        let state = inner
            .merges
            .get_mut(&merge)
            .ok_or_else(|| ChunkError::Graph("not a merge node".into()))?;
        state.inputs.push(slot);
        inner.next_slot += 1;
        Ok(slot)
    }

    fn release_fanin_slot(&mut self, merge: NodeHandle, slot: Slot) -> Result<()> {
        let mut inner = self.inner.lock();
        let state = inner
            .merges
            .get_mut(&merge)
            .ok_or_else(|| ChunkError::Graph("not a merge node".into()))?;
        let pos = state
            .inputs
            .iter()
            .position(|s| *s == slot)
            .ok_or_else(|| ChunkError::Graph(format!("unknown slot {}", slot.0)))?;
        state.inputs.remove(pos);
        let to = Pad::slot(merge, slot);
        inner.links.retain(|(_, t)| *t != to);
        inner.released.push(slot);
        Ok(())
    }

    fn subscribe(&mut self, callback: EventCallback) {
        self.inner.lock().subscriber = Some(Arc::new(callback));
    }

    fn start(&mut self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.started = true;
        for node in &mut inner.nodes {
            if !node.kind.as_ref().is_some_and(NodeKind::is_branch_member) {
                node.state = NodeState::Running;
            }
        }

        let merges: Vec<NodeHandle> = inner.merges.keys().copied().collect();
        for merge in merges {
            let inputs = inner.merges[&merge].inputs.clone();
            let first = inputs
                .into_iter()
                .find(|s| inner.upstream_of(Pad::slot(merge, *s)).is_some());
            if let Some(slot) = first {
                let played = inner.played_for(merge, slot);
                inner.activations.push(played);
                if let Some(state) = inner.merges.get_mut(&merge) {
                    state.active.update(Some(slot));
                }
            }
        }
        Ok(())
    }

    fn shutdown(&mut self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.started = false;
        inner.shut_down = true;
        for node in &mut inner.nodes {
            node.state = NodeState::Idle;
        }
        Ok(())
    }
}
