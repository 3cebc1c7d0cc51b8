// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Playback: splice the entries of an [`Index`](crate::index::Index) into one
//! continuous output.
//!
//! A fixed ring of branches feeds a merge node that plays its inputs in the
//! order they were attached:
//!
//! ```text
//!   branch 0: reader_0 | gap_0 → decoder_0 ─┐
//!   branch 1: reader_1 | gap_1 → decoder_1 ─┼─→ merge → queue → sink
//!   ...                                     ─┘
//! ```
//!
//! When the merge node drains the playing branch it raises
//! [`GraphEvent::InputDrained`] on a delivery thread. That only becomes a
//! [`ControlMessage`] on the scheduler queue; the control loop then detaches
//! the drained branch, loads it with the next entry and attaches it again
//! behind the branch that is now playing.
//!
//! Gap generators have no natural end, so a playing gap branch is polled
//! and receives an end-of-stream once its position reaches the gap length.
//! The same tick retries branches that could not be attached, so a failed
//! entry costs only that entry.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::PlayerConfig;
use crate::error::{ChunkError, Result};
use crate::graph::{
    GraphEvent, MediaGraph, NodeHandle, NodeKind, NodeParams, NodeState, Pad, Setting, Slot,
};
use crate::index::{Entry, IndexCursor};

// ─────────────────────────────── types ───────────────────────────────────────

/// Scheduler parameters.
#[derive(Debug, Clone)]
pub struct PlaybackOptions {
    pub branch_count: usize,
    pub gap_poll_interval: Duration,
    pub decode: bool,
    pub sink: String,
    pub dump_graphs: bool,
}

impl Default for PlaybackOptions {
    fn default() -> Self {
        Self::from(&PlayerConfig::default())
    }
}

impl From<&PlayerConfig> for PlaybackOptions {
    fn from(cfg: &PlayerConfig) -> Self {
        Self {
            branch_count: cfg.branch_count,
            gap_poll_interval: cfg.gap_poll_interval(),
            decode: cfg.decode,
            sink: cfg.sink.clone(),
            dump_graphs: cfg.dump_graphs,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchStatus {
    /// Detached from the merge node.
    Idle,
    /// Attached, waiting behind the playing branch.
    Queued,
    /// Currently feeding the output.
    Playing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SourceMode {
    Reader,
    Gap,
}

/// Reusable slot of the ring. Its nodes are created once and reconfigured
/// for every entry it carries.
struct Branch {
    id: usize,
    reader: NodeHandle,
    gap: NodeHandle,
    decoder: NodeHandle,
    mode: SourceMode,
    slot: Option<Slot>,
    linked: bool,
    status: BranchStatus,
    entry: Option<Entry>,
    duration_ns: u64,
    /// Set once end-of-stream was injected into the gap generator.
    eos_sent: bool,
}

impl Branch {
    fn leaf(&self) -> NodeHandle {
        match self.mode {
            SourceMode::Reader => self.reader,
            SourceMode::Gap => self.gap,
        }
    }
}

/// Work items of the control loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    BranchDrained,
    EndOfStream,
    GraphError(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Finished,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaybackSummary {
    /// Handoffs from one branch to the next.
    pub switches: usize,
    /// Index entries assigned to a branch.
    pub entries_loaded: usize,
}

// ─────────────────────────────── scheduler ───────────────────────────────────

/// Double-buffered (ring-buffered) playback over an [`IndexCursor`].
pub struct PlaybackScheduler<G: MediaGraph> {
    graph: G,
    cursor: IndexCursor,
    merge: NodeHandle,
    branches: Vec<Branch>,
    /// Branch feeding the output.
    active: usize,
    /// Attached branches waiting behind `active`, in merge input order.
    queue: VecDeque<usize>,
    tx: mpsc::UnboundedSender<ControlMessage>,
    rx: mpsc::UnboundedReceiver<ControlMessage>,
    gap_poll_interval: Duration,
    dump_graphs: bool,
    /// No entries left to schedule.
    exhausted: bool,
    /// Output ended or nothing to play.
    finished: bool,
    summary: PlaybackSummary,
}

impl<G: MediaGraph> PlaybackScheduler<G> {
    /// Build the output chain and the branch ring on `graph`.
    pub fn new(mut graph: G, cursor: IndexCursor, options: PlaybackOptions) -> Result<Self> {
        if options.branch_count < 2 {
            return Err(ChunkError::Config(format!(
                "at least two branches are required, got {}",
                options.branch_count
            )));
        }

        let merge = graph.create_node(NodeKind::Merge, NodeParams::named("merge"))?;
        let queue = graph.create_node(NodeKind::Queue, NodeParams::named("output_queue"))?;
        let sink = graph.create_node(
            NodeKind::Sink { factory: options.sink.clone() },
            NodeParams::named("sink"),
        )?;
        graph.link(Pad::output(merge), Pad::input(queue))?;
        graph.link(Pad::output(queue), Pad::input(sink))?;

        let mut branches = Vec::with_capacity(options.branch_count);
        for id in 0..options.branch_count {
            let reader = graph.create_node(NodeKind::ChunkReader, NodeParams::named(format!("reader_{id}")))?;
            let gap = graph.create_node(NodeKind::GapGenerator, NodeParams::named(format!("gap_{id}")))?;
            let decoder = graph.create_node(
                NodeKind::Decoder { passthrough: !options.decode },
                NodeParams::named(format!("decoder_{id}")),
            )?;
            graph.link(Pad::output(reader), Pad::input(decoder))?;

            branches.push(Branch {
                id,
                reader,
                gap,
                decoder,
                mode: SourceMode::Reader,
                slot: None,
                linked: false,
                status: BranchStatus::Idle,
                entry: None,
                duration_ns: 0,
                eos_sent: false,
            });
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let events_tx = tx.clone();
        graph.subscribe(Box::new(move |event| {
            let msg = match event {
                GraphEvent::InputDrained { merge: m } if m == merge => ControlMessage::BranchDrained,
                GraphEvent::InputDrained { .. } => return,
                GraphEvent::EndOfStream => ControlMessage::EndOfStream,
                GraphEvent::Error { message } => ControlMessage::GraphError(message),
            };
            // Receiver gone means the control loop already exited.
            let _ = events_tx.send(msg);
        }));

        info!(
            branches = options.branch_count,
            entries = cursor.remaining(),
            decode = options.decode,
            sink = %options.sink,
            "Playback graph created"
        );

        Ok(Self {
            graph,
            cursor,
            merge,
            branches,
            active: 0,
            queue: VecDeque::with_capacity(options.branch_count),
            tx,
            rx,
            gap_poll_interval: options.gap_poll_interval,
            dump_graphs: options.dump_graphs,
            exhausted: false,
            finished: false,
            summary: PlaybackSummary::default(),
        })
    }

    /// Load every branch of the ring with the next entries, mark the first
    /// attached branch playing and start the graph.
    pub fn prime(&mut self) -> Result<()> {
        for id in 0..self.branches.len() {
            let Some(entry) = self.next_entry() else {
                break;
            };
            self.load(id, entry);
        }

        let Some(first) = self.queue.pop_front() else {
            warn!("Nothing to play, no branch could be loaded");
            self.finished = true;
            return Ok(());
        };
        self.active = first;
        self.branches[first].status = BranchStatus::Playing;

        self.graph.start()?;
        if self.dump_graphs {
            self.graph.dump("chunkline-primed");
        }
        info!(active = first, remaining = self.cursor.remaining(), "Playback started");
        Ok(())
    }

    /// Handle one control message.
    pub fn handle(&mut self, msg: ControlMessage) -> Result<Flow> {
        match msg {
            ControlMessage::BranchDrained => Ok(self.on_branch_drained()),
            ControlMessage::EndOfStream => {
                info!(switches = self.summary.switches, "Playback reached end of stream");
                self.finished = true;
                self.queue.clear();
                for b in &mut self.branches {
                    b.status = BranchStatus::Idle;
                }
                Ok(Flow::Finished)
            }
            ControlMessage::GraphError(message) => {
                error!(error = %message, "Media graph reported an error");
                Err(ChunkError::Graph(message))
            }
        }
    }

    /// Drain queued messages without waiting.
    pub fn process_pending(&mut self) -> Result<Flow> {
        while let Ok(msg) = self.rx.try_recv() {
            if self.handle(msg)? == Flow::Finished {
                return Ok(Flow::Finished);
            }
        }
        Ok(if self.finished { Flow::Finished } else { Flow::Continue })
    }

    /// Switch protocol for a drained branch.
    fn on_branch_drained(&mut self) -> Flow {
        if self.finished {
            return Flow::Finished;
        }

        let drained = self.active;
        if self.branches[drained].status != BranchStatus::Playing {
            debug!(branch = drained, "Drain reported with no branch playing, ignored");
            return Flow::Continue;
        }
        debug!(branch = drained, "Branch drained");

        self.detach(drained);
        self.reset(drained);
        self.refill();

        match self.queue.pop_front() {
            Some(next) => {
                self.active = next;
                self.branches[next].status = BranchStatus::Playing;
                self.summary.switches += 1;
                debug!(from = drained, to = next, switches = self.summary.switches, "Output handed over");
            }
            None => info!("Last branch played out"),
        }
        Flow::Continue
    }

    /// Load every idle branch with the next entries, in ring order after
    /// the playing branch.
    pub fn refill(&mut self) {
        if self.finished {
            return;
        }
        let n = self.branches.len();
        for step in 1..=n {
            let id = (self.active + step) % n;
            if self.branches[id].status != BranchStatus::Idle {
                continue;
            }
            let Some(entry) = self.next_entry() else {
                return;
            };
            self.load(id, entry);
        }
    }

    fn next_entry(&mut self) -> Option<Entry> {
        if self.exhausted {
            return None;
        }
        let entry = self.cursor.next();
        if entry.is_none() {
            self.exhausted = true;
            info!("Index exhausted, no further entries to schedule");
        }
        entry
    }

    /// End a playing gap once its generator reached the gap length.
    pub fn poll_gap(&mut self) {
        if self.finished {
            return;
        }
        let branch = &self.branches[self.active];
        if branch.status != BranchStatus::Playing || branch.mode != SourceMode::Gap || branch.eos_sent {
            return;
        }
        let Some(position) = self.graph.query_position(branch.gap) else {
            return;
        };
        if position < branch.duration_ns {
            return;
        }

        let (id, gap) = (branch.id, branch.gap);
        match self.graph.send_eos(Pad::output(gap)) {
            Ok(()) => {
                self.branches[self.active].eos_sent = true;
                info!(branch = id, position_ms = position / 1_000_000, "Gap complete, end of stream injected");
            }
            Err(e) => warn!(branch = id, error = %e, "Cannot end gap"),
        }
    }

    /// Run the control loop until the output ends, the graph fails or
    /// `cancel` fires. The graph is shut down on the way out.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<PlaybackSummary> {
        self.prime()?;

        let mut gap_ticker = tokio::time::interval(self.gap_poll_interval);
        gap_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let result = loop {
            if self.finished {
                break Ok(());
            }
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Playback cancelled");
                    break Ok(());
                }
                msg = self.rx.recv() => {
                    let Some(msg) = msg else { break Ok(()) };
                    match self.handle(msg) {
                        Ok(Flow::Continue) => {}
                        Ok(Flow::Finished) => break Ok(()),
                        Err(e) => break Err(e),
                    }
                }
                _ = gap_ticker.tick() => {
                    self.poll_gap();
                    self.refill();
                }
            }
        };

        if let Err(e) = self.graph.shutdown() {
            warn!(error = %e, "Graph shutdown failed");
        }
        result.map(|()| self.summary.clone())
    }

    // ─────────────────────────── branch operations ──────────────────────────

    /// Assign `entry` to branch `id`. Failures leave the branch detached.
    fn load(&mut self, id: usize, entry: Entry) {
        self.summary.entries_loaded += 1;
        match self.try_load(id, &entry) {
            Ok(()) => {
                self.queue.push_back(id);
                let branch = &mut self.branches[id];
                branch.status = BranchStatus::Queued;
                match &entry {
                    Entry::Chunk(c) => info!(branch = id, file = %c.filename, "Branch loaded"),
                    Entry::Gap(g) => info!(branch = id, gap_ms = g.duration_ns / 1_000_000, "Branch loaded with gap"),
                }
                branch.entry = Some(entry);
            }
            Err(e) => {
                error!(branch = id, error = %e, "Branch could not be attached, output degraded");
                self.detach(id);
                self.branches[id].status = BranchStatus::Idle;
            }
        }
    }

    fn try_load(&mut self, id: usize, entry: &Entry) -> Result<()> {
        let mode = if entry.is_gap() { SourceMode::Gap } else { SourceMode::Reader };
        self.set_mode(id, mode)?;

        if let Entry::Chunk(chunk) = entry {
            self.graph.configure(self.branches[id].reader, Setting::Location(chunk.path.clone()))?;
        }
        let branch = &mut self.branches[id];
        branch.duration_ns = u64::try_from(entry.duration_ns()).unwrap_or(0);
        branch.eos_sent = false;

        self.attach(id)?;
        let (leaf, decoder) = (self.branches[id].leaf(), self.branches[id].decoder);
        self.graph.set_state(leaf, NodeState::Running)?;
        self.graph.set_state(decoder, NodeState::Running)?;
        Ok(())
    }

    /// Put the wanted source leaf in front of the branch decoder.
    fn set_mode(&mut self, id: usize, mode: SourceMode) -> Result<()> {
        let branch = &self.branches[id];
        if branch.mode == mode {
            return Ok(());
        }
        let (old_leaf, decoder) = (branch.leaf(), branch.decoder);
        let new_leaf = match mode {
            SourceMode::Reader => branch.reader,
            SourceMode::Gap => branch.gap,
        };

        self.graph.unlink(Pad::output(old_leaf), Pad::input(decoder))?;
        self.graph.link(Pad::output(new_leaf), Pad::input(decoder))?;
        self.branches[id].mode = mode;
        Ok(())
    }

    fn attach(&mut self, id: usize) -> Result<()> {
        let slot = self.graph.request_fanin_slot(self.merge)?;
        self.branches[id].slot = Some(slot);
        self.graph.link(Pad::output(self.branches[id].decoder), Pad::slot(self.merge, slot))?;
        self.branches[id].linked = true;
        Ok(())
    }

    /// Unlink from the merge node and give its slot back, so the next
    /// attach is granted a fresh one.
    fn detach(&mut self, id: usize) {
        let merge = self.merge;
        let branch = &mut self.branches[id];
        let Some(slot) = branch.slot.take() else {
            return;
        };
        let decoder = branch.decoder;
        let linked = std::mem::replace(&mut branch.linked, false);

        if linked {
            if let Err(e) = self.graph.unlink(Pad::output(decoder), Pad::slot(merge, slot)) {
                warn!(branch = id, error = %e, "Unlink from merge failed");
            }
        }
        if let Err(e) = self.graph.release_fanin_slot(merge, slot) {
            warn!(branch = id, error = %e, "Releasing merge slot failed");
        }
    }

    fn reset(&mut self, id: usize) {
        let (leaf, decoder) = (self.branches[id].leaf(), self.branches[id].decoder);
        for node in [leaf, decoder] {
            if let Err(e) = self.graph.set_state(node, NodeState::Idle) {
                warn!(branch = id, error = %e, "Branch reset failed");
            }
        }
        let branch = &mut self.branches[id];
        branch.status = BranchStatus::Idle;
        branch.entry = None;
    }

    // ─────────────────────────── accessors ──────────────────────────────────

    pub fn active_branch(&self) -> usize {
        self.active
    }

    pub fn branch_status(&self, id: usize) -> Option<BranchStatus> {
        self.branches.get(id).map(|b| b.status)
    }

    pub fn branch_entry(&self, id: usize) -> Option<&Entry> {
        self.branches.get(id).and_then(|b| b.entry.as_ref())
    }

    pub fn branch_count(&self) -> usize {
        self.branches.len()
    }

    /// Number of branches currently feeding the output.
    pub fn playing_count(&self) -> usize {
        self.branches.iter().filter(|b| b.status == BranchStatus::Playing).count()
    }

    pub fn merge_node(&self) -> NodeHandle {
        self.merge
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn summary(&self) -> &PlaybackSummary {
        &self.summary
    }

    pub fn graph(&self) -> &G {
        &self.graph
    }

    /// Sender into the control queue, for collaborators outside the graph.
    pub fn control_sender(&self) -> mpsc::UnboundedSender<ControlMessage> {
        self.tx.clone()
    }
}
