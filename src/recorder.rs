// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Segment rotation for a running recording graph.
//!
//! ```text
//!   source → parser ─[gate]→ muxer → ... → sink ─[flush]
//! ```
//!
//! Every rotation period:
//!   1. arm, and put a gate on the parser output: delta units pass, the
//!      first keyframe is held there
//!   2. once a keyframe is held, watch the sink input and push end-of-stream
//!      into the muxer so it finalizes the current file
//!   3. when that end-of-stream reaches the sink it is swallowed; muxer and
//!      sink are restarted on a fresh file
//!   4. lift the gate, so the held keyframe opens the new file
//!
//! Ticks that arrive while a rotation is in flight are dropped.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDateTime};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::RecorderConfig;
use crate::error::{ChunkError, Result};
use crate::graph::{
    GraphEvent, MediaGraph, NodeHandle, NodeState, Pad, ProbeData, ProbeHandle, ProbeMask,
    ProbeReturn, Setting, Signal,
};
use crate::index::entry::{chunk_filename, local_to_ns};
use crate::playback::Flow;

/// How long a shutdown waits for the last file to be finalized.
const FINALIZE_TIMEOUT: Duration = Duration::from_secs(5);

/// Source of the local wall-clock time used to name segment files.
pub trait WallClock: Send {
    fn now(&self) -> NaiveDateTime;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl WallClock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

#[derive(Debug, Clone)]
pub struct RotatorOptions {
    pub directory: PathBuf,
    pub period: Duration,
    pub extension: String,
    pub parser_node: String,
    pub muxer_node: String,
    pub sink_node: String,
}

impl From<&RecorderConfig> for RotatorOptions {
    fn from(cfg: &RecorderConfig) -> Self {
        Self {
            directory: cfg.directory.clone(),
            period: cfg.rotation_period(),
            extension: cfg.extension.clone(),
            parser_node: cfg.parser_node.clone(),
            muxer_node: cfg.muxer_node.clone(),
            sink_node: cfg.sink_node.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RotationState {
    /// A rotation is in flight.
    pub armed: bool,
    /// When the current file was opened, nanoseconds since the epoch.
    pub last_rotation_ns: Option<i64>,
}

/// Work items of the rotation loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecorderMessage {
    KeyframeHeld,
    MuxerFlushed,
    EndOfStream,
    GraphError(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RotationSummary {
    /// Every file opened, in order.
    pub files: Vec<PathBuf>,
}

pub struct SegmentRotator<G: MediaGraph, C: WallClock = SystemClock> {
    graph: G,
    clock: C,
    parser: NodeHandle,
    muxer: NodeHandle,
    sink: NodeHandle,
    directory: PathBuf,
    period: Duration,
    extension: String,
    state: RotationState,
    gate: Option<ProbeHandle>,
    flush: Option<ProbeHandle>,
    tx: mpsc::UnboundedSender<RecorderMessage>,
    rx: mpsc::UnboundedReceiver<RecorderMessage>,
    files: Vec<PathBuf>,
    started: bool,
}

fn lookup<G: MediaGraph>(graph: &mut G, name: &str) -> Result<NodeHandle> {
    graph
        .find_node(name)
        .ok_or_else(|| ChunkError::MissingNode { name: name.to_string() })
}

impl<G: MediaGraph, C: WallClock> SegmentRotator<G, C> {
    /// Attach to an already built recording graph. The parser, muxer and
    /// sink must all be present; the output directory is created if needed.
    pub fn new(mut graph: G, options: RotatorOptions, clock: C) -> Result<Self> {
        let parser = lookup(&mut graph, &options.parser_node)?;
        let muxer = lookup(&mut graph, &options.muxer_node)?;
        let sink = lookup(&mut graph, &options.sink_node)?;

        std::fs::create_dir_all(&options.directory)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let events_tx = tx.clone();
        graph.subscribe(Box::new(move |event| {
            let msg = match event {
                GraphEvent::EndOfStream => RecorderMessage::EndOfStream,
                GraphEvent::Error { message } => RecorderMessage::GraphError(message),
                GraphEvent::InputDrained { .. } => return,
            };
            let _ = events_tx.send(msg);
        }));

        Ok(Self {
            graph,
            clock,
            parser,
            muxer,
            sink,
            directory: options.directory,
            period: options.period,
            extension: options.extension,
            state: RotationState::default(),
            gate: None,
            flush: None,
            tx,
            rx,
            files: Vec::new(),
            started: false,
        })
    }

    /// Open the first file and start the graph.
    pub fn start(&mut self) -> Result<()> {
        let path = self.open_next_file()?;
        self.graph.start()?;
        self.started = true;
        info!(file = %path.display(), period_s = self.period.as_secs(), "Recording started");
        Ok(())
    }

    /// Rotation timer fired. Returns whether a rotation was armed.
    pub fn on_tick(&mut self) -> Result<bool> {
        if !self.started || self.state.armed {
            debug!("Rotation already in flight, tick dropped");
            return Ok(false);
        }

        let held = Arc::new(AtomicBool::new(false));
        let tx = self.tx.clone();
        let gate = self.graph.add_probe(
            Pad::output(self.parser),
            ProbeMask::BLOCKING_BUFFER,
            Box::new(move |data| match data {
                ProbeData::Buffer { keyframe: true } => {
                    if !held.swap(true, Ordering::SeqCst) {
                        let _ = tx.send(RecorderMessage::KeyframeHeld);
                    }
                    ProbeReturn::Hold
                }
                _ => ProbeReturn::Pass,
            }),
        )?;

        self.gate = Some(gate);
        self.state.armed = true;
        debug!("Rotation armed, waiting for a keyframe");
        Ok(true)
    }

    /// A keyframe is held at the gate: finalize the current file.
    fn on_keyframe_held(&mut self) -> Result<()> {
        if !self.state.armed || self.flush.is_some() {
            return Ok(());
        }

        let tx = self.tx.clone();
        let flush = self.graph.add_probe(
            Pad::input(self.sink),
            ProbeMask::BLOCKING_EVENT,
            Box::new(move |data| match data {
                ProbeData::Event(Signal::EndOfStream) => {
                    let _ = tx.send(RecorderMessage::MuxerFlushed);
                    ProbeReturn::Drop
                }
                _ => ProbeReturn::Pass,
            }),
        )?;
        self.flush = Some(flush);

        self.graph.send_eos(Pad::input(self.muxer))?;
        debug!("Keyframe held, muxer flushing");
        Ok(())
    }

    /// The old file is complete: restart muxer and sink on a new one.
    fn on_muxer_flushed(&mut self) -> Result<()> {
        let Some(flush) = self.flush.take() else {
            return Ok(());
        };
        self.graph.remove_probe(flush)?;

        self.graph.set_state(self.muxer, NodeState::Idle)?;
        self.graph.set_state(self.sink, NodeState::Idle)?;
        let path = self.open_next_file()?;
        self.graph.set_state(self.muxer, NodeState::Running)?;
        self.graph.set_state(self.sink, NodeState::Running)?;

        if let Some(gate) = self.gate.take() {
            self.graph.remove_probe(gate)?;
        }
        self.state.armed = false;
        info!(file = %path.display(), files = self.files.len(), "Segment rotated");
        Ok(())
    }

    fn open_next_file(&mut self) -> Result<PathBuf> {
        let now = self.clock.now();
        let path = self.directory.join(chunk_filename(&now, &self.extension));
        self.graph.configure(self.sink, Setting::Location(path.clone()))?;
        self.state.last_rotation_ns = local_to_ns(&now);
        self.files.push(path.clone());
        Ok(path)
    }

    pub fn handle(&mut self, msg: RecorderMessage) -> Result<Flow> {
        match msg {
            RecorderMessage::KeyframeHeld => self.on_keyframe_held()?,
            RecorderMessage::MuxerFlushed => self.on_muxer_flushed()?,
            RecorderMessage::EndOfStream => {
                info!(files = self.files.len(), "Recording reached end of stream");
                return Ok(Flow::Finished);
            }
            RecorderMessage::GraphError(message) => {
                error!(error = %message, "Recording graph reported an error");
                return Err(ChunkError::Graph(message));
            }
        }
        Ok(Flow::Continue)
    }

    /// Drain queued messages without waiting.
    pub fn process_pending(&mut self) -> Result<Flow> {
        while let Ok(msg) = self.rx.try_recv() {
            if self.handle(msg)? == Flow::Finished {
                return Ok(Flow::Finished);
            }
        }
        Ok(Flow::Continue)
    }

    /// Record until the source ends, the graph fails or `cancel` fires.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<RotationSummary> {
        self.start()?;

        let mut ticker = tokio::time::interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let result = loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Recording cancelled");
                    break self.finalize().await;
                }
                msg = self.rx.recv() => {
                    let Some(msg) = msg else { break Ok(()) };
                    match self.handle(msg) {
                        Ok(Flow::Continue) => {}
                        Ok(Flow::Finished) => break Ok(()),
                        Err(e) => break Err(e),
                    }
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.on_tick() {
                        warn!(error = %e, "Cannot arm rotation");
                    }
                }
            }
        };

        if let Err(e) = self.graph.shutdown() {
            warn!(error = %e, "Graph shutdown failed");
        }
        result.map(|()| RotationSummary { files: self.files.clone() })
    }

    /// Push end-of-stream into the muxer so the last file gets a proper
    /// trailer, and wait for it to come out of the graph. A graph error
    /// while waiting is returned; running out of time is only logged.
    async fn finalize(&mut self) -> Result<()> {
        if let Some(flush) = self.flush.take() {
            let _ = self.graph.remove_probe(flush);
        }
        if let Err(e) = self.graph.send_eos(Pad::input(self.muxer)) {
            warn!(error = %e, "Cannot finalize last file");
            return Ok(());
        }

        let wait = async {
            while let Some(msg) = self.rx.recv().await {
                match msg {
                    RecorderMessage::EndOfStream => return Ok(()),
                    RecorderMessage::GraphError(message) => {
                        error!(error = %message, "Media graph failed while finalizing");
                        return Err(ChunkError::Graph(message));
                    }
                    other => debug!(message = ?other, "Ignored while finalizing"),
                }
            }
            Ok(())
        };
        match tokio::time::timeout(FINALIZE_TIMEOUT, wait).await {
            Ok(result) => result,
            Err(_) => {
                warn!("Last file not finalized in time");
                Ok(())
            }
        }
    }

    pub fn state(&self) -> RotationState {
        self.state
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn graph(&self) -> &G {
        &self.graph
    }
}
