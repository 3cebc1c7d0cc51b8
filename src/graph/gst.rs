// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! GStreamer implementation of [`MediaGraph`].
//!
//! Node kinds map onto elements or small bins:
//!
//! ```text
//!   ChunkReader   filesrc name=reader ! matroskademux ! queue ! h264parse
//!   GapGenerator  videotestsrc pattern=black ! x264enc ! h264parse
//!   Decoder       avdec_h264 ! videoconvert      (queue when passthrough)
//!   Merge         concat, one request pad per slot
//! ```
//!
//! Branch members are state-locked so the pipeline never drives them; the
//! scheduler starts and stops them itself.

use std::collections::HashMap;
use std::sync::Arc;

use gstreamer as gst;
use gstreamer::prelude::*;
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::{
    ActiveInput, EventCallback, GraphEvent, MediaGraph, NodeHandle, NodeKind, NodeParams, NodeState, Pad,
    Port, ProbeCallback, ProbeData, ProbeHandle, ProbeMask, ProbeReturn, Setting, Signal, Slot,
};
use crate::error::{ChunkError, Result};

const READER_BIN: &str = "filesrc name=reader ! matroskademux ! queue ! h264parse";
const GAP_BIN: &str = "videotestsrc pattern=black is-live=false ! \
                       video/x-raw,width=1280,height=720,framerate=25/1 ! \
                       x264enc tune=zerolatency ! h264parse";
const DECODER_BIN: &str = "avdec_h264 ! videoconvert";

fn graph_err(context: &str, e: impl std::fmt::Display) -> ChunkError {
    ChunkError::Graph(format!("{context}: {e}"))
}

struct Node {
    element: gst::Element,
    kind: Option<NodeKind>,
}

pub struct GstGraph {
    pipeline: gst::Pipeline,
    nodes: Vec<Node>,
    slots: HashMap<(NodeHandle, Slot), gst::Pad>,
    next_slot: u32,
    probes: HashMap<ProbeHandle, (gst::Pad, gst::PadProbeId)>,
    next_probe: u64,
    subscriber: Option<Arc<EventCallback>>,
    started: bool,
}

impl GstGraph {
    /// Empty pipeline to be populated with [`MediaGraph::create_node`].
    pub fn new(name: &str) -> Self {
        Self::from_pipeline(gst::Pipeline::with_name(name))
    }

    /// Pipeline parsed from a launch description; nodes are then looked
    /// up with [`MediaGraph::find_node`].
    pub fn launch(description: &str) -> Result<Self> {
        let pipeline = gst::parse::launch(description)
            .map_err(|e| graph_err("parse_launch", e))?
            .downcast::<gst::Pipeline>()
            .map_err(|_| ChunkError::Graph("Not a pipeline".into()))?;
        Ok(Self::from_pipeline(pipeline))
    }

    fn from_pipeline(pipeline: gst::Pipeline) -> Self {
        Self {
            pipeline,
            nodes: Vec::new(),
            slots: HashMap::new(),
            next_slot: 0,
            probes: HashMap::new(),
            next_probe: 0,
            subscriber: None,
            started: false,
        }
    }

    fn element(&self, node: NodeHandle) -> Result<&gst::Element> {
        self.nodes
            .get(node.index())
            .map(|n| &n.element)
            .ok_or_else(|| ChunkError::Graph(format!("unknown node {}", node.index())))
    }

    fn pad(&self, pad: Pad) -> Result<gst::Pad> {
        let element = self.element(pad.node)?;
        let found = match pad.port {
            Port::Output => element.static_pad("src"),
            Port::Input => element
                .static_pad("sink")
                .or_else(|| element.sink_pads().into_iter().next()),
            Port::Slot(slot) => self.slots.get(&(pad.node, slot)).cloned(),
        };
        found.ok_or_else(|| {
            ChunkError::Graph(format!("{} has no pad for {:?}", element.name(), pad.port))
        })
    }

    fn build_element(kind: &NodeKind, name: Option<&str>) -> Result<gst::Element> {
        let element = match kind {
            NodeKind::ChunkReader => bin(READER_BIN)?,
            NodeKind::GapGenerator => bin(GAP_BIN)?,
            NodeKind::Decoder { passthrough: false } => bin(DECODER_BIN)?,
            NodeKind::Decoder { passthrough: true } | NodeKind::Queue => make("queue")?,
            NodeKind::Merge => make("concat")?,
            NodeKind::Sink { factory } => make(factory)?,
        };
        if let Some(name) = name {
            element.set_property("name", name);
        }
        Ok(element)
    }

    fn watch_merge(&self, merge: NodeHandle, callback: Arc<EventCallback>) -> Result<()> {
        let element = self.element(merge)?;
        // concat also notifies on the first activation and with no pad once
        // its last input is done; neither is a handoff.
        let tracker: Mutex<ActiveInput<gst::Pad>> = Mutex::new(ActiveInput::new());
        element.connect_notify(Some("active-pad"), move |concat, _| {
            let active = concat.property::<Option<gst::Pad>>("active-pad");
            let handoff = tracker.lock().update(active);
            if handoff {
                (*callback)(GraphEvent::InputDrained { merge });
            }
        });
        Ok(())
    }
}

fn bin(description: &str) -> Result<gst::Element> {
    gst::parse::bin_from_description(description, true)
        .map(|b| b.upcast::<gst::Element>())
        .map_err(|e| graph_err("bin_from_description", e))
}

fn make(factory: &str) -> Result<gst::Element> {
    gst::ElementFactory::make(factory)
        .build()
        .map_err(|e| graph_err(&format!("Failed to create {factory}"), e))
}

impl MediaGraph for GstGraph {
    fn create_node(&mut self, kind: NodeKind, params: NodeParams) -> Result<NodeHandle> {
        let element = Self::build_element(&kind, params.name.as_deref())?;
        self.pipeline
            .add(&element)
            .map_err(|e| graph_err("add", e))?;
        if kind.is_branch_member() {
            element.set_locked_state(true);
        }

        let handle = NodeHandle::from_index(self.nodes.len());
        let is_merge = kind == NodeKind::Merge;
        self.nodes.push(Node { element, kind: Some(kind) });

        if is_merge {
            if let Some(cb) = self.subscriber.clone() {
                self.watch_merge(handle, cb)?;
            }
        }
        Ok(handle)
    }

    fn find_node(&mut self, name: &str) -> Option<NodeHandle> {
        let element = self.pipeline.by_name(name)?;
        if let Some(i) = self.nodes.iter().position(|n| n.element == element) {
            return Some(NodeHandle::from_index(i));
        }
        self.nodes.push(Node { element, kind: None });
        Some(NodeHandle::from_index(self.nodes.len() - 1))
    }

    fn link(&mut self, from: Pad, to: Pad) -> Result<()> {
        let (src, sink) = (self.pad(from)?, self.pad(to)?);
        src.link(&sink).map_err(|e| graph_err("link", e))?;
        Ok(())
    }

    fn unlink(&mut self, from: Pad, to: Pad) -> Result<()> {
        let (src, sink) = (self.pad(from)?, self.pad(to)?);
        src.unlink(&sink).map_err(|e| graph_err("unlink", e))
    }

    fn set_state(&mut self, node: NodeHandle, state: NodeState) -> Result<()> {
        let target = match state {
            NodeState::Idle => gst::State::Null,
            NodeState::Ready => gst::State::Ready,
            NodeState::Running if self.started => gst::State::Playing,
            NodeState::Running => gst::State::Paused,
        };
        self.element(node)?
            .set_state(target)
            .map_err(|e| graph_err(&format!("set_state {target:?}"), e))?;
        Ok(())
    }

    fn configure(&mut self, node: NodeHandle, setting: Setting) -> Result<()> {
        let element = self.element(node)?;
        match setting {
            Setting::Location(path) => {
                let target = element
                    .downcast_ref::<gst::Bin>()
                    .and_then(|b| b.by_name("reader"))
                    .unwrap_or_else(|| element.clone());
                if target.find_property("location").is_none() {
                    return Err(ChunkError::Graph(format!("{} has no location", target.name())));
                }
                target.set_property("location", path.display().to_string());
            }
        }
        Ok(())
    }

    fn query_position(&self, node: NodeHandle) -> Option<u64> {
        let element = self.element(node).ok()?;
        let position = match element.static_pad("src") {
            Some(pad) => pad.query_position::<gst::ClockTime>(),
            None => element.query_position::<gst::ClockTime>(),
        };
        position.map(|t| t.nseconds())
    }

    fn add_probe(&mut self, pad: Pad, mask: ProbeMask, callback: ProbeCallback) -> Result<ProbeHandle> {
        let gst_pad = self.pad(pad)?;

        let mut probe_type = gst::PadProbeType::empty();
        if mask.buffers {
            probe_type |= gst::PadProbeType::BUFFER;
        }
        if mask.events {
            probe_type |= gst::PadProbeType::EVENT_DOWNSTREAM;
        }
        if mask.blocking {
            probe_type |= gst::PadProbeType::BLOCK;
        }

        let id = gst_pad
            .add_probe(probe_type, move |_, info| {
                let data = if let Some(buffer) = info.buffer() {
                    ProbeData::Buffer {
                        keyframe: !buffer.flags().contains(gst::BufferFlags::DELTA_UNIT),
                    }
                } else if let Some(event) = info.event() {
                    ProbeData::Event(match event.type_() {
                        gst::EventType::Eos => Signal::EndOfStream,
                        _ => Signal::Other,
                    })
                } else {
                    return gst::PadProbeReturn::Pass;
                };
                match (*callback)(&data) {
                    ProbeReturn::Pass => gst::PadProbeReturn::Pass,
                    ProbeReturn::Hold => gst::PadProbeReturn::Ok,
                    ProbeReturn::Drop => gst::PadProbeReturn::Drop,
                }
            })
            .ok_or_else(|| ChunkError::Graph("add_probe refused".into()))?;

        let handle = ProbeHandle(self.next_probe);
        self.next_probe += 1;
        self.probes.insert(handle, (gst_pad, id));
        Ok(handle)
    }

    fn remove_probe(&mut self, probe: ProbeHandle) -> Result<()> {
        let (pad, id) = self
            .probes
            .remove(&probe)
            .ok_or_else(|| ChunkError::Graph(format!("unknown probe {}", probe.0)))?;
        pad.remove_probe(id);
        Ok(())
    }

    fn send_eos(&mut self, pad: Pad) -> Result<()> {
        let gst_pad = self.pad(pad)?;
        let sent = match gst_pad.direction() {
            gst::PadDirection::Src => gst_pad.push_event(gst::event::Eos::new()),
            _ => gst_pad.send_event(gst::event::Eos::new()),
        };
        if !sent {
            warn!(pad = %gst_pad.name(), "End of stream not accepted");
            return Err(ChunkError::Graph(format!("{} refused end of stream", gst_pad.name())));
        }
        Ok(())
    }

    fn request_fanin_slot(&mut self, merge: NodeHandle) -> Result<Slot> {
        let pad = self
            .element(merge)?
            .request_pad_simple("sink_%u")
            .ok_or_else(|| ChunkError::Graph("merge refused a new input".into()))?;
        let slot = Slot(self.next_slot);
        self.next_slot += 1;
        debug!(slot = slot.0, pad = %pad.name(), "Merge input requested");
        self.slots.insert((merge, slot), pad);
        Ok(slot)
    }

    fn release_fanin_slot(&mut self, merge: NodeHandle, slot: Slot) -> Result<()> {
        let pad = self
            .slots
            .remove(&(merge, slot))
            .ok_or_else(|| ChunkError::Graph(format!("unknown slot {}", slot.0)))?;
        self.element(merge)?.release_request_pad(&pad);
        Ok(())
    }

    fn subscribe(&mut self, callback: EventCallback) {
        let callback = Arc::new(callback);

        if let Some(bus) = self.pipeline.bus() {
            let cb = callback.clone();
            bus.set_sync_handler(move |_, msg| {
                match msg.view() {
                    gst::MessageView::Eos(..) => (*cb)(GraphEvent::EndOfStream),
                    gst::MessageView::Error(err) => (*cb)(GraphEvent::Error {
                        message: format!(
                            "{} ({})",
                            err.error(),
                            err.debug().map(|d| d.to_string()).unwrap_or_default()
                        ),
                    }),
                    _ => {}
                }
                gst::BusSyncReply::Drop
            });
        }

        let merges: Vec<NodeHandle> = self
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.kind == Some(NodeKind::Merge))
            .map(|(i, _)| NodeHandle::from_index(i))
            .collect();
        for merge in merges {
            if let Err(e) = self.watch_merge(merge, callback.clone()) {
                warn!(error = %e, "Cannot watch merge node");
            }
        }
        self.subscriber = Some(callback);
    }

    fn start(&mut self) -> Result<()> {
        self.pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| graph_err("set_state Playing", e))?;
        self.started = true;

        // Locked members primed before start only reached Paused.
        for node in &self.nodes {
            if node.element.current_state() == gst::State::Paused
                || node.element.pending_state() == gst::State::Paused
            {
                node.element
                    .set_state(gst::State::Playing)
                    .map_err(|e| graph_err("set_state Playing", e))?;
            }
        }
        Ok(())
    }

    fn shutdown(&mut self) -> Result<()> {
        self.started = false;
        if let Some(bus) = self.pipeline.bus() {
            bus.unset_sync_handler();
        }
        self.pipeline
            .set_state(gst::State::Null)
            .map_err(|e| graph_err("set_state Null", e))?;
        Ok(())
    }

    fn dump(&self, name: &str) {
        self.pipeline
            .debug_to_dot_file(gst::DebugGraphDetails::all(), name);
    }
}
