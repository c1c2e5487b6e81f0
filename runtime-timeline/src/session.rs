//! Session-scoped timeline reconstruction context

use crate::{
    anomaly::Diagnostics,
    ctf::{self, Tid, TraceData},
    event::{Phase, Record, TraceEvent, TrackId},
    frame::{
        assembler::{
            FrameAssembler, Placement, DEFAULT_MAX_FRAME_AGE, DEFAULT_PENDING_CAPACITY,
        },
        frame_budget,
        pairing::{DefaultPairing, FramePairing},
        Frame, TrackRole,
    },
    pending::PendingEvents,
    tree::{AsyncSpanMatcher, EventNode, EventTreeBuilder},
};
use log::{debug, info, trace};
use serde::Deserialize;
use std::{
    collections::{HashMap, VecDeque},
    sync::mpsc::{Receiver, Sender},
};

/// Tunable parameters of a timeline session
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct TimelineConfig {
    /// Number of events that each track may hold back for reordering
    pub reorder_window: usize,

    /// Maximal number of incomplete frames
    pub pending_frame_capacity: usize,

    /// Number of frame completions after which an incomplete frame is dropped
    pub max_frame_age: u64,

    /// Frame rate that the application targets, decides the frame budget
    pub target_fps: f64,

    /// Name of the event argument holding the runtime frame number
    pub frame_number_arg: Box<str>,

    /// Thread id of the UI track, discovered from thread names if unset
    pub ui_track: Option<Tid>,

    /// Thread id of the raster track, discovered from thread names if unset
    pub raster_track: Option<Tid>,

    /// Names of the UI root spans that stand for a frame, any if unset
    pub ui_frame_spans: Option<Box<[Box<str>]>>,

    /// Names of the raster root spans that stand for a frame, any if unset
    pub raster_frame_spans: Option<Box<[Box<str>]>>,

    /// Number of anomaly records to retain, older ones are only counted
    pub max_anomalies: usize,

    /// Number of completed spans outside of frames to retain until they are
    /// taken out, older ones are dropped and counted
    pub max_retained_spans: usize,
}
//
impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            reorder_window: 0,
            pending_frame_capacity: DEFAULT_PENDING_CAPACITY,
            max_frame_age: DEFAULT_MAX_FRAME_AGE,
            target_fps: 60.0,
            frame_number_arg: "frame_number".into(),
            ui_track: None,
            raster_track: None,
            ui_frame_spans: None,
            raster_frame_spans: None,
            max_anomalies: 256,
            max_retained_spans: 1024,
        }
    }
}

/// Message understood by [`TimelineSession::run()`]
#[derive(Clone, Debug)]
pub enum Inbound {
    /// Raw record from the runtime's timeline stream
    Raw(ctf::TraceEvent),

    /// Already normalized event
    Event(TraceEvent),

    /// The stream reached a quiet point, release everything held back
    Flush,

    /// Discard all pending state
    Reset,

    /// The runtime went away, stop processing
    Disconnect,
}

/// Timeline reconstruction state of one runtime connection
///
/// Owns every pending structure: the reorder buffers, the per-track tree
/// builders, the async span matcher and the frame assembler. Inputs are
/// processed one at a time, in arrival order.
#[derive(Debug)]
pub struct TimelineSession {
    /// Session parameters
    config: TimelineConfig,

    /// Role of the tracks which take part in frame rendering
    roles: HashMap<TrackId, TrackRole>,

    /// Per-track reorder buffers
    pending: PendingEvents,

    /// Per-track span tree builders
    builders: HashMap<TrackId, EventTreeBuilder>,

    /// Async span matcher
    async_spans: AsyncSpanMatcher,

    /// Frame assembler
    assembler: FrameAssembler,

    /// Completed frames that were not taken out yet
    frames: VecDeque<Frame>,

    /// Completed root spans which are not part of a frame, oldest first
    spans: VecDeque<EventNode>,

    /// Number of spans dropped from `spans` to respect its bound
    dropped_spans: u64,

    /// Anomalies observed so far
    diagnostics: Diagnostics,

    /// Truth that the runtime went away
    disconnected: bool,
}
//
impl TimelineSession {
    /// Start a session which pairs frames in the default way
    pub fn new(config: TimelineConfig) -> Self {
        let pairing = Box::new(DefaultPairing::new(config.frame_number_arg.clone()));
        Self::with_pairing(config, pairing)
    }

    /// Start a session with a custom frame pairing strategy
    pub fn with_pairing(config: TimelineConfig, pairing: Box<dyn FramePairing>) -> Self {
        let mut assembler = FrameAssembler::new(pairing)
            .with_capacity(config.pending_frame_capacity)
            .with_max_age(config.max_frame_age)
            .with_budget(frame_budget(config.target_fps));
        if let Some(names) = &config.ui_frame_spans {
            assembler = assembler.with_span_filter(TrackRole::Ui, names.iter().cloned());
        }
        if let Some(names) = &config.raster_frame_spans {
            assembler = assembler.with_span_filter(TrackRole::Raster, names.iter().cloned());
        }

        let mut roles = HashMap::new();
        if let Some(tid) = config.ui_track {
            roles.insert(TrackId(tid), TrackRole::Ui);
        }
        if let Some(tid) = config.raster_track {
            roles.insert(TrackId(tid), TrackRole::Raster);
        }

        debug!("Starting timeline session with {config:?}");
        Self {
            pending: PendingEvents::new(config.reorder_window),
            diagnostics: Diagnostics::new(config.max_anomalies),
            config,
            roles,
            builders: HashMap::new(),
            async_spans: AsyncSpanMatcher::new(),
            assembler,
            frames: VecDeque::new(),
            spans: VecDeque::new(),
            dropped_spans: 0,
            disconnected: false,
        }
    }

    /// Session parameters
    pub fn config(&self) -> &TimelineConfig {
        &self.config
    }

    /// Anomalies observed so far
    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// Take out the retained anomaly records
    pub fn take_anomalies(&mut self) -> Vec<crate::anomaly::Anomaly> {
        self.diagnostics.drain().collect()
    }

    /// Role of a track, if it takes part in frame rendering
    pub fn track_role(&self, track: TrackId) -> Option<TrackRole> {
        self.roles.get(&track).copied()
    }

    /// Assign a role to a track
    pub fn set_track_role(&mut self, track: TrackId, role: TrackRole) {
        self.roles.insert(track, role);
    }

    /// Truth that the runtime went away
    pub fn is_disconnected(&self) -> bool {
        self.disconnected
    }

    /// Number of frames that still miss some spans
    pub fn pending_frame_count(&self) -> usize {
        self.assembler.pending_count()
    }

    /// Number of spans that are still open, across all tracks
    pub fn open_span_count(&self) -> usize {
        self.builders.values().map(EventTreeBuilder::open_depth).sum::<usize>()
            + self.async_spans.open_count()
    }

    /// Take out the completed frames, in order of completion
    pub fn drain_frames(&mut self) -> impl Iterator<Item = Frame> + '_ {
        self.frames.drain(..)
    }

    /// Take out the completed root spans which are not part of any frame
    ///
    /// Only the most recent [`max_retained_spans`](TimelineConfig::max_retained_spans)
    /// are retained between two calls.
    pub fn drain_spans(&mut self) -> impl Iterator<Item = EventNode> + '_ {
        self.spans.drain(..)
    }

    /// Number of spans outside of frames that were dropped before being
    /// taken out
    pub fn dropped_span_count(&self) -> u64 {
        self.dropped_spans
    }

    /// Process every record of a trace
    ///
    /// Thread names are processed first, as they may only be emitted at the
    /// end of a trace but decide how the other records are handled. Records
    /// held back for reordering are not released, see [`flush()`](Self::flush).
    pub fn ingest(&mut self, trace: TraceData) {
        let (names, others): (Vec<_>, Vec<_>) = trace
            .into_events()
            .into_vec()
            .into_iter()
            .partition(|raw| matches!(raw, ctf::TraceEvent::M(_)));
        for raw in names.into_iter().chain(others) {
            self.process_raw(raw);
        }
    }

    /// Process one raw record from the runtime
    pub fn process_raw(&mut self, raw: ctf::TraceEvent) {
        match Record::try_from(raw) {
            Ok(record) => self.process_record(record),
            Err(e) => self.diagnostics.record(e),
        }
    }

    /// Process one normalized record
    pub fn process_record(&mut self, record: Record) {
        match record {
            Record::Event(event) => self.process(event),
            Record::ThreadName { track, name } => self.name_track(track, &name),
            Record::Ignored => trace!("Ignoring record without timeline content"),
        }
    }

    /// Process one timeline event
    pub fn process(&mut self, event: TraceEvent) {
        if self.disconnected {
            trace!("Ignoring {event:?} received after disconnection");
            return;
        }
        for event in self.pending.push(event, &mut self.diagnostics) {
            self.dispatch(event);
        }
    }

    /// Release everything that can be released without further input
    ///
    /// Events held back for reordering are processed and complete spans are
    /// closed. Spans that were opened by a begin event stay open and
    /// incomplete frames stay pending.
    pub fn flush(&mut self) {
        let released = self.pending.flush();
        debug!("Flushing {} held back event(s)", released.len());
        for event in released {
            self.dispatch(event);
        }

        let mut tracks = self.builders.keys().copied().collect::<Vec<_>>();
        tracks.sort_unstable();
        for track in tracks {
            let roots = match self.builders.get_mut(&track) {
                Some(builder) => builder.finish(&mut self.diagnostics),
                None => continue,
            };
            for root in roots {
                self.route(root);
            }
        }
    }

    /// Record that the runtime went away
    ///
    /// Pending state is frozen as-is, no frame is completed artificially.
    /// Further events are ignored until the next [`reset()`](Self::reset).
    pub fn disconnect(&mut self) {
        info!(
            "Runtime disconnected with {} open span(s) and {} incomplete frame(s)",
            self.open_span_count(),
            self.pending_frame_count()
        );
        self.disconnected = true;
    }

    /// Discard all pending state, ready for a new connection
    ///
    /// Frames and spans that were already completed but not taken out yet
    /// are kept, as are track roles and anomaly counts.
    pub fn reset(&mut self) {
        let events = self.pending.reset();
        let spans = self.builders.values_mut().map(EventTreeBuilder::reset).sum::<usize>()
            + self.async_spans.reset();
        let frames = self.assembler.reset();
        debug!("Reset discarded {events} held event(s), {spans} open span(s) and {frames} frame(s)");
        self.builders.clear();
        self.disconnected = false;
    }

    /// Process inbound messages until disconnection or hang-up
    ///
    /// Completed frames are forwarded as soon as they are available. Spans
    /// that are not part of a frame are kept for [`drain_spans()`](Self::drain_spans),
    /// within the retention bound of the configuration.
    pub fn run(&mut self, inbound: Receiver<Inbound>, frames: Sender<Frame>) {
        while let Ok(message) = inbound.recv() {
            let disconnect = matches!(message, Inbound::Disconnect);
            match message {
                Inbound::Raw(raw) => self.process_raw(raw),
                Inbound::Event(event) => self.process(event),
                Inbound::Flush => self.flush(),
                Inbound::Reset => self.reset(),
                Inbound::Disconnect => self.disconnect(),
            }
            for frame in self.frames.drain(..) {
                if frames.send(frame).is_err() {
                    debug!("Frame consumer hung up, stopping");
                    return;
                }
            }
            if disconnect {
                return;
            }
        }
        self.disconnect();
    }

    /// Handle a thread name record
    fn name_track(&mut self, track: TrackId, name: &str) {
        let pinned = [self.config.ui_track, self.config.raster_track]
            .contains(&Some(track.0));
        if pinned {
            return;
        }
        if let Some(role) = TrackRole::from_thread_name(name) {
            debug!("{track} is named {name:?}, using it as the {role} track");
            self.roles.insert(track, role);
        }
    }

    /// Feed a released event to the right builder
    fn dispatch(&mut self, event: TraceEvent) {
        match event.phase() {
            Phase::AsyncBegin | Phase::AsyncEnd | Phase::AsyncStep => {
                if let Some(span) = self.async_spans.push(event, &mut self.diagnostics) {
                    self.keep_span(span);
                }
            }
            Phase::Begin | Phase::End | Phase::Complete | Phase::Instant => {
                let track = event.track();
                let roots = self
                    .builders
                    .entry(track)
                    .or_insert_with(|| EventTreeBuilder::new(track))
                    .push(event, &mut self.diagnostics);
                for root in roots {
                    self.route(root);
                }
            }
        }
    }

    /// Hand a completed root span to the frame assembler or the span queue
    fn route(&mut self, root: EventNode) {
        let Some(role) = self.track_role(root.track()) else {
            self.keep_span(root);
            return;
        };
        match self.assembler.push(role, root, &mut self.diagnostics) {
            Placement::Frame(frame) => {
                trace!("Completed frame {}", frame.key());
                self.frames.push_back(frame);
            }
            Placement::Pending(key) => trace!("Frame {key} is still incomplete"),
            Placement::Unassigned(span) => self.keep_span(span),
        }
    }

    /// Queue a span which is not part of a frame, dropping the oldest one
    /// if the queue is full
    fn keep_span(&mut self, span: EventNode) {
        self.spans.push_back(span);
        while self.spans.len() > self.config.max_retained_spans {
            if let Some(oldest) = self.spans.pop_front() {
                trace!("Dropping span {:?} which was not taken out in time", oldest.name());
                self.dropped_spans += 1;
            }
        }
    }
}
//
impl Default for TimelineSession {
    fn default() -> Self {
        Self::new(TimelineConfig::default())
    }
}
