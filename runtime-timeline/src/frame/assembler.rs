//! Grouping of UI and raster root spans into frames

use super::{
    frame_budget,
    pairing::{DefaultPairing, FramePairing},
    Frame, FrameKey, PendingFrame, TrackRole,
};
use crate::{
    anomaly::{Anomaly, Diagnostics, EvictionReason},
    ctf::Duration,
    tree::EventNode,
};
use log::{debug, trace};
use std::collections::VecDeque;

/// Default bound on the number of incomplete frames
pub const DEFAULT_PENDING_CAPACITY: usize = 32;

/// Default number of frame completions after which a pending frame is stale
pub const DEFAULT_MAX_FRAME_AGE: u64 = 16;

/// What became of a root span submitted to the assembler
#[derive(Clone, Debug, PartialEq)]
pub enum Placement {
    /// The span completed a frame
    Frame(Frame),

    /// The span was stored in a frame that still misses spans
    Pending(FrameKey),

    /// The span is not part of any frame and is given back
    ///
    /// This happens to async spans, to spans filtered out by name, and to
    /// spans that could not be keyed or would duplicate a frame's slot.
    Unassigned(EventNode),
}

/// Mechanism to group root spans of the UI and raster tracks into frames
#[derive(Debug)]
pub struct FrameAssembler {
    /// How spans are associated with frames
    pairing: Box<dyn FramePairing>,

    /// Incomplete frames, oldest first
    pending: VecDeque<PendingFrame>,

    /// Maximal number of incomplete frames
    capacity: usize,

    /// Number of completions after which an incomplete frame is dropped
    max_age: u64,

    /// Logical clock, counts completed frames
    clock: u64,

    /// Time budget of a frame
    budget: Duration,

    /// Names of the root spans that stand for a frame, by role
    span_filters: [Option<Box<[Box<str>]>>; 2],
}
//
impl FrameAssembler {
    /// Set up an assembler with a certain pairing strategy
    pub fn new(pairing: Box<dyn FramePairing>) -> Self {
        Self {
            pairing,
            pending: VecDeque::new(),
            capacity: DEFAULT_PENDING_CAPACITY,
            max_age: DEFAULT_MAX_FRAME_AGE,
            clock: 0,
            budget: frame_budget(60.0),
            span_filters: [None, None],
        }
    }

    /// Bound the number of incomplete frames
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Drop incomplete frames once this many frames completed after them
    pub fn with_max_age(mut self, max_age: u64) -> Self {
        self.max_age = max_age;
        self
    }

    /// Set the time budget of emitted frames
    pub fn with_budget(mut self, budget: Duration) -> Self {
        self.budget = budget;
        self
    }

    /// Only consider root spans with one of these names for a role
    pub fn with_span_filter(
        mut self,
        role: TrackRole,
        names: impl IntoIterator<Item = Box<str>>,
    ) -> Self {
        self.span_filters[role_index(role)] = Some(names.into_iter().collect());
        self
    }

    /// Number of incomplete frames
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Keys of the incomplete frames, oldest first
    pub fn pending_keys(&self) -> impl Iterator<Item = FrameKey> + '_ {
        self.pending.iter().map(PendingFrame::key)
    }

    /// Number of frames completed so far
    pub fn clock(&self) -> u64 {
        self.clock
    }

    /// Time budget of emitted frames
    pub fn budget(&self) -> Duration {
        self.budget
    }

    /// Submit a completed root span of a UI or raster track
    pub fn push(
        &mut self,
        role: TrackRole,
        span: EventNode,
        diagnostics: &mut Diagnostics,
    ) -> Placement {
        if span.is_async() || !self.accepts(role, &span) {
            trace!("{role} span {:?} is not a frame span", span.name());
            return Placement::Unassigned(span);
        }
        let Some(key) = self.pairing.frame_key(role, &span) else {
            diagnostics.record(Anomaly::UnkeyedSpan {
                role,
                name: span.name().into(),
            });
            return Placement::Unassigned(span);
        };

        // Fill an existing frame if there is one
        if let Some(idx) = self.pending.iter().position(|frame| frame.key() == key) {
            let slot = self.pending[idx].slot(role);
            if slot.is_some() {
                diagnostics.record(Anomaly::DuplicateFrameSpan { key, role });
                return Placement::Unassigned(span);
            }
            *slot = Some(span);
            return match self.pending[idx].take_frame(self.budget) {
                Some(frame) => {
                    self.pending.remove(idx);
                    self.on_completion(diagnostics);
                    Placement::Frame(frame)
                }
                None => Placement::Pending(key),
            };
        }

        // Otherwise create a new frame, making room as needed
        let mut frame = PendingFrame::new(key, self.clock);
        *frame.slot(role) = Some(span);
        self.pending.push_back(frame);
        if self.pending.len() > self.capacity {
            if let Some(oldest) = self.pending.pop_front() {
                diagnostics.record(Anomaly::FrameEvicted {
                    key: oldest.key(),
                    reason: EvictionReason::Overflow,
                });
            }
        }
        Placement::Pending(key)
    }

    /// Discard all incomplete frames and restart the logical clock
    pub fn reset(&mut self) -> usize {
        let discarded = self.pending.len();
        debug!("Discarding {discarded} incomplete frame(s)");
        self.pending.clear();
        self.pairing.reset();
        self.clock = 0;
        discarded
    }

    /// Truth that a root span may stand for a frame on a certain track
    fn accepts(&self, role: TrackRole, span: &EventNode) -> bool {
        self.span_filters[role_index(role)]
            .as_ref()
            .map_or(true, |names| names.iter().any(|name| **name == *span.name()))
    }

    /// Advance the logical clock and drop frames that became stale
    fn on_completion(&mut self, diagnostics: &mut Diagnostics) {
        self.clock += 1;
        let (clock, max_age) = (self.clock, self.max_age);
        self.pending.retain(|frame| {
            let stale = clock - frame.created_at() > max_age;
            if stale {
                diagnostics.record(Anomaly::FrameEvicted {
                    key: frame.key(),
                    reason: EvictionReason::Stale,
                });
            }
            !stale
        });
    }
}
//
impl Default for FrameAssembler {
    fn default() -> Self {
        Self::new(Box::new(DefaultPairing::default()))
    }
}

/// Position of a role in per-role arrays
fn role_index(role: TrackRole) -> usize {
    match role {
        TrackRole::Ui => 0,
        TrackRole::Raster => 1,
    }
}
