//! Rendering frames, made of matched spans from the UI and raster tracks

pub mod assembler;
pub mod pairing;

use crate::{
    ctf::{Duration, Timestamp, SECOND},
    tree::EventNode,
};
use std::fmt;

/// Identifier of a frame
///
/// Frame numbers and ordinals live in separate key spaces, so that a
/// numbered span never pairs with an unnumbered one that happens to get the
/// same ordinal.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum FrameKey {
    /// Frame number reported by the runtime
    Number(u64),

    /// Rank among the spans that the runtime did not number
    Ordinal(u64),
}
//
impl FrameKey {
    /// Raw numeric value, without the key space
    pub fn value(&self) -> u64 {
        match *self {
            Self::Number(n) | Self::Ordinal(n) => n,
        }
    }
}
//
impl fmt::Display for FrameKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "#{n}"),
            Self::Ordinal(n) => write!(f, "~{n}"),
        }
    }
}

/// Role that a track plays in frame rendering
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum TrackRole {
    /// Track where the runtime builds and lays out the frame
    Ui,

    /// Track where the frame is rasterized, also known as the GPU track
    Raster,
}
//
impl TrackRole {
    /// All roles that a complete frame needs a span for
    pub const ALL: [TrackRole; 2] = [TrackRole::Ui, TrackRole::Raster];

    /// Guess the role of a track from its thread name
    ///
    /// Runtimes name their rendering threads like `1.ui` and `1.raster`,
    /// older ones used `1.gpu` for the latter.
    pub fn from_thread_name(name: &str) -> Option<Self> {
        if name.ends_with(".ui") {
            Some(Self::Ui)
        } else if name.ends_with(".raster") || name.ends_with(".gpu") {
            Some(Self::Raster)
        } else {
            None
        }
    }
}
//
impl fmt::Display for TrackRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ui => f.write_str("UI"),
            Self::Raster => f.write_str("raster"),
        }
    }
}

/// Time budget of one frame at a given target frame rate
pub fn frame_budget(target_fps: f64) -> Duration {
    SECOND / target_fps
}

/// Completed frame, immutable once emitted
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    /// Identifier of the frame
    key: FrameKey,

    /// Span of the UI track
    ui: EventNode,

    /// Span of the raster track
    raster: EventNode,

    /// Time budget that the frame should fit in
    budget: Duration,
}
//
impl Frame {
    /// Frame identifier
    pub fn key(&self) -> FrameKey {
        self.key
    }

    /// Span of the UI track
    pub fn ui(&self) -> &EventNode {
        &self.ui
    }

    /// Span of the raster track
    pub fn raster(&self) -> &EventNode {
        &self.raster
    }

    /// Span of a given track
    pub fn span(&self, role: TrackRole) -> &EventNode {
        match role {
            TrackRole::Ui => &self.ui,
            TrackRole::Raster => &self.raster,
        }
    }

    /// Time budget that the frame should fit in
    pub fn budget(&self) -> Duration {
        self.budget
    }

    /// Time spent on a given track
    pub fn track_duration(&self, role: TrackRole) -> Duration {
        self.span(role).duration().unwrap_or(0.0)
    }

    /// Time spent on the UI track
    pub fn ui_duration(&self) -> Duration {
        self.track_duration(TrackRole::Ui)
    }

    /// Time spent on the raster track
    pub fn raster_duration(&self) -> Duration {
        self.track_duration(TrackRole::Raster)
    }

    /// Start of the earliest span
    pub fn start(&self) -> Timestamp {
        self.ui.start().min(self.raster.start())
    }

    /// End of the latest span
    pub fn end(&self) -> Timestamp {
        let end = |span: &EventNode| span.end().unwrap_or(span.start());
        end(&self.ui).max(end(&self.raster))
    }

    /// Time from the start of the earliest span to the end of the latest
    pub fn duration(&self) -> Duration {
        self.end() - self.start()
    }

    /// Truth that the UI track went over budget
    pub fn is_ui_janky(&self) -> bool {
        self.ui_duration() > self.budget
    }

    /// Truth that the raster track went over budget
    pub fn is_raster_janky(&self) -> bool {
        self.raster_duration() > self.budget
    }

    /// Truth that any track went over budget
    pub fn is_janky(&self) -> bool {
        self.is_ui_janky() || self.is_raster_janky()
    }
}

/// Frame for which some spans are still missing
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct PendingFrame {
    /// Identifier of the frame
    key: FrameKey,

    /// Logical time at which the frame was created
    created_at: u64,

    /// Span of the UI track, if known yet
    ui: Option<EventNode>,

    /// Span of the raster track, if known yet
    raster: Option<EventNode>,
}
//
impl PendingFrame {
    /// Start a frame with no span
    pub fn new(key: FrameKey, created_at: u64) -> Self {
        Self {
            key,
            created_at,
            ui: None,
            raster: None,
        }
    }

    /// Frame identifier
    pub fn key(&self) -> FrameKey {
        self.key
    }

    /// Logical time at which the frame was created
    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    /// Slot holding the span of a given track
    pub fn slot(&mut self, role: TrackRole) -> &mut Option<EventNode> {
        match role {
            TrackRole::Ui => &mut self.ui,
            TrackRole::Raster => &mut self.raster,
        }
    }

    /// Take the spans out as a frame if every track has its span, otherwise
    /// leave the pending frame untouched
    pub fn take_frame(&mut self, budget: Duration) -> Option<Frame> {
        match (self.ui.take(), self.raster.take()) {
            (Some(ui), Some(raster)) => Some(Frame {
                key: self.key,
                ui,
                raster,
                budget,
            }),
            (ui, raster) => {
                self.ui = ui;
                self.raster = raster;
                None
            }
        }
    }
}
