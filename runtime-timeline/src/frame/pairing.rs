//! Strategies for deciding which frame a root span belongs to

use super::{FrameKey, TrackRole};
use crate::tree::EventNode;
use log::trace;
use serde_json as json;
use std::fmt::Debug;

/// Mechanism to associate root spans of the UI and raster tracks
///
/// Spans of the two tracks which are given the same key end up in the same
/// frame. Spans which cannot be given a key are reported and dropped.
pub trait FramePairing: Debug + Send {
    /// Key of the frame that a root span of a given track belongs to
    ///
    /// Called exactly once per candidate frame span, in the order in which
    /// the spans of each track complete.
    fn frame_key(&mut self, role: TrackRole, span: &EventNode) -> Option<FrameKey>;

    /// Forget any state accumulated so far
    fn reset(&mut self) {}
}

/// Pair spans through the frame number argument that runtimes attach
///
/// The argument is looked up on the root span first, then on its
/// descendants in depth-first order. It may be a JSON number or a string
/// holding a number.
#[derive(Clone, Debug)]
pub struct FrameNumberPairing {
    /// Name of the frame number argument
    arg: Box<str>,
}
//
impl FrameNumberPairing {
    /// Pair frames using the argument of the given name
    pub fn new(arg: impl Into<Box<str>>) -> Self {
        Self { arg: arg.into() }
    }

    /// Look up the frame number of a span
    pub fn frame_number(&self, span: &EventNode) -> Option<u64> {
        span.descendants()
            .find_map(|node| node.args().get(&*self.arg))
            .and_then(parse_frame_number)
    }
}
//
impl Default for FrameNumberPairing {
    fn default() -> Self {
        Self::new("frame_number")
    }
}
//
impl FramePairing for FrameNumberPairing {
    fn frame_key(&mut self, _role: TrackRole, span: &EventNode) -> Option<FrameKey> {
        self.frame_number(span).map(FrameKey::Number)
    }
}

/// Interpret a frame number argument
fn parse_frame_number(value: &json::Value) -> Option<u64> {
    match value {
        json::Value::Number(n) => n.as_u64(),
        json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Pair the n-th span of the UI track with the n-th span of the raster track
///
/// This is only correct when no span is ever lost or filtered out on one
/// track but not the other, so it is best used as a fallback.
#[derive(Clone, Debug, Default)]
pub struct OrdinalPairing {
    /// Number of UI spans seen so far
    ui: u64,

    /// Number of raster spans seen so far
    raster: u64,
}
//
impl OrdinalPairing {
    /// Start counting from zero
    pub fn new() -> Self {
        Self::default()
    }
}
//
impl FramePairing for OrdinalPairing {
    fn frame_key(&mut self, role: TrackRole, _span: &EventNode) -> Option<FrameKey> {
        let counter = match role {
            TrackRole::Ui => &mut self.ui,
            TrackRole::Raster => &mut self.raster,
        };
        let key = FrameKey::Ordinal(*counter);
        *counter += 1;
        Some(key)
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Use runtime frame numbers when available, ordinal pairing otherwise
///
/// Numbered and unnumbered spans never pair with each other, since their
/// keys come from different key spaces.
#[derive(Clone, Debug, Default)]
pub struct DefaultPairing {
    /// Primary strategy
    numbers: FrameNumberPairing,

    /// Fallback strategy, counts only the spans without a frame number
    ordinals: OrdinalPairing,
}
//
impl DefaultPairing {
    /// Look up frame numbers in the argument of the given name
    pub fn new(arg: impl Into<Box<str>>) -> Self {
        Self {
            numbers: FrameNumberPairing::new(arg),
            ordinals: OrdinalPairing::new(),
        }
    }
}
//
impl FramePairing for DefaultPairing {
    fn frame_key(&mut self, role: TrackRole, span: &EventNode) -> Option<FrameKey> {
        self.numbers.frame_key(role, span).or_else(|| {
            trace!("{role} span {:?} has no frame number, pairing by order", span.name());
            self.ordinals.frame_key(role, span)
        })
    }

    fn reset(&mut self) {
        self.ordinals.reset();
    }
}
