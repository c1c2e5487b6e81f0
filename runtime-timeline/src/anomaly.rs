//! Diagnostics for malformed or unexpected timeline input
//!
//! None of these stop ingestion: the offending event is dropped or patched,
//! already-built structure is kept, and an [`Anomaly`] is recorded here so
//! that the view layer can tell the user why something looks off.

use crate::{
    ctf::Timestamp,
    event::{EventNormalizeError, TrackId},
    frame::{FrameKey, TrackRole},
};
use log::warn;
use std::collections::{HashMap, VecDeque};
use thiserror::Error;

/// Something unexpected that was observed in the timeline stream
#[derive(Clone, Debug, Error, PartialEq)]
pub enum Anomaly {
    /// A raw record could not be normalized and was dropped
    #[error("dropped malformed event ({0})")]
    MalformedEvent(#[from] EventNormalizeError),

    /// An end event did not match any open span of its track
    #[error("{track}: end of {name:?} at {timestamp}µs matches no open span")]
    UnmatchedEnd {
        /// Track on which the end event was emitted
        track: TrackId,

        /// Name carried by the end event, if any
        name: Option<Box<str>>,

        /// Timestamp of the end event
        timestamp: Timestamp,
    },

    /// A span was closed because an enclosing span ended before it did
    #[error("{track}: {name:?} force-closed at {timestamp}µs by the end of an enclosing span")]
    ForcedClose {
        /// Track of the span
        track: TrackId,

        /// Name of the force-closed span
        name: Box<str>,

        /// Timestamp at which it was closed
        timestamp: Timestamp,
    },

    /// A span ended before it started, its end was moved to its start
    #[error("{track}: {name:?} ends at {end}µs, before its start at {start}µs")]
    NegativeDuration {
        /// Track of the span
        track: TrackId,

        /// Name of the span
        name: Box<str>,

        /// Start of the span
        start: Timestamp,

        /// Reported end of the span
        end: Timestamp,
    },

    /// A closed child span is not contained within its parent
    #[error("{track}: {child:?} is not contained within its parent {parent:?}")]
    ChildOutOfBounds {
        /// Track of the spans
        track: TrackId,

        /// Name of the parent span
        parent: Box<str>,

        /// Name of the escaping child span
        child: Box<str>,
    },

    /// An event arrived after events with later timestamps were released
    #[error("{track}: event at {timestamp}µs arrived after the stream reached {watermark}µs")]
    LateEvent {
        /// Track of the event
        track: TrackId,

        /// Timestamp of the late event
        timestamp: Timestamp,

        /// Latest timestamp released on this track so far
        watermark: Timestamp,
    },

    /// A frame span could not be associated with any frame
    #[error("{role} span {name:?} could not be assigned a frame")]
    UnkeyedSpan {
        /// Role of the span's track
        role: TrackRole,

        /// Name of the span
        name: Box<str>,
    },

    /// A frame received two spans for the same track, the second was dropped
    #[error("frame {key} already has a {role} span")]
    DuplicateFrameSpan {
        /// Frame that was targeted
        key: FrameKey,

        /// Role of the duplicate span
        role: TrackRole,
    },

    /// An incomplete frame was discarded
    #[error("dropped incomplete frame {key} ({reason})")]
    FrameEvicted {
        /// Discarded frame
        key: FrameKey,

        /// Why it was discarded
        reason: EvictionReason,
    },
}
//
impl Anomaly {
    /// Kind of anomaly, for counting purposes
    pub fn kind(&self) -> AnomalyKind {
        match self {
            Self::MalformedEvent(_) => AnomalyKind::MalformedEvent,
            Self::UnmatchedEnd { .. } => AnomalyKind::UnmatchedEnd,
            Self::ForcedClose { .. } => AnomalyKind::ForcedClose,
            Self::NegativeDuration { .. } => AnomalyKind::NegativeDuration,
            Self::ChildOutOfBounds { .. } => AnomalyKind::ChildOutOfBounds,
            Self::LateEvent { .. } => AnomalyKind::LateEvent,
            Self::UnkeyedSpan { .. } => AnomalyKind::UnkeyedSpan,
            Self::DuplicateFrameSpan { .. } => AnomalyKind::DuplicateFrameSpan,
            Self::FrameEvicted { .. } => AnomalyKind::FrameEvicted,
        }
    }
}

/// Fieldless mirror of [`Anomaly`]
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum AnomalyKind {
    /// See [`Anomaly::MalformedEvent`]
    MalformedEvent,

    /// See [`Anomaly::UnmatchedEnd`]
    UnmatchedEnd,

    /// See [`Anomaly::ForcedClose`]
    ForcedClose,

    /// See [`Anomaly::NegativeDuration`]
    NegativeDuration,

    /// See [`Anomaly::ChildOutOfBounds`]
    ChildOutOfBounds,

    /// See [`Anomaly::LateEvent`]
    LateEvent,

    /// See [`Anomaly::UnkeyedSpan`]
    UnkeyedSpan,

    /// See [`Anomaly::DuplicateFrameSpan`]
    DuplicateFrameSpan,

    /// See [`Anomaly::FrameEvicted`]
    FrameEvicted,
}
//
impl AnomalyKind {
    /// All kinds of anomalies, in pipeline order
    pub const ALL: [AnomalyKind; 9] = [
        AnomalyKind::MalformedEvent,
        AnomalyKind::LateEvent,
        AnomalyKind::UnmatchedEnd,
        AnomalyKind::ForcedClose,
        AnomalyKind::NegativeDuration,
        AnomalyKind::ChildOutOfBounds,
        AnomalyKind::UnkeyedSpan,
        AnomalyKind::DuplicateFrameSpan,
        AnomalyKind::FrameEvicted,
    ];
}

/// Why an incomplete frame was discarded
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EvictionReason {
    /// Too many frames were pending, this was the oldest one
    Overflow,

    /// Too many frames completed since this one was created
    Stale,
}
//
impl std::fmt::Display for EvictionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Overflow => f.write_str("pending frame capacity exceeded"),
            Self::Stale => f.write_str("stale"),
        }
    }
}

/// Record of the anomalies observed by a timeline session
///
/// Only the most recent anomalies are retained, but counts are kept for all
/// of them so that long sessions cannot grow this without bound.
#[derive(Clone, Debug, Default)]
pub struct Diagnostics {
    /// Most recent anomalies, oldest first
    recent: VecDeque<Anomaly>,

    /// Maximal length of `recent`
    capacity: usize,

    /// Number of anomalies ever recorded, by kind
    counts: HashMap<AnomalyKind, usize>,
}
//
impl Diagnostics {
    /// Set up a record which retains up to `capacity` anomalies
    pub fn new(capacity: usize) -> Self {
        Self {
            recent: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            counts: HashMap::new(),
        }
    }

    /// Record an anomaly
    pub fn record(&mut self, anomaly: impl Into<Anomaly>) {
        let anomaly = anomaly.into();
        warn!("{anomaly}");
        *self.counts.entry(anomaly.kind()).or_default() += 1;
        if self.capacity == 0 {
            return;
        }
        if self.recent.len() == self.capacity {
            self.recent.pop_front();
        }
        self.recent.push_back(anomaly);
    }

    /// Most recent anomalies, oldest first
    pub fn recent(&self) -> impl Iterator<Item = &Anomaly> + '_ {
        self.recent.iter()
    }

    /// Take the retained anomalies out, leaving counts untouched
    pub fn drain(&mut self) -> impl Iterator<Item = Anomaly> + '_ {
        self.recent.drain(..)
    }

    /// Number of anomalies of a certain kind recorded so far
    pub fn count(&self, kind: AnomalyKind) -> usize {
        self.counts.get(&kind).copied().unwrap_or(0)
    }

    /// Total number of anomalies recorded so far
    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }

    /// Forget everything
    pub fn clear(&mut self) {
        self.recent.clear();
        self.counts.clear();
    }
}
