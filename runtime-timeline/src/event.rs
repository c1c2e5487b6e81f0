//! Normalized view over one raw timeline record

use crate::ctf::{
    self,
    events::{AsyncEvent, AsyncId, EventHeader, InstantEvent, MetadataEvent, NameArgs},
    Duration, EventCategories, Tid, Timestamp,
};
use serde_json as json;
use std::{collections::HashMap, fmt};
use thiserror::Error;

/// Extra arguments attached to an event
pub type EventArgs = HashMap<Box<str>, json::Value>;

/// Independent timeline lane, e.g. the UI thread or the raster thread
///
/// Events of one track are self-consistently ordered, but may be arbitrarily
/// interleaved with the events of other tracks.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct TrackId(pub Tid);
//
impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "track {}", self.0)
    }
}

/// What a trace event stands for
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Phase {
    /// Start of a span, nested in the currently open span of its track
    Begin,

    /// End of the most recently opened matching span of its track
    End,

    /// Span whose end is already known, nested by time containment
    Complete,

    /// Something happened at a single point in time
    Instant,

    /// Start of an async span, matched by id rather than by nesting
    AsyncBegin,

    /// End of an async span
    AsyncEnd,

    /// Intermediary step of an async span
    AsyncStep,
}

/// Normalized trace event
///
/// Immutable once created. Raw records are converted into these by
/// [`Record::try_from()`].
#[derive(Clone, Debug, PartialEq)]
pub struct TraceEvent {
    phase: Phase,
    name: Option<Box<str>>,
    category: Box<str>,
    track: TrackId,
    timestamp: Timestamp,
    duration: Option<Duration>,
    async_id: Option<AsyncId>,
    args: EventArgs,
}
//
impl TraceEvent {
    /// Build an event from its mandatory properties
    pub fn new(
        phase: Phase,
        name: Option<Box<str>>,
        category: impl Into<Box<str>>,
        track: TrackId,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            phase,
            name,
            category: category.into(),
            track,
            timestamp,
            duration: None,
            async_id: None,
            args: EventArgs::new(),
        }
    }

    /// Shorthand for a named Begin event with no category
    pub fn begin(track: TrackId, timestamp: Timestamp, name: &str) -> Self {
        Self::new(Phase::Begin, Some(name.into()), "", track, timestamp)
    }

    /// Shorthand for a named End event with no category
    pub fn end(track: TrackId, timestamp: Timestamp, name: &str) -> Self {
        Self::new(Phase::End, Some(name.into()), "", track, timestamp)
    }

    /// Shorthand for a named Complete event with no category
    pub fn complete(track: TrackId, timestamp: Timestamp, duration: Duration, name: &str) -> Self {
        Self {
            duration: Some(duration),
            ..Self::new(Phase::Complete, Some(name.into()), "", track, timestamp)
        }
    }

    /// Attach arguments
    pub fn with_args(mut self, args: EventArgs) -> Self {
        self.args = args;
        self
    }

    /// Attach an async operation identifier
    pub fn with_async_id(mut self, id: AsyncId) -> Self {
        self.async_id = Some(id);
        self
    }

    /// What this event stands for
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Name of the event, may be missing on End events
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Comma-separated categories, empty if none
    pub fn category(&self) -> &str {
        &self.category
    }

    /// Track on which the event was emitted
    pub fn track(&self) -> TrackId {
        self.track
    }

    /// Timestamp in microseconds, monotonic within a track
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// Known duration, for Complete events
    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }

    /// Identifier of the async operation, for async events
    pub fn async_id(&self) -> Option<&AsyncId> {
        self.async_id.as_ref()
    }

    /// Extra arguments
    pub fn args(&self) -> &EventArgs {
        &self.args
    }

    /// Take the arguments out of the event
    pub(crate) fn into_args(self) -> EventArgs {
        self.args
    }
}

/// Outcome of normalizing one raw trace record
#[derive(Clone, Debug, PartialEq)]
pub enum Record {
    /// A single timeline event
    Event(TraceEvent),

    /// A track was given a name
    ThreadName {
        /// Named track
        track: TrackId,

        /// Name given to the track
        name: Box<str>,
    },

    /// Record that carries nothing the timeline model uses
    Ignored,
}
//
impl TryFrom<ctf::TraceEvent> for Record {
    type Error = EventNormalizeError;

    fn try_from(raw: ctf::TraceEvent) -> Result<Self, Self::Error> {
        use ctf::TraceEvent as Raw;
        match raw {
            Raw::B(d) => {
                if d.name.is_none() {
                    return Err(EventNormalizeError::MissingName(d.tid, d.ts));
                }
                Ok(Self::Event(duration_event(Phase::Begin, d)?))
            }
            Raw::E(d) => Ok(Self::Event(duration_event(Phase::End, d)?)),
            Raw::X { header: d, dur } => {
                if d.name.is_none() {
                    return Err(EventNormalizeError::MissingName(d.tid, d.ts));
                }
                if !dur.is_finite() || dur < 0.0 {
                    return Err(EventNormalizeError::BadDuration(dur));
                }
                let event = duration_event(Phase::Complete, d)?;
                Ok(Self::Event(TraceEvent {
                    duration: Some(dur),
                    ..event
                }))
            }
            Raw::i(i) | Raw::I(i) => Ok(Self::Event(instant_event(i)?)),
            Raw::b(a) => Ok(Self::Event(async_event(Phase::AsyncBegin, a)?)),
            Raw::e(a) => Ok(Self::Event(async_event(Phase::AsyncEnd, a)?)),
            Raw::n(a) => Ok(Self::Event(async_event(Phase::AsyncStep, a)?)),
            Raw::M(MetadataEvent::thread_name {
                tid,
                args: NameArgs { name, .. },
                ..
            }) => Ok(Self::ThreadName {
                track: TrackId(tid),
                name,
            }),
            Raw::M(_) | Raw::Unsupported => Ok(Self::Ignored),
        }
    }
}

/// Flatten event categories into their wire representation
fn categories(cat: &Option<EventCategories>) -> Box<str> {
    cat.as_ref().map(EventCategories::joined).unwrap_or_default()
}

/// Reject timestamps which cannot be ordered
fn check_timestamp(ts: Timestamp) -> Result<Timestamp, EventNormalizeError> {
    if ts.is_finite() {
        Ok(ts)
    } else {
        Err(EventNormalizeError::BadTimestamp(ts))
    }
}

/// Normalize the common fields of a record, minus the X duration
fn duration_event(phase: Phase, h: EventHeader) -> Result<TraceEvent, EventNormalizeError> {
    let ts = check_timestamp(h.ts)?;
    Ok(
        TraceEvent::new(phase, h.name, categories(&h.cat), TrackId(h.tid), ts)
            .with_args(h.args.unwrap_or_default()),
    )
}

/// Normalize the payload of an i/I record, whatever its scope
fn instant_event(i: InstantEvent) -> Result<TraceEvent, EventNormalizeError> {
    duration_event(Phase::Instant, i.header)
}

/// Normalize the payload of a b/e/n record
fn async_event(phase: Phase, a: AsyncEvent) -> Result<TraceEvent, EventNormalizeError> {
    Ok(duration_event(phase, a.header)?.with_async_id(a.id))
}

/// What can go wrong while normalizing a raw trace record
#[derive(Clone, Error, Debug, PartialEq)]
pub enum EventNormalizeError {
    /// A span-opening record did not say what the span is
    #[error("span opened on thread {0} at {1}µs has no name")]
    MissingName(Tid, Timestamp),

    /// A timestamp was NaN or infinite
    #[error("timestamp {0} is not a finite number of microseconds")]
    BadTimestamp(Timestamp),

    /// A complete event had a negative or NaN duration
    #[error("complete event has invalid duration {0}")]
    BadDuration(Duration),
}
