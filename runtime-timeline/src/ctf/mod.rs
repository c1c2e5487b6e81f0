//! Wire format of the runtime's timeline stream
//!
//! Runtimes emit their timeline in the Chrome Trace Event format, see
//! <https://docs.google.com/document/d/1CvAClvFfyA5R-PhYUmn5OOQtYMH4h6I0nSsKchNAySU>.
//! Only the phases which show up on a runtime timeline are modeled. Any other
//! phase deserializes as [`TraceEvent::Unsupported`] so that one counter or
//! flow record does not make the whole stream unreadable.

pub mod events;
pub mod stack;

use self::events::{AsyncEvent, EventHeader, InstantEvent, MetadataEvent};
use serde::Deserialize;
use serde_json as json;
use std::collections::HashMap;

/// Timestamps are microseconds since an arbitrary origin
pub type Timestamp = f64;

/// Difference of two timestamps
pub type Duration = Timestamp;

/// One microsecond
pub const MICROSECOND: Duration = 1.0;
/// One millisecond
pub const MILLISECOND: Duration = 1000.0 * MICROSECOND;
/// One second
pub const SECOND: Duration = 1000.0 * MILLISECOND;

/// Thread id, wide enough for the OS thread handles that some runtimes report
pub type Tid = i64;

/// Process id
pub type Pid = i64;

/// A whole recorded timeline
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum TraceData {
    /// Object with a `traceEvents` list and other keys
    Object(TraceDataObject),

    /// Bare list of records
    Array(Box<[TraceEvent]>),
}
//
impl TraceData {
    /// Records of the timeline, in arrival order
    pub fn into_events(self) -> Box<[TraceEvent]> {
        match self {
            Self::Object(object) => object.traceEvents,
            Self::Array(events) => events,
        }
    }
}

/// Object form of a recorded timeline
//
// Flattened, so no deny_unknown_fields
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[allow(non_snake_case)]
pub struct TraceDataObject {
    /// Records in arrival order, only ordered within each thread
    pub traceEvents: Box<[TraceEvent]>,

    /// Every other key (displayTimeUnit, systemTraceEvents...), unused
    #[serde(flatten)]
    pub extra: HashMap<Box<str>, json::Value>,
}

/// One record of the timeline stream, tagged by its phase
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[allow(non_camel_case_types)]
#[serde(tag = "ph")]
pub enum TraceEvent {
    /// Span opening on a thread
    B(EventHeader),

    /// Span closing on a thread, name may be omitted
    E(EventHeader),

    /// Span whose length is known upfront
    X {
        /// Fields shared with B/E records
        #[serde(flatten)]
        header: EventHeader,

        /// Length of the span
        dur: Duration,
    },

    /// Point in time
    i(InstantEvent),

    /// Older spelling of `i`
    I(InstantEvent),

    /// Start of an operation that may hop threads
    b(AsyncEvent),

    /// End of an operation that may hop threads
    e(AsyncEvent),

    /// Progress marker of an operation that may hop threads
    n(AsyncEvent),

    /// Naming of a process or thread
    M(MetadataEvent),

    /// Counters, flows, samples, object snapshots...
    #[serde(other)]
    Unsupported,
}

/// Comma-separated event categories, empty entries removed
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(from = "Box<str>")]
pub struct EventCategories(pub Box<[Box<str>]>);
//
impl EventCategories {
    /// Back to comma-separated form
    pub fn joined(&self) -> Box<str> {
        self.0.join(",").into()
    }
}
//
impl From<Box<str>> for EventCategories {
    fn from(s: Box<str>) -> Self {
        Self(
            s.split(',')
                .filter(|sub| !sub.is_empty())
                .map(Into::into)
                .collect(),
        )
    }
}

/// Identifier which may be sent as a JSON integer or string
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum RawId {
    /// Integer form
    Int(i64),

    /// String form
    Str(Box<str>),
}
//
impl From<RawId> for Box<str> {
    fn from(i: RawId) -> Self {
        match i {
            RawId::Int(i) => i.to_string().into(),
            RawId::Str(s) => s,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    /// Check that a record parses as expected alone, in a list, and in an
    /// object's `traceEvents`
    pub fn assert_parses(record: &str, expected: TraceEvent) {
        let single = json::from_str::<TraceEvent>(record).expect("Record should parse");
        assert_eq!(single, expected);

        let array = json::from_str::<TraceData>(&format!("[{record}]"))
            .expect("Record list should parse");
        assert_eq!(array.into_events().into_vec(), vec![expected.clone()]);

        let object = json::from_str::<TraceData>(&format!(r#"{{"traceEvents": [{record}]}}"#))
            .expect("Trace object should parse");
        assert_eq!(
            object,
            TraceData::Object(TraceDataObject {
                traceEvents: vec![expected].into(),
                extra: HashMap::new(),
            })
        );
    }

    #[test]
    fn object_keys() {
        let trace = json::from_str::<TraceData>(
            r#"{
                "traceEvents": [
                    {"ph": "B", "name": "VSYNC", "cat": "Embedder", "pid": 3, "tid": 4, "ts": 10}
                ],
                "displayTimeUnit": "ns",
                "systemTraceEvents": ""
            }"#,
        )
        .expect("Trace object should parse");
        let TraceData::Object(object) = trace else {
            panic!("Expected the object form");
        };
        assert_eq!(object.traceEvents.len(), 1);
        assert_eq!(
            object.extra,
            maplit::hashmap! {
                "displayTimeUnit".into() => json::json!("ns"),
                "systemTraceEvents".into() => json::json!(""),
            }
        );
    }

    #[test]
    fn unsupported_phases() {
        assert_parses(
            r#"{"name": "heap", "ph": "C", "pid": 3, "tid": 4, "ts": 12, "args": {"used": 0}}"#,
            TraceEvent::Unsupported,
        );
        assert_parses(
            r#"{"name": "PipelineProduce", "ph": "s", "id": 7, "pid": 3, "tid": 4, "ts": 12}"#,
            TraceEvent::Unsupported,
        );
    }

    #[test]
    fn categories() {
        let cats = EventCategories::from(Box::<str>::from("Dart,,Embedder"));
        assert_eq!(cats.0.len(), 2);
        assert_eq!(&*cats.joined(), "Dart,Embedder");
        assert_eq!(&*EventCategories::default().joined(), "");
    }

    #[test]
    fn ids() {
        assert_eq!(&*Box::<str>::from(RawId::Int(-3)), "-3");
        assert_eq!(&*Box::<str>::from(RawId::Str("0x1f".into())), "0x1f");
    }
}
