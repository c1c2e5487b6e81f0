//! Payloads of the record phases that a runtime timeline uses

use super::{EventCategories, Pid, RawId, Tid, Timestamp};
use serde::Deserialize;
use serde_json as json;
use std::collections::HashMap;

/// Raw extra arguments of a record
pub type RawArgs = HashMap<Box<str>, json::Value>;

/// Fields that every timeline record carries
//
// Flattened into other payloads, so no deny_unknown_fields
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct EventHeader {
    /// Emitting process
    #[serde(default)]
    pub pid: Pid,

    /// Emitting thread, decides which track the record belongs to
    pub tid: Tid,

    /// When the record was emitted
    pub ts: Timestamp,

    /// What happened, optional on E records
    pub name: Option<Box<str>>,

    /// Categories of the record
    pub cat: Option<EventCategories>,

    /// Extra arguments. On spans, those of the E record take priority over
    /// those of the B record.
    pub args: Option<RawArgs>,
}

/// Point-in-time record
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct InstantEvent {
    /// Common fields
    #[serde(flatten)]
    pub header: EventHeader,

    /// Who the event is relevant to
    #[serde(default, rename = "s")]
    pub scope: InstantScope,
}

/// Who an instant event is relevant to
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
pub enum InstantScope {
    /// The emitting thread
    #[default]
    #[serde(rename = "t")]
    Thread,

    /// The emitting process
    #[serde(rename = "p")]
    Process,

    /// Everyone
    #[serde(rename = "g")]
    Global,
}

/// Record of an operation that may begin and end on different threads
///
/// Records of one operation share their category, name and id.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct AsyncEvent {
    /// Common fields
    #[serde(flatten)]
    pub header: EventHeader,

    /// Operation identifier
    pub id: AsyncId,
}

/// Async operation identifier, integers are converted to strings
#[derive(Clone, Debug, Default, Deserialize, Eq, Hash, PartialEq)]
#[serde(from = "RawId")]
pub struct AsyncId(pub Box<str>);
//
impl From<RawId> for AsyncId {
    fn from(i: RawId) -> Self {
        Self(i.into())
    }
}

/// Metadata record, tagged by the kind of metadata
//
// Nested inside the "ph" tag, so no deny_unknown_fields
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[allow(non_camel_case_types)]
#[serde(tag = "name")]
pub enum MetadataEvent {
    /// Name of a thread, tells which track renders frames
    thread_name {
        /// Named thread
        tid: Tid,

        /// Process of the named thread
        pid: Option<Pid>,

        /// Name payload
        args: NameArgs,
    },

    /// Process names, sort indices and the like
    #[serde(other)]
    other,
}

/// Payload of a naming metadata record
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct NameArgs {
    /// Name given to the entity
    pub name: Box<str>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ctf::{tests::assert_parses, TraceEvent};

    fn embedder() -> Option<EventCategories> {
        Some(EventCategories(vec![Box::<str>::from("Embedder")].into_boxed_slice()))
    }

    #[test]
    fn spans() {
        assert_parses(
            r#"{"ph": "B", "name": "Animator::BeginFrame", "cat": "Embedder", "pid": 3, "tid": 4,
                "ts": 120.5, "args": {"frame_number": "7"}}"#,
            TraceEvent::B(EventHeader {
                pid: 3,
                tid: 4,
                ts: 120.5,
                name: Some("Animator::BeginFrame".into()),
                cat: embedder(),
                args: Some(maplit::hashmap! {
                    "frame_number".into() => json::json!("7")
                }),
            }),
        );
        assert_parses(
            r#"{"ph": "E", "tid": 4, "ts": 180}"#,
            TraceEvent::E(EventHeader {
                tid: 4,
                ts: 180.0,
                ..EventHeader::default()
            }),
        );
        assert_parses(
            r#"{"ph": "X", "name": "GPURasterizer::Draw", "cat": "Embedder", "pid": 3, "tid": 5,
                "ts": 200, "dur": 3500, "tdur": 3000}"#,
            TraceEvent::X {
                header: EventHeader {
                    pid: 3,
                    tid: 5,
                    ts: 200.0,
                    name: Some("GPURasterizer::Draw".into()),
                    cat: embedder(),
                    args: None,
                },
                dur: 3500.0,
            },
        );
    }

    #[test]
    fn instants() {
        assert_parses(
            r#"{"ph": "i", "name": "GC", "pid": 3, "tid": 4, "ts": 12, "s": "g"}"#,
            TraceEvent::i(InstantEvent {
                header: EventHeader {
                    pid: 3,
                    tid: 4,
                    ts: 12.0,
                    name: Some("GC".into()),
                    ..EventHeader::default()
                },
                scope: InstantScope::Global,
            }),
        );
        assert_parses(
            r#"{"ph": "I", "name": "VSYNC", "tid": 4, "ts": 13}"#,
            TraceEvent::I(InstantEvent {
                header: EventHeader {
                    tid: 4,
                    ts: 13.0,
                    name: Some("VSYNC".into()),
                    ..EventHeader::default()
                },
                scope: InstantScope::Thread,
            }),
        );
    }

    #[test]
    fn async_operations() {
        let header = |tid, ts| EventHeader {
            pid: 3,
            tid,
            ts,
            name: Some("PipelineItem".into()),
            cat: embedder(),
            args: None,
        };
        assert_parses(
            r#"{"ph": "b", "name": "PipelineItem", "cat": "Embedder", "id": "0x11", "pid": 3,
                "tid": 4, "ts": 10}"#,
            TraceEvent::b(AsyncEvent {
                header: header(4, 10.0),
                id: AsyncId("0x11".into()),
            }),
        );
        assert_parses(
            r#"{"ph": "e", "name": "PipelineItem", "cat": "Embedder", "id": 17, "pid": 3,
                "tid": 5, "ts": 90}"#,
            TraceEvent::e(AsyncEvent {
                header: header(5, 90.0),
                id: AsyncId("17".into()),
            }),
        );
    }

    #[test]
    fn metadata() {
        assert_parses(
            r#"{"ph": "M", "name": "thread_name", "pid": 3, "tid": 5, "args": {"name": "1.raster"}}"#,
            TraceEvent::M(MetadataEvent::thread_name {
                tid: 5,
                pid: Some(3),
                args: NameArgs {
                    name: "1.raster".into(),
                },
            }),
        );
        assert_parses(
            r#"{"ph": "M", "name": "process_name", "pid": 3, "args": {"name": "app"}}"#,
            TraceEvent::M(MetadataEvent::other),
        );
    }
}
