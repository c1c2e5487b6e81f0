//! Reconstruction of the timeline and CPU profile of a managed runtime
//!
//! The timeline side turns the runtime's stream of trace events, which is
//! only ordered within each thread, into nested spans and then into frames
//! made of one UI span and one raster span. The CPU side turns a sampled
//! CPU profile into a call tree with inclusive and exclusive sample counts.
//!
//! Both are models for a view layer to consume. Nothing here renders or
//! talks to the runtime.

#![deny(missing_docs)]

pub mod anomaly;
pub mod cpu;
pub mod ctf;
pub mod event;
pub mod frame;
pub mod pending;
pub mod session;
pub mod tree;

use log::debug;
use serde_json as json;
use std::{
    fs::File,
    io::{self, Read},
    path::Path,
};
use thiserror::Error;

// Reexport types which appear in most uses of the library
pub use self::{
    anomaly::{Anomaly, AnomalyKind, Diagnostics, EvictionReason},
    cpu::{CpuProfileData, CpuProfileError, CpuProfileLoadError, CpuStackFrame},
    ctf::{Duration, Timestamp, TraceData},
    event::{Phase, Record, TraceEvent, TrackId},
    frame::{
        assembler::{FrameAssembler, Placement},
        pairing::{DefaultPairing, FrameNumberPairing, FramePairing, OrdinalPairing},
        Frame, FrameKey, TrackRole,
    },
    session::{Inbound, TimelineConfig, TimelineSession},
    tree::{EventNode, EventTreeBuilder},
};
pub use json::Error as TraceParseError;

/// Parse a timeline trace in the Chrome Trace Event format
pub fn parse_trace(s: &str) -> Result<TraceData, TraceParseError> {
    let trace = json::from_str::<TraceData>(s)?;
    if let TraceData::Object(object) = &trace {
        debug!(
            "Parsed trace object with {} event(s) and extra keys {:?}",
            object.traceEvents.len(),
            object.extra.keys().collect::<Vec<_>>()
        );
    }
    Ok(trace)
}

/// Load a timeline trace from a file
pub fn load_trace(path: impl AsRef<Path>) -> Result<TraceData, TraceLoadError> {
    let mut trace_str = String::new();
    File::open(path)?.read_to_string(&mut trace_str)?;
    Ok(parse_trace(&trace_str)?)
}

/// What can go wrong while loading a timeline trace from a file
#[derive(Debug, Error)]
pub enum TraceLoadError {
    /// Failed to read the file
    #[error("failed to read trace ({0})")]
    Io(#[from] io::Error),

    /// Failed to parse the trace
    #[error("failed to parse trace ({0})")]
    Parse(#[from] TraceParseError),
}
