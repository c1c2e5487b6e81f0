//! Raw CPU profile response, as sent by the runtime

use crate::ctf::{
    stack::{StackFrameId, StackFrameTable},
    Tid, Timestamp,
};
use serde::Deserialize;

/// CPU samples of a runtime, with the stack frames that they reference
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CpuProfileResponse {
    /// Number of samples which the runtime claims to have taken
    pub sample_count: u64,

    /// Interval between two samples, in microseconds
    #[serde(default)]
    pub sample_period: u64,

    /// Timestamp of the first sample
    #[serde(default)]
    pub time_origin_micros: Timestamp,

    /// Time covered by the samples
    #[serde(default)]
    pub time_extent_micros: Timestamp,

    /// Maximal stack depth that the sampler records
    #[serde(default)]
    pub stack_depth: u64,

    /// Stack frame dictionary, in declaration order
    pub stack_frames: StackFrameTable,

    /// One record per sample, pointing to the leaf frame of its stack
    #[serde(default)]
    pub trace_events: Box<[CpuSample]>,
}

/// One CPU sample
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct CpuSample {
    /// Leaf stack frame of the sample
    pub sf: StackFrameId,

    /// When the sample was taken
    #[serde(default)]
    pub ts: Timestamp,

    /// Thread that was sampled
    #[serde(default)]
    pub tid: Tid,
}
