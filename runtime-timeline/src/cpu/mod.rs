//! Call tree of a sampled CPU profile

pub mod memo;
pub mod response;

use self::{
    memo::Memoized,
    response::{CpuProfileResponse, CpuSample},
};
use crate::ctf::{
    stack::{StackFrameId, StackFrameTable},
    Timestamp,
};
use log::{debug, error};
use serde_json as json;
use std::{
    collections::HashMap,
    fmt::{self, Debug, Formatter},
    fs::File,
    io::{self, Read},
    path::Path,
    str::FromStr,
};
use thiserror::Error;

/// Name prefix of the stack frames that stand for native code
pub const NATIVE_MARKER: &str = "[Native]";

/// Name prefix of the stack frames where the sampler gave up unwinding
pub const TRUNCATED_MARKER: &str = "[Truncated]";

/// Index of the synthetic root within the frame arena
const ROOT_IDX: usize = 0;

/// Call tree of a sampled CPU profile
///
/// Frames are stored in an arena, and refer to their parent and children by
/// index. Index 0 is a synthetic root which stands for all samples. Native
/// frames are grouped under a synthetic native root, itself a child of the
/// root, and native frames called from truncated stacks are grouped under a
/// synthetic truncated root, a child of the native root.
#[derive(Debug)]
pub struct CpuProfileData {
    /// Number of samples that the runtime reported
    sample_count: u64,

    /// Interval between two samples, in microseconds
    sample_period: u64,

    /// Timestamp of the first sample
    time_origin: Timestamp,

    /// Time covered by the samples
    time_extent: Timestamp,

    /// Maximal stack depth that the sampler records
    stack_depth: u64,

    /// Stack frames, starting with the synthetic root
    frames: Vec<StackFrameNode>,

    /// Arena index of each declared stack frame
    by_id: HashMap<StackFrameId, usize>,

    /// Stack frame dictionary that the tree was built from
    stack_frames: StackFrameTable,

    /// Samples, each pointing to its leaf frame
    samples: Box<[CpuSample]>,

    /// Arena index of the synthetic native root, if any
    native_root: Option<usize>,

    /// Arena index of the synthetic truncated root, if any
    truncated_root: Option<usize>,
}
//
impl CpuProfileData {
    /// Build the call tree of a CPU profile response
    ///
    /// Siblings are ordered by declaration order in the stack frame
    /// dictionary. Fails if the dictionary or the samples are inconsistent,
    /// or if the samples do not add up to the reported sample count.
    pub fn new(response: CpuProfileResponse) -> Result<Self, CpuProfileError> {
        let CpuProfileResponse {
            sample_count,
            sample_period,
            time_origin_micros,
            time_extent_micros,
            stack_depth,
            stack_frames,
            trace_events,
        } = response;
        let mut profile = Self {
            sample_count,
            sample_period,
            time_origin: time_origin_micros,
            time_extent: time_extent_micros,
            stack_depth,
            frames: Vec::with_capacity(stack_frames.len() + 3),
            by_id: HashMap::with_capacity(stack_frames.len()),
            stack_frames: StackFrameTable::default(),
            samples: Box::default(),
            native_root: None,
            truncated_root: None,
        };
        profile.frames.push(StackFrameNode::synthetic("root", "all"));

        // Register all frames first, so that parents may be declared late
        for (id, frame) in stack_frames.iter() {
            if profile.by_id.contains_key(id) {
                return Err(CpuProfileError::DuplicateFrameId(id.clone()));
            }
            profile.by_id.insert(id.clone(), profile.frames.len());
            profile.frames.push(StackFrameNode {
                id: id.clone(),
                name: frame.name.clone(),
                category: frame.category.clone(),
                native: frame.name.starts_with(NATIVE_MARKER),
                synthetic: false,
                declared_parent: frame.parent.clone(),
                parent: None,
                children: Vec::new(),
                index_in_parent: 0,
                exclusive: 0,
                inclusive: Memoized::new(),
                depth: Memoized::new(),
                ratio: Memoized::new(),
            });
        }

        // Then attach them in declaration order
        for idx in 1..profile.frames.len() {
            let parent = profile.resolve_parent(idx)?;
            profile.attach(idx, parent);
        }
        profile.check_acyclic()?;

        // Count samples
        for sample in trace_events.iter() {
            let idx = profile
                .by_id
                .get(&sample.sf)
                .copied()
                .ok_or_else(|| CpuProfileError::UnknownSampleFrame(sample.sf.clone()))?;
            profile.frames[idx].exclusive += 1;
        }
        profile.stack_frames = stack_frames;
        profile.samples = trace_events;

        // Check that the tree accounts for every sample
        let actual = profile.inclusive_of(ROOT_IDX);
        if actual != sample_count {
            error!("CPU profile claims {sample_count} samples, but its call tree holds {actual}");
            return Err(CpuProfileError::SampleCountMismatch {
                expected: sample_count,
                actual,
            });
        }
        debug!(
            "Built CPU call tree with {} frames from {} samples",
            profile.frames.len(),
            sample_count
        );
        Ok(profile)
    }

    /// Load a CPU profile response from a file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, CpuProfileLoadError> {
        let mut profile_str = String::new();
        File::open(path)?.read_to_string(&mut profile_str)?;
        Ok(Self::from_str(&profile_str)?)
    }

    /// Number of samples that the runtime reported
    pub fn sample_count(&self) -> u64 {
        self.sample_count
    }

    /// Interval between two samples, in microseconds
    pub fn sample_period(&self) -> u64 {
        self.sample_period
    }

    /// Timestamp of the first sample
    pub fn time_origin(&self) -> Timestamp {
        self.time_origin
    }

    /// Time covered by the samples
    pub fn time_extent(&self) -> Timestamp {
        self.time_extent
    }

    /// Maximal stack depth that the sampler records
    pub fn stack_depth(&self) -> u64 {
        self.stack_depth
    }

    /// Samples, each pointing to its leaf frame
    pub fn samples(&self) -> &[CpuSample] {
        &self.samples
    }

    /// Synthetic root, which stands for all samples
    pub fn root(&self) -> CpuStackFrame {
        self.view(ROOT_IDX)
    }

    /// Synthetic parent of native frames, if there are any
    pub fn native_root(&self) -> Option<CpuStackFrame> {
        self.native_root.map(|idx| self.view(idx))
    }

    /// Synthetic parent of native frames called from truncated stacks
    pub fn truncated_root(&self) -> Option<CpuStackFrame> {
        self.truncated_root.map(|idx| self.view(idx))
    }

    /// Look up a declared stack frame
    pub fn frame(&self, id: &StackFrameId) -> Option<CpuStackFrame> {
        self.by_id.get(id).map(|&idx| self.view(idx))
    }

    /// Number of frames in the tree, including synthetic ones
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Truth that the tree only has a root
    pub fn is_empty(&self) -> bool {
        self.frames.len() == 1
    }

    /// All frames in depth-first pre-order, starting from the root
    pub fn pre_order(&self) -> impl Iterator<Item = CpuStackFrame> + '_ {
        let mut stack = vec![ROOT_IDX];
        std::iter::from_fn(move || {
            let idx = stack.pop()?;
            stack.extend(self.frames[idx].children.iter().rev());
            Some(self.view(idx))
        })
    }

    /// Profile restricted to the samples taken within `[start, end)`
    pub fn sub_profile(&self, start: Timestamp, end: Timestamp) -> Result<Self, CpuProfileError> {
        let samples = self
            .samples
            .iter()
            .filter(|sample| sample.ts >= start && sample.ts < end)
            .cloned()
            .collect::<Box<[_]>>();
        Self::new(CpuProfileResponse {
            sample_count: samples.len() as u64,
            sample_period: self.sample_period,
            time_origin_micros: start,
            time_extent_micros: (end - start).max(0.0),
            stack_depth: self.stack_depth,
            stack_frames: self.stack_frames.clone(),
            trace_events: samples,
        })
    }

    /// View of the frame at some arena index
    fn view(&self, idx: usize) -> CpuStackFrame {
        CpuStackFrame {
            profile: self,
            node: &self.frames[idx],
            idx,
        }
    }

    /// Decide where a declared frame goes in the tree
    fn resolve_parent(&mut self, idx: usize) -> Result<usize, CpuProfileError> {
        let frame = &self.frames[idx];
        let declared = match &frame.declared_parent {
            Some(parent_id) => Some(self.by_id.get(parent_id).copied().ok_or_else(|| {
                CpuProfileError::UnknownParent {
                    frame: frame.id.clone(),
                    parent: parent_id.clone(),
                }
            })?),
            None => None,
        };
        if !frame.native {
            return Ok(declared.unwrap_or(ROOT_IDX));
        }
        let truncated = declared
            .map_or(false, |parent| self.frames[parent].name.starts_with(TRUNCATED_MARKER));
        Ok(if truncated {
            self.truncated_root_idx()
        } else {
            self.native_root_idx()
        })
    }

    /// Synthetic native root, created on first use
    fn native_root_idx(&mut self) -> usize {
        if let Some(idx) = self.native_root {
            return idx;
        }
        let idx = self.frames.len();
        self.frames
            .push(StackFrameNode::synthetic("nativeRoot", NATIVE_MARKER));
        self.frames[idx].native = true;
        self.attach(idx, ROOT_IDX);
        self.native_root = Some(idx);
        idx
    }

    /// Synthetic truncated root, created on first use
    fn truncated_root_idx(&mut self) -> usize {
        if let Some(idx) = self.truncated_root {
            return idx;
        }
        let native_root = self.native_root_idx();
        let idx = self.frames.len();
        self.frames.push(StackFrameNode::synthetic(
            "nativeTruncatedRoot",
            TRUNCATED_MARKER,
        ));
        self.frames[idx].native = true;
        self.attach(idx, native_root);
        self.truncated_root = Some(idx);
        idx
    }

    /// Make a frame the last child of another
    fn attach(&mut self, child: usize, parent: usize) {
        let index_in_parent = self.frames[parent].children.len();
        self.frames[parent].children.push(child);
        let child = &mut self.frames[child];
        child.parent = Some(parent);
        child.index_in_parent = index_in_parent;
    }

    /// Check that every frame is reachable from the root
    ///
    /// Every frame has exactly one parent at this point, so frames that
    /// cannot be reached from the root are part of a parent cycle.
    fn check_acyclic(&self) -> Result<(), CpuProfileError> {
        let mut reached = vec![false; self.frames.len()];
        let mut stack = vec![ROOT_IDX];
        while let Some(idx) = stack.pop() {
            reached[idx] = true;
            stack.extend(self.frames[idx].children.iter().copied());
        }
        match reached.iter().position(|&reached| !reached) {
            Some(idx) => Err(CpuProfileError::ParentCycle(self.frames[idx].id.clone())),
            None => Ok(()),
        }
    }

    /// Inclusive sample count of a frame, computing it over its subtree
    fn inclusive_of(&self, idx: usize) -> u64 {
        if let Some(&count) = self.frames[idx].inclusive.get() {
            return count;
        }

        // Iterative post-order, as real stacks can be deep
        let mut stack = vec![(idx, false)];
        while let Some((current, children_done)) = stack.pop() {
            let frame = &self.frames[current];
            if frame.inclusive.is_computed() {
                continue;
            }
            if children_done {
                let children = frame
                    .children
                    .iter()
                    .map(|&child| self.frames[child].inclusive.get().copied().unwrap_or(0))
                    .sum::<u64>();
                frame.inclusive.set(frame.exclusive + children);
            } else {
                stack.push((current, true));
                stack.extend(frame.children.iter().map(|&child| (child, false)));
            }
        }
        self.frames[idx].inclusive.get().copied().unwrap_or(0)
    }

    /// Depth of a frame, the root being at depth 0
    fn depth_of(&self, idx: usize) -> usize {
        if let Some(&depth) = self.frames[idx].depth.get() {
            return depth;
        }

        // Walk up to the nearest ancestor of known depth, then back down
        let mut chain = Vec::new();
        let mut current = Some(idx);
        let mut depth = 0;
        while let Some(frame) = current {
            if let Some(&known) = self.frames[frame].depth.get() {
                depth = known + 1;
                break;
            }
            chain.push(frame);
            current = self.frames[frame].parent;
        }
        for &frame in chain.iter().rev() {
            self.frames[frame].depth.set(depth);
            depth += 1;
        }
        self.frames[idx].depth.get().copied().unwrap_or(0)
    }

    /// Inclusive share of all samples of a frame
    fn ratio_of(&self, idx: usize) -> f64 {
        *self.frames[idx].ratio.get_or_compute(|| {
            if idx == ROOT_IDX {
                return 1.0;
            }
            match self.inclusive_of(ROOT_IDX) {
                0 => 0.0,
                total => self.inclusive_of(idx) as f64 / total as f64,
            }
        })
    }
}
//
impl FromStr for CpuProfileData {
    type Err = CpuProfileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(json::from_str::<CpuProfileResponse>(s)?)
    }
}

/// Stack frame within the call tree
#[derive(Clone, Copy)]
pub struct CpuStackFrame<'a> {
    /// Profile which this frame belongs to
    profile: &'a CpuProfileData,

    /// Frame which we are looking at
    node: &'a StackFrameNode,

    /// Index of this frame in the arena
    idx: usize,
}
//
impl<'a> CpuStackFrame<'a> {
    /// Identifier of the frame, made up for synthetic frames
    pub fn id(&self) -> &'a StackFrameId {
        &self.node.id
    }

    /// Symbol name or address
    pub fn name(&self) -> &'a str {
        &self.node.name
    }

    /// Usually a DSO, library or "Dart"
    pub fn category(&self) -> &'a str {
        &self.node.category
    }

    /// Truth that this frame stands for native code
    pub fn is_native(&self) -> bool {
        self.node.native
    }

    /// Truth that this frame was made up to group other frames
    pub fn is_synthetic(&self) -> bool {
        self.node.synthetic
    }

    /// Parent that the profile declared, which may differ from the parent in
    /// the tree for native frames
    pub fn declared_parent(&self) -> Option<&'a StackFrameId> {
        self.node.declared_parent.as_ref()
    }

    /// Parent in the tree, None for the root
    pub fn parent(&self) -> Option<CpuStackFrame<'a>> {
        self.node.parent.map(|idx| self.profile.view(idx))
    }

    /// Children in the tree, in declaration order
    pub fn children(&self) -> impl Iterator<Item = CpuStackFrame<'a>> + 'a {
        let (profile, node) = (self.profile, self.node);
        node.children.iter().map(move |&idx| profile.view(idx))
    }

    /// Number of children
    pub fn num_children(&self) -> usize {
        self.node.children.len()
    }

    /// Position of this frame among the children of its parent
    pub fn index_in_parent(&self) -> usize {
        self.node.index_in_parent
    }

    /// Number of samples where this frame was the leaf
    pub fn exclusive_sample_count(&self) -> u64 {
        self.node.exclusive
    }

    /// Number of samples where this frame was on the stack
    pub fn inclusive_sample_count(&self) -> u64 {
        self.profile.inclusive_of(self.idx)
    }

    /// Distance from the root
    pub fn depth(&self) -> usize {
        self.profile.depth_of(self.idx)
    }

    /// Share of all samples where this frame was on the stack
    pub fn consumption_ratio(&self) -> f64 {
        self.profile.ratio_of(self.idx)
    }

    /// Share of all samples where this frame was the leaf
    pub fn self_ratio(&self) -> f64 {
        match self.profile.inclusive_of(ROOT_IDX) {
            0 => 0.0,
            total => self.node.exclusive as f64 / total as f64,
        }
    }

    /// Truth that the derived quantities of this frame were computed
    pub fn is_memoized(&self) -> bool {
        self.node.inclusive.is_computed()
            && self.node.depth.is_computed()
            && self.node.ratio.is_computed()
    }
}
//
impl Debug for CpuStackFrame<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("CpuStackFrame")
            .field("node", &self.node)
            .field("idx", &self.idx)
            // Elide CpuProfileData from output as that's huge
            .finish_non_exhaustive()
    }
}
//
impl PartialEq for CpuStackFrame<'_> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.profile, other.profile) && self.idx == other.idx
    }
}

/// Stack frame within the arena
#[derive(Debug)]
struct StackFrameNode {
    /// Identifier of the frame
    id: StackFrameId,

    /// Symbol name or address
    name: Box<str>,

    /// Usually a DSO, library or "Dart"
    category: Box<str>,

    /// Native code marker
    native: bool,

    /// Made up to group other frames
    synthetic: bool,

    /// Parent according to the stack frame dictionary
    declared_parent: Option<StackFrameId>,

    /// Parent in the tree, None for the root and before attachment
    parent: Option<usize>,

    /// Children in the tree, in order of attachment
    children: Vec<usize>,

    /// Position within the parent's children
    index_in_parent: usize,

    /// Samples where this frame was the leaf
    exclusive: u64,

    /// Samples where this frame was on the stack
    inclusive: Memoized<u64>,

    /// Distance from the root
    depth: Memoized<usize>,

    /// Inclusive share of all samples
    ratio: Memoized<f64>,
}
//
impl StackFrameNode {
    /// Frame that groups other frames
    fn synthetic(id: &str, name: &str) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            category: "".into(),
            native: false,
            synthetic: true,
            declared_parent: None,
            parent: None,
            children: Vec::new(),
            index_in_parent: 0,
            exclusive: 0,
            inclusive: Memoized::new(),
            depth: Memoized::new(),
            ratio: Memoized::new(),
        }
    }
}

/// What can go wrong while building a CPU profile
#[derive(Debug, Error)]
pub enum CpuProfileError {
    /// The response is not valid JSON or lacks mandatory fields
    #[error("failed to parse CPU profile response ({0})")]
    Json(#[from] json::Error),

    /// The same stack frame id was declared twice
    #[error("stack frame {0} is declared more than once")]
    DuplicateFrameId(StackFrameId),

    /// A stack frame refers to a parent that is never declared
    #[error("stack frame {frame} has undeclared parent {parent}")]
    UnknownParent {
        /// Frame with a dangling parent
        frame: StackFrameId,

        /// Undeclared parent
        parent: StackFrameId,
    },

    /// The parent chain of a stack frame loops back on itself
    #[error("parent chain of stack frame {0} is cyclic")]
    ParentCycle(StackFrameId),

    /// A sample refers to a stack frame that is never declared
    #[error("sample refers to undeclared stack frame {0}")]
    UnknownSampleFrame(StackFrameId),

    /// The call tree does not account for the reported number of samples
    #[error("profile reports {expected} samples but its call tree holds {actual}")]
    SampleCountMismatch {
        /// Number of samples reported by the runtime
        expected: u64,

        /// Number of samples in the call tree
        actual: u64,
    },
}

/// What can go wrong while loading a CPU profile from a file
#[derive(Debug, Error)]
pub enum CpuProfileLoadError {
    /// Failed to read the file
    #[error("failed to read CPU profile ({0})")]
    Io(#[from] io::Error),

    /// Failed to build the profile
    #[error("invalid CPU profile ({0})")]
    Profile(#[from] CpuProfileError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ctf::stack::StackFrame;
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use proptest::{prelude::*, sample::Index};

    /// Profile response from (id, name, parent) triples and sample leaves
    fn response(frames: &[(&str, &str, Option<&str>)], samples: &[&str]) -> CpuProfileResponse {
        CpuProfileResponse {
            sample_count: samples.len() as u64,
            sample_period: 1000,
            stack_frames: StackFrameTable::new(frames.iter().map(|&(id, name, parent)| {
                (
                    StackFrameId::from(id),
                    StackFrame {
                        category: "Dart".into(),
                        name: name.into(),
                        parent: parent.map(StackFrameId::from),
                    },
                )
            })),
            trace_events: samples
                .iter()
                .enumerate()
                .map(|(idx, &sf)| CpuSample {
                    sf: sf.into(),
                    ts: idx as Timestamp * 1000.0,
                    tid: 1,
                })
                .collect(),
            ..CpuProfileResponse::default()
        }
    }

    fn names<'a>(frames: impl Iterator<Item = CpuStackFrame<'a>>) -> Vec<&'a str> {
        frames.map(|frame| frame.name()).collect()
    }

    fn abc() -> CpuProfileData {
        CpuProfileData::new(response(
            &[("A", "A", None), ("B", "B", Some("A")), ("C", "C", Some("A"))],
            &["B", "B", "C"],
        ))
        .expect("Profile should be valid")
    }

    #[test]
    fn inclusive_counts_and_ratios() {
        let profile = abc();
        let root = profile.root();
        assert!(root.is_synthetic());
        assert_eq!(root.inclusive_sample_count(), 3);
        assert_eq!(root.consumption_ratio(), 1.0);
        assert_eq!(names(root.children()), ["A"]);

        let a = profile.frame(&"A".into()).expect("A should exist");
        assert_eq!(a.parent(), Some(root));
        assert_eq!(a.exclusive_sample_count(), 0);
        assert_eq!(a.inclusive_sample_count(), 3);
        assert_eq!(a.depth(), 1);
        assert_eq!(names(a.children()), ["B", "C"]);

        let b = profile.frame(&"B".into()).expect("B should exist");
        assert_eq!(b.exclusive_sample_count(), 2);
        assert_eq!(b.inclusive_sample_count(), 2);
        assert_eq!(b.consumption_ratio(), 2.0 / 3.0);
        assert_eq!(b.self_ratio(), 2.0 / 3.0);
        assert_eq!(b.index_in_parent(), 0);
        assert_eq!(b.depth(), 2);
        assert!(b.is_memoized());

        let c = profile.frame(&"C".into()).expect("C should exist");
        assert_eq!(c.index_in_parent(), 1);
        assert_eq!(c.inclusive_sample_count(), 1);

        assert_eq!(names(profile.pre_order()), ["all", "A", "B", "C"]);
    }

    #[test]
    fn zero_sample_frames() {
        let profile = CpuProfileData::new(response(
            &[("A", "A", None), ("B", "B", Some("A")), ("idle", "idle", None)],
            &["B"],
        ))
        .expect("Profile should be valid");
        let idle = profile.frame(&"idle".into()).expect("idle should exist");
        assert_eq!(idle.consumption_ratio(), 0.0);
        assert_eq!(idle.self_ratio(), 0.0);

        let empty = CpuProfileData::new(response(&[("A", "A", None)], &[]))
            .expect("Profile should be valid");
        assert_eq!(empty.root().consumption_ratio(), 1.0);
        assert_eq!(
            empty.frame(&"A".into()).map(|a| a.consumption_ratio()),
            Some(0.0)
        );
    }

    #[test]
    fn native_reparenting() {
        let profile = CpuProfileData::new(response(
            &[
                ("main", "main", None),
                ("n1", "[Native] foo", Some("main")),
                ("t", "[Truncated]", None),
                ("n2", "[Native] bar", Some("t")),
            ],
            &["n1", "n2", "main"],
        ))
        .expect("Profile should be valid");

        let native_root = profile.native_root().expect("Native root should exist");
        assert!(native_root.is_synthetic());
        assert_eq!(native_root.parent(), Some(profile.root()));
        let truncated_root = profile.truncated_root().expect("Truncated root should exist");
        assert_eq!(truncated_root.parent(), Some(native_root));

        let foo = profile.frame(&"n1".into()).expect("n1 should exist");
        assert!(foo.is_native());
        assert_eq!(foo.parent(), Some(native_root));
        assert_eq!(foo.declared_parent(), Some(&StackFrameId::from("main")));
        let bar = profile.frame(&"n2".into()).expect("n2 should exist");
        assert_eq!(bar.parent(), Some(truncated_root));

        assert_eq!(
            names(profile.root().children()),
            ["main", "[Native]", "[Truncated]"]
        );
        assert_eq!(native_root.inclusive_sample_count(), 2);
        assert_eq!(
            profile
                .frame(&"main".into())
                .map(|main| main.inclusive_sample_count()),
            Some(1)
        );
    }

    #[test]
    fn forward_references() {
        let profile = CpuProfileData::new(response(
            &[("B", "B", Some("A")), ("A", "A", None)],
            &["B"],
        ))
        .expect("Profile should be valid");
        assert_eq!(names(profile.pre_order()), ["all", "A", "B"]);
    }

    #[test]
    fn malformed_profiles() {
        let mut mismatch = response(&[("A", "A", None)], &["A", "A", "A"]);
        mismatch.sample_count = 4;
        assert_matches!(
            CpuProfileData::new(mismatch),
            Err(CpuProfileError::SampleCountMismatch {
                expected: 4,
                actual: 3
            })
        );

        assert_matches!(
            CpuProfileData::new(response(&[("A", "A", Some("Z"))], &[])),
            Err(CpuProfileError::UnknownParent { frame, parent }) => {
                assert_eq!(frame, StackFrameId::from("A"));
                assert_eq!(parent, StackFrameId::from("Z"));
            }
        );

        assert_matches!(
            CpuProfileData::new(response(
                &[("A", "A", Some("B")), ("B", "B", Some("A"))],
                &[]
            )),
            Err(CpuProfileError::ParentCycle(_))
        );

        assert_matches!(
            CpuProfileData::new(response(&[("A", "A", None)], &["B"])),
            Err(CpuProfileError::UnknownSampleFrame(id)) => assert_eq!(id, StackFrameId::from("B"))
        );

        assert_matches!(
            CpuProfileData::new(response(&[("A", "A", None), ("A", "A2", None)], &[])),
            Err(CpuProfileError::DuplicateFrameId(id)) => assert_eq!(id, StackFrameId::from("A"))
        );

        assert_matches!(
            "{\"sampleCount\": 1".parse::<CpuProfileData>(),
            Err(CpuProfileError::Json(_))
        );
    }

    #[test]
    fn sub_profile() {
        let profile = abc();
        // Samples are at 0, 1000 and 2000
        let sub = profile
            .sub_profile(1000.0, 3000.0)
            .expect("Sub-profile should be valid");
        assert_eq!(sub.sample_count(), 2);
        assert_eq!(sub.time_origin(), 1000.0);
        assert_eq!(sub.time_extent(), 2000.0);
        assert_eq!(
            sub.frame(&"B".into()).map(|b| b.inclusive_sample_count()),
            Some(1)
        );
        assert_eq!(
            sub.frame(&"C".into()).map(|c| c.consumption_ratio()),
            Some(0.5)
        );
    }

    #[test]
    fn from_json() {
        let profile = r#"{
            "sampleCount": 2,
            "samplePeriod": 250,
            "stackFrames": {
                "1": {"category": "Dart", "name": "main"},
                "2": {"category": "Dart", "name": "build", "parent": "1"}
            },
            "traceEvents": [{"sf": "2", "ts": 5}, {"sf": 1, "ts": 6}]
        }"#
        .parse::<CpuProfileData>()
        .expect("Profile should be valid");
        assert_eq!(profile.sample_period(), 250);
        assert_eq!(names(profile.pre_order()), ["all", "main", "build"]);
        assert_eq!(profile.root().inclusive_sample_count(), 2);
    }

    /// Random (name, parent position, samples) stack frame descriptions
    fn random_profile() -> impl Strategy<Value = CpuProfileResponse> {
        let frames = prop::collection::vec((any::<bool>(), any::<Index>(), any::<bool>()), 1..40);
        let samples = prop::collection::vec(any::<Index>(), 0..100);
        (frames, samples).prop_map(|(frames, samples)| {
            let ids = (0..frames.len()).map(|idx| format!("f{idx}")).collect::<Vec<_>>();
            let table = frames
                .iter()
                .enumerate()
                .map(|(idx, &(toplevel, parent, native))| {
                    let name = if native {
                        format!("{NATIVE_MARKER} f{idx}")
                    } else {
                        format!("f{idx}")
                    };
                    let parent = (idx > 0 && !toplevel).then(|| ids[parent.index(idx)].as_str());
                    (
                        StackFrameId::from(ids[idx].as_str()),
                        StackFrame {
                            category: "Dart".into(),
                            name: name.into(),
                            parent: parent.map(StackFrameId::from),
                        },
                    )
                })
                .collect::<Vec<_>>();
            CpuProfileResponse {
                sample_count: samples.len() as u64,
                stack_frames: StackFrameTable::new(table),
                trace_events: samples
                    .iter()
                    .map(|leaf| CpuSample {
                        sf: ids[leaf.index(ids.len())].as_str().into(),
                        ts: 0.0,
                        tid: 0,
                    })
                    .collect(),
                ..CpuProfileResponse::default()
            }
        })
    }

    proptest! {
        #[test]
        fn inclusive_is_exclusive_plus_children(response in random_profile()) {
            let num_samples = response.sample_count;
            let num_frames = response.stack_frames.len();
            let profile = CpuProfileData::new(response).expect("Profile should be valid");
            prop_assert_eq!(profile.root().inclusive_sample_count(), num_samples);
            prop_assert_eq!(profile.root().consumption_ratio(), 1.0);

            let mut seen = 0;
            for frame in profile.pre_order() {
                seen += 1;
                let children = frame.children().map(|child| child.inclusive_sample_count()).sum::<u64>();
                prop_assert_eq!(
                    frame.inclusive_sample_count(),
                    frame.exclusive_sample_count() + children
                );
                for (idx, child) in frame.children().enumerate() {
                    prop_assert_eq!(child.index_in_parent(), idx);
                    prop_assert_eq!(child.depth(), frame.depth() + 1);
                }
                if frame.inclusive_sample_count() == 0 && frame.parent().is_some() {
                    prop_assert_eq!(frame.consumption_ratio(), 0.0);
                }
            }
            prop_assert_eq!(seen, profile.len());
            prop_assert!(seen > num_frames);
        }
    }
}
